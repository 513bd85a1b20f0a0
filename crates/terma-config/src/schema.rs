use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8004;
pub const DEFAULT_UI_PORT: u16 = 8766;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a terminal assistant that helps users with \
    command-line tasks. Provide concise explanations and suggestions for terminal commands. \
    Focus on being helpful, accurate, and security-conscious.";

/// Resolved Terma configuration: env > file > defaults, computed once at
/// startup and passed around immutably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub terminal: TerminalConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    pub default_shell: String,
    pub font_size: u32,
    pub theme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub adapter_url: String,
    pub adapter_ws_url: String,
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            terminal: TerminalConfig::default(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            font_size: 14,
            theme: "dark".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            model: "claude-3-sonnet-20240229".to_string(),
            adapter_url: "http://localhost:8300".to_string(),
            adapter_ws_url: "ws://localhost:8301".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}
