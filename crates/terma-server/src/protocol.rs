use serde::{Deserialize, Serialize};

use terma_core::{DEFAULT_COLS, DEFAULT_ROWS};

/// Frames a client may send over the terminal WebSocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input {
        #[serde(default)]
        data: String,
    },
    Resize {
        #[serde(default = "default_rows")]
        rows: u16,
        #[serde(default = "default_cols")]
        cols: u16,
    },
    LlmAssist {
        #[serde(default)]
        command: String,
        #[serde(default)]
        is_output_analysis: bool,
    },
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Output {
        data: String,
    },
    LlmResponse {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        loading: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<bool>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn output(chunk: &[u8]) -> Self {
        Self::Output {
            data: String::from_utf8_lossy(chunk).into_owned(),
        }
    }
}

/// How an `llm_assist` request resolves once its `command` field is
/// interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistQuery {
    /// Nothing to analyze; answer with a canned hint.
    Empty,
    Command(String),
    Output { command: String, output: String },
}

/// Delimiter between command and captured output in output-analysis
/// requests.
pub const OUTPUT_DELIMITER: &str = "\nOutput:\n";

/// Interpret the `command` field of an `llm_assist` frame. Output-analysis
/// requests carry `command` and output joined by [`OUTPUT_DELIMITER`];
/// command requests may carry a leading `?` from the terminal shortcut.
pub fn derive_query(command: &str, is_output_analysis: bool) -> AssistQuery {
    if is_output_analysis {
        match command.split_once(OUTPUT_DELIMITER) {
            Some((cmd, output)) => AssistQuery::Output {
                command: cmd.to_string(),
                output: output.to_string(),
            },
            None => AssistQuery::Output {
                command: command.to_string(),
                output: String::new(),
            },
        }
    } else {
        let cmd = command.strip_prefix('?').unwrap_or(command).trim();
        if cmd.is_empty() {
            AssistQuery::Empty
        } else {
            AssistQuery::Command(cmd.to_string())
        }
    }
}
