use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("LLM adapter request failed: {0}")]
    Request(String),

    #[error("LLM adapter returned status {0}")]
    Status(u16),

    #[error("LLM adapter returned an empty response")]
    Empty,
}

/// Port through which the terminal bridge obtains natural-language
/// explanations of commands and their output.
///
/// Implementations must not block the caller's inbound loop; the bridge
/// awaits these on a separate task.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Explain a command for the given session, threading the session's
    /// conversation context.
    async fn analyze_command(
        &self,
        session_id: &str,
        command: &str,
    ) -> Result<String, AnalyzerError>;

    /// Explain the output a command produced.
    async fn analyze_output(
        &self,
        session_id: &str,
        command: &str,
        output: &str,
    ) -> Result<String, AnalyzerError>;

    /// Reset the session's conversation context to the system message.
    fn clear_context(&self, session_id: &str);
}
