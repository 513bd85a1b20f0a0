#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Failed to spawn terminal: {0}")]
    Spawn(String),

    #[error("Terminal is not active")]
    NotActive,

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("IO error: {0}")]
    Io(String),
}
