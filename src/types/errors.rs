use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocsError {
    #[error("Upstream server '{0}' could not be started: {1}")]
    ServerNotFound(String, String),

    #[error("Upstream server '{0}' closed the connection")]
    ServerClosed(String),

    #[error("{0}")]
    Transport(String),

    #[error("Upstream protocol error: {0}")]
    Protocol(String),

    #[error("upstream returned no text content")]
    NoTextContent,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DocsError>;
