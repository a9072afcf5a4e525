use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("network error: {0}")]
    Http(String),
    /// Rejection reported by the activity store; the message is shown verbatim.
    #[error("{0}")]
    Remote(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
