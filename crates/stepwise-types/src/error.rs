use thiserror::Error;

/// Errors from plan persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plan not found: {0}")]
    NotFound(String),

    #[error("invalid plan id '{0}'")]
    InvalidId(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
