use thiserror::Error;

/// Errors raised while decoding shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid storage type: {value}")]
    InvalidStorageType { value: String },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("invalid address prefix: expected {expected}, got {actual}")]
    InvalidPrefix { expected: String, actual: String },

    #[error("json error: {reason}")]
    Json { reason: String },
}

impl From<serde_json::Error> for TypesError {
    fn from(err: serde_json::Error) -> Self {
        TypesError::Json {
            reason: err.to_string(),
        }
    }
}
