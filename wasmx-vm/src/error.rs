use thiserror::Error;

/// Errors that can occur while executing a contract.
///
/// Variants split into two classes. Fatal errors abort the whole
/// transaction and are always surfaced to the outermost caller. Call-level
/// errors are recorded as the outcome of one (possibly nested) invocation.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("Out of gas: used {used} of {limit}")]
    OutOfGas { used: u64, limit: u64 },

    #[error("Instantiation error: {reason}")]
    Instantiation { reason: String },

    #[error("Missing export: {name}")]
    MissingExport { name: String },

    #[error("Memory error: {reason}")]
    Memory { reason: String },

    #[error("Encoding error: {reason}")]
    Encoding { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Config error: {reason}")]
    Config { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] wasmx_storage::error::StorageError),

    #[error("Reverted: 0x{}", hex::encode(data))]
    Revert { data: Vec<u8> },

    #[error("Contract error: {reason}")]
    ContractError { reason: String },

    #[error("Trap: {reason}")]
    Trap { reason: String },

    #[error("Panic: {reason}")]
    Panic { reason: String },

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Call depth exceeded: {depth} > {max}")]
    CallDepthExceeded { depth: usize, max: usize },

    #[error("Chain error: {reason}")]
    Chain { reason: String },
}

impl VmError {
    /// Whether the error must abort the surrounding transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::OutOfGas { .. }
                | VmError::Instantiation { .. }
                | VmError::MissingExport { .. }
                | VmError::Memory { .. }
                | VmError::Encoding { .. }
                | VmError::Internal { .. }
                | VmError::Config { .. }
                | VmError::Storage(_)
        )
    }

    pub fn memory(reason: impl Into<String>) -> Self {
        VmError::Memory {
            reason: reason.into(),
        }
    }

    pub fn encoding(reason: impl Into<String>) -> Self {
        VmError::Encoding {
            reason: reason.into(),
        }
    }

    pub fn chain(reason: impl Into<String>) -> Self {
        VmError::Chain {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for VmError {
    fn from(err: serde_json::Error) -> Self {
        VmError::Encoding {
            reason: err.to_string(),
        }
    }
}

impl From<wasmx_crypto::error::CryptoError> for VmError {
    fn from(err: wasmx_crypto::error::CryptoError) -> Self {
        VmError::ContractError {
            reason: err.to_string(),
        }
    }
}

impl From<wasmx_types::error::TypesError> for VmError {
    fn from(err: wasmx_types::error::TypesError) -> Self {
        VmError::Encoding {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(VmError::OutOfGas { used: 2, limit: 1 }.is_fatal());
        assert!(VmError::memory("out of bounds").is_fatal());
        assert!(!VmError::Revert { data: vec![1] }.is_fatal());
        assert!(!VmError::Trap {
            reason: "unreachable".into()
        }
        .is_fatal());
        assert!(!VmError::CallDepthExceeded { depth: 65, max: 64 }.is_fatal());
    }

    #[test]
    fn test_revert_renders_hex() {
        let err = VmError::Revert {
            data: b"no".to_vec(),
        };
        assert_eq!(err.to_string(), "Reverted: 0x6e6f");
    }
}
