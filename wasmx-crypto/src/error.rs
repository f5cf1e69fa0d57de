use thiserror::Error;

/// Errors produced by the cryptographic primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },

    #[error("invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: String },

    #[error("invalid message hash: expected 32 bytes, got {len}")]
    InvalidHashLength { len: usize },

    #[error("signature verification failed at index {index}")]
    VerificationFailed { index: usize },

    #[error("batch length mismatch: {messages} messages, {signatures} signatures, {keys} keys")]
    BatchLengthMismatch {
        messages: usize,
        signatures: usize,
        keys: usize,
    },

    #[error("recovery failed: {reason}")]
    RecoveryFailed { reason: String },
}
