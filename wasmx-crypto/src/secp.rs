use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, PublicKey, Secp256k1};

use crate::error::CryptoError;

/// Uncompressed public key: `0x04 || x || y`.
pub type UncompressedKey = [u8; 65];

fn parse_message(hash: &[u8]) -> Result<Message, CryptoError> {
    if hash.len() != 32 {
        return Err(CryptoError::InvalidHashLength { len: hash.len() });
    }
    Message::from_slice(hash).map_err(|_| CryptoError::InvalidHashLength { len: hash.len() })
}

/// Verify a 64-byte compact ECDSA signature over a 32-byte message hash.
///
/// `pubkey` may be compressed (33 bytes) or uncompressed (65 bytes).
pub fn verify(hash: &[u8], signature: &[u8], pubkey: &[u8]) -> Result<(), CryptoError> {
    let message = parse_message(hash)?;
    let mut sig =
        Signature::from_compact(signature).map_err(|e| CryptoError::InvalidSignatureFormat {
            reason: e.to_string(),
        })?;
    sig.normalize_s();
    let key = PublicKey::from_slice(pubkey).map_err(|e| CryptoError::InvalidKeyMaterial {
        reason: e.to_string(),
    })?;
    Secp256k1::verification_only()
        .verify_ecdsa(&message, &sig, &key)
        .map_err(|_| CryptoError::VerificationFailed { index: 0 })
}

/// Recover the signer's uncompressed public key.
///
/// `recovery_param` accepts both the raw id (0..=3) and the Ethereum
/// `v` form (27/28).
pub fn recover(
    hash: &[u8],
    signature: &[u8],
    recovery_param: i32,
) -> Result<UncompressedKey, CryptoError> {
    let message = parse_message(hash)?;
    let raw_id = if recovery_param >= 27 {
        recovery_param - 27
    } else {
        recovery_param
    };
    let id = RecoveryId::from_i32(raw_id).map_err(|e| CryptoError::RecoveryFailed {
        reason: format!("invalid recovery id {recovery_param}: {e}"),
    })?;
    let sig = RecoverableSignature::from_compact(signature, id).map_err(|e| {
        CryptoError::InvalidSignatureFormat {
            reason: e.to_string(),
        }
    })?;
    let key = Secp256k1::verification_only()
        .recover_ecdsa(&message, &sig)
        .map_err(|e| CryptoError::RecoveryFailed {
            reason: e.to_string(),
        })?;
    Ok(key.serialize_uncompressed())
}
