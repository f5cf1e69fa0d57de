use ed25519_dalek::{Signer, Verifier};

use crate::error::CryptoError;

/// 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// Wrapper around an Ed25519 keypair.
pub struct Keypair {
    inner: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            inner: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Accepts either a 32-byte seed or the 64-byte `seed || pubkey` form.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 && bytes.len() != 64 {
            return Err(CryptoError::InvalidKeyMaterial {
                reason: format!("private key must be 32 or 64 bytes, got {}", bytes.len()),
            });
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.verifying_key().to_bytes()
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.inner.sign(message).to_bytes()
    }
}

fn parse_key(pubkey: &[u8], index: usize) -> Result<ed25519_dalek::VerifyingKey, CryptoError> {
    let bytes: &PublicKey = pubkey.try_into().map_err(|_| CryptoError::InvalidKeyMaterial {
        reason: format!("public key {index} must be 32 bytes, got {}", pubkey.len()),
    })?;
    ed25519_dalek::VerifyingKey::from_bytes(bytes).map_err(|e| CryptoError::InvalidKeyMaterial {
        reason: e.to_string(),
    })
}

fn parse_signature(signature: &[u8], index: usize) -> Result<ed25519_dalek::Signature, CryptoError> {
    let bytes: &Signature =
        signature
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureFormat {
                reason: format!(
                    "signature {index} must be 64 bytes, got {}",
                    signature.len()
                ),
            })?;
    Ok(ed25519_dalek::Signature::from_bytes(bytes))
}

/// Verify an Ed25519 signature given as raw guest bytes.
pub fn verify(message: &[u8], signature: &[u8], pubkey: &[u8]) -> Result<(), CryptoError> {
    let verifying_key = parse_key(pubkey, 0)?;
    let sig = parse_signature(signature, 0)?;
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed { index: 0 })
}

/// Batch-verify signatures.
///
/// A single public key may be shared by all messages, and a single message
/// may be signed by all keys; otherwise the three lists must have equal
/// length. Falls back to sequential checks to identify the failing index.
pub fn batch_verify(
    messages: &[&[u8]],
    signatures: &[&[u8]],
    pubkeys: &[&[u8]],
) -> Result<(), CryptoError> {
    let n = signatures.len();
    let mismatch = || CryptoError::BatchLengthMismatch {
        messages: messages.len(),
        signatures: signatures.len(),
        keys: pubkeys.len(),
    };
    let messages: Vec<&[u8]> = match messages.len() {
        m if m == n => messages.to_vec(),
        1 => vec![messages[0]; n],
        _ => return Err(mismatch()),
    };
    let pubkeys: Vec<&[u8]> = match pubkeys.len() {
        k if k == n => pubkeys.to_vec(),
        1 => vec![pubkeys[0]; n],
        _ => return Err(mismatch()),
    };
    if n == 0 {
        return Ok(());
    }

    let mut verifying_keys = Vec::with_capacity(n);
    let mut dalek_sigs = Vec::with_capacity(n);
    for (i, (pk, sig)) in pubkeys.iter().zip(signatures.iter()).enumerate() {
        verifying_keys.push(parse_key(pk, i)?);
        dalek_sigs.push(parse_signature(sig, i)?);
    }

    if ed25519_dalek::verify_batch(&messages, &dalek_sigs, &verifying_keys).is_ok() {
        return Ok(());
    }

    for (i, ((msg, sig), vk)) in messages
        .iter()
        .zip(dalek_sigs.iter())
        .zip(verifying_keys.iter())
        .enumerate()
    {
        if vk.verify(msg, sig).is_err() {
            return Err(CryptoError::VerificationFailed { index: i });
        }
    }
    Ok(())
}
