use sha2::Sha256;
use sha3::{Digest, Keccak256};
use wasmx_types::primitives::Hash;

/// Keccak-256 (the Ethereum variant, not SHA3-256).
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of the given data.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash multiple pieces of data together with SHA-256.
pub fn sha256_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// BLAKE3 digest, used for compiled-module cache keys.
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hex(&keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_sha256_abc() {
        assert_eq!(
            hex(&sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_multi_matches_concatenation() {
        assert_eq!(sha256_multi(&[b"hello", b" ", b"world"]), sha256(b"hello world"));
    }

    #[test]
    fn test_blake3_deterministic() {
        assert_eq!(blake3_hash(b"module"), blake3_hash(b"module"));
        assert_ne!(blake3_hash(b"module-a"), blake3_hash(b"module-b"));
    }
}
