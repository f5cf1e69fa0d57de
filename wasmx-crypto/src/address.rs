use wasmx_types::primitives::{Address, Hash};

use crate::hash::keccak256;

/// Address of a contract created by `sender` at account sequence `nonce`.
/// Address = keccak256(rlp([sender, nonce]))[12..32]
pub fn create_address(sender: &Address, nonce: u64) -> Address {
    let nonce_bytes = nonce.to_be_bytes();
    let first = nonce_bytes.iter().position(|b| *b != 0).unwrap_or(8);
    let trimmed = &nonce_bytes[first..];

    let mut payload = Vec::with_capacity(32);
    payload.push(0x80 + 20);
    payload.extend_from_slice(sender);
    match trimmed {
        [] => payload.push(0x80),
        [b] if *b < 0x80 => payload.push(*b),
        bytes => {
            payload.push(0x80 + bytes.len() as u8);
            payload.extend_from_slice(bytes);
        }
    }

    let mut encoded = Vec::with_capacity(payload.len() + 1);
    encoded.push(0xc0 + payload.len() as u8);
    encoded.extend_from_slice(&payload);
    tail_address(&keccak256(&encoded))
}

/// Deterministic address from a salt and the deployed code hash.
/// Address = keccak256(0xff || sender || salt || code_hash)[12..32]
pub fn create2_address(sender: &Address, salt: &[u8; 32], code_hash: &Hash) -> Address {
    let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
    buf.push(0xff);
    buf.extend_from_slice(sender);
    buf.extend_from_slice(salt);
    buf.extend_from_slice(code_hash);
    tail_address(&keccak256(&buf))
}

fn tail_address(hash: &Hash) -> Address {
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(hex_str: &str) -> Address {
        let mut out = [0u8; 20];
        for (i, chunk) in hex_str.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).unwrap();
            out[i] = u8::from_str_radix(s, 16).unwrap();
        }
        out
    }

    #[test]
    fn test_create_address_known_vectors() {
        let sender = addr("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0");
        assert_eq!(
            create_address(&sender, 0),
            addr("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d")
        );
        assert_eq!(
            create_address(&sender, 1),
            addr("343c43a37d37dff08ae8c4a11544c718abb4fcf8")
        );
    }

    #[test]
    fn test_create_address_nonce_changes_result() {
        let sender = [9u8; 20];
        assert_ne!(create_address(&sender, 127), create_address(&sender, 128));
        assert_ne!(create_address(&sender, 1 << 40), create_address(&sender, 0));
    }

    #[test]
    fn test_create2_zero_inputs() {
        // keccak256(0xff ++ 0x00*20 ++ 0x00*32 ++ keccak256(0x00))
        let code_hash = keccak256(&[0u8]);
        assert_eq!(
            create2_address(&[0u8; 20], &[0u8; 32], &code_hash),
            addr("4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38")
        );
    }

    #[test]
    fn test_create2_salt_sensitivity() {
        let code_hash = keccak256(b"code");
        let a = create2_address(&[1u8; 20], &[0u8; 32], &code_hash);
        let b = create2_address(&[1u8; 20], &[1u8; 32], &code_hash);
        assert_ne!(a, b);
    }
}
