/// 20-byte account or contract address.
pub type Address = [u8; 20];

/// 32-byte hash (code hashes, block hashes).
pub type Hash = [u8; 32];

/// Token amount. Crosses the guest boundary as a 32-byte big-endian word.
pub type Amount = u128;

/// A 32-byte EVM-style word.
pub type Word = [u8; 32];

/// The all-zero address.
pub const ZERO_ADDRESS: Address = [0u8; 20];

/// Addresses with this many leading zero bytes are reserved for system contracts.
pub const SYSTEM_ADDRESS_ZERO_PREFIX: usize = 18;

/// Whether `address` falls in the reserved system-contract range.
pub fn is_system_address(address: &Address) -> bool {
    address[..SYSTEM_ADDRESS_ZERO_PREFIX].iter().all(|b| *b == 0)
}

/// Left-pad `data` with zeros to 32 bytes. Longer inputs keep their last 32 bytes.
pub fn pad_left_32(data: &[u8]) -> Word {
    let mut out = [0u8; 32];
    if data.len() >= 32 {
        out.copy_from_slice(&data[data.len() - 32..]);
    } else {
        out[32 - data.len()..].copy_from_slice(data);
    }
    out
}

/// Left-pad an address into a 32-byte word.
pub fn address_to_word(address: &Address) -> Word {
    pad_left_32(address)
}

/// Take the trailing 20 bytes of a (possibly padded) address encoding.
pub fn cleanup_address(data: &[u8]) -> Address {
    let mut out = [0u8; 20];
    if data.len() >= 20 {
        out.copy_from_slice(&data[data.len() - 20..]);
    } else {
        out[20 - data.len()..].copy_from_slice(data);
    }
    out
}

/// Encode an amount as a 32-byte big-endian word.
pub fn amount_to_word(amount: Amount) -> Word {
    pad_left_32(&amount.to_be_bytes())
}

/// Decode a big-endian amount of up to 32 bytes. Values above `u128::MAX` saturate.
pub fn amount_from_be(data: &[u8]) -> Amount {
    let word = pad_left_32(data);
    if word[..16].iter().any(|b| *b != 0) {
        return Amount::MAX;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    u128::from_be_bytes(low)
}

/// Serde helper: `Vec<u8>` as a standard base64 string.
pub mod serde_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Serde helper: `Vec<Vec<u8>>` as a list of base64 strings.
pub mod serde_base64_vec {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded: Vec<String> = value.iter().map(|v| STANDARD.encode(v)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strs: Option<Vec<String>> = Option::deserialize(deserializer)?;
        strs.unwrap_or_default()
            .into_iter()
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde helper: a 20-byte address as a plain byte list, accepting padded input.
pub mod serde_address_bytes {
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    use super::{cleanup_address, Address};

    pub fn serialize<S>(value: &Address, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: Option<Vec<u8>> = Option::deserialize(deserializer)?;
        Ok(cleanup_address(&v.unwrap_or_default()))
    }
}
