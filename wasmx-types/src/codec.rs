use crate::error::TypesError;
use crate::primitives::Address;

/// Conversion between address bytes and their human-readable form.
///
/// Chains plug in their own encoding (bech32 in production); the execution
/// core only needs these conversions for the address host calls and for
/// building the standardized-ABI environment.
pub trait AddressCodec: Send + Sync {
    /// Human-readable prefix of the local chain.
    fn prefix(&self) -> &str;

    /// Encode with the local prefix.
    fn bytes_to_string(&self, address: &Address) -> Result<String, TypesError> {
        self.bytes_to_string_with_prefix(address, self.prefix())
    }

    /// Decode, requiring the local prefix.
    fn string_to_bytes(&self, value: &str) -> Result<Address, TypesError> {
        let (prefix, address) = self.string_to_bytes_any_prefix(value)?;
        if prefix != self.prefix() {
            return Err(TypesError::InvalidPrefix {
                expected: self.prefix().to_string(),
                actual: prefix,
            });
        }
        Ok(address)
    }

    /// Encode with an arbitrary prefix (multi-chain form).
    fn bytes_to_string_with_prefix(
        &self,
        address: &Address,
        prefix: &str,
    ) -> Result<String, TypesError>;

    /// Decode any prefix, returning it with the address bytes.
    fn string_to_bytes_any_prefix(&self, value: &str) -> Result<(String, Address), TypesError>;
}

/// Address codec rendering `<prefix>1<lowercase hex>`.
#[derive(Debug, Clone)]
pub struct HexAddressCodec {
    prefix: String,
}

impl HexAddressCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl AddressCodec for HexAddressCodec {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn bytes_to_string_with_prefix(
        &self,
        address: &Address,
        prefix: &str,
    ) -> Result<String, TypesError> {
        if prefix.is_empty() {
            return Err(TypesError::InvalidAddress {
                reason: "empty prefix".to_string(),
            });
        }
        Ok(format!("{prefix}1{}", hex::encode(address)))
    }

    fn string_to_bytes_any_prefix(&self, value: &str) -> Result<(String, Address), TypesError> {
        // Hex bodies may contain '1', so split at the fixed body length.
        let body_start = value
            .len()
            .checked_sub(40)
            .filter(|start| *start > 0 && value.as_bytes()[start - 1] == b'1')
            .ok_or_else(|| TypesError::InvalidAddress {
                reason: format!("malformed address {value}"),
            })?;
        if !value.is_char_boundary(body_start) {
            return Err(TypesError::InvalidAddress {
                reason: format!("malformed address {value}"),
            });
        }
        let prefix = &value[..body_start - 1];
        if prefix.is_empty() {
            return Err(TypesError::InvalidAddress {
                reason: "empty prefix".to_string(),
            });
        }
        let bytes = hex::decode(&value[body_start..]).map_err(|e| TypesError::InvalidAddress {
            reason: e.to_string(),
        })?;
        let mut address = [0u8; 20];
        address.copy_from_slice(&bytes);
        Ok((prefix.to_string(), address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_codec_local_prefix() {
        let codec = HexAddressCodec::new("mythos");
        let addr = [0x11u8; 20];
        let s = codec.bytes_to_string(&addr).unwrap();
        assert_eq!(s, format!("mythos1{}", "11".repeat(20)));
        assert_eq!(codec.string_to_bytes(&s).unwrap(), addr);
    }

    #[test]
    fn test_hex_codec_rejects_foreign_prefix() {
        let codec = HexAddressCodec::new("mythos");
        let s = codec
            .bytes_to_string_with_prefix(&[2u8; 20], "level0")
            .unwrap();
        assert!(codec.string_to_bytes(&s).is_err());
        let (prefix, addr) = codec.string_to_bytes_any_prefix(&s).unwrap();
        assert_eq!(prefix, "level0");
        assert_eq!(addr, [2u8; 20]);
    }

    #[test]
    fn test_hex_codec_malformed() {
        let codec = HexAddressCodec::new("mythos");
        assert!(codec.string_to_bytes("mythos1abc").is_err());
        assert!(codec.string_to_bytes("nothing").is_err());
        assert!(codec
            .string_to_bytes(&format!("mythos1{}", "zz".repeat(20)))
            .is_err());
    }
}
