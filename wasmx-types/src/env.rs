use serde::{Deserialize, Serialize};

use crate::codec::AddressCodec;
use crate::error::TypesError;
use crate::primitives::{Address, Amount, Hash};

/// Chain identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainInfo {
    pub denom: String,
    /// Numeric chain id (EVM `CHAINID`).
    pub chain_id: u64,
    /// Full chain id string, e.g. `mythos_7000-14`.
    pub chain_id_full: String,
}

/// Block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    /// Nanoseconds since the unix epoch.
    pub timestamp_ns: u64,
    pub gas_limit: u64,
    pub hash: Hash,
    pub proposer: Address,
}

impl BlockInfo {
    pub fn timestamp_secs(&self) -> u64 {
        self.timestamp_ns / 1_000_000_000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Position of the transaction in the block.
    pub index: u32,
    pub gas_price: Amount,
}

/// The contract currently executing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContractInfo {
    pub address: Address,
    pub code_hash: Hash,
    pub code_id: u64,
    pub bytecode: Vec<u8>,
    /// Flattened dependency labels.
    pub system_deps: Vec<String>,
}

/// The call being served.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurrentCallInfo {
    pub origin: Address,
    pub sender: Address,
    pub funds: Amount,
    pub gas_limit: u64,
    pub call_data: Vec<u8>,
    pub is_query: bool,
    pub read_only: bool,
}

/// Immutable environment snapshot for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Env {
    pub chain: ChainInfo,
    pub block: BlockInfo,
    pub transaction: Option<TransactionInfo>,
    pub contract: ContractInfo,
    pub current_call: CurrentCallInfo,
}

impl Env {
    /// Environment for a nested call: same chain, block and transaction.
    pub fn for_call(&self, contract: ContractInfo, current_call: CurrentCallInfo) -> Env {
        Env {
            chain: self.chain.clone(),
            block: self.block.clone(),
            transaction: self.transaction.clone(),
            contract,
            current_call,
        }
    }

    /// JSON rendering handed to guests by `getEnv`, with human-readable addresses.
    pub fn to_guest_json(&self, codec: &dyn AddressCodec) -> Result<serde_json::Value, TypesError> {
        let address = |a: &Address| codec.bytes_to_string(a);
        Ok(serde_json::json!({
            "chain": {
                "denom": self.chain.denom,
                "chain_id": self.chain.chain_id.to_string(),
                "chain_id_full": self.chain.chain_id_full,
            },
            "block": {
                "height": self.block.height,
                "time": self.block.timestamp_ns.to_string(),
                "gas_limit": self.block.gas_limit,
                "hash": hex::encode(self.block.hash),
                "proposer": address(&self.block.proposer)?,
            },
            "transaction": self.transaction.as_ref().map(|t| serde_json::json!({
                "index": t.index,
                "gas_price": t.gas_price.to_string(),
            })),
            "contract": {
                "address": address(&self.contract.address)?,
                "code_hash": hex::encode(self.contract.code_hash),
                "code_id": self.contract.code_id,
                "system_deps": self.contract.system_deps,
            },
            "current_call": {
                "origin": address(&self.current_call.origin)?,
                "sender": address(&self.current_call.sender)?,
                "funds": self.current_call.funds.to_string(),
                "gas_limit": self.current_call.gas_limit,
                "call_data": self.current_call.call_data,
                "is_query": self.current_call.is_query,
                "readonly": self.current_call.read_only,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HexAddressCodec;

    fn sample_env() -> Env {
        Env {
            chain: ChainInfo {
                denom: "amyt".to_string(),
                chain_id: 7000,
                chain_id_full: "mythos_7000-14".to_string(),
            },
            block: BlockInfo {
                height: 42,
                timestamp_ns: 3_500_000_000,
                gas_limit: 30_000_000,
                hash: [1u8; 32],
                proposer: [2u8; 20],
            },
            transaction: Some(TransactionInfo {
                index: 1,
                gas_price: 10,
            }),
            contract: ContractInfo {
                address: [3u8; 20],
                ..Default::default()
            },
            current_call: CurrentCallInfo {
                origin: [4u8; 20],
                sender: [4u8; 20],
                call_data: b"{}".to_vec(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_timestamp_secs() {
        assert_eq!(sample_env().block.timestamp_secs(), 3);
    }

    #[test]
    fn test_for_call_keeps_block() {
        let env = sample_env();
        let nested = env.for_call(
            ContractInfo {
                address: [9u8; 20],
                ..Default::default()
            },
            CurrentCallInfo::default(),
        );
        assert_eq!(nested.block, env.block);
        assert_eq!(nested.contract.address, [9u8; 20]);
    }

    #[test]
    fn test_guest_json_uses_codec() {
        let codec = HexAddressCodec::new("mythos");
        let json = sample_env().to_guest_json(&codec).unwrap();
        assert_eq!(json["block"]["height"], 42);
        assert_eq!(json["block"]["time"], "3500000000");
        assert_eq!(
            json["contract"]["address"],
            format!("mythos1{}", "03".repeat(20))
        );
        assert_eq!(json["chain"]["chain_id_full"], "mythos_7000-14");
    }
}
