//! JSON records exchanged across the host/guest boundary.
//!
//! Records of the extended native surface carry bytes as plain number
//! lists; storage, process and relay records carry bytes as base64 strings.

use serde::{Deserialize, Serialize};

use crate::primitives::{
    amount_from_be, serde_address_bytes, serde_base64, serde_base64_vec, Address, Amount, Hash,
    Word,
};

// ─── Call Envelope ───────────────────────────────────────────────────────────

/// Outcome code of a routed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallCode {
    Success,
    /// Structural or authorization failure; the callee never ran.
    Failure,
    /// The callee trapped or reverted.
    Revert,
}

impl CallCode {
    pub fn as_i32(self) -> i32 {
        match self {
            CallCode::Success => 0,
            CallCode::Failure => 1,
            CallCode::Revert => 2,
        }
    }

    pub fn is_success(self) -> bool {
        self == CallCode::Success
    }
}

/// Normalized cross-contract call request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallRequest {
    pub to: Address,
    pub from: Address,
    pub value: Amount,
    pub gas_limit: u64,
    pub calldata: Vec<u8>,
    pub bytecode: Vec<u8>,
    pub code_hash: Option<Hash>,
    pub is_query: bool,
}

/// Result of a routed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub code: CallCode,
    pub data: Vec<u8>,
}

impl CallResponse {
    pub fn new(code: CallCode, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: CallCode::Failure,
            data: message.into().into_bytes(),
        }
    }
}

/// Guest-side call request of the extended native surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequestJson {
    #[serde(with = "serde_address_bytes")]
    pub to: Address,
    #[serde(default, with = "serde_address_bytes")]
    pub from: Address,
    #[serde(default)]
    pub value: Vec<u8>,
    #[serde(default)]
    pub gas_limit: Vec<u8>,
    #[serde(default)]
    pub calldata: Vec<u8>,
    #[serde(default)]
    pub bytecode: Vec<u8>,
    #[serde(default)]
    pub code_hash: Vec<u8>,
    #[serde(default)]
    pub is_query: bool,
}

impl CallRequestJson {
    /// Normalize, using `from` as the caller.
    pub fn into_request(self, from: Address) -> CallRequest {
        let gas_limit = amount_from_be(&self.gas_limit);
        CallRequest {
            to: self.to,
            from,
            value: amount_from_be(&self.value),
            gas_limit: u64::try_from(gas_limit).unwrap_or(u64::MAX),
            calldata: self.calldata,
            bytecode: self.bytecode,
            code_hash: if self.code_hash.is_empty() {
                None
            } else {
                let mut hash = [0u8; 32];
                let n = self.code_hash.len().min(32);
                hash[32 - n..].copy_from_slice(&self.code_hash[self.code_hash.len() - n..]);
                Some(hash)
            },
            is_query: self.is_query,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponseJson {
    pub success: i32,
    pub data: Vec<u8>,
}

impl From<CallResponse> for CallResponseJson {
    fn from(resp: CallResponse) -> Self {
        Self {
            success: resp.code.as_i32(),
            data: resp.data,
        }
    }
}

// ─── Deployment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAccountRequestJson {
    #[serde(default)]
    pub bytecode: Vec<u8>,
    #[serde(default)]
    pub balance: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Create2AccountRequestJson {
    #[serde(default)]
    pub bytecode: Vec<u8>,
    #[serde(default)]
    pub balance: Vec<u8>,
    #[serde(default)]
    pub salt: Vec<u8>,
}

/// A coin amount with its denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Instantiate a stored code id (system-call surface).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstantiateAccountRequest {
    pub code_id: u64,
    #[serde(default, with = "serde_base64")]
    pub msg: Vec<u8>,
    #[serde(default)]
    pub funds: Vec<Coin>,
    #[serde(default)]
    pub label: String,
    #[serde(default, with = "serde_base64")]
    pub salt: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantiateAccountResponse {
    pub address: String,
}

/// Deployment parameters handed to the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    pub creator: Address,
    pub bytecode: Vec<u8>,
    pub balance: Amount,
    /// Present for deterministic (create2) deployments.
    pub salt: Option<Word>,
    /// Interpreter dependency for source-code deployments.
    pub interpreter: Option<String>,
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageRange {
    #[serde(default, with = "serde_base64")]
    pub start_key: Vec<u8>,
    #[serde(default, with = "serde_base64")]
    pub end_key: Vec<u8>,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePair {
    #[serde(with = "serde_base64")]
    pub key: Vec<u8>,
    #[serde(with = "serde_base64")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePairs {
    pub values: Vec<StoragePair>,
}

/// Values-only range result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageValues {
    #[serde(with = "serde_base64_vec")]
    pub values: Vec<Vec<u8>>,
}

// ─── Logs and Events ─────────────────────────────────────────────────────────

/// A contract log accumulated during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WasmxLog {
    pub contract_address: Address,
    pub system_dependency: String,
    pub log_type: String,
    pub data: Vec<u8>,
    pub topics: Vec<Word>,
}

/// Guest log record: `{type, data, topics}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WasmxLogJson {
    #[serde(default, rename = "type")]
    pub log_type: String,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub topics: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub index: bool,
}

/// A chain event emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    #[serde(rename = "type")]
    pub ty: String,
    pub attributes: Vec<EventAttribute>,
}

// ─── Misc Requests ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MerkleSlices {
    #[serde(with = "serde_base64_vec")]
    pub slices: Vec<Vec<u8>>,
}

/// Structured log request of the `Logger*` host calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerRequest {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyTxResponse {
    pub valid: bool,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CosmosMsgResponse {
    pub success: bool,
    pub data: String,
}

/// Account record of the extended `getAccount` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountJson {
    pub address: Vec<u8>,
    pub code_hash: Vec<u8>,
    pub bytecode: Vec<u8>,
    pub balance: Vec<u8>,
}

/// Prefixed address conversion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressPrefixedRequest {
    #[serde(default, with = "serde_base64")]
    pub bz: Vec<u8>,
    pub prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcRequest {
    pub ip_address: String,
    #[serde(default, with = "serde_base64")]
    pub contract: Vec<u8>,
    #[serde(default, with = "serde_base64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcResponse {
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartTimeoutRequest {
    pub id: String,
    pub contract: String,
    /// Delay in milliseconds.
    pub delay: i64,
    #[serde(default, with = "serde_base64")]
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelTimeoutRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartBackgroundProcessRequest {
    pub contract: String,
    #[serde(default, with = "serde_base64")]
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartBackgroundProcessResponse {
    pub error: String,
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteToBackgroundProcessRequest {
    pub contract: String,
    #[serde(default, with = "serde_base64")]
    pub data: Vec<u8>,
    #[serde(rename = "ptrFunc")]
    pub ptr_func: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteToBackgroundProcessResponse {
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadFromBackgroundProcessRequest {
    pub contract: String,
    #[serde(rename = "ptrFunc")]
    pub ptr_func: String,
    #[serde(rename = "lenFunc")]
    pub len_func: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadFromBackgroundProcessResponse {
    pub error: String,
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateContractStateRequest {
    pub contract_address: String,
    pub source_storage_type: String,
    pub target_storage_type: String,
}

/// Wrapper returned by the block-lifecycle bridge calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusResponse {
    pub error: String,
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
}

// ─── Key-Value Databases ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvConnectionRequest {
    pub driver: String,
    pub dir: String,
    pub name: String,
    pub id: String,
}

/// Requests naming only a connection (`Close`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvIdRequest {
    pub id: String,
}

/// `Get`, `Has` and `Delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvKeyRequest {
    pub id: String,
    #[serde(default, with = "serde_base64")]
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvSetRequest {
    pub id: String,
    #[serde(default, with = "serde_base64")]
    pub key: Vec<u8>,
    #[serde(default, with = "serde_base64")]
    pub value: Vec<u8>,
}

/// Keys in `[start, end)`; an empty bound is open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvIteratorRequest {
    pub id: String,
    #[serde(default, with = "serde_base64")]
    pub start: Vec<u8>,
    #[serde(default, with = "serde_base64")]
    pub end: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvResponse {
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvGetResponse {
    pub error: String,
    #[serde(with = "serde_base64")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvHasResponse {
    pub error: String,
    pub found: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvIteratorResponse {
    pub error: String,
    #[serde(with = "serde_base64_vec")]
    pub keys: Vec<Vec<u8>>,
    #[serde(with = "serde_base64_vec")]
    pub values: Vec<Vec<u8>>,
}
