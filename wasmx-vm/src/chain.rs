//! Collaborators supplied by the surrounding ledger application.

use wasmx_types::codec::AddressCodec;
use wasmx_types::deps::ContractDependency;
use wasmx_types::primitives::{Address, Amount, Hash};
use wasmx_types::wire::{ChainEvent, Coin, DeployRequest};

use crate::error::VmError;

/// Instantiation of stored code on behalf of a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstantiateRequest {
    pub creator: Address,
    pub code_id: u64,
    pub msg: Vec<u8>,
    pub funds: Vec<Coin>,
    pub label: String,
    /// Present for deterministic addresses.
    pub salt: Option<Vec<u8>>,
}

/// Ledger services the execution core consumes.
///
/// Implementations own accounts, code storage and the cosmos message router.
pub trait ChainHandler: Send + Sync {
    fn address_codec(&self) -> &dyn AddressCodec;

    /// Descriptor of the contract at `address`; `None` for plain accounts.
    fn contract_dependency(&self, address: &Address)
        -> Result<Option<ContractDependency>, VmError>;

    /// Whether `caller` may call reserved system addresses.
    fn can_call_system_contract(&self, caller: &Address) -> bool;

    fn balance(&self, address: &Address, denom: &str) -> Result<Amount, VmError>;

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), VmError>;

    fn block_hash(&self, height: u64) -> Hash;

    fn code_hash(&self, address: &Address) -> Hash;

    fn code(&self, address: &Address) -> Vec<u8>;

    fn address_by_role(&self, role: &str) -> Result<Option<Address>, VmError>;

    /// Role of `address`, empty when it has none.
    fn role_by_address(&self, address: &Address) -> String;

    /// Instantiate stored code, returning the new contract address.
    fn instantiate_code(&self, request: InstantiateRequest) -> Result<Address, VmError>;

    /// Deploy raw bytecode, returning the new contract address.
    fn deploy(&self, request: DeployRequest) -> Result<Address, VmError>;

    /// Execute an encoded cosmos message sent by `sender`.
    fn execute_cosmos_msg(
        &self,
        sender: &Address,
        msg: &[u8],
    ) -> Result<(Vec<ChainEvent>, Vec<u8>), VmError>;

    fn submit_cosmos_query(&self, request: &[u8]) -> Result<Vec<u8>, VmError>;

    fn decode_cosmos_tx(&self, tx: &[u8]) -> Result<Vec<u8>, VmError>;

    fn verify_cosmos_tx(&self, tx: &[u8]) -> Result<bool, VmError>;

    /// Answer a CosmWasm `QueryRequest` issued by `caller`.
    fn cw_query(&self, caller: &Address, request: &[u8]) -> Result<Vec<u8>, VmError>;

    /// Replace the stored info of a contract with the given JSON record.
    fn set_contract_info(&self, address: &Address, info: &[u8]) -> Result<(), VmError>;

    /// Relay `data` to `contract` on the node at `ip_address`, returning the
    /// emitted events and the peer's answer.
    fn grpc_send(
        &self,
        sender: &Address,
        ip_address: &str,
        contract: &Address,
        data: &[u8],
    ) -> Result<(Vec<ChainEvent>, Vec<u8>), VmError> {
        let _ = (sender, contract, data);
        Err(VmError::chain(format!("no grpc relay for {ip_address}")))
    }
}

/// Block-lifecycle bridge methods reachable from the `consensus` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusMethod {
    CheckTx,
    PrepareProposal,
    ProcessProposal,
    OptimisticExecution,
    FinalizeBlock,
    BeginBlock,
    EndBlock,
    Commit,
    RollbackToVersion,
    HeaderHash,
    ValidatorsHash,
    ConsensusParamsHash,
    BlockCommitVoteBytes,
}

impl ConsensusMethod {
    pub fn name(self) -> &'static str {
        match self {
            ConsensusMethod::CheckTx => "CheckTx",
            ConsensusMethod::PrepareProposal => "PrepareProposal",
            ConsensusMethod::ProcessProposal => "ProcessProposal",
            ConsensusMethod::OptimisticExecution => "OptimisticExecution",
            ConsensusMethod::FinalizeBlock => "FinalizeBlock",
            ConsensusMethod::BeginBlock => "BeginBlock",
            ConsensusMethod::EndBlock => "EndBlock",
            ConsensusMethod::Commit => "Commit",
            ConsensusMethod::RollbackToVersion => "RollbackToVersion",
            ConsensusMethod::HeaderHash => "HeaderHash",
            ConsensusMethod::ValidatorsHash => "ValidatorsHash",
            ConsensusMethod::ConsensusParamsHash => "ConsensusParamsHash",
            ConsensusMethod::BlockCommitVoteBytes => "BlockCommitVoteBytes",
        }
    }

    /// Block-lifecycle calls answer with a `{error, data}` wrapper.
    pub fn wraps_response(self) -> bool {
        !matches!(
            self,
            ConsensusMethod::CheckTx
                | ConsensusMethod::HeaderHash
                | ConsensusMethod::ValidatorsHash
                | ConsensusMethod::ConsensusParamsHash
                | ConsensusMethod::BlockCommitVoteBytes
        )
    }
}

/// The consensus-driving application a guest may steer.
pub trait ConsensusApplication: Send + Sync {
    /// Handle one JSON request, returning the JSON response.
    fn handle(&self, method: ConsensusMethod, request: &[u8]) -> Result<Vec<u8>, VmError>;
}

/// Natively implemented contracts.
pub trait NativePrecompiles: Send + Sync {
    fn is_precompile(&self, address: &Address) -> bool;

    fn execute(&self, address: &Address, input: &[u8]) -> Result<Vec<u8>, VmError>;
}

/// No native contracts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrecompiles;

impl NativePrecompiles for NoPrecompiles {
    fn is_precompile(&self, _address: &Address) -> bool {
        false
    }

    fn execute(&self, address: &Address, _input: &[u8]) -> Result<Vec<u8>, VmError> {
        Err(VmError::chain(format!(
            "no precompile at 0x{}",
            hex::encode(address)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wrapping() {
        assert!(ConsensusMethod::FinalizeBlock.wraps_response());
        assert!(ConsensusMethod::Commit.wraps_response());
        assert!(!ConsensusMethod::HeaderHash.wraps_response());
        assert_eq!(ConsensusMethod::RollbackToVersion.name(), "RollbackToVersion");
    }

    #[test]
    fn test_no_precompiles() {
        let native = NoPrecompiles;
        assert!(!native.is_precompile(&[1u8; 20]));
        assert!(native.execute(&[1u8; 20], b"").is_err());
    }
}
