//! The `consensus` namespace: block-lifecycle calls forwarded to the
//! [`ConsensusApplication`](crate::chain::ConsensusApplication) so a
//! consensus engine can itself run as a guest.

use tracing::error;

use wasmx_types::wire::ConsensusResponse;

use super::{HostCall, HostFnSpec};
use crate::chain::ConsensusMethod;
use crate::error::VmError;
use crate::value::{HostOutcome, HostVal, Kind};

const P: Kind = Kind::Ptr;

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("CheckTx", &[P], &[P], check_tx),
    HostFnSpec::new("PrepareProposal", &[P], &[P], prepare_proposal),
    HostFnSpec::new("ProcessProposal", &[P], &[P], process_proposal),
    HostFnSpec::new("OptimisticExecution", &[P, P], &[P], optimistic_execution),
    HostFnSpec::new("FinalizeBlock", &[P], &[P], finalize_block),
    HostFnSpec::new("BeginBlock", &[P], &[P], begin_block),
    HostFnSpec::new("EndBlock", &[P], &[P], end_block),
    HostFnSpec::new("Commit", &[], &[P], commit),
    HostFnSpec::new("RollbackToVersion", &[Kind::I64], &[P], rollback_to_version),
    HostFnSpec::new("HeaderHash", &[P], &[P], header_hash),
    HostFnSpec::new("ValidatorsHash", &[P], &[P], validators_hash),
    HostFnSpec::new("ConsensusParamsHash", &[P], &[P], consensus_params_hash),
    HostFnSpec::new("BlockCommitVoteBytes", &[P], &[P], block_commit_vote_bytes),
];

/// Send `request` to the application and hand the answer back to the guest.
fn forward(
    call: &mut HostCall<'_, '_>,
    method: ConsensusMethod,
    request: &[u8],
) -> Result<HostOutcome, VmError> {
    let app = call
        .session()
        .collab
        .app
        .clone()
        .ok_or_else(|| VmError::chain("no consensus application attached"))?;
    let result = app.handle(method, request);
    if !method.wraps_response() {
        let data = result.inspect_err(|e| error!(consensus = method.name(), error = %e))?;
        return call.ret_bytes(&data);
    }
    let response = match result {
        Ok(data) => ConsensusResponse {
            error: String::new(),
            data,
        },
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            error!(consensus = method.name(), error = %err);
            ConsensusResponse {
                error: err.to_string(),
                data: Vec::new(),
            }
        }
    };
    call.ret_json(&response)
}

fn forward_arg(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    method: ConsensusMethod,
) -> Result<HostOutcome, VmError> {
    let request = call.read(args[0])?;
    forward(call, method, &request)
}

fn check_tx(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::CheckTx)
}

fn prepare_proposal(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::PrepareProposal)
}

fn process_proposal(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::ProcessProposal)
}

/// The proposal request and its processing result travel together as
/// `{"request": .., "response": ..}`.
fn optimistic_execution(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: serde_json::Value = call.read_json(args[0])?;
    let response: serde_json::Value = call.read_json(args[1])?;
    let combined = serde_json::to_vec(&serde_json::json!({
        "request": request,
        "response": response,
    }))?;
    forward(call, ConsensusMethod::OptimisticExecution, &combined)
}

fn finalize_block(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::FinalizeBlock)
}

fn begin_block(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::BeginBlock)
}

fn end_block(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::EndBlock)
}

fn commit(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward(call, ConsensusMethod::Commit, b"{}")
}

fn rollback_to_version(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let height = args[0].as_i64()?;
    let request = serde_json::to_vec(&height)?;
    forward(call, ConsensusMethod::RollbackToVersion, &request)
}

fn header_hash(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::HeaderHash)
}

fn validators_hash(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::ValidatorsHash)
}

fn consensus_params_hash(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::ConsensusParamsHash)
}

fn block_commit_vote_bytes(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    forward_arg(call, args, ConsensusMethod::BlockCommitVoteBytes)
}
