//! The privileged `wasmxcore` namespace.
//!
//! Installed only for contracts holding a core role; everyone else gets
//! stand-ins that fail on call.

use std::str::FromStr;

use tracing::{debug, info};

use wasmx_storage::prefix::PrefixStore;
use wasmx_storage::traits::KvStore;
use wasmx_types::constants::ENTRY_POINT_TIMED;
use wasmx_types::deps::StorageClassification;
use wasmx_types::primitives::{cleanup_address, Address};
use wasmx_types::wire::{
    CallRequestJson, CallResponseJson, CancelTimeoutRequest, GrpcRequest, GrpcResponse,
    MigrateContractStateRequest, ReadFromBackgroundProcessRequest,
    ReadFromBackgroundProcessResponse, StartBackgroundProcessRequest, StartTimeoutRequest,
    WriteToBackgroundProcessRequest, WriteToBackgroundProcessResponse,
};

use super::{HostCall, HostFnSpec};
use crate::background::ScheduledTimeout;
use crate::context::Session;
use crate::error::VmError;
use crate::router;
use crate::value::{HostOutcome, HostVal, Kind};

const P: Kind = Kind::Ptr;

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("setContractInfo", &[P, P], &[], set_contract_info),
    HostFnSpec::new("migrateContractStateByStorageType", &[P], &[], migrate_contract_state),
    HostFnSpec::new("externalCall", &[P], &[P], external_call),
    HostFnSpec::new("grpcRequest", &[P], &[P], grpc_request),
    HostFnSpec::new("startTimeout", &[P], &[], start_timeout),
    HostFnSpec::new("cancelTimeout", &[P], &[], cancel_timeout),
    HostFnSpec::new("startBackgroundProcess", &[P], &[], start_background_process),
    HostFnSpec::new("writeToBackgroundProcess", &[P], &[P], write_to_background_process),
    HostFnSpec::new("readFromBackgroundProcess", &[P], &[P], read_from_background_process),
];

/// Address from its string form, falling back to a role lookup.
pub(crate) fn address_or_role(session: &Session, value: &str) -> Result<Address, VmError> {
    if let Ok((_, address)) = session.codec().string_to_bytes_any_prefix(value) {
        return Ok(address);
    }
    session
        .chain()
        .address_by_role(value)?
        .ok_or_else(|| VmError::ContractError {
            reason: format!("{value} is neither an address nor a registered role"),
        })
}

fn set_contract_info(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&call.read(args[0])?);
    let info = call.read(args[1])?;
    serde_json::from_slice::<serde_json::Value>(&info).map_err(|_| VmError::ContractError {
        reason: "contract info cannot be unmarshalled".to_string(),
    })?;
    call.session().chain().set_contract_info(&address, &info)?;
    Ok(HostOutcome::none())
}

fn storage_class(value: &str) -> Result<StorageClassification, VmError> {
    StorageClassification::from_str(value).map_err(VmError::from)
}

/// Move every key of a contract from one storage class to another.
fn migrate_contract_state(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: MigrateContractStateRequest = call.read_json(args[0])?;
    let session = call.session();
    let address = session.codec().string_to_bytes(&request.contract_address)?;
    let source_class = storage_class(&request.source_storage_type)?;
    let target_class = storage_class(&request.target_storage_type)?;
    if source_class == target_class {
        return Ok(HostOutcome::none());
    }

    let source = PrefixStore::for_contract(session.state_view(), source_class, &address);
    let target = PrefixStore::for_contract(session.state_view(), target_class, &address);
    let pairs = source.range(None, None, false)?;
    call.charge(call.session().config().gas.byte_write * pairs.len() as u64)?;
    for (key, value) in &pairs {
        target.put(key, value)?;
        source.delete(key)?;
    }
    debug!(
        contract = %hex::encode(address),
        keys = pairs.len(),
        from = %source_class,
        to = %target_class,
        "migrated contract state"
    );
    Ok(HostOutcome::none())
}

fn external_call(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: CallRequestJson = call.read_json(args[0])?;
    let from = if request.from == Address::default() {
        call.env().contract.address
    } else {
        request.from
    };
    let response = router::call_with_funds(call.state_mut(), request.into_request(from))?;
    call.state_mut().effects.return_data = response.data.clone();
    call.ret_json(&CallResponseJson::from(response))
}

fn grpc_request(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: GrpcRequest = call.read_json(args[0])?;
    let contract = cleanup_address(&request.contract);
    let sender = call.env().contract.address;
    let result = call
        .session()
        .chain()
        .grpc_send(&sender, &request.ip_address, &contract, &request.data);
    let response = match result {
        Ok((events, data)) => {
            let max_events = call.session().config().max_events;
            call.state_mut().effects.push_events(events, max_events)?;
            GrpcResponse {
                data,
                error: String::new(),
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => GrpcResponse {
            data: Vec::new(),
            error: err.to_string(),
        },
    };
    call.ret_json(&response)
}

fn start_timeout(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: StartTimeoutRequest = call.read_json(args[0])?;
    let session = call.session();
    let contract = address_or_role(session, &request.contract)?;
    let delay_ns = u64::try_from(request.delay).unwrap_or(0).saturating_mul(1_000_000);
    let timeout = ScheduledTimeout {
        id: request.id,
        owner: session.env.contract.address,
        contract,
        due_ns: session.env.block.timestamp_ns.saturating_add(delay_ns),
        args: request.args,
    };
    info!(
        id = %timeout.id,
        contract = %hex::encode(contract),
        due_ns = timeout.due_ns,
        entry_point = ENTRY_POINT_TIMED,
        "timeout scheduled"
    );
    session.engine.timeouts.schedule(timeout)?;
    Ok(HostOutcome::none())
}

fn cancel_timeout(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let request: CancelTimeoutRequest = call.read_json(args[0])?;
    let session = call.session();
    let owner = session.env.contract.address;
    if !session.engine.timeouts.cancel(&owner, &request.id)? {
        debug!(id = %request.id, "no pending timeout to cancel");
    }
    Ok(HostOutcome::none())
}

fn start_background_process(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: StartBackgroundProcessRequest = call.read_json(args[0])?;
    let session = call.session().clone();
    let contract = address_or_role(&session, &request.contract)?;
    session
        .engine
        .start_background(&session, contract, request.args)?;
    Ok(HostOutcome::none())
}

const NO_PROCESS: &str = "process not existent";

fn write_to_background_process(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: WriteToBackgroundProcessRequest = call.read_json(args[0])?;
    let session = call.session();
    let contract = address_or_role(session, &request.contract)?;
    let written = session
        .engine
        .background
        .write(&contract, &request.ptr_func, &request.data);
    let error = match written {
        Ok(Some(())) => String::new(),
        Ok(None) => NO_PROCESS.to_string(),
        Err(err) => err.to_string(),
    };
    call.ret_json(&WriteToBackgroundProcessResponse { error })
}

fn read_from_background_process(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request: ReadFromBackgroundProcessRequest = call.read_json(args[0])?;
    let session = call.session();
    let contract = address_or_role(session, &request.contract)?;
    let read = session
        .engine
        .background
        .read(&contract, &request.ptr_func, &request.len_func);
    let response = match read {
        Ok(Some(data)) => ReadFromBackgroundProcessResponse {
            error: String::new(),
            data,
        },
        Ok(None) => ReadFromBackgroundProcessResponse {
            error: NO_PROCESS.to_string(),
            data: Vec::new(),
        },
        Err(err) => ReadFromBackgroundProcessResponse {
            error: err.to_string(),
            data: Vec::new(),
        },
    };
    call.ret_json(&response)
}
