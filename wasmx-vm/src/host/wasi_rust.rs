//! The `wasmx` namespace for WASI guests built from Rust.
//!
//! Arguments are raw `(ptr, len)` pairs of i32; byte results come back as a
//! single i64 packing the guest offset in the high half and the length in
//! the low half.

use tracing::{debug, info};

use wasmx_crypto::hash::keccak256;
use wasmx_storage::traits::KvStore;
use wasmx_types::primitives::{amount_to_word, cleanup_address, Address};
use wasmx_types::wire::{
    AccountJson, CallCode, CallRequest, CallResponse, CallResponseJson,
    InstantiateAccountRequest, InstantiateAccountResponse,
};

use super::{HostCall, HostFnSpec};
use crate::chain::InstantiateRequest;
use crate::error::VmError;
use crate::memory::build_ptr_i64;
use crate::router;
use crate::value::{HostOutcome, HostVal, Kind};

const I: Kind = Kind::I32;
const L: Kind = Kind::I64;

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("getEnv", &[], &[L], get_env),
    HostFnSpec::new("getCallData", &[], &[L], get_call_data),
    HostFnSpec::new("getCaller", &[], &[L], get_caller),
    HostFnSpec::new("getAddress", &[], &[L], get_address),
    HostFnSpec::new("storageStore", &[I, I, I, I], &[], storage_store),
    HostFnSpec::new("storageLoad", &[I, I], &[L], storage_load),
    HostFnSpec::new("setFinishData", &[I, I], &[], set_finish_data),
    HostFnSpec::new("setReturnData", &[I, I], &[], set_return_data),
    HostFnSpec::new("setExitCode", &[I, I, I], &[], set_exit_code),
    HostFnSpec::new("callClassic", &[L, I, I, L, I, I], &[L], call_classic),
    HostFnSpec::new("callStatic", &[L, I, I, I, I], &[L], call_static),
    HostFnSpec::new("getBlockHash", &[L], &[L], get_block_hash),
    HostFnSpec::new("getAccount", &[I, I], &[L], get_account),
    HostFnSpec::new("getBalance", &[I, I], &[L], get_balance),
    HostFnSpec::new("getCodeHash", &[I, I], &[L], get_code_hash),
    HostFnSpec::new("getCode", &[I, I], &[L], get_code),
    HostFnSpec::new("keccak256", &[I, I], &[L], keccak256_fn),
    HostFnSpec::new("instantiateAccount", &[I, I], &[L], instantiate_account),
    HostFnSpec::new("instantiateAccount2", &[I, I], &[L], instantiate_account2),
    HostFnSpec::new("sendCosmosMsg", &[I, I], &[L], send_cosmos_msg),
    HostFnSpec::new("sendCosmosQuery", &[I, I], &[L], send_cosmos_query),
    HostFnSpec::new("getGasLeft", &[], &[L], get_gas_left),
    HostFnSpec::new("bech32StringToBytes", &[I, I], &[L], bech32_string_to_bytes),
    HostFnSpec::new("bech32BytesToString", &[I, I], &[L], bech32_bytes_to_string),
    HostFnSpec::new("log", &[I, I], &[], log),
];

fn read_raw(
    call: &mut HostCall<'_, '_>,
    ptr: HostVal,
    len: HostVal,
) -> Result<Vec<u8>, VmError> {
    let ptr = ptr.as_i32()? as u32 as usize;
    let len = len.as_i32()? as u32 as usize;
    call.mem().read(ptr, len)
}

/// Copy `data` into the guest and return the packed `(offset, len)`.
fn ret_packed(call: &mut HostCall<'_, '_>, data: &[u8]) -> Result<HostOutcome, VmError> {
    match call.alloc(data)? {
        HostVal::I32(offset) => Ok(HostOutcome::i64(build_ptr_i64(offset as u32, data.len() as u32))),
        packed => Ok(HostOutcome::val(packed)),
    }
}

fn ret_packed_json<T: serde::Serialize>(
    call: &mut HostCall<'_, '_>,
    value: &T,
) -> Result<HostOutcome, VmError> {
    let bytes = serde_json::to_vec(value)?;
    ret_packed(call, &bytes)
}

// ─── Environment ────────────────────────────────────────────────────────────

fn get_env(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let env = call.env().to_guest_json(call.session().codec())?;
    ret_packed_json(call, &env)
}

fn get_call_data(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = call.env().current_call.call_data.clone();
    ret_packed(call, &data)
}

fn get_caller(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let sender = call.env().current_call.sender;
    ret_packed(call, &sender)
}

fn get_address(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = call.env().contract.address;
    ret_packed(call, &address)
}

fn get_gas_left(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let remaining = call.session().gas.remaining();
    Ok(HostOutcome::i64(i64::try_from(remaining).unwrap_or(i64::MAX)))
}

fn get_block_hash(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let height = u64::try_from(args[0].as_i64()?).unwrap_or(0);
    let hash = call.session().chain().block_hash(height);
    ret_packed(call, &hash)
}

// ─── Storage ────────────────────────────────────────────────────────────────

fn storage_store(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = read_raw(call, args[0], args[1])?;
    let value = read_raw(call, args[2], args[3])?;
    let gas = call.session().config().gas.clone();
    call.charge(gas.sstore + gas.byte_write * value.len() as u64)?;
    call.state().storage.put(&key, &value)?;
    Ok(HostOutcome::none())
}

/// An absent key reads as 32 zero bytes.
fn storage_load(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = read_raw(call, args[0], args[1])?;
    let value = call
        .state()
        .storage
        .get(&key)?
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![0u8; 32]);
    call.charge(call.session().config().gas.byte_read * value.len() as u64)?;
    ret_packed(call, &value)
}

// ─── Result Data ────────────────────────────────────────────────────────────

fn set_finish_data(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = read_raw(call, args[0], args[1])?;
    call.state_mut().effects.finish_data = data;
    Ok(HostOutcome::none())
}

fn set_return_data(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = read_raw(call, args[0], args[1])?;
    call.state_mut().effects.return_data = data;
    Ok(HostOutcome::none())
}

/// A nonzero code reverts with the message as revert data.
fn set_exit_code(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let code = args[0].as_i32()?;
    if code == 0 {
        return Ok(HostOutcome::none());
    }
    let message = read_raw(call, args[1], args[2])?;
    call.state_mut().effects.finish_data = message.clone();
    Ok(HostOutcome::Revert(message))
}

// ─── Calls ──────────────────────────────────────────────────────────────────

fn read_target(
    call: &mut HostCall<'_, '_>,
    ptr: HostVal,
    len: HostVal,
) -> Result<Address, VmError> {
    let raw = read_raw(call, ptr, len)?;
    if let Ok(text) = std::str::from_utf8(&raw) {
        if let Ok((_, address)) = call.session().codec().string_to_bytes_any_prefix(text) {
            return Ok(address);
        }
    }
    Ok(cleanup_address(&raw))
}

fn respond(call: &mut HostCall<'_, '_>, response: CallResponse) -> Result<HostOutcome, VmError> {
    call.state_mut().effects.return_data = response.data.clone();
    ret_packed_json(call, &CallResponseJson::from(response))
}

fn call_classic(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let gas_limit = u64::try_from(args[0].as_i64()?).unwrap_or(0);
    let to = read_target(call, args[1], args[2])?;
    let value = u128::from(args[3].as_i64()? as u64);
    let calldata = read_raw(call, args[4], args[5])?;
    let request = CallRequest {
        to,
        from: call.env().contract.address,
        value,
        gas_limit,
        calldata,
        ..Default::default()
    };
    let response = router::call_with_funds(call.state_mut(), request)?;
    respond(call, response)
}

fn call_static(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let gas_limit = u64::try_from(args[0].as_i64()?).unwrap_or(0);
    let to = read_target(call, args[1], args[2])?;
    let calldata = read_raw(call, args[3], args[4])?;
    let request = CallRequest {
        to,
        from: call.env().contract.address,
        gas_limit,
        calldata,
        is_query: true,
        ..Default::default()
    };
    let response = router::route(call.state_mut(), request)?;
    respond(call, response)
}

// ─── Accounts ───────────────────────────────────────────────────────────────

fn get_account(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = read_target(call, args[0], args[1])?;
    let session = call.session();
    let chain = session.chain();
    let account = AccountJson {
        address: address.to_vec(),
        code_hash: chain.code_hash(&address).to_vec(),
        bytecode: chain.code(&address),
        balance: amount_to_word(chain.balance(&address, &session.env.chain.denom)?).to_vec(),
    };
    ret_packed_json(call, &account)
}

fn get_balance(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = read_target(call, args[0], args[1])?;
    let session = call.session();
    let balance = session.chain().balance(&address, &session.env.chain.denom)?;
    ret_packed(call, &amount_to_word(balance))
}

fn get_code_hash(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = read_target(call, args[0], args[1])?;
    let hash = call.session().chain().code_hash(&address);
    ret_packed(call, &hash)
}

fn get_code(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = read_target(call, args[0], args[1])?;
    let code = call.session().chain().code(&address);
    ret_packed(call, &code)
}

fn keccak256_fn(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = read_raw(call, args[0], args[1])?;
    ret_packed(call, &keccak256(&data))
}

fn instantiate(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    deterministic: bool,
) -> Result<HostOutcome, VmError> {
    let raw = read_raw(call, args[0], args[1])?;
    let request: InstantiateAccountRequest = serde_json::from_slice(&raw)?;
    let session = call.session();
    let address = session.chain().instantiate_code(InstantiateRequest {
        creator: session.env.contract.address,
        code_id: request.code_id,
        msg: request.msg,
        funds: request.funds,
        label: request.label,
        salt: deterministic.then_some(request.salt),
    })?;
    let address = session.codec().bytes_to_string(&address)?;
    ret_packed_json(call, &InstantiateAccountResponse { address })
}

fn instantiate_account(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    instantiate(call, args, false)
}

fn instantiate_account2(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    instantiate(call, args, true)
}

// ─── Cosmos Bridge ──────────────────────────────────────────────────────────

fn send_cosmos_msg(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let msg = read_raw(call, args[0], args[1])?;
    let sender = call.env().contract.address;
    let response = match call.session().chain().execute_cosmos_msg(&sender, &msg) {
        Ok((events, data)) => {
            let max_events = call.session().config().max_events;
            call.state_mut().effects.push_events(events, max_events)?;
            CallResponse::new(CallCode::Success, data)
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            debug!(error = %err, "cosmos message failed");
            CallResponse::new(CallCode::Revert, err.to_string().into_bytes())
        }
    };
    respond(call, response)
}

fn send_cosmos_query(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request = read_raw(call, args[0], args[1])?;
    let response = match call.session().chain().submit_cosmos_query(&request) {
        Ok(data) => CallResponse::new(CallCode::Success, data),
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            debug!(error = %err, "cosmos query failed");
            CallResponse::new(CallCode::Revert, err.to_string().into_bytes())
        }
    };
    respond(call, response)
}

// ─── Addresses and Logging ──────────────────────────────────────────────────

fn bech32_string_to_bytes(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let raw = read_raw(call, args[0], args[1])?;
    let text = String::from_utf8_lossy(&raw).into_owned();
    let (_, address) = call.session().codec().string_to_bytes_any_prefix(&text)?;
    ret_packed(call, &address)
}

fn bech32_bytes_to_string(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let address = cleanup_address(&read_raw(call, args[0], args[1])?);
    let human = call.session().codec().bytes_to_string(&address)?;
    ret_packed(call, human.as_bytes())
}

fn log(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = read_raw(call, args[0], args[1])?;
    let contract = hex::encode(call.env().contract.address);
    info!(%contract, "{}", String::from_utf8_lossy(&message));
    Ok(HostOutcome::none())
}
