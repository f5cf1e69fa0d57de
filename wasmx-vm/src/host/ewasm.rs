//! The Ethereum dialect (`ewasm_env_1`), imported as `env`.
//!
//! Pointers are raw i32 offsets with explicit lengths. Words are 32 bytes,
//! big-endian for amounts and left-padded for addresses.

use tracing::debug;

use wasmx_storage::traits::KvStore;
use wasmx_types::constants::DEFAULT_SYS_DEP;
use wasmx_types::primitives::{
    address_to_word, amount_from_be, amount_to_word, cleanup_address, Address, Word,
};
use wasmx_types::wire::{CallCode, CallRequest, CallResponse, Coin, WasmxLog};

use super::wasmx::MAX_LOG_TOPICS;
use super::{HostCall, HostFnSpec};
use crate::chain::InstantiateRequest;
use crate::error::VmError;
use crate::router;
use crate::value::{HostOutcome, HostVal, Kind};

const I32: Kind = Kind::I32;
const I64: Kind = Kind::I64;

/// Log type recorded for `ethereum_log`.
pub const LOG_TYPE_EWASM: &str = "ewasm";

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("ethereum_useGas", &[I64], &[], use_gas),
    HostFnSpec::new("ethereum_getGasLeft", &[], &[I64], get_gas_left),
    HostFnSpec::new("ethereum_storageLoad", &[I32, I32], &[], storage_load),
    HostFnSpec::new("ethereum_storageStore", &[I32, I32], &[], storage_store),
    HostFnSpec::new("ethereum_getBalance", &[I32], &[], get_balance),
    HostFnSpec::new("ethereum_getExternalBalance", &[I32, I32], &[], get_external_balance),
    HostFnSpec::new("ethereum_getAddress", &[I32], &[], get_address),
    HostFnSpec::new("ethereum_getCaller", &[I32], &[], get_caller),
    HostFnSpec::new("ethereum_getCallValue", &[I32], &[], get_call_value),
    HostFnSpec::new("ethereum_getCallDataSize", &[], &[I32], get_call_data_size),
    HostFnSpec::new("ethereum_callDataCopy", &[I32, I32, I32], &[], call_data_copy),
    HostFnSpec::new("ethereum_getReturnDataSize", &[], &[I32], get_return_data_size),
    HostFnSpec::new("ethereum_returnDataCopy", &[I32, I32, I32], &[], return_data_copy),
    HostFnSpec::new("ethereum_getCodeSize", &[], &[I32], get_code_size),
    HostFnSpec::new("ethereum_getExternalCodeSize", &[I32], &[I32], get_external_code_size),
    HostFnSpec::new("ethereum_codeCopy", &[I32, I32, I32], &[], code_copy),
    HostFnSpec::new("ethereum_externalCodeCopy", &[I32, I32, I32, I32], &[], external_code_copy),
    HostFnSpec::new("ethereum_getExternalCodeHash", &[I32, I32], &[], get_external_code_hash),
    HostFnSpec::new("ethereum_getTxGasPrice", &[I32], &[], get_tx_gas_price),
    HostFnSpec::new("ethereum_getTxOrigin", &[I32], &[], get_tx_origin),
    HostFnSpec::new("ethereum_getBlockNumber", &[], &[I64], get_block_number),
    HostFnSpec::new("ethereum_getBlockCoinbase", &[I32], &[], get_block_coinbase),
    HostFnSpec::new("ethereum_getBlockHash", &[I64, I32], &[], get_block_hash),
    HostFnSpec::new("ethereum_getBlockGasLimit", &[], &[I64], get_block_gas_limit),
    HostFnSpec::new("ethereum_getBlockTimestamp", &[], &[I64], get_block_timestamp),
    HostFnSpec::new("ethereum_getBlockDifficulty", &[I32], &[], write_zero_word),
    HostFnSpec::new("ethereum_prevrandao", &[I32], &[], write_zero_word),
    HostFnSpec::new("ethereum_getChainId", &[I32], &[], get_chain_id),
    HostFnSpec::new("ethereum_getBaseFee", &[I32], &[], write_zero_word),
    HostFnSpec::new("ethereum_call", &[I64, I32, I32, I32, I32, I32, I32], &[I32], call),
    HostFnSpec::new("ethereum_callCode", &[I64, I32, I32, I32, I32, I32, I32], &[I32], call_code),
    HostFnSpec::new("ethereum_callDelegate", &[I64, I32, I32, I32, I32, I32], &[I32], call_delegate),
    HostFnSpec::new("ethereum_callStatic", &[I64, I32, I32, I32, I32, I32], &[I32], call_static),
    HostFnSpec::new("ethereum_create", &[I32, I32, I32, I32], &[], create),
    HostFnSpec::new("ethereum_create2", &[I32, I32, I32, I32, I32], &[], create2),
    HostFnSpec::new("ethereum_selfDestruct", &[I32], &[], self_destruct),
    HostFnSpec::new("ethereum_log", &[I32, I32, I32, I32, I32, I32, I32], &[], log),
    HostFnSpec::new("ethereum_finish", &[I32, I32], &[], finish),
    HostFnSpec::new("ethereum_stop", &[], &[], stop),
    HostFnSpec::new("ethereum_revert", &[I32, I32], &[], revert),
    HostFnSpec::new("ethereum_sendCosmosMsg", &[I32, I32], &[I32], send_cosmos_msg),
    HostFnSpec::new("ethereum_sendCosmosQuery", &[I32, I32], &[I32], send_cosmos_query),
    HostFnSpec::new("ethereum_debugPrinti32", &[I32, I32], &[I32], debug_print_i32),
    HostFnSpec::new("ethereum_debugPrinti64", &[I64, I32], &[I64], debug_print_i64),
    HostFnSpec::new("ethereum_debugPrintMemHex", &[I32, I32], &[], debug_print_mem_hex),
];

// ─── Memory Helpers ─────────────────────────────────────────────────────────

fn length(value: HostVal) -> Result<usize, VmError> {
    let len = value.as_i32()?;
    usize::try_from(len).map_err(|_| VmError::memory(format!("negative length {len}")))
}

fn read_mem(call: &mut HostCall<'_, '_>, ptr: HostVal, len: usize) -> Result<Vec<u8>, VmError> {
    let offset = ptr.as_offset()?;
    call.mem().read(offset, len)
}

fn read_word(call: &mut HostCall<'_, '_>, ptr: HostVal) -> Result<Word, VmError> {
    let bytes = read_mem(call, ptr, 32)?;
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    Ok(word)
}

fn read_address(call: &mut HostCall<'_, '_>, ptr: HostVal) -> Result<Address, VmError> {
    Ok(cleanup_address(&read_word(call, ptr)?))
}

fn write_mem(call: &mut HostCall<'_, '_>, ptr: HostVal, data: &[u8]) -> Result<HostOutcome, VmError> {
    let offset = ptr.as_offset()?;
    call.mem().write(offset, data)?;
    Ok(HostOutcome::none())
}

/// `len` bytes of `source` from `start`, zero-filled past its end.
pub fn zero_filled_slice(source: &[u8], start: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if start < source.len() {
        let available = (source.len() - start).min(len);
        out[..available].copy_from_slice(&source[start..start + available]);
    }
    out
}

fn copy_out(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    source: &[u8],
) -> Result<HostOutcome, VmError> {
    let start = length(args[1])?;
    let len = length(args[2])?;
    let data = zero_filled_slice(source, start, len);
    write_mem(call, args[0], &data)
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ─── Gas and Storage ────────────────────────────────────────────────────────

fn use_gas(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let amount = args[0].as_i64()?;
    call.charge(u64::try_from(amount).unwrap_or(0))?;
    Ok(HostOutcome::none())
}

fn get_gas_left(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i64(clamp_i64(call.session().gas.remaining())))
}

fn storage_load(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = read_word(call, args[0])?;
    let value = call.state().storage.get(&key)?.unwrap_or_default();
    call.charge(call.session().config().gas.byte_read * 32)?;
    let value = if value.is_empty() {
        vec![0u8; 32]
    } else {
        value
    };
    write_mem(call, args[1], &value)
}

fn storage_store(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let key = read_word(call, args[0])?;
    let value = read_word(call, args[1])?;
    call.charge(call.session().config().gas.sstore)?;
    call.state().storage.put(&key, &value)?;
    Ok(HostOutcome::none())
}

// ─── Accounts ───────────────────────────────────────────────────────────────

fn balance_word(call: &HostCall<'_, '_>, address: &Address) -> Result<Word, VmError> {
    let session = call.session();
    let balance = session.chain().balance(address, &session.env.chain.denom)?;
    Ok(amount_to_word(balance))
}

fn get_balance(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let address = call.env().contract.address;
    let word = balance_word(call, &address)?;
    write_mem(call, args[0], &word)
}

fn get_external_balance(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let address = read_address(call, args[0])?;
    let word = balance_word(call, &address)?;
    write_mem(call, args[1], &word)
}

fn get_address(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = address_to_word(&call.env().contract.address);
    write_mem(call, args[0], &word)
}

fn get_caller(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = address_to_word(&call.env().current_call.sender);
    write_mem(call, args[0], &word)
}

fn get_tx_origin(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = address_to_word(&call.env().current_call.origin);
    write_mem(call, args[0], &word)
}

fn get_call_value(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = amount_to_word(call.env().current_call.funds);
    write_mem(call, args[0], &word)
}

// ─── Call Data, Return Data and Code ────────────────────────────────────────

fn get_call_data_size(
    call: &mut HostCall<'_, '_>,
    _args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i32(call.env().current_call.call_data.len() as i32))
}

fn call_data_copy(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let source = call.env().current_call.call_data.clone();
    copy_out(call, args, &source)
}

fn get_return_data_size(
    call: &mut HostCall<'_, '_>,
    _args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i32(call.state().effects.return_data.len() as i32))
}

fn return_data_copy(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let source = call.state().effects.return_data.clone();
    copy_out(call, args, &source)
}

fn get_code_size(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i32(call.env().contract.bytecode.len() as i32))
}

/// Copies from the deployment bytecode, so constructors can locate the
/// runtime segment.
fn code_copy(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let source = call.env().contract.bytecode.clone();
    copy_out(call, args, &source)
}

fn get_external_code_size(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let address = read_address(call, args[0])?;
    let size = call.session().chain().code(&address).len();
    Ok(HostOutcome::i32(size as i32))
}

fn external_code_copy(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let address = read_address(call, args[0])?;
    let source = call.session().chain().code(&address);
    copy_out(call, &args[1..], &source)
}

fn get_external_code_hash(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let address = read_address(call, args[0])?;
    let hash = call.session().chain().code_hash(&address);
    write_mem(call, args[1], &hash)
}

// ─── Block Context ──────────────────────────────────────────────────────────

fn get_tx_gas_price(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let price = call
        .env()
        .transaction
        .as_ref()
        .map(|tx| tx.gas_price)
        .unwrap_or_default();
    write_mem(call, args[0], &amount_to_word(price))
}

fn get_block_number(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i64(clamp_i64(call.env().block.height)))
}

fn get_block_coinbase(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let word = address_to_word(&call.env().block.proposer);
    write_mem(call, args[0], &word)
}

fn get_block_hash(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let height = u64::try_from(args[0].as_i64()?).unwrap_or(0);
    let hash = call.session().chain().block_hash(height);
    write_mem(call, args[1], &hash)
}

fn get_block_gas_limit(
    call: &mut HostCall<'_, '_>,
    _args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i64(clamp_i64(call.env().block.gas_limit)))
}

fn get_block_timestamp(
    call: &mut HostCall<'_, '_>,
    _args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i64(clamp_i64(call.env().block.timestamp_secs())))
}

fn write_zero_word(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    write_mem(call, args[0], &[0u8; 32])
}

fn get_chain_id(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let word = amount_to_word(call.env().chain.chain_id as u128);
    write_mem(call, args[0], &word)
}

// ─── Calls ──────────────────────────────────────────────────────────────────

/// Guest-side shape of one call variant after its operands are read.
struct CallArgs {
    gas_limit: u64,
    to: Address,
    value: u128,
    calldata: Vec<u8>,
    ret_ptr: HostVal,
    ret_len: usize,
}

fn read_call_args(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    with_value: bool,
) -> Result<CallArgs, VmError> {
    let gas_limit = u64::try_from(args[0].as_i64()?).unwrap_or(0);
    let to = read_address(call, args[1])?;
    let (value, rest) = if with_value {
        (amount_from_be(&read_word(call, args[2])?), &args[3..])
    } else {
        (0, &args[2..])
    };
    let data_len = length(rest[1])?;
    let calldata = read_mem(call, rest[0], data_len)?;
    Ok(CallArgs {
        gas_limit,
        to,
        value,
        calldata,
        ret_ptr: rest[2],
        ret_len: length(rest[3])?,
    })
}

/// Store the callee's answer and hand the outcome code to the guest.
fn finish_call(
    call: &mut HostCall<'_, '_>,
    ret_ptr: HostVal,
    ret_len: usize,
    response: CallResponse,
) -> Result<HostOutcome, VmError> {
    let bounded = ret_len.min(response.data.len());
    if bounded > 0 {
        write_mem(call, ret_ptr, &response.data[..bounded])?;
    }
    call.state_mut().effects.return_data = response.data;
    Ok(HostOutcome::i32(response.code.as_i32()))
}

/// Operand read failures are reported to the guest as a failed call.
fn with_call_args(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    with_value: bool,
) -> Result<Option<CallArgs>, VmError> {
    match read_call_args(call, args, with_value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            debug!(error = %err, "cannot read call operands");
            Ok(None)
        }
    }
}

fn call(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let Some(parsed) = with_call_args(call, args, true)? else {
        return Ok(HostOutcome::i32(CallCode::Failure.as_i32()));
    };
    let request = CallRequest {
        to: parsed.to,
        from: call.env().contract.address,
        value: parsed.value,
        gas_limit: parsed.gas_limit,
        calldata: parsed.calldata,
        ..Default::default()
    };
    let response = router::call_with_funds(call.state_mut(), request)?;
    finish_call(call, parsed.ret_ptr, parsed.ret_len, response)
}

/// Run the code at `to` against this contract's own storage.
fn call_code(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let Some(parsed) = with_call_args(call, args, true)? else {
        return Ok(HostOutcome::i32(CallCode::Failure.as_i32()));
    };
    let own = call.env().contract.address;
    let request = CallRequest {
        to: own,
        from: own,
        value: parsed.value,
        gas_limit: parsed.gas_limit,
        calldata: parsed.calldata,
        ..Default::default()
    };
    let response = router::route_delegate(call.state_mut(), request, &parsed.to)?;
    finish_call(call, parsed.ret_ptr, parsed.ret_len, response)
}

/// Like `callCode`, keeping the current sender and funds.
fn call_delegate(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let Some(parsed) = with_call_args(call, args, false)? else {
        return Ok(HostOutcome::i32(CallCode::Failure.as_i32()));
    };
    let env = call.env();
    let request = CallRequest {
        to: env.contract.address,
        from: env.current_call.sender,
        value: env.current_call.funds,
        gas_limit: parsed.gas_limit,
        calldata: parsed.calldata,
        ..Default::default()
    };
    let response = router::route_delegate(call.state_mut(), request, &parsed.to)?;
    finish_call(call, parsed.ret_ptr, parsed.ret_len, response)
}

fn call_static(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let Some(parsed) = with_call_args(call, args, false)? else {
        return Ok(HostOutcome::i32(CallCode::Failure.as_i32()));
    };
    let request = CallRequest {
        to: parsed.to,
        from: call.env().contract.address,
        gas_limit: parsed.gas_limit,
        calldata: parsed.calldata,
        is_query: true,
        ..Default::default()
    };
    let response = router::route(call.state_mut(), request)?;
    finish_call(call, parsed.ret_ptr, parsed.ret_len, response)
}

// ─── Deployment ─────────────────────────────────────────────────────────────

/// Deployment data is a 32-byte big-endian code id followed by the
/// constructor arguments.
fn instantiate_from(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    salt: Option<Vec<u8>>,
    result_ptr: HostVal,
) -> Result<HostOutcome, VmError> {
    let value = amount_from_be(&read_word(call, args[0])?);
    let code_id = amount_from_be(&read_word(call, args[1])?);
    let code_id = u64::try_from(code_id)
        .map_err(|_| VmError::ContractError {
            reason: format!("code id {code_id} out of range"),
        })?;
    let args_len = length(args[2])?;
    let args_ptr = HostVal::I32(args[1].as_i32()?.saturating_add(32));
    let constructor_args = read_mem(call, args_ptr, args_len)?;

    let env = call.env();
    let creator = env.contract.address;
    let funds = if value > 0 {
        vec![Coin {
            denom: env.chain.denom.clone(),
            amount: value.to_string(),
        }]
    } else {
        Vec::new()
    };
    let msg = serde_json::to_vec(&serde_json::json!({
        "data": base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &constructor_args,
        ),
    }))?;
    let label = format!("{}_{code_id}", hex::encode(creator));
    let address = call.session().chain().instantiate_code(InstantiateRequest {
        creator,
        code_id,
        msg,
        funds,
        label,
        salt,
    })?;
    write_mem(call, result_ptr, &address_to_word(&address))
}

fn create(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    instantiate_from(call, args, None, args[3])
}

fn create2(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let salt = read_word(call, args[3])?;
    instantiate_from(call, args, Some(salt.to_vec()), args[4])
}

fn self_destruct(_call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::none())
}

// ─── Logs and Termination ───────────────────────────────────────────────────

fn log(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data_len = length(args[1])?;
    let data = read_mem(call, args[0], data_len)?;
    let count = length(args[2])?;
    if count > MAX_LOG_TOPICS {
        return Err(VmError::ContractError {
            reason: format!("log has {count} topics, at most {MAX_LOG_TOPICS}"),
        });
    }
    let mut topics = Vec::with_capacity(count);
    for ptr in &args[3..3 + count] {
        topics.push(read_word(call, *ptr)?);
    }
    let env = call.env();
    let log = WasmxLog {
        contract_address: env.contract.address,
        system_dependency: env
            .contract
            .system_deps
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_SYS_DEP.to_string()),
        log_type: LOG_TYPE_EWASM.to_string(),
        data,
        topics,
    };
    let max_logs = call.session().config().max_logs;
    call.state_mut().effects.push_log(log, max_logs)?;
    Ok(HostOutcome::none())
}

fn read_payload(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<Vec<u8>, VmError> {
    let len = length(args[1])?;
    read_mem(call, args[0], len)
}

fn finish(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = read_payload(call, args)?;
    let effects = &mut call.state_mut().effects;
    effects.finish_data = data.clone();
    effects.return_data = data.clone();
    Ok(HostOutcome::Finish(data))
}

fn stop(_call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::Finish(Vec::new()))
}

fn revert(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let data = read_payload(call, args)?;
    let effects = &mut call.state_mut().effects;
    effects.finish_data = data.clone();
    effects.return_data = data.clone();
    Ok(HostOutcome::Revert(data))
}

// ─── Cosmos Bridge ──────────────────────────────────────────────────────────

fn send_cosmos_msg(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let msg = read_payload(call, args)?;
    let sender = call.env().contract.address;
    match call.session().chain().execute_cosmos_msg(&sender, &msg) {
        Ok((events, data)) => {
            let max_events = call.session().config().max_events;
            let state = call.state_mut();
            state.effects.push_events(events, max_events)?;
            state.effects.return_data = data;
            Ok(HostOutcome::i32(CallCode::Success.as_i32()))
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            debug!(error = %err, "cosmos message failed");
            call.state_mut().effects.return_data = err.to_string().into_bytes();
            Ok(HostOutcome::i32(CallCode::Revert.as_i32()))
        }
    }
}

fn send_cosmos_query(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let request = read_payload(call, args)?;
    match call.session().chain().submit_cosmos_query(&request) {
        Ok(data) => {
            call.state_mut().effects.return_data = data;
            Ok(HostOutcome::i32(CallCode::Success.as_i32()))
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            debug!(error = %err, "cosmos query failed");
            call.state_mut().effects.return_data = err.to_string().into_bytes();
            Ok(HostOutcome::i32(CallCode::Revert.as_i32()))
        }
    }
}

// ─── Debug ──────────────────────────────────────────────────────────────────

fn debug_print_i32(_call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let value = args[0].as_i32()?;
    debug!(value, tag = args[1].as_i32()?, "ewasm debug i32");
    Ok(HostOutcome::i32(value))
}

fn debug_print_i64(_call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let value = args[0].as_i64()?;
    debug!(value, tag = args[1].as_i32()?, "ewasm debug i64");
    Ok(HostOutcome::i64(value))
}

fn debug_print_mem_hex(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let data = read_payload(call, args)?;
    debug!(data = %hex::encode(data), "ewasm debug memory");
    Ok(HostOutcome::none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_filled_slice() {
        assert_eq!(zero_filled_slice(b"abcd", 1, 2), b"bc");
        assert_eq!(zero_filled_slice(b"abcd", 3, 3), vec![b'd', 0, 0]);
        assert_eq!(zero_filled_slice(b"abcd", 9, 2), vec![0, 0]);
        assert!(zero_filled_slice(b"abcd", 0, 0).is_empty());
    }

    #[test]
    fn test_call_signatures() {
        let arity = |name: &str| {
            FUNCTIONS
                .iter()
                .find(|s| s.name == name)
                .map(|s| (s.params.len(), s.results.len()))
        };
        assert_eq!(arity("ethereum_call"), Some((7, 1)));
        assert_eq!(arity("ethereum_callDelegate"), Some((6, 1)));
        assert_eq!(arity("ethereum_log"), Some((7, 0)));
        assert_eq!(arity("ethereum_stop"), Some((0, 0)));
    }
}
