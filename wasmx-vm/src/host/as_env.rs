//! AssemblyScript `env` imports installed next to the native i32 surface.

use tracing::{debug, error, info};

use wasmx_crypto::hash::sha256_multi;

use super::{HostCall, HostFnSpec};
use crate::error::VmError;
use crate::value::{HostOutcome, HostVal, Kind};

const P: Kind = Kind::Ptr;

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("abort", &[P, P, Kind::I32, Kind::I32], &[], abort),
    HostFnSpec::new("console.log", &[P], &[], console_log),
    HostFnSpec::new("console.info", &[P], &[], console_info),
    HostFnSpec::new("console.error", &[P], &[], console_error),
    HostFnSpec::new("console.debug", &[P], &[], console_debug),
    HostFnSpec::new("Date.now", &[], &[Kind::F64], date_now),
    HostFnSpec::new("seed", &[], &[Kind::F64], seed),
];

fn abort(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = call.read_string(args[0])?;
    let file = call.read_string(args[1])?;
    let (line, column) = (args[2].as_i32()?, args[3].as_i32()?);
    info!(
        contract = %hex::encode(call.env().contract.address),
        "wasmx_env_1: ABORT: {message}, {file}. line: {line}, column: {column}"
    );
    let data = message.into_bytes();
    let effects = &mut call.state_mut().effects;
    effects.finish_data = data.clone();
    effects.return_data = data.clone();
    Ok(HostOutcome::Revert(data))
}

fn console_message(call: &mut HostCall<'_, '_>, ptr: HostVal) -> String {
    call.read_string(ptr)
        .unwrap_or_else(|e| format!("unreadable message: {e}"))
}

fn console_log(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = console_message(call, args[0]);
    info!(contract = %hex::encode(call.env().contract.address), "console.log: {message}");
    Ok(HostOutcome::none())
}

fn console_info(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = console_message(call, args[0]);
    info!(contract = %hex::encode(call.env().contract.address), "console.info: {message}");
    Ok(HostOutcome::none())
}

fn console_error(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = console_message(call, args[0]);
    error!(contract = %hex::encode(call.env().contract.address), "console.error: {message}");
    Ok(HostOutcome::none())
}

fn console_debug(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let message = console_message(call, args[0]);
    debug!(contract = %hex::encode(call.env().contract.address), "console.debug: {message}");
    Ok(HostOutcome::none())
}

/// Block time in milliseconds.
fn date_now(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let millis = call.env().block.timestamp_ns / 1_000_000;
    Ok(HostOutcome::Continue(vec![HostVal::F64(millis as f64)]))
}

/// Deterministic per block, contract and call.
fn seed(call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let session = call.session();
    let call_index = session
        .call_stack
        .lock()
        .map(|s| s.call_index())
        .unwrap_or(0);
    let digest = sha256_multi(&[
        session.env.block.hash.as_slice(),
        session.env.contract.address.as_slice(),
        call_index.to_be_bytes().as_slice(),
    ]);
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    // 53 bits keep the value exact as an f64.
    let value = u64::from_le_bytes(word) >> 11;
    Ok(HostOutcome::Continue(vec![HostVal::F64(value as f64)]))
}
