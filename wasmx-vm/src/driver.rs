//! ABI execution drivers.
//!
//! A driver knows how a dialect's entry points are shaped: which export to
//! call, which arguments to marshal in and how to read the result back.
//! Every driver returns the invocation's output bytes; explicit reverts
//! surface as [`VmError::Revert`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, warn};

use wasmx_types::constants::{
    CW_ENV_8, ENTRY_POINT_EXECUTE, ENTRY_POINT_INSTANTIATE, ENTRY_POINT_MAIN, ENTRY_POINT_QUERY,
    ENTRY_POINT_REPLY, EWASM_ENV_1, INTERPRETER_JS, INTERPRETER_PYTHON, ROLE_INTERPRETER_JS,
    ROLE_INTERPRETER_PYTHON, WASI_SNAPSHOT_PREVIEW1, WASI_UNSTABLE, WASMX_WASI_RUST_1,
};
use wasmx_types::deps::SystemDep;
use wasmx_types::primitives::pad_left_32;
use wasmx_types::wire::ChainEvent;

use crate::context::HostState;
use crate::error::VmError;
use crate::instance::LiveInstance;
use crate::memory::MemoryAccess;
use crate::region::{read_region, write_new_region};
use crate::value::HostVal;

/// Runs one entry point on a live instance.
pub trait ExecuteDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError>;
}

/// Export to call for `entry_point`, `None` when the call is a no-op.
fn native_export(live: &mut LiveInstance, entry_point: &str) -> Result<Option<String>, VmError> {
    if live.has_export(entry_point) {
        return Ok(Some(entry_point.to_string()));
    }
    match entry_point {
        ENTRY_POINT_EXECUTE | ENTRY_POINT_QUERY if live.has_export(ENTRY_POINT_MAIN) => {
            Ok(Some(ENTRY_POINT_MAIN.to_string()))
        }
        ENTRY_POINT_INSTANTIATE => Ok(None),
        _ => Err(VmError::MissingExport {
            name: entry_point.to_string(),
        }),
    }
}

/// Exports named after entry points, taking no arguments.
#[derive(Debug, Default)]
pub struct NativeDriver;

impl ExecuteDriver for NativeDriver {
    fn name(&self) -> &'static str {
        "native"
    }

    fn execute(&self, live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError> {
        let Some(export) = native_export(live, entry_point)? else {
            debug!(entry_point, "no instantiate export");
            return Ok(Vec::new());
        };
        live.call(&export, &[])?;
        Ok(live.host().effects.finish_data.clone())
    }
}

/// Native calling convention plus the constructor/runtime code split of
/// modules exporting `evm_bytecode`.
#[derive(Debug, Default)]
pub struct EwasmDriver;

pub const EVM_BYTECODE_EXPORT: &str = "evm_bytecode";

/// Replace the contract bytecode with what `codeCopy` should see: the
/// runtime code, or constructor + runtime + arguments at deployment.
fn set_execution_bytecode(live: &mut LiveInstance, entry_point: &str) -> Result<(), VmError> {
    if !live.has_export(EVM_BYTECODE_EXPORT) {
        return Ok(());
    }
    let values = live.call(EVM_BYTECODE_EXPORT, &[])?;
    let [offset, constructor_len, runtime_len] = values.as_slice() else {
        return Err(VmError::encoding(format!(
            "{EVM_BYTECODE_EXPORT} returned {} values",
            values.len()
        )));
    };
    let offset = offset.as_i32()? as u32 as usize;
    let constructor_len = constructor_len.as_i32()? as u32 as usize;
    let runtime_len = runtime_len.as_i32()? as u32 as usize;

    let bytecode = if entry_point == ENTRY_POINT_INSTANTIATE {
        let mut code = live.read(offset, constructor_len + runtime_len)?;
        code.extend_from_slice(&live.host().session.env.current_call.call_data);
        code
    } else {
        live.read(offset + constructor_len, runtime_len)?
    };
    live.host_mut().session.env.contract.bytecode = bytecode;
    Ok(())
}

impl ExecuteDriver for EwasmDriver {
    fn name(&self) -> &'static str {
        "ewasm"
    }

    fn execute(&self, live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError> {
        set_execution_bytecode(live, entry_point)?;
        NativeDriver.execute(live, entry_point)
    }
}

// ─── CosmWasm ───────────────────────────────────────────────────────────────

const CW_RESULT_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContractResult<T> {
    #[serde(alias = "Ok")]
    Ok(T),
    #[serde(alias = "Err")]
    Error(String),
}

#[derive(Debug, Default, Deserialize)]
struct CwResponse {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
    #[serde(default)]
    attributes: Vec<wasmx_types::wire::EventAttribute>,
    #[serde(default)]
    events: Vec<ChainEvent>,
    #[serde(default)]
    data: Option<String>,
}

fn error_tag(entry_point: &str) -> &'static str {
    match entry_point {
        ENTRY_POINT_INSTANTIATE => "cw_instantiate_error",
        ENTRY_POINT_QUERY => "cw_query_error",
        ENTRY_POINT_REPLY => "cw_reply_error",
        _ => "cw_execute_error",
    }
}

fn decode_binary(data: &str) -> Result<Vec<u8>, VmError> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| VmError::encoding(format!("invalid binary: {e}")))
}

/// `(env, info)` JSON documents in CosmWasm layout.
fn cw_arguments(state: &HostState) -> Result<(Vec<u8>, Vec<u8>), VmError> {
    let env = &state.session.env;
    let codec = state.session.codec();
    let env_json = serde_json::json!({
        "block": {
            "height": env.block.height,
            "time": env.block.timestamp_ns.to_string(),
            "chain_id": env.chain.chain_id_full,
        },
        "transaction": env.transaction.as_ref().map(|t| serde_json::json!({ "index": t.index })),
        "contract": { "address": codec.bytes_to_string(&env.contract.address)? },
    });
    let funds = if env.current_call.funds > 0 {
        serde_json::json!([{
            "denom": env.chain.denom,
            "amount": env.current_call.funds.to_string(),
        }])
    } else {
        serde_json::json!([])
    };
    let info_json = serde_json::json!({
        "sender": codec.bytes_to_string(&env.current_call.sender)?,
        "funds": funds,
    });
    Ok((serde_json::to_vec(&env_json)?, serde_json::to_vec(&info_json)?))
}

/// `instantiate`/`execute` take `(env, info, msg)` regions; `query` and
/// `reply` take `(env, msg)`.
#[derive(Debug, Default)]
pub struct CosmWasmDriver;

impl CosmWasmDriver {
    fn fail(live: &mut LiveInstance, entry_point: &str, message: &str) -> VmError {
        let data = format!("{}: {message}", error_tag(entry_point)).into_bytes();
        live.host_mut().effects.finish_data = data.clone();
        VmError::Revert { data }
    }
}

impl ExecuteDriver for CosmWasmDriver {
    fn name(&self) -> &'static str {
        "cosmwasm"
    }

    fn execute(&self, live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError> {
        if entry_point == ENTRY_POINT_INSTANTIATE && !live.has_export(entry_point) {
            return Ok(Vec::new());
        }
        let (env, info) = cw_arguments(live.host())?;
        let msg = live.host().session.env.current_call.call_data.clone();

        let env_ptr = write_new_region(live, &env)?;
        let msg_ptr = write_new_region(live, &msg)?;
        let two_args = matches!(entry_point, ENTRY_POINT_QUERY | ENTRY_POINT_REPLY);
        let args = if two_args {
            vec![HostVal::I32(env_ptr as i32), HostVal::I32(msg_ptr as i32)]
        } else {
            let info_ptr = write_new_region(live, &info)?;
            vec![
                HostVal::I32(env_ptr as i32),
                HostVal::I32(info_ptr as i32),
                HostVal::I32(msg_ptr as i32),
            ]
        };

        let results = live.call(entry_point, &args)?;
        let result_ptr = results
            .first()
            .copied()
            .ok_or_else(|| VmError::encoding(format!("{entry_point} returned no region")))?
            .as_i32()? as u32;
        let raw = read_region(live, result_ptr, CW_RESULT_LIMIT)?;

        if entry_point == ENTRY_POINT_QUERY {
            let parsed = serde_json::from_slice::<ContractResult<String>>(&raw);
            return match parsed {
                Err(e) => Err(Self::fail(live, entry_point, &format!("invalid result: {e}"))),
                Ok(ContractResult::Ok(binary)) => {
                    let data = match decode_binary(&binary) {
                        Ok(data) => data,
                        Err(e) => return Err(Self::fail(live, entry_point, &e.to_string())),
                    };
                    let effects = &mut live.host_mut().effects;
                    effects.return_data = data.clone();
                    effects.finish_data = data.clone();
                    Ok(data)
                }
                Ok(ContractResult::Error(message)) => Err(Self::fail(live, entry_point, &message)),
            };
        }

        let parsed = serde_json::from_slice::<ContractResult<CwResponse>>(&raw);
        match parsed {
            Err(e) => Err(Self::fail(live, entry_point, &format!("invalid result: {e}"))),
            Ok(ContractResult::Ok(response)) => {
                let data = match response.data.as_deref().map(decode_binary).transpose() {
                    Ok(data) => data.unwrap_or_default(),
                    Err(e) => return Err(Self::fail(live, entry_point, &e.to_string())),
                };
                let mut events = Vec::new();
                if !response.attributes.is_empty() {
                    events.push(ChainEvent {
                        ty: "wasm".to_string(),
                        attributes: response.attributes,
                    });
                }
                events.extend(response.events.into_iter().map(|event| ChainEvent {
                    ty: format!("wasm-{}", event.ty),
                    attributes: event.attributes,
                }));
                let max_events = live.host().session.config().max_events;
                let effects = &mut live.host_mut().effects;
                effects.push_events(events, max_events)?;
                effects.messages.extend(response.messages);
                effects.return_data = data.clone();
                effects.finish_data = data.clone();
                Ok(data)
            }
            Ok(ContractResult::Error(message)) => Err(Self::fail(live, entry_point, &message)),
        }
    }
}

// ─── WASI ───────────────────────────────────────────────────────────────────

/// File a WASI program may write its answer to when it does not set
/// return data through the host.
pub const WASI_RESULT_FILE: &str = "wasmx_result.txt";

const WASI_INSTANTIATE_EXPORT: &str = "main.instantiate";
const WASI_START_EXPORT: &str = "_start";

/// Argument vector, the working directory and configured preopens.
fn prepare_filesystem(state: &mut HostState) {
    let config = state.session.config();
    let args = config.wasi_args.clone();
    let preopens = config.wasi_preopens.clone();

    if state.wasi.args().is_empty() {
        let mut argv = vec![String::new()];
        argv.extend(args);
        state.wasi.set_args(argv);
    }
    state.wasi.preopen(".");
    for mapping in preopens {
        match mapping.split_once(':') {
            Some((guest, host)) => {
                state.wasi.preopen_host_dir(guest, Path::new(host));
            }
            None => warn!(%mapping, "ignoring preopen without guest:host form"),
        }
    }
}

fn run_wasi(live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError> {
    if entry_point == ENTRY_POINT_INSTANTIATE {
        if !live.has_export(WASI_INSTANTIATE_EXPORT) {
            return Ok(Vec::new());
        }
        live.call(WASI_INSTANTIATE_EXPORT, &[])?;
    } else {
        live.call(WASI_START_EXPORT, &[])?;
    }

    let state = live.host_mut();
    if state.effects.return_data.is_empty() {
        if let Some(result) = state.wasi.read_file(WASI_RESULT_FILE) {
            state.effects.return_data = result.to_vec();
        }
    }
    if state.effects.finish_data.is_empty() {
        state.effects.finish_data = state.effects.return_data.clone();
    }
    Ok(state.effects.finish_data.clone())
}

/// POSIX-style programs: everything runs from `_start`.
#[derive(Debug, Default)]
pub struct WasiDriver;

impl ExecuteDriver for WasiDriver {
    fn name(&self) -> &'static str {
        "wasi"
    }

    fn execute(&self, live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError> {
        prepare_filesystem(live.host_mut());
        run_wasi(live, entry_point)
    }
}

/// Source languages hosted by a WASI interpreter module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
        }
    }

    /// Program that loads the contract source, decodes the JSON call data
    /// from the first argument, calls `function` and hands its answer to the
    /// host through the `wasmx` return-data call.
    pub fn bootstrap(self, function: &str) -> String {
        match self {
            Language::Python => format!(
                r#"import sys
import json
from wasmx import set_returndata
from contract import *

res = b""
if len(sys.argv) > 1 and sys.argv[1] != "":
    res = {function}(json.loads(sys.argv[1]))
else:
    res = {function}()

if isinstance(res, str):
    res = res.encode()
set_returndata(res or b"")
"#
            ),
            Language::JavaScript => format!(
                r#"import * as std from "std";
import * as wasmx from "wasmx";
import * as contract from "./contract.js";

const input = scriptArgs[1] ? std.parseExtJSON(scriptArgs[1]) : undefined;
const res = contract.{function}(input);

wasmx.setReturnData(res || new ArrayBuffer(0));
"#
            ),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Runs interpreted source: the instance is the interpreter module, the
/// contract bytecode is the program text.
#[derive(Debug)]
pub struct InterpreterDriver {
    pub language: Language,
}

impl ExecuteDriver for InterpreterDriver {
    fn name(&self) -> &'static str {
        match self.language {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    fn execute(&self, live: &mut LiveInstance, entry_point: &str) -> Result<Vec<u8>, VmError> {
        let function = match entry_point {
            ENTRY_POINT_EXECUTE | ENTRY_POINT_QUERY => ENTRY_POINT_MAIN,
            other => other,
        };
        if !is_identifier(function) {
            return Err(VmError::ContractError {
                reason: format!("invalid entry point {function}"),
            });
        }
        let ext = self.language.extension();
        let main = format!("main.{ext}");
        let state = live.host_mut();
        prepare_filesystem(state);
        let source = state.session.env.contract.bytecode.clone();
        let call_data = String::from_utf8_lossy(&state.session.env.current_call.call_data).into_owned();
        state.wasi.write_file(&format!("contract.{ext}"), source);
        state
            .wasi
            .write_file(&main, self.language.bootstrap(function).into_bytes());
        state.wasi.set_args(vec![String::new(), main, call_data]);
        run_wasi(live, ENTRY_POINT_EXECUTE)
    }
}

/// Call data of bytecode interpreters: the program and the call data, each
/// preceded by its length as a 32-byte big-endian word. At deployment the
/// call data is also appended to the program.
pub fn frame_interpreted_call(bytecode: &mut Vec<u8>, call_data: &mut Vec<u8>, entry_point: &str) {
    if entry_point == ENTRY_POINT_INSTANTIATE {
        bytecode.extend_from_slice(call_data);
    }
    let mut framed = Vec::with_capacity(64 + bytecode.len() + call_data.len());
    framed.extend_from_slice(&pad_left_32(&(bytecode.len() as u64).to_be_bytes()));
    framed.extend_from_slice(bytecode);
    framed.extend_from_slice(&pad_left_32(&(call_data.len() as u64).to_be_bytes()));
    framed.extend_from_slice(call_data);
    *call_data = framed;
}

// ─── Selection ──────────────────────────────────────────────────────────────

/// Driver table keyed by dependency label and role.
pub fn default_drivers() -> HashMap<&'static str, Arc<dyn ExecuteDriver>> {
    let ewasm: Arc<dyn ExecuteDriver> = Arc::new(EwasmDriver);
    let cosmwasm: Arc<dyn ExecuteDriver> = Arc::new(CosmWasmDriver);
    let wasi: Arc<dyn ExecuteDriver> = Arc::new(WasiDriver);
    let python: Arc<dyn ExecuteDriver> = Arc::new(InterpreterDriver {
        language: Language::Python,
    });
    let javascript: Arc<dyn ExecuteDriver> = Arc::new(InterpreterDriver {
        language: Language::JavaScript,
    });

    HashMap::from([
        (EWASM_ENV_1, ewasm),
        (CW_ENV_8, cosmwasm),
        (WASI_SNAPSHOT_PREVIEW1, wasi.clone()),
        (WASI_UNSTABLE, wasi.clone()),
        (WASMX_WASI_RUST_1, wasi),
        (INTERPRETER_PYTHON, python.clone()),
        (ROLE_INTERPRETER_PYTHON, python),
        (INTERPRETER_JS, javascript.clone()),
        (ROLE_INTERPRETER_JS, javascript),
    ])
}

fn find_driver(
    drivers: &HashMap<&'static str, Arc<dyn ExecuteDriver>>,
    deps: &[SystemDep],
) -> Option<Arc<dyn ExecuteDriver>> {
    for dep in deps {
        let found = drivers
            .get(dep.label.as_str())
            .or_else(|| drivers.get(dep.role.as_str()));
        if let Some(driver) = found {
            return Some(driver.clone());
        }
    }
    deps.iter().find_map(|dep| find_driver(drivers, &dep.deps))
}

/// Label first, then role, then nested dependencies; native otherwise.
pub fn select_driver(
    drivers: &HashMap<&'static str, Arc<dyn ExecuteDriver>>,
    deps: &[SystemDep],
) -> Arc<dyn ExecuteDriver> {
    find_driver(drivers, deps).unwrap_or_else(|| Arc::new(NativeDriver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmx_types::constants::{MEMORY_ASSEMBLYSCRIPT_1, WASMX_ENV_2};

    #[test]
    fn test_driver_selection() {
        let drivers = default_drivers();
        let pick = |deps: Vec<SystemDep>| select_driver(&drivers, &deps).name();
        assert_eq!(pick(vec![SystemDep::new(EWASM_ENV_1)]), "ewasm");
        assert_eq!(pick(vec![SystemDep::new(CW_ENV_8)]), "cosmwasm");
        assert_eq!(
            pick(vec![
                SystemDep::new(WASMX_ENV_2),
                SystemDep::new(MEMORY_ASSEMBLYSCRIPT_1)
            ]),
            "native"
        );
        let python = SystemDep::new(INTERPRETER_PYTHON)
            .with_role(ROLE_INTERPRETER_PYTHON)
            .with_deps(vec![SystemDep::new(WASI_SNAPSHOT_PREVIEW1)]);
        assert_eq!(pick(vec![python]), "python");
        let nested = SystemDep::new("custom").with_deps(vec![SystemDep::new(WASI_UNSTABLE)]);
        assert_eq!(pick(vec![nested]), "wasi");
        let by_role = SystemDep::new("quickjs_1").with_role(ROLE_INTERPRETER_JS);
        assert_eq!(pick(vec![by_role]), "javascript");
    }

    #[test]
    fn test_error_tags() {
        assert_eq!(error_tag(ENTRY_POINT_EXECUTE), "cw_execute_error");
        assert_eq!(error_tag(ENTRY_POINT_INSTANTIATE), "cw_instantiate_error");
        assert_eq!(error_tag(ENTRY_POINT_QUERY), "cw_query_error");
        assert_eq!(error_tag(ENTRY_POINT_REPLY), "cw_reply_error");
    }

    #[test]
    fn test_contract_result_accepts_both_casings() {
        let ok: ContractResult<CwResponse> =
            serde_json::from_str(r#"{"ok":{"messages":[],"data":"aGk="}}"#).unwrap();
        assert!(matches!(ok, ContractResult::Ok(CwResponse { data: Some(_), .. })));
        let err: ContractResult<CwResponse> = serde_json::from_str(r#"{"Err":"boom"}"#).unwrap();
        assert!(matches!(err, ContractResult::Error(m) if m == "boom"));
    }

    #[test]
    fn test_frame_interpreted_call() {
        let mut code = vec![0x60, 0x00];
        let mut data = vec![0xaa];
        frame_interpreted_call(&mut code, &mut data, ENTRY_POINT_EXECUTE);
        assert_eq!(data.len(), 32 + 2 + 32 + 1);
        assert_eq!(data[31], 2);
        assert_eq!(&data[32..34], &[0x60, 0x00]);
        assert_eq!(data[34 + 31], 1);
        assert_eq!(data[66], 0xaa);

        let mut code = vec![0x60];
        let mut data = vec![0x01, 0x02];
        frame_interpreted_call(&mut code, &mut data, ENTRY_POINT_INSTANTIATE);
        assert_eq!(code, vec![0x60, 0x01, 0x02]);
        assert_eq!(data[31], 3);
    }

    #[test]
    fn test_bootstrap_templates() {
        let py = Language::Python.bootstrap("main");
        assert!(py.contains("from contract import *"));
        assert!(py.contains("res = main(json.loads(sys.argv[1]))"));
        assert!(py.contains("from wasmx import set_returndata"));
        assert!(py.contains("set_returndata(res or b\"\")"));
        assert!(!py.contains(WASI_RESULT_FILE));
        let js = Language::JavaScript.bootstrap("instantiate");
        assert!(js.contains("import * as wasmx from \"wasmx\";"));
        assert!(js.contains("contract.instantiate(input)"));
        assert!(js.contains("wasmx.setReturnData(res || new ArrayBuffer(0));"));
        assert!(!js.contains(WASI_RESULT_FILE));
        assert!(is_identifier("main"));
        assert!(!is_identifier("main(); os.system"));
    }
}
