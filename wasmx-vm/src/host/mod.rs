//! Host module registry.
//!
//! Every host function is declared once as a [`HostFnSpec`] with a fixed
//! signature. The pointer-width dependent parameters are declared as
//! [`Kind::Ptr`] and resolved against the contract's runtime handler when
//! the module is linked, so the i32 and i64 surfaces share one
//! implementation.

pub mod as_env;
pub mod consensus;
pub mod cw8;
pub mod ewasm;
pub mod kvdb;
pub mod sys;
pub mod wasi;
pub mod wasi_rust;
pub mod wasmx;
pub mod wasmxcore;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use wasmtime::{Caller, Engine, FuncType, Linker, Val};

use wasmx_types::constants::{
    CW_ENV_8, EWASM_ENV_1, MEMORY_ASSEMBLYSCRIPT_1, SYS_ENV_1, WASI_SNAPSHOT_PREVIEW1,
    WASI_UNSTABLE, WASMX_CONSENSUS_JSON_1, WASMX_CONSENSUS_JSON_I64_1, WASMX_ENV_1, WASMX_ENV_2,
    WASMX_ENV_CORE_I32_1, WASMX_ENV_CORE_I64_1, WASMX_ENV_I32_2, WASMX_ENV_I64_2,
    WASMX_KVDB_I32_1, WASMX_KVDB_I64_1, WASMX_WASI_RUST_1,
};
use wasmx_types::env::Env;

use crate::context::{HostState, Session, Termination};
use crate::error::VmError;
use crate::instance::{fuel_error, settle_fuel};
use crate::memory::{to_host_vals, MemoryAccess, RuntimeHandler};
use crate::value::{HostOutcome, HostVal, Kind, PtrWidth};

pub type HostFn = fn(&mut HostCall<'_, '_>, &[HostVal]) -> Result<HostOutcome, VmError>;

/// Declaration of one host function.
pub struct HostFnSpec {
    pub name: &'static str,
    pub params: &'static [Kind],
    pub results: &'static [Kind],
    pub func: HostFn,
}

impl HostFnSpec {
    pub const fn new(
        name: &'static str,
        params: &'static [Kind],
        results: &'static [Kind],
        func: HostFn,
    ) -> Self {
        Self {
            name,
            params,
            results,
            func,
        }
    }

    pub fn func_type(&self, engine: &Engine, width: PtrWidth) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|k| k.val_type(width)),
            self.results.iter().map(|k| k.val_type(width)),
        )
    }
}

/// A host function's view of the calling guest.
pub struct HostCall<'a, 'c> {
    caller: &'a mut Caller<'c, HostState>,
    handler: Arc<dyn RuntimeHandler>,
}

impl<'a, 'c> HostCall<'a, 'c> {
    pub fn state(&self) -> &HostState {
        self.caller.data()
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        self.caller.data_mut()
    }

    pub fn session(&self) -> &Session {
        &self.caller.data().session
    }

    pub fn env(&self) -> &Env {
        &self.caller.data().session.env
    }

    pub fn mem(&mut self) -> &mut dyn MemoryAccess {
        &mut *self.caller
    }

    pub fn handler(&self) -> &dyn RuntimeHandler {
        self.handler.as_ref()
    }

    pub fn charge(&self, amount: u64) -> Result<(), VmError> {
        self.session().gas.charge(amount)
    }

    /// Bytes behind a pointer value of the contract's ABI.
    pub fn read(&mut self, ptr: HostVal) -> Result<Vec<u8>, VmError> {
        self.handler.read_ptr(&mut *self.caller, ptr)
    }

    pub fn read_string(&mut self, ptr: HostVal) -> Result<String, VmError> {
        self.handler.read_string(&mut *self.caller, ptr)
    }

    pub fn read_json<T: DeserializeOwned>(&mut self, ptr: HostVal) -> Result<T, VmError> {
        let bytes = self.read(ptr)?;
        serde_json::from_slice(&bytes).map_err(VmError::from)
    }

    /// Copy `data` into fresh guest memory and return its pointer value.
    pub fn alloc(&mut self, data: &[u8]) -> Result<HostVal, VmError> {
        self.handler.allocate_write(&mut *self.caller, data)
    }

    pub fn ret_bytes(&mut self, data: &[u8]) -> Result<HostOutcome, VmError> {
        Ok(HostOutcome::val(self.alloc(data)?))
    }

    pub fn ret_json<T: Serialize>(&mut self, value: &T) -> Result<HostOutcome, VmError> {
        let bytes = serde_json::to_vec(value)?;
        self.ret_bytes(&bytes)
    }

    /// An integer result in the pointer width of the contract's ABI.
    pub fn ret_ptr_int(&self, value: i32) -> HostOutcome {
        match self.handler.ptr_width() {
            PtrWidth::I32 => HostOutcome::i32(value),
            PtrWidth::I64 => HostOutcome::i64(value as i64),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host function panicked".to_string()
    }
}

fn sync_caller_fuel(caller: &mut Caller<'_, HostState>) -> Result<(), VmError> {
    let now = caller.get_fuel().map_err(fuel_error)?;
    settle_fuel(now, caller.data_mut())
}

fn refuel_caller(caller: &mut Caller<'_, HostState>) -> Result<(), VmError> {
    let remaining = caller.data().session.gas.remaining();
    caller.set_fuel(remaining).map_err(fuel_error)?;
    caller.data_mut().fuel_mark = remaining;
    Ok(())
}

fn invoke(
    caller: &mut Caller<'_, HostState>,
    spec: &'static HostFnSpec,
    params: &[Val],
    results: &mut [Val],
) -> Result<Option<Termination>, VmError> {
    sync_caller_fuel(caller)?;
    let base = caller.data().session.config().gas.host_call;
    caller.data().session.gas.charge(base)?;

    let args = to_host_vals(params)?;
    let handler = caller.data().handler.clone();
    let outcome = {
        let mut call = HostCall {
            caller: &mut *caller,
            handler,
        };
        panic::catch_unwind(AssertUnwindSafe(|| (spec.func)(&mut call, &args))).map_err(
            |payload| VmError::Panic {
                reason: format!("{}: {}", spec.name, panic_message(payload.as_ref())),
            },
        )?
    };
    sync_caller_fuel(caller)?;
    refuel_caller(caller)?;

    match outcome? {
        HostOutcome::Continue(values) => {
            if values.len() != results.len() {
                return Err(VmError::Internal {
                    reason: format!(
                        "{} returned {} values, expected {}",
                        spec.name,
                        values.len(),
                        results.len()
                    ),
                });
            }
            for (slot, value) in results.iter_mut().zip(values) {
                *slot = value.to_val();
            }
            Ok(None)
        }
        HostOutcome::Finish(data) => Ok(Some(Termination::Finish(data))),
        HostOutcome::Revert(data) => Ok(Some(Termination::Revert(data))),
    }
}

fn dispatch(
    caller: &mut Caller<'_, HostState>,
    spec: &'static HostFnSpec,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    match invoke(caller, spec, params, results) {
        Ok(None) => Ok(()),
        Ok(Some(termination)) => {
            caller.data_mut().termination = Some(termination);
            Err(wasmtime::Error::msg("execution terminated"))
        }
        Err(err) => Err(wasmtime::Error::new(err)),
    }
}

fn link_error(import: &str, name: &str, e: wasmtime::Error) -> VmError {
    VmError::Instantiation {
        reason: format!("cannot link {import}.{name}: {e}"),
    }
}

/// Define `specs` under the `import` namespace.
pub fn register_functions(
    linker: &mut Linker<HostState>,
    engine: &Engine,
    import: &str,
    specs: &'static [HostFnSpec],
    width: PtrWidth,
) -> Result<(), VmError> {
    for spec in specs {
        linker
            .func_new(
                import,
                spec.name,
                spec.func_type(engine, width),
                move |mut caller, params, results| dispatch(&mut caller, spec, params, results),
            )
            .map_err(|e| link_error(import, spec.name, e))?;
    }
    Ok(())
}

/// Define stand-ins with the signatures of `specs` that fail on every call.
pub fn register_stand_ins(
    linker: &mut Linker<HostState>,
    engine: &Engine,
    import: &str,
    specs: &'static [HostFnSpec],
    width: PtrWidth,
) -> Result<(), VmError> {
    for spec in specs {
        let reason = format!("{import}.{} requires a core role", spec.name);
        linker
            .func_new(
                import,
                spec.name,
                spec.func_type(engine, width),
                move |_caller, _params, _results| {
                    Err(wasmtime::Error::new(VmError::Unauthorized {
                        reason: reason.clone(),
                    }))
                },
            )
            .map_err(|e| link_error(import, spec.name, e))?;
    }
    Ok(())
}

/// One namespace contributed by a dependency label.
#[derive(Clone, Copy)]
pub struct ModuleBinding {
    pub import: &'static str,
    pub functions: &'static [HostFnSpec],
    /// Linked instead of failing stand-ins when the module is withheld.
    pub mock: Option<&'static [HostFnSpec]>,
}

/// Which contracts receive the real functions of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    /// Only contracts holding a core role.
    CoreRole,
    /// Every contract except deterministic (`CoreConsensus`) ones.
    NonDeterministic,
    /// Non-deterministic contracts holding any role.
    Privileged,
}

/// Host modules installed for one dependency label.
#[derive(Clone)]
pub struct LabelModules {
    pub bindings: Vec<ModuleBinding>,
    pub gate: Gate,
}

impl LabelModules {
    pub fn new(bindings: Vec<ModuleBinding>, gate: Gate) -> Self {
        Self { bindings, gate }
    }

    pub fn open(bindings: Vec<ModuleBinding>) -> Self {
        Self {
            bindings,
            gate: Gate::Open,
        }
    }

    pub fn protected(bindings: Vec<ModuleBinding>) -> Self {
        Self {
            bindings,
            gate: Gate::CoreRole,
        }
    }
}

pub const fn bind(import: &'static str, functions: &'static [HostFnSpec]) -> ModuleBinding {
    ModuleBinding {
        import,
        functions,
        mock: None,
    }
}

/// A binding whose withheld form answers with `mock` instead of failing.
pub const fn bind_with_mock(
    import: &'static str,
    functions: &'static [HostFnSpec],
    mock: &'static [HostFnSpec],
) -> ModuleBinding {
    ModuleBinding {
        import,
        functions,
        mock: Some(mock),
    }
}

/// The label → module table.
pub fn default_modules() -> HashMap<&'static str, LabelModules> {
    let wasmx_core = bind("wasmx", wasmx::CORE_FUNCTIONS);
    let wasmx_ext = bind("wasmx", wasmx::EXTENDED_FUNCTIONS);
    let as_env = bind("env", as_env::FUNCTIONS);
    let core = bind("wasmxcore", wasmxcore::FUNCTIONS);
    let consensus = bind("consensus", consensus::FUNCTIONS);

    let mut table = HashMap::new();
    table.insert(WASMX_ENV_1, LabelModules::open(vec![wasmx_core, as_env]));
    for label in [WASMX_ENV_2, WASMX_ENV_I32_2] {
        table.insert(
            label,
            LabelModules::open(vec![wasmx_core, wasmx_ext, as_env]),
        );
    }
    table.insert(
        WASMX_ENV_I64_2,
        LabelModules::open(vec![wasmx_core, wasmx_ext]),
    );
    table.insert(MEMORY_ASSEMBLYSCRIPT_1, LabelModules::open(vec![as_env]));
    table.insert(WASMX_ENV_CORE_I32_1, LabelModules::protected(vec![core]));
    table.insert(WASMX_ENV_CORE_I64_1, LabelModules::protected(vec![core]));
    table.insert(WASMX_CONSENSUS_JSON_1, LabelModules::protected(vec![consensus]));
    table.insert(
        WASMX_CONSENSUS_JSON_I64_1,
        LabelModules::protected(vec![consensus]),
    );
    table.insert(
        SYS_ENV_1,
        LabelModules {
            bindings: vec![bind("sys", sys::FUNCTIONS)],
            gate: Gate::NonDeterministic,
        },
    );
    table.insert(
        EWASM_ENV_1,
        LabelModules::open(vec![bind("env", ewasm::FUNCTIONS)]),
    );
    table.insert(CW_ENV_8, LabelModules::open(vec![bind("env", cw8::FUNCTIONS)]));
    table.insert(
        WASI_SNAPSHOT_PREVIEW1,
        LabelModules::open(vec![bind(WASI_SNAPSHOT_PREVIEW1, wasi::FUNCTIONS)]),
    );
    table.insert(
        WASI_UNSTABLE,
        LabelModules::open(vec![bind(WASI_UNSTABLE, wasi::FUNCTIONS)]),
    );
    table.insert(
        WASMX_WASI_RUST_1,
        LabelModules::open(vec![bind("wasmx", wasi_rust::FUNCTIONS)]),
    );
    for label in [WASMX_KVDB_I32_1, WASMX_KVDB_I64_1] {
        table.insert(
            label,
            LabelModules::new(
                vec![bind_with_mock("kvdb", kvdb::FUNCTIONS, kvdb::MOCK_FUNCTIONS)],
                Gate::Privileged,
            ),
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_labels_are_protected() {
        let table = default_modules();
        for label in [
            WASMX_ENV_CORE_I32_1,
            WASMX_ENV_CORE_I64_1,
            WASMX_CONSENSUS_JSON_1,
        ] {
            assert_eq!(table[label].gate, Gate::CoreRole, "{label} must be protected");
        }
        assert_eq!(table[SYS_ENV_1].gate, Gate::NonDeterministic);
        assert_eq!(table[WASMX_KVDB_I32_1].gate, Gate::Privileged);
        assert!(table[WASMX_KVDB_I64_1].bindings[0].mock.is_some());
        assert_eq!(table[WASMX_ENV_2].gate, Gate::Open);
        assert_eq!(table[EWASM_ENV_1].gate, Gate::Open);
    }

    #[test]
    fn test_function_names_unique_per_namespace() {
        let table = default_modules();
        for (label, modules) in &table {
            let mut seen = std::collections::HashSet::new();
            for binding in &modules.bindings {
                for spec in binding.functions {
                    assert!(
                        seen.insert((binding.import, spec.name)),
                        "{label}: duplicate {}.{}",
                        binding.import,
                        spec.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_ptr_params_follow_width() {
        let engine = Engine::default();
        let spec = wasmx::CORE_FUNCTIONS
            .iter()
            .find(|s| s.name == "storageStore")
            .unwrap();
        let narrow = spec.func_type(&engine, PtrWidth::I32);
        let wide = spec.func_type(&engine, PtrWidth::I64);
        assert!(narrow.params().all(|t| matches!(t, wasmtime::ValType::I32)));
        assert!(wide.params().all(|t| matches!(t, wasmtime::ValType::I64)));
    }
}
