//! The execution engine.
//!
//! [`EngineShared`] owns everything that outlives one invocation: the
//! wasmtime engine with fuel metering, compiled modules, the host module,
//! runtime handler and driver tables, the database registry, and the
//! background and timeout registries. Every session holds an `Arc` to it, so nested calls and
//! host functions reach the same tables without globals.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, Module};

use wasmx_crypto::hash::blake3_hash;
use wasmx_storage::branch::BranchStore;
use wasmx_storage::traits::KvStore;
use wasmx_types::constants::{ENTRY_POINT_EXECUTE, ROLE_INTERPRETER};
use wasmx_types::deps::{ContractDependency, SystemDep};
use wasmx_types::env::{ContractInfo, Env};
use wasmx_types::primitives::{Address, Hash};
use wasmx_types::wire::{CallCode, CallRequest, ChainEvent, WasmxLog};

use crate::background::{BackgroundRegistry, ScheduledTimeout, TimeoutRegistry};
use crate::call_stack::{CallFrame, CallStack};
use crate::config::VmConfig;
use crate::context::{Collaborators, Effects, HostState, Session};
use crate::database::DatabaseRegistry;
use crate::driver::{default_drivers, frame_interpreted_call, select_driver, ExecuteDriver};
use crate::error::VmError;
use crate::gas::SharedGasMeter;
use crate::host::{default_modules, LabelModules};
use crate::instance::LiveInstance;
use crate::memory::{default_handlers, RuntimeHandler};
use crate::resolver::{effective_deps, resolve};
use crate::router::{child_session, ContractRouter};

/// Result of one invocation and everything it produced.
#[derive(Debug)]
pub struct Outcome {
    pub result: Result<Vec<u8>, VmError>,
    pub effects: Effects,
}

/// Engine state shared by every session.
pub struct EngineShared {
    pub config: VmConfig,
    pub engine: Engine,
    modules: HashMap<&'static str, LabelModules>,
    handlers: HashMap<&'static str, Arc<dyn RuntimeHandler>>,
    drivers: HashMap<&'static str, Arc<dyn ExecuteDriver>>,
    compiled: Mutex<HashMap<Hash, Module>>,
    pub background: BackgroundRegistry,
    pub timeouts: TimeoutRegistry,
    pub databases: DatabaseRegistry,
}

fn is_interpreter(dep: &SystemDep) -> bool {
    dep.role.starts_with(ROLE_INTERPRETER) || dep.label.starts_with("interpreter_")
}

/// The first interpreter dependency, nested ones included.
fn find_interpreter(deps: &[SystemDep]) -> Option<&SystemDep> {
    deps.iter()
        .find(|dep| is_interpreter(dep))
        .or_else(|| deps.iter().find_map(|dep| find_interpreter(&dep.deps)))
}

fn read_module_file(path: &str) -> Result<Vec<u8>, VmError> {
    std::fs::read(path).map_err(|e| VmError::Instantiation {
        reason: format!("cannot read module {path}: {e}"),
    })
}

/// Module to instantiate and the descriptor its imports resolve against.
struct LoadedCode {
    bytes: Vec<u8>,
    pinned: bool,
    resolve_as: ContractDependency,
}

impl EngineShared {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        Self::with_extensions(config, HashMap::new(), DatabaseRegistry::new())
    }

    /// An engine whose module table also carries `modules`, replacing
    /// built-in entries with the same label, and whose `kvdb` namespace
    /// opens databases through `databases`.
    pub fn with_extensions(
        config: VmConfig,
        modules: HashMap<&'static str, LabelModules>,
        databases: DatabaseRegistry,
    ) -> Result<Self, VmError> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(true);
        let engine = Engine::new(&wasm_config).map_err(|e| VmError::Config {
            reason: format!("failed to create wasmtime engine: {e}"),
        })?;
        let mut table = default_modules();
        table.extend(modules);
        Ok(Self {
            config,
            engine,
            modules: table,
            handlers: default_handlers(),
            drivers: default_drivers(),
            compiled: Mutex::new(HashMap::new()),
            background: BackgroundRegistry::new(),
            timeouts: TimeoutRegistry::new(),
            databases,
        })
    }

    /// Number of modules held in the compilation cache.
    pub fn cached_modules(&self) -> usize {
        self.compiled.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn compile(&self, bytes: &[u8], pinned: bool) -> Result<Module, VmError> {
        let cache = self.config.cache_compiled_modules || pinned;
        let key = blake3_hash(bytes);
        if cache {
            let compiled = self.compiled.lock().map_err(|_| VmError::Internal {
                reason: "module cache lock poisoned".to_string(),
            })?;
            if let Some(module) = compiled.get(&key) {
                return Ok(module.clone());
            }
        }
        let module = Module::new(&self.engine, bytes).map_err(|e| VmError::Instantiation {
            reason: format!("failed to compile wasm module: {e}"),
        })?;
        if cache {
            if let Ok(mut compiled) = self.compiled.lock() {
                compiled.insert(key, module.clone());
            }
        }
        Ok(module)
    }

    fn contract_code(&self, session: &Session, dep: &ContractDependency) -> Result<Vec<u8>, VmError> {
        if !dep.bytecode.is_empty() {
            return Ok(dep.bytecode.clone());
        }
        if !dep.code_file_path.is_empty() {
            return read_module_file(&dep.code_file_path);
        }
        let code = session.chain().code(&dep.address);
        if code.is_empty() {
            return Err(VmError::Instantiation {
                reason: format!("no code for contract 0x{}", hex::encode(dep.address)),
            });
        }
        Ok(code)
    }

    /// The interpreter module and the dependencies it is linked with.
    fn interpreter_code(
        &self,
        session: &Session,
        interpreter: &SystemDep,
    ) -> Result<(Vec<u8>, Vec<SystemDep>), VmError> {
        if !interpreter.file_path.is_empty() {
            return Ok((
                read_module_file(&interpreter.file_path)?,
                interpreter.deps.clone(),
            ));
        }
        let key = if interpreter.role.is_empty() {
            &interpreter.label
        } else {
            &interpreter.role
        };
        let chain = session.chain();
        let address = match chain.address_by_role(key)? {
            Some(address) => Some(address),
            None => chain.address_by_role(&interpreter.label)?,
        };
        let Some(dep) = address
            .map(|a| chain.contract_dependency(&a))
            .transpose()?
            .flatten()
        else {
            return Err(VmError::Instantiation {
                reason: format!("interpreter {} not found", interpreter.label),
            });
        };
        let mut deps = interpreter.deps.clone();
        deps.extend(dep.system_deps.iter().cloned());
        Ok((self.contract_code(session, &dep)?, deps))
    }

    /// Pick the module for `session`. Interpreted contracts run the
    /// interpreter with their source as data; bytecode interpreters also
    /// get the program framed into their call data.
    fn load_code(
        &self,
        session: &mut Session,
        driver: &dyn ExecuteDriver,
        entry_point: &str,
    ) -> Result<LoadedCode, VmError> {
        let deps = effective_deps(&session.contract);
        let Some(interpreter) = find_interpreter(&deps).cloned() else {
            return Ok(LoadedCode {
                bytes: self.contract_code(session, &session.contract)?,
                pinned: session.contract.pinned,
                resolve_as: session.contract.clone(),
            });
        };
        let (bytes, interpreter_deps) = self.interpreter_code(session, &interpreter)?;
        if !matches!(driver.name(), "python" | "javascript") {
            let env = &mut session.env;
            frame_interpreted_call(
                &mut env.contract.bytecode,
                &mut env.current_call.call_data,
                entry_point,
            );
        }
        let mut resolve_as = session.contract.clone();
        resolve_as.system_deps = deps;
        resolve_as.system_deps.extend(interpreter_deps);
        Ok(LoadedCode {
            bytes,
            pinned: true,
            resolve_as,
        })
    }

    /// Instantiate the contract of `session` and pick its driver.
    fn prepare(
        &self,
        mut session: Session,
        router: ContractRouter,
        entry_point: &str,
    ) -> Result<(LiveInstance, Arc<dyn ExecuteDriver>), VmError> {
        let driver = select_driver(&self.drivers, &effective_deps(&session.contract));
        let code = self.load_code(&mut session, driver.as_ref(), entry_point)?;
        let module = self.compile(&code.bytes, code.pinned)?;
        let resolution = resolve(&self.engine, &self.modules, &self.handlers, &code.resolve_as)?;
        debug!(
            contract = %hex::encode(session.env.contract.address),
            driver = driver.name(),
            handler = resolution.handler.label(),
            entry_point,
            "instantiating contract"
        );
        let state = HostState::new(session, router, resolution.handler);
        let live = LiveInstance::instantiate(&self.engine, &resolution.linker, &module, state)?;
        Ok((live, driver))
    }

    /// Run `entry_point` of the contract described by `session`.
    ///
    /// Panics inside the driver are contained and reported as
    /// [`VmError::Panic`]. Effects are returned whatever the result; the
    /// caller decides whether to keep them.
    pub fn run(&self, session: Session, router: ContractRouter, entry_point: &str) -> Outcome {
        let (mut live, driver) = match self.prepare(session, router, entry_point) {
            Ok(prepared) => prepared,
            Err(err) => {
                return Outcome {
                    result: Err(err),
                    effects: Effects::default(),
                }
            }
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| driver.execute(&mut live, entry_point)))
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "driver panicked".to_string());
                Err(VmError::Panic { reason })
            });
        let state = live.into_host_state();
        Outcome {
            result,
            effects: state.effects,
        }
    }

    /// Start `contract` as a long-lived process fed with `args`.
    ///
    /// The process runs over its own snapshot of the caller's state with its
    /// own gas budget; it is reached later only through the background
    /// registry.
    pub fn start_background(
        &self,
        session: &Session,
        contract: Address,
        args: Vec<u8>,
    ) -> Result<(), VmError> {
        let Some(dep) = session.chain().contract_dependency(&contract)? else {
            return Err(VmError::ContractError {
                reason: format!("background contract 0x{} not found", hex::encode(contract)),
            });
        };
        let request = CallRequest {
            to: contract,
            from: session.env.contract.address,
            gas_limit: self.config.default_gas_limit,
            calldata: args,
            ..Default::default()
        };
        let mut process = child_session(session, dep, &request);
        process.gas = SharedGasMeter::new(self.config.default_gas_limit);
        process.call_stack = Arc::new(Mutex::new(CallStack::with_max_depth(
            self.config.max_call_depth,
        )));
        let (live, driver) = self.prepare(process, ContractRouter::new(), ENTRY_POINT_EXECUTE)?;
        self.background
            .spawn(contract, live, driver, ENTRY_POINT_EXECUTE.to_string())
    }
}

/// One top-level invocation.
pub struct ExecutionRequest {
    pub env: Env,
    pub contract: ContractDependency,
    pub entry_point: String,
    /// Committed state the invocation branches from.
    pub store: Arc<dyn KvStore>,
    pub collaborators: Collaborators,
    /// Defaults to the configured limit when zero.
    pub gas_limit: u64,
}

/// What a top-level invocation produced. Failed invocations carry no logs,
/// events or messages and leave the store untouched.
#[derive(Debug)]
pub struct ExecutionResult {
    pub code: CallCode,
    pub data: Vec<u8>,
    pub gas_used: u64,
    pub logs: Vec<WasmxLog>,
    pub events: Vec<ChainEvent>,
    pub messages: Vec<serde_json::Value>,
    /// Diagnostic text of a failed invocation; not deterministic.
    pub error: Option<String>,
}

/// Entry point into the execution core.
pub struct WasmxEngine {
    shared: Arc<EngineShared>,
}

impl WasmxEngine {
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        Ok(Self {
            shared: Arc::new(EngineShared::new(config)?),
        })
    }

    /// See [`EngineShared::with_extensions`].
    pub fn with_extensions(
        config: VmConfig,
        modules: HashMap<&'static str, LabelModules>,
        databases: DatabaseRegistry,
    ) -> Result<Self, VmError> {
        Ok(Self {
            shared: Arc::new(EngineShared::with_extensions(config, modules, databases)?),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.shared.config
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    /// Execute one entry point.
    ///
    /// State changes reach `request.store` only when the invocation
    /// succeeds outside a query. Fatal errors abort with `Err`; any other
    /// failure is reported as [`CallCode::Revert`].
    pub fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, VmError> {
        let ExecutionRequest {
            mut env,
            contract,
            entry_point,
            store,
            collaborators,
            gas_limit,
        } = request;
        let gas_limit = if gas_limit == 0 {
            self.shared.config.default_gas_limit
        } else {
            gas_limit
        };
        env.contract = ContractInfo {
            address: contract.address,
            code_hash: contract.code_hash,
            code_id: contract.code_id,
            bytecode: contract.bytecode.clone(),
            system_deps: contract.labels(),
        };
        env.current_call.gas_limit = gas_limit;
        let is_query = env.current_call.is_query;

        let gas = SharedGasMeter::new(gas_limit);
        let mut stack = CallStack::with_max_depth(self.shared.config.max_call_depth);
        stack.push(CallFrame {
            contract: contract.address,
            caller: env.current_call.sender,
            is_query,
            gas_before: 0,
        })?;
        let branch = Arc::new(BranchStore::new(store));
        let mut router = ContractRouter::new();
        router.insert(contract.clone());

        let session = Session {
            engine: self.shared.clone(),
            env,
            contract,
            collab: collaborators,
            state: branch.clone(),
            gas: gas.clone(),
            call_stack: Arc::new(Mutex::new(stack)),
        };
        let address = session.env.contract.address;
        let outcome = self.shared.run(session, router, &entry_point);
        self.shared
            .databases
            .end_transaction(outcome.result.is_ok() && !is_query)?;

        match outcome.result {
            Ok(data) => {
                if is_query {
                    branch.discard()?;
                } else {
                    branch.commit()?;
                }
                info!(
                    contract = %hex::encode(address),
                    %entry_point,
                    gas_used = gas.used(),
                    "execution succeeded"
                );
                let effects = outcome.effects;
                Ok(ExecutionResult {
                    code: CallCode::Success,
                    data,
                    gas_used: gas.used(),
                    logs: effects.logs,
                    events: effects.events,
                    messages: effects.messages,
                    error: None,
                })
            }
            Err(err) if err.is_fatal() => {
                branch.discard()?;
                Err(err)
            }
            Err(err) => {
                branch.discard()?;
                warn!(
                    contract = %hex::encode(address),
                    %entry_point,
                    error = %err,
                    "execution failed"
                );
                let data = match &err {
                    VmError::Revert { data } => data.clone(),
                    _ => outcome.effects.finish_data,
                };
                Ok(ExecutionResult {
                    code: CallCode::Revert,
                    data,
                    gas_used: gas.used(),
                    logs: Vec::new(),
                    events: Vec::new(),
                    messages: Vec::new(),
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// Remove and return the timeouts due at `now_ns`. The embedding
    /// application executes each one at its contract's timed entry point.
    pub fn take_due_timeouts(&self, now_ns: u64) -> Result<Vec<ScheduledTimeout>, VmError> {
        self.shared.timeouts.take_due(now_ns)
    }

    pub fn background(&self) -> &BackgroundRegistry {
        &self.shared.background
    }

    pub fn databases(&self) -> &DatabaseRegistry {
        &self.shared.databases
    }
}

impl std::fmt::Debug for WasmxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmxEngine")
            .field("config", &self.shared.config)
            .field("cached_modules", &self.shared.cached_modules())
            .finish()
    }
}
