//! System dependency resolution.
//!
//! A contract's dependency tree is walked depth-first, nested dependencies
//! before their parent, and each entry is looked up by role and then by
//! label in the host module table. Protected modules a contract may not use
//! are installed as stand-ins, so the guest still instantiates but fails on
//! the first call into them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use wasmtime::{Engine, Linker};

use wasmx_types::constants::{
    DEFAULT_SYS_DEP, EWASM_ENV_1, WASMX_CONSENSUS_JSON_1, WASMX_CONSENSUS_JSON_I64_1,
    WASMX_ENV_CORE_I64_1, WASMX_ENV_I64_2, WASMX_KVDB_I64_1, WASMX_WASI_RUST_1,
};
use wasmx_types::deps::{flatten_labels, ContractDependency, StorageClassification, SystemDep};

use crate::context::HostState;
use crate::error::VmError;
use crate::host::{register_functions, register_stand_ins, Gate, LabelModules, ModuleBinding};
use crate::memory::{
    select_handler, AssemblyScriptHandler, DefaultHandler, RuntimeHandler, RustI64Handler,
};

/// One namespace scheduled for linking.
#[derive(Clone)]
pub struct PlannedModule {
    /// Dependency label or role that contributed the namespace.
    pub label: String,
    pub binding: ModuleBinding,
    /// Installed as failing stand-ins instead of the real functions.
    pub stand_in: bool,
}

impl std::fmt::Debug for PlannedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedModule")
            .field("label", &self.label)
            .field("import", &self.binding.import)
            .field("functions", &self.binding.functions.len())
            .field("stand_in", &self.stand_in)
            .finish()
    }
}

/// A linker ready to instantiate one contract, and the handler its host
/// functions use to read guest memory.
pub struct Resolution {
    pub linker: Linker<HostState>,
    pub handler: Arc<dyn RuntimeHandler>,
    pub modules: Vec<PlannedModule>,
}

/// The dependency list a contract runs with. Declaring nothing means the
/// Ethereum dialect.
pub fn effective_deps(contract: &ContractDependency) -> Vec<SystemDep> {
    if contract.system_deps.is_empty() {
        vec![SystemDep::new(DEFAULT_SYS_DEP)]
    } else {
        contract.system_deps.clone()
    }
}

fn is_withheld(gate: Gate, contract: &ContractDependency) -> bool {
    match gate {
        Gate::Open => false,
        Gate::CoreRole => !contract.has_core_role(),
        Gate::NonDeterministic => contract.storage_type == StorageClassification::CoreConsensus,
        Gate::Privileged => {
            !contract.has_role() || contract.storage_type == StorageClassification::CoreConsensus
        }
    }
}

fn binding_key(binding: &ModuleBinding) -> (&'static str, usize) {
    (binding.import, binding.functions.as_ptr() as usize)
}

fn walk(
    table: &HashMap<&'static str, LabelModules>,
    deps: &[SystemDep],
    contract: &ContractDependency,
    seen: &mut HashSet<(&'static str, usize)>,
    out: &mut Vec<PlannedModule>,
) {
    for dep in deps {
        walk(table, &dep.deps, contract, seen, out);
        let found = table
            .get(dep.role.as_str())
            .map(|m| (dep.role.as_str(), m))
            .or_else(|| table.get(dep.label.as_str()).map(|m| (dep.label.as_str(), m)));
        let Some((key, modules)) = found else {
            debug!(label = %dep.label, role = %dep.role, "no host modules for dependency");
            continue;
        };
        let stand_in = is_withheld(modules.gate, contract);
        for binding in &modules.bindings {
            if seen.insert(binding_key(binding)) {
                out.push(PlannedModule {
                    label: key.to_string(),
                    binding: *binding,
                    stand_in,
                });
            }
        }
    }
}

/// Namespaces to install for `contract`, in registration order.
///
/// Every contract can import `consensus`; when its dependencies do not
/// provide it, stand-ins are installed.
pub fn plan(
    table: &HashMap<&'static str, LabelModules>,
    contract: &ContractDependency,
) -> Vec<PlannedModule> {
    let deps = effective_deps(contract);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk(table, &deps, contract, &mut seen, &mut out);

    if !out.iter().any(|m| m.binding.import == "consensus") {
        if let Some(consensus) = table.get(WASMX_CONSENSUS_JSON_1) {
            for binding in &consensus.bindings {
                if seen.insert(binding_key(binding)) {
                    out.push(PlannedModule {
                        label: WASMX_CONSENSUS_JSON_1.to_string(),
                        binding: *binding,
                        stand_in: true,
                    });
                }
            }
        }
    }
    out
}

/// The runtime handler for `contract`: a declared memory dependency wins,
/// otherwise the ABI of its host modules decides.
pub fn select_runtime_handler(
    handlers: &HashMap<&'static str, Arc<dyn RuntimeHandler>>,
    contract: &ContractDependency,
) -> Arc<dyn RuntimeHandler> {
    let deps = effective_deps(contract);
    if let Some(handler) = select_handler(handlers, &deps) {
        return handler;
    }
    let labels = flatten_labels(&deps);
    let has = |label: &str| labels.iter().any(|l| l == label);
    if [
        WASMX_WASI_RUST_1,
        WASMX_ENV_I64_2,
        WASMX_ENV_CORE_I64_1,
        WASMX_CONSENSUS_JSON_I64_1,
        WASMX_KVDB_I64_1,
    ]
    .into_iter()
    .any(has)
    {
        Arc::new(RustI64Handler)
    } else if has(EWASM_ENV_1) {
        Arc::new(DefaultHandler)
    } else {
        Arc::new(AssemblyScriptHandler)
    }
}

/// Build the linker for `contract`.
pub fn resolve(
    engine: &Engine,
    table: &HashMap<&'static str, LabelModules>,
    handlers: &HashMap<&'static str, Arc<dyn RuntimeHandler>>,
    contract: &ContractDependency,
) -> Result<Resolution, VmError> {
    let handler = select_runtime_handler(handlers, contract);
    let width = handler.ptr_width();
    let modules = plan(table, contract);

    let mut linker = Linker::new(engine);
    linker.allow_shadowing(true);
    for module in &modules {
        let ModuleBinding {
            import,
            functions,
            mock,
        } = module.binding;
        if module.stand_in {
            debug!(label = %module.label, import, mocked = mock.is_some(), "installing stand-ins");
            match mock {
                Some(mock) => register_functions(&mut linker, engine, import, mock, width)?,
                None => register_stand_ins(&mut linker, engine, import, functions, width)?,
            }
        } else {
            register_functions(&mut linker, engine, import, functions, width)?;
        }
    }
    Ok(Resolution {
        linker,
        handler,
        modules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::default_modules;
    use crate::memory::default_handlers;
    use wasmx_types::constants::{
        CW_ENV_8, MEMORY_TAYLOR, ROLE_CONSENSUS, SYS_ENV_1, WASI_SNAPSHOT_PREVIEW1, WASMX_ENV_2,
        WASMX_ENV_CORE_I32_1, WASMX_KVDB_I32_1,
    };

    fn contract(deps: Vec<SystemDep>) -> ContractDependency {
        ContractDependency {
            system_deps: deps,
            ..Default::default()
        }
    }

    fn imports(modules: &[PlannedModule]) -> Vec<(&'static str, bool)> {
        modules
            .iter()
            .map(|m| (m.binding.import, m.stand_in))
            .collect()
    }

    #[test]
    fn test_empty_deps_default_to_ewasm() {
        let table = default_modules();
        let planned = plan(&table, &contract(vec![]));
        assert_eq!(planned[0].label, EWASM_ENV_1);
        assert_eq!(planned[0].binding.import, "env");
        let handler = select_runtime_handler(&default_handlers(), &contract(vec![]));
        assert_eq!(handler.label(), DefaultHandler.label());
    }

    #[test]
    fn test_nested_deps_resolve_first() {
        let table = default_modules();
        let dep = SystemDep::new(WASMX_ENV_CORE_I32_1)
            .with_deps(vec![SystemDep::new(WASI_SNAPSHOT_PREVIEW1)]);
        let mut core = contract(vec![dep]);
        core.role = Some(ROLE_CONSENSUS.to_string());
        let planned = plan(&table, &core);
        assert_eq!(planned[0].label, WASI_SNAPSHOT_PREVIEW1);
        assert_eq!(planned[1].binding.import, "wasmxcore");
        assert!(!planned[1].stand_in);
    }

    #[test]
    fn test_protected_modules_become_stand_ins() {
        let table = default_modules();
        let deps = vec![
            SystemDep::new(WASMX_ENV_2),
            SystemDep::new(WASMX_ENV_CORE_I32_1),
        ];
        let planned = plan(&table, &contract(deps.clone()));
        let core = planned
            .iter()
            .find(|m| m.binding.import == "wasmxcore")
            .unwrap();
        assert!(core.stand_in);

        let mut privileged = contract(deps);
        privileged.role = Some(ROLE_CONSENSUS.to_string());
        let planned = plan(&table, &privileged);
        assert!(planned.iter().all(|m| !m.stand_in || m.binding.import == "consensus"));
    }

    #[test]
    fn test_consensus_stand_in_always_present() {
        let table = default_modules();
        let planned = plan(&table, &contract(vec![SystemDep::new(CW_ENV_8)]));
        assert_eq!(imports(&planned), vec![("env", false), ("consensus", true)]);
    }

    #[test]
    fn test_deterministic_contracts_lose_sys() {
        let table = default_modules();
        let mut deterministic = contract(vec![SystemDep::new(SYS_ENV_1)]);
        deterministic.storage_type = StorageClassification::CoreConsensus;
        assert!(plan(&table, &deterministic)[0].stand_in);
        deterministic.storage_type = StorageClassification::SingleConsensus;
        assert!(!plan(&table, &deterministic)[0].stand_in);
    }

    #[test]
    fn test_databases_need_role_and_non_deterministic_storage() {
        let table = default_modules();
        let kvdb = |role: Option<&str>, class| {
            let mut dep = contract(vec![SystemDep::new(WASMX_KVDB_I32_1)]);
            dep.role = role.map(str::to_string);
            dep.storage_type = class;
            plan(&table, &dep)[0].stand_in
        };
        assert!(kvdb(None, StorageClassification::SingleConsensus));
        assert!(kvdb(Some("indexer"), StorageClassification::CoreConsensus));
        assert!(!kvdb(Some("indexer"), StorageClassification::SingleConsensus));
    }

    #[test]
    fn test_resolution_is_idempotent_and_deduplicated() {
        let table = default_modules();
        let deps = vec![
            SystemDep::new(WASMX_ENV_2),
            SystemDep::new(WASMX_ENV_2),
            SystemDep::new(MEMORY_TAYLOR),
        ];
        let first = imports(&plan(&table, &contract(deps.clone())));
        let second = imports(&plan(&table, &contract(deps)));
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                ("wasmx", false),
                ("wasmx", false),
                ("env", false),
                ("consensus", true)
            ]
        );
    }

    #[test]
    fn test_handler_by_label() {
        let handlers = default_handlers();
        let taylor = contract(vec![
            SystemDep::new(WASMX_ENV_2),
            SystemDep::new(MEMORY_TAYLOR),
        ]);
        assert_eq!(select_runtime_handler(&handlers, &taylor).label(), MEMORY_TAYLOR);
        let wasi = contract(vec![
            SystemDep::new(WASI_SNAPSHOT_PREVIEW1),
            SystemDep::new(WASMX_WASI_RUST_1),
        ]);
        assert_eq!(
            select_runtime_handler(&handlers, &wasi).label(),
            RustI64Handler.label()
        );
        let native = contract(vec![SystemDep::new(WASMX_ENV_2)]);
        assert_eq!(
            select_runtime_handler(&handlers, &native).label(),
            AssemblyScriptHandler.label()
        );
    }

    #[test]
    fn test_resolve_links_every_namespace() {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).unwrap();
        let resolution = resolve(
            &engine,
            &default_modules(),
            &default_handlers(),
            &contract(vec![SystemDep::new(WASMX_ENV_2)]),
        )
        .unwrap();
        let imports: Vec<_> = resolution.modules.iter().map(|m| m.binding.import).collect();
        assert_eq!(imports, vec!["wasmx", "wasmx", "env", "consensus"]);
        assert_eq!(resolution.handler.label(), AssemblyScriptHandler.label());
    }
}
