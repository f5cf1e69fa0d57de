//! Nested contract calls.
//!
//! [`route`] runs a callee synchronously inside the caller's host call. The
//! callee works on a [`BranchStore`] over the caller's state and shares the
//! caller's gas meter; the branch is committed only when the callee succeeds
//! outside a query. Open database connections follow the same rule through
//! one savepoint per call.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use wasmx_storage::branch::BranchStore;
use wasmx_types::constants::{ENTRY_POINT_EXECUTE, ENTRY_POINT_QUERY};
use wasmx_types::deps::{ContractDependency, SystemDep};
use wasmx_types::env::{ContractInfo, CurrentCallInfo};
use wasmx_types::primitives::{is_system_address, Address};
use wasmx_types::wire::{CallCode, CallRequest, CallResponse};

use crate::call_stack::CallFrame;
use crate::chain::ChainHandler;
use crate::context::{HostState, Session};
use crate::error::VmError;

/// Contract descriptors resolved so far in one transaction.
///
/// Nested calls receive a clone, so only descriptors travel down the call
/// tree, never live instances.
#[derive(Debug, Clone, Default)]
pub struct ContractRouter {
    deps: HashMap<Address, ContractDependency>,
}

impl ContractRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&ContractDependency> {
        self.deps.get(address)
    }

    pub fn insert(&mut self, dep: ContractDependency) {
        self.deps.insert(dep.address, dep);
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Cached descriptor of `address`, falling back to the chain. Found
    /// descriptors stay cached for the rest of the transaction.
    pub fn resolve(
        &mut self,
        chain: &dyn ChainHandler,
        address: &Address,
    ) -> Result<Option<ContractDependency>, VmError> {
        if let Some(dep) = self.deps.get(address) {
            return Ok(Some(dep.clone()));
        }
        let found = chain.contract_dependency(address)?;
        if let Some(dep) = &found {
            self.deps.insert(*address, dep.clone());
        }
        Ok(found)
    }
}

/// Dependencies of `caller` with a consensus role, nested ones included,
/// that `deps` does not already carry.
fn consensus_deps(caller: &[SystemDep], deps: &[SystemDep]) -> Vec<SystemDep> {
    let mut merged: Vec<SystemDep> = deps.to_vec();
    let candidates = caller
        .iter()
        .flat_map(|dep| std::iter::once(dep).chain(dep.deps.iter()));
    for dep in candidates {
        if dep.role.contains("consensus") && !merged.iter().any(|d| d.role == dep.role) {
            merged.push(dep.clone());
        }
    }
    merged
}

/// Descriptor the callee runs under. A library runs its own code against
/// the caller's address and storage, keeping its own role.
fn effective_callee(caller: &ContractDependency, callee: ContractDependency) -> ContractDependency {
    if !callee.is_library() {
        return callee;
    }
    let system_deps = consensus_deps(&caller.system_deps, &callee.system_deps);
    ContractDependency {
        address: caller.address,
        storage_type: caller.storage_type,
        system_deps,
        ..callee
    }
}

/// Reject calls that cross role or determinism boundaries.
fn check_boundaries(
    caller: &ContractDependency,
    callee: &ContractDependency,
) -> Result<(), CallResponse> {
    if callee.has_role() && !caller.has_role() {
        return Err(CallResponse::failure(format!(
            "no-role contract tried to execute role contract: from 0x{}, to 0x{} - {}",
            hex::encode(caller.address),
            hex::encode(callee.address),
            callee.role_str()
        )));
    }
    if !caller.storage_type.may_call(callee.storage_type) {
        return Err(CallResponse::failure(format!(
            "deterministic contract tried to execute non-deterministic contract: from 0x{}, to 0x{}",
            hex::encode(caller.address),
            hex::encode(callee.address)
        )));
    }
    Ok(())
}

pub(crate) fn child_session(parent: &Session, callee: ContractDependency, request: &CallRequest) -> Session {
    let is_query = request.is_query || parent.env.current_call.is_query;
    let contract = ContractInfo {
        address: callee.address,
        code_hash: callee.code_hash,
        code_id: callee.code_id,
        bytecode: callee.bytecode.clone(),
        system_deps: callee.labels(),
    };
    let current_call = CurrentCallInfo {
        origin: parent.env.current_call.origin,
        sender: request.from,
        funds: request.value,
        gas_limit: request.gas_limit,
        call_data: request.calldata.clone(),
        is_query,
        read_only: is_query || parent.env.current_call.read_only,
    };
    Session {
        engine: parent.engine.clone(),
        env: parent.env.for_call(contract, current_call),
        contract: callee,
        collab: parent.collab.clone(),
        state: Arc::new(BranchStore::new(parent.state_view())),
        gas: parent.gas.clone(),
        call_stack: parent.call_stack.clone(),
    }
}

fn lock_stack<T>(
    session: &Session,
    f: impl FnOnce(&mut crate::call_stack::CallStack) -> T,
) -> Result<T, VmError> {
    let mut stack = session.call_stack.lock().map_err(|e| VmError::Internal {
        reason: format!("call stack poisoned: {e}"),
    })?;
    Ok(f(&mut stack))
}

/// Run a nested call on behalf of the contract executing in `state`.
///
/// Call-level failures become a [`CallResponse`]; fatal errors are
/// returned and abort the transaction.
pub fn route(state: &mut HostState, request: CallRequest) -> Result<CallResponse, VmError> {
    let session = state.session.clone();
    let chain = session.chain();

    if is_system_address(&request.to) && !chain.can_call_system_contract(&request.from) {
        return Ok(CallResponse::failure("wasmxcall: cannot call system contract"));
    }

    let precompiles = session.collab.precompiles.clone();
    if precompiles.is_precompile(&request.to) {
        return match precompiles.execute(&request.to, &request.calldata) {
            Ok(data) => Ok(CallResponse::new(CallCode::Success, data)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(to = %hex::encode(request.to), error = %err, "precompile call failed");
                Ok(CallResponse::new(CallCode::Revert, Vec::new()))
            }
        };
    }

    let Some(callee) = state.router.resolve(chain, &request.to)? else {
        debug!(to = %hex::encode(request.to), "call to account without code");
        return Ok(CallResponse::new(CallCode::Success, Vec::new()));
    };
    if let Err(response) = check_boundaries(&session.contract, &callee) {
        debug!(
            reason = %String::from_utf8_lossy(&response.data),
            "nested call rejected"
        );
        return Ok(response);
    }

    let callee = effective_callee(&session.contract, callee);
    run_nested(state, &request, callee)
}

/// Run the module of `code` against the storage of `request.to`, with the
/// caller's role and storage class (EVM `CALLCODE` / `DELEGATECALL`).
pub fn route_delegate(
    state: &mut HostState,
    request: CallRequest,
    code: &Address,
) -> Result<CallResponse, VmError> {
    let session = state.session.clone();
    let Some(code_dep) = state.router.resolve(session.chain(), code)? else {
        debug!(code = %hex::encode(code), "delegate call to account without code");
        return Ok(CallResponse::new(CallCode::Success, Vec::new()));
    };
    if let Err(response) = check_boundaries(&session.contract, &code_dep) {
        return Ok(response);
    }
    let callee = ContractDependency {
        address: request.to,
        role: session.contract.role.clone(),
        storage_type: session.contract.storage_type,
        ..code_dep
    };
    run_nested(state, &request, callee)
}

/// Execute `callee` in a child session and fold the outcome back.
fn run_nested(
    state: &mut HostState,
    request: &CallRequest,
    callee: ContractDependency,
) -> Result<CallResponse, VmError> {
    let session = state.session.clone();
    let child = child_session(&session, callee, request);
    let is_query = child.env.current_call.is_query;
    let branch = child.state.clone();

    let frame = CallFrame {
        contract: child.contract.address,
        caller: request.from,
        is_query,
        gas_before: session.gas.used(),
    };
    let pushed = lock_stack(&session, |stack| {
        stack
            .push(frame)
            .map(|()| format!("sp{}_{}", stack.depth(), stack.call_index()))
    })?;
    let savepoint = match pushed {
        Ok(savepoint) => savepoint,
        Err(err) => return Ok(CallResponse::failure(err.to_string())),
    };
    let databases = &session.engine.databases;
    databases.begin_subcall(&savepoint)?;

    let entry_point = if is_query {
        ENTRY_POINT_QUERY
    } else {
        ENTRY_POINT_EXECUTE
    };
    let outcome = session.engine.run(child, state.router.clone(), entry_point);
    lock_stack(&session, |stack| stack.pop())?;
    databases.end_subcall(&savepoint, outcome.result.is_ok() && !is_query)?;

    match outcome.result {
        Ok(data) => {
            if is_query {
                branch.discard()?;
            } else {
                branch.commit()?;
                state.effects.absorb(outcome.effects);
            }
            Ok(CallResponse::new(CallCode::Success, data))
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            branch.discard()?;
            warn!(
                to = %hex::encode(request.to),
                error = %err,
                "nested call failed"
            );
            let data = match err {
                VmError::Revert { data } => data,
                _ => outcome.effects.finish_data,
            };
            Ok(CallResponse::new(CallCode::Revert, data))
        }
    }
}

/// Transfer `request.value` to the callee, then route the call. A failed
/// transfer reverts without running the callee.
pub fn call_with_funds(state: &mut HostState, request: CallRequest) -> Result<CallResponse, VmError> {
    if request.value > 0 {
        let transferred = state
            .session
            .chain()
            .transfer(&request.from, &request.to, request.value);
        match transferred {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                debug!(error = %err, "call value transfer failed");
                return Ok(CallResponse::new(CallCode::Revert, Vec::new()));
            }
        }
    }
    route(state, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmx_types::constants::{ROLE_CONSENSUS, ROLE_LIBRARY};
    use wasmx_types::deps::StorageClassification;

    fn dep(address: u8, role: Option<&str>, class: StorageClassification) -> ContractDependency {
        ContractDependency {
            address: [address; 20],
            role: role.map(str::to_string),
            storage_type: class,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_role_cannot_call_role_contract() {
        let caller = dep(1, None, StorageClassification::CoreConsensus);
        let callee = dep(2, Some("bank"), StorageClassification::CoreConsensus);
        let response = check_boundaries(&caller, &callee).unwrap_err();
        assert_eq!(response.code, CallCode::Failure);
    }

    #[test]
    fn test_core_may_call_meta_only() {
        let caller = dep(1, None, StorageClassification::CoreConsensus);
        let meta = dep(2, None, StorageClassification::MetaConsensus);
        let single = dep(3, None, StorageClassification::SingleConsensus);
        assert!(check_boundaries(&caller, &meta).is_ok());
        assert!(check_boundaries(&caller, &single).is_err());
    }

    #[test]
    fn test_library_runs_as_caller() {
        let mut caller = dep(1, Some(ROLE_CONSENSUS), StorageClassification::SingleConsensus);
        caller.system_deps = vec![SystemDep::new("consensus_raft_0.0.1")
            .with_role(ROLE_CONSENSUS)
            .with_deps(vec![SystemDep::new("x").with_role("consensus_meta")])];
        let mut library = dep(9, Some(ROLE_LIBRARY), StorageClassification::CoreConsensus);
        library.bytecode = vec![1, 2, 3];
        library.system_deps = vec![SystemDep::new("wasmx_env_2")];

        let effective = effective_callee(&caller, library);
        assert_eq!(effective.address, [1u8; 20]);
        assert_eq!(effective.storage_type, StorageClassification::SingleConsensus);
        assert_eq!(effective.bytecode, vec![1, 2, 3]);
        assert_eq!(effective.role_str(), ROLE_LIBRARY);
        assert!(!effective.has_core_role());
        let roles: Vec<&str> = effective.system_deps.iter().map(|d| d.role.as_str()).collect();
        assert_eq!(roles, vec!["", ROLE_CONSENSUS, "consensus_meta"]);
    }

    #[test]
    fn test_plain_callee_unchanged() {
        let caller = dep(1, None, StorageClassification::CoreConsensus);
        let callee = dep(2, None, StorageClassification::CoreConsensus);
        assert_eq!(effective_callee(&caller, callee.clone()), callee);
    }

    #[test]
    fn test_router_cache() {
        let mut router = ContractRouter::new();
        assert!(router.is_empty());
        router.insert(dep(4, None, StorageClassification::CoreConsensus));
        assert_eq!(router.len(), 1);
        assert!(router.get(&[4u8; 20]).is_some());
    }
}
