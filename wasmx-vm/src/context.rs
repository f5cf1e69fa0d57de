//! Per-invocation execution context.
//!
//! A context is split in two. [`Session`] is the immutable descriptor of one
//! invocation: environment, contract descriptor, collaborators, the state
//! branch and the shared gas meter. [`Effects`] accumulates everything the
//! guest produces. Nested calls get a fresh session over a new branch and a
//! fresh effects accumulator, which the router folds back on success.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use wasmtime::StoreLimits;
use wasmtime::StoreLimitsBuilder;

use wasmx_storage::branch::BranchStore;
use wasmx_storage::prefix::PrefixStore;
use wasmx_storage::traits::{KvPairs, KvStore};
use wasmx_types::codec::AddressCodec;
use wasmx_types::deps::ContractDependency;
use wasmx_types::env::Env;
use wasmx_types::wire::{ChainEvent, WasmxLog};

use crate::call_stack::CallStack;
use crate::chain::{ChainHandler, ConsensusApplication, NativePrecompiles};
use crate::config::VmConfig;
use crate::engine::EngineShared;
use crate::error::VmError;
use crate::gas::SharedGasMeter;
use crate::host::wasi::WasiState;
use crate::memory::RuntimeHandler;
use crate::router::ContractRouter;

/// External services reachable from one transaction.
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainHandler>,
    pub app: Option<Arc<dyn ConsensusApplication>>,
    pub precompiles: Arc<dyn NativePrecompiles>,
}

/// Immutable descriptor of one invocation.
#[derive(Clone)]
pub struct Session {
    pub engine: Arc<EngineShared>,
    pub env: Env,
    /// Descriptor of the code being run. For library calls this is the
    /// library, while `env.contract.address` is the caller.
    pub contract: ContractDependency,
    pub collab: Collaborators,
    /// This invocation's savepoint over the parent state.
    pub state: Arc<BranchStore>,
    pub gas: SharedGasMeter,
    pub call_stack: Arc<Mutex<CallStack>>,
}

impl Session {
    pub fn config(&self) -> &VmConfig {
        &self.engine.config
    }

    pub fn chain(&self) -> &dyn ChainHandler {
        self.collab.chain.as_ref()
    }

    pub fn codec(&self) -> &dyn AddressCodec {
        self.collab.chain.address_codec()
    }

    pub fn state_view(&self) -> Arc<dyn KvStore> {
        self.state.clone()
    }

    /// Storage view of the executing contract.
    pub fn contract_store(&self) -> PrefixStore {
        PrefixStore::for_contract(
            self.state_view(),
            self.contract.storage_type,
            &self.env.contract.address,
        )
    }

    /// Current nesting depth, the running frame included.
    pub fn depth(&self) -> usize {
        self.call_stack.lock().map(|s| s.depth()).unwrap_or(0)
    }
}

/// Everything one invocation produced.
#[derive(Debug, Default)]
pub struct Effects {
    pub return_data: Vec<u8>,
    pub finish_data: Vec<u8>,
    pub logs: Vec<WasmxLog>,
    pub events: Vec<ChainEvent>,
    /// CosmWasm submessages returned by the contract.
    pub messages: Vec<serde_json::Value>,
    iterators: HashMap<i32, VecDeque<(Vec<u8>, Vec<u8>)>>,
    next_iterator: i32,
}

impl Effects {
    pub fn push_log(&mut self, log: WasmxLog, max_logs: usize) -> Result<(), VmError> {
        if self.logs.len() >= max_logs {
            return Err(VmError::ContractError {
                reason: format!("log limit of {max_logs} reached"),
            });
        }
        self.logs.push(log);
        Ok(())
    }

    pub fn push_events(
        &mut self,
        events: impl IntoIterator<Item = ChainEvent>,
        max_events: usize,
    ) -> Result<(), VmError> {
        for event in events {
            if self.events.len() >= max_events {
                return Err(VmError::ContractError {
                    reason: format!("event limit of {max_events} reached"),
                });
            }
            self.events.push(event);
        }
        Ok(())
    }

    /// Register a snapshot of pairs and return its handle.
    pub fn open_iterator(&mut self, pairs: KvPairs) -> i32 {
        self.next_iterator += 1;
        self.iterators.insert(self.next_iterator, pairs.into());
        self.next_iterator
    }

    /// Next pair of an iterator. Exhausted iterators are closed and yield
    /// `Ok(None)`; unknown handles are an error.
    pub fn next_pair(&mut self, id: i32) -> Result<Option<(Vec<u8>, Vec<u8>)>, VmError> {
        let queue = self.iterators.get_mut(&id).ok_or_else(|| VmError::ContractError {
            reason: format!("iterator {id} does not exist"),
        })?;
        let next = queue.pop_front();
        if next.is_none() {
            self.iterators.remove(&id);
        }
        Ok(next)
    }

    pub fn open_iterators(&self) -> usize {
        self.iterators.len()
    }

    /// Fold a successful child's logs and events into this accumulator,
    /// preserving call order.
    pub fn absorb(&mut self, child: Effects) {
        self.logs.extend(child.logs);
        self.events.extend(child.events);
    }
}

/// Explicit end of execution requested by a host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Finish(Vec<u8>),
    Revert(Vec<u8>),
}

/// The wasmtime store data of one live guest.
pub struct HostState {
    pub session: Session,
    pub effects: Effects,
    pub router: ContractRouter,
    pub storage: PrefixStore,
    pub handler: Arc<dyn RuntimeHandler>,
    pub store_limits: StoreLimits,
    /// Fuel level at the last synchronization with the shared meter.
    pub fuel_mark: u64,
    pub termination: Option<Termination>,
    pub wasi: WasiState,
}

impl HostState {
    pub fn new(session: Session, router: ContractRouter, handler: Arc<dyn RuntimeHandler>) -> Self {
        let store_limits = StoreLimitsBuilder::new()
            .memory_size(session.config().max_memory_bytes)
            .build();
        let storage = session.contract_store();
        Self {
            session,
            effects: Effects::default(),
            router,
            storage,
            handler,
            store_limits,
            fuel_mark: 0,
            termination: None,
            wasi: WasiState::default(),
        }
    }

    pub fn env(&self) -> &Env {
        &self.session.env
    }
}
