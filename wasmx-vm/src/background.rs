//! Cross-invocation resources: background processes and scheduled timeouts.
//!
//! A background process is a live guest instance parked under its contract
//! address. Later invocations reach it only through the `wasmxcore` read and
//! write host calls, which take the instance lock without waiting: a process
//! that is still running reports itself busy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::{error, info};

use wasmx_types::primitives::Address;

use crate::driver::ExecuteDriver;
use crate::error::VmError;
use crate::instance::LiveInstance;
use crate::memory::MemoryAccess;

pub type ProcessSlot = Arc<Mutex<LiveInstance>>;

fn poisoned(what: &str) -> VmError {
    VmError::Internal {
        reason: format!("{what} lock poisoned"),
    }
}

fn busy(address: &Address) -> VmError {
    VmError::ContractError {
        reason: format!("background process 0x{} is busy", hex::encode(address)),
    }
}

/// Take a process lock without waiting. A held lock means the process is
/// still running; a poisoned one is an internal failure.
fn try_acquire<'a, T>(slot: &'a Mutex<T>, address: &Address) -> Result<MutexGuard<'a, T>, VmError> {
    match slot.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(busy(address)),
        Err(TryLockError::Poisoned(_)) => Err(VmError::Internal {
            reason: format!("background process 0x{} lock poisoned", hex::encode(address)),
        }),
    }
}

/// Live background instances keyed by contract address.
#[derive(Default)]
pub struct BackgroundRegistry {
    processes: Mutex<HashMap<Address, ProcessSlot>>,
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Address, ProcessSlot>>, VmError> {
        self.processes.lock().map_err(|_| poisoned("background registry"))
    }

    /// Park `instance` under `address`, replacing any previous process.
    pub fn register(&self, address: Address, instance: LiveInstance) -> Result<ProcessSlot, VmError> {
        let slot = Arc::new(Mutex::new(instance));
        self.lock()?.insert(address, slot.clone());
        Ok(slot)
    }

    pub fn get(&self, address: &Address) -> Result<Option<ProcessSlot>, VmError> {
        Ok(self.lock()?.get(address).cloned())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.lock().map(|p| p.contains_key(address)).unwrap_or(false)
    }

    pub fn remove(&self, address: &Address) -> Result<bool, VmError> {
        Ok(self.lock()?.remove(address).is_some())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every parked instance.
    pub fn clear(&self) -> Result<(), VmError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Register `instance` and run `entry_point` on it. Inside a tokio
    /// runtime the run happens on the blocking pool, otherwise inline.
    pub fn spawn(
        &self,
        address: Address,
        instance: LiveInstance,
        driver: Arc<dyn ExecuteDriver>,
        entry_point: String,
    ) -> Result<(), VmError> {
        let slot = self.register(address, instance)?;
        let job = move || {
            let Ok(mut live) = slot.lock() else {
                error!(contract = %hex::encode(address), "background process lock poisoned");
                return;
            };
            info!(contract = %hex::encode(address), %entry_point, "background process started");
            match driver.execute(&mut live, &entry_point) {
                Ok(_) => info!(contract = %hex::encode(address), "background process ended"),
                Err(err) => error!(
                    contract = %hex::encode(address),
                    error = %err,
                    "background process failed"
                ),
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
        Ok(())
    }

    /// Copy `data` to the offset held in the process's exported i32 global
    /// `ptr_global`. `Ok(None)` when no process runs under `address`.
    pub fn write(
        &self,
        address: &Address,
        ptr_global: &str,
        data: &[u8],
    ) -> Result<Option<()>, VmError> {
        let Some(slot) = self.get(address)? else {
            return Ok(None);
        };
        let mut live = try_acquire(&*slot, address)?;
        let offset = live.global_i32(ptr_global)?;
        live.write(offset as usize, data)?;
        Ok(Some(()))
    }

    /// Read the buffer described by the process's `ptr_global` and
    /// `len_global` exports.
    pub fn read(
        &self,
        address: &Address,
        ptr_global: &str,
        len_global: &str,
    ) -> Result<Option<Vec<u8>>, VmError> {
        let Some(slot) = self.get(address)? else {
            return Ok(None);
        };
        let mut live = try_acquire(&*slot, address)?;
        let offset = live.global_i32(ptr_global)?;
        let len = live.global_i32(len_global)?;
        if offset < 0 || len < 0 {
            return Err(VmError::memory(format!(
                "invalid buffer {offset}+{len} in background process"
            )));
        }
        live.read(offset as usize, len as usize).map(Some)
    }
}

/// One pending `eventual` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimeout {
    pub id: String,
    /// Contract that scheduled the timeout.
    pub owner: Address,
    /// Contract to invoke when it fires.
    pub contract: Address,
    /// Block time, in nanoseconds, at which the timeout is due.
    pub due_ns: u64,
    pub args: Vec<u8>,
}

/// Timeouts scheduled by `wasmxcore.startTimeout`.
///
/// Due times are block times, so firing is driven by the embedder through
/// [`TimeoutRegistry::take_due`] rather than by a wall clock.
#[derive(Debug, Default)]
pub struct TimeoutRegistry {
    pending: Mutex<Vec<ScheduledTimeout>>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ScheduledTimeout>>, VmError> {
        self.pending.lock().map_err(|_| poisoned("timeout registry"))
    }

    /// Schedule a timeout. An existing one with the same owner and id is
    /// replaced.
    pub fn schedule(&self, timeout: ScheduledTimeout) -> Result<(), VmError> {
        let mut pending = self.lock()?;
        pending.retain(|t| !(t.owner == timeout.owner && t.id == timeout.id));
        pending.push(timeout);
        Ok(())
    }

    /// Remove the owner's timeout `id`; false when none was pending.
    pub fn cancel(&self, owner: &Address, id: &str) -> Result<bool, VmError> {
        let mut pending = self.lock()?;
        let before = pending.len();
        pending.retain(|t| !(t.owner == *owner && t.id == id));
        Ok(pending.len() != before)
    }

    /// Remove and return every timeout due at `now_ns`, earliest first.
    /// Timeouts due at the same time keep their scheduling order.
    pub fn take_due(&self, now_ns: u64) -> Result<Vec<ScheduledTimeout>, VmError> {
        let mut pending = self.lock()?;
        let (mut due, rest): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|t| t.due_ns <= now_ns);
        *pending = rest;
        due.sort_by_key(|t| t.due_ns);
        Ok(due)
    }

    pub fn pending(&self) -> Vec<ScheduledTimeout> {
        self.lock().map(|p| p.clone()).unwrap_or_default()
    }
}
