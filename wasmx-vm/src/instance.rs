use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, Trap};

use crate::context::{HostState, Termination};
use crate::error::VmError;
use crate::gas::SharedGasMeter;
use crate::memory::{read_memory, to_host_vals, write_memory, zero_val, MemoryAccess};
use crate::value::HostVal;

/// Map an error that crossed the wasmtime boundary back to a [`VmError`].
///
/// Host functions wrap their [`VmError`] unchanged, so it is recovered by
/// downcast. Fuel exhaustion is out of gas; any other trap is a call-level
/// trap.
pub fn classify_trap(err: wasmtime::Error, gas_limit: u64) -> VmError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        return VmError::OutOfGas {
            used: gas_limit,
            limit: gas_limit,
        };
    }
    match err.downcast::<VmError>() {
        Ok(vm_err) => vm_err,
        Err(other) => VmError::Trap {
            reason: format!("{other:#}"),
        },
    }
}

/// Charge fuel burnt since the last mark to the shared meter.
pub(crate) fn settle_fuel(fuel_now: u64, state: &mut HostState) -> Result<(), VmError> {
    let consumed = state.fuel_mark.saturating_sub(fuel_now);
    state.fuel_mark = fuel_now;
    state.session.gas.charge(consumed)
}

pub(crate) fn fuel_error(e: wasmtime::Error) -> VmError {
    VmError::Internal {
        reason: format!("fuel accounting: {e}"),
    }
}

/// One instantiated guest module together with its store.
pub struct LiveInstance {
    store: Store<HostState>,
    instance: Instance,
}

impl LiveInstance {
    pub fn instantiate(
        engine: &Engine,
        linker: &Linker<HostState>,
        module: &Module,
        state: HostState,
    ) -> Result<Self, VmError> {
        let mut store = Store::new(engine, state);
        store.limiter(|s| &mut s.store_limits);
        let fuel = store.data().session.gas.remaining();
        store.set_fuel(fuel).map_err(fuel_error)?;
        store.data_mut().fuel_mark = fuel;

        let limit = store.data().session.gas.limit();
        let instance = linker.instantiate(&mut store, module).map_err(|e| {
            match classify_trap(e, limit) {
                err @ VmError::OutOfGas { .. } => err,
                other => VmError::Instantiation {
                    reason: other.to_string(),
                },
            }
        })?;
        let mut live = Self { store, instance };
        live.sync_fuel()?;
        Ok(live)
    }

    fn gas(&self) -> &SharedGasMeter {
        &self.store.data().session.gas
    }

    /// Start from the shared meter's remaining budget.
    fn refuel(&mut self) -> Result<(), VmError> {
        let remaining = self.gas().remaining();
        self.store.set_fuel(remaining).map_err(fuel_error)?;
        self.store.data_mut().fuel_mark = remaining;
        Ok(())
    }

    fn sync_fuel(&mut self) -> Result<(), VmError> {
        let now = self.store.get_fuel().map_err(fuel_error)?;
        settle_fuel(now, self.store.data_mut())
    }

    /// Invoke an export. A host-requested finish ends the call successfully
    /// with no results; a revert becomes [`VmError::Revert`].
    pub fn call(&mut self, name: &str, args: &[HostVal]) -> Result<Vec<HostVal>, VmError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| VmError::MissingExport {
                name: name.to_string(),
            })?;
        self.refuel()?;
        let params: Vec<_> = args.iter().map(|a| a.to_val()).collect();
        let mut results: Vec<_> = func
            .ty(&self.store)
            .results()
            .map(|t| zero_val(&t))
            .collect();
        let outcome = func.call(&mut self.store, &params, &mut results);
        self.sync_fuel()?;

        match outcome {
            Ok(()) => to_host_vals(&results),
            Err(err) => match self.store.data_mut().termination.take() {
                Some(Termination::Finish(_)) => Ok(Vec::new()),
                Some(Termination::Revert(data)) => Err(VmError::Revert { data }),
                None => Err(classify_trap(err, self.gas().limit())),
            },
        }
    }

    pub fn host(&self) -> &HostState {
        self.store.data()
    }

    pub fn host_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// Consume the instance, returning its store data.
    pub fn into_host_state(self) -> HostState {
        self.store.into_data()
    }

    fn memory(&mut self) -> Result<Memory, VmError> {
        self.instance
            .get_memory(&mut self.store, "memory")
            .ok_or_else(|| VmError::MissingExport {
                name: "memory".to_string(),
            })
    }
}

impl MemoryAccess for LiveInstance {
    fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, VmError> {
        let memory = self.memory()?;
        read_memory(&memory, &self.store, offset, len)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), VmError> {
        let memory = self.memory()?;
        write_memory(&memory, &mut self.store, offset, data)
    }

    fn size(&mut self) -> Result<usize, VmError> {
        let memory = self.memory()?;
        Ok(memory.data_size(&self.store))
    }

    fn has_export(&mut self, name: &str) -> bool {
        self.instance.get_export(&mut self.store, name).is_some()
    }

    fn call_export(&mut self, name: &str, args: &[HostVal]) -> Result<Vec<HostVal>, VmError> {
        self.call(name, args)
    }

    fn global_i32(&mut self, name: &str) -> Result<i32, VmError> {
        let global = self
            .instance
            .get_global(&mut self.store, name)
            .ok_or_else(|| VmError::MissingExport {
                name: name.to_string(),
            })?;
        global
            .get(&mut self.store)
            .i32()
            .ok_or_else(|| VmError::memory(format!("global {name} is not an i32")))
    }
}
