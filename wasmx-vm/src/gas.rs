use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::VmError;

// ─── Gas Cost Constants ─────────────────────────────────────────────────────

/// Base cost charged on entry to every host call.
pub const GAS_HOST_CALL: u64 = 10;

/// Cost per byte read from contract storage.
pub const GAS_BYTE_READ: u64 = 1;

/// Cost per byte written to contract storage.
pub const GAS_BYTE_WRITE: u64 = 2;

/// Cost of a storage write through the Ethereum and CosmWasm dialects.
pub const GAS_SSTORE: u64 = 20_000;

/// Cost of a secp256k1 signature verification.
pub const GAS_SECP256K1_VERIFY: u64 = 21_000;

/// Default gas limit when none is specified.
pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;

// ─── Gas Schedule ───────────────────────────────────────────────────────────

/// Host-call cost table, configurable through [`VmConfig`](crate::config::VmConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    pub host_call: u64,
    pub byte_read: u64,
    pub byte_write: u64,
    pub sstore: u64,
    pub secp256k1_verify: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            host_call: GAS_HOST_CALL,
            byte_read: GAS_BYTE_READ,
            byte_write: GAS_BYTE_WRITE,
            sstore: GAS_SSTORE,
            secp256k1_verify: GAS_SECP256K1_VERIFY,
        }
    }
}

// ─── Gas Meter ──────────────────────────────────────────────────────────────

/// Tracks gas consumption for one transaction.
#[derive(Debug, Clone)]
pub struct GasMeter {
    /// Maximum gas allowed.
    pub limit: u64,
    /// Gas consumed so far.
    pub used: u64,
}

impl GasMeter {
    /// Create a new gas meter with the given limit.
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge the given amount of gas. Returns an error if the limit is exceeded.
    pub fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        let new_used = self.used.saturating_add(amount);
        if new_used > self.limit {
            self.used = new_used;
            return Err(VmError::OutOfGas {
                used: new_used,
                limit: self.limit,
            });
        }
        self.used = new_used;
        Ok(())
    }

    /// Return the remaining gas.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Return gas consumed so far.
    pub fn used(&self) -> u64 {
        self.used
    }
}

/// The meter shared by every context of one call tree.
///
/// Nested calls hold clones of the same handle, so gas spent in a sub-call
/// stays spent whatever its outcome.
#[derive(Debug, Clone)]
pub struct SharedGasMeter(Arc<Mutex<GasMeter>>);

impl SharedGasMeter {
    pub fn new(limit: u64) -> Self {
        Self(Arc::new(Mutex::new(GasMeter::new(limit))))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, GasMeter>, VmError> {
        self.0.lock().map_err(|e| VmError::Internal {
            reason: format!("gas meter poisoned: {e}"),
        })
    }

    pub fn charge(&self, amount: u64) -> Result<(), VmError> {
        self.lock()?.charge(amount)
    }

    pub fn remaining(&self) -> u64 {
        self.lock().map(|m| m.remaining()).unwrap_or(0)
    }

    pub fn used(&self) -> u64 {
        self.lock().map(|m| m.used()).unwrap_or(u64::MAX)
    }

    pub fn limit(&self) -> u64 {
        self.lock().map(|m| m.limit).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gas_meter_charge() {
        let mut meter = GasMeter::new(1000);
        assert!(meter.charge(100).is_ok());
        assert_eq!(meter.used(), 100);
        assert_eq!(meter.remaining(), 900);
    }

    #[test]
    fn test_gas_meter_exhaust() {
        let mut meter = GasMeter::new(100);
        assert!(meter.charge(50).is_ok());
        assert!(matches!(
            meter.charge(51),
            Err(VmError::OutOfGas { used: 101, limit: 100 })
        ));
    }

    #[test]
    fn test_gas_meter_exact_limit() {
        let mut meter = GasMeter::new(100);
        assert!(meter.charge(100).is_ok());
        assert_eq!(meter.remaining(), 0);
        assert!(meter.charge(1).is_err());
    }

    #[test]
    fn test_shared_meter_is_one_budget() {
        let meter = SharedGasMeter::new(1_000);
        let nested = meter.clone();
        nested.charge(400).unwrap();
        meter.charge(100).unwrap();
        assert_eq!(meter.used(), 500);
        assert_eq!(nested.remaining(), 500);
    }

    #[test]
    fn test_default_schedule() {
        let schedule = GasSchedule::default();
        assert_eq!(schedule.sstore, 20_000);
        assert_eq!(schedule.secp256k1_verify, 21_000);
    }

    proptest! {
        #[test]
        fn prop_used_is_monotonic(charges in proptest::collection::vec(0u64..500, 0..40)) {
            let meter = SharedGasMeter::new(5_000);
            let mut last = 0;
            for amount in charges {
                let _ = meter.charge(amount);
                prop_assert!(meter.used() >= last);
                last = meter.used();
            }
        }
    }
}
