//! The `sys` namespace: wall-clock queries. Never linked into
//! deterministic contracts.

use std::time::{SystemTime, UNIX_EPOCH};

use super::{HostCall, HostFnSpec};
use crate::error::VmError;
use crate::value::{HostOutcome, HostVal, Kind};

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("getCurrentTime", &[], &[Kind::I64], get_current_time),
    HostFnSpec::new("getCurrentTimeMs", &[], &[Kind::I64], get_current_time_ms),
];

fn since_epoch() -> Result<std::time::Duration, VmError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| VmError::Internal {
            reason: format!("system clock before epoch: {e}"),
        })
}

/// Nanoseconds since the Unix epoch.
fn get_current_time(_call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let nanos = since_epoch()?.as_nanos();
    Ok(HostOutcome::i64(i64::try_from(nanos).unwrap_or(i64::MAX)))
}

fn get_current_time_ms(
    _call: &mut HostCall<'_, '_>,
    _args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let millis = since_epoch()?.as_millis();
    Ok(HostOutcome::i64(i64::try_from(millis).unwrap_or(i64::MAX)))
}
