use wasmtime::{Val, ValType};

use crate::error::VmError;

/// Width of the pointer values a runtime handler passes across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrWidth {
    I32,
    I64,
}

/// Declared kind of one host-call parameter or result.
///
/// `Ptr` is resolved against the runtime handler's pointer width when the
/// module set is registered, so one host function definition serves both the
/// i32 and the i64-packed surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Ptr,
    I32,
    I64,
    F32,
    F64,
}

impl Kind {
    pub fn val_type(self, ptr: PtrWidth) -> ValType {
        match self {
            Kind::Ptr => match ptr {
                PtrWidth::I32 => ValType::I32,
                PtrWidth::I64 => ValType::I64,
            },
            Kind::I32 => ValType::I32,
            Kind::I64 => ValType::I64,
            Kind::F32 => ValType::F32,
            Kind::F64 => ValType::F64,
        }
    }
}

/// A host-call parameter or result value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostVal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl HostVal {
    pub fn from_val(val: &Val) -> Result<Self, VmError> {
        match val {
            Val::I32(v) => Ok(HostVal::I32(*v)),
            Val::I64(v) => Ok(HostVal::I64(*v)),
            Val::F32(bits) => Ok(HostVal::F32(f32::from_bits(*bits))),
            Val::F64(bits) => Ok(HostVal::F64(f64::from_bits(*bits))),
            other => Err(VmError::Internal {
                reason: format!("unsupported host value {other:?}"),
            }),
        }
    }

    pub fn to_val(self) -> Val {
        match self {
            HostVal::I32(v) => Val::I32(v),
            HostVal::I64(v) => Val::I64(v),
            HostVal::F32(v) => Val::F32(v.to_bits()),
            HostVal::F64(v) => Val::F64(v.to_bits()),
        }
    }

    pub fn as_i32(self) -> Result<i32, VmError> {
        match self {
            HostVal::I32(v) => Ok(v),
            other => Err(VmError::Internal {
                reason: format!("expected i32, got {other:?}"),
            }),
        }
    }

    pub fn as_i64(self) -> Result<i64, VmError> {
        match self {
            HostVal::I64(v) => Ok(v),
            HostVal::I32(v) => Ok(v as i64),
            other => Err(VmError::Internal {
                reason: format!("expected i64, got {other:?}"),
            }),
        }
    }

    /// Value as a guest memory offset. i32 values are read as unsigned;
    /// negative i64 offsets are rejected.
    pub fn as_offset(self) -> Result<usize, VmError> {
        if let HostVal::I32(v) = self {
            return Ok(v as u32 as usize);
        }
        let v = self.as_i64()?;
        usize::try_from(v).map_err(|_| VmError::memory(format!("negative offset {v}")))
    }
}

/// Result of one host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    /// Hand the values back to the guest and keep running.
    Continue(Vec<HostVal>),
    /// Stop the invocation successfully with this finish data.
    Finish(Vec<u8>),
    /// Stop the invocation with a revert carrying this payload.
    Revert(Vec<u8>),
}

impl HostOutcome {
    pub fn none() -> Self {
        HostOutcome::Continue(Vec::new())
    }

    pub fn i32(v: i32) -> Self {
        HostOutcome::Continue(vec![HostVal::I32(v)])
    }

    pub fn i64(v: i64) -> Self {
        HostOutcome::Continue(vec![HostVal::I64(v)])
    }

    pub fn val(v: HostVal) -> Self {
        HostOutcome::Continue(vec![v])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptr_kind_follows_width() {
        assert!(matches!(Kind::Ptr.val_type(PtrWidth::I32), ValType::I32));
        assert!(matches!(Kind::Ptr.val_type(PtrWidth::I64), ValType::I64));
        assert!(matches!(Kind::F64.val_type(PtrWidth::I32), ValType::F64));
    }

    #[test]
    fn test_val_conversion() {
        let v = HostVal::F32(1.5);
        assert_eq!(HostVal::from_val(&v.to_val()).unwrap(), v);
        assert_eq!(HostVal::I32(-3).as_i64().unwrap(), -3);
        assert!(HostVal::I64(1).as_i32().is_err());
        assert_eq!(HostVal::I32(-1).as_offset().unwrap(), u32::MAX as usize);
        assert!(HostVal::I64(-1).as_offset().is_err());
    }
}
