//! Guest memory access and the per-ABI runtime handlers.
//!
//! A [`RuntimeHandler`] turns the opaque pointer values a guest passes to
//! host calls into byte slices and back. Host functions are written once
//! against the handler, so only the pointer encoding differs between the
//! i32 and i64 surfaces.

use std::collections::HashMap;
use std::sync::Arc;

use wasmtime::{Caller, Extern, Memory, Val, ValType};

use wasmx_types::constants::{
    MEMORY_ASSEMBLYSCRIPT_1, MEMORY_DEFAULT_1, MEMORY_EXPORT_ALLOC, MEMORY_EXPORT_ALLOCATE,
    MEMORY_EXPORT_AS, MEMORY_EXPORT_FREE, MEMORY_EXPORT_MALLOC, MEMORY_PTRLEN_I64_1,
    MEMORY_RUST_I64_1, MEMORY_TAYLOR,
};
use wasmx_types::deps::SystemDep;

use crate::context::HostState;
use crate::error::VmError;
use crate::instance::classify_trap;
use crate::value::{HostVal, PtrWidth};

/// Offset of the AssemblyScript object length, relative to the object pointer.
pub const AS_PTR_LENGTH_OFFSET: usize = 4;
/// AssemblyScript class id of `ArrayBuffer`.
pub const AS_ARRAY_BUFFER_TYPE: i32 = 1;
/// Size of the Taylor buffer header (`ref`, `type`, `len`, each u32 LE).
pub const TAYLOR_HEADER_SIZE: usize = 12;
const TAYLOR_BYTES_TYPE: u32 = 1;
/// Upper bound for NUL-terminated string reads.
const MAX_CSTRING_LEN: usize = 1024 * 1024;

// ─── Memory Access ──────────────────────────────────────────────────────────

/// Linear memory and export access for one live guest.
pub trait MemoryAccess {
    fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, VmError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), VmError>;
    fn size(&mut self) -> Result<usize, VmError>;
    fn has_export(&mut self, name: &str) -> bool;
    fn call_export(&mut self, name: &str, args: &[HostVal]) -> Result<Vec<HostVal>, VmError>;
    fn global_i32(&mut self, name: &str) -> Result<i32, VmError>;

    fn read_u32_le(&mut self, offset: usize) -> Result<u32, VmError> {
        let bytes = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_u32_le(&mut self, offset: usize, value: u32) -> Result<(), VmError> {
        self.write(offset, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, offset: usize, value: u64) -> Result<(), VmError> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Bytes from `offset` up to (not including) the first NUL.
    fn read_until_nul(&mut self, offset: usize) -> Result<Vec<u8>, VmError> {
        let size = self.size()?;
        let mut out = Vec::new();
        let mut cursor = offset;
        while cursor < size && out.len() < MAX_CSTRING_LEN {
            let chunk = self.read(cursor, (size - cursor).min(256))?;
            if let Some(pos) = chunk.iter().position(|b| *b == 0) {
                out.extend_from_slice(&chunk[..pos]);
                return Ok(out);
            }
            cursor += chunk.len();
            out.extend_from_slice(&chunk);
        }
        Err(VmError::memory(format!(
            "unterminated string at offset {offset}"
        )))
    }
}

pub(crate) fn read_memory(
    memory: &Memory,
    store: impl wasmtime::AsContext,
    offset: usize,
    len: usize,
) -> Result<Vec<u8>, VmError> {
    let mut buf = vec![0u8; len];
    memory
        .read(store, offset, &mut buf)
        .map_err(|e| VmError::memory(format!("read {len} bytes at {offset}: {e}")))?;
    Ok(buf)
}

pub(crate) fn write_memory(
    memory: &Memory,
    store: impl wasmtime::AsContextMut,
    offset: usize,
    data: &[u8],
) -> Result<(), VmError> {
    memory
        .write(store, offset, data)
        .map_err(|e| VmError::memory(format!("write {} bytes at {offset}: {e}", data.len())))
}

pub(crate) fn zero_val(ty: &ValType) -> Val {
    match ty {
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        _ => Val::I32(0),
    }
}

pub(crate) fn to_host_vals(vals: &[Val]) -> Result<Vec<HostVal>, VmError> {
    vals.iter().map(HostVal::from_val).collect()
}

impl MemoryAccess for Caller<'_, HostState> {
    fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, VmError> {
        let memory = caller_memory(self)?;
        read_memory(&memory, &*self, offset, len)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), VmError> {
        let memory = caller_memory(self)?;
        write_memory(&memory, &mut *self, offset, data)
    }

    fn size(&mut self) -> Result<usize, VmError> {
        let memory = caller_memory(self)?;
        Ok(memory.data_size(&*self))
    }

    fn has_export(&mut self, name: &str) -> bool {
        self.get_export(name).is_some()
    }

    fn call_export(&mut self, name: &str, args: &[HostVal]) -> Result<Vec<HostVal>, VmError> {
        let func = self
            .get_export(name)
            .and_then(Extern::into_func)
            .ok_or_else(|| VmError::MissingExport {
                name: name.to_string(),
            })?;
        let params: Vec<Val> = args.iter().map(|a| a.to_val()).collect();
        let mut results: Vec<Val> = func.ty(&*self).results().map(|t| zero_val(&t)).collect();
        func.call(&mut *self, &params, &mut results)
            .map_err(|e| classify_trap(e, self.data().session.gas.limit()))?;
        to_host_vals(&results)
    }

    fn global_i32(&mut self, name: &str) -> Result<i32, VmError> {
        let global = self
            .get_export(name)
            .and_then(Extern::into_global)
            .ok_or_else(|| VmError::MissingExport {
                name: name.to_string(),
            })?;
        global.get(&mut *self).i32().ok_or_else(|| VmError::Memory {
            reason: format!("global {name} is not an i32"),
        })
    }
}

fn caller_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, VmError> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| VmError::MissingExport {
            name: "memory".to_string(),
        })
}

// ─── Runtime Handlers ───────────────────────────────────────────────────────

/// Pointer encoding of one guest ABI.
pub trait RuntimeHandler: Send + Sync {
    fn label(&self) -> &'static str;

    fn ptr_width(&self) -> PtrWidth;

    /// Bytes designated by a pointer value.
    fn read_ptr(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<Vec<u8>, VmError>;

    /// Allocate guest memory, copy `data` into it and return the pointer value.
    fn allocate_write(&self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<HostVal, VmError>;

    /// Decode a guest string buffer.
    fn decode_string(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn read_string(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<String, VmError> {
        let bytes = self.read_ptr(mem, ptr)?;
        Ok(self.decode_string(&bytes))
    }
}

fn first_i32(results: Vec<HostVal>, export: &str) -> Result<i32, VmError> {
    results
        .first()
        .copied()
        .ok_or_else(|| VmError::memory(format!("{export} returned no pointer")))?
        .as_i32()
}

fn allocate_with(
    mem: &mut dyn MemoryAccess,
    export: &str,
    args: &[HostVal],
) -> Result<usize, VmError> {
    let ptr = first_i32(mem.call_export(export, args)?, export)?;
    usize::try_from(ptr as u32).map_err(|_| VmError::memory(format!("{export} returned {ptr}")))
}

/// Pack an offset and a length into one i64: `offset << 32 | len`.
pub fn build_ptr_i64(offset: u32, len: u32) -> i64 {
    ((offset as u64) << 32 | len as u64) as i64
}

pub fn decode_ptr_i64(value: i64) -> (u32, u32) {
    let raw = value as u64;
    ((raw >> 32) as u32, (raw & 0xFFFF_FFFF) as u32)
}

/// AssemblyScript objects: u32 LE length stored just before the pointer.
pub struct AssemblyScriptHandler;

impl RuntimeHandler for AssemblyScriptHandler {
    fn label(&self) -> &'static str {
        MEMORY_ASSEMBLYSCRIPT_1
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::I32
    }

    fn read_ptr(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<Vec<u8>, VmError> {
        let offset = ptr.as_offset()?;
        let len_at = offset
            .checked_sub(AS_PTR_LENGTH_OFFSET)
            .ok_or_else(|| VmError::memory(format!("pointer {offset} has no length header")))?;
        let len = mem.read_u32_le(len_at)? as usize;
        mem.read(offset, len)
    }

    fn allocate_write(&self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<HostVal, VmError> {
        let ptr = allocate_with(
            mem,
            MEMORY_EXPORT_AS,
            &[HostVal::I32(data.len() as i32), HostVal::I32(AS_ARRAY_BUFFER_TYPE)],
        )?;
        mem.write(ptr, data)?;
        Ok(HostVal::I32(ptr as i32))
    }

    fn decode_string(&self, bytes: &[u8]) -> String {
        decode_utf16le(bytes)
    }
}

/// Decode an AssemblyScript UTF-16LE string. An odd byte count is padded
/// with a leading zero byte.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let padded;
    let bytes = if bytes.len() % 2 != 0 {
        padded = [&[0u8][..], bytes].concat();
        padded.as_slice()
    } else {
        bytes
    };
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Taylor buffers: a 12-byte header (`ref`, `type`, `len`) before the value.
pub struct TaylorHandler;

impl RuntimeHandler for TaylorHandler {
    fn label(&self) -> &'static str {
        MEMORY_TAYLOR
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::I32
    }

    fn read_ptr(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<Vec<u8>, VmError> {
        let offset = ptr.as_offset()?;
        let len = mem.read_u32_le(offset + 8)? as usize;
        mem.read(offset + TAYLOR_HEADER_SIZE, len)
    }

    fn allocate_write(&self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<HostVal, VmError> {
        let total = TAYLOR_HEADER_SIZE + data.len();
        let ptr = allocate_with(mem, MEMORY_EXPORT_ALLOCATE, &[HostVal::I32(total as i32)])?;
        let mut header = Vec::with_capacity(TAYLOR_HEADER_SIZE);
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&TAYLOR_BYTES_TYPE.to_le_bytes());
        header.extend_from_slice(&(data.len() as u32).to_le_bytes());
        mem.write(ptr, &header)?;
        mem.write(ptr + TAYLOR_HEADER_SIZE, data)?;
        Ok(HostVal::I32(ptr as i32))
    }
}

/// Packed `offset << 32 | len` pointers, allocated through `alloc`.
pub struct RustI64Handler;

impl RuntimeHandler for RustI64Handler {
    fn label(&self) -> &'static str {
        MEMORY_RUST_I64_1
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::I64
    }

    fn read_ptr(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<Vec<u8>, VmError> {
        let (offset, len) = decode_ptr_i64(ptr.as_i64()?);
        mem.read(offset as usize, len as usize)
    }

    fn allocate_write(&self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<HostVal, VmError> {
        let ptr = allocate_with(mem, MEMORY_EXPORT_ALLOC, &[HostVal::I32(data.len() as i32)])?;
        mem.write(ptr, data)?;
        Ok(HostVal::I64(build_ptr_i64(ptr as u32, data.len() as u32)))
    }

    fn read_string(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<String, VmError> {
        let (offset, _) = decode_ptr_i64(ptr.as_i64()?);
        let bytes = mem.read_until_nul(offset as usize)?;
        Ok(self.decode_string(&bytes))
    }
}

/// Packed pointers allocated through `malloc`; buffers handed to the host
/// are released with `free` after reading when the guest exports it.
pub struct PtrLenI64Handler {
    alloc_export: String,
    free_export: String,
}

impl PtrLenI64Handler {
    pub fn new(alloc_export: impl Into<String>, free_export: impl Into<String>) -> Self {
        Self {
            alloc_export: alloc_export.into(),
            free_export: free_export.into(),
        }
    }

    /// Allocator names may be overridden by `alloc:<name>` / `free:<name>` roles.
    pub fn from_deps(deps: &[SystemDep]) -> Self {
        let mut handler = Self::default();
        for dep in deps {
            if let Some(name) = dep.role.strip_prefix("alloc:") {
                handler.alloc_export = name.to_string();
            }
            if let Some(name) = dep.role.strip_prefix("free:") {
                handler.free_export = name.to_string();
            }
        }
        handler
    }
}

impl Default for PtrLenI64Handler {
    fn default() -> Self {
        Self::new(MEMORY_EXPORT_MALLOC, MEMORY_EXPORT_FREE)
    }
}

impl RuntimeHandler for PtrLenI64Handler {
    fn label(&self) -> &'static str {
        MEMORY_PTRLEN_I64_1
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::I64
    }

    fn read_ptr(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<Vec<u8>, VmError> {
        let (offset, len) = decode_ptr_i64(ptr.as_i64()?);
        let data = mem.read(offset as usize, len as usize)?;
        if mem.has_export(&self.free_export) {
            mem.call_export(&self.free_export, &[HostVal::I32(offset as i32)])?;
        }
        Ok(data)
    }

    fn allocate_write(&self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<HostVal, VmError> {
        let ptr = allocate_with(mem, &self.alloc_export, &[HostVal::I32(data.len() as i32)])?;
        mem.write(ptr, data)?;
        Ok(HostVal::I64(build_ptr_i64(ptr as u32, data.len() as u32)))
    }

    fn read_string(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<String, VmError> {
        let (offset, _) = decode_ptr_i64(ptr.as_i64()?);
        let bytes = mem.read_until_nul(offset as usize)?;
        Ok(self.decode_string(&bytes))
    }
}

/// Raw i32 offsets. Data handed to the host is NUL-terminated; allocation
/// uses `allocate`, falling back to `malloc`.
pub struct DefaultHandler;

impl RuntimeHandler for DefaultHandler {
    fn label(&self) -> &'static str {
        MEMORY_DEFAULT_1
    }

    fn ptr_width(&self) -> PtrWidth {
        PtrWidth::I32
    }

    fn read_ptr(&self, mem: &mut dyn MemoryAccess, ptr: HostVal) -> Result<Vec<u8>, VmError> {
        mem.read_until_nul(ptr.as_offset()?)
    }

    fn allocate_write(&self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<HostVal, VmError> {
        let export = if mem.has_export(MEMORY_EXPORT_ALLOCATE) {
            MEMORY_EXPORT_ALLOCATE
        } else {
            MEMORY_EXPORT_MALLOC
        };
        let ptr = allocate_with(mem, export, &[HostVal::I32(data.len() as i32)])?;
        mem.write(ptr, data)?;
        Ok(HostVal::I32(ptr as i32))
    }
}

/// Handler table keyed by memory label.
pub fn default_handlers() -> HashMap<&'static str, Arc<dyn RuntimeHandler>> {
    let handlers: Vec<Arc<dyn RuntimeHandler>> = vec![
        Arc::new(AssemblyScriptHandler),
        Arc::new(TaylorHandler),
        Arc::new(RustI64Handler),
        Arc::new(PtrLenI64Handler::default()),
        Arc::new(DefaultHandler),
    ];
    handlers.into_iter().map(|h| (h.label(), h)).collect()
}

/// Pick the handler for a dependency list: role then label at each level,
/// then the nested dependencies. `None` when nothing matches.
pub fn select_handler(
    handlers: &HashMap<&'static str, Arc<dyn RuntimeHandler>>,
    deps: &[SystemDep],
) -> Option<Arc<dyn RuntimeHandler>> {
    for dep in deps {
        let found = handlers
            .get(dep.role.as_str())
            .or_else(|| handlers.get(dep.label.as_str()));
        if let Some(handler) = found {
            if handler.label() == MEMORY_PTRLEN_I64_1 {
                return Some(Arc::new(PtrLenI64Handler::from_deps(deps)));
            }
            return Some(handler.clone());
        }
    }
    deps.iter()
        .find_map(|dep| select_handler(handlers, &dep.deps))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Flat byte memory with a bump allocator behind every allocator export.
    pub(crate) struct FakeMemory {
        pub bytes: Vec<u8>,
        pub next: usize,
        pub freed: Vec<i32>,
    }

    impl FakeMemory {
        pub fn new(size: usize) -> Self {
            Self {
                bytes: vec![0; size],
                next: 64,
                freed: Vec::new(),
            }
        }
    }

    impl MemoryAccess for FakeMemory {
        fn read(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, VmError> {
            self.bytes
                .get(offset..offset + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| VmError::memory("out of bounds"))
        }

        fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), VmError> {
            let slot = self
                .bytes
                .get_mut(offset..offset + data.len())
                .ok_or_else(|| VmError::memory("out of bounds"))?;
            slot.copy_from_slice(data);
            Ok(())
        }

        fn size(&mut self) -> Result<usize, VmError> {
            Ok(self.bytes.len())
        }

        fn has_export(&mut self, name: &str) -> bool {
            name != "allocate"
        }

        fn call_export(&mut self, name: &str, args: &[HostVal]) -> Result<Vec<HostVal>, VmError> {
            if name == "free" {
                self.freed.push(args[0].as_i32()?);
                return Ok(vec![]);
            }
            let size = args[0].as_i32()? as usize;
            let header = if name == "__new" { 4 } else { 0 };
            let ptr = self.next + header;
            if header == 4 {
                self.write(ptr - 4, &(size as u32).to_le_bytes())?;
            }
            self.next = ptr + size + 8;
            Ok(vec![HostVal::I32(ptr as i32)])
        }

        fn global_i32(&mut self, _name: &str) -> Result<i32, VmError> {
            Ok(0)
        }
    }

    #[test]
    fn test_assemblyscript_roundtrip() {
        let mut mem = FakeMemory::new(1024);
        let ptr = AssemblyScriptHandler.allocate_write(&mut mem, b"hello").unwrap();
        assert_eq!(AssemblyScriptHandler.read_ptr(&mut mem, ptr).unwrap(), b"hello");
    }

    #[test]
    fn test_assemblyscript_null_pointer_rejected() {
        let mut mem = FakeMemory::new(64);
        assert!(AssemblyScriptHandler.read_ptr(&mut mem, HostVal::I32(2)).is_err());
    }

    #[test]
    fn test_utf16_decoding() {
        let encoded: Vec<u8> = "hé".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_utf16le(&encoded), "hé");
        assert_eq!(decode_utf16le(&[0x41]), "\u{4100}");
    }

    #[test]
    fn test_taylor_header() {
        let mut mem = FakeMemory::new(1024);
        let ptr = TaylorHandler.allocate_write(&mut mem, b"abc").unwrap();
        let offset = ptr.as_offset().unwrap();
        assert_eq!(mem.read_u32_le(offset + 8).unwrap(), 3);
        assert_eq!(TaylorHandler.read_ptr(&mut mem, ptr).unwrap(), b"abc");
    }

    #[test]
    fn test_packed_pointer() {
        let packed = build_ptr_i64(0x1234, 17);
        assert_eq!(decode_ptr_i64(packed), (0x1234, 17));
        let high = build_ptr_i64(u32::MAX, u32::MAX);
        assert_eq!(decode_ptr_i64(high), (u32::MAX, u32::MAX));
    }

    #[test]
    fn test_rust_i64_roundtrip_and_cstring() {
        let mut mem = FakeMemory::new(1024);
        let ptr = RustI64Handler.allocate_write(&mut mem, b"key\0").unwrap();
        assert!(matches!(ptr, HostVal::I64(_)));
        assert_eq!(RustI64Handler.read_ptr(&mut mem, ptr).unwrap(), b"key\0");
        assert_eq!(RustI64Handler.read_string(&mut mem, ptr).unwrap(), "key");
    }

    #[test]
    fn test_ptrlen_frees_after_read() {
        let mut mem = FakeMemory::new(1024);
        let handler = PtrLenI64Handler::default();
        let ptr = handler.allocate_write(&mut mem, b"data").unwrap();
        assert_eq!(handler.read_ptr(&mut mem, ptr).unwrap(), b"data");
        assert_eq!(mem.freed.len(), 1);
    }

    #[test]
    fn test_default_handler_falls_back_to_malloc() {
        let mut mem = FakeMemory::new(1024);
        let ptr = DefaultHandler.allocate_write(&mut mem, b"xy\0").unwrap();
        assert_eq!(DefaultHandler.read_ptr(&mut mem, ptr).unwrap(), b"xy");
    }

    #[test]
    fn test_select_handler_walks_nested_deps() {
        let handlers = default_handlers();
        let deps = vec![SystemDep::new("wasmx_env_i64_2")
            .with_deps(vec![SystemDep::new(MEMORY_RUST_I64_1)])];
        let handler = select_handler(&handlers, &deps).unwrap();
        assert_eq!(handler.label(), MEMORY_RUST_I64_1);
        assert!(select_handler(&handlers, &[SystemDep::new("ewasm_env_1")]).is_none());
    }

    #[test]
    fn test_ptrlen_allocator_override() {
        let deps = vec![
            SystemDep::new(MEMORY_PTRLEN_I64_1),
            SystemDep::new("x").with_role("alloc:my_alloc"),
        ];
        let handler = PtrLenI64Handler::from_deps(&deps);
        assert_eq!(handler.alloc_export, "my_alloc");
        assert_eq!(handler.free_export, "free");
    }
}
