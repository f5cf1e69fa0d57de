//! Region descriptors of the CosmWasm-style ABI.
//!
//! A region is a 12-byte struct in guest memory: `offset`, `capacity` and
//! `length`, each a little-endian u32. Payload bytes live at `offset`.

use wasmx_types::constants::MEMORY_EXPORT_ALLOCATE;

use crate::error::VmError;
use crate::memory::MemoryAccess;
use crate::value::HostVal;

pub const REGION_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Guest address of the struct itself.
    pub ptr: u32,
    pub offset: u32,
    pub capacity: u32,
    pub length: u32,
}

impl Region {
    /// Read and validate the region struct at `ptr`.
    pub fn load(mem: &mut dyn MemoryAccess, ptr: u32) -> Result<Self, VmError> {
        let ptr_usize = ptr as usize;
        let region = Region {
            ptr,
            offset: mem.read_u32_le(ptr_usize)?,
            capacity: mem.read_u32_le(ptr_usize + 4)?,
            length: mem.read_u32_le(ptr_usize + 8)?,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> Result<(), VmError> {
        if self.offset == 0 {
            return Err(VmError::memory(format!(
                "region at {} has a zero offset",
                self.ptr
            )));
        }
        if self.length > self.capacity {
            return Err(VmError::memory(format!(
                "region length {} exceeds capacity {}",
                self.length, self.capacity
            )));
        }
        if self.capacity > u32::MAX - self.offset {
            return Err(VmError::memory(format!(
                "region capacity {} overflows offset {}",
                self.capacity, self.offset
            )));
        }
        Ok(())
    }

    pub fn read(&self, mem: &mut dyn MemoryAccess) -> Result<Vec<u8>, VmError> {
        if self.length == 0 {
            return Ok(Vec::new());
        }
        mem.read(self.offset as usize, self.length as usize)
    }

    /// Copy `data` into the region and store the new length in guest memory.
    /// Writing nothing leaves the region untouched.
    pub fn write(&mut self, mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<(), VmError> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > self.capacity as usize {
            return Err(VmError::memory(format!(
                "region capacity {} too small for {} bytes",
                self.capacity,
                data.len()
            )));
        }
        mem.write(self.offset as usize, data)?;
        self.length = data.len() as u32;
        mem.write_u32_le(self.ptr as usize + 8, self.length)
    }
}

/// Read the bytes behind a region pointer, rejecting payloads over `max_len`.
pub fn read_region(
    mem: &mut dyn MemoryAccess,
    ptr: u32,
    max_len: usize,
) -> Result<Vec<u8>, VmError> {
    let region = Region::load(mem, ptr)?;
    if region.length as usize > max_len {
        return Err(VmError::memory(format!(
            "region length {} exceeds limit {max_len}",
            region.length
        )));
    }
    region.read(mem)
}

/// Allocate a region of `data.len()` bytes through the guest's `allocate`
/// export, fill it and return the region pointer.
pub fn write_new_region(mem: &mut dyn MemoryAccess, data: &[u8]) -> Result<u32, VmError> {
    let results = mem.call_export(MEMORY_EXPORT_ALLOCATE, &[HostVal::I32(data.len() as i32)])?;
    let ptr = results
        .first()
        .copied()
        .ok_or_else(|| VmError::memory("allocate returned no region"))?
        .as_i32()? as u32;
    let mut region = Region::load(mem, ptr)?;
    region.write(mem, data)?;
    Ok(ptr)
}

/// Concatenate sections, each followed by its length as a u32 big-endian.
pub fn encode_sections(sections: &[&[u8]]) -> Vec<u8> {
    let total: usize = sections.iter().map(|s| s.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for section in sections {
        out.extend_from_slice(section);
        out.extend_from_slice(&(section.len() as u32).to_be_bytes());
    }
    out
}

/// Split a buffer produced by [`encode_sections`], last section first.
pub fn decode_sections(data: &[u8]) -> Result<Vec<Vec<u8>>, VmError> {
    let mut sections = Vec::new();
    let mut end = data.len();
    while end > 0 {
        if end < 4 {
            return Err(VmError::encoding("truncated section length"));
        }
        let len = u32::from_be_bytes([data[end - 4], data[end - 3], data[end - 2], data[end - 1]])
            as usize;
        let start = (end - 4)
            .checked_sub(len)
            .ok_or_else(|| VmError::encoding("section longer than buffer"))?;
        sections.push(data[start..end - 4].to_vec());
        end = start;
    }
    sections.reverse();
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::FakeMemory;
    use proptest::prelude::*;

    fn place_region(mem: &mut FakeMemory, ptr: u32, offset: u32, capacity: u32, length: u32) {
        mem.write_u32_le(ptr as usize, offset).unwrap();
        mem.write_u32_le(ptr as usize + 4, capacity).unwrap();
        mem.write_u32_le(ptr as usize + 8, length).unwrap();
    }

    #[test]
    fn test_zero_offset_rejected() {
        let mut mem = FakeMemory::new(256);
        place_region(&mut mem, 16, 0, 10, 0);
        assert!(matches!(Region::load(&mut mem, 16), Err(VmError::Memory { .. })));
    }

    #[test]
    fn test_length_over_capacity_rejected() {
        let mut mem = FakeMemory::new(256);
        place_region(&mut mem, 16, 64, 4, 5);
        assert!(Region::load(&mut mem, 16).is_err());
    }

    #[test]
    fn test_capacity_overflow_rejected() {
        let mut mem = FakeMemory::new(256);
        place_region(&mut mem, 16, 64, u32::MAX - 10, 0);
        assert!(Region::load(&mut mem, 16).is_err());
    }

    #[test]
    fn test_write_too_large() {
        let mut mem = FakeMemory::new(256);
        place_region(&mut mem, 16, 64, 2, 0);
        let mut region = Region::load(&mut mem, 16).unwrap();
        assert!(region.write(&mut mem, b"abc").is_err());
    }

    #[test]
    fn test_empty_write_is_noop() {
        let mut mem = FakeMemory::new(256);
        place_region(&mut mem, 16, 64, 8, 3);
        let mut region = Region::load(&mut mem, 16).unwrap();
        region.write(&mut mem, b"").unwrap();
        assert_eq!(mem.read_u32_le(24).unwrap(), 3);
    }

    #[test]
    fn test_read_region_limit() {
        let mut mem = FakeMemory::new(256);
        place_region(&mut mem, 16, 64, 8, 8);
        assert!(read_region(&mut mem, 16, 4).is_err());
        assert_eq!(read_region(&mut mem, 16, 8).unwrap().len(), 8);
    }

    #[test]
    fn test_sections_layout() {
        let encoded = encode_sections(&[b"ab", b""]);
        assert_eq!(encoded, vec![b'a', b'b', 0, 0, 0, 2, 0, 0, 0, 0]);
        assert_eq!(decode_sections(&encoded).unwrap(), vec![b"ab".to_vec(), vec![]]);
        assert!(decode_sections(&[0, 0, 9]).is_err());
    }

    proptest! {
        #[test]
        fn prop_region_write_then_read(data in proptest::collection::vec(any::<u8>(), 0..128), spare in 0u32..32) {
            let mut mem = FakeMemory::new(512);
            let capacity = data.len() as u32 + spare;
            place_region(&mut mem, 16, 128, capacity, 0);
            let mut region = Region::load(&mut mem, 16).unwrap();
            region.write(&mut mem, &data).unwrap();
            let reloaded = Region::load(&mut mem, 16).unwrap();
            prop_assert!(reloaded.length <= reloaded.capacity);
            prop_assert_eq!(reloaded.read(&mut mem).unwrap(), data);
        }
    }
}
