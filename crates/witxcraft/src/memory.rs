//! Bounded access to a guest's linear memory.
//!
//! All multi-byte values are little-endian, as in WebAssembly.

use crate::error::{Result, WitxError};

/// Byte-addressable view of one instance's linear memory.
///
/// Implementors only provide raw byte copies; the typed accessors are derived
/// from them and inherit their bounds checking.
pub trait Memory {
    /// Current size in bytes.
    fn size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Copy `bytes` into memory starting at `offset`.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()>;

    /// Fail unless `[offset, offset + len)` lies inside memory.
    fn check_range(&self, offset: u32, len: u64) -> Result<()> {
        let size = self.size();
        if u64::from(offset) + len > size as u64 {
            return Err(WitxError::MemoryAccessOutOfBounds {
                offset: offset.into(),
                len,
                size,
            });
        }
        Ok(())
    }

    /// Read `len` bytes into a new buffer.
    fn read_bytes(&self, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.check_range(offset, len.into())?;
        let mut buf = vec![0u8; len as usize];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    fn read_u8(&self, offset: u32) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read(offset, &mut b)?;
        Ok(b[0])
    }

    fn read_u16(&self, offset: u32) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read(offset, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&self, offset: u32) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read(offset, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&self, offset: u32) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read(offset, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_f32(&self, offset: u32) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(offset)?))
    }

    fn read_f64(&self, offset: u32) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(offset)?))
    }

    fn write_u8(&mut self, offset: u32, v: u8) -> Result<()> {
        self.write(offset, &[v])
    }

    fn write_u16(&mut self, offset: u32, v: u16) -> Result<()> {
        self.write(offset, &v.to_le_bytes())
    }

    fn write_u32(&mut self, offset: u32, v: u32) -> Result<()> {
        self.write(offset, &v.to_le_bytes())
    }

    fn write_u64(&mut self, offset: u32, v: u64) -> Result<()> {
        self.write(offset, &v.to_le_bytes())
    }

    fn write_f32(&mut self, offset: u32, v: f32) -> Result<()> {
        self.write_u32(offset, v.to_bits())
    }

    fn write_f64(&mut self, offset: u32, v: f64) -> Result<()> {
        self.write_u64(offset, v.to_bits())
    }
}

/// Linear memory backed by a host byte buffer of fixed size.
///
/// Used for decoding memory snapshots and by in-process guests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VecMemory {
    data: Vec<u8>,
}

impl VecMemory {
    /// Zero-filled memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    /// Wrap existing bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Memory for VecMemory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len() as u64)?;
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
