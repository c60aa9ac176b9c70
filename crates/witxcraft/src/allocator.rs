//! Allocator bridge: guest-side memory management invoked by the host.
//!
//! Lowering asks the allocator for space whenever a string or list must be
//! placed in linear memory; lifting records every buffer it consumed so the
//! caller can hand it back. The default [`CanonicalAllocator`] calls the
//! module's own exports; embedders may inject any other [`Allocator`].

use crate::config::CallConfig;
use crate::error::{Result, WitxError};
use crate::guest::Guest;
use crate::value::CoreValue;

/// A block of guest memory: the exact triple reported back to `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub ptr: u32,
    pub size: u32,
    pub align: u32,
}

/// Guest memory management capability.
pub trait Allocator: Send + Sync {
    /// Resize `old_ptr` (or allocate when `old_ptr == 0 && old_size == 0`).
    fn realloc(
        &self,
        guest: &mut dyn Guest,
        old_ptr: u32,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> Result<u32>;

    /// Release a block previously obtained from the guest.
    fn free(&self, guest: &mut dyn Guest, ptr: u32, size: u32, align: u32) -> Result<()>;

    /// Allocate a fresh block.
    fn allocate(&self, guest: &mut dyn Guest, size: u32, align: u32) -> Result<Allocation> {
        let ptr = self.realloc(guest, 0, 0, align, size)?;
        Ok(Allocation { ptr, size, align })
    }

    /// Release a recorded block.
    fn release(&self, guest: &mut dyn Guest, block: Allocation) -> Result<()> {
        self.free(guest, block.ptr, block.size, block.align)
    }
}

/// Allocator calling the module's `realloc`/`free` exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAllocator {
    realloc_export: String,
    free_export: String,
}

impl Default for CanonicalAllocator {
    fn default() -> Self {
        Self::from_config(&CallConfig::default())
    }
}

impl CanonicalAllocator {
    pub fn new(realloc_export: impl Into<String>, free_export: impl Into<String>) -> Self {
        Self {
            realloc_export: realloc_export.into(),
            free_export: free_export.into(),
        }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self::new(config.realloc_export.clone(), config.free_export.clone())
    }

    /// Export names this allocator needs.
    pub fn exports(&self) -> [&str; 2] {
        [&self.realloc_export, &self.free_export]
    }
}

impl Allocator for CanonicalAllocator {
    fn realloc(
        &self,
        guest: &mut dyn Guest,
        old_ptr: u32,
        old_size: u32,
        align: u32,
        new_size: u32,
    ) -> Result<u32> {
        let failed = |reason: String| WitxError::AllocationFailed {
            size: new_size,
            align,
            reason,
        };

        let args = [
            CoreValue::I32(old_ptr as i32),
            CoreValue::I32(old_size as i32),
            CoreValue::I32(align as i32),
            CoreValue::I32(new_size as i32),
        ];
        let results = guest
            .call(&self.realloc_export, &args)
            .map_err(|e| failed(e.to_string()))?;

        let ptr = match results.as_slice() {
            [CoreValue::I32(p)] => *p as u32,
            other => return Err(failed(format!("realloc returned {:?}", other))),
        };
        if new_size > 0 && ptr == 0 {
            return Err(failed("null pointer".into()));
        }
        if align > 1 && ptr % align != 0 {
            return Err(failed(format!("pointer {:#x} is not {}-byte aligned", ptr, align)));
        }
        guest
            .check_range(ptr, new_size.into())
            .map_err(|_| failed("block extends beyond end of memory".into()))?;
        Ok(ptr)
    }

    fn free(&self, guest: &mut dyn Guest, ptr: u32, size: u32, align: u32) -> Result<()> {
        let args = [
            CoreValue::I32(ptr as i32),
            CoreValue::I32(size as i32),
            CoreValue::I32(align as i32),
        ];
        guest.call(&self.free_export, &args)?;
        Ok(())
    }
}
