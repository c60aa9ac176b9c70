//! Calling-convention configuration.

use crate::abi::MIN_RETURN_SLOT;
use serde::{Deserialize, Serialize};

/// How bound functions talk to a guest.
///
/// The defaults match modules generated by witx-bindgen: allocator exports
/// named `canonical_abi_realloc`/`canonical_abi_free`, at most one direct
/// result, and an 8-byte slot per flattened value in the return area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Export implementing `(old_ptr, old_size, align, new_size) -> ptr`
    pub realloc_export: String,

    /// Export implementing `(ptr, size, align)`
    pub free_export: String,

    /// Release list/string buffers returned by the guest after lifting them
    pub free_lifted_buffers: bool,

    /// Results flattening to more core values than this come back through a
    /// return-area pointer
    pub max_flat_results: usize,

    /// Bytes reserved per flattened value in the return area; values below
    /// 8 are raised to 8
    pub return_slot_size: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            realloc_export: "canonical_abi_realloc".to_string(),
            free_export: "canonical_abi_free".to_string(),
            free_lifted_buffers: true,
            max_flat_results: 1,
            return_slot_size: MIN_RETURN_SLOT,
        }
    }
}

impl CallConfig {
    /// Builder: set allocator export names
    pub fn allocator_exports(
        mut self,
        realloc: impl Into<String>,
        free: impl Into<String>,
    ) -> Self {
        self.realloc_export = realloc.into();
        self.free_export = free.into();
        self
    }

    /// Builder: keep (do not free) buffers returned by the guest
    pub fn keep_lifted_buffers(mut self) -> Self {
        self.free_lifted_buffers = false;
        self
    }

    /// Builder: set the return-area slot size (at least 8 so any core value fits)
    pub fn return_slot_size(mut self, bytes: u32) -> Self {
        self.return_slot_size = bytes.max(MIN_RETURN_SLOT);
        self
    }

    /// Builder: set the direct-return limit
    pub fn max_flat_results(mut self, n: usize) -> Self {
        self.max_flat_results = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.realloc_export, "canonical_abi_realloc");
        assert_eq!(config.free_export, "canonical_abi_free");
        assert!(config.free_lifted_buffers);
        assert_eq!(config.max_flat_results, 1);
        assert_eq!(config.return_slot_size, 8);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CallConfig =
            serde_json::from_str(r#"{ "free_lifted_buffers": false, "return_slot_size": 16 }"#)
                .unwrap();
        assert!(!config.free_lifted_buffers);
        assert_eq!(config.return_slot_size, 16);
        assert_eq!(config.realloc_export, "canonical_abi_realloc");
    }

    #[test]
    fn test_builder_chain() {
        let config = CallConfig::default()
            .allocator_exports("cabi_realloc", "cabi_free")
            .keep_lifted_buffers()
            .return_slot_size(4);
        assert_eq!(config.realloc_export, "cabi_realloc");
        assert!(!config.free_lifted_buffers);
        assert_eq!(config.return_slot_size, 8);
    }
}
