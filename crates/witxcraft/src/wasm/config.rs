//! Configuration for the wasmtime runtime.

use crate::config::CallConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// WASI capability grants for guest instances.
///
/// Everything starts disabled and must be granted explicitly. Modules built
/// by witx-bindgen usually need nothing beyond stdio for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiCapabilities {
    /// Allow access to stdin
    pub stdin: bool,

    /// Allow access to stdout
    pub stdout: bool,

    /// Allow access to stderr
    pub stderr: bool,

    /// Environment variables to expose
    pub env_vars: Vec<(String, String)>,

    /// Command-line arguments to pass
    pub args: Vec<String>,
}

impl WasiCapabilities {
    /// Nothing allowed
    pub fn none() -> Self {
        Self::default()
    }

    /// stdout/stderr inherited, for guests that print diagnostics
    pub fn with_stdio() -> Self {
        Self {
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }

    /// Builder: enable stdin
    pub fn stdin(mut self, allow: bool) -> Self {
        self.stdin = allow;
        self
    }

    /// Builder: enable stdout
    pub fn stdout(mut self, allow: bool) -> Self {
        self.stdout = allow;
        self
    }

    /// Builder: enable stderr
    pub fn stderr(mut self, allow: bool) -> Self {
        self.stderr = allow;
        self
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Builder: add command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Configuration for [`WasmRuntime`](super::WasmRuntime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasmConfig {
    /// WASI capability configuration
    pub capabilities: WasiCapabilities,

    /// Maximum linear memory per instance in bytes (default = 256MB)
    pub max_memory: usize,

    /// Fuel granted to each instance; `None` disables metering
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-2)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// wasmtime cache configuration file
    pub cache_path: Option<PathBuf>,

    /// Name of the exported linear memory
    pub memory_export: String,

    /// Calling convention for bound functions
    pub call: CallConfig,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            capabilities: WasiCapabilities::none(),
            max_memory: 256 * 1024 * 1024, // 256 MB
            fuel_limit: None,
            optimization_level: 2,
            enable_simd: true,
            cache_path: None,
            memory_export: "memory".to_string(),
            call: CallConfig::default(),
        }
    }
}

impl WasmConfig {
    /// Small memory, bounded fuel, no WASI capabilities
    pub fn minimal() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024,    // 64 MB
            fuel_limit: Some(1_000_000_000), // 1B fuel units
            ..Default::default()
        }
    }

    /// Fast compilation and inherited stdio for debugging guests
    pub fn development() -> Self {
        Self {
            capabilities: WasiCapabilities::with_stdio(),
            optimization_level: 0,
            ..Default::default()
        }
    }

    /// Builder: set capabilities
    pub fn capabilities(mut self, caps: WasiCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(2);
        self
    }

    /// Builder: set cache config path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Builder: set the memory export name
    pub fn memory_export(mut self, name: impl Into<String>) -> Self {
        self.memory_export = name.into();
        self
    }

    /// Builder: set the calling convention
    pub fn call(mut self, call: CallConfig) -> Self {
        self.call = call;
        self
    }
}
