//! wasmtime-backed guest instances.
//!
//! Each [`WasmInstance`] owns its own `Store`, so instances never share
//! linear memory and may be driven from different threads.
//!
//! ## Security Model
//!
//! - **Memory isolation**: each instance has its own linear memory, capped by
//!   `max_memory`
//! - **Deny-by-default**: stdio, environment, arguments and directories are
//!   only visible when granted in [`WasiCapabilities`]
//! - **Bounded execution**: optional fuel metering per instance
//!
//! ## Usage
//!
//! ```rust,ignore
//! use witxcraft::wasm::{WasmConfig, WasmRuntime};
//!
//! let runtime = WasmRuntime::new(WasmConfig::minimal())?;
//! let module = runtime.load_module("df.wat")?;
//! let bindings = runtime.bind(&module, &schema)?;
//! ```

mod config;
mod runtime;

pub use config::{WasiCapabilities, WasmConfig};
pub use runtime::{WasmHostState, WasmInstance, WasmModule, WasmRuntime};

#[cfg(test)]
mod tests;
