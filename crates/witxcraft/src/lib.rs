//! # witxcraft
//!
//! Call WebAssembly exports that speak interface types as if they were
//! ordinary host functions.
//!
//! A compiled module only understands `i32`/`i64`/`f32`/`f64`. Interface
//! types (strings, lists, records, variants, flags, options, results) are
//! carried over that boundary by the canonical ABI: **lowering** turns a host
//! [`Value`] into flat core values plus data written into the guest's linear
//! memory, and **lifting** reads them back.
//!
//! ## Layers
//!
//! | Layer | Module | Role |
//! |-------|--------|------|
//! | Descriptors | [`types`] | `TypeDesc`, function signatures, alias-resolving `Schema` |
//! | Values | [`value`] | host `Value`s and flat `CoreValue`s |
//! | Memory | [`memory`] | bounds-checked little-endian access to linear memory |
//! | ABI | [`abi`] | flattening, layout, `lift`/`lower`, return areas |
//! | Allocation | [`allocator`] | guest `realloc`/`free` bridge |
//! | Functions | [`func`] | bound functions, vectorized `apply` |
//! | Runtime | [`wasm`] | wasmtime-backed guests (`wasm` feature) |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use witxcraft::{Schema, Value, WasmConfig, WasmRuntime};
//!
//! let schema = Schema::from_json_file("df.json")?;
//! let runtime = WasmRuntime::new(WasmConfig::default())?;
//! let module = runtime.load_module("df.wasm")?;
//! let bindings = runtime.bind(&module, &schema)?;
//!
//! let mult = bindings.get("mult").unwrap();
//! assert_eq!(mult.call(&[Value::S64(10), Value::S64(5)])?, Value::S64(50));
//!
//! let rows = vec![vec![Value::S64(1), Value::S64(2)], vec![Value::S64(3), Value::S64(4)]];
//! let products = mult.apply(&rows, &[])?;
//! ```
//!
//! ## Features
//!
//! - `wasm` (default) - wasmtime runtime with WASI preview1 linked

#![warn(rust_2018_idioms)]

pub mod abi;
pub mod allocator;
pub mod config;
pub mod error;
pub mod func;
pub mod guest;
pub mod memory;
pub mod types;
pub mod value;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export main types
pub use allocator::{Allocation, Allocator, CanonicalAllocator};
pub use config::CallConfig;
pub use error::{Result, WitxError};
pub use func::{apply_parallel, Bindings, GuestInstance, WasmFunction};
pub use guest::Guest;
pub use memory::{Memory, VecMemory};
pub use types::{Case, Field, FunctionSignature, Param, Scalar, Schema, TypeDesc};
pub use value::{CoreType, CoreValue, Value};

#[cfg(feature = "wasm")]
pub use wasm::{WasiCapabilities, WasmConfig, WasmInstance, WasmModule, WasmRuntime};
