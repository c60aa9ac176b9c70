//! WASM runtime implementation using wasmtime.
//!
//! Uses wasmtime-wasi preview1 so modules built against WASI (as witx-bindgen
//! guests usually are) link without further host functions.

use super::config::{WasiCapabilities, WasmConfig};
use crate::error::{Result, WitxError};
use crate::func::{Bindings, GuestInstance, WasmFunction};
use crate::guest::Guest;
use crate::memory::Memory;
use crate::types::{FunctionSignature, Schema};
use crate::value::CoreValue;

use std::path::Path;
use std::sync::Arc;

use wasmtime::{
    Config, Engine, ExternType, Instance, Linker, Module, OptLevel, Store, StoreLimits,
    StoreLimitsBuilder, Val,
};

/// Host state for the WASM store, containing WASI preview1 context.
pub struct WasmHostState {
    preview1: wasmtime_wasi::preview1::WasiP1Ctx,
    limits: StoreLimits,
}

impl WasmHostState {
    fn preview1(&mut self) -> &mut wasmtime_wasi::preview1::WasiP1Ctx {
        &mut self.preview1
    }
}

/// Compiles modules and creates guest instances from them.
pub struct WasmRuntime {
    engine: Engine,
    config: WasmConfig,
}

/// A compiled WebAssembly module.
#[derive(Clone)]
pub struct WasmModule {
    module: Module,
    name: String,
}

/// An instantiated module: its store, exports and linear memory.
pub struct WasmInstance {
    store: Store<WasmHostState>,
    instance: Instance,
    memory: Option<wasmtime::Memory>,
    name: String,
}

impl WasmRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: WasmConfig) -> Result<Self> {
        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });
        engine_config.wasm_simd(config.enable_simd);

        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| WitxError::Wasm(format!("engine creation failed: {}", e)))?;

        Ok(Self { engine, config })
    }

    /// Load a module from a `.wasm` or `.wat` file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<WasmModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let module = Module::from_file(&self.engine, path)
            .map_err(|e| WitxError::Wasm(format!("module load failed: {}", e)))?;

        Ok(WasmModule { module, name })
    }

    /// Load a module from binary or text-format bytes.
    pub fn load_module_bytes(&self, name: &str, bytes: impl AsRef<[u8]>) -> Result<WasmModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| WitxError::Wasm(format!("module creation failed: {}", e)))?;

        Ok(WasmModule {
            module,
            name: name.to_string(),
        })
    }

    /// Instantiate a module with its own store, WASI context and limits.
    pub fn instantiate(&self, module: &WasmModule) -> Result<WasmInstance> {
        let host_state = self.build_host_state(&self.config.capabilities);
        let mut store = Store::new(&self.engine, host_state);
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| WitxError::Wasm(format!("fuel setup failed: {}", e)))?;
        }

        let mut linker: Linker<WasmHostState> = Linker::new(&self.engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| state.preview1())
            .map_err(|e| WitxError::Wasm(format!("WASI link failed: {}", e)))?;

        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| WitxError::Wasm(format!("instantiation failed: {}", e)))?;

        let memory = instance.get_memory(&mut store, &self.config.memory_export);
        match memory {
            Some(m) => tracing::debug!(
                "Instantiated {} with {} bytes of linear memory",
                module.name,
                m.data_size(&store)
            ),
            None => tracing::debug!(
                "Instantiated {} without a '{}' export",
                module.name,
                self.config.memory_export
            ),
        }

        Ok(WasmInstance {
            store,
            instance,
            memory,
            name: module.name.clone(),
        })
    }

    /// Instantiate `module` and bind every function of `schema` to it.
    pub fn bind(&self, module: &WasmModule, schema: &Schema) -> Result<Bindings> {
        let instance = GuestInstance::new(self.instantiate(module)?, self.config.call.clone());
        Bindings::new(&instance, schema)
    }

    /// Bind `signature` on `count` fresh instances, for [`apply_parallel`](crate::apply_parallel).
    pub fn bind_pool(
        &self,
        module: &WasmModule,
        signature: &Arc<FunctionSignature>,
        count: usize,
    ) -> Result<Vec<WasmFunction>> {
        (0..count)
            .map(|_| {
                let instance =
                    GuestInstance::new(self.instantiate(module)?, self.config.call.clone());
                instance.bind(Arc::clone(signature))
            })
            .collect()
    }

    fn build_host_state(&self, caps: &WasiCapabilities) -> WasmHostState {
        let mut builder = wasmtime_wasi::WasiCtxBuilder::new();

        if caps.stdin {
            builder.inherit_stdin();
        }
        if caps.stdout {
            builder.inherit_stdout();
        }
        if caps.stderr {
            builder.inherit_stderr();
        }

        for (key, value) in &caps.env_vars {
            builder.env(key, value);
        }
        builder.args(&caps.args);

        let preview1 = builder.build_p1();
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        WasmHostState { preview1, limits }
    }

    pub fn config(&self) -> &WasmConfig {
        &self.config
    }
}

impl WasmModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }
}

impl WasmInstance {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remaining fuel, if metering is enabled.
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    fn out_of_bounds(&self, offset: u32, len: usize) -> WitxError {
        WitxError::MemoryAccessOutOfBounds {
            offset: offset.into(),
            len: len as u64,
            size: self.size(),
        }
    }
}

impl Memory for WasmInstance {
    fn size(&self) -> usize {
        self.memory.map_or(0, |m| m.data_size(&self.store))
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<()> {
        let memory = self.memory.ok_or_else(|| self.out_of_bounds(offset, buf.len()))?;
        memory
            .read(&self.store, offset as usize, buf)
            .map_err(|_| self.out_of_bounds(offset, buf.len()))
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        let memory = self.memory.ok_or_else(|| self.out_of_bounds(offset, bytes.len()))?;
        memory
            .write(&mut self.store, offset as usize, bytes)
            .map_err(|_| self.out_of_bounds(offset, bytes.len()))
    }
}

impl Guest for WasmInstance {
    fn call(&mut self, name: &str, args: &[CoreValue]) -> Result<Vec<CoreValue>> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| WitxError::MissingExport(name.to_string()))?;

        let params: Vec<Val> = args.iter().map(|v| to_val(*v)).collect();
        let mut results = vec![Val::I32(0); func.ty(&self.store).results().len()];
        let fuel_before = self.store.get_fuel().ok();

        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| WitxError::Trap {
                function: name.to_string(),
                message: format!("{:#}", e),
            })?;

        if let Some((before, after)) = fuel_before.zip(self.store.get_fuel().ok()) {
            tracing::trace!("{} consumed {} fuel", name, before.saturating_sub(after));
        }

        results.iter().map(|v| from_val(name, v)).collect()
    }

    fn has_function(&mut self, name: &str) -> bool {
        self.instance.get_func(&mut self.store, name).is_some()
    }
}

fn to_val(v: CoreValue) -> Val {
    match v {
        CoreValue::I32(i) => Val::I32(i),
        CoreValue::I64(i) => Val::I64(i),
        CoreValue::F32(f) => Val::F32(f.to_bits()),
        CoreValue::F64(f) => Val::F64(f.to_bits()),
    }
}

fn from_val(function: &str, v: &Val) -> Result<CoreValue> {
    match *v {
        Val::I32(i) => Ok(CoreValue::I32(i)),
        Val::I64(i) => Ok(CoreValue::I64(i)),
        Val::F32(bits) => Ok(CoreValue::F32(f32::from_bits(bits))),
        Val::F64(bits) => Ok(CoreValue::F64(f64::from_bits(bits))),
        _ => Err(WitxError::mismatch(
            "core number result",
            format!("non-numeric result from '{}'", function),
        )),
    }
}
