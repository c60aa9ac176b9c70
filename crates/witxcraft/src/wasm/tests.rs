//! Tests for the wasmtime runtime.

use super::*;
use crate::guest::Guest;
use crate::memory::Memory;
use crate::value::CoreValue;
use crate::WitxError;

const ADDER: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add)
  (func (export "scale") (param f64 f32) (result f64)
    local.get 0
    local.get 1
    f64.promote_f32
    f64.mul)
  (func (export "boom")
    unreachable))
"#;

fn instance(config: WasmConfig) -> WasmInstance {
    let runtime = WasmRuntime::new(config).expect("failed to create runtime");
    let module = runtime
        .load_module_bytes("adder", ADDER)
        .expect("failed to load module");
    runtime.instantiate(&module).expect("failed to instantiate")
}

#[test]
fn test_wasm_config_default() {
    let config = WasmConfig::default();
    assert_eq!(config.max_memory, 256 * 1024 * 1024);
    assert!(config.enable_simd);
    assert_eq!(config.memory_export, "memory");
    assert_eq!(config.capabilities, WasiCapabilities::none());
}

#[test]
fn test_wasm_config_minimal() {
    let config = WasmConfig::minimal();
    assert_eq!(config.max_memory, 64 * 1024 * 1024);
    assert!(config.fuel_limit.is_some());
}

#[test]
fn test_wasm_config_development() {
    let config = WasmConfig::development();
    assert_eq!(config.optimization_level, 0);
    assert!(config.capabilities.stdout);
    assert!(!config.capabilities.stdin);
}

#[test]
fn test_wasi_capabilities_builder() {
    let caps = WasiCapabilities::none()
        .stdin(true)
        .stdout(true)
        .stderr(true)
        .env("DEBUG", "1")
        .arg("--verbose");

    assert!(caps.stdin);
    assert!(caps.stdout);
    assert!(caps.stderr);
    assert_eq!(caps.env_vars.len(), 1);
    assert_eq!(caps.args.len(), 1);
}

#[test]
fn test_wasm_config_builder_chain() {
    let config = WasmConfig::default()
        .max_memory(128 * 1024 * 1024)
        .fuel_limit(500_000_000)
        .simd(false)
        .optimize(3)
        .memory_export("mem")
        .call(crate::CallConfig::default().keep_lifted_buffers());

    assert_eq!(config.max_memory, 128 * 1024 * 1024);
    assert_eq!(config.fuel_limit, Some(500_000_000));
    assert!(!config.enable_simd);
    assert_eq!(config.optimization_level, 2);
    assert_eq!(config.memory_export, "mem");
    assert!(!config.call.free_lifted_buffers);
}

#[test]
fn test_wasm_config_from_json() {
    let config: WasmConfig =
        serde_json::from_str(r#"{ "fuel_limit": 1000, "call": { "max_flat_results": 2 } }"#)
            .unwrap();
    assert_eq!(config.fuel_limit, Some(1000));
    assert_eq!(config.call.max_flat_results, 2);
    assert_eq!(config.call.realloc_export, "canonical_abi_realloc");
    assert_eq!(config.max_memory, 256 * 1024 * 1024);
}

#[test]
fn test_runtime_creation() {
    assert!(WasmRuntime::new(WasmConfig::default()).is_ok());
}

#[test]
fn test_module_exports() {
    let runtime = WasmRuntime::new(WasmConfig::default()).unwrap();
    let module = runtime.load_module_bytes("adder", ADDER).unwrap();
    assert_eq!(module.name(), "adder");
    let exports: Vec<&str> = module.exports().collect();
    assert_eq!(exports, vec!["add", "scale", "boom"]);
}

#[test]
fn test_invalid_module() {
    let runtime = WasmRuntime::new(WasmConfig::default()).unwrap();
    let err = runtime
        .load_module_bytes("bad", "(module (func (export \"f\") (result i32)))")
        .err()
        .unwrap();
    assert!(matches!(err, WitxError::Wasm(_)));
}

#[test]
fn test_raw_calls() {
    let mut inst = instance(WasmConfig::default());
    assert!(inst.has_function("add"));
    assert!(!inst.has_function("sub"));
    assert!(!inst.has_function("memory"));

    let out = inst.call("add", &[CoreValue::I32(3), CoreValue::I32(5)]).unwrap();
    assert_eq!(out, vec![CoreValue::I32(8)]);

    let out = inst
        .call("scale", &[CoreValue::F64(1.5), CoreValue::F32(2.0)])
        .unwrap();
    assert_eq!(out, vec![CoreValue::F64(3.0)]);
}

#[test]
fn test_trap_and_missing_export() {
    let mut inst = instance(WasmConfig::default());
    assert!(matches!(
        inst.call("boom", &[]),
        Err(WitxError::Trap { ref function, .. }) if function == "boom"
    ));
    assert!(matches!(
        inst.call("sub", &[]),
        Err(WitxError::MissingExport(_))
    ));
}

#[test]
fn test_memory_access() {
    let mut inst = instance(WasmConfig::default());
    assert_eq!(inst.size(), 64 * 1024);

    inst.write_u64(128, 0xdead_beef_0000_0001).unwrap();
    assert_eq!(inst.read_u64(128).unwrap(), 0xdead_beef_0000_0001);
    assert_eq!(inst.read_u8(128).unwrap(), 1);

    let err = inst.read_bytes(64 * 1024 - 2, 4).unwrap_err();
    assert!(matches!(err, WitxError::MemoryAccessOutOfBounds { .. }));
    assert!(inst.write(64 * 1024 - 1, &[1, 2]).is_err());
}

#[test]
fn test_missing_memory_export() {
    let mut inst = instance(WasmConfig::default().memory_export("heap"));
    assert_eq!(inst.size(), 0);
    assert!(inst.read_u8(0).is_err());
    assert_eq!(
        inst.call("add", &[CoreValue::I32(1), CoreValue::I32(1)]).unwrap(),
        vec![CoreValue::I32(2)]
    );
}

#[test]
fn test_instantiate_with_granted_capabilities() {
    let caps = WasiCapabilities::with_stdio().env("MODE", "test").arg("adder");
    let mut inst = instance(WasmConfig::default().capabilities(caps));
    assert_eq!(inst.name(), "adder");
    assert_eq!(
        inst.call("add", &[CoreValue::I32(2), CoreValue::I32(2)]).unwrap(),
        vec![CoreValue::I32(4)]
    );
}

#[test]
fn test_fuel_metering() {
    let mut inst = instance(WasmConfig::default().fuel_limit(10_000));
    let before = inst.remaining_fuel().unwrap();
    inst.call("add", &[CoreValue::I32(1), CoreValue::I32(2)]).unwrap();
    assert!(inst.remaining_fuel().unwrap() < before);

    assert!(instance(WasmConfig::default()).remaining_fuel().is_none());
}
