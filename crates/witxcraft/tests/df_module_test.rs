//! Integration tests against a real module run by wasmtime.
//!
//! `df.wat` follows the witx-bindgen conventions: `canonical_abi_realloc` /
//! `canonical_abi_free` exports and a return area with 8-byte slots.

use std::sync::Arc;
use witxcraft::{
    apply_parallel, Bindings, CoreValue, Guest, Schema, Value, WasmConfig, WasmRuntime, WitxError,
};

const WAT_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/df.wat");
const SCHEMA_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/df.json");

fn schema() -> Schema {
    Schema::from_json_file(SCHEMA_PATH).expect("failed to load schema")
}

fn bindings_with(config: WasmConfig) -> Bindings {
    let runtime = WasmRuntime::new(config).expect("failed to create runtime");
    let module = runtime.load_module(WAT_PATH).expect("failed to load module");
    runtime.bind(&module, &schema()).expect("failed to bind schema")
}

fn bindings() -> Bindings {
    bindings_with(WasmConfig::default())
}

/// Read one of the module's bookkeeping counters.
fn counter(bindings: &Bindings, name: &str) -> i32 {
    let out = bindings.functions()[0]
        .instance()
        .with_guest(|g| g.call(name, &[]))
        .expect("instance poisoned")
        .expect("counter call failed");
    match out.as_slice() {
        [CoreValue::I32(n)] => *n,
        other => panic!("unexpected counter result {:?}", other),
    }
}

fn s64s(values: &[i64]) -> Value {
    Value::from(values.to_vec())
}

#[test]
fn test_load_module() {
    let runtime = WasmRuntime::new(WasmConfig::default()).expect("failed to create runtime");
    let module = runtime.load_module(WAT_PATH).expect("failed to load module");
    assert_eq!(module.name(), "df");

    let exports: Vec<&str> = module.exports().collect();
    for name in ["mult", "square_vec", "canonical_abi_realloc", "canonical_abi_free"] {
        assert!(exports.contains(&name), "should export '{}'", name);
    }
}

#[test]
fn test_mult() {
    let b = bindings();
    let mult = b.get("mult").unwrap();
    assert_eq!(mult.call(&[Value::S64(10), Value::S64(5)]).unwrap(), Value::S64(50));
    assert_eq!(
        b.get("square").unwrap().call(&[Value::S64(-7)]).unwrap(),
        Value::S64(49)
    );
}

#[test]
fn test_square_vec() {
    let b = bindings();
    let square_vec = b.get("square_vec").unwrap();
    assert!(square_vec.return_area().is_some());

    let out = square_vec.call(&[s64s(&[2, 3, 4])]).unwrap();
    assert_eq!(out, s64s(&[4, 9, 16]));

    assert_eq!(counter(&b, "free_count"), 1);
    assert_eq!(counter(&b, "last_free_size"), 24);
    assert_eq!(counter(&b, "last_free_align"), 8);
}

#[test]
fn test_square_vec_empty_allocates_nothing() {
    let b = bindings();
    let square_vec = b.get("square_vec").unwrap();
    let allocs = counter(&b, "alloc_count");

    assert_eq!(square_vec.call(&[s64s(&[])]).unwrap(), s64s(&[]));
    assert_eq!(counter(&b, "alloc_count"), allocs);
    assert_eq!(counter(&b, "free_count"), 0);
}

#[test]
fn test_mult_vec() {
    let b = bindings();
    let mult_vec = b.get("mult_vec").unwrap();
    let out = mult_vec
        .call(&[s64s(&[1, 2, 3]), s64s(&[4, 5, 6, 7])])
        .unwrap();
    assert_eq!(out, s64s(&[4, 10, 18]));
}

#[test]
fn test_greet() {
    let b = bindings();
    let greet = b.get("greet").unwrap();
    assert_eq!(
        greet.call(&[Value::from("world")]).unwrap(),
        Value::from("hello, world")
    );
    assert_eq!(counter(&b, "last_free_size"), 12);
    assert_eq!(counter(&b, "last_free_align"), 1);
}

#[test]
fn test_option_result_through_return_area() {
    let b = bindings();
    let checked_div = b.get("checked_div").unwrap();
    assert_eq!(
        checked_div.call(&[Value::S64(7), Value::S64(2)]).unwrap(),
        Value::some(Value::S64(3))
    );
    assert_eq!(
        checked_div.call(&[Value::S64(1), Value::S64(0)]).unwrap(),
        Value::none()
    );
}

#[test]
fn test_apply() {
    let b = bindings();
    let mult = b.get("mult").unwrap();
    let rows = vec![
        vec![Value::S64(1), Value::S64(2)],
        vec![Value::S64(3), Value::S64(4)],
        vec![Value::S64(5), Value::S64(6)],
    ];
    assert_eq!(
        mult.apply(&rows, &[]).unwrap(),
        vec![Value::S64(2), Value::S64(12), Value::S64(30)]
    );

    let scaled = mult
        .apply(&[[Value::S64(1)], [Value::S64(2)]], &[Value::S64(100)])
        .unwrap();
    assert_eq!(scaled, vec![Value::S64(100), Value::S64(200)]);
}

#[test]
fn test_apply_vectors() {
    let b = bindings();
    let square_vec = b.get("square_vec").unwrap();
    let rows = vec![vec![s64s(&[1, 2])], vec![s64s(&[])], vec![s64s(&[3])]];
    assert_eq!(
        square_vec.apply(&rows, &[]).unwrap(),
        vec![s64s(&[1, 4]), s64s(&[]), s64s(&[9])]
    );
}

#[test]
fn test_apply_columns() {
    let b = bindings();
    let mult = b.get("mult").unwrap();
    let columns = vec![
        vec![Value::S64(1), Value::S64(3), Value::S64(5)],
        vec![Value::S64(2), Value::S64(4), Value::S64(6)],
    ];
    assert_eq!(
        mult.apply_columns(&columns, &[]).unwrap(),
        vec![Value::S64(2), Value::S64(12), Value::S64(30)]
    );
}

#[test]
fn test_apply_reports_failing_row() {
    let b = bindings();
    let mult = b.get("mult").unwrap();
    let rows = vec![
        vec![Value::S64(1), Value::S64(2)],
        vec![Value::S64(3), Value::from("four")],
    ];
    let err = mult.apply(&rows, &[]).unwrap_err();
    assert_eq!(err.row(), Some(1));
    assert!(matches!(
        err,
        WitxError::RowFailed { ref completed, .. } if *completed == [Value::S64(2)]
    ));
}

#[test]
fn test_apply_parallel() {
    let runtime = WasmRuntime::new(WasmConfig::default()).expect("failed to create runtime");
    let module = runtime.load_module(WAT_PATH).expect("failed to load module");
    let square = Arc::clone(schema().function("square").unwrap());
    let pool = runtime.bind_pool(&module, &square, 3).unwrap();
    assert_eq!(pool.len(), 3);

    let rows: Vec<Vec<Value>> = (0..25i64).map(|i| vec![Value::S64(i)]).collect();
    let out = apply_parallel(&pool, &rows, &[]).unwrap();
    let expected: Vec<Value> = (0..25i64).map(|i| Value::S64(i * i)).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_fuel_exhaustion_traps() {
    let b = bindings_with(WasmConfig::default().fuel_limit(2_000));
    let square_vec = b.get("square_vec").unwrap();
    let long: Vec<i64> = (0..1_000).collect();
    let err = square_vec.call(&[Value::from(long)]).unwrap_err();
    assert!(matches!(err, WitxError::Trap { ref function, .. } if function == "square_vec"));
}

#[test]
fn test_missing_export() {
    let runtime = WasmRuntime::new(WasmConfig::default()).expect("failed to create runtime");
    let module = runtime.load_module(WAT_PATH).expect("failed to load module");
    let mut schema = schema();
    schema
        .add_function(witxcraft::FunctionSignature::new("divide"))
        .unwrap();
    let err = runtime.bind(&module, &schema).unwrap_err();
    assert!(matches!(err, WitxError::MissingExport(ref name) if name == "divide"));
}
