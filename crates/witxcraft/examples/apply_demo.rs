//! Vectorized apply over the test module
//!
//! Run with: RUST_LOG=witxcraft=debug cargo run -p witxcraft --example apply_demo

use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use witxcraft::{apply_parallel, Schema, Value, WasmConfig, WasmRuntime};

const WAT_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/df.wat");
const SCHEMA_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/df.json");

fn main() -> witxcraft::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    println!("=== witxcraft apply demo ===\n");

    let schema = Schema::from_json_file(SCHEMA_PATH)?;
    for sig in schema.functions() {
        println!("  {}", sig);
    }
    println!();

    let runtime = WasmRuntime::new(WasmConfig::default())?;
    let module = runtime.load_module(WAT_PATH)?;
    let bindings = runtime.bind(&module, &schema)?;

    // Row-wise: one call per (a, b) pair
    let mult = bindings
        .get("mult")
        .ok_or_else(|| witxcraft::WitxError::MissingExport("mult".into()))?;
    let rows: Vec<Vec<Value>> = (1..=5i64)
        .map(|i| vec![Value::S64(i), Value::S64(i + 1)])
        .collect();
    println!("mult over rows:      {:?}", mult.apply(&rows, &[])?);

    // Broadcast: the second argument is the same for every row
    let singles: Vec<Vec<Value>> = (1..=5i64).map(|i| vec![Value::S64(i)]).collect();
    println!("mult by 10:          {:?}", mult.apply(&singles, &[Value::S64(10)])?);

    // Lists cross the boundary through linear memory
    if let Some(square_vec) = bindings.get("square_vec") {
        let v = Value::from(vec![2i64, 3, 4]);
        println!("square_vec([2,3,4]): {:?}", square_vec.call(&[v])?);
    }

    // Parallel: four instances, contiguous row chunks
    let square = schema
        .function("square")
        .map(Arc::clone)
        .ok_or_else(|| witxcraft::WitxError::MissingExport("square".into()))?;
    let pool = runtime.bind_pool(&module, &square, 4)?;
    let many: Vec<Vec<Value>> = (0..10_000i64).map(|i| vec![Value::S64(i)]).collect();

    let start = Instant::now();
    let squares = apply_parallel(&pool, &many, &[])?;
    println!(
        "\nsquare over {} rows on {} instances: {:?}",
        squares.len(),
        pool.len(),
        start.elapsed()
    );
    println!("last: {:?}", squares.last());

    println!("\n=== Demo Complete ===");
    Ok(())
}
