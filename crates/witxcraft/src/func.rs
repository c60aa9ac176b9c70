//! Bound functions: schema signatures attached to a guest instance.
//!
//! A [`WasmFunction`] owns everything needed for one call: the signature, the
//! return-area layout, and a handle to the instance whose lock serializes
//! lower, call, lift and free.

use crate::abi::{Flat, Lifter, Lowerer, ReturnArea};
use crate::allocator::{Allocator, CanonicalAllocator};
use crate::config::CallConfig;
use crate::error::{Result, WitxError};
use crate::guest::Guest;
use crate::types::{FunctionSignature, Schema};
use crate::value::{CoreValue, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A guest plus the allocator and calling convention used with it.
pub struct GuestInstance {
    guest: Mutex<Box<dyn Guest + Send>>,
    allocator: Arc<dyn Allocator>,
    config: CallConfig,
}

impl GuestInstance {
    /// Wrap a guest using its own `realloc`/`free` exports.
    pub fn new(guest: impl Guest + Send + 'static, config: CallConfig) -> Arc<Self> {
        let allocator = Arc::new(CanonicalAllocator::from_config(&config));
        Self::with_allocator(guest, allocator, config)
    }

    /// Wrap a guest with a caller-supplied allocator.
    pub fn with_allocator(
        guest: impl Guest + Send + 'static,
        allocator: Arc<dyn Allocator>,
        config: CallConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            guest: Mutex::new(Box::new(guest)),
            allocator,
            config,
        })
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Run `f` with exclusive access to the guest.
    pub fn with_guest<R>(&self, f: impl FnOnce(&mut dyn Guest) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut **guard))
    }

    /// Attach a signature to the export of the same name.
    pub fn bind(
        self: &Arc<Self>,
        signature: impl Into<Arc<FunctionSignature>>,
    ) -> Result<WasmFunction> {
        let signature = signature.into();
        let unresolved = signature
            .params
            .iter()
            .map(|p| &p.ty)
            .chain(&signature.results)
            .find(|ty| !ty.is_resolved());
        if let Some(ty) = unresolved {
            return Err(WitxError::UnresolvedType(ty.to_string()));
        }
        if !self.lock()?.has_function(&signature.name) {
            return Err(WitxError::MissingExport(signature.name.clone()));
        }

        let flat_results: usize = signature.results.iter().map(|t| t.flat_count()).sum();
        let return_area = (flat_results > self.config.max_flat_results)
            .then(|| ReturnArea::new(&signature.results, self.config.return_slot_size));
        tracing::debug!(
            "Bound {} ({} flat results{})",
            signature,
            flat_results,
            if return_area.is_some() { ", via return area" } else { "" }
        );

        Ok(WasmFunction {
            signature,
            instance: Arc::clone(self),
            return_area,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn Guest + Send>>> {
        self.guest.lock().map_err(|_| WitxError::InstancePoisoned)
    }
}

/// A callable function of a guest instance.
#[derive(Clone)]
pub struct WasmFunction {
    signature: Arc<FunctionSignature>,
    instance: Arc<GuestInstance>,
    return_area: Option<ReturnArea>,
}

impl std::fmt::Debug for WasmFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmFunction")
            .field("signature", &self.signature.to_string())
            .field("return_area", &self.return_area)
            .finish()
    }
}

impl WasmFunction {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn instance(&self) -> &Arc<GuestInstance> {
        &self.instance
    }

    /// Return-area layout, if results do not fit in direct returns.
    pub fn return_area(&self) -> Option<&ReturnArea> {
        self.return_area.as_ref()
    }

    /// Call once with host arguments.
    ///
    /// Zero results come back as an empty tuple, one result as itself and
    /// several as a tuple.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        let sig = &*self.signature;
        if args.len() != sig.params.len() {
            return Err(WitxError::ArityMismatch {
                function: sig.name.clone(),
                expected: sig.params.len(),
                found: args.len(),
            });
        }

        let mut guard = self.instance.lock()?;
        let guest: &mut dyn Guest = &mut **guard;
        let allocator = &*self.instance.allocator;

        let mut flat = Vec::new();
        let mut lowerer = Lowerer::new(guest, allocator);
        for (param, arg) in sig.params.iter().zip(args) {
            if let Err(e) = lowerer.lower(&param.ty, arg, &mut flat) {
                lowerer.abort();
                return Err(e);
            }
        }
        lowerer.commit();

        tracing::trace!("Calling {} with {:?}", sig.name, flat);
        let raw = guest.call(&sig.name, &flat)?;
        let core = match &self.return_area {
            Some(area) => match raw.as_slice() {
                [CoreValue::I32(ptr)] => area.read(&*guest, *ptr as u32)?,
                other => {
                    return Err(WitxError::mismatch(
                        "i32 return pointer",
                        format!("{:?}", other),
                    ))
                }
            },
            None => raw,
        };
        let expected: usize = sig.results.iter().map(|t| t.flat_count()).sum();
        if core.len() != expected {
            return Err(WitxError::mismatch(
                format!("{} core results", expected),
                format!("{} core results", core.len()),
            ));
        }

        let mut lifter = Lifter::new(&*guest);
        let mut src = Flat::new(&core);
        let lifted: Result<Vec<Value>> = sig
            .results
            .iter()
            .map(|ty| lifter.lift(ty, &mut src))
            .collect();
        let owned = lifter.into_owned();

        if self.instance.config.free_lifted_buffers {
            for block in owned {
                if let Err(e) = allocator.release(guest, block) {
                    tracing::warn!(
                        "Failed to free result buffer {:#x} of {}: {}",
                        block.ptr,
                        sig.name,
                        e
                    );
                }
            }
        }

        let mut values = lifted?;
        Ok(match values.len() {
            1 => values.remove(0),
            _ => Value::Tuple(values),
        })
    }

    /// Call once per row, in order, appending `broadcast` to each row's
    /// arguments. Stops at the first failing row; the rows before it are
    /// returned inside [`WitxError::RowFailed`].
    pub fn apply<R: AsRef<[Value]>>(&self, rows: &[R], broadcast: &[Value]) -> Result<Vec<Value>> {
        self.apply_rows(0, rows, broadcast, None)
    }

    /// Column-batch form of [`WasmFunction::apply`]: row `i` takes element
    /// `i` of every column.
    pub fn apply_columns(&self, columns: &[Vec<Value>], broadcast: &[Value]) -> Result<Vec<Value>> {
        let rows = transpose(columns)?;
        self.apply(&rows, broadcast)
    }

    fn apply_rows<R: AsRef<[Value]>>(
        &self,
        first_row: usize,
        rows: &[R],
        broadcast: &[Value],
        failed: Option<&AtomicUsize>,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(rows.len());
        let mut args = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let index = first_row + i;
            if failed.map_or(false, |f| f.load(Ordering::Acquire) < index) {
                break;
            }
            args.clear();
            args.extend_from_slice(row.as_ref());
            args.extend_from_slice(broadcast);
            match self.call(&args) {
                Ok(v) => out.push(v),
                Err(e) => {
                    if let Some(f) = failed {
                        f.fetch_min(index, Ordering::AcqRel);
                    }
                    return Err(WitxError::RowFailed {
                        row: index,
                        source: Box::new(e),
                        completed: out,
                    });
                }
            }
        }
        Ok(out)
    }
}

fn transpose(columns: &[Vec<Value>]) -> Result<Vec<Vec<Value>>> {
    let len = columns.first().map_or(0, Vec::len);
    if let Some((column, c)) = columns.iter().enumerate().find(|(_, c)| c.len() != len) {
        return Err(WitxError::ColumnLengthMismatch {
            column,
            expected: len,
            found: c.len(),
        });
    }
    Ok((0..len)
        .map(|i| columns.iter().map(|c| c[i].clone()).collect())
        .collect())
}

/// Apply across several bound copies of one function, each on its own
/// instance.
///
/// Rows are split into contiguous chunks, one per function, and each chunk
/// runs on its own thread. Results keep input order; on failure the error of
/// the lowest failing row is returned.
pub fn apply_parallel<R>(
    functions: &[WasmFunction],
    rows: &[R],
    broadcast: &[Value],
) -> Result<Vec<Value>>
where
    R: AsRef<[Value]> + Sync,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if functions.is_empty() {
        return Err(WitxError::MissingExport("no functions to apply".into()));
    }

    let chunk = rows.len().div_ceil(functions.len());
    let failed = AtomicUsize::new(usize::MAX);
    let outcomes: Vec<Result<Vec<Value>>> = std::thread::scope(|s| {
        let workers: Vec<_> = rows
            .chunks(chunk)
            .zip(functions)
            .enumerate()
            .map(|(k, (part, func))| {
                let failed = &failed;
                s.spawn(move || func.apply_rows(k * chunk, part, broadcast, Some(failed)))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap_or(Err(WitxError::InstancePoisoned)))
            .collect()
    });

    // Rows below the lowest failure never skip, so earlier chunks are whole.
    let mut results = Vec::with_capacity(rows.len());
    for outcome in outcomes {
        match outcome {
            Ok(part) => results.extend(part),
            Err(WitxError::RowFailed {
                row,
                source,
                completed,
            }) => {
                results.extend(completed);
                return Err(WitxError::RowFailed {
                    row,
                    source,
                    completed: results,
                });
            }
            Err(e) => return Err(e),
        }
    }
    Ok(results)
}

/// Every function of a schema bound to one instance.
#[derive(Debug, Clone)]
pub struct Bindings {
    functions: Vec<WasmFunction>,
}

impl Bindings {
    pub fn new(instance: &Arc<GuestInstance>, schema: &Schema) -> Result<Self> {
        let functions = schema
            .functions()
            .iter()
            .map(|sig| instance.bind(Arc::clone(sig)))
            .collect::<Result<_>>()?;
        Ok(Self { functions })
    }

    pub fn get(&self, name: &str) -> Option<&WasmFunction> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Bound functions in schema order.
    pub fn functions(&self) -> &[WasmFunction] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
