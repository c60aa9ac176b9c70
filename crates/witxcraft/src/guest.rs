//! The raw side of a module instance: its memory plus callable exports.

use crate::error::Result;
use crate::memory::Memory;
use crate::value::CoreValue;

/// A module instance as seen by the marshaling engine.
///
/// `call` takes and returns flat core values only; everything structured is
/// handled by lifting and lowering around it.
pub trait Guest: Memory {
    /// Invoke an export with flat arguments.
    fn call(&mut self, name: &str, args: &[CoreValue]) -> Result<Vec<CoreValue>>;

    /// Whether the instance exports a function called `name`.
    fn has_function(&mut self, name: &str) -> bool;
}
