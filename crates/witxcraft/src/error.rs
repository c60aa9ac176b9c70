//! Error types for the witxcraft crate.

use crate::value::Value;
use thiserror::Error;

/// Marshaling and binding error type
#[derive(Error, Debug)]
pub enum WitxError {
    /// Host value kind does not match the descriptor, or a core value has the wrong kind
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the descriptor required
        expected: String,
        /// What was supplied
        found: String,
    },

    /// Host value cannot be represented in the descriptor's width
    #[error("value {value} out of range for {ty}")]
    OutOfRange {
        /// Descriptor name, e.g. `u8`
        ty: &'static str,
        /// The offending value, formatted
        value: String,
    },

    /// Record field absent from the host aggregate
    #[error("missing record field '{0}'")]
    MissingField(String),

    /// Discriminant outside the declared case range
    #[error("unknown discriminant {discriminant} for type with {cases} cases")]
    UnknownDiscriminant {
        /// Discriminant read from the core value stream or memory
        discriminant: u32,
        /// Number of declared cases
        cases: usize,
    },

    /// Host tag names a case or flag the descriptor does not declare
    #[error("unknown case '{0}'")]
    UnknownCase(String),

    /// i32 value is not a Unicode scalar value
    #[error("invalid unicode scalar value {0:#x}")]
    InvalidScalarValue(u32),

    /// String bytes are not well-formed
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// The guest allocator did not produce a usable block
    #[error("allocation of {size} bytes (align {align}) failed: {reason}")]
    AllocationFailed {
        /// Requested byte size
        size: u32,
        /// Requested alignment
        align: u32,
        /// Why the block was rejected
        reason: String,
    },

    /// Read or write beyond the end of linear memory
    #[error("memory access out of bounds: offset {offset} len {len} exceeds memory size {size}")]
    MemoryAccessOutOfBounds {
        /// Start offset of the access
        offset: u64,
        /// Length of the access in bytes
        len: u64,
        /// Current linear memory size in bytes
        size: usize,
    },

    /// Wrong number of arguments for a bound function
    #[error("function '{function}' expects {expected} arguments, got {found}")]
    ArityMismatch {
        /// Function name
        function: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        found: usize,
    },

    /// Alias refers to a name not defined before it
    #[error("undefined type '{0}'")]
    UndefinedType(String),

    /// Type or function name defined twice
    #[error("duplicate definition '{0}'")]
    DuplicateDefinition(String),

    /// Structurally invalid descriptor
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Alias reached the marshaling engine without being resolved
    #[error("unresolved type alias '{0}'")]
    UnresolvedType(String),

    /// Instance does not export a bound function
    #[error("missing export '{0}'")]
    MissingExport(String),

    /// Raw call into the guest failed
    #[error("guest trap in '{function}': {message}")]
    Trap {
        /// Export that was called
        function: String,
        /// Engine-reported failure
        message: String,
    },

    /// A previous call panicked while holding the instance lock
    #[error("instance lock poisoned")]
    InstancePoisoned,

    /// Vectorized application stopped at a failing row
    #[error("row {row} failed: {source}")]
    RowFailed {
        /// Index of the first failing row
        row: usize,
        /// The row's error
        #[source]
        source: Box<WitxError>,
        /// Results of rows `0..row`, in order
        completed: Vec<Value>,
    },

    /// Column batches of unequal length
    #[error("column {column} has {found} rows, expected {expected}")]
    ColumnLengthMismatch {
        /// Index of the offending column
        column: usize,
        /// Length of the first column
        expected: usize,
        /// Length of the offending column
        found: usize,
    },

    /// WebAssembly engine error
    #[error("WASM error: {0}")]
    Wasm(String),

    /// JSON schema/config error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WitxError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        WitxError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Row index for errors raised by vectorized application
    pub fn row(&self) -> Option<usize> {
        match self {
            WitxError::RowFailed { row, .. } => Some(*row),
            _ => None,
        }
    }
}

/// Result type alias for witxcraft operations
pub type Result<T> = std::result::Result<T, WitxError>;
