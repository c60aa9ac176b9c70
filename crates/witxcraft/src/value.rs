//! Core values (what WASM functions take and return) and host values (what
//! callers pass and receive).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four WASM number types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl CoreType {
    /// Slot kind able to carry both `self` and `other` in a variant payload.
    pub fn join(self, other: CoreType) -> CoreType {
        match (self, other) {
            (a, b) if a == b => a,
            (CoreType::I32, CoreType::F32) | (CoreType::F32, CoreType::I32) => CoreType::I32,
            _ => CoreType::I64,
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreType::I32 => "i32",
            CoreType::I64 => "i64",
            CoreType::F32 => "f32",
            CoreType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A flat value passed to or returned from a raw WASM call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreValue {
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
}

impl CoreValue {
    /// Kind of this value.
    pub fn ty(&self) -> CoreType {
        match self {
            CoreValue::I32(_) => CoreType::I32,
            CoreValue::I64(_) => CoreType::I64,
            CoreValue::F32(_) => CoreType::F32,
            CoreValue::F64(_) => CoreType::F64,
        }
    }

    /// The zero value of a kind, used for variant padding.
    pub fn zero(ty: CoreType) -> CoreValue {
        match ty {
            CoreType::I32 => CoreValue::I32(0),
            CoreType::I64 => CoreValue::I64(0),
            CoreType::F32 => CoreValue::F32(0.0),
            CoreType::F64 => CoreValue::F64(0.0),
        }
    }

    /// Re-encode into a wider (joined) slot kind.
    pub fn widen(self, to: CoreType) -> CoreValue {
        match (self, to) {
            (v, t) if v.ty() == t => v,
            (CoreValue::F32(f), CoreType::I32) => CoreValue::I32(f.to_bits() as i32),
            (CoreValue::I32(i), CoreType::I64) => CoreValue::I64(i as u32 as i64),
            (CoreValue::F32(f), CoreType::I64) => CoreValue::I64(f.to_bits() as i64),
            (CoreValue::F64(f), CoreType::I64) => CoreValue::I64(f.to_bits() as i64),
            // join() never produces other combinations
            (v, _) => v,
        }
    }

    /// Inverse of [`CoreValue::widen`].
    pub fn narrow(self, to: CoreType) -> CoreValue {
        match (self, to) {
            (v, t) if v.ty() == t => v,
            (CoreValue::I32(i), CoreType::F32) => CoreValue::F32(f32::from_bits(i as u32)),
            (CoreValue::I64(i), CoreType::I32) => CoreValue::I32(i as i32),
            (CoreValue::I64(i), CoreType::F32) => CoreValue::F32(f32::from_bits(i as u32)),
            (CoreValue::I64(i), CoreType::F64) => CoreValue::F64(f64::from_bits(i as u64)),
            (v, _) => v,
        }
    }
}

/// A host-native value.
///
/// Records carry field names so callers may supply fields in any order;
/// lowering reorders them to the descriptor's declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Record(Vec<(String, Value)>),
    Variant {
        case: String,
        payload: Option<Box<Value>>,
    },
    Enum(String),
    /// Names of the flags that are set
    Flags(Vec<String>),
    Option(Option<Box<Value>>),
    Result(std::result::Result<Option<Box<Value>>, Option<Box<Value>>>),
    Union {
        case: u32,
        value: Box<Value>,
    },
}

impl Value {
    /// `option` value that is present.
    pub fn some(value: Value) -> Value {
        Value::Option(Some(Box::new(value)))
    }

    /// `option` value that is absent.
    pub fn none() -> Value {
        Value::Option(None)
    }

    /// `result` success with a payload.
    pub fn ok(value: Value) -> Value {
        Value::Result(Ok(Some(Box::new(value))))
    }

    /// `result` failure with a payload.
    pub fn err(value: Value) -> Value {
        Value::Result(Err(Some(Box::new(value))))
    }

    /// Variant case, with or without payload.
    pub fn variant(case: impl Into<String>, payload: Option<Value>) -> Value {
        Value::Variant {
            case: case.into(),
            payload: payload.map(Box::new),
        }
    }

    /// Record from `(name, value)` pairs.
    pub fn record<I, S>(fields: I) -> Value
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the host kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::S8(_) => "s8",
            Value::U8(_) => "u8",
            Value::S16(_) => "s16",
            Value::U16(_) => "u16",
            Value::S32(_) => "s32",
            Value::U32(_) => "u32",
            Value::S64(_) => "s64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Record(_) => "record",
            Value::Variant { .. } => "variant",
            Value::Enum(_) => "enum",
            Value::Flags(_) => "flags",
            Value::Option(_) => "option",
            Value::Result(_) => "result",
            Value::Union { .. } => "union",
        }
    }

    /// Integer payload of any integer kind, widened losslessly.
    pub fn as_integer(&self) -> Option<i128> {
        match *self {
            Value::S8(v) => Some(v.into()),
            Value::U8(v) => Some(v.into()),
            Value::S16(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::S32(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::S64(v) => Some(v.into()),
            Value::U64(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => S8,
    u8 => U8,
    i16 => S16,
    u16 => U16,
    i32 => S32,
    u32 => U32,
    i64 => S64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_rules() {
        assert_eq!(CoreType::I32.join(CoreType::I32), CoreType::I32);
        assert_eq!(CoreType::I32.join(CoreType::F32), CoreType::I32);
        assert_eq!(CoreType::F32.join(CoreType::F64), CoreType::I64);
        assert_eq!(CoreType::I32.join(CoreType::I64), CoreType::I64);
        assert_eq!(CoreType::F64.join(CoreType::F64), CoreType::F64);
    }

    #[test]
    fn test_widen_narrow_bits() {
        let f = CoreValue::F32(1.5);
        let wide = f.widen(CoreType::I64);
        assert_eq!(wide, CoreValue::I64(1.5f32.to_bits() as i64));
        assert_eq!(wide.narrow(CoreType::F32), f);

        let neg = CoreValue::I32(-1);
        let wide = neg.widen(CoreType::I64);
        assert_eq!(wide, CoreValue::I64(0xFFFF_FFFF));
        assert_eq!(wide.narrow(CoreType::I32), neg);
    }

    #[test]
    fn test_as_integer() {
        assert_eq!(Value::U64(u64::MAX).as_integer(), Some(u64::MAX as i128));
        assert_eq!(Value::S8(-3).as_integer(), Some(-3));
        assert_eq!(Value::F64(1.0).as_integer(), None);
    }

    #[test]
    fn test_record_field_lookup() {
        let rec = Value::record([("a", Value::U32(1)), ("b", Value::U32(2))]);
        assert_eq!(rec.field("b"), Some(&Value::U32(2)));
        assert_eq!(rec.field("c"), None);
    }
}
