//! Lowering: host values -> core values and linear memory.

use super::{
    case_types, discriminant_size, field_offsets, flag_words, payload_flat, payload_offset,
    zero_sized_list,
};
use crate::allocator::{Allocation, Allocator};
use crate::error::{Result, WitxError};
use crate::guest::Guest;
use crate::types::{Scalar, TypeDesc};
use crate::value::{CoreValue, Value};

/// Lower one value to its flat core values.
///
/// Buffers allocated along the way become guest-owned on success and are
/// released again if lowering fails part way.
pub fn lower(
    ty: &TypeDesc,
    value: &Value,
    guest: &mut dyn Guest,
    allocator: &dyn Allocator,
) -> Result<Vec<CoreValue>> {
    let mut lowerer = Lowerer::new(guest, allocator);
    let mut out = Vec::with_capacity(ty.flat_count());
    match lowerer.lower(ty, value, &mut out) {
        Ok(()) => {
            lowerer.commit();
            Ok(out)
        }
        Err(e) => {
            lowerer.abort();
            Err(e)
        }
    }
}

/// Lowering state for one call: the target guest and every buffer allocated
/// in it so far.
pub struct Lowerer<'g> {
    guest: &'g mut dyn Guest,
    allocator: &'g dyn Allocator,
    allocations: Vec<Allocation>,
}

impl<'g> Lowerer<'g> {
    pub fn new(guest: &'g mut dyn Guest, allocator: &'g dyn Allocator) -> Self {
        Self {
            guest,
            allocator,
            allocations: Vec::new(),
        }
    }

    /// Hand every allocation over to the guest.
    pub fn commit(self) -> Vec<Allocation> {
        self.allocations
    }

    /// Release every allocation made so far, newest first.
    ///
    /// Failures to free are logged; the original lowering error is what the
    /// caller reports.
    pub fn abort(self) {
        for block in self.allocations.into_iter().rev() {
            if let Err(e) = self.allocator.release(&mut *self.guest, block) {
                tracing::warn!(
                    "Failed to free guest buffer {:#x} ({} bytes): {}",
                    block.ptr,
                    block.size,
                    e
                );
            }
        }
    }

    /// Append the flat form of `value` to `out`.
    pub fn lower(&mut self, ty: &TypeDesc, value: &Value, out: &mut Vec<CoreValue>) -> Result<()> {
        match ty {
            TypeDesc::Scalar(Scalar::String) => {
                let (ptr, len) = self.string(value)?;
                out.extend([CoreValue::I32(ptr as i32), CoreValue::I32(len as i32)]);
            }
            TypeDesc::Scalar(s) => out.push(flat_scalar(*s, value)?),
            TypeDesc::List(elem) => {
                let (ptr, len) = self.list(elem, value)?;
                out.extend([CoreValue::I32(ptr as i32), CoreValue::I32(len as i32)]);
            }
            TypeDesc::Tuple(types) => {
                for (t, v) in types.iter().zip(tuple_items(types, value)?) {
                    self.lower(t, v, out)?;
                }
            }
            TypeDesc::Record(fields) => {
                for f in fields {
                    self.lower(&f.ty, record_field(value, &f.name)?, out)?;
                }
            }
            TypeDesc::Flags(names) => {
                out.extend(flag_bits(names, value)?.into_iter().map(|w| CoreValue::I32(w as i32)))
            }
            TypeDesc::Named(name) => return Err(WitxError::UnresolvedType(name.clone())),
            _ => {
                let cases = case_types(ty).unwrap_or_default();
                let (disc, payload) = case_of(ty, &cases, value)?;
                out.push(CoreValue::I32(disc as i32));

                let joined = payload_flat(&cases);
                let mut flat = Vec::with_capacity(joined.len());
                if let (Some(t), Some(v)) = (cases[disc as usize], payload) {
                    self.lower(t, v, &mut flat)?;
                }
                for (i, slot) in joined.into_iter().enumerate() {
                    out.push(match flat.get(i) {
                        Some(v) => v.widen(slot),
                        None => CoreValue::zero(slot),
                    });
                }
            }
        }
        Ok(())
    }

    /// Write the memory form of `value` at `addr`.
    pub fn store(&mut self, ty: &TypeDesc, value: &Value, addr: u32) -> Result<()> {
        match ty {
            TypeDesc::Scalar(Scalar::String) => {
                let (ptr, len) = self.string(value)?;
                self.write_pair(addr, ptr, len)
            }
            TypeDesc::Scalar(s) => self.store_scalar(*s, value, addr),
            TypeDesc::List(elem) => {
                let (ptr, len) = self.list(elem, value)?;
                self.write_pair(addr, ptr, len)
            }
            TypeDesc::Tuple(types) => {
                let items = tuple_items(types, value)?;
                for ((t, v), off) in types.iter().zip(items).zip(field_offsets(types)) {
                    self.store(t, v, addr + off)?;
                }
                Ok(())
            }
            TypeDesc::Record(fields) => {
                let offsets = field_offsets(fields.iter().map(|f| &f.ty));
                for (f, off) in fields.iter().zip(offsets) {
                    self.store(&f.ty, record_field(value, &f.name)?, addr + off)?;
                }
                Ok(())
            }
            TypeDesc::Flags(names) => {
                let words = flag_bits(names, value)?;
                match names.len() {
                    0 => Ok(()),
                    1..=8 => self.guest.write_u8(addr, words[0] as u8),
                    9..=16 => self.guest.write_u16(addr, words[0] as u16),
                    _ => {
                        for (i, w) in words.into_iter().enumerate() {
                            self.guest.write_u32(addr + 4 * i as u32, w)?;
                        }
                        Ok(())
                    }
                }
            }
            TypeDesc::Named(name) => Err(WitxError::UnresolvedType(name.clone())),
            _ => {
                let cases = case_types(ty).unwrap_or_default();
                let (disc, payload) = case_of(ty, &cases, value)?;
                match discriminant_size(cases.len()) {
                    1 => self.guest.write_u8(addr, disc as u8)?,
                    2 => self.guest.write_u16(addr, disc as u16)?,
                    _ => self.guest.write_u32(addr, disc)?,
                }
                match (cases[disc as usize], payload) {
                    (Some(t), Some(v)) => self.store(t, v, addr + payload_offset(&cases)),
                    _ => Ok(()),
                }
            }
        }
    }

    fn store_scalar(&mut self, s: Scalar, value: &Value, addr: u32) -> Result<()> {
        let mem = &mut *self.guest;
        match (s, flat_scalar(s, value)?) {
            (Scalar::Bool | Scalar::S8 | Scalar::U8, CoreValue::I32(v)) => {
                mem.write_u8(addr, v as u8)
            }
            (Scalar::S16 | Scalar::U16, CoreValue::I32(v)) => mem.write_u16(addr, v as u16),
            (_, CoreValue::I32(v)) => mem.write_u32(addr, v as u32),
            (_, CoreValue::I64(v)) => mem.write_u64(addr, v as u64),
            (_, CoreValue::F32(v)) => mem.write_f32(addr, v),
            (_, CoreValue::F64(v)) => mem.write_f64(addr, v),
        }
    }

    fn write_pair(&mut self, addr: u32, ptr: u32, len: u32) -> Result<()> {
        self.guest.write_u32(addr, ptr)?;
        self.guest.write_u32(addr + 4, len)
    }

    fn allocate(&mut self, size: u32, align: u32) -> Result<u32> {
        let block = self.allocator.allocate(&mut *self.guest, size, align)?;
        tracing::trace!("allocated {} bytes at {:#x}", size, block.ptr);
        self.allocations.push(block);
        Ok(block.ptr)
    }

    /// Copy a string into a fresh guest buffer; `(0, 0)` when empty.
    fn string(&mut self, value: &Value) -> Result<(u32, u32)> {
        let s = match value {
            Value::String(s) => s,
            other => return Err(WitxError::mismatch("string", other.kind())),
        };
        if s.is_empty() {
            return Ok((0, 0));
        }
        let len = u32::try_from(s.len()).map_err(|_| WitxError::OutOfRange {
            ty: "string",
            value: format!("{} bytes", s.len()),
        })?;
        let ptr = self.allocate(len, 1)?;
        self.guest.write(ptr, s.as_bytes())?;
        Ok((ptr, len))
    }

    /// Store list elements contiguously in a fresh guest buffer.
    fn list(&mut self, elem: &TypeDesc, value: &Value) -> Result<(u32, u32)> {
        let items = match value {
            Value::List(items) => items,
            other => return Err(WitxError::mismatch("list", other.kind())),
        };
        let stride = elem.size();
        if stride == 0 {
            return Err(zero_sized_list());
        }
        let too_long = || WitxError::OutOfRange {
            ty: "list",
            value: format!("{} elements of {} bytes", items.len(), stride),
        };
        let len = u32::try_from(items.len()).map_err(|_| too_long())?;
        if len == 0 {
            return Ok((0, 0));
        }
        let total = u32::try_from(u64::from(len) * u64::from(stride)).map_err(|_| too_long())?;
        let ptr = self.allocate(total, elem.align())?;
        for (i, item) in items.iter().enumerate() {
            self.store(elem, item, ptr + i as u32 * stride)?;
        }
        Ok((ptr, len))
    }
}

fn tuple_items<'v>(types: &[TypeDesc], value: &'v Value) -> Result<&'v [Value]> {
    match value {
        Value::Tuple(items) if items.len() == types.len() => Ok(items),
        Value::Tuple(items) => Err(WitxError::mismatch(
            format!("tuple of {}", types.len()),
            format!("tuple of {}", items.len()),
        )),
        other => Err(WitxError::mismatch("tuple", other.kind())),
    }
}

fn record_field<'v>(value: &'v Value, name: &str) -> Result<&'v Value> {
    match value {
        Value::Record(_) => value
            .field(name)
            .ok_or_else(|| WitxError::MissingField(name.to_string())),
        other => Err(WitxError::mismatch("record", other.kind())),
    }
}

/// Packed bit words, flag `i` at bit `i % 32` of word `i / 32`.
fn flag_bits(names: &[String], value: &Value) -> Result<Vec<u32>> {
    let set = match value {
        Value::Flags(set) => set,
        other => return Err(WitxError::mismatch("flags", other.kind())),
    };
    let mut words = vec![0u32; flag_words(names.len())];
    for flag in set {
        let i = names
            .iter()
            .position(|n| n == flag)
            .ok_or_else(|| WitxError::UnknownCase(flag.clone()))?;
        words[i / 32] |= 1 << (i % 32);
    }
    Ok(words)
}

/// Discriminant and payload of a variant-like value.
fn case_of<'v>(
    ty: &TypeDesc,
    cases: &[Option<&TypeDesc>],
    value: &'v Value,
) -> Result<(u32, Option<&'v Value>)> {
    let (disc, payload) = match (ty, value) {
        (TypeDesc::Variant(defs), Value::Variant { case, payload }) => (
            case_index(defs.iter().map(|c| &c.name), case)?,
            payload.as_deref(),
        ),
        (TypeDesc::Enum(names), Value::Enum(case)) => (case_index(names.iter(), case)?, None),
        (TypeDesc::Option(_), Value::Option(v)) => match v {
            None => (0, None),
            Some(v) => (1, Some(v.as_ref())),
        },
        (TypeDesc::Result { .. }, Value::Result(r)) => match r {
            Ok(v) => (0, v.as_deref()),
            Err(v) => (1, v.as_deref()),
        },
        (TypeDesc::Union(items), Value::Union { case, value }) => {
            if *case as usize >= items.len() {
                return Err(WitxError::UnknownCase(case.to_string()));
            }
            (*case, Some(value.as_ref()))
        }
        (ty, other) => return Err(WitxError::mismatch(ty.to_string(), other.kind())),
    };

    match (cases[disc as usize], payload) {
        (Some(t), None) => Err(WitxError::mismatch(t.to_string(), "no payload")),
        (None, Some(v)) => Err(WitxError::mismatch("no payload", v.kind())),
        _ => Ok((disc, payload)),
    }
}

fn case_index<'a>(mut names: impl Iterator<Item = &'a String>, case: &str) -> Result<u32> {
    names
        .position(|n| n == case)
        .map(|i| i as u32)
        .ok_or_else(|| WitxError::UnknownCase(case.to_string()))
}

/// Flat core value of a non-string scalar, with range checks.
fn flat_scalar(s: Scalar, value: &Value) -> Result<CoreValue> {
    let mismatch = || WitxError::mismatch(s.name(), value.kind());
    match s {
        Scalar::Bool => match value {
            Value::Bool(b) => Ok(CoreValue::I32(*b as i32)),
            _ => Err(mismatch()),
        },
        Scalar::Char => match value {
            Value::Char(c) => Ok(CoreValue::I32(*c as u32 as i32)),
            _ => Err(mismatch()),
        },
        Scalar::F32 => {
            let v = float_of(value).ok_or_else(mismatch)?;
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(WitxError::OutOfRange {
                    ty: "f32",
                    value: v.to_string(),
                });
            }
            Ok(CoreValue::F32(v as f32))
        }
        Scalar::F64 => Ok(CoreValue::F64(float_of(value).ok_or_else(mismatch)?)),
        Scalar::String => Err(mismatch()),
        _ => {
            let v = value.as_integer().ok_or_else(mismatch)?;
            let (min, max) = s.int_range().ok_or_else(mismatch)?;
            if v < min || v > max {
                return Err(WitxError::OutOfRange {
                    ty: s.name(),
                    value: v.to_string(),
                });
            }
            Ok(match s {
                Scalar::S64 | Scalar::U64 => CoreValue::I64(v as i64),
                _ => CoreValue::I32(v as i32),
            })
        }
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match *value {
        Value::F32(v) => Some(v.into()),
        Value::F64(v) => Some(v),
        _ => value.as_integer().map(|i| i as f64),
    }
}
