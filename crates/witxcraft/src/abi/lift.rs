//! Lifting: core values and linear memory -> host values.

use super::{
    case_types, discriminant_size, field_offsets, flag_words, payload_flat, payload_offset,
    zero_sized_list,
};
use crate::allocator::Allocation;
use crate::error::{Result, WitxError};
use crate::memory::Memory;
use crate::types::{Scalar, TypeDesc};
use crate::value::{CoreType, CoreValue, Value};

/// Cursor over a flat core-value stream.
#[derive(Debug, Clone)]
pub struct Flat<'v> {
    values: &'v [CoreValue],
}

impl<'v> Flat<'v> {
    pub fn new(values: &'v [CoreValue]) -> Self {
        Self { values }
    }

    /// Values not consumed yet.
    pub fn remaining(&self) -> &'v [CoreValue] {
        self.values
    }

    fn next(&mut self, want: CoreType) -> Result<CoreValue> {
        let (first, rest) = self
            .values
            .split_first()
            .ok_or_else(|| WitxError::mismatch(want.to_string(), "end of core values"))?;
        if first.ty() != want {
            return Err(WitxError::mismatch(want.to_string(), first.ty().to_string()));
        }
        self.values = rest;
        Ok(*first)
    }

    fn next_i32(&mut self) -> Result<i32> {
        match self.next(CoreType::I32)? {
            CoreValue::I32(v) => Ok(v),
            _ => unreachable!("next() checked the kind"),
        }
    }

    fn next_i64(&mut self) -> Result<i64> {
        match self.next(CoreType::I64)? {
            CoreValue::I64(v) => Ok(v),
            _ => unreachable!("next() checked the kind"),
        }
    }
}

/// Lift one value from the front of `core_values`, returning it together
/// with the values it did not consume.
///
/// Buffers referenced by the value are only read; use [`Lifter`] directly to
/// learn which of them the caller now owns.
pub fn lift<'v, M: Memory + ?Sized>(
    ty: &TypeDesc,
    core_values: &'v [CoreValue],
    memory: &M,
) -> Result<(Value, &'v [CoreValue])> {
    let mut src = Flat::new(core_values);
    let value = Lifter::new(memory).lift(ty, &mut src)?;
    Ok((value, src.remaining()))
}

/// Lifting state for one call: the memory to read and every guest buffer
/// consumed so far.
pub struct Lifter<'m, M: Memory + ?Sized> {
    memory: &'m M,
    owned: Vec<Allocation>,
}

impl<'m, M: Memory + ?Sized> Lifter<'m, M> {
    pub fn new(memory: &'m M) -> Self {
        Self {
            memory,
            owned: Vec::new(),
        }
    }

    /// Guest buffers read so far, as `(ptr, byte size, align)`.
    pub fn owned(&self) -> &[Allocation] {
        &self.owned
    }

    pub fn into_owned(self) -> Vec<Allocation> {
        self.owned
    }

    /// Lift a value from the flat stream.
    pub fn lift(&mut self, ty: &TypeDesc, src: &mut Flat<'_>) -> Result<Value> {
        match ty {
            TypeDesc::Scalar(Scalar::String) => {
                let (ptr, len) = (src.next_i32()? as u32, src.next_i32()? as u32);
                self.string(ptr, len)
            }
            TypeDesc::Scalar(s) => lift_scalar(*s, src),
            TypeDesc::List(elem) => {
                let (ptr, len) = (src.next_i32()? as u32, src.next_i32()? as u32);
                self.list(elem, ptr, len)
            }
            TypeDesc::Tuple(items) => Ok(Value::Tuple(
                items
                    .iter()
                    .map(|t| self.lift(t, src))
                    .collect::<Result<_>>()?,
            )),
            TypeDesc::Record(fields) => Ok(Value::Record(
                fields
                    .iter()
                    .map(|f| Ok((f.name.clone(), self.lift(&f.ty, src)?)))
                    .collect::<Result<_>>()?,
            )),
            TypeDesc::Flags(names) => {
                let mut words = Vec::with_capacity(flag_words(names.len()));
                for _ in 0..flag_words(names.len()) {
                    words.push(src.next_i32()? as u32);
                }
                Ok(unpack_flags(names, &words))
            }
            TypeDesc::Named(name) => Err(WitxError::UnresolvedType(name.clone())),
            _ => {
                let cases = case_types(ty).unwrap_or_default();
                let disc = src.next_i32()? as u32;
                let joined = payload_flat(&cases);
                let mut slots = Vec::with_capacity(joined.len());
                for want in &joined {
                    slots.push(src.next(*want)?);
                }
                let payload_ty = active_case(&cases, disc)?;
                let payload = match payload_ty {
                    Some(t) => {
                        let narrowed: Vec<CoreValue> = t
                            .flat_types()
                            .into_iter()
                            .zip(&slots)
                            .map(|(want, v)| v.narrow(want))
                            .collect();
                        Some(self.lift(t, &mut Flat::new(&narrowed))?)
                    }
                    None => None,
                };
                make_case(ty, disc, payload)
            }
        }
    }

    /// Lift a value stored in linear memory at `addr`.
    pub fn load(&mut self, ty: &TypeDesc, addr: u32) -> Result<Value> {
        let mem = self.memory;
        match ty {
            TypeDesc::Scalar(s) => match s {
                Scalar::Bool => Ok(Value::Bool(mem.read_u8(addr)? != 0)),
                Scalar::S8 => Ok(Value::S8(mem.read_u8(addr)? as i8)),
                Scalar::U8 => Ok(Value::U8(mem.read_u8(addr)?)),
                Scalar::S16 => Ok(Value::S16(mem.read_u16(addr)? as i16)),
                Scalar::U16 => Ok(Value::U16(mem.read_u16(addr)?)),
                Scalar::S32 => Ok(Value::S32(mem.read_u32(addr)? as i32)),
                Scalar::U32 => Ok(Value::U32(mem.read_u32(addr)?)),
                Scalar::S64 => Ok(Value::S64(mem.read_u64(addr)? as i64)),
                Scalar::U64 => Ok(Value::U64(mem.read_u64(addr)?)),
                Scalar::F32 => Ok(Value::F32(mem.read_f32(addr)?)),
                Scalar::F64 => Ok(Value::F64(mem.read_f64(addr)?)),
                Scalar::Char => char_value(mem.read_u32(addr)?),
                Scalar::String => {
                    let (ptr, len) = (mem.read_u32(addr)?, mem.read_u32(at(addr, 4)?)?);
                    self.string(ptr, len)
                }
            },
            TypeDesc::List(elem) => {
                let (ptr, len) = (mem.read_u32(addr)?, mem.read_u32(at(addr, 4)?)?);
                self.list(elem, ptr, len)
            }
            TypeDesc::Tuple(items) => {
                let offsets = field_offsets(items.iter());
                let mut out = Vec::with_capacity(items.len());
                for (t, off) in items.iter().zip(offsets) {
                    out.push(self.load(t, at(addr, off)?)?);
                }
                Ok(Value::Tuple(out))
            }
            TypeDesc::Record(fields) => {
                let offsets = field_offsets(fields.iter().map(|f| &f.ty));
                let mut out = Vec::with_capacity(fields.len());
                for (f, off) in fields.iter().zip(offsets) {
                    out.push((f.name.clone(), self.load(&f.ty, at(addr, off)?)?));
                }
                Ok(Value::Record(out))
            }
            TypeDesc::Flags(names) => {
                let words = match names.len() {
                    0 => vec![],
                    1..=8 => vec![u32::from(mem.read_u8(addr)?)],
                    9..=16 => vec![u32::from(mem.read_u16(addr)?)],
                    n => (0..flag_words(n) as u32)
                        .map(|w| mem.read_u32(at(addr, w * 4)?))
                        .collect::<Result<_>>()?,
                };
                Ok(unpack_flags(names, &words))
            }
            TypeDesc::Named(name) => Err(WitxError::UnresolvedType(name.clone())),
            _ => {
                let cases = case_types(ty).unwrap_or_default();
                let disc = match discriminant_size(cases.len()) {
                    1 => u32::from(mem.read_u8(addr)?),
                    2 => u32::from(mem.read_u16(addr)?),
                    _ => mem.read_u32(addr)?,
                };
                let payload = match active_case(&cases, disc)? {
                    Some(t) => Some(self.load(t, at(addr, payload_offset(&cases))?)?),
                    None => None,
                };
                make_case(ty, disc, payload)
            }
        }
    }

    fn string(&mut self, ptr: u32, len: u32) -> Result<Value> {
        if len == 0 {
            return Ok(Value::String(String::new()));
        }
        let bytes = self.memory.read_bytes(ptr, len)?;
        self.owned.push(Allocation {
            ptr,
            size: len,
            align: 1,
        });
        String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|e| WitxError::InvalidEncoding(e.to_string()))
    }

    fn list(&mut self, elem: &TypeDesc, ptr: u32, len: u32) -> Result<Value> {
        let stride = elem.size();
        if stride == 0 {
            return Err(zero_sized_list());
        }
        if len == 0 {
            return Ok(Value::List(Vec::new()));
        }
        let total = u64::from(len) * u64::from(stride);
        self.memory.check_range(ptr, total)?;
        self.owned.push(Allocation {
            ptr,
            size: total as u32,
            align: elem.align(),
        });
        let mut items = Vec::with_capacity(len as usize);
        for i in 0..len {
            items.push(self.load(elem, ptr + i * stride)?);
        }
        Ok(Value::List(items))
    }
}

fn at(addr: u32, offset: u32) -> Result<u32> {
    addr.checked_add(offset)
        .ok_or(WitxError::MemoryAccessOutOfBounds {
            offset: addr.into(),
            len: offset.into(),
            size: u32::MAX as usize,
        })
}

fn char_value(code: u32) -> Result<Value> {
    char::from_u32(code)
        .map(Value::Char)
        .ok_or(WitxError::InvalidScalarValue(code))
}

fn lift_scalar(s: Scalar, src: &mut Flat<'_>) -> Result<Value> {
    Ok(match s {
        Scalar::Bool => Value::Bool(src.next_i32()? != 0),
        Scalar::S8 => Value::S8(src.next_i32()? as i8),
        Scalar::U8 => Value::U8(src.next_i32()? as u8),
        Scalar::S16 => Value::S16(src.next_i32()? as i16),
        Scalar::U16 => Value::U16(src.next_i32()? as u16),
        Scalar::S32 => Value::S32(src.next_i32()?),
        Scalar::U32 => Value::U32(src.next_i32()? as u32),
        Scalar::S64 => Value::S64(src.next_i64()?),
        Scalar::U64 => Value::U64(src.next_i64()? as u64),
        Scalar::F32 => match src.next(CoreType::F32)? {
            CoreValue::F32(v) => Value::F32(v),
            _ => unreachable!("next() checked the kind"),
        },
        Scalar::F64 => match src.next(CoreType::F64)? {
            CoreValue::F64(v) => Value::F64(v),
            _ => unreachable!("next() checked the kind"),
        },
        Scalar::Char => char_value(src.next_i32()? as u32)?,
        Scalar::String => unreachable!("strings are lifted through Lifter::string"),
    })
}

fn active_case<'t>(cases: &[Option<&'t TypeDesc>], disc: u32) -> Result<Option<&'t TypeDesc>> {
    cases
        .get(disc as usize)
        .copied()
        .ok_or(WitxError::UnknownDiscriminant {
            discriminant: disc,
            cases: cases.len(),
        })
}

fn unpack_flags(names: &[String], words: &[u32]) -> Value {
    Value::Flags(
        names
            .iter()
            .enumerate()
            .filter(|(i, _)| words.get(i / 32).map_or(false, |w| w & (1 << (i % 32)) != 0))
            .map(|(_, name)| name.clone())
            .collect(),
    )
}

fn make_case(ty: &TypeDesc, disc: u32, payload: Option<Value>) -> Result<Value> {
    let payload = payload.map(Box::new);
    Ok(match ty {
        TypeDesc::Variant(cases) => Value::Variant {
            case: cases[disc as usize].name.clone(),
            payload,
        },
        TypeDesc::Enum(names) => Value::Enum(names[disc as usize].clone()),
        TypeDesc::Option(_) => Value::Option(payload),
        TypeDesc::Result { .. } if disc == 0 => Value::Result(Ok(payload)),
        TypeDesc::Result { .. } => Value::Result(Err(payload)),
        TypeDesc::Union(_) => Value::Union {
            case: disc,
            value: payload.ok_or_else(|| WitxError::mismatch("union payload", "none"))?,
        },
        other => return Err(WitxError::mismatch("variant-like type", other.to_string())),
    })
}
