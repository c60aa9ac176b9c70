//! Canonical ABI: flattening, memory layout, lifting and lowering.
//!
//! Two representations exist for every type:
//!
//! - **flat**: the sequence of core values used for call arguments and direct
//!   results ([`TypeDesc::flat_types`])
//! - **memory**: the byte layout used inside linear memory for list elements
//!   and anything nested in them ([`TypeDesc::size`], [`TypeDesc::align`])
//!
//! Strings and lists are always `(ptr, len)` in both forms, with their
//! contents elsewhere in linear memory.

mod lift;
mod lower;

pub use lift::{lift, Flat, Lifter};
pub use lower::{lower, Lowerer};

use crate::error::{Result, WitxError};
use crate::memory::Memory;
use crate::types::{Scalar, TypeDesc};
use crate::value::{CoreType, CoreValue};

pub(crate) fn align_to(offset: u32, align: u32) -> u32 {
    offset.div_ceil(align) * align
}

/// Payload types of a variant-like descriptor, indexed by discriminant.
pub(crate) fn case_types(ty: &TypeDesc) -> Option<Vec<Option<&TypeDesc>>> {
    match ty {
        TypeDesc::Variant(cases) => Some(cases.iter().map(|c| c.ty.as_ref()).collect()),
        TypeDesc::Enum(names) => Some(vec![None; names.len()]),
        TypeDesc::Option(inner) => Some(vec![None, Some(inner.as_ref())]),
        TypeDesc::Result { ok, err } => Some(vec![ok.as_deref(), err.as_deref()]),
        TypeDesc::Union(items) => Some(items.iter().map(Some).collect()),
        _ => None,
    }
}

pub(crate) fn discriminant_size(cases: usize) -> u32 {
    if cases <= 1 << 8 {
        1
    } else if cases <= 1 << 16 {
        2
    } else {
        4
    }
}

fn max_case_align(cases: &[Option<&TypeDesc>]) -> u32 {
    cases.iter().flatten().map(|t| t.align()).max().unwrap_or(1)
}

/// Byte offset of a variant payload from the start of the value.
pub(crate) fn payload_offset(cases: &[Option<&TypeDesc>]) -> u32 {
    align_to(discriminant_size(cases.len()), max_case_align(cases))
}

/// Joined flat types of all case payloads, excluding the discriminant.
pub(crate) fn payload_flat(cases: &[Option<&TypeDesc>]) -> Vec<CoreType> {
    let mut joined: Vec<CoreType> = Vec::new();
    for case in cases.iter().flatten() {
        for (i, ty) in case.flat_types().into_iter().enumerate() {
            match joined.get_mut(i) {
                Some(slot) => *slot = slot.join(ty),
                None => joined.push(ty),
            }
        }
    }
    joined
}

/// Lists of zero-sized elements carry a length with no bytes behind it.
pub(crate) fn zero_sized_list() -> WitxError {
    WitxError::InvalidSchema("list elements must occupy memory".into())
}

pub(crate) fn flag_words(count: usize) -> usize {
    count.div_ceil(32)
}

/// Offsets of consecutive fields laid out with natural alignment.
pub(crate) fn field_offsets<'a>(types: impl IntoIterator<Item = &'a TypeDesc>) -> Vec<u32> {
    let mut offset = 0;
    types
        .into_iter()
        .map(|ty| {
            offset = align_to(offset, ty.align());
            let at = offset;
            offset += ty.size();
            at
        })
        .collect()
}

impl TypeDesc {
    /// Alignment in linear memory.
    pub fn align(&self) -> u32 {
        match self {
            TypeDesc::Scalar(s) => match s {
                Scalar::Bool | Scalar::S8 | Scalar::U8 => 1,
                Scalar::S16 | Scalar::U16 => 2,
                Scalar::S32 | Scalar::U32 | Scalar::F32 | Scalar::Char | Scalar::String => 4,
                Scalar::S64 | Scalar::U64 | Scalar::F64 => 8,
            },
            TypeDesc::List(_) => 4,
            TypeDesc::Tuple(items) => items.iter().map(Self::align).max().unwrap_or(1),
            TypeDesc::Record(fields) => fields.iter().map(|f| f.ty.align()).max().unwrap_or(1),
            TypeDesc::Flags(names) => match names.len() {
                0..=8 => 1,
                9..=16 => 2,
                _ => 4,
            },
            TypeDesc::Named(_) => 1,
            _ => {
                let cases = case_types(self).unwrap_or_default();
                discriminant_size(cases.len()).max(max_case_align(&cases))
            }
        }
    }

    /// Size in linear memory; always a multiple of [`TypeDesc::align`].
    pub fn size(&self) -> u32 {
        match self {
            TypeDesc::Scalar(s) => match s {
                Scalar::Bool | Scalar::S8 | Scalar::U8 => 1,
                Scalar::S16 | Scalar::U16 => 2,
                Scalar::S32 | Scalar::U32 | Scalar::F32 | Scalar::Char => 4,
                Scalar::S64 | Scalar::U64 | Scalar::F64 | Scalar::String => 8,
            },
            TypeDesc::List(_) => 8,
            TypeDesc::Tuple(items) => aggregate_size(items.iter(), self.align()),
            TypeDesc::Record(fields) => aggregate_size(fields.iter().map(|f| &f.ty), self.align()),
            TypeDesc::Flags(names) => match names.len() {
                0 => 0,
                1..=8 => 1,
                9..=16 => 2,
                n => 4 * flag_words(n) as u32,
            },
            TypeDesc::Named(_) => 0,
            _ => {
                let cases = case_types(self).unwrap_or_default();
                let payload = cases.iter().flatten().map(|t| t.size()).max().unwrap_or(0);
                align_to(payload_offset(&cases) + payload, self.align())
            }
        }
    }

    /// Core value kinds this type occupies when passed flat.
    pub fn flat_types(&self) -> Vec<CoreType> {
        let mut out = Vec::new();
        self.push_flat(&mut out);
        out
    }

    /// Number of core values this type occupies when passed flat.
    pub fn flat_count(&self) -> usize {
        self.flat_types().len()
    }

    fn push_flat(&self, out: &mut Vec<CoreType>) {
        match self {
            TypeDesc::Scalar(s) => match s {
                Scalar::S64 | Scalar::U64 => out.push(CoreType::I64),
                Scalar::F32 => out.push(CoreType::F32),
                Scalar::F64 => out.push(CoreType::F64),
                Scalar::String => out.extend([CoreType::I32, CoreType::I32]),
                _ => out.push(CoreType::I32),
            },
            TypeDesc::List(_) => out.extend([CoreType::I32, CoreType::I32]),
            TypeDesc::Tuple(items) => items.iter().for_each(|t| t.push_flat(out)),
            TypeDesc::Record(fields) => fields.iter().for_each(|f| f.ty.push_flat(out)),
            TypeDesc::Flags(names) => {
                out.extend(std::iter::repeat(CoreType::I32).take(flag_words(names.len())))
            }
            TypeDesc::Named(_) => {}
            _ => {
                let cases = case_types(self).unwrap_or_default();
                out.push(CoreType::I32);
                out.extend(payload_flat(&cases));
            }
        }
    }
}

fn aggregate_size<'a>(types: impl Iterator<Item = &'a TypeDesc>, align: u32) -> u32 {
    let mut offset = 0;
    for ty in types {
        offset = align_to(offset, ty.align()) + ty.size();
    }
    align_to(offset, align)
}

/// Placement of a function's flattened results behind a return pointer.
///
/// Each flattened value gets its own fixed-size slot, in result order, so
/// result `k` starts at `slot_size * (flat values of results 0..k)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnArea {
    slot_size: u32,
    slots: Vec<CoreType>,
    starts: Vec<u32>,
}

/// Smallest return-area slot that holds every core value kind.
pub const MIN_RETURN_SLOT: u32 = 8;

impl ReturnArea {
    /// Lay out `results`; `slot_size` is raised to [`MIN_RETURN_SLOT`].
    pub fn new(results: &[TypeDesc], slot_size: u32) -> Self {
        let slot_size = slot_size.max(MIN_RETURN_SLOT);
        let mut slots = Vec::new();
        let mut starts = Vec::with_capacity(results.len());
        for ty in results {
            starts.push(slots.len() as u32 * slot_size);
            ty.push_flat(&mut slots);
        }
        Self {
            slot_size,
            slots,
            starts,
        }
    }

    /// Total bytes covered.
    pub fn size(&self) -> u32 {
        self.slots.len() as u32 * self.slot_size
    }

    /// Byte offset of each result.
    pub fn result_offsets(&self) -> &[u32] {
        &self.starts
    }

    /// Read every slot starting at `base` into one flat stream.
    pub fn read<M: Memory + ?Sized>(&self, memory: &M, base: u32) -> Result<Vec<CoreValue>> {
        memory.check_range(base, self.size().into())?;
        self.slots
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let at = base + i as u32 * self.slot_size;
                Ok(match ty {
                    CoreType::I32 => CoreValue::I32(memory.read_u32(at)? as i32),
                    CoreType::I64 => CoreValue::I64(memory.read_u64(at)? as i64),
                    CoreType::F32 => CoreValue::F32(memory.read_f32(at)?),
                    CoreType::F64 => CoreValue::F64(memory.read_f64(at)?),
                })
            })
            .collect()
    }
}
