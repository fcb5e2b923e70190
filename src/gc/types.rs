//! The GC type cache: a dense, process-global view of the module's type
//! section, just deep enough to run subtype tests and size array
//! elements. Populated by the host after compilation, consulted by the
//! `ref.test`/`ref.cast` libcalls and the array constructors.

use crate::gc::{decode, RefValue};
use crate::Error;
use spin::RwLock;

/// Abstract heap types carry negative indices; concrete (declared) types
/// are the non-negative ones.
pub const ANYREF: i64 = -1;
pub const EQREF: i64 = -2;
pub const I31REF: i64 = -3;
pub const STRUCTREF: i64 = -4;
pub const ARRAYREF: i64 = -5;
pub const FUNCREF: i64 = -6;
pub const EXTERNREF: i64 = -7;
/// Bottom of the `any` hierarchy.
pub const NULLREF: i64 = -8;
/// Bottom of the `func` hierarchy.
pub const NOFUNC: i64 = -9;
/// Bottom of the `extern` hierarchy.
pub const NOEXTERN: i64 = -10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Func = 0,
    Struct = 1,
    Array = 2,
}

impl TypeKind {
    fn from_i64(v: i64) -> Option<TypeKind> {
        match v {
            0 => Some(TypeKind::Func),
            1 => Some(TypeKind::Struct),
            2 => Some(TypeKind::Array),
            _ => None,
        }
    }
}

/// Element representation of array types (and the field count of struct
/// types reuses `field_count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemTag {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    Ref = 6,
}

impl ElemTag {
    fn from_i64(v: i64) -> Option<ElemTag> {
        match v {
            0 => Some(ElemTag::I8),
            1 => Some(ElemTag::I16),
            2 => Some(ElemTag::I32),
            3 => Some(ElemTag::I64),
            4 => Some(ElemTag::F32),
            5 => Some(ElemTag::F64),
            6 => Some(ElemTag::Ref),
            _ => None,
        }
    }

    pub fn byte_size(self) -> u32 {
        match self {
            ElemTag::I8 => 1,
            ElemTag::I16 => 2,
            ElemTag::I32 | ElemTag::F32 => 4,
            ElemTag::I64 | ElemTag::F64 | ElemTag::Ref => 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TypeCacheEntry {
    /// Supertype index; negative when the type has no declared super. A
    /// self-referential index also terminates the chain.
    pub super_idx: i64,
    pub kind: TypeKind,
    /// Struct field count or array element count hint.
    pub field_count: u32,
    /// Array element byte size.
    pub elem_size: u32,
    pub elem_tag: ElemTag,
}

/// Number of `i64` slots each type occupies in the flat array handed to
/// [`set_type_cache`].
pub const TYPE_CACHE_STRIDE: usize = 5;

#[derive(Debug, Default)]
struct TypeCache {
    entries: Vec<TypeCacheEntry>,
    canonical: Vec<i64>,
}

static CACHE: RwLock<TypeCache> = RwLock::new(TypeCache {
    entries: Vec::new(),
    canonical: Vec::new(),
});

/// Installs the type cache from a flat array of
/// [`TYPE_CACHE_STRIDE`]-sized records: `super_idx, kind, count,
/// elem_size, elem_tag` per declared type.
///
/// Supertype chains are validated here so the subtype walker can be a
/// plain loop: a chain must reach a negative or self-referential index
/// within `n_types` steps.
pub fn set_type_cache(flat: &[i64]) -> crate::Result<()> {
    if flat.len() % TYPE_CACHE_STRIDE != 0 {
        return Err(Error::InvalidTypeCache);
    }
    let n_types = flat.len() / TYPE_CACHE_STRIDE;

    let mut entries = Vec::with_capacity(n_types);
    for record in flat.chunks_exact(TYPE_CACHE_STRIDE) {
        let kind = TypeKind::from_i64(record[1]).ok_or(Error::InvalidTypeCache)?;
        let elem_tag = ElemTag::from_i64(record[4]).unwrap_or(ElemTag::I8);
        entries.push(TypeCacheEntry {
            super_idx: record[0],
            kind,
            field_count: u32::try_from(record[2]).map_err(|_| Error::InvalidTypeCache)?,
            elem_size: u32::try_from(record[3]).map_err(|_| Error::InvalidTypeCache)?,
            elem_tag,
        });
    }

    for (idx, entry) in entries.iter().enumerate() {
        let mut current = idx as i64;
        let mut super_idx = entry.super_idx;
        let mut steps = 0;
        while super_idx >= 0 && super_idx != current {
            if super_idx as usize >= n_types || steps > n_types {
                return Err(Error::InvalidTypeCache);
            }
            current = super_idx;
            super_idx = entries[super_idx as usize].super_idx;
            steps += 1;
        }
    }

    let mut cache = CACHE.write();
    cache.entries = entries;
    if cache.canonical.len() != n_types {
        // Identity mapping until the host provides real canonical classes.
        cache.canonical = (0..n_types as i64).collect();
    }
    tracing::trace!(n_types, "installed gc type cache");
    Ok(())
}

/// Installs the canonical-index array mapping each declared type to its
/// structural equivalence class.
pub fn set_canonical_indices(canonical: &[i64]) -> crate::Result<()> {
    let mut cache = CACHE.write();
    if !cache.entries.is_empty() && cache.entries.len() != canonical.len() {
        return Err(Error::InvalidTypeCache);
    }
    cache.canonical = canonical.to_vec();
    Ok(())
}

pub fn clear_cache() {
    let mut cache = CACHE.write();
    cache.entries = Vec::new();
    cache.canonical = Vec::new();
}

pub(crate) fn lookup_entry(type_idx: i64) -> Option<TypeCacheEntry> {
    if type_idx < 0 {
        return None;
    }
    CACHE.read().entries.get(type_idx as usize).copied()
}

fn canonical_of(cache: &TypeCache, type_idx: i64) -> i64 {
    if type_idx < 0 {
        return type_idx;
    }
    cache
        .canonical
        .get(type_idx as usize)
        .copied()
        .unwrap_or(type_idx)
}

/// Do two declared type indices refer to the same structural class?
pub fn canonical_types_match(a: i64, b: i64) -> bool {
    if a == b {
        return true;
    }
    if a < 0 || b < 0 {
        return false;
    }
    let cache = CACHE.read();
    canonical_of(&cache, a) == canonical_of(&cache, b)
}

/// Walks the supertype chain from `obj_type`, comparing canonical
/// indices against `target`. Chains were validated at population time,
/// so a self-referential super index is the terminator.
fn concrete_matches(obj_type: i64, target: i64) -> bool {
    let cache = CACHE.read();
    let target_canon = canonical_of(&cache, target);
    let mut current = obj_type;
    loop {
        if canonical_of(&cache, current) == target_canon {
            return true;
        }
        let Some(entry) = cache.entries.get(current as usize) else {
            return false;
        };
        if entry.super_idx < 0 || entry.super_idx == current {
            return false;
        }
        current = entry.super_idx;
    }
}

/// The `ref.test` predicate over the 64-bit reference encoding.
///
/// `target` is a declared type index or one of the negative abstract
/// tags; `nullable` decides whether null passes.
pub fn ref_test(bits: u64, target: i64, nullable: bool) -> bool {
    match decode(bits) {
        RefValue::Null => nullable,
        RefValue::Extern(_) => matches!(target, EXTERNREF | ANYREF),
        RefValue::NativeFunc(_) | RefValue::IrFunc(_) => target == FUNCREF,
        RefValue::I31(_) => matches!(target, I31REF | EQREF | ANYREF | EXTERNREF),
        RefValue::Heap(gc_ref) => {
            let Some((kind, obj_type)) = super::heap::kind_and_type(gc_ref) else {
                return false;
            };
            if target >= 0 {
                return concrete_matches(obj_type, target);
            }
            match target {
                ANYREF => true,
                EQREF => matches!(kind, TypeKind::Struct | TypeKind::Array),
                STRUCTREF => kind == TypeKind::Struct,
                ARRAYREF => kind == TypeKind::Array,
                // Conversion path: structs and arrays may flow out as extern.
                EXTERNREF => matches!(kind, TypeKind::Struct | TypeKind::Array),
                _ => false,
            }
        }
    }
}
