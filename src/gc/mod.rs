//! Reference values and garbage-collected struct/array primitives.
//!
//! Every reference a module manipulates travels as one 64-bit word whose
//! bit pattern couples externref, funcref, i31ref and heap references.
//! The encoding is kept opaque to the rest of the crate: everything goes
//! through [`RefValue`] and the `encode_*` functions, never raw bit
//! fiddling at call sites.

mod heap;
pub mod libcalls;
mod types;

pub use heap::{clear_heap, set_heap, GcHeap, GcObject};
pub use types::{
    canonical_types_match, clear_cache, ref_test, set_canonical_indices, set_type_cache, ElemTag,
    TypeCacheEntry, TypeKind, ANYREF, ARRAYREF, EQREF, EXTERNREF, FUNCREF, I31REF, NOEXTERN,
    NOFUNC, NULLREF, STRUCTREF, TYPE_CACHE_STRIDE,
};

use core::ffi::c_void;

/// Serializes tests that touch the process-global heap and type cache.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

const TAG_EXTERNREF: u64 = 1 << 62;
const TAG_NATIVE_FUNCREF: u64 = 1 << 61;

/// A decoded reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefValue {
    Null,
    /// Host-supplied opaque externref payload (without the tag bit).
    Extern(u64),
    /// A table funcref holding a tagged native code pointer.
    NativeFunc(*const c_void),
    /// An IR-encoded function reference, carrying the function index.
    IrFunc(u32),
    /// A 31-bit signed integer reference.
    I31(i32),
    /// A heap struct or array, identified by a 1-based `gc_ref`.
    Heap(u64),
}

/// Decodes the 64-bit reference encoding.
pub fn decode(bits: u64) -> RefValue {
    if bits == 0 {
        return RefValue::Null;
    }
    if bits & TAG_EXTERNREF != 0 && (bits as i64) >= 0 {
        return RefValue::Extern(bits & !TAG_EXTERNREF);
    }
    if bits & TAG_NATIVE_FUNCREF != 0 && bits & TAG_EXTERNREF == 0 && (bits as i64) >= 0 {
        return RefValue::NativeFunc((bits & !TAG_NATIVE_FUNCREF) as usize as *const c_void);
    }
    if (bits as i64) < 0 {
        // −(func_index + 1)
        return RefValue::IrFunc((-(bits as i64) - 1) as u32);
    }
    if bits & 1 != 0 {
        // sign-extend the 31-bit payload
        let payload = (bits >> 1) as u32 & 0x7FFF_FFFF;
        let value = ((payload << 1) as i32) >> 1;
        return RefValue::I31(value);
    }
    RefValue::Heap(bits >> 1)
}

pub fn encode_extern(payload: u64) -> u64 {
    TAG_EXTERNREF | payload
}

pub fn encode_native_funcref(func: *const c_void) -> u64 {
    TAG_NATIVE_FUNCREF | func as usize as u64
}

pub fn encode_ir_funcref(func_index: u32) -> u64 {
    (-(i64::from(func_index) + 1)) as u64
}

pub fn encode_i31(value: i32) -> u64 {
    (((value as u32) & 0x7FFF_FFFF) as u64) << 1 | 1
}

/// Encodes a 1-based heap identity. The shift guarantees no collision
/// with null, i31 or the funcref tags.
pub fn encode_heap(gc_ref: u64) -> u64 {
    debug_assert!(gc_ref >= 1);
    debug_assert!(gc_ref < 1 << 60);
    gc_ref << 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_zero() {
        assert_eq!(decode(0), RefValue::Null);
    }

    #[test]
    fn extern_round_trip() {
        assert_eq!(decode(encode_extern(0x1234)), RefValue::Extern(0x1234));
    }

    #[test]
    fn native_funcref_round_trip() {
        let ptr = 0x0000_7fff_dead_beef_usize as *const c_void;
        assert_eq!(decode(encode_native_funcref(ptr)), RefValue::NativeFunc(ptr));
    }

    #[test]
    fn ir_funcref_round_trip() {
        assert_eq!(decode(encode_ir_funcref(0)), RefValue::IrFunc(0));
        assert_eq!(decode(encode_ir_funcref(41)), RefValue::IrFunc(41));
        assert_eq!(encode_ir_funcref(0) as i64, -1);
    }

    #[test]
    fn i31_round_trip_signed() {
        for v in [0, 1, -1, 0x3FFF_FFFF, -0x4000_0000] {
            assert_eq!(decode(encode_i31(v)), RefValue::I31(v), "{v}");
            assert_eq!(encode_i31(v) & 1, 1);
        }
    }

    #[test]
    fn heap_refs_are_even_and_untagged() {
        for gc_ref in [1, 2, 1000, u32::MAX as u64] {
            let bits = encode_heap(gc_ref);
            assert_eq!(bits & 1, 0);
            assert_eq!(bits & TAG_EXTERNREF, 0);
            assert_eq!(bits & TAG_NATIVE_FUNCREF, 0);
            assert!(bits >= 2);
            assert_eq!(decode(bits), RefValue::Heap(gc_ref));
        }
    }
}
