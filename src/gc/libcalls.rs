//! Struct/array allocation and access libcalls plus `ref.test`/`ref.cast`.
//!
//! Each operation exists twice: a `*_checked` body returning
//! `Result<_, Trap>` (unit-testable, host-callable) and an `extern "C"`
//! wrapper in the generated-code ABI that raises the trap through the
//! active trampoline guard. Layout rules for packed arrays follow the
//! element tag: i8/i16 load zero-extended, i32/f32 are 4 little-endian
//! bytes, i64/f64/ref are 8.

use crate::gc::heap::{with_heap, GcObject};
use crate::gc::types::{self, ElemTag, TypeCacheEntry, TypeKind};
use crate::gc::{decode, encode_heap, RefValue};
use crate::vm::trap_handling::unwrap_or_raise;
use crate::vm::{Instance, VMContext};
use crate::Trap;

fn array_entry(type_idx: i64) -> Result<TypeCacheEntry, Trap> {
    let entry = types::lookup_entry(type_idx).ok_or(Trap::BadSignature)?;
    if entry.kind != TypeKind::Array {
        return Err(Trap::BadSignature);
    }
    Ok(entry)
}

fn struct_entry(type_idx: i64) -> Result<TypeCacheEntry, Trap> {
    let entry = types::lookup_entry(type_idx).ok_or(Trap::BadSignature)?;
    if entry.kind != TypeKind::Struct {
        return Err(Trap::BadSignature);
    }
    Ok(entry)
}

fn heap_ref(bits: u64) -> Result<u64, Trap> {
    match decode(bits) {
        RefValue::Heap(gc_ref) => Ok(gc_ref),
        // Null and non-heap references have no fields or elements to
        // access; surface as an out-of-bounds access.
        _ => Err(Trap::MemoryOutOfBounds),
    }
}

fn elem_size_of(entry: &TypeCacheEntry) -> u32 {
    if entry.elem_size != 0 {
        entry.elem_size
    } else {
        entry.elem_tag.byte_size()
    }
}

fn read_elem(data: &[u8], tag: ElemTag, size: u32, idx: u32) -> u64 {
    let off = idx as usize * size as usize;
    match tag {
        ElemTag::I8 => u64::from(data[off]),
        ElemTag::I16 => u64::from(u16::from_le_bytes([data[off], data[off + 1]])),
        ElemTag::I32 | ElemTag::F32 => {
            u64::from(u32::from_le_bytes(data[off..off + 4].try_into().unwrap()))
        }
        ElemTag::I64 | ElemTag::F64 | ElemTag::Ref => {
            u64::from_le_bytes(data[off..off + 8].try_into().unwrap())
        }
    }
}

fn write_elem(data: &mut [u8], tag: ElemTag, size: u32, idx: u32, value: u64) {
    let off = idx as usize * size as usize;
    match tag {
        ElemTag::I8 => data[off] = value as u8,
        ElemTag::I16 => data[off..off + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        ElemTag::I32 | ElemTag::F32 => {
            data[off..off + 4].copy_from_slice(&(value as u32).to_le_bytes());
        }
        ElemTag::I64 | ElemTag::F64 | ElemTag::Ref => {
            data[off..off + 8].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/* ---------------------------- structs ----------------------------- */

pub fn struct_new_checked(type_idx: i64, values: &[u64]) -> Result<u64, Trap> {
    let entry = struct_entry(type_idx)?;
    if values.len() != entry.field_count as usize {
        return Err(Trap::BadSignature);
    }
    let gc_ref = with_heap(|heap| {
        Some(heap.alloc(GcObject::Struct {
            type_idx,
            fields: values.into(),
        }))
    })
    .ok_or(Trap::Unknown)?;
    Ok(encode_heap(gc_ref))
}

pub fn struct_new_default_checked(type_idx: i64) -> Result<u64, Trap> {
    let entry = struct_entry(type_idx)?;
    let gc_ref = with_heap(|heap| {
        Some(heap.alloc(GcObject::Struct {
            type_idx,
            fields: vec![0; entry.field_count as usize].into(),
        }))
    })
    .ok_or(Trap::Unknown)?;
    Ok(encode_heap(gc_ref))
}

pub fn struct_get_checked(bits: u64, field: u32) -> Result<u64, Trap> {
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get(gc_ref)? {
        GcObject::Struct { fields, .. } => fields.get(field as usize).copied(),
        GcObject::Array { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

pub fn struct_set_checked(bits: u64, field: u32, value: u64) -> Result<(), Trap> {
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get_mut(gc_ref)? {
        GcObject::Struct { fields, .. } => {
            let slot = fields.get_mut(field as usize)?;
            *slot = value;
            Some(())
        }
        GcObject::Array { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

/* ----------------------------- arrays ----------------------------- */

fn alloc_array(type_idx: i64, len: u32, fill: Option<u64>) -> Result<u64, Trap> {
    let entry = array_entry(type_idx)?;
    let size = elem_size_of(&entry);
    let byte_len = len as usize * size as usize;
    let mut data = vec![0u8; byte_len];
    if let Some(value) = fill {
        for idx in 0..len {
            write_elem(&mut data, entry.elem_tag, size, idx, value);
        }
    }
    let gc_ref = with_heap(|heap| {
        Some(heap.alloc(GcObject::Array {
            type_idx,
            elem_tag: entry.elem_tag,
            elem_size: size,
            len,
            data: data.into(),
        }))
    })
    .ok_or(Trap::Unknown)?;
    Ok(encode_heap(gc_ref))
}

pub fn array_new_checked(type_idx: i64, len: u32, init: u64) -> Result<u64, Trap> {
    alloc_array(type_idx, len, Some(init))
}

pub fn array_new_default_checked(type_idx: i64, len: u32) -> Result<u64, Trap> {
    alloc_array(type_idx, len, None)
}

pub fn array_len_checked(bits: u64) -> Result<u32, Trap> {
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get(gc_ref)? {
        GcObject::Array { len, .. } => Some(*len),
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

pub fn array_get_checked(bits: u64, idx: u32, signed: bool) -> Result<u64, Trap> {
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get(gc_ref)? {
        GcObject::Array {
            elem_tag,
            elem_size,
            len,
            data,
            ..
        } => {
            if idx >= *len {
                return None;
            }
            let raw = read_elem(data, *elem_tag, *elem_size, idx);
            let value = if signed {
                match elem_tag {
                    ElemTag::I8 => i64::from(raw as u8 as i8) as u64,
                    ElemTag::I16 => i64::from(raw as u16 as i16) as u64,
                    _ => raw,
                }
            } else {
                raw
            };
            Some(value)
        }
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

pub fn array_set_checked(bits: u64, idx: u32, value: u64) -> Result<(), Trap> {
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get_mut(gc_ref)? {
        GcObject::Array {
            elem_tag,
            elem_size,
            len,
            data,
            ..
        } => {
            if idx >= *len {
                return None;
            }
            write_elem(data, *elem_tag, *elem_size, idx, value);
            Some(())
        }
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

pub fn array_fill_checked(bits: u64, dst: u32, value: u64, len: u32) -> Result<(), Trap> {
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get_mut(gc_ref)? {
        GcObject::Array {
            elem_tag,
            elem_size,
            len: arr_len,
            data,
            ..
        } => {
            // zero length is legal right up to the boundary
            if dst > *arr_len || *arr_len - dst < len {
                return None;
            }
            for idx in dst..dst + len {
                write_elem(data, *elem_tag, *elem_size, idx, value);
            }
            Some(())
        }
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

pub fn array_copy_checked(
    dst_bits: u64,
    dst_idx: u32,
    src_bits: u64,
    src_idx: u32,
    len: u32,
) -> Result<(), Trap> {
    let dst_ref = heap_ref(dst_bits)?;
    let src_ref = heap_ref(src_bits)?;
    with_heap(|heap| {
        let (src_size, src_len, src_range) = match heap.get(src_ref)? {
            GcObject::Array {
                elem_size,
                len,
                ..
            } => {
                let start = src_idx as usize * *elem_size as usize;
                let bytes = len;
                (*elem_size, *bytes, start)
            }
            GcObject::Struct { .. } => return None,
        };
        if u64::from(src_len) < u64::from(src_idx) + u64::from(len) {
            return None;
        }

        if dst_ref == src_ref {
            // overlapping copy within one array
            match heap.get_mut(dst_ref)? {
                GcObject::Array {
                    elem_size,
                    len: dst_len,
                    data,
                    ..
                } => {
                    if u64::from(*dst_len) < u64::from(dst_idx) + u64::from(len) {
                        return None;
                    }
                    let size = *elem_size as usize;
                    let count = len as usize * size;
                    let dst_off = dst_idx as usize * size;
                    data.copy_within(src_range..src_range + count, dst_off);
                    Some(())
                }
                GcObject::Struct { .. } => None,
            }
        } else {
            let src_data = match heap.get(src_ref)? {
                GcObject::Array { data, .. } => {
                    data[src_range..src_range + len as usize * src_size as usize].to_vec()
                }
                GcObject::Struct { .. } => return None,
            };
            match heap.get_mut(dst_ref)? {
                GcObject::Array {
                    elem_size,
                    len: dst_len,
                    data,
                    ..
                } => {
                    if *elem_size != src_size
                        || u64::from(*dst_len) < u64::from(dst_idx) + u64::from(len)
                    {
                        return None;
                    }
                    let dst_off = dst_idx as usize * *elem_size as usize;
                    data[dst_off..dst_off + src_data.len()].copy_from_slice(&src_data);
                    Some(())
                }
                GcObject::Struct { .. } => None,
            }
        }
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

/* ----------------------- segment constructors --------------------- */

fn data_segment_bytes<'a>(
    instance: &'a Instance,
    data_idx: u32,
    offset: u32,
    byte_len: u64,
) -> Result<&'a [u8], Trap> {
    let segment = instance
        .data_segments
        .get(data_idx as usize)
        .ok_or(Trap::MemoryOutOfBounds)?;
    let seg_len = if segment.dropped {
        0
    } else {
        segment.bytes.len() as u64
    };
    if seg_len < u64::from(offset) || seg_len - u64::from(offset) < byte_len {
        return Err(Trap::MemoryOutOfBounds);
    }
    Ok(&segment.bytes[offset as usize..(u64::from(offset) + byte_len) as usize])
}

pub fn array_new_data_checked(
    instance: &Instance,
    type_idx: i64,
    data_idx: u32,
    offset: u32,
    len: u32,
) -> Result<u64, Trap> {
    let entry = array_entry(type_idx)?;
    // Reference-typed arrays cannot be seeded from raw bytes.
    if entry.elem_tag == ElemTag::Ref {
        return Err(Trap::BadSignature);
    }
    let size = elem_size_of(&entry);
    let byte_len = u64::from(len) * u64::from(size);
    let bytes = data_segment_bytes(instance, data_idx, offset, byte_len)?;

    let gc_ref = with_heap(|heap| {
        Some(heap.alloc(GcObject::Array {
            type_idx,
            elem_tag: entry.elem_tag,
            elem_size: size,
            len,
            data: bytes.to_vec().into(),
        }))
    })
    .ok_or(Trap::Unknown)?;
    Ok(encode_heap(gc_ref))
}

pub fn array_init_data_checked(
    instance: &Instance,
    bits: u64,
    dst_idx: u32,
    data_idx: u32,
    src_offset: u32,
    len: u32,
) -> Result<(), Trap> {
    let gc_ref = heap_ref(bits)?;
    let (tag, size, arr_len) = with_heap(|heap| match heap.get(gc_ref)? {
        GcObject::Array {
            elem_tag,
            elem_size,
            len,
            ..
        } => Some((*elem_tag, *elem_size, *len)),
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)?;

    if tag == ElemTag::Ref {
        return Err(Trap::BadSignature);
    }
    if u64::from(arr_len) < u64::from(dst_idx) + u64::from(len) {
        return Err(Trap::MemoryOutOfBounds);
    }
    let byte_len = u64::from(len) * u64::from(size);
    let bytes = data_segment_bytes(instance, data_idx, src_offset, byte_len)?.to_vec();

    with_heap(|heap| match heap.get_mut(gc_ref)? {
        GcObject::Array { data, .. } => {
            let dst_off = dst_idx as usize * size as usize;
            data[dst_off..dst_off + bytes.len()].copy_from_slice(&bytes);
            Some(())
        }
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

fn elem_segment_values(
    instance: &Instance,
    elem_idx: u32,
    offset: u32,
    len: u32,
) -> Result<Vec<u64>, Trap> {
    let segment = instance
        .elem_segments
        .get(elem_idx as usize)
        .ok_or(Trap::MemoryOutOfBounds)?;
    let seg_len = if segment.dropped {
        0
    } else {
        segment.entries.len() as u64
    };
    if seg_len < u64::from(offset) || seg_len - u64::from(offset) < u64::from(len) {
        return Err(Trap::MemoryOutOfBounds);
    }
    Ok(segment.entries[offset as usize..offset as usize + len as usize]
        .iter()
        .map(|entry| entry.value)
        .collect())
}

pub fn array_new_elem_checked(
    instance: &Instance,
    type_idx: i64,
    elem_idx: u32,
    offset: u32,
    len: u32,
) -> Result<u64, Trap> {
    let entry = array_entry(type_idx)?;
    if entry.elem_tag != ElemTag::Ref {
        return Err(Trap::BadSignature);
    }
    let values = elem_segment_values(instance, elem_idx, offset, len)?;
    let mut data = vec![0u8; len as usize * 8];
    for (idx, value) in values.iter().enumerate() {
        write_elem(&mut data, ElemTag::Ref, 8, idx as u32, *value);
    }
    let gc_ref = with_heap(|heap| {
        Some(heap.alloc(GcObject::Array {
            type_idx,
            elem_tag: ElemTag::Ref,
            elem_size: 8,
            len,
            data: data.into(),
        }))
    })
    .ok_or(Trap::Unknown)?;
    Ok(encode_heap(gc_ref))
}

pub fn array_init_elem_checked(
    instance: &Instance,
    bits: u64,
    dst_idx: u32,
    elem_idx: u32,
    src_offset: u32,
    len: u32,
) -> Result<(), Trap> {
    let values = elem_segment_values(instance, elem_idx, src_offset, len)?;
    let gc_ref = heap_ref(bits)?;
    with_heap(|heap| match heap.get_mut(gc_ref)? {
        GcObject::Array {
            elem_tag,
            elem_size,
            len: arr_len,
            data,
            ..
        } => {
            if *elem_tag != ElemTag::Ref
                || u64::from(*arr_len) < u64::from(dst_idx) + u64::from(len)
            {
                return None;
            }
            for (idx, value) in values.iter().enumerate() {
                write_elem(data, ElemTag::Ref, *elem_size, dst_idx + idx as u32, *value);
            }
            Some(())
        }
        GcObject::Struct { .. } => None,
    })
    .ok_or(Trap::MemoryOutOfBounds)
}

/* ------------------------- ref.test / cast ------------------------ */

pub fn ref_cast_checked(bits: u64, target: i64, nullable: bool) -> Result<u64, Trap> {
    if types::ref_test(bits, target, nullable) {
        Ok(bits)
    } else {
        Err(Trap::BadSignature)
    }
}

/* ------------------------ extern "C" surface ---------------------- */

pub unsafe extern "C" fn struct_new(
    _vmctx: *mut VMContext,
    type_idx: i64,
    values: *const u64,
    nvalues: u64,
) -> u64 {
    let values = core::slice::from_raw_parts(values, nvalues as usize);
    unwrap_or_raise(struct_new_checked(type_idx, values))
}

pub unsafe extern "C" fn struct_new_default(_vmctx: *mut VMContext, type_idx: i64) -> u64 {
    unwrap_or_raise(struct_new_default_checked(type_idx))
}

pub unsafe extern "C" fn struct_get(_vmctx: *mut VMContext, bits: u64, field: u32) -> u64 {
    unwrap_or_raise(struct_get_checked(bits, field))
}

pub unsafe extern "C" fn struct_set(
    _vmctx: *mut VMContext,
    bits: u64,
    field: u32,
    value: u64,
) {
    unwrap_or_raise(struct_set_checked(bits, field, value));
}

pub unsafe extern "C" fn array_new(
    _vmctx: *mut VMContext,
    type_idx: i64,
    len: u32,
    init: u64,
) -> u64 {
    unwrap_or_raise(array_new_checked(type_idx, len, init))
}

pub unsafe extern "C" fn array_new_default(
    _vmctx: *mut VMContext,
    type_idx: i64,
    len: u32,
) -> u64 {
    unwrap_or_raise(array_new_default_checked(type_idx, len))
}

pub unsafe extern "C" fn array_new_data(
    vmctx: *mut VMContext,
    type_idx: i64,
    data_idx: u32,
    offset: u32,
    len: u32,
) -> u64 {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(array_new_data_checked(instance, type_idx, data_idx, offset, len))
}

pub unsafe extern "C" fn array_new_elem(
    vmctx: *mut VMContext,
    type_idx: i64,
    elem_idx: u32,
    offset: u32,
    len: u32,
) -> u64 {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(array_new_elem_checked(instance, type_idx, elem_idx, offset, len))
}

pub unsafe extern "C" fn array_init_data(
    vmctx: *mut VMContext,
    bits: u64,
    dst_idx: u32,
    data_idx: u32,
    src_offset: u32,
    len: u32,
) {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(array_init_data_checked(
        instance, bits, dst_idx, data_idx, src_offset, len,
    ));
}

pub unsafe extern "C" fn array_init_elem(
    vmctx: *mut VMContext,
    bits: u64,
    dst_idx: u32,
    elem_idx: u32,
    src_offset: u32,
    len: u32,
) {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(array_init_elem_checked(
        instance, bits, dst_idx, elem_idx, src_offset, len,
    ));
}

pub unsafe extern "C" fn array_get(_vmctx: *mut VMContext, bits: u64, idx: u32) -> u64 {
    unwrap_or_raise(array_get_checked(bits, idx, false))
}

pub unsafe extern "C" fn array_get_s(_vmctx: *mut VMContext, bits: u64, idx: u32) -> u64 {
    unwrap_or_raise(array_get_checked(bits, idx, true))
}

pub unsafe extern "C" fn array_set(_vmctx: *mut VMContext, bits: u64, idx: u32, value: u64) {
    unwrap_or_raise(array_set_checked(bits, idx, value));
}

pub unsafe extern "C" fn array_len(_vmctx: *mut VMContext, bits: u64) -> u32 {
    unwrap_or_raise(array_len_checked(bits))
}

pub unsafe extern "C" fn array_fill(
    _vmctx: *mut VMContext,
    bits: u64,
    dst: u32,
    value: u64,
    len: u32,
) {
    unwrap_or_raise(array_fill_checked(bits, dst, value, len));
}

pub unsafe extern "C" fn array_copy(
    _vmctx: *mut VMContext,
    dst_bits: u64,
    dst_idx: u32,
    src_bits: u64,
    src_idx: u32,
    len: u32,
) {
    unwrap_or_raise(array_copy_checked(dst_bits, dst_idx, src_bits, src_idx, len));
}

pub unsafe extern "C" fn ref_test(
    _vmctx: *mut VMContext,
    bits: u64,
    target: i64,
    nullable: i32,
) -> i32 {
    i32::from(types::ref_test(bits, target, nullable != 0))
}

pub unsafe extern "C" fn ref_cast(
    _vmctx: *mut VMContext,
    bits: u64,
    target: i64,
    nullable: i32,
) -> u64 {
    unwrap_or_raise(ref_cast_checked(bits, target, nullable != 0))
}

/// Canonical type-index comparison for indirect-call signature checks.
pub unsafe extern "C" fn type_check(
    _vmctx: *mut VMContext,
    declared: i64,
    expected: i64,
) -> i32 {
    i32::from(types::canonical_types_match(declared, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{set_heap, clear_heap, set_type_cache, clear_cache, GcHeap};

    fn gc_env(records: &[[i64; 5]]) {
        clear_cache();
        clear_heap();
        let flat: Vec<i64> = records.iter().flatten().copied().collect();
        set_type_cache(&flat).unwrap();
        set_heap(GcHeap::new());
    }

    // type 0: struct with 2 fields; type 1: array of i16; type 2: array of ref
    fn default_env() {
        gc_env(&[
            [-1, 1, 2, 0, 0],
            [-1, 2, 0, 2, 1],
            [-1, 2, 0, 8, 6],
        ]);
    }

    #[test]
    fn struct_alloc_and_access() {
        let _guard = crate::gc::test_lock();
        default_env();
        let s = struct_new_checked(0, &[7, 8]).unwrap();
        assert_eq!(struct_get_checked(s, 0), Ok(7));
        assert_eq!(struct_get_checked(s, 1), Ok(8));
        struct_set_checked(s, 1, 99).unwrap();
        assert_eq!(struct_get_checked(s, 1), Ok(99));
        assert_eq!(struct_get_checked(s, 2), Err(Trap::MemoryOutOfBounds));
        assert_eq!(struct_get_checked(0, 0), Err(Trap::MemoryOutOfBounds));
        clear_heap();
    }

    #[test]
    fn array_packed_i16_semantics() {
        let _guard = crate::gc::test_lock();
        default_env();
        let a = array_new_checked(1, 4, 0xFFFF_FFFF_FFFF_8001).unwrap();
        assert_eq!(array_len_checked(a), Ok(4));
        // zero-extended read of the truncated 16-bit store
        assert_eq!(array_get_checked(a, 0, false), Ok(0x8001));
        // sign-extended read
        assert_eq!(array_get_checked(a, 0, true), Ok(0x8001u64 as u16 as i16 as i64 as u64));
        array_set_checked(a, 2, 5).unwrap();
        assert_eq!(array_get_checked(a, 2, false), Ok(5));
        assert_eq!(array_get_checked(a, 4, false), Err(Trap::MemoryOutOfBounds));
        clear_heap();
    }

    #[test]
    fn array_fill_and_copy() {
        let _guard = crate::gc::test_lock();
        default_env();
        let a = array_new_default_checked(1, 6).unwrap();
        array_fill_checked(a, 2, 3, 4).unwrap();
        assert_eq!(array_get_checked(a, 1, false), Ok(0));
        assert_eq!(array_get_checked(a, 5, false), Ok(3));
        // zero-length fill at the boundary is legal, one past traps
        array_fill_checked(a, 6, 1, 0).unwrap();
        assert_eq!(array_fill_checked(a, 7, 1, 0), Err(Trap::MemoryOutOfBounds));

        let b = array_new_default_checked(1, 6).unwrap();
        array_copy_checked(b, 0, a, 2, 4).unwrap();
        assert_eq!(array_get_checked(b, 0, false), Ok(3));
        // overlapping copy within one array
        array_copy_checked(a, 0, a, 2, 4).unwrap();
        assert_eq!(array_get_checked(a, 0, false), Ok(3));
        clear_heap();
    }

    #[test]
    fn cast_returns_value_or_traps() {
        let _guard = crate::gc::test_lock();
        default_env();
        let s = struct_new_checked(0, &[1, 2]).unwrap();
        assert_eq!(ref_cast_checked(s, 0, false), Ok(s));
        assert_eq!(
            ref_cast_checked(s, 1, false),
            Err(Trap::BadSignature)
        );
        assert_eq!(ref_cast_checked(0, 0, true), Ok(0));
        assert_eq!(ref_cast_checked(0, 0, false), Err(Trap::BadSignature));
        clear_heap();
    }
}
