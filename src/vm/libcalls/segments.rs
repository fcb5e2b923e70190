//! Passive data/element segment runtime calls (the bulk-memory family).
//!
//! A dropped segment behaves as if it had length zero: only zero-length
//! accesses at offset zero stay legal. `data.drop`/`elem.drop` of an
//! out-of-range index are silent no-ops.

use crate::vm::libcalls::memory::check_bounds;
use crate::vm::trap_handling::unwrap_or_raise;
use crate::vm::{Instance, VMContext};
use crate::Trap;

pub fn memory_init_checked(
    instance: &mut Instance,
    mem_idx: u32,
    data_idx: u32,
    dst: u64,
    src: u32,
    len: u32,
) -> Result<(), Trap> {
    let (seg_ptr, seg_len) = {
        let segment = instance
            .data_segments
            .get(data_idx as usize)
            .ok_or(Trap::MemoryOutOfBounds)?;
        let len = if segment.dropped {
            0
        } else {
            segment.bytes.len() as u64
        };
        (segment.bytes.as_ptr(), len)
    };
    check_bounds(seg_len, u64::from(src), u64::from(len))?;

    let memory = instance
        .memory_slice_mut(mem_idx)
        .ok_or(Trap::MemoryOutOfBounds)?;
    check_bounds(memory.len() as u64, dst, u64::from(len))?;

    // The segment buffer is owned by the instance and disjoint from its
    // linear memories.
    unsafe {
        core::ptr::copy_nonoverlapping(
            seg_ptr.add(src as usize),
            memory.as_mut_ptr().add(dst as usize),
            len as usize,
        );
    }
    Ok(())
}

pub fn data_drop_checked(instance: &mut Instance, data_idx: u32) {
    if let Some(segment) = instance.data_segments.get_mut(data_idx as usize) {
        segment.dropped = true;
    }
}

pub fn table_init_checked(
    instance: &mut Instance,
    table_idx: u32,
    elem_idx: u32,
    dst: u64,
    src: u32,
    len: u32,
) -> Result<(), Trap> {
    let pairs = {
        let segment = instance
            .elem_segments
            .get(elem_idx as usize)
            .ok_or(Trap::MemoryOutOfBounds)?;
        let seg_len = if segment.dropped {
            0
        } else {
            segment.entries.len() as u64
        };
        check_bounds(seg_len, u64::from(src), u64::from(len))?;
        segment.entries[src as usize..src as usize + len as usize].to_vec()
    };

    let entries = instance
        .table_entries_mut(table_idx)
        .ok_or(Trap::MemoryOutOfBounds)?;
    check_bounds(entries.len() as u64, dst, u64::from(len))?;
    entries[dst as usize..dst as usize + pairs.len()].copy_from_slice(&pairs);
    Ok(())
}

pub fn elem_drop_checked(instance: &mut Instance, elem_idx: u32) {
    if let Some(segment) = instance.elem_segments.get_mut(elem_idx as usize) {
        segment.dropped = true;
    }
}

/* ------------------------ extern "C" surface ---------------------- */

pub unsafe extern "C" fn memory_init(
    vmctx: *mut VMContext,
    mem_idx: u32,
    data_idx: u32,
    dst: u64,
    src: u32,
    len: u32,
) {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(memory_init_checked(instance, mem_idx, data_idx, dst, src, len));
}

pub unsafe extern "C" fn data_drop(vmctx: *mut VMContext, data_idx: u32) {
    data_drop_checked(Instance::from_vmctx(vmctx), data_idx);
}

pub unsafe extern "C" fn table_init(
    vmctx: *mut VMContext,
    table_idx: u32,
    elem_idx: u32,
    dst: u64,
    src: u32,
    len: u32,
) {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(table_init_checked(instance, table_idx, elem_idx, dst, src, len));
}

pub unsafe extern "C" fn elem_drop(vmctx: *mut VMContext, elem_idx: u32) {
    elem_drop_checked(Instance::from_vmctx(vmctx), elem_idx);
}
