//! Table runtime calls.
//!
//! Tables store two machine words per index; every write goes through
//! [`crate::vm::VMTableEntry`] so the reference bits and the type index
//! always travel together.

use crate::gc::{self, RefValue};
use crate::vm::libcalls::memory::check_bounds;
use crate::vm::trap_handling::unwrap_or_raise;
use crate::vm::vmcontext::VMTableEntry;
use crate::vm::{Instance, VMContext};
use crate::Trap;

/// The type index stored alongside `value` in a filled entry.
///
/// A tagged native funcref is looked up in the function-pointer table and
/// its declared type is taken from the per-instance record; IR-encoded
/// funcrefs carry their function index directly. Anything else is
/// unknown (−1).
fn infer_type_idx(instance: &Instance, value: u64) -> i64 {
    match gc::decode(value) {
        RefValue::NativeFunc(ptr) => instance.infer_func_type(ptr.cast()),
        RefValue::IrFunc(func_idx) => instance
            .func_ptr(func_idx)
            .map_or(-1, |_| instance.declared_func_type(func_idx)),
        _ => -1,
    }
}

pub fn table_fill_checked(
    instance: &mut Instance,
    table_idx: u32,
    dst: u64,
    value: u64,
    len: u64,
) -> Result<(), Trap> {
    let type_idx = infer_type_idx(instance, value);
    let entries = instance
        .table_entries_mut(table_idx)
        .ok_or(Trap::MemoryOutOfBounds)?;
    check_bounds(entries.len() as u64, dst, len)?;
    for entry in &mut entries[dst as usize..(dst + len) as usize] {
        *entry = VMTableEntry { value, type_idx };
    }
    Ok(())
}

pub fn table_copy_checked(
    instance: &mut Instance,
    dst_table: u32,
    src_table: u32,
    dst: u64,
    src: u64,
    len: u64,
) -> Result<(), Trap> {
    if dst_table == src_table {
        let entries = instance
            .table_entries_mut(dst_table)
            .ok_or(Trap::MemoryOutOfBounds)?;
        let size = entries.len() as u64;
        check_bounds(size, dst, len)?;
        check_bounds(size, src, len)?;
        // intra-table ranges may overlap
        entries.copy_within(src as usize..(src + len) as usize, dst as usize);
        return Ok(());
    }

    let (src_ptr, src_size) = {
        let entries = instance
            .table_entries_mut(src_table)
            .ok_or(Trap::MemoryOutOfBounds)?;
        (entries.as_ptr(), entries.len() as u64)
    };
    check_bounds(src_size, src, len)?;

    let dst_entries = instance
        .table_entries_mut(dst_table)
        .ok_or(Trap::MemoryOutOfBounds)?;
    check_bounds(dst_entries.len() as u64, dst, len)?;

    unsafe {
        core::ptr::copy_nonoverlapping(
            src_ptr.add(src as usize),
            dst_entries.as_mut_ptr().add(dst as usize),
            len as usize,
        );
    }
    Ok(())
}

/* ------------------------ extern "C" surface ---------------------- */

/// `table.grow`: previous element count, or −1 past the declared max or
/// on a table this context only borrows.
pub unsafe extern "C" fn table_grow(
    vmctx: *mut VMContext,
    table_idx: u32,
    delta: u64,
    init: u64,
) -> i64 {
    Instance::from_vmctx(vmctx).table_grow(table_idx, delta, init)
}

pub unsafe extern "C" fn table_fill(
    vmctx: *mut VMContext,
    table_idx: u32,
    dst: u64,
    value: u64,
    len: u64,
) {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(table_fill_checked(instance, table_idx, dst, value, len));
}

pub unsafe extern "C" fn table_copy(
    vmctx: *mut VMContext,
    dst_table: u32,
    src_table: u32,
    dst: u64,
    src: u64,
    len: u64,
) {
    let instance = Instance::from_vmctx(vmctx);
    unwrap_or_raise(table_copy_checked(
        instance, dst_table, src_table, dst, src, len,
    ));
}
