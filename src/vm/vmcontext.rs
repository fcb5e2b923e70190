//! `VMContext` and the other data structures directly accessed by JIT code.
//!
//! As a naming convention all types that start with `VM` are types shared
//! with generated code. All of them are `#[repr(C)]` to have a stable ABI.
//!
//! # Safety
//!
//! Everything in this module is exposed to JIT code, so **accessing it is
//! highly unsafe**. Pointers read out of these structs must be checked
//! before being dereferenced; the only code allowed to trust them is the
//! code that populated them.
//!
//! # Layout contract
//!
//! The code generator emits loads and stores against the first eight
//! fields of [`VMContext`] at fixed byte offsets:
//!
//! | offset | field             |
//! |--------|-------------------|
//! | 0      | `memory_base`     |
//! | 8      | `memory_size`     |
//! | 16     | `func_table`      |
//! | 24     | `table0_base`     |
//! | 32     | `table0_elements` |
//! | 40     | `globals`         |
//! | 48     | `tables`          |
//! | 56     | `table_count`     |
//! | 60     | `func_count`      |
//!
//! These are frozen and enforced below with compile-time assertions. The
//! remaining fields are still JIT-visible but reached through the offset
//! accessors, so they may move between releases of this crate as long as
//! the code generator is rebuilt against the new accessors.

use core::ffi::c_void;
use core::fmt;
use core::mem::offset_of;

/// A placeholder byte-sized type which is just used to provide some amount
/// of type safety when dealing with pointers to JIT-compiled function
/// bodies. Deliberately not `Copy`: function body bytes shouldn't be
/// carelessly copied around.
#[repr(C)]
pub struct VMFunctionBody(u8);

/// The entry trampoline emitted by the code generator.
///
/// The stub performs all argument fan-out into the target's ABI, calls the
/// target, and stores results back into the values vector, so the host can
/// reach any compiled function through this one C-compatible signature.
pub type VMTrampolineFunction =
    unsafe extern "C" fn(*mut VMContext, *mut VMVal, *const VMFunctionBody) -> i32;

/// One table slot: the reference bits plus the signed type index used for
/// indirect-call signature checks. −1 means unknown/uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct VMTableEntry {
    pub value: u64,
    pub type_idx: i64,
}

impl VMTableEntry {
    pub const NULL: VMTableEntry = VMTableEntry {
        value: 0,
        type_idx: -1,
    };
}

/// A 64-bit value slot shared with JIT code.
#[derive(Clone, Copy)]
pub union VMVal {
    pub i32: i32,
    pub i64: i64,
    pub f32: u32,
    pub f64: u64,
    pub funcref: *mut c_void,
    pub bits: u64,
}

impl fmt::Debug for VMVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        unsafe { f.debug_tuple("VMVal").field(&self.bits).finish() }
    }
}

impl PartialEq for VMVal {
    fn eq(&self, other: &Self) -> bool {
        unsafe { self.bits == other.bits }
    }
}

impl VMVal {
    #[inline]
    pub fn i32(i: i32) -> VMVal {
        // sign-extend so the unused upper half is deterministic
        VMVal::i64(i64::from(i))
    }
    #[inline]
    pub fn i64(i: i64) -> VMVal {
        VMVal { i64: i.to_le() }
    }
    #[inline]
    pub fn u32(i: u32) -> VMVal {
        VMVal::u64(u64::from(i))
    }
    #[inline]
    pub fn u64(i: u64) -> VMVal {
        VMVal::i64(i as i64)
    }
    #[inline]
    pub fn f32(bits: u32) -> VMVal {
        VMVal { f32: bits.to_le() }
    }
    #[inline]
    pub fn f64(bits: u64) -> VMVal {
        VMVal { f64: bits.to_le() }
    }
    #[inline]
    pub fn funcref(ptr: *mut c_void) -> VMVal {
        VMVal {
            funcref: ptr.map_addr(|a| a.to_le()),
        }
    }

    #[inline]
    pub fn get_i32(&self) -> i32 {
        unsafe { i32::from_le(self.i32) }
    }
    #[inline]
    pub fn get_i64(&self) -> i64 {
        unsafe { i64::from_le(self.i64) }
    }
    #[inline]
    pub fn get_u32(&self) -> u32 {
        self.get_i32() as u32
    }
    #[inline]
    pub fn get_u64(&self) -> u64 {
        self.get_i64() as u64
    }
    #[inline]
    pub fn get_f32(&self) -> u32 {
        unsafe { u32::from_le(self.f32) }
    }
    #[inline]
    pub fn get_f64(&self) -> u64 {
        unsafe { u64::from_le(self.f64) }
    }
    #[inline]
    pub fn get_funcref(&self) -> *mut c_void {
        unsafe { self.funcref.map_addr(usize::from_le) }
    }
}

/// The per-instance control block shared with JIT code.
///
/// The host populates this over a staged initialization (functions →
/// memory → globals → tables → segments → WASI) through
/// [`crate::vm::Instance`], which also owns every array the pointers here
/// refer to. Any pointer field may be null when the corresponding feature
/// is unused.
#[derive(Debug)]
#[repr(C)]
pub struct VMContext {
    // Frozen region. The code generator depends on these bit-exactly.
    pub memory_base: *mut u8,
    pub memory_size: u64,
    pub func_table: *mut *const VMFunctionBody,
    pub table0_base: *mut VMTableEntry,
    pub table0_elements: u64,
    pub globals: *mut u64,
    pub tables: *mut *mut VMTableEntry,
    pub table_count: u32,
    pub func_count: u32,

    // Parallel length/cap arrays for the multi-table configuration.
    pub table_sizes: *mut u64,
    pub table_max_sizes: *mut u64,

    // Parallel arrays for multi-memory. `memories[0]` mirrors
    // `memory_base` and vice versa.
    pub memories: *mut *mut u8,
    pub memory_sizes: *mut u64,
    pub memory_max_sizes: *mut u64,
    pub memory_count: u32,
    _pad0: u32,

    // In-flight exception frame; written by generated throw sequences and
    // read by catch landing pads.
    pub exception_handler: *mut c_void,
    pub exception_tag: u64,
    pub exception_values: *mut u64,
    pub exception_value_count: u32,
    _pad1: u32,

    // Local-slot snapshot captured at throw.
    pub spilled_locals: *mut u64,
    pub spilled_locals_count: u32,
    _pad2: u32,

    // Optional wasm operand-stack region with a guard page the SIGSEGV
    // handler classifies as stack exhaustion.
    pub wasm_stack_base: *mut u8,
    pub wasm_stack_top: *mut u8,
    pub wasm_stack_size: u64,
    pub wasm_stack_guard: *mut u8,
    pub guard_page_size: u64,

    /// Back-pointer to the owning [`crate::vm::Instance`]. Never read by
    /// JIT code; libcalls use it to recover the owner from a raw context.
    pub(crate) instance: *mut c_void,
}

// The frozen field-offset contract.
const _: () = {
    assert!(offset_of!(VMContext, memory_base) == 0);
    assert!(offset_of!(VMContext, memory_size) == 8);
    assert!(offset_of!(VMContext, func_table) == 16);
    assert!(offset_of!(VMContext, table0_base) == 24);
    assert!(offset_of!(VMContext, table0_elements) == 32);
    assert!(offset_of!(VMContext, globals) == 40);
    assert!(offset_of!(VMContext, tables) == 48);
    assert!(offset_of!(VMContext, table_count) == 56);
    assert!(offset_of!(VMContext, func_count) == 60);
    assert!(core::mem::size_of::<VMTableEntry>() == 16);
    assert!(core::mem::size_of::<VMVal>() == 8);
};

impl VMContext {
    pub(crate) fn new_zeroed() -> Self {
        // A zeroed context is the valid "nothing configured" state: every
        // pointer null, every count zero.
        unsafe { core::mem::zeroed() }
    }

    /// Offsets of the non-frozen JIT-visible fields, for the code
    /// generator to emit against.
    #[inline]
    pub fn offset_of_exception_handler() -> u32 {
        offset_of!(VMContext, exception_handler) as u32
    }
    #[inline]
    pub fn offset_of_exception_tag() -> u32 {
        offset_of!(VMContext, exception_tag) as u32
    }
    #[inline]
    pub fn offset_of_exception_values() -> u32 {
        offset_of!(VMContext, exception_values) as u32
    }
    #[inline]
    pub fn offset_of_exception_value_count() -> u32 {
        offset_of!(VMContext, exception_value_count) as u32
    }
    #[inline]
    pub fn offset_of_spilled_locals() -> u32 {
        offset_of!(VMContext, spilled_locals) as u32
    }
    #[inline]
    pub fn offset_of_spilled_locals_count() -> u32 {
        offset_of!(VMContext, spilled_locals_count) as u32
    }
    #[inline]
    pub fn offset_of_wasm_stack_top() -> u32 {
        offset_of!(VMContext, wasm_stack_top) as u32
    }
    #[inline]
    pub fn offset_of_table_sizes() -> u32 {
        offset_of!(VMContext, table_sizes) as u32
    }
    #[inline]
    pub fn offset_of_memories() -> u32 {
        offset_of!(VMContext, memories) as u32
    }
    #[inline]
    pub fn offset_of_memory_sizes() -> u32 {
        offset_of!(VMContext, memory_sizes) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmval_round_trips() {
        assert_eq!(VMVal::i32(-5).get_i32(), -5);
        assert_eq!(VMVal::i32(-5).get_i64(), -5);
        assert_eq!(VMVal::u32(0xdead_beef).get_u32(), 0xdead_beef);
        assert_eq!(VMVal::i64(i64::MIN).get_i64(), i64::MIN);
        assert_eq!(VMVal::f32(0x4048_f5c3).get_f32(), 0x4048_f5c3);
        assert_eq!(VMVal::f64(u64::MAX).get_f64(), u64::MAX);
    }

    #[test]
    fn zeroed_context_is_empty() {
        let ctx = VMContext::new_zeroed();
        assert!(ctx.memory_base.is_null());
        assert_eq!(ctx.memory_size, 0);
        assert!(ctx.tables.is_null());
        assert_eq!(ctx.func_count, 0);
    }
}
