//! JIT runtime substrate for an AArch64 WebAssembly engine.
//!
//! This crate is the layer *below* the code generator: it owns executable
//! memory, the `VMContext` control block that generated code reads and
//! writes at fixed offsets, the host-to-JIT call trampoline, the signal
//! based trap substrate, the memory/table/segment/GC runtime libcalls and
//! the WASI preview 1 host binding. Producing the machine code installed
//! here (decoding, validation, register allocation, encoding) is the job
//! of an external collaborator; this crate only defines the contracts that
//! collaborator must honor.

mod code_memory;
mod errors;
pub mod gc;
mod mmap;
mod traps;
mod values;
pub mod vm;
pub mod wasi;

pub use code_memory::{alloc_exec, copy_code, free_exec, lookup_exec};
pub use errors::Error;
pub use mmap::Mmap;
pub use traps::{clear_trap, get_trap_code, Trap};
pub use values::Val;
pub use vm::{Instance, VMContext, VMTableEntry, VMVal};

pub type Result<T> = core::result::Result<T, Error>;

/// WebAssembly page sizes are defined to be 64KiB.
pub const WASM_PAGE_SIZE: u64 = 0x10000;

/// The number of pages a 32-bit linear memory can have before we run out
/// of byte index space (4GiB).
pub const WASM32_MAX_PAGES: u64 = 1 << 16;

/// Size in bytes of the reservation backing a guarded linear memory:
/// 8GiB of offset-addressable space plus one wasm page of slack, mapped
/// `PROT_NONE` so every out-of-bounds access faults deterministically.
pub const GUARDED_MEMORY_RESERVATION: usize = (8 << 30) + 0x10000;

/// Size in bytes of the alternate stack signal handlers run on.
pub const SIGNAL_STACK_SIZE: usize = 64 * 1024;

pub fn host_page_size() -> usize {
    rustix::param::page_size()
}

#[macro_export]
macro_rules! enum_accessors {
    ($bind:ident $(($variant:ident($ty:ty) $get:ident $unwrap:ident $cvt:expr))*) => ($(
        /// Attempt to access the underlying value of this `Val`, returning
        /// `None` if it is not the correct type.
        #[inline]
        pub fn $get(&self) -> Option<$ty> {
            if let Self::$variant($bind) = self {
                Some($cvt)
            } else {
                None
            }
        }

        /// Returns the underlying value of this `Val`, panicking if it's the
        /// wrong type.
        ///
        /// # Panics
        ///
        /// Panics if `self` is not of the right type.
        #[inline]
        pub fn $unwrap(&self) -> $ty {
            self.$get().expect(concat!("expected ", stringify!($ty)))
        }
    )*)
}
