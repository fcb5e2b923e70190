//! The VM core: context, instance lifecycle, trampoline, traps and
//! libcalls.

pub mod arch;
mod instance;
pub mod libcalls;
mod trampoline;
pub mod trap_handling;
mod vmcontext;

pub use instance::{Instance, TableStorage};
pub use trampoline::{call_multi_return, call_trampoline, WasmValType};
pub use trap_handling::{catch_traps, raise_trap};
pub use vmcontext::{
    VMContext, VMFunctionBody, VMTableEntry, VMTrampolineFunction, VMVal,
};
