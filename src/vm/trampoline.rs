//! Host-to-JIT call entry points.
//!
//! Two dispatch styles coexist. [`call_trampoline`] is the preferred one:
//! the code generator emits an entry stub with a fixed C signature that
//! performs all argument fan-out itself, so the host side is a plain
//! indirect call. [`call_multi_return`] is the legacy wide-marshaling
//! surface that places arguments into the AArch64 argument registers by
//! inline assembly; it remains for compatibility and should be avoided
//! for new work.
//!
//! Register contract with generated code (entry calls):
//!
//! * `X0` callee vmctx, `X1` caller vmctx (same value at top level)
//! * flat arguments in `X2`–`X7`; floats travel as raw bit patterns and
//!   are moved to `D` registers by the callee prologue
//! * arguments past the register file at `[SP + (i−8)*8]`, SP 16-byte
//!   aligned
//! * integer results in `X0`/`X1`, float results in `D0`/`D1`; when more
//!   results exist than return registers, `X7` carries an excess-result
//!   buffer the callee saves to `X23`
//! * `X19`–`X28` and the low halves of `D8`–`D15` are callee-saved
//!
//! See [`crate::vm::arch`] for the constants behind this contract.

use crate::vm::trap_handling::catch_traps;
use crate::vm::vmcontext::{VMContext, VMFunctionBody, VMTrampolineFunction, VMVal};
use smallvec::SmallVec;

/// Value types as the trampoline needs to know them: just enough to route
/// results between the integer and float register files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmValType {
    I32,
    I64,
    F32,
    F64,
}

impl WasmValType {
    fn is_float(self) -> bool {
        matches!(self, WasmValType::F32 | WasmValType::F64)
    }
}

/// Calls compiled code through a generator-emitted entry stub.
///
/// `values` carries the arguments on entry and the results on a
/// successful return; its length must be at least
/// `max(param_arity, result_arity)`. Returns 0 on success or the positive
/// trap code; on trap the contents of `values` are unspecified.
pub unsafe fn call_trampoline(
    stub: VMTrampolineFunction,
    vmctx: *mut VMContext,
    func: *const VMFunctionBody,
    values: &mut [VMVal],
) -> i32 {
    debug_assert!(!vmctx.is_null());
    debug_assert!(!func.is_null());

    crate::clear_trap();
    let values = values.as_mut_ptr();
    match catch_traps(vmctx, || {
        stub(vmctx, values, func);
    }) {
        Ok(()) => 0,
        Err(trap) => trap.code(),
    }
}

/// Legacy wide-marshaling dispatcher.
///
/// Builds the register/stack image of an entry call by inline assembly,
/// branches to `func` and harvests `X0`/`X1`/`D0`/`D1` plus the excess
/// buffer. Returns 0 on success or the positive trap code.
///
/// Only AArch64 hosts can execute code emitted against this contract; on
/// other hosts the call is rejected with the unknown-trap code.
pub unsafe fn call_multi_return(
    func: *const VMFunctionBody,
    vmctx: *mut VMContext,
    args: &[u64],
    results: &mut [u64],
    result_types: &[WasmValType],
) -> i32 {
    debug_assert!(!func.is_null());
    debug_assert!(results.len() >= result_types.len());

    crate::clear_trap();

    match catch_traps(vmctx, || {
        invoke_wide(func, vmctx, args, results, result_types);
    }) {
        Ok(()) => 0,
        Err(trap) => trap.code(),
    }
}

/// Does a result list overflow the integer or float return registers?
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
fn needs_excess_buffer(result_types: &[WasmValType]) -> bool {
    let floats = result_types.iter().filter(|t| t.is_float()).count();
    let ints = result_types.len() - floats;
    ints > crate::vm::arch::MAX_REG_RESULTS || floats > crate::vm::arch::MAX_REG_RESULTS
}

/// Splits flat arguments into the X2..X7 image and the stack tail.
///
/// When an excess-result buffer is needed it occupies X7, leaving five
/// argument registers; `excess_ptr` is placed there. The stack tail is
/// padded to an even number of words so SP stays 16-byte aligned.
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
fn stage_arguments(
    args: &[u64],
    needs_excess: bool,
    excess_ptr: u64,
) -> ([u64; 6], SmallVec<[u64; 8]>) {
    let reg_cap = if needs_excess { 5 } else { 6 };
    let mut regs = [0u64; 6];
    let in_regs = args.len().min(reg_cap);
    regs[..in_regs].copy_from_slice(&args[..in_regs]);
    if needs_excess {
        regs[5] = excess_ptr;
    }

    let mut stack: SmallVec<[u64; 8]> = SmallVec::from_slice(&args[in_regs..]);
    if stack.len() % 2 != 0 {
        stack.push(0);
    }
    (regs, stack)
}

/// Routes returned values by class in declaration order: integer results
/// consume X0 then X1, float results D0 then D1, and once a class's
/// registers are spent the value comes from the excess buffer at its
/// result index.
#[cfg_attr(not(target_arch = "aarch64"), allow(dead_code))]
fn route_results(
    result_types: &[WasmValType],
    int_regs: [u64; 2],
    float_regs: [u64; 2],
    excess: &[u64],
    results: &mut [u64],
) {
    let mut int_next = 0;
    let mut float_next = 0;
    for (i, ty) in result_types.iter().enumerate() {
        results[i] = if ty.is_float() {
            let v = match float_next {
                0 => float_regs[0],
                1 => float_regs[1],
                _ => excess[i],
            };
            float_next += 1;
            v
        } else {
            let v = match int_next {
                0 => int_regs[0],
                1 => int_regs[1],
                _ => excess[i],
            };
            int_next += 1;
            v
        };
    }
}

#[cfg(not(target_arch = "aarch64"))]
unsafe fn invoke_wide(
    _func: *const VMFunctionBody,
    _vmctx: *mut VMContext,
    _args: &[u64],
    _results: &mut [u64],
    _result_types: &[WasmValType],
) {
    tracing::warn!("call_multi_return is only supported on aarch64 hosts");
    crate::vm::trap_handling::raise_trap(crate::Trap::Unknown);
}

#[cfg(target_arch = "aarch64")]
unsafe fn invoke_wide(
    func: *const VMFunctionBody,
    vmctx: *mut VMContext,
    args: &[u64],
    results: &mut [u64],
    result_types: &[WasmValType],
) {
    let needs_excess = needs_excess_buffer(result_types);
    let mut excess: SmallVec<[u64; 8]> = SmallVec::new();
    excess.resize(result_types.len(), 0);

    let (regs, stack) = stage_arguments(args, needs_excess, excess.as_mut_ptr() as u64);
    let stack_bytes = stack.len() * 8;

    let ret0: u64;
    let ret1: u64;
    let dret0: u64;
    let dret1: u64;

    core::arch::asm!(
        "sub sp, sp, {stack_bytes}",
        "cbz {nstack}, 3f",
        "mov {i}, xzr",
        "2:",
        "ldr {tmp}, [{stack_src}, {i}, lsl 3]",
        "str {tmp}, [sp, {i}, lsl 3]",
        "add {i}, {i}, 1",
        "cmp {i}, {nstack}",
        "b.lo 2b",
        "3:",
        "blr {func}",
        "add sp, sp, {stack_bytes}",
        func = in(reg) func,
        stack_bytes = in(reg) stack_bytes,
        nstack = in(reg) stack.len(),
        stack_src = in(reg) stack.as_ptr(),
        i = out(reg) _,
        tmp = out(reg) _,
        inout("x0") vmctx as u64 => ret0,
        inout("x1") vmctx as u64 => ret1,
        inout("x2") regs[0] => _,
        inout("x3") regs[1] => _,
        inout("x4") regs[2] => _,
        inout("x5") regs[3] => _,
        inout("x6") regs[4] => _,
        inout("x7") regs[5] => _,
        out("v0") dret0,
        out("v1") dret1,
        clobber_abi("C"),
    );

    route_results(result_types, [ret0, ret1], [dret0, dret1], &excess, results);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excess_buffer_is_per_class() {
        use WasmValType::*;
        assert!(!needs_excess_buffer(&[]));
        assert!(!needs_excess_buffer(&[I32, I64]));
        assert!(!needs_excess_buffer(&[I32, I64, F32, F64]));
        assert!(needs_excess_buffer(&[I32, I64, I32]));
        assert!(needs_excess_buffer(&[F32, F64, F32]));
    }

    #[test]
    fn argument_staging_register_split() {
        let args: Vec<u64> = (1..=9).collect();
        let (regs, stack) = stage_arguments(&args, false, 0);
        assert_eq!(regs, [1, 2, 3, 4, 5, 6]);
        // three stack words padded to four for 16-byte alignment
        assert_eq!(&stack[..], &[7, 8, 9, 0]);

        let (regs, stack) = stage_arguments(&args, true, 0xAB);
        assert_eq!(regs[..5], [1, 2, 3, 4, 5]);
        assert_eq!(regs[5], 0xAB, "excess buffer rides in x7");
        assert_eq!(&stack[..], &[6, 7, 8, 9]);
    }

    #[test]
    fn short_argument_lists_zero_fill() {
        let (regs, stack) = stage_arguments(&[42], false, 0);
        assert_eq!(regs, [42, 0, 0, 0, 0, 0]);
        assert!(stack.is_empty());
    }

    #[test]
    fn result_routing_by_class() {
        use WasmValType::*;
        // i32, f64, i64, f32 — two per class, all from registers
        let mut results = [0u64; 4];
        route_results(
            &[I32, F64, I64, F32],
            [10, 11],
            [20, 21],
            &[0; 4],
            &mut results,
        );
        assert_eq!(results, [10, 20, 11, 21]);

        // third integer result spills to the excess buffer at its index
        let mut results = [0u64; 3];
        route_results(
            &[I32, I32, I32],
            [1, 2],
            [0, 0],
            &[0, 0, 33],
            &mut results,
        );
        assert_eq!(results, [1, 2, 33]);
    }
}
