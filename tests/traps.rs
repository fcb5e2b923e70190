use wasm_jit_runtime::vm::{
    call_multi_return, call_trampoline, catch_traps, raise_trap, Instance, VMContext,
    VMFunctionBody, VMVal, WasmValType,
};
use wasm_jit_runtime::Trap;

/// A stand-in for a generator-emitted entry stub: adds the first two
/// values and stores the sum back.
unsafe extern "C" fn add_stub(
    _vmctx: *mut VMContext,
    values: *mut VMVal,
    _func: *const VMFunctionBody,
) -> i32 {
    let a = (*values).get_i32();
    let b = (*values.add(1)).get_i32();
    *values = VMVal::i32(a.wrapping_add(b));
    0
}

/// A stub whose "compiled code" hits an out-of-bounds bulk operation.
unsafe extern "C" fn oob_stub(
    vmctx: *mut VMContext,
    _values: *mut VMVal,
    _func: *const VMFunctionBody,
) -> i32 {
    wasm_jit_runtime::vm::libcalls::memory::memory_fill(vmctx, u64::MAX - 16, 0, 32);
    0
}

fn dangling_func() -> *const VMFunctionBody {
    0x1000 as *const VMFunctionBody
}

// the recorded trap code is process-global; serialize tests that assert it
fn trap_code_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[test_log::test]
fn trampoline_returns_results_and_code_zero() {
    let _guard = trap_code_lock();
    let mut instance = Instance::new(0);
    let mut values = [VMVal::i32(40), VMVal::i32(2)];
    let rc = unsafe {
        call_trampoline(
            add_stub,
            instance.vmctx_mut(),
            dangling_func(),
            &mut values,
        )
    };
    assert_eq!(rc, 0);
    assert_eq!(values[0].get_i32(), 42);
    assert_eq!(wasm_jit_runtime::get_trap_code(), 0);
}

#[test_log::test]
fn trampoline_surfaces_trap_codes() {
    let _guard = trap_code_lock();
    let mut instance = Instance::new(0);
    instance.add_memory(1, 0, false).unwrap();
    let mut values = [VMVal::i32(0)];
    let rc = unsafe {
        call_trampoline(
            oob_stub,
            instance.vmctx_mut(),
            dangling_func(),
            &mut values,
        )
    };
    assert_eq!(rc, 1);
    assert_eq!(wasm_jit_runtime::get_trap_code(), 1);
    wasm_jit_runtime::clear_trap();
    assert_eq!(wasm_jit_runtime::get_trap_code(), 0);
}

#[test_log::test]
fn every_trap_code_round_trips_through_the_guard() {
    let _guard = trap_code_lock();
    for trap in [
        Trap::MemoryOutOfBounds,
        Trap::StackExhausted,
        Trap::UnreachableCodeReached,
        Trap::BadSignature,
        Trap::BadConversionToInteger,
        Trap::IntegerDivisionByZero,
        Trap::IntegerOverflow,
        Trap::Unknown,
    ] {
        let err = catch_traps(core::ptr::null_mut(), || raise_trap(trap)).unwrap_err();
        assert_eq!(err, trap);
        assert_eq!(wasm_jit_runtime::get_trap_code(), trap.code());
    }
    wasm_jit_runtime::clear_trap();
}

#[test_log::test]
fn nested_guards_unwind_to_the_innermost() {
    let _guard = trap_code_lock();
    let outer = catch_traps(core::ptr::null_mut(), || {
        let inner = catch_traps(core::ptr::null_mut(), || {
            raise_trap(Trap::IntegerOverflow);
        });
        assert_eq!(inner.unwrap_err(), Trap::IntegerOverflow);
    });
    assert!(outer.is_ok());
}

/// A guard-page read immediately past `memory_size` must fault and be
/// classified as trap 1 by the SIGSEGV handler.
#[test_log::test]
fn guarded_memory_oob_read_traps() {
    let _guard = trap_code_lock();
    let mut instance = Instance::new(0);
    instance.add_memory(1, 0, true).unwrap();
    let ctx = instance.vmctx_mut();

    let err = catch_traps(ctx, || unsafe {
        let base = (*ctx).memory_base;
        let size = (*ctx).memory_size as usize;
        // one byte past the accessible pages, still inside the reservation
        core::ptr::read_volatile(base.add(size));
    })
    .unwrap_err();
    assert_eq!(err, Trap::MemoryOutOfBounds);
    assert_eq!(wasm_jit_runtime::get_trap_code(), 1);
    wasm_jit_runtime::clear_trap();

    // the accessible region still works afterwards
    catch_traps(ctx, || unsafe {
        core::ptr::write_volatile((*ctx).memory_base, 9);
    })
    .unwrap();
    assert_eq!(instance.memory_slice_mut(0).unwrap()[0], 9);
}

#[test_log::test]
fn guarded_memory_grows_by_page_promotion() {
    let mut instance = Instance::new(0);
    instance.add_memory(1, 3, true).unwrap();
    assert_eq!(instance.memory_grow(0, 2, 0), 1);
    assert_eq!(instance.memory_pages(0), Some(3));
    assert_eq!(instance.memory_grow(0, 1, 0), -1, "declared cap");

    // the grown tail is zeroed and writable
    let mem = instance.memory_slice_mut(0).unwrap();
    let last = mem.len() - 1;
    assert_eq!(mem[last], 0);
    mem[last] = 0xEE;
    assert_eq!(mem[last], 0xEE);
}

/// BRK immediates from installed code surface as their mapped trap
/// codes; `brk #4` is integer division by zero.
#[cfg(target_arch = "aarch64")]
#[test_log::test]
fn brk_immediate_becomes_trap_code() {
    let _guard = trap_code_lock();
    let base = wasm_jit_runtime::alloc_exec(16).unwrap();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(0xD420_0000u32 | 4 << 5).to_le_bytes()); // brk #4
    bytes.extend_from_slice(&0xD65F_03C0u32.to_le_bytes()); // ret
    wasm_jit_runtime::copy_code(base, &bytes).unwrap();

    let mut instance = Instance::new(0);
    let mut results = [0u64; 0];
    let rc = unsafe {
        call_multi_return(
            base.as_ptr().cast(),
            instance.vmctx_mut(),
            &[],
            &mut results,
            &[],
        )
    };
    assert_eq!(rc, Trap::IntegerDivisionByZero.code());
    wasm_jit_runtime::free_exec(base).unwrap();
}

#[cfg(not(target_arch = "aarch64"))]
#[test_log::test]
fn wide_marshaling_is_aarch64_only() {
    let mut instance = Instance::new(0);
    let mut results = [0u64; 1];
    let rc = unsafe {
        call_multi_return(
            dangling_func(),
            instance.vmctx_mut(),
            &[],
            &mut results,
            &[WasmValType::I32],
        )
    };
    assert_eq!(rc, Trap::Unknown.code());
}

/// On AArch64 the wide-marshaling path can drive real code: install
/// `add w0, w2, w3; ret`, which in the entry convention returns
/// arg0 + arg1.
#[cfg(target_arch = "aarch64")]
#[test_log::test]
fn wide_marshaling_calls_installed_code() {
    // the BRK test's signal handler consults the code registry; keep
    // this binary's allocations out of its way
    let _guard = trap_code_lock();
    let base = wasm_jit_runtime::alloc_exec(16).unwrap();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x0B03_0040u32.to_le_bytes()); // add w0, w2, w3
    bytes.extend_from_slice(&0xD65F_03C0u32.to_le_bytes()); // ret
    wasm_jit_runtime::copy_code(base, &bytes).unwrap();

    let mut instance = Instance::new(0);
    let mut results = [0u64; 1];
    let rc = unsafe {
        call_multi_return(
            base.as_ptr().cast(),
            instance.vmctx_mut(),
            &[40, 2],
            &mut results,
            &[WasmValType::I32],
        )
    };
    assert_eq!(rc, 0);
    assert_eq!(results[0] as u32, 42);
    wasm_jit_runtime::free_exec(base).unwrap();
}

/// A stub with three integer results exercises the multi-value shape of
/// the values vector.
unsafe extern "C" fn three_results_stub(
    _vmctx: *mut VMContext,
    values: *mut VMVal,
    _func: *const VMFunctionBody,
) -> i32 {
    let n = (*values).get_i32();
    *values = VMVal::i32(n);
    *values.add(1) = VMVal::i32(n * 2);
    *values.add(2) = VMVal::i32(n * 3);
    0
}

#[test_log::test]
fn trampoline_multi_value_results() {
    let mut instance = Instance::new(0);
    // capacity is max(arity, return-arity) = 3
    let mut values = [VMVal::i32(5), VMVal::i32(0), VMVal::i32(0)];
    let rc = unsafe {
        call_trampoline(
            three_results_stub,
            instance.vmctx_mut(),
            dangling_func(),
            &mut values,
        )
    };
    assert_eq!(rc, 0);
    assert_eq!(values[0].get_i32(), 5);
    assert_eq!(values[1].get_i32(), 10);
    assert_eq!(values[2].get_i32(), 15);
}
