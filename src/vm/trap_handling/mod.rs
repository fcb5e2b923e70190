//! Signal-based trap substrate.
//!
//! One trampoline invocation arms exactly one [`CallThreadState`]; the
//! state is linked into a thread-local chain so nested host→JIT→host→JIT
//! stacks unwind to the innermost guard. Signal handlers run on an
//! alternate stack, do only signal-safe work (read the TLS pointer,
//! decode one instruction, classify one address, jump) and forward to the
//! previously installed handler whenever the fault is not ours.

#![allow(static_mut_refs)]

use crate::traps::{decode_brk, record_trap};
use crate::vm::VMContext;
use crate::{code_memory, Trap};
use core::cell::Cell;
use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::{mem, ptr};
use smallvec::SmallVec;
use spin::once::Once;

extern "C" {
    fn wjrt_setjmp(
        buf_storage: *mut *const c_void,
        body: unsafe extern "C" fn(*mut c_void),
        payload: *mut c_void,
    ) -> i32;
    fn wjrt_longjmp(buf: *const c_void) -> !;
}

std::thread_local! {
    static TLS: Cell<Option<*const CallThreadState>> = const { Cell::new(None) };
    static SIGNAL_STACK: Cell<Option<usize>> = const { Cell::new(None) };
    static STACK_BOUNDS: Cell<Option<StackBounds>> = const { Cell::new(None) };
}

#[derive(Debug, Clone, Copy)]
struct StackBounds {
    /// Lowest mapped address of the thread stack; the guard region sits
    /// immediately below it.
    lo: usize,
    guard: usize,
}

pub(crate) struct CallThreadState {
    jmp_buf: Cell<*const c_void>,
    trap: Cell<Option<Trap>>,
    prev: Cell<*const CallThreadState>,
    /// Reservation bounds of every guarded linear memory of the active
    /// context, cached here so the SIGSEGV handler can classify faults
    /// without touching instance state.
    guarded_ranges: SmallVec<[(usize, usize); 2]>,
    /// Wasm operand-stack guard region, if configured.
    stack_guard: Option<(usize, usize)>,
}

impl CallThreadState {
    fn new(vmctx: *mut VMContext) -> Self {
        let mut guarded_ranges = SmallVec::new();
        let mut stack_guard = None;
        if !vmctx.is_null() {
            let ctx = unsafe { &*vmctx };
            if !ctx.wasm_stack_guard.is_null() && ctx.guard_page_size != 0 {
                let base = ctx.wasm_stack_guard as usize;
                stack_guard = Some((base, base + ctx.guard_page_size as usize));
            }
            if let Some(instance) = unsafe { crate::vm::Instance::try_from_vmctx(ctx) } {
                guarded_ranges = instance.guarded_reservations();
            }
        }
        Self {
            jmp_buf: Cell::new(ptr::null()),
            trap: Cell::new(None),
            prev: Cell::new(ptr::null()),
            guarded_ranges,
            stack_guard,
        }
    }

    fn push(&self) {
        debug_assert!(self.prev.get().is_null());
        self.prev
            .set(TLS.replace(Some(self as *const _)).unwrap_or(ptr::null()));
    }

    fn pop(&self) {
        let prev = self.prev.replace(ptr::null());
        let head = TLS
            .replace(if prev.is_null() { None } else { Some(prev) })
            .unwrap_or(ptr::null());
        debug_assert!(ptr::eq(head, self));
    }

    /// Classifies a memory fault address. Ordering matters: the wasm
    /// operand-stack guard wins over the guarded-memory reservation wins
    /// over the native stack.
    fn classify_fault(&self, addr: usize) -> Trap {
        if let Some((lo, hi)) = self.stack_guard {
            if addr >= lo && addr < hi {
                return Trap::StackExhausted;
            }
        }
        for &(lo, hi) in &self.guarded_ranges {
            if addr >= lo && addr < hi {
                return Trap::MemoryOutOfBounds;
            }
        }
        if let Some(bounds) = STACK_BOUNDS.get() {
            if addr >= bounds.lo.saturating_sub(bounds.guard) && addr < bounds.lo {
                return Trap::StackExhausted;
            }
        }
        Trap::Unknown
    }

    unsafe fn unwind_with(&self, trap: Trap) -> ! {
        self.trap.set(Some(trap));
        wjrt_longjmp(self.jmp_buf.get())
    }
}

/// Runs `closure` with the trap substrate armed for `vmctx`.
///
/// Any BRK or memory fault raised by JIT code inside the closure, and any
/// libcall that calls [`raise_trap`], lands back here and is returned as
/// the typed trap. The trap code is also recorded for
/// [`crate::get_trap_code`].
pub fn catch_traps<F>(vmctx: *mut VMContext, mut closure: F) -> Result<(), Trap>
where
    F: FnMut(),
{
    ensure_signal_handlers_are_registered();
    ensure_signal_stack();
    ensure_stack_bounds();

    unsafe extern "C" fn call_closure<F: FnMut()>(payload: *mut c_void) {
        (*payload.cast::<F>())()
    }

    let state = CallThreadState::new(vmctx);
    state.push();
    let completed = unsafe {
        wjrt_setjmp(
            state.jmp_buf.as_ptr(),
            call_closure::<F>,
            core::ptr::addr_of_mut!(closure).cast(),
        )
    };
    state.pop();

    if completed != 0 {
        Ok(())
    } else {
        let trap = state.trap.get().unwrap_or(Trap::Unknown);
        record_trap(trap);
        tracing::debug!(code = trap.code(), "caught wasm trap: {trap}");
        Err(trap)
    }
}

/// Unwraps a libcall result, raising the trap on failure.
pub(crate) fn unwrap_or_raise<T>(result: Result<T, Trap>) -> T {
    match result {
        Ok(v) => v,
        Err(trap) => raise_trap(trap),
    }
}

/// Raises `trap` out of the innermost armed trampoline.
///
/// Used by libcalls whose failures must trap (out-of-bounds bulk ops,
/// failed casts). Must only be called while a [`catch_traps`] frame is
/// active on this thread.
pub fn raise_trap(trap: Trap) -> ! {
    let state = TLS
        .get()
        .expect("raise_trap called with no active trampoline guard");
    unsafe { (*state).unwind_with(trap) }
}

/* ------------------------ signal handlers ------------------------- */

static mut PREV_SIGSEGV: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
static mut PREV_SIGBUS: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
static mut PREV_SIGILL: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
static mut PREV_SIGFPE: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();
static mut PREV_SIGTRAP: MaybeUninit<libc::sigaction> = MaybeUninit::uninit();

fn ensure_signal_handlers_are_registered() {
    static SIGNAL_HANDLERS: Once = Once::new();

    SIGNAL_HANDLERS.call_once(|| unsafe {
        foreach_handler(|slot, signal| {
            let mut handler: libc::sigaction = mem::zeroed();
            // SA_SIGINFO gives us the program counter of the fault,
            // SA_ONSTACK runs us on the alternate stack so stack
            // exhaustion is survivable, SA_NODEFER lets a crash inside
            // the handler fall through to the previous handler.
            handler.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER | libc::SA_ONSTACK;
            handler.sa_sigaction = trap_handler as usize;
            libc::sigemptyset(&mut handler.sa_mask);
            if libc::sigaction(signal, &handler, slot) != 0 {
                panic!("unable to install signal handler");
            }
        });
    });
}

unsafe fn foreach_handler(mut f: impl FnMut(*mut libc::sigaction, i32)) {
    // BRK-encoded wasm traps arrive as SIGTRAP on AArch64.
    f(PREV_SIGTRAP.as_mut_ptr(), libc::SIGTRAP);

    // Out-of-bounds accesses against guarded memory and stack overflow.
    f(PREV_SIGSEGV.as_mut_ptr(), libc::SIGSEGV);

    // `ud2`-style unreachable markers on x86 hosts.
    f(PREV_SIGILL.as_mut_ptr(), libc::SIGILL);

    // x86 and s390x report division by zero through SIGFPE.
    if cfg!(target_arch = "x86_64") || cfg!(target_arch = "s390x") {
        f(PREV_SIGFPE.as_mut_ptr(), libc::SIGFPE);
    }

    // Darwin raises guard-page accesses as SIGBUS.
    if cfg!(target_os = "macos") || cfg!(target_os = "freebsd") {
        f(PREV_SIGBUS.as_mut_ptr(), libc::SIGBUS);
    }
}

/// Installs the 64KiB alternate signal stack for this thread, once.
fn ensure_signal_stack() {
    if SIGNAL_STACK.get().is_some() {
        return;
    }
    let mut mmap = crate::Mmap::new(crate::SIGNAL_STACK_SIZE).expect("signal stack allocation");
    let stack = libc::stack_t {
        ss_sp: mmap.as_mut_ptr().cast(),
        ss_flags: 0,
        ss_size: crate::SIGNAL_STACK_SIZE,
    };
    unsafe {
        if libc::sigaltstack(&stack, ptr::null_mut()) != 0 {
            panic!("unable to install alternate signal stack");
        }
    }
    SIGNAL_STACK.set(Some(mmap.as_mut_ptr() as usize));
    // Keep the mapping for the life of the thread.
    mem::forget(mmap);
}

/// Caches this thread's stack bounds so the SIGSEGV handler can tell a
/// native stack overflow from a stray fault.
fn ensure_stack_bounds() {
    if STACK_BOUNDS.get().is_some() {
        return;
    }
    STACK_BOUNDS.set(query_stack_bounds());
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn query_stack_bounds() -> Option<StackBounds> {
            unsafe {
                let mut attr: libc::pthread_attr_t = mem::zeroed();
                if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
                    return None;
                }
                let mut base = ptr::null_mut();
                let mut size = 0;
                let mut guard = 0;
                let ok = libc::pthread_attr_getstack(&attr, &mut base, &mut size) == 0
                    && libc::pthread_attr_getguardsize(&attr, &mut guard) == 0;
                libc::pthread_attr_destroy(&mut attr);
                if !ok {
                    return None;
                }
                let _ = size;
                Some(StackBounds {
                    lo: base as usize,
                    guard: guard.max(crate::host_page_size()),
                })
            }
        }
    } else if #[cfg(target_os = "macos")] {
        fn query_stack_bounds() -> Option<StackBounds> {
            unsafe {
                let thread = libc::pthread_self();
                let hi = libc::pthread_get_stackaddr_np(thread) as usize;
                let size = libc::pthread_get_stacksize_np(thread);
                Some(StackBounds {
                    lo: hi - size,
                    guard: crate::host_page_size(),
                })
            }
        }
    } else {
        fn query_stack_bounds() -> Option<StackBounds> {
            None
        }
    }
}

unsafe extern "C" fn trap_handler(
    signum: libc::c_int,
    siginfo: *mut libc::siginfo_t,
    context: *mut c_void,
) {
    let previous = match signum {
        libc::SIGSEGV => PREV_SIGSEGV.as_ptr(),
        libc::SIGBUS => PREV_SIGBUS.as_ptr(),
        libc::SIGFPE => PREV_SIGFPE.as_ptr(),
        libc::SIGILL => PREV_SIGILL.as_ptr(),
        libc::SIGTRAP => PREV_SIGTRAP.as_ptr(),
        _ => return,
    };

    let handled = (|| {
        // If no trampoline guard is armed on this thread, the fault is
        // not a wasm trap.
        let Some(state) = TLS.get() else {
            return false;
        };
        let state = &*state;

        let pc = context_pc(context);
        let trap = match signum {
            libc::SIGTRAP | libc::SIGILL => {
                // Only decode instructions inside installed JIT code;
                // breakpoints in host code belong to a debugger.
                if code_memory::lookup_exec(pc).is_none() {
                    return false;
                }
                let insn = ptr::read_unaligned(pc as *const u32);
                match decode_brk(insn) {
                    Some(imm) => Trap::from_brk_immediate(imm),
                    None if signum == libc::SIGILL => Trap::UnreachableCodeReached,
                    None => Trap::Unknown,
                }
            }
            libc::SIGFPE => Trap::IntegerDivisionByZero,
            libc::SIGSEGV | libc::SIGBUS => state.classify_fault(fault_addr(siginfo)),
            _ => return false,
        };

        state.trap.set(Some(trap));
        resume_from_handler(context, state)
    })();

    if handled {
        return;
    }

    // Not ours: forward to whatever was installed before us.
    let previous = *previous;
    if previous.sa_flags & libc::SA_SIGINFO != 0 {
        mem::transmute::<usize, extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut c_void)>(
            previous.sa_sigaction,
        )(signum, siginfo, context);
    } else if previous.sa_sigaction == libc::SIG_DFL || previous.sa_sigaction == libc::SIG_IGN {
        libc::sigaction(signum, &previous as *const _, ptr::null_mut());
    } else {
        mem::transmute::<usize, extern "C" fn(libc::c_int)>(previous.sa_sigaction)(signum);
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        // On Darwin, longjmp out of a signal handler running on the
        // alternate stack is unreliable; resume the faulting thread at a
        // shim that performs the jump instead. Returns true so the
        // handler itself simply returns.
        unsafe fn resume_from_handler(context: *mut c_void, state: &CallThreadState) -> bool {
            unsafe extern "C" fn longjmp_shim(jmp_buf: *const c_void) -> ! {
                wjrt_longjmp(jmp_buf)
            }
            set_resume_pc(context, longjmp_shim as usize, state.jmp_buf.get() as usize);
            true
        }
    } else {
        unsafe fn resume_from_handler(_context: *mut c_void, state: &CallThreadState) -> bool {
            wjrt_longjmp(state.jmp_buf.get())
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        unsafe fn fault_addr(siginfo: *mut libc::siginfo_t) -> usize {
            (*siginfo).si_addr() as usize
        }
    } else {
        unsafe fn fault_addr(siginfo: *mut libc::siginfo_t) -> usize {
            (*siginfo).si_addr as usize
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_arch = "aarch64"))] {
        unsafe fn context_pc(cx: *mut c_void) -> usize {
            let cx = &*(cx as *const libc::ucontext_t);
            cx.uc_mcontext.pc as usize
        }
    } else if #[cfg(all(target_os = "linux", target_arch = "x86_64"))] {
        unsafe fn context_pc(cx: *mut c_void) -> usize {
            let cx = &*(cx as *const libc::ucontext_t);
            cx.uc_mcontext.gregs[libc::REG_RIP as usize] as usize
        }
    } else if #[cfg(all(target_os = "macos", target_arch = "aarch64"))] {
        unsafe fn context_pc(cx: *mut c_void) -> usize {
            let cx = &*(cx as *const libc::ucontext_t);
            (*cx.uc_mcontext).__ss.__pc as usize
        }
    } else {
        unsafe fn context_pc(_cx: *mut c_void) -> usize {
            0
        }
    }
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe fn set_resume_pc(cx: *mut c_void, pc: usize, arg0: usize) {
    let cx = &mut *(cx as *mut libc::ucontext_t);
    (*cx.uc_mcontext).__ss.__pc = pc as u64;
    (*cx.uc_mcontext).__ss.__x[0] = arg0 as u64;
}

#[cfg(all(target_os = "macos", not(target_arch = "aarch64")))]
unsafe fn set_resume_pc(_cx: *mut c_void, _pc: usize, _arg0: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    // serialize tests that assert the recorded global trap code
    fn test_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[test]
    fn completed_closure_is_ok() {
        let mut ran = false;
        catch_traps(ptr::null_mut(), || ran = true).unwrap();
        assert!(ran);
    }

    #[test]
    fn raised_trap_unwinds_to_guard() {
        let _guard = test_lock();
        crate::clear_trap();
        let err = catch_traps(ptr::null_mut(), || {
            raise_trap(Trap::IntegerDivisionByZero);
        })
        .unwrap_err();
        assert_eq!(err, Trap::IntegerDivisionByZero);
        assert_eq!(crate::get_trap_code(), 6);
    }

    #[test]
    fn guards_nest() {
        let _guard = test_lock();
        let err = catch_traps(ptr::null_mut(), || {
            // inner guard consumes its trap, outer completes
            let inner = catch_traps(ptr::null_mut(), || {
                raise_trap(Trap::MemoryOutOfBounds);
            });
            assert_eq!(inner.unwrap_err(), Trap::MemoryOutOfBounds);
        });
        assert!(err.is_ok());
    }
}
