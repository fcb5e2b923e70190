//! Executable-memory manager.
//!
//! Arenas are page-sized anonymous mappings tracked in a process-global
//! growable registry so they can be freed by base pointer and so the trap
//! substrate can tell whether a faulting PC lies in JIT code. Two W^X
//! disciplines hide behind the single `copy_code` operation: plain
//! read-write-then-`mprotect` on most targets, and `MAP_JIT` plus the
//! per-thread write-protect toggle on Apple Silicon. The instruction cache
//! is flushed for the written range on every install.

use crate::mmap::{round_usize_up_to_host_pages, Mmap};
use crate::Error;
use core::ffi::c_void;
use core::ptr::NonNull;
use spin::Mutex;

extern "C" {
    fn wjrt_icache_flush(addr: *mut c_void, len: usize);
}

#[derive(Debug)]
struct CodeBlock {
    mmap: Mmap,
}

impl CodeBlock {
    fn base(&self) -> usize {
        self.mmap.as_ptr() as usize
    }

    fn size(&self) -> usize {
        self.mmap.len()
    }
}

static REGISTRY: Mutex<Vec<CodeBlock>> = Mutex::new(Vec::new());

/// Allocates a page-rounded executable-code arena of at least `size`
/// bytes and returns its base, or `Err(OutOfMemory)`.
pub fn alloc_exec(size: usize) -> crate::Result<NonNull<u8>> {
    let size = round_usize_up_to_host_pages(size.max(1));
    let mmap = Mmap::new_jit(size)?;
    let base = NonNull::new(mmap.as_ptr() as *mut u8).ok_or(Error::OutOfMemory)?;

    tracing::trace!(base = ?base.as_ptr(), size, "allocated exec arena");
    REGISTRY.lock().push(CodeBlock { mmap });
    Ok(base)
}

/// Copies `bytes` into the arena at `base` and finalizes permissions.
///
/// On failure to change protections the arena is rejected for execution
/// but stays tracked until the next [`free_exec`].
pub fn copy_code(base: NonNull<u8>, bytes: &[u8]) -> crate::Result<()> {
    let mut registry = REGISTRY.lock();
    let block = registry
        .iter_mut()
        .find(|b| b.base() == base.as_ptr() as usize)
        .ok_or(Error::UnknownCodeBlock)?;

    if bytes.len() > block.size() {
        return Err(Error::CodeTooLarge);
    }

    cfg_if::cfg_if! {
        if #[cfg(all(target_os = "macos", target_arch = "aarch64"))] {
            unsafe {
                libc::pthread_jit_write_protect_np(0);
                block.mmap.slice_mut(0..bytes.len()).copy_from_slice(bytes);
                libc::pthread_jit_write_protect_np(1);
            }
        } else {
            unsafe {
                block.mmap.slice_mut(0..bytes.len()).copy_from_slice(bytes);
                block.mmap.make_executable(0..block.size())?;
            }
        }
    }

    unsafe {
        wjrt_icache_flush(base.as_ptr().cast(), bytes.len());
    }
    tracing::trace!(base = ?base.as_ptr(), len = bytes.len(), "installed code");
    Ok(())
}

/// Releases the arena at `base`. Unknown bases are an error.
pub fn free_exec(base: NonNull<u8>) -> crate::Result<()> {
    let mut registry = REGISTRY.lock();
    let idx = registry
        .iter()
        .position(|b| b.base() == base.as_ptr() as usize)
        .ok_or(Error::UnknownCodeBlock)?;

    // Swap-with-tail keeps free O(n) in the number of live blocks.
    registry.swap_remove(idx);
    if registry.is_empty() {
        *registry = Vec::new();
    }
    Ok(())
}

/// Whether `pc` lies inside a tracked arena, and where.
///
/// Called from the signal handler, so this must not block: if the
/// registry is being mutated on another thread the lookup conservatively
/// reports "not ours".
pub fn lookup_exec(pc: usize) -> Option<(usize, usize)> {
    let registry = REGISTRY.try_lock()?;
    registry
        .iter()
        .find(|b| pc >= b.base() && pc < b.base() + b.size())
        .map(|b| (b.base(), b.size()))
}
