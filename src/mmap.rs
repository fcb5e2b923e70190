use crate::Error;
use core::ops::Range;
use core::ptr::NonNull;
use core::{ptr, slice};
use rustix::mm::{MapFlags, MprotectFlags, ProtFlags};

/// A page-granular anonymous mapping.
///
/// This is the one place the crate talks to the OS about plain memory;
/// executable mappings add the platform W^X discipline on top in
/// [`crate::code_memory`].
#[derive(Debug)]
pub struct Mmap {
    memory: NonNull<[u8]>,
}

// The mapping is owned and not aliased by anything that outlives it.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        /// `MAP_JIT`; not modeled by `rustix::mm::MapFlags`.
        const MAP_JIT_BITS: u32 = 0x800;
    }
}

impl Mmap {
    pub fn new_empty() -> Self {
        Self {
            memory: NonNull::from(&mut []),
        }
    }

    /// A read-write mapping of `size` bytes.
    pub fn new(size: usize) -> crate::Result<Self> {
        debug_assert!(usize_is_multiple_of_host_page_size(size));
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
            .map_err(|_| Error::OutOfMemory)?
        };
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Ok(Mmap {
            memory: NonNull::new(memory).ok_or(Error::OutOfMemory)?,
        })
    }

    /// A `PROT_NONE` reservation of `size` bytes; pages become usable
    /// through [`Mmap::make_accessible`].
    pub fn with_reserve(size: usize) -> crate::Result<Self> {
        debug_assert!(usize_is_multiple_of_host_page_size(size));
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                ProtFlags::empty(),
                MapFlags::PRIVATE,
            )
            .map_err(|_| Error::OutOfMemory)?
        };
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Ok(Mmap {
            memory: NonNull::new(memory).ok_or(Error::OutOfMemory)?,
        })
    }

    /// A mapping suitable for holding JIT code on this platform.
    ///
    /// On Apple Silicon this maps `MAP_JIT` read-write-execute and relies
    /// on the per-thread write-protect toggle around writes; everywhere
    /// else it is a plain read-write mapping that is later flipped to
    /// read-execute.
    #[cfg(target_os = "macos")]
    pub fn new_jit(size: usize) -> crate::Result<Self> {
        debug_assert!(size % crate::host_page_size() == 0);
        let flags = MapFlags::PRIVATE | MapFlags::from_bits_retain(MAP_JIT_BITS);
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC,
                flags,
            )
            .map_err(|_| Error::OutOfMemory)?
        };
        let memory = unsafe { slice::from_raw_parts_mut(ptr.cast(), size) };
        Ok(Mmap {
            memory: NonNull::new(memory).ok_or(Error::OutOfMemory)?,
        })
    }

    /// See the `macos` variant above; plain W^X targets start read-write.
    #[cfg(not(target_os = "macos"))]
    pub fn new_jit(size: usize) -> crate::Result<Self> {
        Self::new(size)
    }

    #[inline]
    pub unsafe fn slice(&self, range: Range<usize>) -> &[u8] {
        assert!(range.start <= range.end);
        assert!(range.end <= self.len());
        slice::from_raw_parts(self.as_ptr().add(range.start), range.end - range.start)
    }

    pub unsafe fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        assert!(range.start <= range.end);
        assert!(range.end <= self.len());
        slice::from_raw_parts_mut(self.as_mut_ptr().add(range.start), range.end - range.start)
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.memory.as_ptr() as *const u8
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.memory.as_ptr().cast()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes `[start, start+len)` to read-write.
    pub fn make_accessible(&mut self, start: usize, len: usize) -> crate::Result<()> {
        debug_assert!(start % crate::host_page_size() == 0);
        unsafe {
            rustix::mm::mprotect(
                self.memory.as_ptr().cast::<u8>().add(start).cast(),
                len,
                MprotectFlags::READ | MprotectFlags::WRITE,
            )
            .map_err(|_| Error::ProtectFailed)
        }
    }

    /// Flips `range` to read-execute.
    pub unsafe fn make_executable(&self, range: Range<usize>) -> crate::Result<()> {
        assert!(range.start <= range.end);
        assert!(range.end <= self.len());
        assert!(
            range.start % crate::host_page_size() == 0,
            "changing of protections isn't page-aligned",
        );

        let base = self.memory.as_ptr().cast::<u8>().add(range.start).cast();
        rustix::mm::mprotect(base, range.end - range.start, MprotectFlags::READ | MprotectFlags::EXEC)
            .map_err(|_| Error::ProtectFailed)
    }

    /// Flips `range` to read-only.
    pub unsafe fn make_readonly(&self, range: Range<usize>) -> crate::Result<()> {
        assert!(range.start <= range.end);
        assert!(range.end <= self.len());
        assert!(
            range.start % crate::host_page_size() == 0,
            "changing of protections isn't page-aligned",
        );

        let base = self.memory.as_ptr().cast::<u8>().add(range.start).cast();
        rustix::mm::mprotect(base, range.end - range.start, MprotectFlags::READ)
            .map_err(|_| Error::ProtectFailed)
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            let ptr = self.memory.as_ptr().cast();
            let len = self.memory.len();
            if len == 0 {
                return;
            }
            rustix::mm::munmap(ptr, len).expect("munmap failed");
        }
    }
}

/// Is `bytes` a multiple of the host page size?
pub(crate) fn usize_is_multiple_of_host_page_size(bytes: usize) -> bool {
    bytes % crate::host_page_size() == 0
}

pub(crate) fn round_usize_up_to_host_pages(bytes: usize) -> usize {
    let page_size = crate::host_page_size();
    debug_assert!(page_size.is_power_of_two());
    bytes
        .checked_add(page_size - 1)
        .map(|val| val & !(page_size - 1))
        .unwrap_or_else(|| {
            panic!("{bytes} is too large to be rounded up to a multiple of the host page size")
        })
}
