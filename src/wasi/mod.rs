//! WASI preview 1 host binding.
//!
//! Each syscall is an `extern "C"` host import in the trampoline ABI:
//! `(vmctx, caller_vmctx, ...args) -> errno`. Guest pointers are 32-bit
//! offsets into linear memory 0 and every access is bounds-checked; a bad
//! pointer is EINVAL, never a fault. Host errno values are translated to
//! WASI constants at the failure point.

pub mod fd;
pub mod misc;
pub mod path;

use crate::vm::{Instance, VMContext};
use crate::Error;
use std::ffi::CString;

pub const ERRNO_SUCCESS: i32 = 0;
pub const ERRNO_ACCES: i32 = 2;
pub const ERRNO_BADF: i32 = 8;
pub const ERRNO_EXIST: i32 = 20;
pub const ERRNO_INVAL: i32 = 28;
pub const ERRNO_IO: i32 = 29;
pub const ERRNO_ISDIR: i32 = 31;
pub const ERRNO_NOENT: i32 = 44;
pub const ERRNO_NOSYS: i32 = 52;
pub const ERRNO_NOTDIR: i32 = 54;
pub const ERRNO_NOTEMPTY: i32 = 55;
pub const ERRNO_SPIPE: i32 = 70;

pub(crate) const FILETYPE_UNKNOWN: u8 = 0;
pub(crate) const FILETYPE_BLOCK_DEVICE: u8 = 1;
pub(crate) const FILETYPE_CHARACTER_DEVICE: u8 = 2;
pub(crate) const FILETYPE_DIRECTORY: u8 = 3;
pub(crate) const FILETYPE_REGULAR_FILE: u8 = 4;
pub(crate) const FILETYPE_SOCKET_DGRAM: u8 = 5;
pub(crate) const FILETYPE_SOCKET_STREAM: u8 = 6;
pub(crate) const FILETYPE_SYMBOLIC_LINK: u8 = 7;

pub(crate) const FDFLAGS_APPEND: u16 = 1 << 0;
pub(crate) const FDFLAGS_DSYNC: u16 = 1 << 1;
pub(crate) const FDFLAGS_NONBLOCK: u16 = 1 << 2;
pub(crate) const FDFLAGS_RSYNC: u16 = 1 << 3;
pub(crate) const FDFLAGS_SYNC: u16 = 1 << 4;

pub(crate) const OFLAGS_CREAT: u16 = 1 << 0;
pub(crate) const OFLAGS_DIRECTORY: u16 = 1 << 1;
pub(crate) const OFLAGS_EXCL: u16 = 1 << 2;
pub(crate) const OFLAGS_TRUNC: u16 = 1 << 3;

pub(crate) const RIGHTS_FD_READ: u64 = 1 << 1;
pub(crate) const RIGHTS_FD_WRITE: u64 = 1 << 6;

pub(crate) const LOOKUPFLAGS_SYMLINK_FOLLOW: u32 = 1;

/// Translates a host `errno` into the WASI constant surface.
pub(crate) fn errno_from_host(host: i32) -> i32 {
    match host {
        0 => ERRNO_SUCCESS,
        libc::EACCES | libc::EPERM => ERRNO_ACCES,
        libc::EBADF => ERRNO_BADF,
        libc::EEXIST => ERRNO_EXIST,
        libc::EINVAL => ERRNO_INVAL,
        libc::EISDIR => ERRNO_ISDIR,
        libc::ENOENT => ERRNO_NOENT,
        libc::ENOSYS => ERRNO_NOSYS,
        libc::ENOTDIR => ERRNO_NOTDIR,
        libc::ENOTEMPTY => ERRNO_NOTEMPTY,
        libc::ESPIPE => ERRNO_SPIPE,
        _ => ERRNO_IO,
    }
}

/// The WASI errno for the host error of the last failed syscall.
pub(crate) fn last_errno() -> i32 {
    errno_from_host(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

#[derive(Debug)]
pub(crate) struct Preopen {
    pub host_path: Vec<u8>,
    pub guest_path: Vec<u8>,
}

/// Per-instance WASI state: the fd table, the preopen directory map and
/// the argv/environ strings.
///
/// `fd_table[i]` holds the host fd backing WASI fd `i`, or −1 when the
/// slot is free. Rows 0–2 are permanently the host stdio (or `/dev/null`
/// in quiet mode); preopens occupy `3..3+preopen_count`; application fds
/// are allocated above that, smallest free index first, growing the
/// table geometrically when full.
#[derive(Debug)]
pub struct WasiCtx {
    pub(crate) args: Vec<Vec<u8>>,
    pub(crate) envs: Vec<Vec<u8>>,
    pub(crate) preopens: Vec<Preopen>,
    pub(crate) fd_table: Vec<i32>,
    pub(crate) fd_next: usize,
    quiet_null_fd: Option<i32>,
}

impl WasiCtx {
    fn new(quiet: bool) -> crate::Result<Self> {
        let mut ctx = WasiCtx {
            args: Vec::new(),
            envs: Vec::new(),
            preopens: Vec::new(),
            fd_table: vec![0, 1, 2],
            fd_next: 3,
            quiet_null_fd: None,
        };
        if quiet {
            let null = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
            if null < 0 {
                return Err(Error::WasiSetup);
            }
            ctx.fd_table = vec![null, null, null];
            ctx.quiet_null_fd = Some(null);
        }
        Ok(ctx)
    }

    pub(crate) fn host_fd(&self, fd: i32) -> Option<i32> {
        let host = *self.fd_table.get(usize::try_from(fd).ok()?)?;
        if host < 0 {
            None
        } else {
            Some(host)
        }
    }

    /// The preopen registered at WASI fd `fd`, if `fd` names one.
    pub(crate) fn preopen(&self, fd: i32) -> Option<&Preopen> {
        let idx = usize::try_from(fd).ok()?.checked_sub(3)?;
        let preopen = self.preopens.get(idx)?;
        if self.fd_table.get(fd as usize).copied()? < 0 {
            return None;
        }
        Some(preopen)
    }

    /// Allocates the smallest free WASI fd ≥ `fd_next` for `host_fd`.
    pub(crate) fn alloc_fd(&mut self, host_fd: i32) -> i32 {
        let floor = self.fd_next.max(3 + self.preopens.len());
        if let Some(off) = self.fd_table[floor.min(self.fd_table.len())..]
            .iter()
            .position(|&h| h < 0)
        {
            let idx = floor.min(self.fd_table.len()) + off;
            self.fd_table[idx] = host_fd;
            self.fd_next = idx + 1;
            return idx as i32;
        }
        if self.fd_table.len() < floor {
            self.fd_table.resize(floor, -1);
        }
        self.fd_table.push(host_fd);
        let idx = self.fd_table.len() - 1;
        self.fd_next = idx + 1;
        // grow capacity geometrically so repeated opens stay cheap
        if self.fd_table.len() == self.fd_table.capacity() {
            self.fd_table.reserve(self.fd_table.len());
        }
        idx as i32
    }

    pub(crate) fn release_fd(&mut self, fd: i32) {
        if let Some(slot) = self.fd_table.get_mut(fd as usize) {
            *slot = -1;
            self.fd_next = self.fd_next.min(fd as usize);
        }
    }

    fn close_all(&mut self) {
        for (idx, slot) in self.fd_table.iter_mut().enumerate() {
            if idx >= 3 && *slot >= 0 {
                unsafe { libc::close(*slot) };
            }
            *slot = if idx < 3 { *slot } else { -1 };
        }
        if let Some(null) = self.quiet_null_fd.take() {
            unsafe { libc::close(null) };
            self.fd_table[..3].fill(-1);
        }
        self.preopens.clear();
        self.fd_next = 3;
    }
}

impl Drop for WasiCtx {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl Instance {
    /// Sets up the WASI fd table with host stdio on fds 0–2.
    pub fn init_wasi_fds(&mut self) -> crate::Result<()> {
        self.wasi = Some(WasiCtx::new(false)?);
        Ok(())
    }

    /// Quiet variant: fds 0–2 are routed to `/dev/null`.
    pub fn init_wasi_fds_quiet(&mut self) -> crate::Result<()> {
        self.wasi = Some(WasiCtx::new(true)?);
        Ok(())
    }

    /// Registers a preopen directory pair, returning its WASI fd.
    pub fn add_preopen(&mut self, host_path: &str, guest_path: &str) -> crate::Result<i32> {
        let wasi = self.wasi.as_mut().ok_or(Error::WasiSetup)?;
        let c_host = CString::new(host_path).map_err(|_| Error::WasiSetup)?;
        let host_fd = unsafe { libc::open(c_host.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        if host_fd < 0 {
            return Err(Error::WasiSetup);
        }

        let fd = 3 + wasi.preopens.len();
        if wasi.fd_table.len() <= fd {
            wasi.fd_table.resize(fd + 1, -1);
        }
        wasi.fd_table[fd] = host_fd;
        wasi.preopens.push(Preopen {
            host_path: host_path.as_bytes().to_vec(),
            guest_path: guest_path.as_bytes().to_vec(),
        });
        wasi.fd_next = wasi.fd_next.max(fd + 1);
        tracing::debug!(host_path, guest_path, fd, "registered preopen");
        Ok(fd as i32)
    }

    pub fn set_wasi_args(&mut self, args: &[&str]) -> crate::Result<()> {
        let wasi = self.wasi.as_mut().ok_or(Error::WasiSetup)?;
        wasi.args = args.iter().map(|a| a.as_bytes().to_vec()).collect();
        Ok(())
    }

    /// Appends a single argv entry.
    pub fn add_wasi_arg(&mut self, arg: &str) -> crate::Result<()> {
        let wasi = self.wasi.as_mut().ok_or(Error::WasiSetup)?;
        wasi.args.push(arg.as_bytes().to_vec());
        Ok(())
    }

    /// Environment variables in `NAME=VALUE` form.
    pub fn set_wasi_envs(&mut self, envs: &[&str]) -> crate::Result<()> {
        let wasi = self.wasi.as_mut().ok_or(Error::WasiSetup)?;
        wasi.envs = envs.iter().map(|e| e.as_bytes().to_vec()).collect();
        Ok(())
    }

    /// Appends a single `NAME=VALUE` environment entry.
    pub fn add_wasi_env(&mut self, env: &str) -> crate::Result<()> {
        let wasi = self.wasi.as_mut().ok_or(Error::WasiSetup)?;
        wasi.envs.push(env.as_bytes().to_vec());
        Ok(())
    }

    /// Registers a host file descriptor (for example a listening socket
    /// the embedder prepared) and returns the WASI fd now backing it.
    /// Ownership transfers: the fd is closed with the instance.
    pub fn add_wasi_fd(&mut self, host_fd: i32) -> crate::Result<i32> {
        if host_fd < 0 {
            return Err(Error::WasiSetup);
        }
        let wasi = self.wasi.as_mut().ok_or(Error::WasiSetup)?;
        Ok(wasi.alloc_fd(host_fd))
    }

    /// Closes every fd the binding owns. Idempotent; also performed when
    /// the instance drops.
    pub fn free_wasi_fds(&mut self) {
        if let Some(wasi) = self.wasi.as_mut() {
            wasi.close_all();
        }
    }
}

/* ---------------------- guest memory plumbing --------------------- */

/// A bounds-checked view of linear memory 0 for syscall marshaling.
pub(crate) struct GuestMem {
    base: *mut u8,
    len: usize,
}

impl GuestMem {
    pub(crate) unsafe fn from_vmctx(vmctx: *mut VMContext) -> Result<GuestMem, i32> {
        if vmctx.is_null() {
            return Err(ERRNO_INVAL);
        }
        let ctx = &*vmctx;
        if ctx.memory_base.is_null() {
            return Err(ERRNO_INVAL);
        }
        Ok(GuestMem {
            base: ctx.memory_base,
            len: ctx.memory_size as usize,
        })
    }

    fn check(&self, ptr: u32, len: usize) -> Result<usize, i32> {
        let ptr = ptr as usize;
        if ptr > self.len || self.len - ptr < len {
            return Err(ERRNO_INVAL);
        }
        Ok(ptr)
    }

    pub(crate) fn slice(&self, ptr: u32, len: u32) -> Result<&[u8], i32> {
        let off = self.check(ptr, len as usize)?;
        Ok(unsafe { core::slice::from_raw_parts(self.base.add(off), len as usize) })
    }

    pub(crate) fn slice_mut(&self, ptr: u32, len: u32) -> Result<&mut [u8], i32> {
        let off = self.check(ptr, len as usize)?;
        Ok(unsafe { core::slice::from_raw_parts_mut(self.base.add(off), len as usize) })
    }

    pub(crate) fn read_u32(&self, ptr: u32) -> Result<u32, i32> {
        Ok(u32::from_le_bytes(self.slice(ptr, 4)?.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&self, ptr: u32) -> Result<u64, i32> {
        Ok(u64::from_le_bytes(self.slice(ptr, 8)?.try_into().unwrap()))
    }

    pub(crate) fn write_u8(&self, ptr: u32, v: u8) -> Result<(), i32> {
        self.slice_mut(ptr, 1)?[0] = v;
        Ok(())
    }

    pub(crate) fn write_u16(&self, ptr: u32, v: u16) -> Result<(), i32> {
        self.slice_mut(ptr, 2)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub(crate) fn write_u32(&self, ptr: u32, v: u32) -> Result<(), i32> {
        self.slice_mut(ptr, 4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub(crate) fn write_u64(&self, ptr: u32, v: u64) -> Result<(), i32> {
        self.slice_mut(ptr, 8)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub(crate) fn write_bytes(&self, ptr: u32, bytes: &[u8]) -> Result<(), i32> {
        self.slice_mut(ptr, bytes.len() as u32)?.copy_from_slice(bytes);
        Ok(())
    }

    /// Raw pointer to an offset that was already bounds-checked (for
    /// iovec staging).
    pub(crate) fn raw_ptr(&self, ptr: u32) -> *mut u8 {
        debug_assert!((ptr as usize) <= self.len);
        unsafe { self.base.add(ptr as usize) }
    }

    /// A guest path as a NUL-terminated host string.
    pub(crate) fn read_path(&self, ptr: u32, len: u32) -> Result<CString, i32> {
        let bytes = self.slice(ptr, len)?;
        CString::new(bytes).map_err(|_| ERRNO_INVAL)
    }

    /// `(buf, buf_len)` pairs of an iovec array.
    pub(crate) fn iovecs(
        &self,
        iovs: u32,
        iovs_len: u32,
    ) -> Result<smallvec::SmallVec<[(u32, u32); 8]>, i32> {
        let mut out = smallvec::SmallVec::new();
        for i in 0..iovs_len {
            let entry = iovs
                .checked_add(i.checked_mul(8).ok_or(ERRNO_INVAL)?)
                .ok_or(ERRNO_INVAL)?;
            let buf = self.read_u32(entry)?;
            let buf_len = self.read_u32(entry + 4)?;
            // validate eagerly so partial writes can't fault later
            self.check(buf, buf_len as usize)?;
            out.push((buf, buf_len));
        }
        Ok(out)
    }
}

/// Recovers the WASI state, or EINVAL when the instance has none.
pub(crate) unsafe fn wasi_ctx<'a>(vmctx: *mut VMContext) -> Result<&'a mut WasiCtx, i32> {
    if vmctx.is_null() {
        return Err(ERRNO_INVAL);
    }
    Instance::from_vmctx(vmctx)
        .wasi
        .as_mut()
        .ok_or(ERRNO_INVAL)
}

/// Shared shape of every syscall body: run, map `Err(errno)` to the
/// return value.
pub(crate) fn wasi_call(f: impl FnOnce() -> Result<(), i32>) -> i32 {
    match f() {
        Ok(()) => ERRNO_SUCCESS,
        Err(errno) => errno,
    }
}

/// Filetype of a host `st_mode`.
pub(crate) fn filetype_of_mode(mode: libc::mode_t) -> u8 {
    match mode & libc::S_IFMT {
        libc::S_IFCHR => FILETYPE_CHARACTER_DEVICE,
        libc::S_IFBLK => FILETYPE_BLOCK_DEVICE,
        libc::S_IFDIR => FILETYPE_DIRECTORY,
        libc::S_IFREG => FILETYPE_REGULAR_FILE,
        libc::S_IFLNK => FILETYPE_SYMBOLIC_LINK,
        libc::S_IFSOCK => FILETYPE_SOCKET_STREAM,
        _ => FILETYPE_UNKNOWN,
    }
}
