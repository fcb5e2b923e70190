//! `path_*` syscalls.
//!
//! Paths resolve against the preopen directory named by the fd argument;
//! any other fd is EBADF. Resolution is a plain join of the preopen's
//! host path with the guest-relative path.

use super::*;
use std::ffi::CString;

pub(crate) fn resolve(wasi: &WasiCtx, dirfd: i32, guest_path: &[u8]) -> Result<CString, i32> {
    let preopen = wasi.preopen(dirfd).ok_or(ERRNO_BADF)?;
    let rel = guest_path.strip_prefix(b"/").unwrap_or(guest_path);

    let mut full = preopen.host_path.clone();
    if !full.ends_with(b"/") && !rel.is_empty() {
        full.push(b'/');
    }
    full.extend_from_slice(rel);
    CString::new(full).map_err(|_| ERRNO_INVAL)
}

unsafe fn resolve_arg(
    vmctx: *mut VMContext,
    dirfd: i32,
    path: u32,
    path_len: u32,
) -> Result<CString, i32> {
    let mem = GuestMem::from_vmctx(vmctx)?;
    let bytes = mem.slice(path, path_len)?.to_vec();
    let wasi = wasi_ctx(vmctx)?;
    resolve(wasi, dirfd, &bytes)
}

pub unsafe extern "C" fn path_open(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    dirflags: u32,
    path: u32,
    path_len: u32,
    oflags: u32,
    rights_base: u64,
    _rights_inheriting: u64,
    fdflags: u32,
    opened_fd: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        let oflags = oflags as u16;
        let fdflags = fdflags as u16;

        let read = rights_base & RIGHTS_FD_READ != 0;
        let write = rights_base & RIGHTS_FD_WRITE != 0;
        let mut flags = match (read, write) {
            (_, false) => libc::O_RDONLY,
            (false, true) => libc::O_WRONLY,
            (true, true) => libc::O_RDWR,
        };
        if oflags & OFLAGS_CREAT != 0 {
            flags |= libc::O_CREAT;
        }
        if oflags & OFLAGS_DIRECTORY != 0 {
            flags |= libc::O_DIRECTORY;
        }
        if oflags & OFLAGS_EXCL != 0 {
            flags |= libc::O_EXCL;
        }
        if oflags & OFLAGS_TRUNC != 0 {
            flags |= libc::O_TRUNC;
        }
        if fdflags & FDFLAGS_APPEND != 0 {
            flags |= libc::O_APPEND;
        }
        if fdflags & FDFLAGS_NONBLOCK != 0 {
            flags |= libc::O_NONBLOCK;
        }
        if dirflags & LOOKUPFLAGS_SYMLINK_FOLLOW == 0 {
            flags |= libc::O_NOFOLLOW;
        }

        let host_fd = libc::open(host_path.as_ptr(), flags, 0o644 as libc::c_uint);
        if host_fd < 0 {
            return Err(last_errno());
        }

        let wasi = wasi_ctx(vmctx)?;
        let fd = wasi.alloc_fd(host_fd);
        tracing::debug!(?host_path, fd, "path_open");
        mem.write_u32(opened_fd, fd as u32)
    })
}

pub unsafe extern "C" fn path_unlink_file(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    path: u32,
    path_len: u32,
) -> i32 {
    wasi_call(|| {
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        if libc::unlink(host_path.as_ptr()) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn path_remove_directory(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    path: u32,
    path_len: u32,
) -> i32 {
    wasi_call(|| {
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        if libc::rmdir(host_path.as_ptr()) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn path_create_directory(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    path: u32,
    path_len: u32,
) -> i32 {
    wasi_call(|| {
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        if libc::mkdir(host_path.as_ptr(), 0o755) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn path_rename(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    old_dirfd: i32,
    old_path: u32,
    old_path_len: u32,
    new_dirfd: i32,
    new_path: u32,
    new_path_len: u32,
) -> i32 {
    wasi_call(|| {
        let old = resolve_arg(vmctx, old_dirfd, old_path, old_path_len)?;
        let new = resolve_arg(vmctx, new_dirfd, new_path, new_path_len)?;
        if libc::rename(old.as_ptr(), new.as_ptr()) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn path_filestat_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    flags: u32,
    path: u32,
    path_len: u32,
    buf: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        let mut stat: libc::stat = core::mem::zeroed();
        let rc = if flags & LOOKUPFLAGS_SYMLINK_FOLLOW != 0 {
            libc::stat(host_path.as_ptr(), &mut stat)
        } else {
            libc::lstat(host_path.as_ptr(), &mut stat)
        };
        if rc < 0 {
            return Err(last_errno());
        }
        super::fd::write_filestat(&mem, buf, &stat)
    })
}

pub unsafe extern "C" fn path_filestat_set_times(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    flags: u32,
    path: u32,
    path_len: u32,
    atim: u64,
    mtim: u64,
    fst_flags: u32,
) -> i32 {
    wasi_call(|| {
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        let times = super::fd::times_from_flags(atim, mtim, fst_flags);
        let at_flags = if flags & LOOKUPFLAGS_SYMLINK_FOLLOW != 0 {
            0
        } else {
            libc::AT_SYMLINK_NOFOLLOW
        };
        if libc::utimensat(libc::AT_FDCWD, host_path.as_ptr(), times.as_ptr(), at_flags) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn path_link(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    old_dirfd: i32,
    _old_flags: u32,
    old_path: u32,
    old_path_len: u32,
    new_dirfd: i32,
    new_path: u32,
    new_path_len: u32,
) -> i32 {
    wasi_call(|| {
        let old = resolve_arg(vmctx, old_dirfd, old_path, old_path_len)?;
        let new = resolve_arg(vmctx, new_dirfd, new_path, new_path_len)?;
        if libc::link(old.as_ptr(), new.as_ptr()) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn path_readlink(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    dirfd: i32,
    path: u32,
    path_len: u32,
    buf: u32,
    buf_len: u32,
    bufused: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let host_path = resolve_arg(vmctx, dirfd, path, path_len)?;
        let out = mem.slice_mut(buf, buf_len)?;
        let n = libc::readlink(
            host_path.as_ptr(),
            out.as_mut_ptr().cast(),
            out.len(),
        );
        if n < 0 {
            return Err(last_errno());
        }
        mem.write_u32(bufused, n as u32)
    })
}

pub unsafe extern "C" fn path_symlink(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    old_path: u32,
    old_path_len: u32,
    dirfd: i32,
    new_path: u32,
    new_path_len: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        // the link target is used verbatim, only the link name resolves
        let target = mem.read_path(old_path, old_path_len)?;
        let new = resolve_arg(vmctx, dirfd, new_path, new_path_len)?;
        if libc::symlink(target.as_ptr(), new.as_ptr()) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_rules() {
        let mut wasi = WasiCtx::new(false).unwrap();
        wasi.preopens.push(Preopen {
            host_path: b"/tmp/x".to_vec(),
            guest_path: b"/x".to_vec(),
        });
        wasi.fd_table.push(10);

        assert_eq!(
            resolve(&wasi, 3, b"foo").unwrap().as_bytes(),
            b"/tmp/x/foo"
        );
        assert_eq!(
            resolve(&wasi, 3, b"/foo/bar").unwrap().as_bytes(),
            b"/tmp/x/foo/bar"
        );
        // not a preopen
        assert_eq!(resolve(&wasi, 0, b"foo").unwrap_err(), ERRNO_BADF);
        assert_eq!(resolve(&wasi, 4, b"foo").unwrap_err(), ERRNO_BADF);
        wasi.fd_table.clear();
    }
}
