//! `fd_*` syscalls.

use super::*;
use smallvec::SmallVec;

fn iovec_array(
    mem: &GuestMem,
    iovs: u32,
    iovs_len: u32,
) -> Result<SmallVec<[libc::iovec; 8]>, i32> {
    Ok(mem
        .iovecs(iovs, iovs_len)?
        .iter()
        .map(|&(buf, len)| libc::iovec {
            iov_base: mem.raw_ptr(buf).cast(),
            iov_len: len as usize,
        })
        .collect())
}

pub unsafe extern "C" fn fd_write(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    iovs: u32,
    iovs_len: u32,
    nwritten: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let vecs = iovec_array(&mem, iovs, iovs_len)?;
        let n = libc::writev(host_fd, vecs.as_ptr(), vecs.len() as i32);
        if n < 0 {
            return Err(last_errno());
        }
        mem.write_u32(nwritten, n as u32)
    })
}

pub unsafe extern "C" fn fd_read(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    iovs: u32,
    iovs_len: u32,
    nread: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let vecs = iovec_array(&mem, iovs, iovs_len)?;
        let n = libc::readv(host_fd, vecs.as_ptr(), vecs.len() as i32);
        if n < 0 {
            return Err(last_errno());
        }
        mem.write_u32(nread, n as u32)
    })
}

pub unsafe extern "C" fn fd_pread(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    iovs: u32,
    iovs_len: u32,
    offset: u64,
    nread: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let mut total: u64 = 0;
        for (buf, len) in mem.iovecs(iovs, iovs_len)? {
            let n = libc::pread(
                host_fd,
                mem.raw_ptr(buf).cast(),
                len as usize,
                (offset + total) as libc::off_t,
            );
            if n < 0 {
                return Err(last_errno());
            }
            total += n as u64;
            if (n as u32) < len {
                break;
            }
        }
        mem.write_u32(nread, total as u32)
    })
}

pub unsafe extern "C" fn fd_pwrite(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    iovs: u32,
    iovs_len: u32,
    offset: u64,
    nwritten: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let mut total: u64 = 0;
        for (buf, len) in mem.iovecs(iovs, iovs_len)? {
            let n = libc::pwrite(
                host_fd,
                mem.raw_ptr(buf).cast(),
                len as usize,
                (offset + total) as libc::off_t,
            );
            if n < 0 {
                return Err(last_errno());
            }
            total += n as u64;
            if (n as u32) < len {
                break;
            }
        }
        mem.write_u32(nwritten, total as u32)
    })
}

pub unsafe extern "C" fn fd_close(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        // stdio rows are permanent
        if (0..=2).contains(&fd) {
            wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
            return Ok(());
        }
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let rc = libc::close(host_fd);
        wasi.release_fd(fd);
        if rc < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn fd_seek(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    offset: i64,
    whence: i32,
    newoffset: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let whence = match whence {
            0 => libc::SEEK_SET,
            1 => libc::SEEK_CUR,
            2 => libc::SEEK_END,
            _ => return Err(ERRNO_INVAL),
        };
        let pos = libc::lseek(host_fd, offset as libc::off_t, whence);
        if pos < 0 {
            return Err(last_errno());
        }
        mem.write_u64(newoffset, pos as u64)
    })
}

pub unsafe extern "C" fn fd_tell(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    offset: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let pos = libc::lseek(host_fd, 0, libc::SEEK_CUR);
        if pos < 0 {
            return Err(last_errno());
        }
        mem.write_u64(offset, pos as u64)
    })
}

pub unsafe extern "C" fn fd_sync(vmctx: *mut VMContext, _caller: *mut VMContext, fd: i32) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        if libc::fsync(host_fd) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn fd_datasync(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                if libc::fdatasync(host_fd) < 0 {
                    return Err(last_errno());
                }
            } else {
                if libc::fsync(host_fd) < 0 {
                    return Err(last_errno());
                }
            }
        }
        Ok(())
    })
}

pub unsafe extern "C" fn fd_advise(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    offset: u64,
    len: u64,
    advice: i32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                let advice = match advice {
                    0 => libc::POSIX_FADV_NORMAL,
                    1 => libc::POSIX_FADV_SEQUENTIAL,
                    2 => libc::POSIX_FADV_RANDOM,
                    3 => libc::POSIX_FADV_WILLNEED,
                    4 => libc::POSIX_FADV_DONTNEED,
                    5 => libc::POSIX_FADV_NOREUSE,
                    _ => return Err(ERRNO_INVAL),
                };
                let rc = libc::posix_fadvise(host_fd, offset as libc::off_t, len as libc::off_t, advice);
                if rc != 0 {
                    return Err(errno_from_host(rc));
                }
            } else {
                // advisory only; accept and ignore
                let _ = (host_fd, offset, len, advice);
            }
        }
        Ok(())
    })
}

pub unsafe extern "C" fn fd_allocate(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    offset: u64,
    len: u64,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                let rc = libc::posix_fallocate(host_fd, offset as libc::off_t, len as libc::off_t);
                if rc != 0 {
                    return Err(errno_from_host(rc));
                }
            } else {
                let _ = (host_fd, offset, len);
                return Err(ERRNO_NOSYS);
            }
        }
        Ok(())
    })
}

pub unsafe extern "C" fn fd_renumber(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    from: i32,
    to: i32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_from = wasi.host_fd(from).ok_or(ERRNO_BADF)?;
        let host_to = wasi.host_fd(to).ok_or(ERRNO_BADF)?;
        if from == to {
            return Ok(());
        }
        if to >= 3 {
            libc::close(host_to);
        }
        wasi.fd_table[to as usize] = host_from;
        wasi.release_fd(from);
        Ok(())
    })
}

pub unsafe extern "C" fn fd_fdstat_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    buf: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;

        let mut stat: libc::stat = core::mem::zeroed();
        if libc::fstat(host_fd, &mut stat) < 0 {
            return Err(last_errno());
        }
        let mut fs_flags: u16 = 0;
        let fl = libc::fcntl(host_fd, libc::F_GETFL);
        if fl >= 0 {
            if fl & libc::O_APPEND != 0 {
                fs_flags |= FDFLAGS_APPEND;
            }
            if fl & libc::O_NONBLOCK != 0 {
                fs_flags |= FDFLAGS_NONBLOCK;
            }
        }
        // stdout/stderr are reported append-capable
        if fd == 1 || fd == 2 {
            fs_flags |= FDFLAGS_APPEND;
        }
        // stdio is always presented as a character device, whatever the
        // host redirected it to
        let filetype = if (0..=2).contains(&fd) {
            FILETYPE_CHARACTER_DEVICE
        } else {
            filetype_of_mode(stat.st_mode)
        };

        mem.write_u8(buf, filetype)?;
        mem.write_u8(buf + 1, 0)?;
        mem.write_u16(buf + 2, fs_flags)?;
        mem.write_u32(buf + 4, 0)?;
        mem.write_u64(buf + 8, u64::MAX)?;
        mem.write_u64(buf + 16, u64::MAX)?;
        Ok(())
    })
}

pub unsafe extern "C" fn fd_fdstat_set_flags(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    flags: u32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let flags = flags as u16;
        let mut host_flags = 0;
        if flags & FDFLAGS_APPEND != 0 {
            host_flags |= libc::O_APPEND;
        }
        if flags & FDFLAGS_NONBLOCK != 0 {
            host_flags |= libc::O_NONBLOCK;
        }
        if flags & FDFLAGS_DSYNC != 0 {
            host_flags |= libc::O_DSYNC;
        }
        if flags & (FDFLAGS_SYNC | FDFLAGS_RSYNC) != 0 {
            host_flags |= libc::O_SYNC;
        }
        if libc::fcntl(host_fd, libc::F_SETFL, host_flags) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub unsafe extern "C" fn fd_fdstat_set_rights(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    _rights_base: u64,
    _rights_inheriting: u64,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        // rights are not enforced by this runtime
        Ok(())
    })
}

pub unsafe extern "C" fn fd_prestat_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    buf: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let preopen = wasi.preopen(fd).ok_or(ERRNO_BADF)?;
        // tag 0 = preopened directory
        mem.write_u8(buf, 0)?;
        mem.write_u8(buf + 1, 0)?;
        mem.write_u16(buf + 2, 0)?;
        mem.write_u32(buf + 4, preopen.guest_path.len() as u32)
    })
}

pub unsafe extern "C" fn fd_prestat_dir_name(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    path: u32,
    path_len: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let preopen = wasi.preopen(fd).ok_or(ERRNO_BADF)?;
        let n = (path_len as usize).min(preopen.guest_path.len());
        mem.write_bytes(path, &preopen.guest_path[..n])
    })
}

pub(crate) fn write_filestat(mem: &GuestMem, buf: u32, stat: &libc::stat) -> Result<(), i32> {
    mem.write_u64(buf, stat.st_dev as u64)?;
    mem.write_u64(buf + 8, stat.st_ino as u64)?;
    mem.write_u8(buf + 16, filetype_of_mode(stat.st_mode))?;
    mem.write_u64(buf + 24, stat.st_nlink as u64)?;
    mem.write_u64(buf + 32, stat.st_size as u64)?;
    mem.write_u64(buf + 40, timespec_ns(stat.st_atime, stat.st_atime_nsec))?;
    mem.write_u64(buf + 48, timespec_ns(stat.st_mtime, stat.st_mtime_nsec))?;
    mem.write_u64(buf + 56, timespec_ns(stat.st_ctime, stat.st_ctime_nsec))
}

fn timespec_ns(sec: libc::time_t, nsec: i64) -> u64 {
    (sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(nsec as u64)
}

pub unsafe extern "C" fn fd_filestat_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    buf: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let mut stat: libc::stat = core::mem::zeroed();
        if libc::fstat(host_fd, &mut stat) < 0 {
            return Err(last_errno());
        }
        write_filestat(&mem, buf, &stat)
    })
}

pub unsafe extern "C" fn fd_filestat_set_size(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    size: u64,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        if libc::ftruncate(host_fd, size as libc::off_t) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

pub(crate) fn times_from_flags(atim: u64, mtim: u64, fst_flags: u32) -> [libc::timespec; 2] {
    const FST_ATIM: u32 = 1;
    const FST_ATIM_NOW: u32 = 2;
    const FST_MTIM: u32 = 4;
    const FST_MTIM_NOW: u32 = 8;

    let spec = |set: bool, now: bool, ns: u64| -> libc::timespec {
        if now {
            libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_NOW,
            }
        } else if set {
            libc::timespec {
                tv_sec: (ns / 1_000_000_000) as libc::time_t,
                tv_nsec: (ns % 1_000_000_000) as _,
            }
        } else {
            libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            }
        }
    };

    [
        spec(
            fst_flags & FST_ATIM != 0,
            fst_flags & FST_ATIM_NOW != 0,
            atim,
        ),
        spec(
            fst_flags & FST_MTIM != 0,
            fst_flags & FST_MTIM_NOW != 0,
            mtim,
        ),
    ]
}

pub unsafe extern "C" fn fd_filestat_set_times(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    atim: u64,
    mtim: u64,
    fst_flags: u32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;
        let times = times_from_flags(atim, mtim, fst_flags);
        if libc::futimens(host_fd, times.as_ptr()) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}

fn wasi_dirent_type(d_type: u8) -> u8 {
    match d_type {
        libc::DT_CHR => FILETYPE_CHARACTER_DEVICE,
        libc::DT_BLK => FILETYPE_BLOCK_DEVICE,
        libc::DT_DIR => FILETYPE_DIRECTORY,
        libc::DT_REG => FILETYPE_REGULAR_FILE,
        libc::DT_LNK => FILETYPE_SYMBOLIC_LINK,
        libc::DT_SOCK => FILETYPE_SOCKET_STREAM,
        _ => FILETYPE_UNKNOWN,
    }
}

/// Serializes directory entries in host order with `d_next` cookies. A
/// full output buffer is signaled by `bufused == buf_len`; the guest
/// resumes from the last cookie it consumed.
pub unsafe extern "C" fn fd_readdir(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    buf: u32,
    buf_len: u32,
    cookie: u64,
    bufused: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = wasi.host_fd(fd).ok_or(ERRNO_BADF)?;

        let dup = libc::dup(host_fd);
        if dup < 0 {
            return Err(last_errno());
        }
        let dir = libc::fdopendir(dup);
        if dir.is_null() {
            let errno = last_errno();
            libc::close(dup);
            return Err(errno);
        }
        libc::rewinddir(dir);

        let mut out: Vec<u8> = Vec::with_capacity(buf_len as usize);
        let mut index: u64 = 0;
        loop {
            let entry = libc::readdir(dir);
            if entry.is_null() {
                break;
            }
            index += 1;
            if index <= cookie {
                continue;
            }

            let name = core::ffi::CStr::from_ptr((*entry).d_name.as_ptr());
            let name = name.to_bytes();

            let mut record = [0u8; 24];
            record[0..8].copy_from_slice(&index.to_le_bytes());
            record[8..16].copy_from_slice(&((*entry).d_ino as u64).to_le_bytes());
            record[16..20].copy_from_slice(&(name.len() as u32).to_le_bytes());
            record[20] = wasi_dirent_type((*entry).d_type);

            out.extend_from_slice(&record);
            out.extend_from_slice(name);
            if out.len() >= buf_len as usize {
                out.truncate(buf_len as usize);
                break;
            }
        }
        libc::closedir(dir);

        mem.write_bytes(buf, &out)?;
        mem.write_u32(bufused, out.len() as u32)
    })
}
