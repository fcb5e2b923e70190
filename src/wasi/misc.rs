//! args/environ, clocks, randomness, process control, polling and the
//! socket subset.

use super::*;

pub unsafe extern "C" fn args_sizes_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    argc: u32,
    argv_buf_size: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let buf_size: usize = wasi.args.iter().map(|a| a.len() + 1).sum();
        mem.write_u32(argc, wasi.args.len() as u32)?;
        mem.write_u32(argv_buf_size, buf_size as u32)
    })
}

pub unsafe extern "C" fn args_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    argv: u32,
    argv_buf: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let mut cursor = argv_buf;
        for (i, arg) in wasi.args.iter().enumerate() {
            mem.write_u32(argv + 4 * i as u32, cursor)?;
            mem.write_bytes(cursor, arg)?;
            mem.write_u8(cursor + arg.len() as u32, 0)?;
            cursor += arg.len() as u32 + 1;
        }
        Ok(())
    })
}

pub unsafe extern "C" fn environ_sizes_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    envc: u32,
    env_buf_size: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let buf_size: usize = wasi.envs.iter().map(|e| e.len() + 1).sum();
        mem.write_u32(envc, wasi.envs.len() as u32)?;
        mem.write_u32(env_buf_size, buf_size as u32)
    })
}

pub unsafe extern "C" fn environ_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    environ: u32,
    environ_buf: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let mut cursor = environ_buf;
        for (i, env) in wasi.envs.iter().enumerate() {
            mem.write_u32(environ + 4 * i as u32, cursor)?;
            mem.write_bytes(cursor, env)?;
            mem.write_u8(cursor + env.len() as u32, 0)?;
            cursor += env.len() as u32 + 1;
        }
        Ok(())
    })
}

fn host_clock_id(clock_id: u32) -> Result<libc::clockid_t, i32> {
    match clock_id {
        0 => Ok(libc::CLOCK_REALTIME),
        1 => Ok(libc::CLOCK_MONOTONIC),
        2 => Ok(libc::CLOCK_PROCESS_CPUTIME_ID),
        3 => Ok(libc::CLOCK_THREAD_CPUTIME_ID),
        _ => Err(ERRNO_INVAL),
    }
}

fn clock_now_ns(clock_id: u32) -> Result<u64, i32> {
    let id = host_clock_id(clock_id)?;
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(id, &mut ts) } < 0 {
        return Err(last_errno());
    }
    Ok((ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64)
}

pub unsafe extern "C" fn clock_time_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    clock_id: u32,
    _precision: u64,
    time: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        mem.write_u64(time, clock_now_ns(clock_id)?)
    })
}

pub unsafe extern "C" fn clock_res_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    clock_id: u32,
    resolution: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let id = host_clock_id(clock_id)?;
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if libc::clock_getres(id, &mut ts) < 0 {
            return Err(last_errno());
        }
        mem.write_u64(
            resolution,
            (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64,
        )
    })
}

pub unsafe extern "C" fn random_get(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    buf: u32,
    buf_len: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let out = mem.slice_mut(buf, buf_len)?;
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                let mut filled = 0;
                while filled < out.len() {
                    let n = libc::getrandom(
                        out[filled..].as_mut_ptr().cast(),
                        out.len() - filled,
                        0,
                    );
                    if n < 0 {
                        return Err(last_errno());
                    }
                    filled += n as usize;
                }
            } else if #[cfg(any(target_os = "macos", target_os = "freebsd"))] {
                libc::arc4random_buf(out.as_mut_ptr().cast(), out.len());
            } else {
                let fd = libc::open(c"/dev/urandom".as_ptr(), libc::O_RDONLY);
                if fd < 0 {
                    return Err(last_errno());
                }
                let mut filled = 0;
                while filled < out.len() {
                    let n = libc::read(fd, out[filled..].as_mut_ptr().cast(), out.len() - filled);
                    if n <= 0 {
                        libc::close(fd);
                        return Err(ERRNO_IO);
                    }
                    filled += n as usize;
                }
                libc::close(fd);
            }
        }
        Ok(())
    })
}

pub unsafe extern "C" fn proc_exit(_vmctx: *mut VMContext, _caller: *mut VMContext, code: u32) -> ! {
    std::process::exit(code as i32)
}

pub unsafe extern "C" fn proc_raise(
    _vmctx: *mut VMContext,
    _caller: *mut VMContext,
    sig: u32,
) -> i32 {
    let host_sig = match sig {
        1 => libc::SIGHUP,
        2 => libc::SIGINT,
        3 => libc::SIGQUIT,
        4 => libc::SIGILL,
        5 => libc::SIGTRAP,
        6 => libc::SIGABRT,
        7 => libc::SIGBUS,
        8 => libc::SIGFPE,
        9 => libc::SIGKILL,
        10 => libc::SIGUSR1,
        11 => libc::SIGSEGV,
        12 => libc::SIGUSR2,
        13 => libc::SIGPIPE,
        14 => libc::SIGALRM,
        15 => libc::SIGTERM,
        _ => return ERRNO_INVAL,
    };
    if libc::raise(host_sig) != 0 {
        return last_errno();
    }
    ERRNO_SUCCESS
}

pub unsafe extern "C" fn sched_yield(_vmctx: *mut VMContext, _caller: *mut VMContext) -> i32 {
    libc::sched_yield();
    ERRNO_SUCCESS
}

const SUBSCRIPTION_SIZE: u32 = 48;
const EVENT_SIZE: u32 = 32;
const EVENTTYPE_CLOCK: u8 = 0;
const SUBCLOCKFLAGS_ABSTIME: u16 = 1;

/// Clock-only `poll_oneoff`: sleeps the shortest timeout among the clock
/// subscriptions, then reports one event per clock subscription. Other
/// subscription kinds are not serviced.
pub unsafe extern "C" fn poll_oneoff(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    subscriptions: u32,
    events: u32,
    nsubscriptions: u32,
    nevents: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;

        let mut clock_subs: Vec<u64> = Vec::new();
        let mut shortest_ns: Option<u64> = None;
        for i in 0..nsubscriptions {
            let sub = subscriptions + i * SUBSCRIPTION_SIZE;
            let userdata = mem.read_u64(sub)?;
            let tag = mem.slice(sub + 8, 1)?[0];
            if tag != EVENTTYPE_CLOCK {
                continue;
            }
            let clock_id = mem.read_u32(sub + 16)?;
            let timeout = mem.read_u64(sub + 24)?;
            let flags = mem.read_u32(sub + 40)? as u16;

            let rel_ns = if flags & SUBCLOCKFLAGS_ABSTIME != 0 {
                timeout.saturating_sub(clock_now_ns(clock_id)?)
            } else {
                timeout
            };
            shortest_ns = Some(shortest_ns.map_or(rel_ns, |s| s.min(rel_ns)));
            clock_subs.push(userdata);
        }

        if let Some(ns) = shortest_ns {
            if ns > 0 {
                let ts = libc::timespec {
                    tv_sec: (ns / 1_000_000_000) as libc::time_t,
                    tv_nsec: (ns % 1_000_000_000) as _,
                };
                libc::nanosleep(&ts, core::ptr::null_mut());
            }
        }

        for (i, userdata) in clock_subs.iter().enumerate() {
            let event = events + i as u32 * EVENT_SIZE;
            mem.write_u64(event, *userdata)?;
            mem.write_u16(event + 8, 0)?;
            mem.write_u8(event + 10, EVENTTYPE_CLOCK)?;
            mem.write_u64(event + 16, 0)?;
            mem.write_u16(event + 24, 0)?;
        }
        mem.write_u32(nevents, clock_subs.len() as u32)
    })
}

fn sock_fd(wasi: &WasiCtx, fd: i32) -> Result<i32, i32> {
    // stdio can never be a socket
    if (0..=2).contains(&fd) {
        return Err(ERRNO_BADF);
    }
    wasi.host_fd(fd).ok_or(ERRNO_BADF)
}

pub unsafe extern "C" fn sock_accept(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    flags: u32,
    ro_fd: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = sock_fd(wasi, fd)?;
        let conn = libc::accept(host_fd, core::ptr::null_mut(), core::ptr::null_mut());
        if conn < 0 {
            return Err(last_errno());
        }
        if flags as u16 & FDFLAGS_NONBLOCK != 0 {
            libc::fcntl(conn, libc::F_SETFL, libc::O_NONBLOCK);
        }
        let new_fd = wasi.alloc_fd(conn);
        mem.write_u32(ro_fd, new_fd as u32)
    })
}

pub unsafe extern "C" fn sock_recv(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    ri_data: u32,
    ri_data_len: u32,
    _ri_flags: u32,
    ro_datalen: u32,
    ro_flags: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = sock_fd(wasi, fd)?;
        let mut total: u64 = 0;
        for (buf, len) in mem.iovecs(ri_data, ri_data_len)? {
            let n = libc::recv(host_fd, mem.raw_ptr(buf).cast(), len as usize, 0);
            if n < 0 {
                return Err(last_errno());
            }
            total += n as u64;
            if (n as u32) < len {
                break;
            }
        }
        mem.write_u32(ro_datalen, total as u32)?;
        mem.write_u16(ro_flags, 0)
    })
}

pub unsafe extern "C" fn sock_send(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    si_data: u32,
    si_data_len: u32,
    _si_flags: u32,
    so_datalen: u32,
) -> i32 {
    wasi_call(|| {
        let mem = GuestMem::from_vmctx(vmctx)?;
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = sock_fd(wasi, fd)?;
        let mut total: u64 = 0;
        for (buf, len) in mem.iovecs(si_data, si_data_len)? {
            let n = libc::send(host_fd, mem.raw_ptr(buf).cast(), len as usize, 0);
            if n < 0 {
                return Err(last_errno());
            }
            total += n as u64;
            if (n as u32) < len {
                break;
            }
        }
        mem.write_u32(so_datalen, total as u32)
    })
}

pub unsafe extern "C" fn sock_shutdown(
    vmctx: *mut VMContext,
    _caller: *mut VMContext,
    fd: i32,
    how: u32,
) -> i32 {
    wasi_call(|| {
        let wasi = wasi_ctx(vmctx)?;
        let host_fd = sock_fd(wasi, fd)?;
        let how = match how & 0b11 {
            0b01 => libc::SHUT_RD,
            0b10 => libc::SHUT_WR,
            0b11 => libc::SHUT_RDWR,
            _ => return Err(ERRNO_INVAL),
        };
        if libc::shutdown(host_fd, how) < 0 {
            return Err(last_errno());
        }
        Ok(())
    })
}
