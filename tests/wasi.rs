use wasm_jit_runtime::vm::Instance;
use wasm_jit_runtime::wasi::{fd, misc, path, ERRNO_BADF, ERRNO_SUCCESS};

fn guest() -> Box<Instance> {
    let mut instance = Instance::new(0);
    instance.add_memory(1, 0, false).unwrap();
    instance.init_wasi_fds().unwrap();
    instance
}

fn poke(instance: &mut Instance, at: u32, bytes: &[u8]) {
    instance.memory_slice_mut(0).unwrap()[at as usize..at as usize + bytes.len()]
        .copy_from_slice(bytes);
}

fn peek(instance: &mut Instance, at: u32, len: usize) -> Vec<u8> {
    instance.memory_slice_mut(0).unwrap()[at as usize..at as usize + len].to_vec()
}

fn peek_u32(instance: &mut Instance, at: u32) -> u32 {
    u32::from_le_bytes(peek(instance, at, 4).try_into().unwrap())
}

fn peek_u64(instance: &mut Instance, at: u32) -> u64 {
    u64::from_le_bytes(peek(instance, at, 8).try_into().unwrap())
}

/// Writes an iovec array (single entry) and its payload, returning the
/// iovec pointer.
fn stage_iovec(instance: &mut Instance, iov_at: u32, buf_at: u32, payload: &[u8]) -> u32 {
    poke(instance, buf_at, payload);
    let mut iov = Vec::new();
    iov.extend_from_slice(&buf_at.to_le_bytes());
    iov.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    poke(instance, iov_at, &iov);
    iov_at
}

#[test_log::test]
fn open_write_seek_read_close() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = guest();
    let preopen_fd = instance
        .add_preopen(dir.path().to_str().unwrap(), "/x")
        .unwrap();
    assert_eq!(preopen_fd, 3);
    let ctx = instance.vmctx_mut();

    // path_open "out.txt" rd+wr, create
    poke(&mut instance, 16, b"out.txt");
    let rc = unsafe {
        path::path_open(
            ctx,
            ctx,
            3,
            1,           // symlink_follow
            16,
            7,           // path len
            1,           // O_CREAT
            (1 << 1) | (1 << 6), // fd_read | fd_write
            0,
            0,
            204,         // opened fd out-ptr
        )
    };
    assert_eq!(rc, ERRNO_SUCCESS);
    let open_fd = peek_u32(&mut instance, 204) as i32;
    assert!(open_fd >= 4);

    // fd_write 5 bytes
    let iovs = stage_iovec(&mut instance, 64, 128, b"hello");
    let rc = unsafe { fd::fd_write(ctx, ctx, open_fd, iovs, 1, 200) };
    assert_eq!(rc, ERRNO_SUCCESS);
    assert_eq!(peek_u32(&mut instance, 200), 5);

    // seek back to the start and read it again
    let rc = unsafe { fd::fd_seek(ctx, ctx, open_fd, 0, 0, 208) };
    assert_eq!(rc, ERRNO_SUCCESS);
    assert_eq!(peek_u64(&mut instance, 208), 0);

    let iovs = stage_iovec(&mut instance, 64, 300, &[0; 5]);
    let rc = unsafe { fd::fd_read(ctx, ctx, open_fd, iovs, 1, 200) };
    assert_eq!(rc, ERRNO_SUCCESS);
    assert_eq!(peek_u32(&mut instance, 200), 5);
    assert_eq!(peek(&mut instance, 300, 5), b"hello");

    // filestat agrees on the size
    let rc = unsafe { fd::fd_filestat_get(ctx, ctx, open_fd, 320) };
    assert_eq!(rc, ERRNO_SUCCESS);
    assert_eq!(peek(&mut instance, 336, 1)[0], 4, "regular file");
    assert_eq!(peek_u64(&mut instance, 352), 5, "size");

    assert_eq!(unsafe { fd::fd_close(ctx, ctx, open_fd) }, ERRNO_SUCCESS);
    // the file landed under the preopen's host directory
    assert_eq!(std::fs::read(dir.path().join("out.txt")).unwrap(), b"hello");
}

#[test_log::test]
fn preopen_resolution_and_prestat() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = guest();
    instance
        .add_preopen(dir.path().to_str().unwrap(), "/x")
        .unwrap();
    let ctx = instance.vmctx_mut();

    // prestat reports a directory of guest-path length 2
    assert_eq!(unsafe { fd::fd_prestat_get(ctx, ctx, 3, 32) }, ERRNO_SUCCESS);
    assert_eq!(peek(&mut instance, 32, 1)[0], 0);
    assert_eq!(peek_u32(&mut instance, 36), 2);

    // dir name returns the first min(n, len) bytes
    assert_eq!(
        unsafe { fd::fd_prestat_dir_name(ctx, ctx, 3, 64, 2) },
        ERRNO_SUCCESS
    );
    assert_eq!(peek(&mut instance, 64, 2), b"/x");
    assert_eq!(
        unsafe { fd::fd_prestat_dir_name(ctx, ctx, 3, 96, 1) },
        ERRNO_SUCCESS
    );
    assert_eq!(peek(&mut instance, 96, 1), b"/");

    // non-preopen fds are EBADF for prestat and path ops
    assert_eq!(unsafe { fd::fd_prestat_get(ctx, ctx, 0, 32) }, ERRNO_BADF);
    poke(&mut instance, 16, b"foo");
    let rc = unsafe { path::path_open(ctx, ctx, 9, 1, 16, 3, 0, 1 << 1, 0, 0, 204) };
    assert_eq!(rc, ERRNO_BADF);
}

#[test_log::test]
fn directories_create_stat_remove() {
    let dir = tempfile::tempdir().unwrap();
    let mut instance = guest();
    instance
        .add_preopen(dir.path().to_str().unwrap(), "/")
        .unwrap();
    let ctx = instance.vmctx_mut();

    poke(&mut instance, 16, b"sub");
    assert_eq!(
        unsafe { path::path_create_directory(ctx, ctx, 3, 16, 3) },
        ERRNO_SUCCESS
    );
    assert!(dir.path().join("sub").is_dir());

    // filestat through the path surface sees a directory
    assert_eq!(
        unsafe { path::path_filestat_get(ctx, ctx, 3, 1, 16, 3, 128) },
        ERRNO_SUCCESS
    );
    assert_eq!(peek(&mut instance, 144, 1)[0], 3, "directory filetype");

    assert_eq!(
        unsafe { path::path_remove_directory(ctx, ctx, 3, 16, 3) },
        ERRNO_SUCCESS
    );
    assert!(!dir.path().join("sub").exists());

    // removing it again reports ENOENT
    assert_eq!(
        unsafe { path::path_remove_directory(ctx, ctx, 3, 16, 3) },
        wasm_jit_runtime::wasi::ERRNO_NOENT
    );
}

#[test_log::test]
fn readdir_lists_created_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"A").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"B").unwrap();

    let mut instance = guest();
    instance
        .add_preopen(dir.path().to_str().unwrap(), "/")
        .unwrap();
    let ctx = instance.vmctx_mut();

    let rc = unsafe { fd::fd_readdir(ctx, ctx, 3, 1024, 512, 0, 256) };
    assert_eq!(rc, ERRNO_SUCCESS);
    let used = peek_u32(&mut instance, 256) as usize;
    assert!(used > 0);
    let blob = peek(&mut instance, 1024, used);
    let listing = String::from_utf8_lossy(&blob).to_string();
    assert!(listing.contains("a.txt"));
    assert!(listing.contains("b.txt"));
}

#[test_log::test]
fn args_and_environ_round_trip() {
    let mut instance = guest();
    instance.set_wasi_args(&["prog", "arg1"]).unwrap();
    instance.set_wasi_envs(&["HOME=/home/x", "LANG=C"]).unwrap();
    let ctx = instance.vmctx_mut();

    assert_eq!(unsafe { misc::args_sizes_get(ctx, ctx, 0, 4) }, ERRNO_SUCCESS);
    assert_eq!(peek_u32(&mut instance, 0), 2);
    assert_eq!(peek_u32(&mut instance, 4), 10); // "prog\0arg1\0"

    assert_eq!(unsafe { misc::args_get(ctx, ctx, 16, 64) }, ERRNO_SUCCESS);
    let arg0 = peek_u32(&mut instance, 16);
    let arg1 = peek_u32(&mut instance, 20);
    assert_eq!(peek(&mut instance, arg0, 5), b"prog\0");
    assert_eq!(peek(&mut instance, arg1, 5), b"arg1\0");

    assert_eq!(
        unsafe { misc::environ_sizes_get(ctx, ctx, 0, 4) },
        ERRNO_SUCCESS
    );
    assert_eq!(peek_u32(&mut instance, 0), 2);
    assert_eq!(unsafe { misc::environ_get(ctx, ctx, 16, 128) }, ERRNO_SUCCESS);
    let env0 = peek_u32(&mut instance, 16);
    assert_eq!(peek(&mut instance, env0, 12), b"HOME=/home/x");
}

#[test_log::test]
fn clocks_random_and_yield() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();

    assert_eq!(
        unsafe { misc::clock_time_get(ctx, ctx, 0, 0, 8) },
        ERRNO_SUCCESS
    );
    assert!(peek_u64(&mut instance, 8) > 0);
    assert_eq!(
        unsafe { misc::clock_res_get(ctx, ctx, 1, 16) },
        ERRNO_SUCCESS
    );
    // unknown clock ids are EINVAL
    assert_eq!(
        unsafe { misc::clock_time_get(ctx, ctx, 99, 0, 8) },
        wasm_jit_runtime::wasi::ERRNO_INVAL
    );

    poke(&mut instance, 32, &[0u8; 16]);
    assert_eq!(unsafe { misc::random_get(ctx, ctx, 32, 16) }, ERRNO_SUCCESS);
    assert_ne!(peek(&mut instance, 32, 16), vec![0u8; 16]);

    assert_eq!(unsafe { misc::sched_yield(ctx, ctx) }, ERRNO_SUCCESS);
}

#[test_log::test]
fn poll_oneoff_services_clock_subscriptions() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();

    // one relative monotonic-clock subscription of 1ms
    let mut sub = [0u8; 48];
    sub[0..8].copy_from_slice(&0xDEAD_BEEFu64.to_le_bytes()); // userdata
    sub[8] = 0; // clock
    sub[16..20].copy_from_slice(&1u32.to_le_bytes()); // monotonic
    sub[24..32].copy_from_slice(&1_000_000u64.to_le_bytes()); // 1ms
    poke(&mut instance, 64, &sub);

    let before = std::time::Instant::now();
    let rc = unsafe { misc::poll_oneoff(ctx, ctx, 64, 200, 1, 400) };
    assert_eq!(rc, ERRNO_SUCCESS);
    assert!(before.elapsed() >= std::time::Duration::from_millis(1));
    assert_eq!(peek_u32(&mut instance, 400), 1);
    assert_eq!(peek_u64(&mut instance, 200), 0xDEAD_BEEF);
    assert_eq!(peek(&mut instance, 210, 1)[0], 0, "clock event type");
}

#[test_log::test]
fn sockets_reject_stdio() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();
    assert_eq!(unsafe { misc::sock_accept(ctx, ctx, 1, 0, 8) }, ERRNO_BADF);
    assert_eq!(
        unsafe { misc::sock_send(ctx, ctx, 0, 16, 0, 0, 8) },
        ERRNO_BADF
    );
    assert_eq!(unsafe { misc::sock_shutdown(ctx, ctx, 2, 3) }, ERRNO_BADF);
}

#[test_log::test]
fn bad_fds_and_free_are_handled() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();

    let iovs = stage_iovec(&mut instance, 64, 128, b"x");
    assert_eq!(unsafe { fd::fd_write(ctx, ctx, 77, iovs, 1, 200) }, ERRNO_BADF);
    // closing stdio is a successful no-op
    assert_eq!(unsafe { fd::fd_close(ctx, ctx, 1) }, ERRNO_SUCCESS);
    assert_eq!(unsafe { fd::fd_close(ctx, ctx, 1) }, ERRNO_SUCCESS);

    // freeing the fd table twice is fine
    instance.free_wasi_fds();
    instance.free_wasi_fds();
}

#[test_log::test]
fn poll_oneoff_absolute_deadline_already_passed() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();

    // an absolute monotonic deadline in the past must not sleep
    let mut sub = [0u8; 48];
    sub[0..8].copy_from_slice(&7u64.to_le_bytes());
    sub[16..20].copy_from_slice(&1u32.to_le_bytes()); // monotonic
    sub[24..32].copy_from_slice(&1u64.to_le_bytes()); // t = 1ns, long gone
    sub[40..42].copy_from_slice(&1u16.to_le_bytes()); // abstime
    poke(&mut instance, 64, &sub);

    let before = std::time::Instant::now();
    let rc = unsafe { misc::poll_oneoff(ctx, ctx, 64, 200, 1, 400) };
    assert_eq!(rc, ERRNO_SUCCESS);
    assert!(before.elapsed() < std::time::Duration::from_secs(1));
    assert_eq!(peek_u32(&mut instance, 400), 1);
    assert_eq!(peek_u64(&mut instance, 200), 7);
}

#[test_log::test]
fn poll_oneoff_ignores_non_clock_subscriptions() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();

    // one fd_read subscription (tag 1): no events are produced for it
    let mut sub = [0u8; 48];
    sub[0..8].copy_from_slice(&9u64.to_le_bytes());
    sub[8] = 1;
    poke(&mut instance, 64, &sub);

    assert_eq!(unsafe { misc::poll_oneoff(ctx, ctx, 64, 200, 1, 400) }, ERRNO_SUCCESS);
    assert_eq!(peek_u32(&mut instance, 400), 0);
}

#[test_log::test]
fn proc_raise_rejects_unknown_signals() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();
    assert_eq!(
        unsafe { misc::proc_raise(ctx, ctx, 0) },
        wasm_jit_runtime::wasi::ERRNO_INVAL
    );
    assert_eq!(
        unsafe { misc::proc_raise(ctx, ctx, 99) },
        wasm_jit_runtime::wasi::ERRNO_INVAL
    );
}

#[test_log::test]
fn clock_res_rejects_unknown_ids() {
    let mut instance = guest();
    let ctx = instance.vmctx_mut();
    assert_eq!(
        unsafe { misc::clock_res_get(ctx, ctx, 42, 16) },
        wasm_jit_runtime::wasi::ERRNO_INVAL
    );
}
