//! Runtime helpers the code generator links against.
//!
//! Every helper is an `extern "C"` function taking the VM context first.
//! Failures that must trap (out-of-bounds bulk operations, failed casts)
//! unwind through the active trampoline guard; benign failures (`grow`
//! past a cap) come back as status values. The generator obtains helper
//! addresses from [`addresses`] and either embeds them as absolute
//! constants or emits relocations against them.

pub mod memory;
pub mod segments;
pub mod table;

use crate::gc::libcalls as gc;

/// The name → address table of every runtime helper.
///
/// Names follow the wasm instruction they implement; `*_idx` variants
/// take an explicit memory/table index for multi-memory modules.
pub fn addresses() -> Vec<(&'static str, usize)> {
    vec![
        // memory
        ("memory.grow", memory::memory_grow as usize),
        ("memory.grow_idx", memory::memory_grow_idx as usize),
        ("memory.size", memory::memory_size as usize),
        ("memory.size_idx", memory::memory_size_idx as usize),
        ("memory.fill", memory::memory_fill as usize),
        ("memory.fill_idx", memory::memory_fill_idx as usize),
        ("memory.copy", memory::memory_copy as usize),
        ("memory.copy_idx", memory::memory_copy_idx as usize),
        // table
        ("table.grow", table::table_grow as usize),
        ("table.fill", table::table_fill as usize),
        ("table.copy", table::table_copy as usize),
        // segments
        ("memory.init", segments::memory_init as usize),
        ("data.drop", segments::data_drop as usize),
        ("table.init", segments::table_init as usize),
        ("elem.drop", segments::elem_drop as usize),
        // gc
        ("struct.new", gc::struct_new as usize),
        ("struct.new_default", gc::struct_new_default as usize),
        ("struct.get", gc::struct_get as usize),
        ("struct.set", gc::struct_set as usize),
        ("array.new", gc::array_new as usize),
        ("array.new_default", gc::array_new_default as usize),
        ("array.new_data", gc::array_new_data as usize),
        ("array.new_elem", gc::array_new_elem as usize),
        ("array.init_data", gc::array_init_data as usize),
        ("array.init_elem", gc::array_init_elem as usize),
        ("array.get", gc::array_get as usize),
        ("array.get_s", gc::array_get_s as usize),
        ("array.set", gc::array_set as usize),
        ("array.len", gc::array_len as usize),
        ("array.fill", gc::array_fill as usize),
        ("array.copy", gc::array_copy as usize),
        ("ref.test", gc::ref_test as usize),
        ("ref.cast", gc::ref_cast as usize),
        ("type.check", gc::type_check as usize),
        // wasi preview 1
        ("wasi.fd_write", crate::wasi::fd::fd_write as usize),
        ("wasi.fd_read", crate::wasi::fd::fd_read as usize),
        ("wasi.fd_pread", crate::wasi::fd::fd_pread as usize),
        ("wasi.fd_pwrite", crate::wasi::fd::fd_pwrite as usize),
        ("wasi.fd_close", crate::wasi::fd::fd_close as usize),
        ("wasi.fd_seek", crate::wasi::fd::fd_seek as usize),
        ("wasi.fd_tell", crate::wasi::fd::fd_tell as usize),
        ("wasi.fd_sync", crate::wasi::fd::fd_sync as usize),
        ("wasi.fd_datasync", crate::wasi::fd::fd_datasync as usize),
        ("wasi.fd_advise", crate::wasi::fd::fd_advise as usize),
        ("wasi.fd_allocate", crate::wasi::fd::fd_allocate as usize),
        ("wasi.fd_renumber", crate::wasi::fd::fd_renumber as usize),
        ("wasi.fd_fdstat_get", crate::wasi::fd::fd_fdstat_get as usize),
        (
            "wasi.fd_fdstat_set_flags",
            crate::wasi::fd::fd_fdstat_set_flags as usize,
        ),
        (
            "wasi.fd_fdstat_set_rights",
            crate::wasi::fd::fd_fdstat_set_rights as usize,
        ),
        ("wasi.fd_prestat_get", crate::wasi::fd::fd_prestat_get as usize),
        (
            "wasi.fd_prestat_dir_name",
            crate::wasi::fd::fd_prestat_dir_name as usize,
        ),
        ("wasi.fd_filestat_get", crate::wasi::fd::fd_filestat_get as usize),
        (
            "wasi.fd_filestat_set_size",
            crate::wasi::fd::fd_filestat_set_size as usize,
        ),
        (
            "wasi.fd_filestat_set_times",
            crate::wasi::fd::fd_filestat_set_times as usize,
        ),
        ("wasi.fd_readdir", crate::wasi::fd::fd_readdir as usize),
        ("wasi.path_open", crate::wasi::path::path_open as usize),
        (
            "wasi.path_unlink_file",
            crate::wasi::path::path_unlink_file as usize,
        ),
        (
            "wasi.path_remove_directory",
            crate::wasi::path::path_remove_directory as usize,
        ),
        (
            "wasi.path_create_directory",
            crate::wasi::path::path_create_directory as usize,
        ),
        ("wasi.path_rename", crate::wasi::path::path_rename as usize),
        (
            "wasi.path_filestat_get",
            crate::wasi::path::path_filestat_get as usize,
        ),
        (
            "wasi.path_filestat_set_times",
            crate::wasi::path::path_filestat_set_times as usize,
        ),
        ("wasi.path_link", crate::wasi::path::path_link as usize),
        ("wasi.path_readlink", crate::wasi::path::path_readlink as usize),
        ("wasi.path_symlink", crate::wasi::path::path_symlink as usize),
        ("wasi.args_sizes_get", crate::wasi::misc::args_sizes_get as usize),
        ("wasi.args_get", crate::wasi::misc::args_get as usize),
        (
            "wasi.environ_sizes_get",
            crate::wasi::misc::environ_sizes_get as usize,
        ),
        ("wasi.environ_get", crate::wasi::misc::environ_get as usize),
        ("wasi.clock_time_get", crate::wasi::misc::clock_time_get as usize),
        ("wasi.clock_res_get", crate::wasi::misc::clock_res_get as usize),
        ("wasi.random_get", crate::wasi::misc::random_get as usize),
        ("wasi.proc_exit", crate::wasi::misc::proc_exit as usize),
        ("wasi.proc_raise", crate::wasi::misc::proc_raise as usize),
        ("wasi.sched_yield", crate::wasi::misc::sched_yield as usize),
        ("wasi.poll_oneoff", crate::wasi::misc::poll_oneoff as usize),
        ("wasi.sock_accept", crate::wasi::misc::sock_accept as usize),
        ("wasi.sock_recv", crate::wasi::misc::sock_recv as usize),
        ("wasi.sock_send", crate::wasi::misc::sock_send as usize),
        ("wasi.sock_shutdown", crate::wasi::misc::sock_shutdown as usize),
    ]
}

/// Address of a single helper by name.
pub fn address_of(name: &str) -> Option<usize> {
    addresses().into_iter().find(|(n, _)| *n == name).map(|(_, a)| a)
}
