use wasm_jit_runtime::vm::Instance;
use wasm_jit_runtime::{Val, VMTableEntry, WASM_PAGE_SIZE};

#[test_log::test]
fn staged_initialization_populates_the_context() {
    let mut instance = Instance::new(3);
    let f0 = 0x1000 as *const _;
    let f2 = 0x3000 as *const _;
    instance.set_func(0, f0).unwrap();
    instance.set_func(2, f2).unwrap();
    assert!(instance.set_func(3, f0).is_err(), "bounds-checked");

    instance.add_memory(2, 0, false).unwrap();
    instance.alloc_globals(4);
    instance.alloc_indirect_table(8).unwrap();

    let ctx = unsafe { &*instance.vmctx() };
    assert_eq!(ctx.func_count, 3);
    assert_eq!(ctx.memory_size, 2 * WASM_PAGE_SIZE);
    assert!(!ctx.globals.is_null());
    assert_eq!(ctx.table0_elements, 8);
    assert_eq!(ctx.table_count, 1);
    assert_eq!(ctx.memory_count, 1);
    unsafe {
        assert_eq!(*ctx.func_table, f0);
        assert!((*ctx.func_table.add(1)).is_null());
        assert_eq!(*ctx.func_table.add(2), f2);
    }
    assert!(instance.owns_globals());
    assert!(instance.owns_indirect_table());
}

#[test_log::test]
fn borrowed_memory_and_globals_do_not_grow_or_free() {
    let mut backing = vec![0u8; WASM_PAGE_SIZE as usize];
    let mut globals = vec![0u64; 2];
    let mut instance = Instance::new(0);
    instance.set_memory(backing.as_mut_ptr(), backing.len());
    instance.set_globals(globals.as_mut_ptr());

    assert!(!instance.owns_globals());
    assert_eq!(instance.memory_pages(0), Some(1));
    // borrowed memory refuses to grow but still answers size queries
    assert_eq!(instance.memory_grow(0, 1, 0), -1);
    assert_eq!(instance.memory_grow(0, 0, 0), 1);

    let ctx = unsafe { &*instance.vmctx() };
    assert_eq!(ctx.memory_base, backing.as_mut_ptr());
    assert_eq!(ctx.globals, globals.as_mut_ptr());

    drop(instance);
    // the borrowed buffers survive the instance
    backing[0] = 1;
    globals[0] = 2;
}

#[test_log::test]
fn multi_table_mode_mirrors_table_zero() {
    let mut t0 = vec![VMTableEntry::NULL; 4];
    let mut t1 = vec![VMTableEntry::NULL; 2];
    let mut instance = Instance::new(0);
    instance.set_table_pointers(&[
        (t0.as_mut_ptr(), 4, 8),
        (t1.as_mut_ptr(), 2, 2),
    ]);

    let ctx = unsafe { &*instance.vmctx() };
    assert_eq!(ctx.table_count, 2);
    assert_eq!(ctx.table0_base, t0.as_mut_ptr());
    assert_eq!(ctx.table0_elements, 4);
    unsafe {
        assert_eq!(*ctx.tables, t0.as_mut_ptr());
        assert_eq!(*ctx.tables.add(1), t1.as_mut_ptr());
        assert_eq!(*ctx.table_sizes, 4);
        assert_eq!(*ctx.table_sizes.add(1), 2);
        assert_eq!(*ctx.table_max_sizes, 8);
    }
    assert!(!instance.owns_indirect_table(), "multi-table borrows");
    assert_eq!(instance.table_len(0), Some(4));
    assert_eq!(instance.table_len(2), None);
}

#[test_log::test]
fn owned_table_grow_updates_mirrors() {
    let mut instance = Instance::new(0);
    instance.add_table(2, 6).unwrap();
    assert_eq!(instance.table_grow(0, 3, 0), 2);

    let ctx = unsafe { &*instance.vmctx() };
    assert_eq!(ctx.table0_elements, 5);
    unsafe {
        assert_eq!(*ctx.table_sizes, 5);
    }
    // grown slots carry the init value and an unknown type
    let entries = instance.table_entries_mut(0).unwrap();
    assert_eq!(entries[4], VMTableEntry { value: 0, type_idx: -1 });
}

#[test_log::test]
fn wasm_stack_region_has_a_guard() {
    let mut instance = Instance::new(0);
    assert!(!instance.has_wasm_stack());
    instance.alloc_wasm_stack(64 * 1024).unwrap();
    assert!(instance.has_wasm_stack());

    let ctx = unsafe { &*instance.vmctx() };
    assert!(!ctx.wasm_stack_guard.is_null());
    assert!(ctx.guard_page_size > 0);
    assert_eq!(ctx.wasm_stack_base as usize,
        ctx.wasm_stack_guard as usize + ctx.guard_page_size as usize);
    assert_eq!(
        ctx.wasm_stack_top as usize - ctx.wasm_stack_base as usize,
        ctx.wasm_stack_size as usize
    );
    // the usable region is writable
    unsafe {
        core::ptr::write_volatile(ctx.wasm_stack_base, 1);
        core::ptr::write_volatile(ctx.wasm_stack_top.sub(1), 2);
    }
}

#[test_log::test]
fn repeated_alloc_free_releases_resources() {
    // alloc_context → free_context must not leak: a long loop of sizable
    // instances stays allocatable
    for _ in 0..256 {
        let mut instance = Instance::new(64);
        instance.add_memory(4, 0, false).unwrap();
        instance.alloc_indirect_table(1024).unwrap();
        instance.alloc_globals(128);
        instance.set_data_segments(vec![vec![0u8; 4096].into_boxed_slice()]);
        drop(instance);
    }
}

#[test_log::test]
fn guarded_instances_release_their_reservations() {
    // each reservation is 8GiB of address space; leaking them would run
    // the process out long before this loop finishes
    for _ in 0..64 {
        let mut instance = Instance::new(0);
        instance.add_memory(1, 0, true).unwrap();
        drop(instance);
    }
}

#[test_log::test]
fn host_values_cross_the_boundary() {
    use wasm_jit_runtime::vm::WasmValType;

    let vals = [Val::I32(-1), Val::I64(7), Val::from(1.5f32), Val::from(2.5f64)];
    let tys = [
        WasmValType::I32,
        WasmValType::I64,
        WasmValType::F32,
        WasmValType::F64,
    ];
    for (val, ty) in vals.iter().zip(tys) {
        let raw = val.to_vmval();
        assert_eq!(Val::from_vmval(raw, ty), *val);
    }
}
