use crate::gc;
use crate::mmap::{round_usize_up_to_host_pages, Mmap};
use crate::vm::vmcontext::{VMContext, VMFunctionBody, VMTableEntry};
use crate::wasi::WasiCtx;
use crate::{Error, WASM32_MAX_PAGES, WASM_PAGE_SIZE};
use core::ptr;

/// Table-0 (and multi-table) storage: either owned by this instance or
/// borrowed from another one. Borrowed storage is never freed and never
/// grown here; only its owner mutates its length.
#[derive(Debug)]
pub enum TableStorage {
    Owned {
        entries: Vec<VMTableEntry>,
        max: u64,
    },
    Borrowed {
        base: *mut VMTableEntry,
        len: u64,
        max: u64,
    },
}

impl TableStorage {
    fn len(&self) -> u64 {
        match self {
            TableStorage::Owned { entries, .. } => entries.len() as u64,
            TableStorage::Borrowed { len, .. } => *len,
        }
    }

    fn max(&self) -> u64 {
        match self {
            TableStorage::Owned { max, .. } | TableStorage::Borrowed { max, .. } => *max,
        }
    }

    fn base_ptr(&mut self) -> *mut VMTableEntry {
        match self {
            TableStorage::Owned { entries, .. } => entries.as_mut_ptr(),
            TableStorage::Borrowed { base, .. } => *base,
        }
    }
}

/// Linear-memory storage.
///
/// `Owned` grows by reallocation and zero-fills the new tail; `Guarded`
/// reserves [`crate::GUARDED_MEMORY_RESERVATION`] bytes of `PROT_NONE`
/// address space and grows by promoting pages, so out-of-bounds accesses
/// fault deterministically. `Borrowed` memory was supplied by the host and
/// cannot grow.
#[derive(Debug)]
enum MemoryStorage {
    Owned(Vec<u8>),
    Guarded { mmap: Mmap, len: usize },
    Borrowed { base: *mut u8, len: usize },
}

#[derive(Debug)]
struct LinearMemory {
    storage: MemoryStorage,
    /// Module-declared cap in pages; `WASM32_MAX_PAGES` when undeclared.
    max_pages: u64,
}

impl LinearMemory {
    fn byte_len(&self) -> usize {
        match &self.storage {
            MemoryStorage::Owned(bytes) => bytes.len(),
            MemoryStorage::Guarded { len, .. } => *len,
            MemoryStorage::Borrowed { len, .. } => *len,
        }
    }

    fn base_ptr(&mut self) -> *mut u8 {
        match &mut self.storage {
            MemoryStorage::Owned(bytes) => bytes.as_mut_ptr(),
            MemoryStorage::Guarded { mmap, .. } => mmap.as_mut_ptr(),
            MemoryStorage::Borrowed { base, .. } => *base,
        }
    }

    fn pages(&self) -> u64 {
        self.byte_len() as u64 / WASM_PAGE_SIZE
    }

    /// Grows by `delta` pages, returns the previous page count or −1.
    ///
    /// `caller_cap` is the caller-side limit in pages, 0 meaning
    /// unbounded; the effective limit is the minimum of it, the declared
    /// cap and the 4GiB ceiling.
    fn grow(&mut self, delta: u64, caller_cap: u64) -> i64 {
        let prev_pages = self.pages();
        if delta == 0 {
            return prev_pages as i64;
        }

        let mut effective_max = self.max_pages.min(WASM32_MAX_PAGES);
        if caller_cap != 0 {
            effective_max = effective_max.min(caller_cap);
        }

        let Some(new_pages) = prev_pages.checked_add(delta) else {
            return -1;
        };
        if new_pages > effective_max {
            return -1;
        }
        let new_len = (new_pages * WASM_PAGE_SIZE) as usize;

        match &mut self.storage {
            MemoryStorage::Owned(bytes) => bytes.resize(new_len, 0),
            MemoryStorage::Guarded { mmap, len } => {
                if new_len > mmap.len() {
                    return -1;
                }
                let commit_from = round_usize_up_to_host_pages(*len);
                if mmap.make_accessible(commit_from, new_len - commit_from).is_err() {
                    return -1;
                }
                *len = new_len;
            }
            MemoryStorage::Borrowed { .. } => return -1,
        }
        prev_pages as i64
    }
}

#[derive(Debug)]
pub(crate) struct DataSegment {
    pub bytes: Box<[u8]>,
    pub dropped: bool,
}

#[derive(Debug)]
pub(crate) struct ElemSegment {
    pub entries: Box<[VMTableEntry]>,
    pub dropped: bool,
}

#[derive(Debug)]
enum GlobalsStorage {
    None,
    Owned(Vec<u64>),
    Borrowed(*mut u64),
}

/// The owning half of a VM instance.
///
/// The `Instance` holds every allocation the raw [`VMContext`] points
/// into and keeps the context's mirrors in sync as storage moves under
/// reallocation. It is the unit of lifecycle: dropping it releases all
/// owned sub-arrays; borrowed storage (shared indirect tables, host
/// supplied memory or globals) is left alone.
#[derive(Debug)]
pub struct Instance {
    vmctx: Box<VMContext>,

    funcs: Vec<*const VMFunctionBody>,
    func_type_indices: Vec<i64>,

    tables: Vec<TableStorage>,
    table_ptrs: Vec<*mut VMTableEntry>,
    table_sizes: Vec<u64>,
    table_max_sizes: Vec<u64>,

    memories: Vec<LinearMemory>,
    memory_bases: Vec<*mut u8>,
    memory_sizes: Vec<u64>,
    memory_max_sizes: Vec<u64>,

    globals: GlobalsStorage,

    pub(crate) data_segments: Vec<DataSegment>,
    pub(crate) elem_segments: Vec<ElemSegment>,

    wasm_stack: Option<Mmap>,

    // Buffers behind the in-flight exception frame; generated throw
    // sequences write through the context pointers into these.
    exception_values: Vec<u64>,
    spilled_locals: Vec<u64>,

    pub(crate) wasi: Option<WasiCtx>,
}

impl Instance {
    /// Allocates a context for a module with `func_count` functions. The
    /// function-pointer array is zeroed.
    pub fn new(func_count: u32) -> Box<Instance> {
        let mut instance = Box::new(Instance {
            vmctx: Box::new(VMContext::new_zeroed()),
            funcs: vec![ptr::null(); func_count as usize],
            func_type_indices: vec![-1; func_count as usize],
            tables: Vec::new(),
            table_ptrs: Vec::new(),
            table_sizes: Vec::new(),
            table_max_sizes: Vec::new(),
            memories: Vec::new(),
            memory_bases: Vec::new(),
            memory_sizes: Vec::new(),
            memory_max_sizes: Vec::new(),
            globals: GlobalsStorage::None,
            data_segments: Vec::new(),
            elem_segments: Vec::new(),
            wasm_stack: None,
            exception_values: Vec::new(),
            spilled_locals: Vec::new(),
            wasi: None,
        });

        instance.vmctx.func_table = instance.funcs.as_mut_ptr();
        instance.vmctx.func_count = func_count;
        let backptr: *mut Instance = &mut *instance;
        instance.vmctx.instance = backptr.cast();
        instance
    }

    /// The raw context handed to JIT code and libcalls.
    pub fn vmctx_mut(&mut self) -> *mut VMContext {
        &mut *self.vmctx
    }

    pub fn vmctx(&self) -> *const VMContext {
        &*self.vmctx
    }

    /// Recovers the owning instance from a raw context pointer.
    ///
    /// # Safety
    ///
    /// `vmctx` must be a live pointer obtained from [`Instance::vmctx_mut`]
    /// and no other reference to the instance may be active.
    pub unsafe fn from_vmctx<'a>(vmctx: *mut VMContext) -> &'a mut Instance {
        debug_assert!(!vmctx.is_null());
        &mut *(*vmctx).instance.cast::<Instance>()
    }

    /// Shared-reference variant of [`Instance::from_vmctx`] tolerating
    /// contexts that were never attached to an instance.
    pub(crate) unsafe fn try_from_vmctx<'a>(vmctx: &VMContext) -> Option<&'a Instance> {
        vmctx.instance.cast::<Instance>().as_ref()
    }

    /// `(lo, hi)` address ranges of every guarded linear-memory
    /// reservation, cached by the trap substrate for fault
    /// classification.
    pub(crate) fn guarded_reservations(&self) -> smallvec::SmallVec<[(usize, usize); 2]> {
        self.memories
            .iter()
            .filter_map(|memory| match &memory.storage {
                MemoryStorage::Guarded { mmap, .. } => {
                    let lo = mmap.as_ptr() as usize;
                    Some((lo, lo + mmap.len()))
                }
                _ => None,
            })
            .collect()
    }

    /* ------------------------- functions ------------------------- */

    pub fn set_func(&mut self, idx: u32, func: *const VMFunctionBody) -> crate::Result<()> {
        let slot = self
            .funcs
            .get_mut(idx as usize)
            .ok_or(Error::IndexOutOfBounds)?;
        *slot = func;
        Ok(())
    }

    /// Records the declared type index of function `idx`, used to infer
    /// table-entry type slots in `table.fill`.
    pub fn set_func_type(&mut self, idx: u32, type_idx: i64) -> crate::Result<()> {
        let slot = self
            .func_type_indices
            .get_mut(idx as usize)
            .ok_or(Error::IndexOutOfBounds)?;
        *slot = type_idx;
        Ok(())
    }

    pub(crate) fn func_ptr(&self, idx: u32) -> Option<*const VMFunctionBody> {
        self.funcs.get(idx as usize).copied()
    }

    /// The declared type index of the function whose body pointer is
    /// `body`, or −1.
    pub(crate) fn infer_func_type(&self, body: *const VMFunctionBody) -> i64 {
        self.funcs
            .iter()
            .position(|&f| ptr::eq(f, body) && !f.is_null())
            .map_or(-1, |i| self.func_type_indices[i])
    }

    /// The declared type index recorded for function `idx`, or −1.
    pub(crate) fn declared_func_type(&self, idx: u32) -> i64 {
        self.func_type_indices.get(idx as usize).copied().unwrap_or(-1)
    }

    /* -------------------------- memory --------------------------- */

    /// Borrows host-supplied bytes as memory 0. Borrowed memory cannot
    /// grow.
    pub fn set_memory(&mut self, base: *mut u8, size: usize) {
        debug_assert!(size as u64 % WASM_PAGE_SIZE == 0);
        let memory = LinearMemory {
            storage: MemoryStorage::Borrowed { base, len: size },
            max_pages: WASM32_MAX_PAGES,
        };
        if self.memories.is_empty() {
            self.add_memory_inner(memory);
        } else {
            self.memories[0] = memory;
            self.sync_memory(0);
        }
    }

    /// Allocates an owned linear memory and appends it to the memory
    /// index space; index 0 is mirrored into the fast-path fields.
    ///
    /// `max_pages = 0` means no declared cap. In guarded mode the whole
    /// reservation is made up front and out-of-bounds accesses fault.
    pub fn add_memory(
        &mut self,
        initial_pages: u64,
        max_pages: u64,
        guarded: bool,
    ) -> crate::Result<u32> {
        let max_pages = if max_pages == 0 {
            WASM32_MAX_PAGES
        } else {
            max_pages.min(WASM32_MAX_PAGES)
        };
        let initial_len = (initial_pages * WASM_PAGE_SIZE) as usize;

        let storage = if guarded {
            let mut mmap = Mmap::with_reserve(crate::GUARDED_MEMORY_RESERVATION)?;
            if initial_len > 0 {
                mmap.make_accessible(0, round_usize_up_to_host_pages(initial_len))?;
            }
            MemoryStorage::Guarded {
                mmap,
                len: initial_len,
            }
        } else {
            MemoryStorage::Owned(vec![0; initial_len])
        };

        let idx = self.memories.len() as u32;
        self.add_memory_inner(LinearMemory { storage, max_pages });
        Ok(idx)
    }

    fn add_memory_inner(&mut self, memory: LinearMemory) {
        self.memories.push(memory);
        self.memory_bases.push(ptr::null_mut());
        self.memory_sizes.push(0);
        self.memory_max_sizes.push(0);
        let idx = self.memories.len() - 1;
        self.sync_memory(idx);
        self.vmctx.memories = self.memory_bases.as_mut_ptr();
        self.vmctx.memory_sizes = self.memory_sizes.as_mut_ptr();
        self.vmctx.memory_max_sizes = self.memory_max_sizes.as_mut_ptr();
        self.vmctx.memory_count = self.memories.len() as u32;
    }

    /// Refreshes the context mirrors for memory `idx` after any mutation
    /// that may have moved or resized its storage.
    fn sync_memory(&mut self, idx: usize) {
        let base = self.memories[idx].base_ptr();
        let len = self.memories[idx].byte_len() as u64;
        self.memory_bases[idx] = base;
        self.memory_sizes[idx] = len;
        self.memory_max_sizes[idx] = self.memories[idx].max_pages;
        if idx == 0 {
            self.vmctx.memory_base = base;
            self.vmctx.memory_size = len;
        }
    }

    pub(crate) fn memory_count(&self) -> u32 {
        self.memories.len() as u32
    }

    pub fn memory_pages(&self, idx: u32) -> Option<u64> {
        self.memories.get(idx as usize).map(LinearMemory::pages)
    }

    pub fn memory_grow(&mut self, idx: u32, delta: u64, caller_cap: u64) -> i64 {
        let Some(memory) = self.memories.get_mut(idx as usize) else {
            return -1;
        };
        let prev = memory.grow(delta, caller_cap);
        if prev >= 0 {
            self.sync_memory(idx as usize);
            tracing::trace!(idx, delta, prev, "memory.grow");
        }
        prev
    }

    pub fn memory_slice_mut(&mut self, idx: u32) -> Option<&mut [u8]> {
        let memory = self.memories.get_mut(idx as usize)?;
        let len = memory.byte_len();
        let base = memory.base_ptr();
        if base.is_null() {
            return Some(&mut []);
        }
        Some(unsafe { core::slice::from_raw_parts_mut(base, len) })
    }

    /* -------------------------- globals -------------------------- */

    /// Borrows a host-owned global-value array.
    pub fn set_globals(&mut self, globals: *mut u64) {
        self.globals = GlobalsStorage::Borrowed(globals);
        self.vmctx.globals = globals;
    }

    /// Allocates an owned, zeroed global-value array.
    pub fn alloc_globals(&mut self, count: usize) {
        let mut values = vec![0u64; count];
        self.vmctx.globals = values.as_mut_ptr();
        self.globals = GlobalsStorage::Owned(values);
    }

    /* -------------------------- tables --------------------------- */

    /// Allocates an owned table-0 pair array with every entry null and
    /// every type index −1.
    pub fn alloc_indirect_table(&mut self, count: u64) -> crate::Result<()> {
        let storage = TableStorage::Owned {
            entries: vec![VMTableEntry::NULL; count as usize],
            max: u64::MAX,
        };
        if self.tables.is_empty() {
            self.tables.push(storage);
            self.table_ptrs.push(ptr::null_mut());
            self.table_sizes.push(0);
            self.table_max_sizes.push(u64::MAX);
        } else {
            // Reconfiguring table 0 drops any previously owned storage.
            self.tables[0] = storage;
        }
        self.sync_tables();
        Ok(())
    }

    /// Reconfigures table 0 to borrow an externally owned pair array. Any
    /// previously owned table is freed.
    pub fn use_shared_table(&mut self, base: *mut VMTableEntry, count: u64) {
        let storage = TableStorage::Borrowed {
            base,
            len: count,
            max: count,
        };
        if self.tables.is_empty() {
            self.tables.push(storage);
            self.table_ptrs.push(ptr::null_mut());
            self.table_sizes.push(0);
            self.table_max_sizes.push(0);
        } else {
            self.tables[0] = storage;
        }
        self.sync_tables();
    }

    /// Appends an owned table to the table index space. `max = u64::MAX`
    /// encodes "no declared cap".
    pub fn add_table(&mut self, initial: u64, max: u64) -> crate::Result<u32> {
        let idx = self.tables.len() as u32;
        self.tables.push(TableStorage::Owned {
            entries: vec![VMTableEntry::NULL; initial as usize],
            max,
        });
        self.table_ptrs.push(ptr::null_mut());
        self.table_sizes.push(0);
        self.table_max_sizes.push(0);
        self.sync_tables();
        Ok(idx)
    }

    /// Configures multi-table mode from externally owned tables, given as
    /// `(base, size, max_size)` triples. Table 0, when present, is
    /// mirrored into the fast-path fields as a borrow.
    pub fn set_table_pointers(&mut self, tables: &[(*mut VMTableEntry, u64, u64)]) {
        self.tables = tables
            .iter()
            .map(|&(base, len, max)| TableStorage::Borrowed { base, len, max })
            .collect();
        self.table_ptrs = vec![ptr::null_mut(); tables.len()];
        self.table_sizes = vec![0; tables.len()];
        self.table_max_sizes = vec![0; tables.len()];
        self.sync_tables();
    }

    /// Refreshes every table mirror in the context. Must run after any
    /// mutation that may have moved or resized table storage.
    fn sync_tables(&mut self) {
        for idx in 0..self.tables.len() {
            self.table_ptrs[idx] = self.tables[idx].base_ptr();
            self.table_sizes[idx] = self.tables[idx].len();
            self.table_max_sizes[idx] = self.tables[idx].max();
        }
        self.vmctx.tables = self.table_ptrs.as_mut_ptr();
        self.vmctx.table_sizes = self.table_sizes.as_mut_ptr();
        self.vmctx.table_max_sizes = self.table_max_sizes.as_mut_ptr();
        self.vmctx.table_count = self.tables.len() as u32;

        if let Some(first) = self.tables.first_mut() {
            self.vmctx.table0_base = first.base_ptr();
            self.vmctx.table0_elements = first.len();
        } else {
            self.vmctx.table0_base = ptr::null_mut();
            self.vmctx.table0_elements = 0;
        }
    }

    /// Whether table 0 storage is owned by this instance.
    pub fn owns_indirect_table(&self) -> bool {
        matches!(self.tables.first(), Some(TableStorage::Owned { .. }))
    }

    /// Whether the global-value array is owned by this instance.
    pub fn owns_globals(&self) -> bool {
        matches!(self.globals, GlobalsStorage::Owned(_))
    }

    pub fn table_len(&self, idx: u32) -> Option<u64> {
        self.tables.get(idx as usize).map(TableStorage::len)
    }

    pub fn table_entries_mut(&mut self, idx: u32) -> Option<&mut [VMTableEntry]> {
        let table = self.tables.get_mut(idx as usize)?;
        match table {
            TableStorage::Owned { entries, .. } => Some(entries.as_mut_slice()),
            TableStorage::Borrowed { base, len, .. } => {
                if base.is_null() {
                    return Some(&mut []);
                }
                Some(unsafe { core::slice::from_raw_parts_mut(*base, *len as usize) })
            }
        }
    }

    /// Grows table `idx` by `delta` entries filled with `(init, −1)`,
    /// returning the previous element count or −1. Borrowed tables are
    /// only mutated by their owner and refuse to grow here.
    pub fn table_grow(&mut self, idx: u32, delta: u64, init: u64) -> i64 {
        let Some(table) = self.tables.get_mut(idx as usize) else {
            return -1;
        };
        let TableStorage::Owned { entries, max } = table else {
            return -1;
        };

        let prev = entries.len() as u64;
        let Some(new_len) = prev.checked_add(delta) else {
            return -1;
        };
        if new_len > *max {
            return -1;
        }
        entries.resize(
            new_len as usize,
            VMTableEntry {
                value: init,
                type_idx: -1,
            },
        );
        self.sync_tables();
        tracing::trace!(idx, delta, prev, "table.grow");
        prev as i64
    }

    /// Stores a function entry into a table slot; bounds-checked.
    pub fn set_indirect(
        &mut self,
        table_idx: u32,
        entry_idx: u64,
        func_idx: u32,
        type_idx: i64,
    ) -> crate::Result<()> {
        let func = self
            .funcs
            .get(func_idx as usize)
            .copied()
            .ok_or(Error::IndexOutOfBounds)?;
        let value = gc::encode_native_funcref(func.cast());
        let entries = self
            .table_entries_mut(table_idx)
            .ok_or(Error::IndexOutOfBounds)?;
        let entry = entries
            .get_mut(entry_idx as usize)
            .ok_or(Error::IndexOutOfBounds)?;
        *entry = VMTableEntry { value, type_idx };
        Ok(())
    }

    /* ------------------------- segments -------------------------- */

    /// Installs the passive data segments, copied at instantiation.
    pub fn set_data_segments(&mut self, segments: Vec<Box<[u8]>>) {
        self.data_segments = segments
            .into_iter()
            .map(|bytes| DataSegment {
                bytes,
                dropped: false,
            })
            .collect();
    }

    /// Installs the passive element segments as `(value, type_idx)` pairs.
    pub fn set_elem_segments(&mut self, segments: Vec<Box<[VMTableEntry]>>) {
        self.elem_segments = segments
            .into_iter()
            .map(|entries| ElemSegment {
                entries,
                dropped: false,
            })
            .collect();
    }

    /* ---------------------- exception frame ---------------------- */

    /// Allocates the buffers the generated throw sequence spills into:
    /// room for `value_capacity` exception values and `local_count`
    /// local slots.
    pub fn alloc_exception_buffers(&mut self, value_capacity: usize, local_count: usize) {
        self.exception_values = vec![0; value_capacity];
        self.spilled_locals = vec![0; local_count];
        self.vmctx.exception_values = self.exception_values.as_mut_ptr();
        self.vmctx.spilled_locals = self.spilled_locals.as_mut_ptr();
        self.vmctx.spilled_locals_count = local_count as u32;
    }

    /// The local-slot snapshot captured by the most recent throw.
    pub fn spilled_locals(&self) -> &[u64] {
        &self.spilled_locals
    }

    /// The in-flight exception frame `(tag, values)`, if one is pending.
    pub fn pending_exception(&self) -> Option<(u64, &[u64])> {
        if self.vmctx.exception_handler.is_null() && self.vmctx.exception_value_count == 0 {
            return None;
        }
        let count = (self.vmctx.exception_value_count as usize).min(self.exception_values.len());
        Some((self.vmctx.exception_tag, &self.exception_values[..count]))
    }

    /// Clears the exception frame after the host has consumed it.
    pub fn clear_exception(&mut self) {
        self.vmctx.exception_handler = ptr::null_mut();
        self.vmctx.exception_tag = 0;
        self.vmctx.exception_value_count = 0;
    }

    /* ------------------------ wasm stack ------------------------- */

    /// Allocates an optional wasm operand-stack region of `size` bytes
    /// with a leading guard page. Faults in the guard are reported as
    /// stack exhaustion.
    pub fn alloc_wasm_stack(&mut self, size: usize) -> crate::Result<()> {
        let guard = crate::host_page_size();
        let total = round_usize_up_to_host_pages(size) + guard;
        let mut mmap = Mmap::with_reserve(total)?;
        mmap.make_accessible(guard, total - guard)?;

        let base = mmap.as_mut_ptr();
        self.vmctx.wasm_stack_guard = base;
        self.vmctx.guard_page_size = guard as u64;
        self.vmctx.wasm_stack_base = unsafe { base.add(guard) };
        // Full-descending stack: top starts at the high end.
        self.vmctx.wasm_stack_top = unsafe { base.add(total) };
        self.vmctx.wasm_stack_size = (total - guard) as u64;
        self.wasm_stack = Some(mmap);
        Ok(())
    }

    /// Whether an operand-stack region has been allocated.
    pub fn has_wasm_stack(&self) -> bool {
        self.wasm_stack.is_some()
    }
}

// Raw pointers into storage this struct itself owns.
unsafe impl Send for Instance {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_init_mirrors_fast_path() {
        let mut instance = Instance::new(2);
        instance.add_memory(1, 0, false).unwrap();
        instance.alloc_indirect_table(4).unwrap();

        let ctx = unsafe { &*instance.vmctx() };
        assert_eq!(ctx.memory_size, WASM_PAGE_SIZE);
        assert!(!ctx.memory_base.is_null());
        assert_eq!(ctx.table0_elements, 4);
        assert_eq!(ctx.table_count, 1);
        assert_eq!(ctx.func_count, 2);
        assert!(instance.owns_indirect_table());
    }

    #[test]
    fn shared_table_clears_owner_bit() {
        let mut shared = vec![VMTableEntry::NULL; 8];
        let mut instance = Instance::new(0);
        instance.alloc_indirect_table(2).unwrap();
        assert!(instance.owns_indirect_table());

        instance.use_shared_table(shared.as_mut_ptr(), shared.len() as u64);
        assert!(!instance.owns_indirect_table());
        let ctx = unsafe { &*instance.vmctx() };
        assert_eq!(ctx.table0_base, shared.as_mut_ptr());
        assert_eq!(ctx.table0_elements, 8);
    }

    #[test]
    fn grow_zero_is_size_query() {
        let mut instance = Instance::new(0);
        instance.add_memory(3, 0, false).unwrap();
        assert_eq!(instance.memory_grow(0, 0, 0), 3);
        assert_eq!(instance.memory_pages(0), Some(3));
    }

    #[test]
    fn grow_respects_declared_cap() {
        let mut instance = Instance::new(0);
        instance.add_memory(1, 2, false).unwrap();
        assert_eq!(instance.memory_grow(0, 1, 0), 1);
        assert_eq!(instance.memory_grow(0, 1, 0), -1);
        assert_eq!(instance.memory_pages(0), Some(2));
    }

    #[test]
    fn borrowed_table_refuses_grow() {
        let mut shared = vec![VMTableEntry::NULL; 4];
        let mut instance = Instance::new(0);
        instance.use_shared_table(shared.as_mut_ptr(), 4);
        assert_eq!(instance.table_grow(0, 2, 0), -1);
    }

    #[test]
    fn exception_frame_round_trip() {
        let mut instance = Instance::new(0);
        instance.alloc_exception_buffers(4, 2);
        assert!(instance.pending_exception().is_none());

        // simulate a generated throw sequence
        let ctx = instance.vmctx_mut();
        unsafe {
            (*ctx).exception_tag = 3;
            *(*ctx).exception_values = 11;
            *(*ctx).exception_values.add(1) = 22;
            (*ctx).exception_value_count = 2;
        }
        let (tag, values) = instance.pending_exception().unwrap();
        assert_eq!(tag, 3);
        assert_eq!(values, &[11, 22]);

        instance.clear_exception();
        assert!(instance.pending_exception().is_none());
    }

    #[test]
    fn set_indirect_bounds_checked() {
        let mut instance = Instance::new(1);
        let body = 0x1000 as *const VMFunctionBody;
        instance.set_func(0, body).unwrap();
        instance.alloc_indirect_table(2).unwrap();

        instance.set_indirect(0, 1, 0, 7).unwrap();
        assert!(instance.set_indirect(0, 2, 0, 7).is_err());
        assert!(instance.set_indirect(0, 0, 1, 7).is_err());

        let entries = instance.table_entries_mut(0).unwrap();
        assert_eq!(entries[1].type_idx, 7);
        assert_ne!(entries[1].value, 0);
    }
}
