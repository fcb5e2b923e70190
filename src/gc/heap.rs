//! The GC heap.
//!
//! Objects are identified by 1-based `gc_ref` values so the heap
//! reference encoding (`gc_ref << 1`) can never collide with null. The
//! heap itself is process-global: the host installs one with
//! [`set_heap`] before running code that allocates, and tears it down
//! with [`clear_heap`]. Collection is the host's concern; this layer only
//! allocates and accesses.

use crate::gc::types::{ElemTag, TypeKind};
use spin::Mutex;

#[derive(Debug)]
pub enum GcObject {
    Struct {
        type_idx: i64,
        /// Field values as raw 64-bit slots.
        fields: Box<[u64]>,
    },
    Array {
        type_idx: i64,
        elem_tag: ElemTag,
        elem_size: u32,
        len: u32,
        /// Packed little-endian element storage.
        data: Box<[u8]>,
    },
}

impl GcObject {
    pub(crate) fn kind(&self) -> TypeKind {
        match self {
            GcObject::Struct { .. } => TypeKind::Struct,
            GcObject::Array { .. } => TypeKind::Array,
        }
    }

    pub(crate) fn type_idx(&self) -> i64 {
        match self {
            GcObject::Struct { type_idx, .. } | GcObject::Array { type_idx, .. } => *type_idx,
        }
    }
}

#[derive(Debug, Default)]
pub struct GcHeap {
    objects: Vec<GcObject>,
}

impl GcHeap {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    /// Allocates `obj`, returning its 1-based identity.
    pub(crate) fn alloc(&mut self, obj: GcObject) -> u64 {
        self.objects.push(obj);
        self.objects.len() as u64
    }

    pub(crate) fn get(&self, gc_ref: u64) -> Option<&GcObject> {
        if gc_ref == 0 {
            return None;
        }
        self.objects.get(gc_ref as usize - 1)
    }

    pub(crate) fn get_mut(&mut self, gc_ref: u64) -> Option<&mut GcObject> {
        if gc_ref == 0 {
            return None;
        }
        self.objects.get_mut(gc_ref as usize - 1)
    }
}

static HEAP: Mutex<Option<GcHeap>> = Mutex::new(None);

/// Installs the heap new allocations go to. Replaces any previous heap.
pub fn set_heap(heap: GcHeap) {
    *HEAP.lock() = Some(heap);
}

/// Drops the installed heap; outstanding references become dangling and
/// fail every lookup.
pub fn clear_heap() {
    *HEAP.lock() = None;
}

/// Runs `f` against the installed heap.
pub(crate) fn with_heap<R>(f: impl FnOnce(&mut GcHeap) -> Option<R>) -> Option<R> {
    f(HEAP.lock().as_mut()?)
}

/// Kind and declared type of a live object, for the subtype test.
pub(crate) fn kind_and_type(gc_ref: u64) -> Option<(TypeKind, i64)> {
    with_heap(|heap| {
        let obj = heap.get(gc_ref)?;
        Some((obj.kind(), obj.type_idx()))
    })
}
