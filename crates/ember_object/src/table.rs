//! The global object table.
//!
//! A two-level "chunked fixed array" owns one [`ObjectEntry`] per live
//! object. The outer chunk-pointer array is sized once at initialization;
//! chunks are allocated on demand and entry addresses never move, so raw
//! entry pointers and long-lived iterators stay valid. Slot reuse is made
//! detectable by a generation counter that increments every time a slot is
//! vacated.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering::SeqCst};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::handle::{ObjectHandle, INDEX_NONE};
use crate::object::Object;

/// Entries per chunk.
const ELEMENTS_PER_CHUNK: u32 = 65_536;

/// One slot in the object table.
pub struct ObjectEntry {
    object: AtomicPtr<Object>,
    generation: AtomicU32,
    strong: AtomicU32,
    weak: AtomicU32,
}

impl ObjectEntry {
    const fn empty() -> Self {
        Self {
            object: AtomicPtr::new(std::ptr::null_mut()),
            generation: AtomicU32::new(0),
            strong: AtomicU32::new(0),
            weak: AtomicU32::new(0),
        }
    }

    /// The stored object pointer, or null when the slot is vacant.
    pub fn object(&self) -> *mut Object {
        self.object.load(SeqCst)
    }

    /// The slot's current generation.
    pub fn generation(&self) -> u32 {
        self.generation.load(SeqCst)
    }

    /// The slot's current strong count.
    pub fn strong_count(&self) -> u32 {
        self.strong.load(SeqCst)
    }

    /// The slot's current weak count.
    pub fn weak_count(&self) -> u32 {
        self.weak.load(SeqCst)
    }
}

struct TableState {
    chunks: Box<[AtomicPtr<ObjectEntry>]>,
    max_elements: u32,
    max_chunks: u32,
    num_chunks: AtomicU32,
    /// Allocation watermark: the number of slots that have ever been used.
    num_elements: AtomicU32,
    chunk_mutex: Mutex<()>,
    free_indices: Mutex<Vec<u32>>,
    shutting_down: AtomicBool,
}

/// The process-wide object table. See the [module docs](self).
pub struct ObjectTable {
    state: OnceCell<TableState>,
}

static OBJECT_TABLE: ObjectTable = ObjectTable {
    state: OnceCell::new(),
};

/// Get the global object table.
pub fn object_table() -> &'static ObjectTable {
    &OBJECT_TABLE
}

impl ObjectTable {
    /// Initialize the table with capacity for `max_objects` live objects.
    ///
    /// Must be called exactly once, before any allocation. A second call is
    /// logged and ignored.
    pub fn initialize(&self, max_objects: u32) {
        let max_elements = max_objects.max(1_000);
        let max_chunks = max_elements.div_ceil(ELEMENTS_PER_CHUNK);
        let result = self.state.set(TableState {
            chunks: (0..max_chunks)
                .map(|_| AtomicPtr::new(std::ptr::null_mut()))
                .collect(),
            max_elements,
            max_chunks,
            num_chunks: AtomicU32::new(0),
            num_elements: AtomicU32::new(0),
            chunk_mutex: Mutex::new(()),
            free_indices: Mutex::new(Vec::with_capacity(max_elements as usize / 4)),
            shutting_down: AtomicBool::new(false),
        });
        if result.is_err() {
            tracing::warn!("object table is already initialized");
        }
    }

    /// Whether [`initialize`][Self::initialize] has run.
    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    fn state(&self) -> &TableState {
        self.state
            .get()
            .expect("object table used before initialization")
    }

    /// Get the entry for `index`, allocating its chunk if needed.
    fn entry_or_alloc(&self, index: u32) -> &ObjectEntry {
        let state = self.state();
        assert!(index < state.max_elements, "object table capacity exceeded");

        let chunk_index = (index / ELEMENTS_PER_CHUNK) as usize;
        let sub_index = (index % ELEMENTS_PER_CHUNK) as usize;

        let mut chunk = state.chunks[chunk_index].load(SeqCst);
        if chunk.is_null() {
            let _guard = state.chunk_mutex.lock();
            chunk = state.chunks[chunk_index].load(SeqCst);
            if chunk.is_null() {
                let entries: Box<[ObjectEntry]> = (0..ELEMENTS_PER_CHUNK)
                    .map(|_| ObjectEntry::empty())
                    .collect();
                chunk = Box::leak(entries).as_mut_ptr();
                state.chunks[chunk_index].store(chunk, SeqCst);
                state
                    .num_chunks
                    .fetch_max(chunk_index as u32 + 1, SeqCst);
            }
        }

        // SOUND: chunk allocations are leaked and never freed, and
        // `sub_index` is within the fixed chunk length.
        unsafe { &*chunk.add(sub_index) }
    }

    /// Get the entry for `index` if its chunk exists.
    pub fn entry(&self, index: i32) -> Option<&ObjectEntry> {
        let state = self.state.get()?;
        if index < 0 || index as u32 >= state.max_elements {
            return None;
        }
        let chunk_index = (index as u32 / ELEMENTS_PER_CHUNK) as usize;
        let sub_index = (index as u32 % ELEMENTS_PER_CHUNK) as usize;
        let chunk = state.chunks[chunk_index].load(SeqCst);
        if chunk.is_null() {
            return None;
        }
        // SOUND: chunk allocations are leaked and never freed, and
        // `sub_index` is within the fixed chunk length.
        Some(unsafe { &*chunk.add(sub_index) })
    }

    /// Claim a slot for `object` and return its handle.
    ///
    /// Free slots are reused in LIFO order; otherwise the watermark grows.
    /// A fresh slot starts at generation 1. A reused slot keeps the
    /// generation that was stamped when it was vacated, so every handle to
    /// the previous tenant is stale.
    pub fn allocate(&self, object: *mut Object) -> ObjectHandle {
        debug_assert!(!object.is_null());
        let state = self.state();

        let reused = state.free_indices.lock().pop();
        let (index, generation) = match reused {
            Some(index) => {
                let entry = self.entry_or_alloc(index);
                debug_assert!(entry.object().is_null());
                entry.strong.store(0, SeqCst);
                entry.object.store(object, SeqCst);
                (index, entry.generation())
            }
            None => {
                let index = state.num_elements.fetch_add(1, SeqCst);
                assert!(
                    index < state.max_elements,
                    "object table capacity exceeded ({} objects)",
                    state.max_elements
                );
                let entry = self.entry_or_alloc(index);
                entry.generation.store(1, SeqCst);
                entry.strong.store(0, SeqCst);
                entry.weak.store(0, SeqCst);
                entry.object.store(object, SeqCst);
                (index, 1)
            }
        };

        ObjectHandle::new(index as i32, generation)
    }

    /// Vacate the slot at `index`: null the pointer, bump the generation,
    /// and push the index onto the free list.
    pub fn deallocate(&self, index: i32) {
        let Some(entry) = self.entry(index) else {
            return;
        };
        debug_assert!(!entry.object().is_null());
        entry.object.store(std::ptr::null_mut(), SeqCst);
        entry.generation.fetch_add(1, SeqCst);
        self.state().free_indices.lock().push(index as u32);
    }

    /// Resolve a handle to its object, or null when the handle is null or
    /// the slot has moved on to a new generation.
    pub fn resolve(&self, handle: ObjectHandle) -> *mut Object {
        if !handle.is_valid() {
            return std::ptr::null_mut();
        }
        let Some(entry) = self.entry(handle.index) else {
            return std::ptr::null_mut();
        };
        if entry.generation() != handle.generation {
            return std::ptr::null_mut();
        }
        entry.object()
    }

    /// Build a handle for the current tenant of `index`, or the null handle
    /// if the slot is vacant.
    pub fn handle_for_index(&self, index: i32) -> ObjectHandle {
        match self.entry(index) {
            Some(entry) if !entry.object().is_null() => {
                ObjectHandle::new(index, entry.generation())
            }
            _ => ObjectHandle::NULL,
        }
    }

    /// Raise the strong count for the handle's tenant. Returns `false` when
    /// the handle is stale.
    pub fn add_strong_ref(&self, handle: ObjectHandle) -> bool {
        if self.resolve(handle).is_null() {
            return false;
        }
        let entry = self.entry(handle.index).unwrap();
        entry.strong.fetch_add(1, SeqCst);
        true
    }

    /// Release one strong count for the handle's tenant.
    ///
    /// Returns `true` when this release brought the count to zero and the
    /// object should be destroyed. During shutdown releases are observed
    /// but never trigger destruction: the shutdown sweep drives it.
    pub fn release_strong_ref(&self, handle: ObjectHandle) -> bool {
        let state = self.state();
        if self.resolve(handle).is_null() {
            return false;
        }
        let entry = self.entry(handle.index).unwrap();
        let previous = entry.strong.fetch_sub(1, SeqCst);
        debug_assert!(previous > 0, "strong ref count underflow");
        if state.shutting_down.load(SeqCst) {
            return false;
        }
        previous == 1
    }

    /// Raise the weak count on the handle's slot.
    pub fn add_weak_ref(&self, handle: ObjectHandle) {
        if let Some(entry) = self.entry(handle.index) {
            entry.weak.fetch_add(1, SeqCst);
        }
    }

    /// Release one weak count on the handle's slot.
    pub fn release_weak_ref(&self, handle: ObjectHandle) {
        if let Some(entry) = self.entry(handle.index) {
            let previous = entry.weak.fetch_sub(1, SeqCst);
            debug_assert!(previous > 0, "weak ref count underflow");
        }
    }

    /// Visit every live object as `(pointer, index)`.
    pub fn for_each_object(&self, mut visitor: impl FnMut(*mut Object, u32)) {
        let Some(state) = self.state.get() else {
            return;
        };
        let watermark = state.num_elements.load(SeqCst);
        for index in 0..watermark {
            if let Some(entry) = self.entry(index as i32) {
                let object = entry.object();
                if !object.is_null() {
                    visitor(object, index);
                }
            }
        }
    }

    /// Number of live objects.
    pub fn num_alive(&self) -> u32 {
        let Some(state) = self.state.get() else {
            return 0;
        };
        state.num_elements.load(SeqCst) - state.free_indices.lock().len() as u32
    }

    /// Flip the shutdown flag. After this, strong releases stop triggering
    /// destruction.
    pub fn begin_shutdown(&self) {
        if let Some(state) = self.state.get() {
            state.shutting_down.store(true, SeqCst);
        }
    }

    /// Whether the shutdown flag is set.
    pub fn is_shutting_down(&self) -> bool {
        self.state
            .get()
            .map(|s| s.shutting_down.load(SeqCst))
            .unwrap_or(false)
    }
}
