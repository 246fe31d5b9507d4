//! Interned names backed by a process-wide string table.
//!
//! A [`Name`] is a 64-bit identifier for an interned byte string. Equal
//! strings always intern to the same ID, the ID `0` is reserved to mean
//! "none", and the string storage is stable for the lifetime of the process
//! so that [`Name::as_str`] can hand out `&'static str` references.

use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::HashMap;

/// Size of each string pool chunk.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Bump allocator for interned string storage.
///
/// Strings are copied into 1 MiB chunks that are allocated on demand and
/// never freed, so the returned references stay valid for the process
/// lifetime.
struct StringPool {
    chunks: Vec<Chunk>,
}

struct Chunk {
    data: Box<[u8]>,
    used: usize,
}

impl StringPool {
    const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    fn allocate(&mut self, s: &str) -> &'static str {
        let len = s.len();
        let needs_new_chunk = match self.chunks.last() {
            Some(chunk) => chunk.used + len > chunk.data.len(),
            None => true,
        };
        if needs_new_chunk {
            self.chunks.push(Chunk {
                data: vec![0u8; CHUNK_SIZE.max(len)].into_boxed_slice(),
                used: 0,
            });
        }

        let chunk = self.chunks.last_mut().unwrap();
        let start = chunk.used;
        chunk.data[start..start + len].copy_from_slice(s.as_bytes());
        chunk.used += len;

        // SOUND: the chunk's box allocation never moves or frees for the
        // process lifetime (chunks are only ever pushed, and the pool lives in
        // a `Lazy` static which is never dropped), and the bytes were copied
        // from a valid `&str`.
        unsafe {
            let bytes = std::slice::from_raw_parts(chunk.data.as_ptr().add(start), len);
            std::str::from_utf8_unchecked(bytes)
        }
    }

    fn memory_usage(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

/// The process-wide table mapping name IDs to their interned strings.
pub struct NameTable {
    inner: Mutex<NameTableInner>,
}

struct NameTableInner {
    by_id: HashMap<u64, &'static str>,
    pool: StringPool,
}

static NAME_TABLE: Lazy<NameTable> = Lazy::new(|| NameTable {
    inner: Mutex::new(NameTableInner {
        by_id: HashMap::default(),
        pool: StringPool::new(),
    }),
});

impl NameTable {
    /// Get the global name table.
    pub fn global() -> &'static NameTable {
        &NAME_TABLE
    }

    /// Intern `s` and return its stable 64-bit ID.
    ///
    /// The ID is the 64-bit hash of the bytes, remapped away from the
    /// reserved `0`. If two distinct strings ever hash to the same ID the
    /// second insertion is rejected: an error is logged and `0` is returned.
    pub fn get_or_create(&self, s: &str) -> u64 {
        let mut id = fxhash::hash64(s.as_bytes());
        if id == 0 {
            id = u64::MAX;
        }

        let mut inner = self.inner.lock();
        match inner.by_id.get(&id).copied() {
            Some(existing) if existing == s => id,
            Some(existing) => {
                tracing::error!(
                    "name hash collision: \"{s}\" collides with already-interned \"{existing}\""
                );
                0
            }
            None => {
                let stored = inner.pool.allocate(s);
                inner.by_id.insert(id, stored);
                id
            }
        }
    }

    /// Look up the string for `id`. Returns [`None`] for the reserved `0` ID
    /// and for IDs that were never interned.
    pub fn get(&self, id: u64) -> Option<&'static str> {
        if id == 0 {
            return None;
        }
        self.inner.lock().by_id.get(&id).copied()
    }

    /// Approximate memory retained by the table: pool chunks plus map storage.
    pub fn memory_usage(&self) -> usize {
        let inner = self.inner.lock();
        inner.pool.memory_usage()
            + inner.by_id.capacity() * std::mem::size_of::<(u64, &'static str)>()
    }
}

/// A stable 64-bit identifier for an interned string.
///
/// `Name` is `Copy` and compares, hashes, and orders by ID only. The default
/// value is [`Name::NONE`].
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Name(u64);

impl Name {
    /// The reserved "none" name.
    pub const NONE: Name = Name(0);

    /// Intern `s` and return its name.
    pub fn new(s: &str) -> Name {
        Name(NameTable::global().get_or_create(s))
    }

    /// Recreate a name from a raw ID previously obtained from [`Name::id`].
    pub fn from_id(id: u64) -> Name {
        Name(id)
    }

    /// The raw 64-bit ID.
    pub fn id(&self) -> u64 {
        self.0
    }

    /// Whether this is the reserved "none" name.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// The interned string. Returns `"None"` for [`Name::NONE`].
    pub fn as_str(&self) -> &'static str {
        NameTable::global().get(self.0).unwrap_or("None")
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl From<&String> for Name {
    fn from(s: &String) -> Self {
        Name::new(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn intern_identity() {
        let a1 = Name::new("Apple");
        let b = Name::new("Banana");
        let a2 = Name::new("Apple");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.as_str(), "Apple");
        assert_eq!(b.as_str(), "Banana");
    }

    #[test]
    fn none_is_reserved() {
        assert!(Name::NONE.is_none());
        assert_eq!(Name::default(), Name::NONE);
        assert_eq!(Name::NONE.as_str(), "None");
        assert!(!Name::new("none").is_none());
    }

    #[test]
    fn ids_are_stable_across_lookups() {
        let id = Name::new("Stable").id();
        assert_eq!(Name::new("Stable").id(), id);
        assert_eq!(Name::from_id(id).as_str(), "Stable");
    }

    #[test]
    fn large_strings_get_their_own_chunk() {
        let big = "x".repeat(2 * CHUNK_SIZE);
        let name = Name::new(&big);
        assert_eq!(name.as_str(), big);
    }

    #[test]
    fn concurrent_interning() {
        let names: Vec<String> = (0..64).map(|i| format!("concurrent_{i}")).collect();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let names = names.clone();
            handles.push(std::thread::spawn(move || {
                names.iter().map(|n| Name::new(n).id()).collect::<Vec<_>>()
            }));
        }
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
    }

    #[test]
    fn memory_usage_grows_with_interning() {
        let before = NameTable::global().memory_usage();
        Name::new("memory_usage_probe_string");
        assert!(NameTable::global().memory_usage() >= before);
    }
}
