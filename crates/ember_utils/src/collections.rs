//! Collection type aliases using the runtime's standard hasher.

use std::hash::BuildHasherDefault;

use fxhash::FxHasher;

/// A hash map that uses the [`FxHasher`] hashing algorithm.
pub type HashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// A hash set that uses the [`FxHasher`] hashing algorithm.
pub type HashSet<T> = hashbrown::HashSet<T, BuildHasherDefault<FxHasher>>;
