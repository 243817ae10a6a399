//! Aliases for std collections with ahash as the default hasher.
//!
//! When the `ahash` feature is disabled, these fall back to the std
//! SipHash hasher so downstream crates keep compiling.

#[cfg(feature = "ahash")]
pub type ARandomState = ahash::RandomState;
#[cfg(not(feature = "ahash"))]
pub type ARandomState = std::collections::hash_map::RandomState;

pub type AHashMap<K, V> = std::collections::HashMap<K, V, ARandomState>;
pub type AHashSet<V> = std::collections::HashSet<V, ARandomState>;

// re-exported so callers can name Entry types without also
// depending on std's module path spelling
pub use std::collections::hash_map;
pub use std::collections::hash_set;

pub fn new_map<K, V>() -> AHashMap<K, V> {
    AHashMap::with_hasher(ARandomState::default())
}

pub fn new_set<V>() -> AHashSet<V> {
    AHashSet::with_hasher(ARandomState::default())
}

pub fn map_with_capacity<K, V>(capacity: usize) -> AHashMap<K, V> {
    AHashMap::with_capacity_and_hasher(capacity, ARandomState::default())
}

pub fn set_with_capacity<V>(capacity: usize) -> AHashSet<V> {
    AHashSet::with_capacity_and_hasher(capacity, ARandomState::default())
}
