//! Hash-based collections using a fast, non-cryptographic hasher.

/// [`BuildHasher`][std::hash::BuildHasher] used by the collections in this module.
///
/// Currently backed by [`foldhash`][foldhash].
///
/// [foldhash]: https://github.com/orlp/foldhash
pub type FastBuildHasher = foldhash::quality::RandomState;

/// A hash map based on `hashbrown` ([`HashMap`][hashbrown::HashMap]) using [`FastBuildHasher`].
pub type FastHashMap<K, V> = hashbrown::HashMap<K, V, FastBuildHasher>;

/// A hash set based on `hashbrown` ([`HashSet`][hashbrown::HashSet]) using [`FastBuildHasher`].
pub type FastHashSet<T> = hashbrown::HashSet<T, FastBuildHasher>;
