use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use seize::Guard;

use crate::raw;
use crate::{LocalGuard, OwnedGuard};

/// A concurrent hash table.
///
/// Most operations require a [`Guard`], which can be acquired through
/// [`HashMap::guard`] or the [`HashMap::pin`] API. See the [crate-level
/// documentation](crate) for details.
///
/// Note that entry identity is the full 64-bit avalanched hash of the key,
/// so `Eq` is not required; distinct keys that collide on all 64 bits are
/// indistinguishable. This is a documented limitation of the design.
pub struct HashMap<K, V, S = RandomState> {
    raw: raw::HashMap<K, V, S>,
}

impl<K, V> Default for HashMap<K, V> {
    fn default() -> Self {
        HashMap::new()
    }
}

impl<K, V> HashMap<K, V> {
    /// Creates an empty `HashMap`.
    ///
    /// # Examples
    ///
    /// ```
    /// use abyss::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::new();
    /// ```
    pub fn new() -> HashMap<K, V> {
        HashMap::with_capacity(0)
    }

    /// Creates an empty `HashMap` that can hold `capacity` entries without
    /// resizing.
    ///
    /// # Examples
    ///
    /// ```
    /// use abyss::HashMap;
    /// let map: HashMap<&str, i32> = HashMap::with_capacity(100);
    /// ```
    pub fn with_capacity(capacity: usize) -> HashMap<K, V> {
        HashMap::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates an empty `HashMap` that uses the given hash builder.
    pub fn with_hasher(hasher: S) -> HashMap<K, V, S> {
        HashMap::with_capacity_and_hasher(0, hasher)
    }

    /// Creates an empty `HashMap` with the given capacity and hash builder.
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> HashMap<K, V, S> {
        HashMap {
            raw: raw::HashMap::new(capacity, hasher),
        }
    }

    /// Returns a guard for this table.
    ///
    /// Any entry references returned for the lifetime of the guard remain
    /// valid until it is dropped.
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.raw.guard()
    }

    /// Returns an owned guard for this table.
    ///
    /// Unlike [`HashMap::guard`], an owned guard is `Send` and `Sync`,
    /// making it useful in work-stealing schedulers at a slightly higher
    /// cost.
    #[inline]
    pub fn owned_guard(&self) -> OwnedGuard<'_> {
        self.raw.owned_guard()
    }

    /// Pins the map for the current thread, so operations do not need an
    /// explicit guard.
    #[inline]
    pub fn pin(&self) -> Pinned<'_, K, V, S> {
        Pinned {
            guard: self.raw.guard(),
            raw: &self.raw,
        }
    }

    /// Returns the approximate number of entries in the map.
    ///
    /// The count is maintained on sharded counters, so it may lag behind
    /// concurrent mutations.
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity, in slots, of the current table.
    #[inline]
    pub fn capacity(&self, guard: &impl Guard) -> usize {
        self.raw.capacity(guard)
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    /// Returns a reference to the value for this key, if it exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use abyss::HashMap;
    ///
    /// let map = HashMap::new();
    /// let guard = map.guard();
    /// map.insert(1, "a", &guard);
    /// assert_eq!(map.get(&1, &guard), Some(&"a"));
    /// assert_eq!(map.get(&2, &guard), None);
    /// ```
    #[inline]
    pub fn get<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.raw.get(key, guard)
    }

    /// Returns `true` if the map holds a value for this key.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q, guard: &impl Guard) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.get(key, guard).is_some()
    }

    /// Inserts a key-value pair into the map, returning the value that was
    /// previously mapped to the key, if there was one.
    ///
    /// # Examples
    ///
    /// ```
    /// use abyss::HashMap;
    ///
    /// let map = HashMap::new();
    /// let guard = map.guard();
    /// assert_eq!(map.insert(37, "a", &guard), None);
    /// assert_eq!(map.insert(37, "b", &guard), Some(&"a"));
    /// ```
    #[inline]
    pub fn insert<'g>(&self, key: K, value: V, guard: &'g impl Guard) -> Option<&'g V> {
        self.raw.insert(key, value, guard)
    }

    /// Removes the entry for this key, returning its value if one was
    /// present.
    ///
    /// # Examples
    ///
    /// ```
    /// use abyss::HashMap;
    ///
    /// let map = HashMap::new();
    /// let guard = map.guard();
    /// map.insert(1, "a", &guard);
    /// assert_eq!(map.remove(&1, &guard), Some(&"a"));
    /// assert_eq!(map.remove(&1, &guard), None);
    /// ```
    #[inline]
    pub fn remove<'g, Q>(&self, key: &Q, guard: &'g impl Guard) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.raw.remove(key, guard)
    }
}

/// A map pinned for the current thread.
///
/// See [`HashMap::pin`] for details.
pub struct Pinned<'map, K, V, S> {
    guard: LocalGuard<'map>,
    raw: &'map raw::HashMap<K, V, S>,
}

impl<'map, K, V, S> Pinned<'map, K, V, S>
where
    K: Hash,
    S: BuildHasher,
{
    /// Returns a reference to the value for this key, if it exists.
    #[inline]
    pub fn get<'g, Q>(&'g self, key: &Q) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.raw.get(key, &self.guard)
    }

    /// Returns `true` if the map holds a value for this key.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Inserts a key-value pair into the map, returning the previous value
    /// for this key if one was present.
    #[inline]
    pub fn insert(&self, key: K, value: V) -> Option<&V> {
        self.raw.insert(key, value, &self.guard)
    }

    /// Removes the entry for this key, returning its value if one was
    /// present.
    #[inline]
    pub fn remove<'g, Q>(&'g self, key: &Q) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        self.raw.remove(key, &self.guard)
    }

    /// Returns the approximate number of entries in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity, in slots, of the current table.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity(&self.guard)
    }
}
