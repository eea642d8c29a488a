use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use crossbeam_utils::CachePadded;
use generational_arena::{Arena, Index};
use parking_lot::RwLock;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// One partition of the store: a key index into an arena of entries.
pub(crate) struct Shard<K, V, H> {
  index: HashMap<K, Index, H>,
  entries: Arena<CacheEntry<V>>,
}

impl<K, V, H> Shard<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher,
{
  fn new(hasher: H) -> Self {
    Self {
      index: HashMap::with_hasher(hasher),
      entries: Arena::new(),
    }
  }

  #[inline]
  pub(crate) fn get(&self, key: &K) -> Option<&CacheEntry<V>> {
    let index = self.index.get(key)?;
    self.entries.get(*index)
  }

  /// Installs `entry` under `key` and returns its slot handle along with the
  /// entry it replaced.
  ///
  /// The new entry is placed in the arena before the key is repointed, and the
  /// previous slot is only freed once nothing in the index refers to it.
  pub(crate) fn insert(&mut self, key: K, entry: CacheEntry<V>) -> (Index, Option<CacheEntry<V>>) {
    let new_index = self.entries.insert(entry);
    let previous = match self.index.insert(key, new_index) {
      Some(old_index) => self.entries.remove(old_index),
      None => None,
    };
    (new_index, previous)
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
    let index = self.index.remove(key)?;
    self.entries.remove(index)
  }

  /// Removes the entry for `key` only if it is still the one identified by
  /// `index` and still carries the expiry `expires_at`.
  pub(crate) fn remove_if_current(
    &mut self,
    key: &K,
    index: Index,
    expires_at: u64,
  ) -> Option<CacheEntry<V>> {
    match self.index.get(key) {
      Some(live) if *live == index => {}
      _ => return None,
    }
    match self.entries.get(index) {
      Some(entry) if entry.expires_at == expires_at => {}
      _ => return None,
    }
    self.index.remove(key);
    self.entries.remove(index)
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.index.len()
  }

  pub(crate) fn clear(&mut self) -> usize {
    let removed = self.index.len();
    self.index.clear();
    self.entries.clear();
    removed
  }
}

/// A store that is partitioned into multiple, independently locked shards.
///
/// Operations on different keys rarely contend for the same lock, and reads
/// on the same shard proceed in parallel under a shared lock.
pub(crate) struct ShardedStore<K, V, H> {
  pub(crate) shards: Box<[CachePadded<RwLock<Shard<K, V, H>>>]>,
  pub(crate) hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore` with the specified number of shards and hasher.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(Shard::new(hasher.clone()))))
      .collect();

    Self { shards, hasher }
  }

  /// Returns the shard index for a key. The builder guarantees the shard
  /// count is a non-zero power of two.
  #[inline]
  pub(crate) fn shard_index(&self, key: &K) -> usize {
    hash_key(&self.hasher, key) as usize & (self.shards.len() - 1)
  }

  /// Returns the lock guarding the shard for a given key.
  #[inline]
  pub(crate) fn get_shard(&self, key: &K) -> &RwLock<Shard<K, V, H>> {
    &self.shards[self.shard_index(key)]
  }

  /// Returns an iterator over all the shard locks.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &RwLock<Shard<K, V, H>>> {
    self.shards.iter().map(|padded_lock| &**padded_lock)
  }

  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }
}
