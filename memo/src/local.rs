use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::metrics::{Metrics, MetricsSnapshot, Replaced};
use crate::store::ShardedStore;
use crate::task::sweeper::{ExpiryQueue, ExpiryRecord, Sweeper, SweeperContext};
use crate::time;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
#[cfg(feature = "bulk")]
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

/// The internal, thread-safe core of the memory store.
pub(crate) struct MemoryShared<K: Send, V, H> {
  pub(crate) store: Arc<ShardedStore<K, V, H>>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) expiry_queue: ExpiryQueue<K>,
  pub(crate) sweeper_context: Arc<SweeperContext<K, V, H>>,
  pub(crate) sweeper: Mutex<Option<Sweeper>>,
  pub(crate) disposed: AtomicBool,
}

impl<K: Send, V, H> MemoryShared<K, V, H> {
  fn stop_sweeper(&self) {
    if let Some(sweeper) = self.sweeper.lock().take() {
      sweeper.stop();
    }
  }
}

impl<K: Send, V, H> Drop for MemoryShared<K, V, H> {
  fn drop(&mut self) {
    self.stop_sweeper();
  }
}

/// A thread-safe, in-memory store where every entry carries its own time-to-live.
///
/// Reads and writes are synchronous and never wait on I/O. A read takes a
/// shared lock on the key's shard, so it can briefly wait behind a writer to
/// that same shard; readers never block each other. Expired entries are
/// invisible to readers immediately and are physically removed by a single
/// background sweeper thread.
///
/// Handles are cheap to clone and share the same store.
pub struct MemoryCache<K: Send, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<MemoryShared<K, V, H>>,
}

impl<K: Send, V, H> Clone for MemoryCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K: Send, V, H> fmt::Debug for MemoryCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryCache")
      .field("store", &self.shared.store)
      .field("disposed", &self.shared.disposed.load(Ordering::Relaxed))
      .field("metrics", &self.shared.metrics.snapshot())
      .finish()
  }
}

impl<K, V, H> MemoryCache<K, V, H>
where
  K: Eq + Hash + Clone + Send,
  H: BuildHasher + Clone,
{
  #[inline]
  fn ensure_live(&self) -> Result<(), CacheError> {
    if self.shared.disposed.load(Ordering::Acquire) {
      Err(CacheError::Disposed)
    } else {
      Ok(())
    }
  }

  /// Returns a point-in-time snapshot of the store's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Retrieves a value, treating an expired entry as absent.
  pub fn try_get(&self, key: &K) -> Result<Option<V>, CacheError>
  where
    V: Clone,
  {
    Ok(self.try_get_with_ttl(key)?.map(|(value, _)| value))
  }

  /// Retrieves a value together with the time it has left to live.
  pub fn try_get_with_ttl(&self, key: &K) -> Result<Option<(V, Duration)>, CacheError>
  where
    V: Clone,
  {
    self.ensure_live()?;

    let found = {
      let guard = self.shared.store.get_shard(key).read();
      guard
        .get(key)
        .and_then(|entry| time::remaining(entry.expires_at).map(|left| (entry.value.clone(), left)))
    };

    let counter = if found.is_some() {
      &self.shared.metrics.hits
    } else {
      &self.shared.metrics.misses
    };
    counter.fetch_add(1, Ordering::Relaxed);
    Ok(found)
  }

  /// Returns `true` if the key holds a value that has not expired.
  pub fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
    self.ensure_live()?;
    let now = time::now_nanos();
    let guard = self.shared.store.get_shard(key).read();
    Ok(guard.get(key).map_or(false, |entry| !entry.is_expired_at(now)))
  }

  /// Stores `value` under `key` for `ttl`. The last write for a key wins.
  ///
  /// A zero `ttl` removes any existing entry instead, since the value could
  /// never be observed.
  pub fn set(&self, key: K, value: V, ttl: Duration) -> Result<(), CacheError> {
    self.ensure_live()?;

    if ttl.is_zero() {
      self.remove_entry(&key);
      return Ok(());
    }

    let now = time::now_nanos();
    let expires_at = time::expiry_after(ttl);
    let shard = self.shared.store.get_shard(&key);
    let (index, previous) = shard
      .write()
      .insert(key.clone(), CacheEntry::new(value, expires_at));

    self
      .shared
      .metrics
      .record_write(Replaced::classify(previous.as_ref(), now));
    // The replaced value is dropped here, outside the shard lock.
    drop(previous);

    self.shared.expiry_queue.push(ExpiryRecord {
      key,
      index,
      expires_at,
    });
    Ok(())
  }

  /// Retrieves every key that holds a live value.
  ///
  /// Keys are grouped by shard so each shard is locked once.
  pub fn get_many(&self, keys: &[K]) -> Result<Vec<(K, V)>, CacheError>
  where
    V: Clone,
  {
    self.ensure_live()?;
    if keys.is_empty() {
      return Ok(Vec::new());
    }

    let num_shards = self.shared.store.shards.len();
    let mut keys_by_shard: Vec<Vec<&K>> = vec![Vec::new(); num_shards];
    for key in keys {
      keys_by_shard[self.shared.store.shard_index(key)].push(key);
    }

    let now = time::now_nanos();
    let mut found = Vec::with_capacity(keys.len());
    for (i, shard_keys) in keys_by_shard.into_iter().enumerate() {
      if shard_keys.is_empty() {
        continue;
      }
      let guard = self.shared.store.shards[i].read();
      for key in shard_keys {
        if let Some(entry) = guard.get(key) {
          if !entry.is_expired_at(now) {
            found.push((key.clone(), entry.value.clone()));
          }
        }
      }
    }

    let hits = found.len() as u64;
    self.shared.metrics.hits.fetch_add(hits, Ordering::Relaxed);
    self
      .shared
      .metrics
      .misses
      .fetch_add(keys.len() as u64 - hits, Ordering::Relaxed);
    Ok(found)
  }

  /// Stores every pair with the same `ttl`.
  pub fn set_many(&self, items: Vec<(K, V)>, ttl: Duration) -> Result<(), CacheError>
  where
    K: Sync,
    V: Send + Sync,
    H: Send + Sync,
  {
    self.ensure_live()?;
    if items.is_empty() {
      return Ok(());
    }
    if ttl.is_zero() {
      for (key, _) in items {
        self.remove_entry(&key);
      }
      return Ok(());
    }

    let num_shards = self.shared.store.shards.len();
    let mut items_by_shard: Vec<Vec<(K, V)>> = (0..num_shards).map(|_| Vec::new()).collect();
    for (key, value) in items {
      let index = self.shared.store.shard_index(&key);
      items_by_shard[index].push((key, value));
    }

    let now = time::now_nanos();
    let expires_at = time::expiry_after(ttl);
    let write_shard = |(i, shard_items): (usize, Vec<(K, V)>)| {
      if shard_items.is_empty() {
        return;
      }
      let mut records = Vec::with_capacity(shard_items.len());
      let mut replaced = Vec::new();
      {
        let mut guard = self.shared.store.shards[i].write();
        for (key, value) in shard_items {
          let (index, previous) = guard.insert(key.clone(), CacheEntry::new(value, expires_at));
          self
            .shared
            .metrics
            .record_write(Replaced::classify(previous.as_ref(), now));
          replaced.extend(previous);
          records.push(ExpiryRecord {
            key,
            index,
            expires_at,
          });
        }
      }
      drop(replaced);
      for record in records {
        self.shared.expiry_queue.push(record);
      }
    };

    #[cfg(feature = "bulk")]
    items_by_shard
      .into_par_iter()
      .enumerate()
      .for_each(write_shard);

    #[cfg(not(feature = "bulk"))]
    items_by_shard.into_iter().enumerate().for_each(write_shard);

    Ok(())
  }

  /// Removes a key, returning its value if it had not expired.
  pub fn try_remove(&self, key: &K) -> Result<Option<V>, CacheError> {
    self.ensure_live()?;
    let now = time::now_nanos();
    Ok(
      self
        .remove_entry(key)
        .filter(|entry| !entry.is_expired_at(now))
        .map(|entry| entry.value),
    )
  }

  fn remove_entry(&self, key: &K) -> Option<CacheEntry<V>> {
    let removed = self.shared.store.get_shard(key).write().remove(key);
    if removed.is_some() {
      self.shared.metrics.removals.fetch_add(1, Ordering::Relaxed);
      self.shared.metrics.record_removed(1);
    }
    removed
  }

  /// The number of entries held, including expired entries not yet swept.
  pub fn len(&self) -> Result<usize, CacheError> {
    self.ensure_live()?;
    Ok(self.shared.store.len())
  }

  pub fn is_empty(&self) -> Result<bool, CacheError> {
    Ok(self.len()? == 0)
  }

  /// Removes all entries.
  ///
  /// Expiry records already queued stay behind and are discarded by the
  /// sweeper when they come due.
  pub fn clear(&self) -> Result<(), CacheError> {
    self.ensure_live()?;
    self.clear_shards();
    Ok(())
  }

  fn clear_shards(&self) {
    let removed: usize = self
      .shared
      .store
      .iter_shards()
      .map(|shard| shard.write().clear())
      .sum();
    self.shared.metrics.record_removed(removed as u64);
  }

  /// Runs one sweep on the calling thread and returns how many entries it removed.
  pub fn run_pending_sweep(&self) -> Result<usize, CacheError> {
    self.ensure_live()?;
    Ok(self.shared.sweeper_context.sweep())
  }

  /// Shuts the store down: stops the sweeper and drops every entry.
  ///
  /// Every operation on any handle fails with [`CacheError::Disposed`] afterwards.
  pub fn dispose(&self) {
    if self.shared.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    self.shared.stop_sweeper();
    self.clear_shards();
    tracing::debug!("memory cache disposed");
  }

  pub fn is_disposed(&self) -> bool {
    self.shared.disposed.load(Ordering::Acquire)
  }
}
