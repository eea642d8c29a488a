use crate::error::BuildError;
use crate::local::{MemoryCache, MemoryShared};
use crate::metrics::Metrics;
use crate::store::ShardedStore;
use crate::task::sweeper::{Sweeper, SweeperContext};

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_EXPIRY_QUEUE_CAPACITY: usize = 4096;

/// A builder for creating `MemoryCache` instances.
pub struct MemoryCacheBuilder<K: Send, V, H = ahash::RandomState> {
  shards: usize,
  hasher: H,
  sweep_interval: Duration,
  expiry_queue_capacity: usize,
  _key_marker: PhantomData<K>,
  _value_marker: PhantomData<V>,
}

impl<K: Send, V, H> fmt::Debug for MemoryCacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryCacheBuilder")
      .field("shards", &self.shards)
      .field("sweep_interval", &self.sweep_interval)
      .field("expiry_queue_capacity", &self.expiry_queue_capacity)
      .finish_non_exhaustive()
  }
}

impl<K: Send, V, H> MemoryCacheBuilder<K, V, H> {
  /// Sets the number of concurrent shards to use.
  ///
  /// The count is rounded up to a power of two. Zero is kept as-is and
  /// rejected by `build`.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = if shards == 0 {
      0
    } else {
      shards.next_power_of_two()
    };
    self
  }

  /// Sets how often the background sweeper removes expired entries.
  ///
  /// Expired entries are never returned to readers regardless of this interval;
  /// it only bounds how long they keep occupying memory.
  pub fn sweep_interval(mut self, interval: Duration) -> Self {
    self.sweep_interval = interval;
    self
  }

  /// Sets the capacity of the channel carrying expiry records to the sweeper.
  ///
  /// Records that do not fit are kept in an overflow list, so writers never block.
  pub fn expiry_queue_capacity(mut self, capacity: usize) -> Self {
    self.expiry_queue_capacity = capacity;
    self
  }
}

impl<K: Send, V, H: BuildHasher + Default> MemoryCacheBuilder<K, V, H> {
  /// Creates a new `MemoryCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      sweep_interval: DEFAULT_SWEEP_INTERVAL,
      expiry_queue_capacity: DEFAULT_EXPIRY_QUEUE_CAPACITY,
      _key_marker: PhantomData,
      _value_marker: PhantomData,
    }
  }
}

impl<K: Send, V> Default for MemoryCacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H> MemoryCacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher for the store.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Builds the store and starts its sweeper thread.
  pub fn build(self) -> Result<MemoryCache<K, V, H>, BuildError> {
    self.validate()?;

    let store = Arc::new(ShardedStore::new(self.shards, self.hasher.clone()));
    let metrics = Arc::new(Metrics::new());
    let (context, expiry_queue) =
      SweeperContext::new(store.clone(), metrics.clone(), self.expiry_queue_capacity);
    let sweeper_context = Arc::new(context);
    let sweeper = Sweeper::spawn(sweeper_context.clone(), self.sweep_interval);

    Ok(MemoryCache {
      shared: Arc::new(MemoryShared {
        store,
        metrics,
        expiry_queue,
        sweeper_context,
        sweeper: Mutex::new(Some(sweeper)),
        disposed: AtomicBool::new(false),
      }),
    })
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if self.expiry_queue_capacity == 0 {
      return Err(BuildError::ZeroQueueCapacity);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shard_count_is_rounded_to_power_of_two() {
    let builder = MemoryCacheBuilder::<u32, u32>::new().shards(6);
    assert_eq!(builder.shards, 8);
  }

  #[test]
  fn zero_values_are_rejected() {
    let err = MemoryCacheBuilder::<u32, u32>::new().shards(0).build().unwrap_err();
    assert_eq!(err, BuildError::ZeroShards);

    let err = MemoryCacheBuilder::<u32, u32>::new()
      .expiry_queue_capacity(0)
      .build()
      .unwrap_err();
    assert_eq!(err, BuildError::ZeroQueueCapacity);
  }
}
