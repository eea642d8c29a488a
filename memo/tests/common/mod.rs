#![allow(dead_code)]

use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fibre_memo::{CacheError, DistributedCache, Key, MemoryCache, MemoryCacheBuilder, ValueAndTtl};
use parking_lot::Mutex;

// A custom hasher that allows us to control which shard a key is assigned to.
// It simply uses the integer value of the key as its hash.
// For a 4-shard store:
// - key 0 -> shard 0 (0 % 4 = 0)
// - key 1 -> shard 1 (1 % 4 = 1)
// - key 4 -> shard 0 (4 % 4 = 0)
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_i32(&mut self, i: i32) {
    self.0 = i as u64;
  }
}

pub fn build_test_store(shards: usize) -> MemoryCache<i32, String, ShardControllingHasher> {
  MemoryCacheBuilder::new()
    .shards(shards)
    .hasher(ShardControllingHasher)
    .build()
    .unwrap()
}

// A store whose background sweeper effectively never runs, so tests drive
// sweeps with `run_pending_sweep`.
pub fn build_manual_sweep_store<K, V>() -> MemoryCache<K, V>
where
  K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  MemoryCacheBuilder::new()
    .shards(4)
    .sweep_interval(Duration::from_secs(3600))
    .build()
    .unwrap()
}

#[derive(Debug, thiserror::Error)]
#[error("distributed backend unavailable")]
pub struct BackendDown;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

struct DistributedInner<V> {
  entries: Mutex<HashMap<String, (V, Instant)>>,
  gets: AtomicUsize,
  sets: AtomicUsize,
  failing: AtomicBool,
}

/// An in-memory stand-in for a networked cache, keyed by the serialized key.
#[derive(Clone)]
pub struct TestDistributedCache<V> {
  inner: Arc<DistributedInner<V>>,
}

impl<V: Clone> TestDistributedCache<V> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(DistributedInner {
        entries: Mutex::new(HashMap::new()),
        gets: AtomicUsize::new(0),
        sets: AtomicUsize::new(0),
        failing: AtomicBool::new(false),
      }),
    }
  }

  /// Seeds an entry without counting it as a `set`.
  pub fn seed(&self, key: &str, value: V, ttl: Duration) {
    self
      .inner
      .entries
      .lock()
      .insert(key.to_string(), (value, Instant::now() + ttl));
  }

  pub fn stored(&self, key: &str) -> Option<V> {
    self.inner.entries.lock().get(key).map(|(value, _)| value.clone())
  }

  pub fn set_failing(&self, failing: bool) {
    self.inner.failing.store(failing, Ordering::SeqCst);
  }

  /// Read calls, counting a batch read once.
  pub fn gets(&self) -> usize {
    self.inner.gets.load(Ordering::SeqCst)
  }

  pub fn sets(&self) -> usize {
    self.inner.sets.load(Ordering::SeqCst)
  }

  fn check(&self) -> Result<(), CacheError> {
    if self.inner.failing.load(Ordering::SeqCst) {
      Err(CacheError::backend("distributed", BackendDown))
    } else {
      Ok(())
    }
  }

  fn read(&self, key: &str) -> Option<ValueAndTtl<V>> {
    let entries = self.inner.entries.lock();
    let (value, expires_at) = entries.get(key)?;
    let left = expires_at.checked_duration_since(Instant::now())?;
    Some(ValueAndTtl::new(value.clone(), left))
  }
}

#[async_trait]
impl<K, V> DistributedCache<K, V> for TestDistributedCache<V>
where
  K: Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  async fn try_get(&self, key: &Key<K>) -> Result<Option<ValueAndTtl<V>>, CacheError> {
    self.inner.gets.fetch_add(1, Ordering::SeqCst);
    self.check()?;
    Ok(self.read(key.as_str()))
  }

  async fn set(&self, key: &Key<K>, value: V, ttl: Duration) -> Result<(), CacheError> {
    self.inner.sets.fetch_add(1, Ordering::SeqCst);
    self.check()?;
    self.seed(key.as_str(), value, ttl);
    Ok(())
  }

  async fn get_many(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, ValueAndTtl<V>)>, CacheError> {
    self.inner.gets.fetch_add(1, Ordering::SeqCst);
    self.check()?;
    Ok(
      keys
        .iter()
        .filter_map(|key| self.read(key.as_str()).map(|found| (key.clone(), found)))
        .collect(),
    )
  }

  async fn set_many(&self, items: Vec<(Key<K>, V)>, ttl: Duration) -> Result<(), CacheError> {
    self.inner.sets.fetch_add(1, Ordering::SeqCst);
    self.check()?;
    for (key, value) in items {
      self.seed(key.as_str(), value, ttl);
    }
    Ok(())
  }

  async fn try_remove(&self, key: &Key<K>) -> Result<Option<V>, CacheError> {
    self.check()?;
    Ok(self.inner.entries.lock().remove(key.as_str()).map(|(value, _)| value))
  }
}
