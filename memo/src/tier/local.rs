use super::{Cache, CacheHit, TierPolicy, LOCAL_TIER};
use crate::error::CacheError;
use crate::key::Key;
use crate::local::MemoryCache;

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A synchronous, in-process cache with an explicit TTL on every write.
///
/// Implementations must never block on I/O.
pub trait LocalCache<K, V>: Send + Sync {
  fn try_get(&self, key: &K) -> Result<Option<V>, CacheError>;

  /// Like `try_get`, also returning the time the value has left to live.
  fn try_get_with_ttl(&self, key: &K) -> Result<Option<(V, Duration)>, CacheError>;

  fn set(&self, key: K, value: V, ttl: Duration) -> Result<(), CacheError>;

  fn get_many(&self, keys: &[K]) -> Result<Vec<(K, V)>, CacheError>;

  fn set_many(&self, items: Vec<(K, V)>, ttl: Duration) -> Result<(), CacheError>;

  fn try_remove(&self, key: &K) -> Result<Option<V>, CacheError>;
}

impl<K, V, H> LocalCache<K, V> for MemoryCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Clone + Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  fn try_get(&self, key: &K) -> Result<Option<V>, CacheError> {
    MemoryCache::try_get(self, key)
  }

  fn try_get_with_ttl(&self, key: &K) -> Result<Option<(V, Duration)>, CacheError> {
    MemoryCache::try_get_with_ttl(self, key)
  }

  fn set(&self, key: K, value: V, ttl: Duration) -> Result<(), CacheError> {
    MemoryCache::set(self, key, value, ttl)
  }

  fn get_many(&self, keys: &[K]) -> Result<Vec<(K, V)>, CacheError> {
    MemoryCache::get_many(self, keys)
  }

  fn set_many(&self, items: Vec<(K, V)>, ttl: Duration) -> Result<(), CacheError> {
    MemoryCache::set_many(self, items, ttl)
  }

  fn try_remove(&self, key: &K) -> Result<Option<V>, CacheError> {
    MemoryCache::try_remove(self, key)
  }
}

/// Exposes a [`LocalCache`] through the [`Cache`] shape.
pub struct LocalTier<K, V> {
  inner: Arc<dyn LocalCache<K, V>>,
  policy: TierPolicy<K, V>,
}

impl<K, V> LocalTier<K, V> {
  pub fn new(inner: Arc<dyn LocalCache<K, V>>) -> Self {
    Self {
      inner,
      policy: TierPolicy::allow_all(),
    }
  }

  pub fn with_policy(mut self, policy: TierPolicy<K, V>) -> Self {
    self.policy = policy;
    self
  }
}

#[async_trait]
impl<K, V> Cache<K, V> for LocalTier<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  async fn get(&self, key: &Key<K>) -> Result<Option<CacheHit<V>>, CacheError> {
    if self.policy.skips_get(key.key()) {
      return Ok(None);
    }
    Ok(
      self
        .inner
        .try_get(key.key())?
        .map(|value| CacheHit::new(value, LOCAL_TIER)),
    )
  }

  async fn set(&self, key: &Key<K>, value: V, ttl: Duration) -> Result<(), CacheError> {
    if self.policy.skips_set(key.key(), &value) {
      return Ok(());
    }
    self.inner.set(key.key().clone(), value, ttl)
  }

  async fn get_many(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, CacheHit<V>)>, CacheError> {
    local_get_many(self.inner.as_ref(), &self.policy, keys)
  }

  async fn set_many(&self, items: Vec<(Key<K>, V)>, ttl: Duration) -> Result<(), CacheError> {
    let items: Vec<(K, V)> = items
      .into_iter()
      .filter(|(key, value)| !self.policy.skips_set(key.key(), value))
      .map(|(key, value)| (key.into_inner(), value))
      .collect();
    if items.is_empty() {
      return Ok(());
    }
    self.inner.set_many(items, ttl)
  }
}

/// Looks `keys` up in one batch, honouring the tier's skip-get predicate.
pub(crate) fn local_get_many<K, V>(
  local: &dyn LocalCache<K, V>,
  policy: &TierPolicy<K, V>,
  keys: &[Key<K>],
) -> Result<Vec<(Key<K>, CacheHit<V>)>, CacheError>
where
  K: Eq + Hash + Clone,
{
  let lookup: Vec<K> = keys
    .iter()
    .filter(|key| !policy.skips_get(key.key()))
    .map(|key| key.key().clone())
    .collect();
  if lookup.is_empty() {
    return Ok(Vec::new());
  }

  let mut found: HashMap<K, V, ahash::RandomState> = local.get_many(&lookup)?.into_iter().collect();
  Ok(
    keys
      .iter()
      .filter_map(|key| {
        found
          .remove(key.key())
          .map(|value| (key.clone(), CacheHit::new(value, LOCAL_TIER)))
      })
      .collect(),
  )
}
