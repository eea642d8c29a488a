use super::{Cache, CacheHit, TierPolicy, DISTRIBUTED_TIER};
use crate::error::CacheError;
use crate::key::Key;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A value read from a distributed cache along with the time it has left to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueAndTtl<V> {
  pub value: V,
  pub time_to_live: Duration,
}

impl<V> ValueAndTtl<V> {
  pub fn new(value: V, time_to_live: Duration) -> Self {
    Self { value, time_to_live }
  }
}

/// An out-of-process cache, such as a Redis client.
///
/// Keys arrive as [`Key`]s so implementations can use the serialized form.
/// Failures are reported as [`CacheError::Backend`].
#[async_trait]
pub trait DistributedCache<K, V>: Send + Sync {
  async fn try_get(&self, key: &Key<K>) -> Result<Option<ValueAndTtl<V>>, CacheError>;

  async fn set(&self, key: &Key<K>, value: V, ttl: Duration) -> Result<(), CacheError>;

  /// Returns an entry for every key found; missing keys are simply absent.
  async fn get_many(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, ValueAndTtl<V>)>, CacheError>;

  async fn set_many(&self, items: Vec<(Key<K>, V)>, ttl: Duration) -> Result<(), CacheError>;

  async fn try_remove(&self, key: &Key<K>) -> Result<Option<V>, CacheError>;
}

/// Exposes a [`DistributedCache`] through the [`Cache`] shape.
pub struct DistributedTier<K, V> {
  inner: Arc<dyn DistributedCache<K, V>>,
  policy: TierPolicy<K, V>,
  swallow_errors: bool,
}

impl<K, V> DistributedTier<K, V> {
  pub fn new(inner: Arc<dyn DistributedCache<K, V>>) -> Self {
    Self {
      inner,
      policy: TierPolicy::allow_all(),
      swallow_errors: false,
    }
  }

  pub fn with_policy(mut self, policy: TierPolicy<K, V>) -> Self {
    self.policy = policy;
    self
  }

  /// When set, read failures are logged and reported as misses instead of errors.
  pub fn swallow_errors(mut self, swallow: bool) -> Self {
    self.swallow_errors = swallow;
    self
  }
}

/// Degrades a failed distributed read to a miss when `swallow` is set.
pub(crate) fn swallow_read<T>(result: Result<T, CacheError>, swallow: bool) -> Result<Option<T>, CacheError> {
  match result {
    Ok(found) => Ok(Some(found)),
    Err(err) if swallow => {
      tracing::warn!(error = %err, "distributed cache read failed; treating as a miss");
      Ok(None)
    }
    Err(err) => Err(err),
  }
}

#[async_trait]
impl<K, V> Cache<K, V> for DistributedTier<K, V>
where
  K: Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  async fn get(&self, key: &Key<K>) -> Result<Option<CacheHit<V>>, CacheError> {
    if self.policy.skips_get(key.key()) {
      return Ok(None);
    }
    let found = swallow_read(self.inner.try_get(key).await, self.swallow_errors)?.flatten();
    Ok(found.map(|entry| CacheHit::new(entry.value, DISTRIBUTED_TIER)))
  }

  async fn set(&self, key: &Key<K>, value: V, ttl: Duration) -> Result<(), CacheError> {
    if self.policy.skips_set(key.key(), &value) {
      return Ok(());
    }
    self.inner.set(key, value, ttl).await
  }

  async fn get_many(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, CacheHit<V>)>, CacheError> {
    let lookup: Vec<Key<K>> = keys
      .iter()
      .filter(|key| !self.policy.skips_get(key.key()))
      .cloned()
      .collect();
    if lookup.is_empty() {
      return Ok(Vec::new());
    }

    let found = swallow_read(self.inner.get_many(&lookup).await, self.swallow_errors)?.unwrap_or_default();
    Ok(
      found
        .into_iter()
        .map(|(key, entry)| (key, CacheHit::new(entry.value, DISTRIBUTED_TIER)))
        .collect(),
    )
  }

  async fn set_many(&self, items: Vec<(Key<K>, V)>, ttl: Duration) -> Result<(), CacheError> {
    let items: Vec<(Key<K>, V)> = items
      .into_iter()
      .filter(|(key, value)| !self.policy.skips_set(key.key(), value))
      .collect();
    if items.is_empty() {
      return Ok(());
    }
    self.inner.set_many(items, ttl).await
  }
}
