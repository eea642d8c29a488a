use super::distributed::swallow_read;
use super::local::local_get_many;
use super::{Cache, CacheHit, DistributedCache, LocalCache, TierPolicy, DISTRIBUTED_TIER, LOCAL_TIER};
use crate::error::CacheError;
use crate::key::Key;

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A local cache in front of a distributed cache.
///
/// Reads check the local tier first and fall back to the distributed tier,
/// back-filling the local tier with the remaining TTL the distributed tier
/// reports. Writes go to the local tier first, then to the distributed tier.
///
/// If the distributed write fails after the local write succeeded, the tiers
/// disagree until the local entry expires.
pub struct TwoTierCache<K, V> {
  local: Arc<dyn LocalCache<K, V>>,
  distributed: Arc<dyn DistributedCache<K, V>>,
  local_policy: TierPolicy<K, V>,
  distributed_policy: TierPolicy<K, V>,
  swallow_distributed_errors: bool,
}

impl<K, V> fmt::Debug for TwoTierCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TwoTierCache")
      .field("local_policy", &self.local_policy)
      .field("distributed_policy", &self.distributed_policy)
      .field("swallow_distributed_errors", &self.swallow_distributed_errors)
      .finish_non_exhaustive()
  }
}

impl<K, V> TwoTierCache<K, V> {
  pub fn new(local: Arc<dyn LocalCache<K, V>>, distributed: Arc<dyn DistributedCache<K, V>>) -> Self {
    Self {
      local,
      distributed,
      local_policy: TierPolicy::allow_all(),
      distributed_policy: TierPolicy::allow_all(),
      swallow_distributed_errors: false,
    }
  }

  pub fn local_policy(mut self, policy: TierPolicy<K, V>) -> Self {
    self.local_policy = policy;
    self
  }

  pub fn distributed_policy(mut self, policy: TierPolicy<K, V>) -> Self {
    self.distributed_policy = policy;
    self
  }

  /// When set, distributed read failures degrade to misses. Off by default.
  pub fn swallow_distributed_errors(mut self, swallow: bool) -> Self {
    self.swallow_distributed_errors = swallow;
    self
  }
}

impl<K, V> TwoTierCache<K, V>
where
  K: Clone,
  V: Clone,
{
  fn backfill(&self, key: &K, value: &V, remaining: Duration) -> Result<(), CacheError> {
    if remaining.is_zero() || self.local_policy.skips_set(key, value) {
      return Ok(());
    }
    self.local.set(key.clone(), value.clone(), remaining)
  }
}

#[async_trait]
impl<K, V> Cache<K, V> for TwoTierCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  async fn get(&self, key: &Key<K>) -> Result<Option<CacheHit<V>>, CacheError> {
    if !self.local_policy.skips_get(key.key()) {
      if let Some(value) = self.local.try_get(key.key())? {
        return Ok(Some(CacheHit::new(value, LOCAL_TIER)));
      }
    }

    if self.distributed_policy.skips_get(key.key()) {
      return Ok(None);
    }

    let found = swallow_read(self.distributed.try_get(key).await, self.swallow_distributed_errors)?.flatten();
    match found {
      Some(entry) => {
        self.backfill(key.key(), &entry.value, entry.time_to_live)?;
        Ok(Some(CacheHit::new(entry.value, DISTRIBUTED_TIER)))
      }
      None => Ok(None),
    }
  }

  async fn set(&self, key: &Key<K>, value: V, ttl: Duration) -> Result<(), CacheError> {
    if !self.local_policy.skips_set(key.key(), &value) {
      self.local.set(key.key().clone(), value.clone(), ttl)?;
    }
    if self.distributed_policy.skips_set(key.key(), &value) {
      return Ok(());
    }
    self.distributed.set(key, value, ttl).await.map_err(|err| {
      tracing::warn!(key = %key, error = %err, "distributed cache write failed after local write");
      err
    })
  }

  async fn get_many(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, CacheHit<V>)>, CacheError> {
    if keys.is_empty() {
      return Ok(Vec::new());
    }

    let mut hits = local_get_many(self.local.as_ref(), &self.local_policy, keys)?;
    let found_locally: HashSet<&K, ahash::RandomState> = hits.iter().map(|(key, _)| key.key()).collect();

    // Only keys still missing after the local lookup go to the distributed tier.
    let missing: Vec<Key<K>> = keys
      .iter()
      .filter(|key| !found_locally.contains(key.key()) && !self.distributed_policy.skips_get(key.key()))
      .cloned()
      .collect();
    drop(found_locally);
    if missing.is_empty() {
      return Ok(hits);
    }

    let fetched = swallow_read(
      self.distributed.get_many(&missing).await,
      self.swallow_distributed_errors,
    )?
    .unwrap_or_default();

    for (key, entry) in fetched {
      self.backfill(key.key(), &entry.value, entry.time_to_live)?;
      hits.push((key, CacheHit::new(entry.value, DISTRIBUTED_TIER)));
    }
    Ok(hits)
  }

  async fn set_many(&self, items: Vec<(Key<K>, V)>, ttl: Duration) -> Result<(), CacheError> {
    if items.is_empty() {
      return Ok(());
    }

    let local_items: Vec<(K, V)> = items
      .iter()
      .filter(|(key, value)| !self.local_policy.skips_set(key.key(), value))
      .map(|(key, value)| (key.key().clone(), value.clone()))
      .collect();
    if !local_items.is_empty() {
      self.local.set_many(local_items, ttl)?;
    }

    let distributed_items: Vec<(Key<K>, V)> = items
      .into_iter()
      .filter(|(key, value)| !self.distributed_policy.skips_set(key.key(), value))
      .collect();
    if distributed_items.is_empty() {
      return Ok(());
    }
    let count = distributed_items.len();
    self
      .distributed
      .set_many(distributed_items, ttl)
      .await
      .map_err(|err| {
        tracing::warn!(count, error = %err, "distributed cache batch write failed after local write");
        err
      })
  }
}
