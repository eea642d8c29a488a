use super::core::{fill_missing_keys, FunctionCore};
use crate::error::{BoxError, GetError};
use crate::flight::DuplicateTaskCatcherMulti;
use crate::registry::FunctionStatsSnapshot;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::BoxFuture;

pub(crate) type FetchManyFn<K, V> =
  Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>, BoxError>> + Send + Sync>;

/// Caches a function that fetches many keys in one call.
pub struct EnumerableKeyFunctionCache<K, V> {
  pub(crate) core: Arc<FunctionCore<K, V>>,
  pub(crate) fetch: FetchManyFn<K, V>,
  pub(crate) catcher: Arc<DuplicateTaskCatcherMulti<K, V>>,
}

impl<K, V> Clone for EnumerableKeyFunctionCache<K, V> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
      fetch: self.fetch.clone(),
      catcher: self.catcher.clone(),
    }
  }
}

impl<K, V> fmt::Debug for EnumerableKeyFunctionCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EnumerableKeyFunctionCache")
      .field("name", &self.core.name)
      .field("cached", &self.core.cache.is_some())
      .field("max_fetch_batch_size", &self.core.max_fetch_batch_size)
      .field("catcher", &self.catcher)
      .finish_non_exhaustive()
  }
}

impl<K, V> EnumerableKeyFunctionCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  /// Returns a value for every key that is cached or that the fetch produced.
  ///
  /// An empty `keys` slice returns an empty map without touching the cache or
  /// the fetch function.
  pub async fn get_many(&self, keys: &[K]) -> Result<HashMap<K, V>, GetError> {
    let catcher = &self.catcher;
    let fetch = &self.fetch;
    let fill = &self.core.fill_missing;
    let core = &self.core;
    self
      .core
      .get_many(keys, |batch: Vec<K>, slot| {
        let fetch = fetch.clone();
        let fill = fill.clone();
        async move {
          catcher
            .execute_many(&batch, move |owned: Vec<K>| {
              let requested = if fill.is_some() { owned.clone() } else { Vec::new() };
              core.store_fetched(fill_missing_keys(fetch(owned), requested, fill), slot, |fetched: &HashMap<K, V>| {
                fetched
                  .iter()
                  .map(|(key, value)| (key.clone(), value.clone()))
                  .collect()
              })
            })
            .await
        }
      })
      .await
  }

  /// Returns the value for one key, or `None` if the fetch did not produce it.
  pub async fn get(&self, key: K) -> Result<Option<V>, GetError> {
    let mut found = self.get_many(std::slice::from_ref(&key)).await?;
    Ok(found.remove(&key))
  }

  /// Writes the results for `keys` into `destination` and returns how many
  /// were written.
  ///
  /// Fails with [`GetError::DestinationTooSmall`] if `destination` has fewer
  /// slots than there are results; the results are still cached.
  pub async fn get_many_into(
    &self,
    keys: &[K],
    destination: &mut [Option<(K, V)>],
  ) -> Result<usize, GetError> {
    let found = self.get_many(keys).await?;
    if found.len() > destination.len() {
      return Err(GetError::DestinationTooSmall {
        required: found.len(),
        available: destination.len(),
      });
    }

    let count = found.len();
    for (slot, pair) in destination.iter_mut().zip(found) {
      *slot = Some(pair);
    }
    Ok(count)
  }

  pub fn name(&self) -> &str {
    &self.core.name
  }

  pub fn stats(&self) -> FunctionStatsSnapshot {
    self.core.stats.snapshot()
  }

  pub fn in_flight_count(&self) -> usize {
    self.catcher.in_flight_count()
  }
}
