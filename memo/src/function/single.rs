use super::core::FunctionCore;
use crate::error::{BoxError, GetError};
use crate::flight::DuplicateTaskCatcher;
use crate::registry::FunctionStatsSnapshot;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::BoxFuture;

pub(crate) type KeySelector<P, K> = Arc<dyn Fn(&P) -> K + Send + Sync>;
pub(crate) type FetchFn<P, V> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<V, BoxError>> + Send + Sync>;

/// Caches the result of a function of one parameter set.
///
/// The parameters `P` are mapped to a cache key `K` by a key selector; the
/// fetch function receives the parameters themselves.
pub struct SingleKeyFunctionCache<P, K, V> {
  pub(crate) core: Arc<FunctionCore<K, V>>,
  pub(crate) key_selector: KeySelector<P, K>,
  pub(crate) fetch: FetchFn<P, V>,
  pub(crate) catcher: Arc<DuplicateTaskCatcher<K, V>>,
}

impl<P, K, V> Clone for SingleKeyFunctionCache<P, K, V> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
      key_selector: self.key_selector.clone(),
      fetch: self.fetch.clone(),
      catcher: self.catcher.clone(),
    }
  }
}

impl<P, K, V> fmt::Debug for SingleKeyFunctionCache<P, K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SingleKeyFunctionCache")
      .field("name", &self.core.name)
      .field("cached", &self.core.cache.is_some())
      .field("catcher", &self.catcher)
      .finish_non_exhaustive()
  }
}

impl<P, K, V> SingleKeyFunctionCache<P, K, V>
where
  P: Send + 'static,
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  /// Returns the cached value for `params`, fetching it on a miss.
  pub async fn get(&self, params: P) -> Result<V, GetError> {
    let key = (self.key_selector)(&params);
    let fetch = self.fetch.clone();
    let catcher = &self.catcher;
    let core = &self.core;
    self
      .core
      .get_one(key, move |key, slot| async move {
        catcher
          .execute(key, move |key: &K| {
            let key = key.clone();
            core.store_fetched(fetch(params), slot, move |value: &V| vec![(key, value.clone())])
          })
          .await
      })
      .await
  }

  pub fn name(&self) -> &str {
    &self.core.name
  }

  pub fn stats(&self) -> FunctionStatsSnapshot {
    self.core.stats.snapshot()
  }

  /// The number of keys with a fetch currently in flight.
  pub fn in_flight_count(&self) -> usize {
    self.catcher.in_flight_count()
  }
}
