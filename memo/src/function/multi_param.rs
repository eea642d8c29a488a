use super::core::{FunctionCore, ValueFactory};
use crate::error::{BoxError, GetError, SharedError};
use crate::flight::DuplicateTaskCatcherCombined;
use crate::registry::FunctionStatsSnapshot;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::BoxFuture;

pub(crate) type FetchInnerFn<KO, KI, V> =
  Arc<dyn Fn(KO, Vec<KI>) -> BoxFuture<'static, Result<HashMap<KI, V>, BoxError>> + Send + Sync>;

/// Caches a function of one outer key and many inner keys, such as
/// "prices of these products in this currency".
///
/// Each `(outer, inner)` pair is cached on its own; inner keys that miss
/// are fetched together for their outer key.
pub struct MultiParamEnumerableKeyFunctionCache<KO, KI, V> {
  pub(crate) core: Arc<FunctionCore<(KO, KI), V>>,
  pub(crate) fetch: FetchInnerFn<KO, KI, V>,
  pub(crate) catcher: Arc<DuplicateTaskCatcherCombined<KO, KI, V>>,
}

impl<KO, KI, V> Clone for MultiParamEnumerableKeyFunctionCache<KO, KI, V> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
      fetch: self.fetch.clone(),
      catcher: self.catcher.clone(),
    }
  }
}

impl<KO, KI, V> fmt::Debug for MultiParamEnumerableKeyFunctionCache<KO, KI, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MultiParamEnumerableKeyFunctionCache")
      .field("name", &self.core.name)
      .field("cached", &self.core.cache.is_some())
      .field("catcher", &self.catcher)
      .finish_non_exhaustive()
  }
}

impl<KO, KI, V> MultiParamEnumerableKeyFunctionCache<KO, KI, V>
where
  KO: Eq + Hash + Clone + Send + Sync + 'static,
  KI: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  /// Returns a value for every inner key that is cached or that the fetch produced.
  pub async fn get_many(&self, outer: KO, inner_keys: &[KI]) -> Result<HashMap<KI, V>, GetError> {
    let keys: Vec<(KO, KI)> = inner_keys
      .iter()
      .map(|inner| (outer.clone(), inner.clone()))
      .collect();

    let catcher = &self.catcher;
    let fetch = &self.fetch;
    let fill = &self.core.fill_missing;
    let core = &self.core;
    let found = self
      .core
      .get_many(&keys, |batch: Vec<(KO, KI)>, slot| {
        let fetch = fetch.clone();
        let fill = fill.clone();
        let outer = outer.clone();
        let inner_keys: Vec<KI> = batch.into_iter().map(|(_, inner)| inner).collect();
        async move {
          let fetched = catcher
            .execute(outer.clone(), &inner_keys, move |outer: KO, owned: Vec<KI>| {
              let future = fetch(outer.clone(), owned.clone());
              let filled = fill_inner_keys(future, outer.clone(), owned, fill);
              core.store_fetched(filled, slot, move |fetched: &HashMap<KI, V>| {
                fetched
                  .iter()
                  .map(|(inner, value)| ((outer.clone(), inner.clone()), value.clone()))
                  .collect()
              })
            })
            .await?;
          Ok::<_, SharedError>(
            fetched
              .into_iter()
              .map(|(inner, found)| ((outer.clone(), inner), found))
              .collect::<HashMap<_, _>>(),
          )
        }
      })
      .await?;

    Ok(
      found
        .into_iter()
        .map(|((_, inner), value)| (inner, value))
        .collect(),
    )
  }

  pub async fn get(&self, outer: KO, inner: KI) -> Result<Option<V>, GetError> {
    let mut found = self.get_many(outer, std::slice::from_ref(&inner)).await?;
    Ok(found.remove(&inner))
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

/// Applies the composite fill factory to inner keys the fetch left out.
fn fill_inner_keys<KO, KI, V>(
  fetch: BoxFuture<'static, Result<HashMap<KI, V>, BoxError>>,
  outer: KO,
  requested: Vec<KI>,
  fill: Option<ValueFactory<(KO, KI), V>>,
) -> BoxFuture<'static, Result<HashMap<KI, V>, BoxError>>
where
  KO: Clone + Send + 'static,
  KI: Eq + Hash + Clone + Send + 'static,
  V: Send + 'static,
{
  let fill = match fill {
    Some(fill) => fill,
    None => return fetch,
  };
  Box::pin(async move {
    let mut fetched = fetch.await?;
    for inner in requested {
      if !fetched.contains_key(&inner) {
        let value = fill(&(outer.clone(), inner.clone()));
        fetched.insert(inner, value);
      }
    }
    Ok(fetched)
  })
}
