use super::multi::DuplicateTaskCatcherMulti;
use crate::error::{BoxError, SharedError};
use crate::runtime::TaskSpawner;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

/// Single-flight for fetches keyed by an outer key and a set of inner keys.
///
/// Deduplication is per `(outer, inner)` pair; the inner keys owned by one
/// call are fetched together for their outer key.
pub struct DuplicateTaskCatcherCombined<KO, KI, V> {
  inner: DuplicateTaskCatcherMulti<(KO, KI), V>,
}

impl<KO, KI, V> fmt::Debug for DuplicateTaskCatcherCombined<KO, KI, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("DuplicateTaskCatcherCombined")
      .field(&self.inner)
      .finish()
  }
}

impl<KO, KI, V> DuplicateTaskCatcherCombined<KO, KI, V>
where
  KO: Eq + Hash + Clone + Send + 'static,
  KI: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + 'static,
{
  pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      inner: DuplicateTaskCatcherMulti::new(spawner),
    }
  }

  pub fn disabled() -> Self {
    Self {
      inner: DuplicateTaskCatcherMulti::disabled(),
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.is_enabled()
  }

  pub fn in_flight_count(&self) -> usize {
    self.inner.in_flight_count()
  }

  /// Returns a value and a duplicate flag for every inner key the fetch produced.
  pub async fn execute<F, Fut>(
    &self,
    outer: KO,
    inner_keys: &[KI],
    fetch: F,
  ) -> Result<HashMap<KI, (V, bool)>, SharedError>
  where
    F: FnOnce(KO, Vec<KI>) -> Fut,
    Fut: Future<Output = Result<HashMap<KI, V>, BoxError>> + Send + 'static,
  {
    let keys: Vec<(KO, KI)> = inner_keys
      .iter()
      .map(|inner| (outer.clone(), inner.clone()))
      .collect();

    let batch_outer = outer;
    let results = self
      .inner
      .execute_many(&keys, move |owned: Vec<(KO, KI)>| {
        let inner_keys = owned.into_iter().map(|(_, inner)| inner).collect();
        let future = fetch(batch_outer.clone(), inner_keys);
        async move {
          let fetched = future.await?;
          Ok::<_, BoxError>(
            fetched
              .into_iter()
              .map(|(inner, value)| ((batch_outer.clone(), inner), value))
              .collect::<HashMap<_, _>>(),
          )
        }
      })
      .await?;

    Ok(
      results
        .into_iter()
        .map(|((_, inner), found)| (inner, found))
        .collect(),
    )
  }
}
