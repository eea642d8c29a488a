use super::load_future::LoadFuture;
use super::{run_guarded, start_guarded};
use crate::error::{BoxError, SharedError};
use crate::runtime::TaskSpawner;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

type Slot<V> = Arc<LoadFuture<Result<Option<V>, SharedError>>>;
type InFlight<K, V> = Arc<Mutex<HashMap<K, Slot<V>, ahash::RandomState>>>;

/// Collapses concurrent batch fetches key by key.
///
/// Each call fetches only the keys nobody else is already fetching and waits
/// on the rest. A key is released as soon as its own batch completes, so a
/// later caller for that key never waits on unrelated keys.
pub struct DuplicateTaskCatcherMulti<K, V> {
  in_flight: InFlight<K, V>,
  // `None` disables deduplication.
  spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<K, V> fmt::Debug for DuplicateTaskCatcherMulti<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DuplicateTaskCatcherMulti")
      .field("enabled", &self.spawner.is_some())
      .field("in_flight", &self.in_flight.lock().len())
      .finish()
  }
}

impl<K, V> DuplicateTaskCatcherMulti<K, V>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + 'static,
{
  pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::default())),
      spawner: Some(spawner),
    }
  }

  /// Creates a coordinator that passes every request straight to the fetch function.
  pub fn disabled() -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::default())),
      spawner: None,
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.spawner.is_some()
  }

  /// The number of keys with a fetch currently in flight.
  pub fn in_flight_count(&self) -> usize {
    self.in_flight.lock().len()
  }

  /// Returns a value and a duplicate flag for every requested key the fetch
  /// produced. Keys the fetch did not return are absent from the map.
  ///
  /// `fetch` is called at most once, with the keys this call owns; it is not
  /// called at all when every key is already in flight or `keys` is empty.
  /// If any batch this call depends on fails, the call fails with that error.
  pub async fn execute_many<F, Fut>(&self, keys: &[K], fetch: F) -> Result<HashMap<K, (V, bool)>, SharedError>
  where
    F: FnOnce(Vec<K>) -> Fut,
    Fut: Future<Output = Result<HashMap<K, V>, BoxError>> + Send + 'static,
  {
    if keys.is_empty() {
      return Ok(HashMap::new());
    }

    let spawner = match &self.spawner {
      Some(spawner) => spawner,
      None => {
        let future = start_guarded(|| fetch(keys.to_vec()))?;
        let fetched = run_guarded(future).await?;
        return Ok(
          fetched
            .into_iter()
            .map(|(key, value)| (key, (value, false)))
            .collect(),
        );
      }
    };

    let mut owned: Vec<(K, Slot<V>)> = Vec::new();
    let mut joined: Vec<(K, Slot<V>)> = Vec::new();
    {
      let mut seen = HashSet::with_capacity(keys.len());
      let mut in_flight = self.in_flight.lock();
      for key in keys {
        if !seen.insert(key) {
          continue;
        }
        match in_flight.get(key) {
          Some(existing) => joined.push((key.clone(), existing.clone())),
          None => {
            let load = Arc::new(LoadFuture::new());
            in_flight.insert(key.clone(), load.clone());
            owned.push((key.clone(), load));
          }
        }
      }
    }

    if !owned.is_empty() {
      let requested = owned.iter().map(|(key, _)| key.clone()).collect();
      let future = match start_guarded(|| fetch(requested)) {
        Ok(future) => future,
        Err(err) => {
          {
            let mut in_flight = self.in_flight.lock();
            for (key, _) in &owned {
              in_flight.remove(key);
            }
          }
          for (_, load) in &owned {
            load.complete(Err(err.clone()));
          }
          return Err(err);
        }
      };
      let in_flight = self.in_flight.clone();
      let completions = owned.clone();
      tracing::trace!(owned = completions.len(), joined = joined.len(), "dispatching shared batch fetch");
      spawner.spawn(Box::pin(async move {
        let result = run_guarded(future).await;
        {
          let mut in_flight = in_flight.lock();
          for (key, _) in &completions {
            in_flight.remove(key);
          }
        }
        match result {
          Ok(mut fetched) => {
            for (key, load) in completions {
              load.complete(Ok(fetched.remove(&key)));
            }
          }
          Err(err) => {
            for (_, load) in completions {
              load.complete(Err(err.clone()));
            }
          }
        }
      }));
    }

    let mut results = HashMap::with_capacity(owned.len() + joined.len());
    let mut first_error = None;
    let waits = owned
      .into_iter()
      .map(|(key, load)| (key, load, false))
      .chain(joined.into_iter().map(|(key, load)| (key, load, true)));
    for (key, load, duplicate) in waits {
      match (&*load).await {
        Ok(Some(value)) => {
          results.insert(key, (value, duplicate));
        }
        Ok(None) => {}
        Err(err) => {
          first_error.get_or_insert(err);
        }
      }
    }

    match first_error {
      Some(err) => Err(err),
      None => Ok(results),
    }
  }
}
