use super::load_future::LoadFuture;
use super::{run_guarded, start_guarded};
use crate::error::{BoxError, SharedError};
use crate::runtime::TaskSpawner;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

type InFlight<K, V> = Arc<Mutex<HashMap<K, Arc<LoadFuture<Result<V, SharedError>>>, ahash::RandomState>>>;

/// Collapses concurrent fetches for the same key into one execution.
pub struct DuplicateTaskCatcher<K, V> {
  in_flight: InFlight<K, V>,
  // `None` disables deduplication.
  spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<K, V> fmt::Debug for DuplicateTaskCatcher<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DuplicateTaskCatcher")
      .field("enabled", &self.spawner.is_some())
      .field("in_flight", &self.in_flight.lock().len())
      .finish()
  }
}

impl<K, V> DuplicateTaskCatcher<K, V>
where
  K: Eq + Hash + Clone + Send + 'static,
  V: Clone + Send + 'static,
{
  /// Creates a coordinator that runs shared fetches on `spawner`.
  pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::default())),
      spawner: Some(spawner),
    }
  }

  /// Creates a coordinator that calls the fetch function on every request.
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

  /// Returns the value for `key` and whether it came from a fetch another
  /// caller had already started.
  ///
  /// Every caller attached to the same fetch observes the same outcome,
  /// including the same error.
  pub async fn execute<F, Fut>(&self, key: K, fetch: F) -> Result<(V, bool), SharedError>
  where
    F: FnOnce(&K) -> Fut,
    Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
  {
    let spawner = match &self.spawner {
      Some(spawner) => spawner,
      None => {
        let future = start_guarded(|| fetch(&key))?;
        return run_guarded(future).await.map(|value| (value, false));
      }
    };

    let (load, is_leader) = {
      let mut in_flight = self.in_flight.lock();
      match in_flight.get(&key) {
        Some(existing) => (existing.clone(), false),
        None => {
          let load = Arc::new(LoadFuture::new());
          in_flight.insert(key.clone(), load.clone());
          (load, true)
        }
      }
    };

    if is_leader {
      match start_guarded(|| fetch(&key)) {
        Ok(future) => {
          let in_flight = self.in_flight.clone();
          let completion = load.clone();
          tracing::trace!("dispatching shared fetch");
          spawner.spawn(Box::pin(async move {
            let result = run_guarded(future).await;
            in_flight.lock().remove(&key);
            completion.complete(result);
          }));
        }
        Err(err) => {
          self.in_flight.lock().remove(&key);
          load.complete(Err(err));
        }
      }
    }

    let result = (&*load).await;
    result.map(|value| (value, !is_leader))
  }
}
