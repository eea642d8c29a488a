use super::batch::{split_batches, BatchBehaviour};
use super::events::{ExceptionEvent, FetchResult, FetchedKey, GetResult, KeyResult, Observers, Outcome};
use crate::error::{BoxError, CacheError, FetchError, GetError, SharedError};
use crate::key::{Key, KeySerializer};
use crate::registry::FunctionStats;
use crate::tier::policy::{SkipGet, SkipSet};
use crate::tier::{Cache, CacheHit};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::join_all;
use parking_lot::Mutex;

/// Computes a time-to-live from the key and the value being cached.
pub type TimeToLiveFactory<K, V> = Arc<dyn Fn(&K, &V) -> Duration + Send + Sync>;

/// Produces a value for a key, used for defaults and for filling missing keys.
pub(crate) type ValueFactory<K, V> = Arc<dyn Fn(&K) -> V + Send + Sync>;

/// Receives a write-back failure from the task that ran a fetch, for the
/// caller that started it.
pub(crate) type WriteBackSlot = Arc<Mutex<Option<GetError>>>;

pub(crate) enum TimeToLive<K, V> {
  Fixed(Duration),
  Factory(TimeToLiveFactory<K, V>),
}

/// The get → fetch → set pipeline shared by every function cache flavour.
pub(crate) struct FunctionCore<K, V> {
  pub(crate) name: Arc<str>,
  pub(crate) cache: Option<Arc<dyn Cache<K, V>>>,
  pub(crate) time_to_live: Option<TimeToLive<K, V>>,
  pub(crate) key_serializer: KeySerializer<K>,
  pub(crate) skip_get: Option<SkipGet<K>>,
  pub(crate) skip_set: Option<SkipSet<K, V>>,
  pub(crate) default_value: Option<ValueFactory<K, V>>,
  pub(crate) fill_missing: Option<ValueFactory<K, V>>,
  pub(crate) max_fetch_batch_size: Option<usize>,
  pub(crate) batch_behaviour: BatchBehaviour,
  pub(crate) observers: Observers<K, V>,
  pub(crate) stats: Arc<FunctionStats>,
}

/// Wraps a batch fetch so every requested key missing from its result is
/// filled in by `fill`, caching "known absent" instead of fetching again.
pub(crate) fn fill_missing_keys<K, V, Fut>(
  fetch: Fut,
  requested: Vec<K>,
  fill: Option<ValueFactory<K, V>>,
) -> impl Future<Output = Result<HashMap<K, V>, BoxError>> + Send + 'static
where
  K: Eq + Hash + Send + 'static,
  V: Send + 'static,
  Fut: Future<Output = Result<HashMap<K, V>, BoxError>> + Send + 'static,
{
  async move {
    let mut fetched = fetch.await?;
    if let Some(fill) = fill {
      for key in requested {
        if !fetched.contains_key(&key) {
          let value = fill(&key);
          fetched.insert(key, value);
        }
      }
    }
    Ok(fetched)
  }
}

impl<K, V> FunctionCore<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  fn key(&self, key: K) -> Key<K> {
    Key::new(key, self.key_serializer.clone())
  }

  fn serialize(keys: &[Key<K>]) -> Vec<String> {
    keys.iter().map(|key| key.as_str().to_string()).collect()
  }

  fn skips_get(&self, key: &K) -> bool {
    self.skip_get.as_ref().map_or(false, |skip| skip(key))
  }

  fn skips_set(&self, key: &K, value: &V) -> bool {
    self.skip_set.as_ref().map_or(false, |skip| skip(key, value))
  }

  fn time_to_live_for(&self, key: &K, value: &V) -> Duration {
    match &self.time_to_live {
      Some(TimeToLive::Fixed(ttl)) => *ttl,
      Some(TimeToLive::Factory(factory)) => factory(key, value),
      None => Duration::ZERO,
    }
  }

  fn fetch_error(&self, keys: &[Key<K>], source: SharedError) -> GetError {
    GetError::Fetch(FetchError {
      function_name: self.name.clone(),
      keys: Self::serialize(keys),
      timestamp: SystemTime::now(),
      source,
    })
  }

  fn cache_error(&self, keys: &[Key<K>], source: CacheError) -> GetError {
    GetError::Cache {
      function_name: self.name.clone(),
      keys: Self::serialize(keys),
      timestamp: SystemTime::now(),
      source,
    }
  }

  fn report_exception(&self, error: &GetError, panics: &mut Option<String>) {
    self.stats.record_error();
    if !self.observers.on_exception.is_empty() {
      let event = ExceptionEvent {
        function_name: self.name.clone(),
        error: error.clone(),
        timestamp: SystemTime::now(),
      };
      self.observers.exception(&event, panics);
    }
  }

  /// Applies the error policy to `keys`: either a default value per key or the error.
  fn recover(&self, keys: &[Key<K>], error: GetError, panics: &mut Option<String>) -> Result<Vec<(K, V)>, GetError> {
    self.report_exception(&error, panics);
    match &self.default_value {
      Some(default) => Ok(
        keys
          .iter()
          .map(|key| (key.key().clone(), default(key.key())))
          .collect(),
      ),
      None => Err(error),
    }
  }

  async fn lookup(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, CacheHit<V>)>, CacheError> {
    let cache = match &self.cache {
      Some(cache) => cache,
      None => return Ok(Vec::new()),
    };
    let lookup: Vec<Key<K>> = keys
      .iter()
      .filter(|key| !self.skips_get(key.key()))
      .cloned()
      .collect();

    match lookup.len() {
      0 => Ok(Vec::new()),
      1 => Ok(
        cache
          .get(&lookup[0])
          .await?
          .map(|hit| (lookup[0].clone(), hit))
          .into_iter()
          .collect(),
      ),
      _ => cache.get_many(&lookup).await,
    }
  }

  /// Wraps a fetch so the task running it also writes its values to the
  /// cache, before any waiter is released.
  ///
  /// The values are stored even when the caller that started the fetch has
  /// gone away. A write failure is logged and left in `slot`.
  pub(crate) fn store_fetched<T, Fut, E>(
    self: &Arc<Self>,
    fetch: Fut,
    slot: WriteBackSlot,
    entries: E,
  ) -> impl Future<Output = Result<T, BoxError>> + Send + 'static
  where
    T: Send + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    E: FnOnce(&T) -> Vec<(K, V)> + Send + 'static,
  {
    let core = self.clone();
    async move {
      let fetched = fetch.await?;
      let items = entries(&fetched)
        .into_iter()
        .map(|(key, value)| (core.key(key), value))
        .collect();
      if let Err(err) = core.write_back(items).await {
        tracing::warn!(function = %core.name, error = %err, "storing fetched values failed");
        *slot.lock() = Some(err);
      }
      Ok(fetched)
    }
  }

  /// Writes freshly fetched values to the cache, grouped by time-to-live.
  async fn write_back(&self, items: Vec<(Key<K>, V)>) -> Result<(), GetError> {
    let cache = match &self.cache {
      Some(cache) if !items.is_empty() => cache,
      _ => return Ok(()),
    };

    let mut by_ttl: HashMap<Duration, Vec<(Key<K>, V)>> = HashMap::new();
    for (key, value) in items {
      if self.skips_set(key.key(), &value) {
        continue;
      }
      let ttl = self.time_to_live_for(key.key(), &value);
      if !ttl.is_zero() {
        by_ttl.entry(ttl).or_default().push((key, value));
      }
    }

    for (ttl, mut batch) in by_ttl {
      let keys: Vec<Key<K>> = batch.iter().map(|(key, _)| key.clone()).collect();
      let result = if batch.len() == 1 {
        match batch.pop() {
          Some((key, value)) => cache.set(&key, value, ttl).await,
          None => Ok(()),
        }
      } else {
        cache.set_many(batch, ttl).await
      };
      result.map_err(|err| self.cache_error(&keys, err))?;
    }
    Ok(())
  }

  fn emit_result(&self, results: Vec<KeyResult<K, V>>, success: bool, start: SystemTime, timer: Instant, panics: &mut Option<String>) {
    if self.observers.wants_results() {
      let event = GetResult {
        function_name: self.name.clone(),
        results,
        success,
        start,
        duration: timer.elapsed(),
      };
      self.observers.result(&event, panics);
    }
  }

  /// Resolves a single key.
  ///
  /// `fetch` receives the key and a slot for write-back failures, and
  /// resolves to the value plus its duplicate flag.
  pub(crate) async fn get_one<F, Fut>(&self, key: K, fetch: F) -> Result<V, GetError>
  where
    F: FnOnce(K, WriteBackSlot) -> Fut,
    Fut: Future<Output = Result<(V, bool), SharedError>>,
  {
    let _pending = self.stats.pending();
    let start = SystemTime::now();
    let timer = Instant::now();
    let mut panics = None;
    let mut results = Vec::new();

    let key = self.key(key);
    let outcome = self.resolve_one(&key, fetch, &mut results, &mut panics).await;

    let success = matches!(outcome, Ok((_, false)));
    self.emit_result(results, success, start, timer, &mut panics);
    let (value, defaulted) = outcome?;
    if !defaulted {
      self.observers.escalate(&self.name, panics)?;
    }
    Ok(value)
  }

  // Returns the value and whether it is a substituted default.
  async fn resolve_one<F, Fut>(
    &self,
    key: &Key<K>,
    fetch: F,
    results: &mut Vec<KeyResult<K, V>>,
    panics: &mut Option<String>,
  ) -> Result<(V, bool), GetError>
  where
    F: FnOnce(K, WriteBackSlot) -> Fut,
    Fut: Future<Output = Result<(V, bool), SharedError>>,
  {
    let keys = std::slice::from_ref(key);

    match self.lookup(keys).await {
      Ok(mut hits) => {
        if let Some((_, hit)) = hits.pop() {
          self.stats.record_cache_hits(1);
          results.push(KeyResult {
            key: key.key().clone(),
            value: hit.value.clone(),
            outcome: Outcome::FromCache,
            tier: Some(hit.tier),
            duplicate: false,
          });
          return Ok((hit.value, false));
        }
      }
      Err(err) => {
        let err = self.cache_error(keys, err);
        return self.recover_one(key, err, results, panics);
      }
    }

    let fetch_start = SystemTime::now();
    let fetch_timer = Instant::now();
    self.stats.record_fetch();
    let slot = WriteBackSlot::default();
    let fetched = fetch(key.key().clone(), slot.clone()).await;

    if self.observers.wants_fetches() {
      let event = FetchResult {
        function_name: self.name.clone(),
        requested: vec![key.key().clone()],
        results: match &fetched {
          Ok((value, duplicate)) => vec![FetchedKey {
            key: key.key().clone(),
            value: value.clone(),
            duplicate: *duplicate,
          }],
          Err(_) => Vec::new(),
        },
        success: fetched.is_ok(),
        start: fetch_start,
        duration: fetch_timer.elapsed(),
      };
      self.observers.fetch(&event, panics);
    }

    match fetched {
      Ok((value, duplicate)) => {
        results.push(KeyResult {
          key: key.key().clone(),
          value: value.clone(),
          outcome: Outcome::Fetch,
          tier: None,
          duplicate,
        });
        // Only the caller that started the fetch sees its write failure.
        let write_error = slot.lock().take();
        if let Some(err) = write_error {
          self.report_exception(&err, panics);
          if self.default_value.is_none() {
            return Err(err);
          }
        }
        Ok((value, false))
      }
      Err(source) => {
        let err = self.fetch_error(keys, source);
        self.recover_one(key, err, results, panics)
      }
    }
  }

  fn recover_one(
    &self,
    key: &Key<K>,
    err: GetError,
    results: &mut Vec<KeyResult<K, V>>,
    panics: &mut Option<String>,
  ) -> Result<(V, bool), GetError> {
    self.report_exception(&err, panics);
    let default = match &self.default_value {
      Some(default) => default,
      None => return Err(err),
    };
    let value = default(key.key());
    results.push(KeyResult {
      key: key.key().clone(),
      value: value.clone(),
      outcome: Outcome::Error,
      tier: None,
      duplicate: false,
    });
    Ok((value, true))
  }

  /// Resolves many keys.
  ///
  /// `fetch_batch` is called once per sub-batch of keys the cache did not
  /// hold, with a slot for write-back failures, and resolves to a value plus
  /// duplicate flag per key it produced. Sub-batches are fetched concurrently.
  pub(crate) async fn get_many<B, Fut>(&self, keys: &[K], mut fetch_batch: B) -> Result<HashMap<K, V>, GetError>
  where
    B: FnMut(Vec<K>, WriteBackSlot) -> Fut,
    Fut: Future<Output = Result<HashMap<K, (V, bool)>, SharedError>>,
  {
    if keys.is_empty() {
      return Ok(HashMap::new());
    }

    let _pending = self.stats.pending();
    let start = SystemTime::now();
    let timer = Instant::now();
    let mut panics = None;
    let mut results = Vec::new();
    let mut values: HashMap<K, V> = HashMap::with_capacity(keys.len());

    let keys: Vec<Key<K>> = {
      let mut seen = HashSet::with_capacity(keys.len());
      keys
        .iter()
        .filter(|key| seen.insert(*key))
        .map(|key| self.key(key.clone()))
        .collect()
    };

    let outcome = self
      .resolve_many(&keys, &mut fetch_batch, &mut values, &mut results, &mut panics)
      .await;

    let failed = results.iter().any(|result| result.outcome == Outcome::Error);
    self.emit_result(results, outcome.is_ok() && !failed, start, timer, &mut panics);
    outcome?;
    if !failed {
      self.observers.escalate(&self.name, panics)?;
    }
    Ok(values)
  }

  async fn resolve_many<B, Fut>(
    &self,
    keys: &[Key<K>],
    fetch_batch: &mut B,
    values: &mut HashMap<K, V>,
    results: &mut Vec<KeyResult<K, V>>,
    panics: &mut Option<String>,
  ) -> Result<(), GetError>
  where
    B: FnMut(Vec<K>, WriteBackSlot) -> Fut,
    Fut: Future<Output = Result<HashMap<K, (V, bool)>, SharedError>>,
  {
    let hits = match self.lookup(keys).await {
      Ok(hits) => hits,
      Err(err) => {
        let err = self.cache_error(keys, err);
        let defaults = self.recover(keys, err, panics)?;
        for (key, value) in defaults {
          push_result(results, values, key, value, Outcome::Error, None, false);
        }
        return Ok(());
      }
    };

    self.stats.record_cache_hits(hits.len() as u64);
    for (key, hit) in hits {
      push_result(results, values, key.into_inner(), hit.value, Outcome::FromCache, Some(hit.tier), false);
    }

    let missing: Vec<Key<K>> = keys
      .iter()
      .filter(|key| !values.contains_key(key.key()))
      .cloned()
      .collect();
    let batches = split_batches(missing, self.max_fetch_batch_size, self.batch_behaviour);
    if batches.is_empty() {
      return Ok(());
    }

    let fetches = batches.into_iter().map(|batch| {
      let requested: Vec<K> = batch.iter().map(|key| key.key().clone()).collect();
      let slot = WriteBackSlot::default();
      let future = fetch_batch(requested, slot.clone());
      async move {
        let start = SystemTime::now();
        let timer = Instant::now();
        let result = future.await;
        (batch, result, slot, start, timer.elapsed())
      }
    });
    let outcomes = join_all(fetches).await;

    let mut first_error = None;
    for (batch, result, slot, fetch_start, fetch_duration) in outcomes {
      self.stats.record_fetch();

      if self.observers.wants_fetches() {
        let event = FetchResult {
          function_name: self.name.clone(),
          requested: batch.iter().map(|key| key.key().clone()).collect(),
          results: match &result {
            Ok(fetched) => fetched
              .iter()
              .map(|(key, (value, duplicate))| FetchedKey {
                key: key.clone(),
                value: value.clone(),
                duplicate: *duplicate,
              })
              .collect(),
            Err(_) => Vec::new(),
          },
          success: result.is_ok(),
          start: fetch_start,
          duration: fetch_duration,
        };
        self.observers.fetch(&event, panics);
      }

      match result {
        Ok(mut fetched) => {
          for key in batch {
            if let Some((value, duplicate)) = fetched.remove(key.key()) {
              push_result(results, values, key.into_inner(), value, Outcome::Fetch, None, duplicate);
            }
          }
        }
        Err(source) => {
          let err = self.fetch_error(&batch, source);
          match self.recover(&batch, err, panics) {
            Ok(defaults) => {
              for (key, value) in defaults {
                push_result(results, values, key, value, Outcome::Error, None, false);
              }
            }
            Err(err) => {
              first_error.get_or_insert(err);
            }
          }
        }
      }

      let write_error = slot.lock().take();
      if let Some(err) = write_error {
        self.report_exception(&err, panics);
        if self.default_value.is_none() {
          first_error.get_or_insert(err);
        }
      }
    }

    match first_error {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

fn push_result<K: Eq + Hash + Clone, V: Clone>(
  results: &mut Vec<KeyResult<K, V>>,
  values: &mut HashMap<K, V>,
  key: K,
  value: V,
  outcome: Outcome,
  tier: Option<&'static str>,
  duplicate: bool,
) {
  results.push(KeyResult {
    key: key.clone(),
    value: value.clone(),
    outcome,
    tier,
    duplicate,
  });
  values.insert(key, value);
}
