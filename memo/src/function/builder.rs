use super::batch::BatchBehaviour;
use super::core::{FunctionCore, TimeToLive, TimeToLiveFactory, ValueFactory};
use super::enumerable::EnumerableKeyFunctionCache;
use super::events::{ExceptionEvent, FetchResult, GetResult, ObserverErrorPolicy, Observers};
use super::multi_param::MultiParamEnumerableKeyFunctionCache;
use super::single::SingleKeyFunctionCache;
use crate::config::FunctionCacheSettings;
use crate::error::{BoxError, BuildError};
use crate::flight::{DuplicateTaskCatcher, DuplicateTaskCatcherCombined, DuplicateTaskCatcherMulti};
use crate::key::{debug_serializer, KeySerializer};
use crate::registry::{FunctionStats, Registry};
use crate::runtime::{self, TaskSpawner};
use crate::tier::policy::{SkipGet, SkipSet};
use crate::tier::{Cache, DistributedCache, DistributedTier, LocalCache, LocalTier, TierPolicy, TwoTierCache};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

const DEFAULT_NAME: &str = "function_cache";

/// A builder for the function caches.
///
/// Configure the cache tiers, policies and observers, then finish with one of
/// `build_single_key`, `build_enumerable` or, for `(outer, inner)` keys,
/// `build_multi_param`.
pub struct FunctionCacheBuilder<K, V> {
  name: Option<String>,
  time_to_live: Option<Duration>,
  time_to_live_factory: Option<TimeToLiveFactory<K, V>>,
  local_cache: Option<Arc<dyn LocalCache<K, V>>>,
  distributed_cache: Option<Arc<dyn DistributedCache<K, V>>>,
  key_serializer: Option<KeySerializer<K>>,
  skip_cache_get: Option<SkipGet<K>>,
  skip_cache_set: Option<SkipSet<K, V>>,
  skip_local_get: Option<SkipGet<K>>,
  skip_local_set: Option<SkipSet<K, V>>,
  skip_distributed_get: Option<SkipGet<K>>,
  skip_distributed_set: Option<SkipSet<K, V>>,
  default_value: Option<ValueFactory<K, V>>,
  fill_missing: Option<ValueFactory<K, V>>,
  max_fetch_batch_size: Option<usize>,
  batch_behaviour: BatchBehaviour,
  duplicate_task_catching: bool,
  observers: Observers<K, V>,
  registry: Option<Arc<Registry>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
  swallow_distributed_cache_errors: bool,
}

impl<K, V> fmt::Debug for FunctionCacheBuilder<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FunctionCacheBuilder")
      .field("name", &self.name)
      .field("time_to_live", &self.time_to_live)
      .field("has_local_cache", &self.local_cache.is_some())
      .field("has_distributed_cache", &self.distributed_cache.is_some())
      .field("max_fetch_batch_size", &self.max_fetch_batch_size)
      .field("batch_behaviour", &self.batch_behaviour)
      .field("duplicate_task_catching", &self.duplicate_task_catching)
      .field("observers", &self.observers)
      .finish_non_exhaustive()
  }
}

impl<K, V> Default for FunctionCacheBuilder<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

// --- General Configuration Methods ---
impl<K, V> FunctionCacheBuilder<K, V> {
  pub fn new() -> Self {
    Self {
      name: None,
      time_to_live: None,
      time_to_live_factory: None,
      local_cache: None,
      distributed_cache: None,
      key_serializer: None,
      skip_cache_get: None,
      skip_cache_set: None,
      skip_local_get: None,
      skip_local_set: None,
      skip_distributed_get: None,
      skip_distributed_set: None,
      default_value: None,
      fill_missing: None,
      max_fetch_batch_size: None,
      batch_behaviour: BatchBehaviour::default(),
      duplicate_task_catching: true,
      observers: Observers::default(),
      registry: None,
      spawner: None,
      swallow_distributed_cache_errors: false,
    }
  }

  /// Applies shared defaults. Options set afterwards override them.
  pub fn settings(mut self, settings: &FunctionCacheSettings) -> Self {
    if let Some(ttl) = settings.time_to_live {
      self.time_to_live = Some(ttl);
    }
    if let Some(size) = settings.max_fetch_batch_size {
      self.max_fetch_batch_size = Some(size);
    }
    self.batch_behaviour = settings.batch_behaviour;
    self.duplicate_task_catching = settings.duplicate_task_catcher_enabled;
    self.swallow_distributed_cache_errors = settings.swallow_distributed_cache_errors;
    self
  }

  /// The name reported in errors, events and the registry.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Sets one time-to-live for every cached value.
  pub fn time_to_live(mut self, ttl: Duration) -> Self {
    self.time_to_live = Some(ttl);
    self
  }

  /// Computes the time-to-live from each key and value. Takes precedence over
  /// `time_to_live`. A zero duration means the value is not cached.
  pub fn time_to_live_factory<F>(mut self, factory: F) -> Self
  where
    F: Fn(&K, &V) -> Duration + Send + Sync + 'static,
  {
    self.time_to_live_factory = Some(Arc::new(factory));
    self
  }

  pub fn local_cache<C>(mut self, cache: C) -> Self
  where
    C: LocalCache<K, V> + 'static,
  {
    self.local_cache = Some(Arc::new(cache));
    self
  }

  pub fn distributed_cache<C>(mut self, cache: C) -> Self
  where
    C: DistributedCache<K, V> + 'static,
  {
    self.distributed_cache = Some(Arc::new(cache));
    self
  }

  /// Sets how keys are rendered for distributed caches and error reports.
  /// Defaults to the key's `Debug` form.
  pub fn key_serializer<F>(mut self, serializer: F) -> Self
  where
    F: Fn(&K) -> String + Send + Sync + 'static,
  {
    self.key_serializer = Some(Arc::new(serializer));
    self
  }

  /// Keys matching `predicate` are never read from any cache tier.
  pub fn skip_cache_get_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K) -> bool + Send + Sync + 'static,
  {
    self.skip_cache_get = Some(Arc::new(predicate));
    self
  }

  /// Pairs matching `predicate` are never written to any cache tier.
  pub fn skip_cache_set_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    self.skip_cache_set = Some(Arc::new(predicate));
    self
  }

  pub fn skip_local_cache_get_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K) -> bool + Send + Sync + 'static,
  {
    self.skip_local_get = Some(Arc::new(predicate));
    self
  }

  pub fn skip_local_cache_set_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    self.skip_local_set = Some(Arc::new(predicate));
    self
  }

  pub fn skip_distributed_cache_get_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K) -> bool + Send + Sync + 'static,
  {
    self.skip_distributed_get = Some(Arc::new(predicate));
    self
  }

  pub fn skip_distributed_cache_set_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    self.skip_distributed_set = Some(Arc::new(predicate));
    self
  }

  /// On failure, return `default` for the affected keys instead of an error.
  /// Defaults are reported with `Outcome::Error` and never cached.
  pub fn continue_on_exception(mut self, default: V) -> Self
  where
    V: Clone + Send + Sync + 'static,
  {
    self.default_value = Some(Arc::new(move |_: &K| default.clone()));
    self
  }

  /// Like `continue_on_exception`, with a default computed per key.
  pub fn on_exception_default_factory<F>(mut self, factory: F) -> Self
  where
    F: Fn(&K) -> V + Send + Sync + 'static,
  {
    self.default_value = Some(Arc::new(factory));
    self
  }

  /// Fetches of more keys than this are split into concurrent sub-batches.
  pub fn max_fetch_batch_size(mut self, size: usize) -> Self {
    self.max_fetch_batch_size = Some(size);
    self
  }

  pub fn batch_behaviour(mut self, behaviour: BatchBehaviour) -> Self {
    self.batch_behaviour = behaviour;
    self
  }

  /// Calls the fetch function for every request, even when an identical
  /// fetch is already in flight.
  pub fn disable_duplicate_task_catching(mut self) -> Self {
    self.duplicate_task_catching = false;
    self
  }

  /// Caches `value` for every requested key a batch fetch leaves out.
  pub fn fill_missing_keys(mut self, value: V) -> Self
  where
    V: Clone + Send + Sync + 'static,
  {
    self.fill_missing = Some(Arc::new(move |_: &K| value.clone()));
    self
  }

  pub fn fill_missing_keys_with<F>(mut self, factory: F) -> Self
  where
    F: Fn(&K) -> V + Send + Sync + 'static,
  {
    self.fill_missing = Some(Arc::new(factory));
    self
  }

  /// Adds an observer called once per `get`/`get_many` call.
  pub fn on_result<F>(mut self, observer: F) -> Self
  where
    F: Fn(&GetResult<K, V>) + Send + Sync + 'static,
  {
    self.observers.on_result.push(Arc::new(observer));
    self
  }

  /// Adds an observer called once per underlying fetch.
  pub fn on_fetch<F>(mut self, observer: F) -> Self
  where
    F: Fn(&FetchResult<K, V>) + Send + Sync + 'static,
  {
    self.observers.on_fetch.push(Arc::new(observer));
    self
  }

  /// Adds an observer called once per failure.
  pub fn on_exception<F>(mut self, observer: F) -> Self
  where
    F: Fn(&ExceptionEvent) + Send + Sync + 'static,
  {
    self.observers.on_exception.push(Arc::new(observer));
    self
  }

  pub fn observer_error_policy(mut self, policy: ObserverErrorPolicy) -> Self {
    self.observers.policy = policy;
    self
  }

  pub fn registry(mut self, registry: Arc<Registry>) -> Self {
    self.registry = Some(registry);
    self
  }

  /// Sets the spawner shared fetches run on. Without one, the current Tokio
  /// runtime is used.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// When set, distributed read failures degrade to misses.
  pub fn swallow_distributed_cache_errors(mut self, swallow: bool) -> Self {
    self.swallow_distributed_cache_errors = swallow;
    self
  }
}

// --- Build Methods ---
impl<K, V> FunctionCacheBuilder<K, V>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.max_fetch_batch_size == Some(0) {
      return Err(BuildError::ZeroBatchSize);
    }
    let has_cache = self.local_cache.is_some() || self.distributed_cache.is_some();
    if has_cache && self.time_to_live.is_none() && self.time_to_live_factory.is_none() {
      return Err(BuildError::MissingTimeToLive);
    }
    Ok(())
  }

  /// The spawner for the coordinator, or `None` when deduplication is off.
  fn resolve_spawner(&mut self) -> Result<Option<Arc<dyn TaskSpawner>>, BuildError> {
    if !self.duplicate_task_catching {
      return Ok(None);
    }
    match self.spawner.take() {
      Some(spawner) => Ok(Some(spawner)),
      None => runtime::default_spawner().map(Some),
    }
  }

  fn build_tiers(&mut self) -> Option<Arc<dyn Cache<K, V>>> {
    let local_policy = TierPolicy::with_predicates(self.skip_local_get.take(), self.skip_local_set.take());
    let distributed_policy =
      TierPolicy::with_predicates(self.skip_distributed_get.take(), self.skip_distributed_set.take());
    let swallow = self.swallow_distributed_cache_errors;

    match (self.local_cache.take(), self.distributed_cache.take()) {
      (Some(local), Some(distributed)) => Some(Arc::new(
        TwoTierCache::new(local, distributed)
          .local_policy(local_policy)
          .distributed_policy(distributed_policy)
          .swallow_distributed_errors(swallow),
      )),
      (Some(local), None) => Some(Arc::new(LocalTier::new(local).with_policy(local_policy))),
      (None, Some(distributed)) => Some(Arc::new(
        DistributedTier::new(distributed)
          .with_policy(distributed_policy)
          .swallow_errors(swallow),
      )),
      (None, None) => None,
    }
  }

  /// Central logic to construct the pipeline shared by every flavour.
  fn build_core(&mut self) -> Result<(Arc<FunctionCore<K, V>>, Option<Arc<dyn TaskSpawner>>), BuildError> {
    self.validate()?;
    let spawner = self.resolve_spawner()?;

    let name: Arc<str> = Arc::from(self.name.take().unwrap_or_else(|| DEFAULT_NAME.to_string()));
    let stats = match &self.registry {
      Some(registry) => registry.register(&name),
      None => Arc::new(FunctionStats::default()),
    };
    let time_to_live = match (self.time_to_live_factory.take(), self.time_to_live) {
      (Some(factory), _) => Some(TimeToLive::Factory(factory)),
      (None, Some(ttl)) => Some(TimeToLive::Fixed(ttl)),
      (None, None) => None,
    };

    let core = FunctionCore {
      cache: self.build_tiers(),
      name,
      time_to_live,
      key_serializer: self.key_serializer.take().unwrap_or_else(debug_serializer),
      skip_get: self.skip_cache_get.take(),
      skip_set: self.skip_cache_set.take(),
      default_value: self.default_value.take(),
      fill_missing: self.fill_missing.take(),
      max_fetch_batch_size: self.max_fetch_batch_size,
      batch_behaviour: self.batch_behaviour,
      observers: std::mem::take(&mut self.observers),
      stats,
    };
    Ok((Arc::new(core), spawner))
  }

  /// Builds a cache for a function of one parameter set `P`.
  ///
  /// `key_selector` maps the parameters to the cache key; `fetch` computes the
  /// value from the parameters on a miss.
  pub fn build_single_key<P, S, F, Fut>(
    mut self,
    key_selector: S,
    fetch: F,
  ) -> Result<SingleKeyFunctionCache<P, K, V>, BuildError>
  where
    P: Send + 'static,
    S: Fn(&P) -> K + Send + Sync + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
  {
    let (core, spawner) = self.build_core()?;
    let catcher = match spawner {
      Some(spawner) => DuplicateTaskCatcher::new(spawner),
      None => DuplicateTaskCatcher::disabled(),
    };
    Ok(SingleKeyFunctionCache {
      core,
      key_selector: Arc::new(key_selector),
      fetch: Arc::new(move |params: P| fetch(params).boxed()),
      catcher: Arc::new(catcher),
    })
  }

  /// Builds a cache for a function that fetches many keys at once.
  ///
  /// Keys missing from the map `fetch_many` returns are treated as having no
  /// value, unless `fill_missing_keys` is configured.
  pub fn build_enumerable<F, Fut>(mut self, fetch_many: F) -> Result<EnumerableKeyFunctionCache<K, V>, BuildError>
  where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<K, V>, BoxError>> + Send + 'static,
  {
    let (core, spawner) = self.build_core()?;
    let catcher = match spawner {
      Some(spawner) => DuplicateTaskCatcherMulti::new(spawner),
      None => DuplicateTaskCatcherMulti::disabled(),
    };
    Ok(EnumerableKeyFunctionCache {
      core,
      fetch: Arc::new(move |keys: Vec<K>| fetch_many(keys).boxed()),
      catcher: Arc::new(catcher),
    })
  }
}

impl<KO, KI, V> FunctionCacheBuilder<(KO, KI), V>
where
  KO: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  KI: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  /// Builds a cache for a function of an outer key and many inner keys.
  pub fn build_multi_param<F, Fut>(
    mut self,
    fetch: F,
  ) -> Result<MultiParamEnumerableKeyFunctionCache<KO, KI, V>, BuildError>
  where
    F: Fn(KO, Vec<KI>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<KI, V>, BoxError>> + Send + 'static,
  {
    let (core, spawner) = self.build_core()?;
    let catcher = match spawner {
      Some(spawner) => DuplicateTaskCatcherCombined::new(spawner),
      None => DuplicateTaskCatcherCombined::disabled(),
    };
    Ok(MultiParamEnumerableKeyFunctionCache {
      core,
      fetch: Arc::new(move |outer: KO, inner: Vec<KI>| fetch(outer, inner).boxed()),
      catcher: Arc::new(catcher),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_batch_size_is_rejected() {
    let err = FunctionCacheBuilder::<u32, u32>::new()
      .max_fetch_batch_size(0)
      .disable_duplicate_task_catching()
      .build_enumerable(|_keys: Vec<u32>| async { Ok::<HashMap<u32, u32>, BoxError>(HashMap::new()) })
      .unwrap_err();
    assert_eq!(err, BuildError::ZeroBatchSize);
  }
}
