mod common;

use common::build_manual_sweep_store;
use fibre_memo::{
  BatchBehaviour, BoxError, BuildError, FunctionCacheBuilder, FunctionCacheSettings, MemoryCacheBuilder,
};
use std::collections::HashMap;
use std::time::Duration;

#[test]
fn test_memory_store_rejects_zero_settings() {
  let err = MemoryCacheBuilder::<i32, i32>::new().shards(0).build().unwrap_err();
  assert_eq!(err, BuildError::ZeroShards);

  let err = MemoryCacheBuilder::<i32, i32>::new()
    .expiry_queue_capacity(0)
    .build()
    .unwrap_err();
  assert_eq!(err, BuildError::ZeroQueueCapacity);
}

#[test]
fn test_deduplication_outside_runtime_requires_spawner() {
  // No Tokio runtime is running on a plain test thread.
  let err = FunctionCacheBuilder::<u32, u32>::new()
    .build_enumerable(|_keys: Vec<u32>| async { Ok::<HashMap<u32, u32>, BoxError>(HashMap::new()) })
    .unwrap_err();
  assert_eq!(err, BuildError::SpawnerRequired);

  // Without deduplication no spawner is needed.
  assert!(FunctionCacheBuilder::<u32, u32>::new()
    .disable_duplicate_task_catching()
    .build_enumerable(|_keys: Vec<u32>| async { Ok::<HashMap<u32, u32>, BoxError>(HashMap::new()) })
    .is_ok());
}

#[test]
fn test_cache_without_ttl_is_rejected() {
  let err = FunctionCacheBuilder::<u32, u32>::new()
    .local_cache(build_manual_sweep_store::<u32, u32>())
    .disable_duplicate_task_catching()
    .build_single_key(|key: &u32| *key, |key: u32| async move { Ok::<_, BoxError>(key) })
    .unwrap_err();
  assert_eq!(err, BuildError::MissingTimeToLive);
}

#[tokio::test]
async fn test_settings_apply_shared_defaults() {
  let settings = FunctionCacheSettings {
    time_to_live: Some(Duration::from_secs(60)),
    max_fetch_batch_size: Some(2),
    batch_behaviour: BatchBehaviour::FillEachBatchBeforeStartingNext,
    duplicate_task_catcher_enabled: false,
    swallow_distributed_cache_errors: false,
  };

  let store = build_manual_sweep_store::<u32, u32>();
  let batches = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
  let recorded = batches.clone();
  let cache = FunctionCacheBuilder::<u32, u32>::new()
    .settings(&settings)
    .local_cache(store.clone())
    .build_enumerable(move |keys: Vec<u32>| {
      recorded.lock().push(keys.len());
      async move { Ok::<_, BoxError>(keys.into_iter().map(|k| (k, k)).collect::<HashMap<_, _>>()) }
    })
    .unwrap();

  assert_eq!(cache.get_many(&[1, 2, 3]).await.unwrap().len(), 3);

  let mut sizes = batches.lock().clone();
  sizes.sort();
  assert_eq!(sizes, vec![1, 2]);
  // The TTL came from the settings.
  assert_eq!(store.try_get(&3).unwrap(), Some(3));
  assert_eq!(cache.in_flight_count(), 0);
}
