mod common;

use common::{build_manual_sweep_store, TestError};
use fibre_memo::{
  BoxError, FunctionCacheBuilder, GetError, GetResult, ObserverErrorPolicy, Outcome, Registry,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const TTL: Duration = Duration::from_secs(60);

fn counting_fetch(
  calls: Arc<AtomicUsize>,
  delay: Duration,
  value: i32,
) -> impl Fn(String) -> BoxFuture<'static, Result<i32, BoxError>> + Send + Sync + 'static {
  move |_key: String| {
    let calls = calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      sleep(delay).await;
      Ok::<_, BoxError>(value)
    }
    .boxed()
  }
}

#[tokio::test]
async fn test_concurrent_gets_share_one_fetch() {
  let calls = Arc::new(AtomicUsize::new(0));
  let events: Arc<Mutex<Vec<GetResult<String, i32>>>> = Arc::new(Mutex::new(Vec::new()));

  let recorded = events.clone();
  let cache = FunctionCacheBuilder::<String, i32>::new()
    .name("answer")
    .local_cache(build_manual_sweep_store::<String, i32>())
    .time_to_live(TTL)
    .on_result(move |result| recorded.lock().push(result.clone()))
    .build_single_key(|key: &String| key.clone(), counting_fetch(calls.clone(), Duration::from_millis(50), 42))
    .unwrap();

  let (a, b) = tokio::join!(cache.get("k".to_string()), cache.get("k".to_string()));

  assert_eq!(a.unwrap(), 42);
  assert_eq!(b.unwrap(), 42);
  assert_eq!(calls.load(Ordering::SeqCst), 1, "Fetch should run once");

  let events = events.lock();
  assert_eq!(events.len(), 2);
  let duplicates = events.iter().filter(|event| event.results[0].duplicate).count();
  assert_eq!(duplicates, 1, "Exactly one result should come from a joined fetch");
  assert!(events.iter().all(|event| event.success));
  assert!(events.iter().all(|event| event.results[0].outcome == Outcome::Fetch));
}

#[tokio::test]
async fn test_second_get_is_served_from_cache() {
  let calls = Arc::new(AtomicUsize::new(0));
  let tiers: Arc<Mutex<Vec<Option<&'static str>>>> = Arc::new(Mutex::new(Vec::new()));

  let recorded = tiers.clone();
  let cache = FunctionCacheBuilder::<String, i32>::new()
    .local_cache(build_manual_sweep_store::<String, i32>())
    .time_to_live(TTL)
    .on_result(move |result| recorded.lock().push(result.results[0].tier))
    .build_single_key(|key: &String| key.clone(), counting_fetch(calls.clone(), Duration::ZERO, 7))
    .unwrap();

  assert_eq!(cache.get("k".to_string()).await.unwrap(), 7);
  assert_eq!(cache.get("k".to_string()).await.unwrap(), 7);

  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(*tiers.lock(), vec![None, Some("local")]);

  let stats = cache.stats();
  assert_eq!(stats.fetches, 1);
  assert_eq!(stats.cache_hits, 1);
  assert_eq!(stats.pending_requests, 0);
}

#[tokio::test]
async fn test_abandoned_get_still_caches_the_shared_fetch() {
  let calls = Arc::new(AtomicUsize::new(0));
  let store = build_manual_sweep_store::<String, i32>();
  let cache = FunctionCacheBuilder::<String, i32>::new()
    .local_cache(store.clone())
    .time_to_live(TTL)
    .build_single_key(|key: &String| key.clone(), counting_fetch(calls.clone(), Duration::from_millis(100), 42))
    .unwrap();

  let abandoned = tokio::time::timeout(Duration::from_millis(20), cache.get("k".to_string())).await;
  assert!(abandoned.is_err());

  // Joins the fetch the abandoned caller started.
  assert_eq!(cache.get("k".to_string()).await.unwrap(), 42);
  assert_eq!(store.try_get(&"k".to_string()).unwrap(), Some(42));

  assert_eq!(cache.get("k".to_string()).await.unwrap(), 42);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(cache.stats().cache_hits, 1);
}

#[tokio::test]
async fn test_key_selector_maps_parameters_to_key() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();

  // The fetch sees the full parameters; the cache only keys on the user id.
  let cache = FunctionCacheBuilder::<u64, String>::new()
    .local_cache(build_manual_sweep_store::<u64, String>())
    .time_to_live(TTL)
    .build_single_key(
      |params: &(u64, &'static str)| params.0,
      move |(id, label): (u64, &'static str)| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, BoxError>(format!("{}:{}", label, id)) }
      },
    )
    .unwrap();

  assert_eq!(cache.get((1, "first")).await.unwrap(), "first:1");
  assert_eq!(cache.get((1, "second")).await.unwrap(), "first:1");
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_continue_on_exception_returns_default() {
  let store = build_manual_sweep_store::<String, i32>();
  let exceptions = Arc::new(AtomicUsize::new(0));
  let outcomes: Arc<Mutex<Vec<Outcome>>> = Arc::new(Mutex::new(Vec::new()));

  let seen = exceptions.clone();
  let recorded = outcomes.clone();
  let cache = FunctionCacheBuilder::<String, i32>::new()
    .name("flaky")
    .local_cache(store.clone())
    .time_to_live(TTL)
    .continue_on_exception(0)
    .on_exception(move |event| {
      assert_eq!(&*event.function_name, "flaky");
      seen.fetch_add(1, Ordering::SeqCst);
    })
    .on_result(move |result| recorded.lock().push(result.results[0].outcome))
    .build_single_key(
      |key: &String| key.clone(),
      |key: String| async move { Err::<i32, BoxError>(Box::new(TestError(format!("no value for {}", key)))) },
    )
    .unwrap();

  assert_eq!(cache.get("x".to_string()).await.unwrap(), 0);
  assert_eq!(exceptions.load(Ordering::SeqCst), 1);
  assert_eq!(*outcomes.lock(), vec![Outcome::Error]);
  // The default is never cached.
  assert_eq!(store.try_get(&"x".to_string()).unwrap(), None);
  assert_eq!(cache.stats().errors, 1);
}

#[tokio::test]
async fn test_fetch_error_propagates_without_default() {
  let cache = FunctionCacheBuilder::<String, i32>::new()
    .name("strict")
    .key_serializer(|key: &String| key.clone())
    .disable_duplicate_task_catching()
    .build_single_key(
      |key: &String| key.clone(),
      |_key: String| async { Err::<i32, BoxError>(Box::new(TestError("boom".into()))) },
    )
    .unwrap();

  let err = cache.get("x".to_string()).await.unwrap_err();
  match &err {
    GetError::Fetch(fetch) => {
      assert_eq!(&*fetch.function_name, "strict");
      assert_eq!(fetch.keys, vec!["x".to_string()]);
      assert_eq!(fetch.source.to_string(), "boom");
    }
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(err.function_name(), Some("strict"));
}

#[tokio::test]
async fn test_skip_predicates() {
  let calls = Arc::new(AtomicUsize::new(0));
  let store = build_manual_sweep_store::<String, i32>();
  let counter = calls.clone();

  let cache = FunctionCacheBuilder::<String, i32>::new()
    .local_cache(store.clone())
    .time_to_live(TTL)
    .skip_cache_get_when(|key: &String| key.starts_with("fresh:"))
    .skip_cache_set_when(|_key: &String, value: &i32| *value < 0)
    .build_single_key(|key: &String| key.clone(), move |key: String| {
      counter.fetch_add(1, Ordering::SeqCst);
      async move { Ok::<_, BoxError>(if key.starts_with("neg") { -1 } else { 1 }) }
    })
    .unwrap();

  // Negative values are never written, so they are fetched every time.
  cache.get("neg".to_string()).await.unwrap();
  cache.get("neg".to_string()).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 2);
  assert_eq!(store.try_get(&"neg".to_string()).unwrap(), None);

  // Keys that skip reads are still written.
  cache.get("fresh:a".to_string()).await.unwrap();
  cache.get("fresh:a".to_string()).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 4);
  assert_eq!(store.try_get(&"fresh:a".to_string()).unwrap(), Some(1));
}

#[tokio::test]
async fn test_zero_ttl_from_factory_is_not_cached() {
  let store = build_manual_sweep_store::<String, i32>();
  let cache = FunctionCacheBuilder::<String, i32>::new()
    .local_cache(store.clone())
    .time_to_live_factory(|key: &String, _value: &i32| {
      if key == "volatile" {
        Duration::ZERO
      } else {
        TTL
      }
    })
    .build_single_key(|key: &String| key.clone(), |_key: String| async { Ok::<_, BoxError>(5) })
    .unwrap();

  cache.get("volatile".to_string()).await.unwrap();
  cache.get("stable".to_string()).await.unwrap();

  assert_eq!(store.try_get(&"volatile".to_string()).unwrap(), None);
  let (_, left) = store.try_get_with_ttl(&"stable".to_string()).unwrap().unwrap();
  assert!(left > Duration::from_secs(59));
}

#[tokio::test]
async fn test_observer_panic_policy() {
  let build = |policy: ObserverErrorPolicy| {
    FunctionCacheBuilder::<String, i32>::new()
      .name("observed")
      .observer_error_policy(policy)
      .on_result(|_result| panic!("observer failed"))
      .build_single_key(|key: &String| key.clone(), |_key: String| async { Ok::<_, BoxError>(1) })
      .unwrap()
  };

  let logging = build(ObserverErrorPolicy::Log);
  assert_eq!(logging.get("k".to_string()).await.unwrap(), 1);

  let propagating = build(ObserverErrorPolicy::Propagate);
  match propagating.get("k".to_string()).await {
    Err(GetError::Observer { function_name, message }) => {
      assert_eq!(&*function_name, "observed");
      assert_eq!(message, "observer failed");
    }
    other => panic!("unexpected result: {:?}", other),
  }
}

#[tokio::test]
async fn test_registry_shares_counters_by_name() {
  let registry = Arc::new(Registry::new());

  let cache = FunctionCacheBuilder::<String, i32>::new()
    .name("users")
    .registry(registry.clone())
    .local_cache(build_manual_sweep_store::<String, i32>())
    .time_to_live(TTL)
    .build_single_key(|key: &String| key.clone(), |_key: String| async { Ok::<_, BoxError>(1) })
    .unwrap();

  cache.get("a".to_string()).await.unwrap();
  cache.get("a".to_string()).await.unwrap();

  let stats = registry.get("users").unwrap();
  assert_eq!(stats.fetches, 1);
  assert_eq!(stats.cache_hits, 1);
  assert_eq!(registry.total_pending_requests(), 0);
  assert_eq!(registry.snapshot().len(), 1);
}
