mod common;

use common::build_manual_sweep_store;
use fibre_memo::{BoxError, FunctionCacheBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const TTL: Duration = Duration::from_secs(60);

type Calls = Arc<Mutex<Vec<(&'static str, Vec<u32>)>>>;

fn price_fetch(
  calls: Calls,
) -> impl Fn(&'static str, Vec<u32>) -> futures_util::future::BoxFuture<'static, Result<HashMap<u32, String>, BoxError>>
     + Send
     + Sync
     + 'static {
  use futures_util::FutureExt;
  move |currency: &'static str, products: Vec<u32>| {
    let mut sorted = products.clone();
    sorted.sort();
    calls.lock().push((currency, sorted));
    async move {
      sleep(Duration::from_millis(20)).await;
      Ok::<_, BoxError>(
        products
          .into_iter()
          .map(|id| (id, format!("{}{}", id, currency)))
          .collect::<HashMap<_, _>>(),
      )
    }
    .boxed()
  }
}

#[tokio::test]
async fn test_inner_keys_are_cached_per_outer_key() {
  let calls: Calls = Arc::default();
  let store = build_manual_sweep_store::<(&'static str, u32), String>();
  let cache = FunctionCacheBuilder::<(&'static str, u32), String>::new()
    .name("prices")
    .local_cache(store.clone())
    .time_to_live(TTL)
    .build_multi_param(price_fetch(calls.clone()))
    .unwrap();

  let usd = cache.get_many("usd", &[1, 2]).await.unwrap();
  assert_eq!(usd[&1], "1usd");
  assert_eq!(usd[&2], "2usd");

  // Only product 3 is missing for "usd"; "eur" has nothing cached yet.
  let usd_more = cache.get_many("usd", &[2, 3]).await.unwrap();
  assert_eq!(usd_more[&3], "3usd");
  let eur = cache.get_many("eur", &[1]).await.unwrap();
  assert_eq!(eur[&1], "1eur");

  assert_eq!(
    *calls.lock(),
    vec![("usd", vec![1, 2]), ("usd", vec![3]), ("eur", vec![1])]
  );
  assert_eq!(store.try_get(&("usd", 3)).unwrap(), Some("3usd".to_string()));
}

#[tokio::test]
async fn test_concurrent_requests_share_inner_fetches() {
  let calls: Calls = Arc::default();
  let cache = FunctionCacheBuilder::<(&'static str, u32), String>::new()
    .build_multi_param(price_fetch(calls.clone()))
    .unwrap();

  let (a, b) = tokio::join!(cache.get_many("usd", &[1, 2]), cache.get_many("usd", &[2, 3]));
  assert_eq!(a.unwrap().len(), 2);
  assert_eq!(b.unwrap()[&2], "2usd");

  assert_eq!(*calls.lock(), vec![("usd", vec![1, 2]), ("usd", vec![3])]);
  assert_eq!(cache.in_flight_count(), 0);
}

#[tokio::test]
async fn test_single_inner_key_and_missing_value() {
  let cache = FunctionCacheBuilder::<(u32, u32), u32>::new()
    .local_cache(build_manual_sweep_store::<(u32, u32), u32>())
    .time_to_live(TTL)
    .fill_missing_keys_with(|&(outer, inner): &(u32, u32)| outer * 100 + inner)
    .build_multi_param(|outer: u32, inner: Vec<u32>| async move {
      // Only even inner keys exist upstream.
      Ok::<_, BoxError>(
        inner
          .into_iter()
          .filter(|k| k % 2 == 0)
          .map(|k| (k, outer + k))
          .collect::<HashMap<_, _>>(),
      )
    })
    .unwrap();

  assert_eq!(cache.get(1, 2).await.unwrap(), Some(3));
  assert_eq!(cache.get(1, 3).await.unwrap(), Some(103));
  assert!(cache.get_many(1, &[]).await.unwrap().is_empty());
}
