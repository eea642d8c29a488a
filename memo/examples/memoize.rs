use fibre_memo::{BoxError, FunctionCacheBuilder, MemoryCacheBuilder, Outcome, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Stands in for a slow lookup against a remote service.
async fn load_prices(currency: &'static str, products: Vec<u32>) -> Result<HashMap<u32, f64>, BoxError> {
  tokio::time::sleep(Duration::from_millis(100)).await;
  let rate = if currency == "eur" { 0.9 } else { 1.0 };
  Ok(products.into_iter().map(|id| (id, id as f64 * 1.25 * rate)).collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let registry = Arc::new(Registry::new());

  // --- A single-key function cache ---
  let greetings = FunctionCacheBuilder::<String, String>::new()
    .name("greeting")
    .registry(registry.clone())
    .local_cache(MemoryCacheBuilder::<String, String>::default().build()?)
    .time_to_live(Duration::from_secs(30))
    .on_result(|result| {
      for key in &result.results {
        println!("  [greeting] {} -> {:?} in {:?}", key.key, key.outcome, result.duration);
      }
    })
    .build_single_key(
      |name: &String| name.to_lowercase(),
      |name: String| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, BoxError>(format!("Hello, {}!", name))
      },
    )?;

  println!("First call fetches:");
  println!("{}", greetings.get("Ada".to_string()).await?);
  println!("Second call, different casing, is served from the cache:");
  println!("{}", greetings.get("ADA".to_string()).await?);

  // --- A batch function cache keyed by (currency, product) ---
  let prices = FunctionCacheBuilder::<(&'static str, u32), f64>::new()
    .name("prices")
    .registry(registry.clone())
    .local_cache(MemoryCacheBuilder::<(&'static str, u32), f64>::default().build()?)
    .time_to_live(Duration::from_secs(60))
    .max_fetch_batch_size(2)
    .on_fetch(|fetch| println!("  [prices] fetched {} keys", fetch.requested.len()))
    .on_result(|result| {
      let cached = result
        .results
        .iter()
        .filter(|key| key.outcome == Outcome::FromCache)
        .count();
      println!("  [prices] {} of {} keys from cache", cached, result.results.len());
    })
    .build_multi_param(load_prices)?;

  let usd = prices.get_many("usd", &[1, 2, 3]).await?;
  println!("usd: {:?}", usd);
  let usd = prices.get_many("usd", &[2, 3, 4]).await?;
  println!("usd: {:?}", usd);

  for (name, stats) in registry.snapshot() {
    println!("{}: {:?}", name, stats);
  }
  Ok(())
}
