mod common;

use common::build_test_store;
use fibre_memo::MemoryCacheBuilder;
use std::collections::HashMap;
use std::time::Duration;

const LONG_TTL: Duration = Duration::from_secs(60);

#[test]
fn test_set_many_and_get_many() {
  let store = build_test_store(4);
  let items: Vec<_> = (0..20).map(|i| (i, i.to_string())).collect();

  // 1. Write 20 items in bulk, spread over every shard.
  store.set_many(items, LONG_TTL).unwrap();
  assert_eq!(store.len().unwrap(), 20);
  assert_eq!(store.metrics().inserts, 20);

  // 2. Read all 20 back.
  let keys: Vec<_> = (0..20).collect();
  let found: HashMap<_, _> = store.get_many(&keys).unwrap().into_iter().collect();
  assert_eq!(found.len(), 20, "Should find all written items");
  for i in 0..20 {
    assert_eq!(found[&i], i.to_string());
  }
  assert_eq!(store.metrics().hits, 20);
  assert_eq!(store.metrics().misses, 0);

  // 3. A mix of present and absent keys only returns the present ones.
  let mixed: Vec<_> = (10..30).collect();
  let found_mixed = store.get_many(&mixed).unwrap();
  assert_eq!(found_mixed.len(), 10, "Should only find the 10 existing keys");
  assert_eq!(store.metrics().hits, 30);
  assert_eq!(store.metrics().misses, 10);
}

#[test]
fn test_set_many_overwrites_existing_keys() {
  let store = build_test_store(4);
  store.set(1, "old".to_string(), LONG_TTL).unwrap();

  store
    .set_many(vec![(1, "new".to_string()), (2, "two".to_string())], LONG_TTL)
    .unwrap();

  assert_eq!(store.try_get(&1).unwrap(), Some("new".to_string()));
  assert_eq!(store.len().unwrap(), 2);
  assert_eq!(store.metrics().updates, 1);
}

#[test]
fn test_set_many_with_std_hasher() {
  let store = MemoryCacheBuilder::<u32, String, std::collections::hash_map::RandomState>::new()
    .shards(8)
    .build()
    .unwrap();

  store
    .set_many((0..64).map(|i| (i, i.to_string())).collect(), LONG_TTL)
    .unwrap();

  assert_eq!(store.len().unwrap(), 64);
  assert_eq!(store.try_get(&63).unwrap(), Some("63".to_string()));
  store.dispose();
}

#[test]
fn test_empty_batches_are_no_ops() {
  let store = build_test_store(4);
  store.set_many(Vec::new(), LONG_TTL).unwrap();
  assert!(store.get_many(&[]).unwrap().is_empty());
  assert_eq!(store.metrics().misses, 0);
}

#[test]
fn test_set_many_with_zero_ttl_removes_keys() {
  let store = build_test_store(4);
  store
    .set_many(vec![(1, "one".to_string()), (2, "two".to_string())], LONG_TTL)
    .unwrap();

  store.set_many(vec![(1, "ignored".to_string())], Duration::ZERO).unwrap();

  assert_eq!(store.try_get(&1).unwrap(), None);
  assert_eq!(store.try_get(&2).unwrap(), Some("two".to_string()));
}
