mod common;

use common::build_manual_sweep_store;
use fibre_memo::MemoryCacheBuilder;
use std::thread::sleep;
use std::time::Duration;

const TINY_TTL: Duration = Duration::from_millis(100);
const SWEEP_TICK: Duration = Duration::from_millis(10);
const SLEEP_MARGIN: Duration = Duration::from_millis(50);

#[test]
fn test_item_expires_after_ttl() {
  let store = MemoryCacheBuilder::<&str, i32>::new()
    .shards(1)
    .sweep_interval(SWEEP_TICK)
    .build()
    .unwrap();

  store.set("a", 1, TINY_TTL).unwrap();

  // 1. Immediately after the write, the value is present.
  assert_eq!(store.try_get(&"a").unwrap(), Some(1));

  // 2. Wait for longer than the TTL.
  sleep(TINY_TTL + SLEEP_MARGIN);

  // 3. The value is gone, and the sweeper has reclaimed it.
  assert_eq!(store.try_get(&"a").unwrap(), None, "Item should have expired");
  let metrics = store.metrics();
  assert_eq!(metrics.hits, 1);
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.evicted_by_ttl, 1);
  assert_eq!(metrics.current_entries, 0);
}

#[test]
fn test_expired_entry_is_invisible_before_sweep() {
  let store = build_manual_sweep_store::<&str, i32>();
  store.set("a", 1, TINY_TTL).unwrap();

  sleep(TINY_TTL + SLEEP_MARGIN);

  // Not yet swept, but no reader may observe it.
  assert_eq!(store.len().unwrap(), 1);
  assert_eq!(store.try_get(&"a").unwrap(), None);
  assert!(!store.contains_key(&"a").unwrap());
  assert!(store.get_many(&["a"]).unwrap().is_empty());
  assert_eq!(store.try_remove(&"a").unwrap(), None);
}

#[test]
fn test_manual_sweep_removes_only_due_entries() {
  let store = build_manual_sweep_store::<&str, i32>();
  store.set("short", 1, TINY_TTL).unwrap();
  store.set("long", 2, Duration::from_secs(60)).unwrap();

  assert_eq!(store.run_pending_sweep().unwrap(), 0);

  sleep(TINY_TTL + SLEEP_MARGIN);
  assert_eq!(store.run_pending_sweep().unwrap(), 1);
  assert_eq!(store.len().unwrap(), 1);
  assert_eq!(store.try_get(&"long").unwrap(), Some(2));
  assert_eq!(store.metrics().evicted_by_ttl, 1);
}

#[test]
fn test_overwrite_is_not_removed_by_stale_expiry() {
  let store = build_manual_sweep_store::<&str, i32>();
  store.set("key", 1, TINY_TTL).unwrap();
  store.set("key", 2, Duration::from_secs(60)).unwrap();

  sleep(TINY_TTL + SLEEP_MARGIN);

  // The first record is due, but it belongs to the replaced entry.
  assert_eq!(store.run_pending_sweep().unwrap(), 0);
  assert_eq!(store.try_get(&"key").unwrap(), Some(2));
  assert_eq!(store.metrics().expiry_records_discarded, 1);
}

#[test]
fn test_overwriting_an_expired_entry_counts_as_insert() {
  let store = build_manual_sweep_store::<&str, i32>();
  store.set("key", 1, TINY_TTL).unwrap();
  store.set_many(vec![("batch", 1)], TINY_TTL).unwrap();

  sleep(TINY_TTL + SLEEP_MARGIN);

  // Both entries expired but are not swept yet.
  store.set("key", 2, Duration::from_secs(60)).unwrap();
  store.set_many(vec![("batch", 2)], Duration::from_secs(60)).unwrap();
  let metrics = store.metrics();
  assert_eq!(metrics.inserts, 4);
  assert_eq!(metrics.updates, 0);
  assert_eq!(metrics.current_entries, 2);

  store.set("key", 3, Duration::from_secs(60)).unwrap();
  let metrics = store.metrics();
  assert_eq!(metrics.inserts, 4);
  assert_eq!(metrics.updates, 1);
  assert_eq!(metrics.current_entries, 2);
}

#[test]
fn test_reinserted_key_survives_record_of_removed_entry() {
  let store = build_manual_sweep_store::<&str, i32>();
  store.set("key", 1, TINY_TTL).unwrap();
  store.try_remove(&"key").unwrap();
  store.set("key", 3, Duration::from_secs(60)).unwrap();

  sleep(TINY_TTL + SLEEP_MARGIN);

  assert_eq!(store.run_pending_sweep().unwrap(), 0);
  assert_eq!(store.try_get(&"key").unwrap(), Some(3));
}

#[test]
fn test_ttl_is_not_reset_on_access() {
  let store = build_manual_sweep_store::<&str, i32>();
  store.set("key", 1, TINY_TTL).unwrap();

  sleep(TINY_TTL / 2);
  assert_eq!(store.try_get(&"key").unwrap(), Some(1));

  sleep(TINY_TTL / 2 + SLEEP_MARGIN);
  assert_eq!(
    store.try_get(&"key").unwrap(),
    None,
    "Item should have expired despite access"
  );
}

#[test]
fn test_full_expiry_queue_spills_to_overflow() {
  let store = MemoryCacheBuilder::<u32, u32>::new()
    .shards(1)
    .expiry_queue_capacity(2)
    .sweep_interval(Duration::from_secs(3600))
    .build()
    .unwrap();

  for i in 0..10 {
    store.set(i, i, TINY_TTL).unwrap();
  }
  assert!(store.metrics().expiry_queue_overflows > 0);

  sleep(TINY_TTL + SLEEP_MARGIN);

  // Records in the overflow list are swept like queued ones.
  assert_eq!(store.run_pending_sweep().unwrap(), 10);
  assert!(store.is_empty().unwrap());
}
