use crate::entry::CacheEntry;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// What a write found under its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Replaced {
  Nothing,
  Expired,
  Live,
}

impl Replaced {
  pub(crate) fn classify<V>(previous: Option<&CacheEntry<V>>, now: u64) -> Self {
    match previous {
      None => Replaced::Nothing,
      Some(entry) if entry.is_expired_at(now) => Replaced::Expired,
      Some(_) => Replaced::Live,
    }
  }
}

/// A thread-safe, internal metrics collector for the memory store.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) updates: CachePadded<AtomicU64>,
  pub(crate) removals: CachePadded<AtomicU64>,

  // --- Expiry ---
  pub(crate) evicted_by_ttl: CachePadded<AtomicU64>,
  pub(crate) expiry_records_discarded: CachePadded<AtomicU64>,
  pub(crate) expiry_queue_overflows: CachePadded<AtomicU64>,

  // --- Size ---
  pub(crate) current_entries: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      updates: CachePadded::new(AtomicU64::new(0)),
      removals: CachePadded::new(AtomicU64::new(0)),
      evicted_by_ttl: CachePadded::new(AtomicU64::new(0)),
      expiry_records_discarded: CachePadded::new(AtomicU64::new(0)),
      expiry_queue_overflows: CachePadded::new(AtomicU64::new(0)),
      current_entries: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn record_write(&self, replaced: Replaced) {
    match replaced {
      Replaced::Live => {
        self.updates.fetch_add(1, Ordering::Relaxed);
      }
      // The expired entry was still counted as held.
      Replaced::Expired => {
        self.inserts.fetch_add(1, Ordering::Relaxed);
      }
      Replaced::Nothing => {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.current_entries.fetch_add(1, Ordering::Relaxed);
      }
    }
  }

  #[inline]
  pub(crate) fn record_removed(&self, count: u64) {
    // Saturating: a concurrent `clear` may already have zeroed the gauge.
    let _ = self
      .current_entries
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(count)));
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      updates: self.updates.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      evicted_by_ttl: self.evicted_by_ttl.load(Ordering::Relaxed),
      expiry_records_discarded: self.expiry_records_discarded.load(Ordering::Relaxed),
      expiry_queue_overflows: self.expiry_queue_overflows.load(Ordering::Relaxed),
      current_entries: self.current_entries.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the store's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of successful lookups.
  pub hits: u64,
  /// The number of lookups that found nothing, or only an expired entry.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Writes that created a new key.
  pub inserts: u64,
  /// Writes that replaced a live key.
  pub updates: u64,
  /// Entries removed through `try_remove`.
  pub removals: u64,
  /// Entries removed by the sweeper after their TTL passed.
  pub evicted_by_ttl: u64,
  /// Expiry records dropped because their entry had been overwritten or removed.
  pub expiry_records_discarded: u64,
  /// Expiry records that did not fit the queue and went to the overflow list.
  pub expiry_queue_overflows: u64,
  /// Entries currently held, including expired ones not yet swept.
  pub current_entries: u64,
  /// The number of seconds the store has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("updates", &self.updates)
      .field("removals", &self.removals)
      .field("evicted_by_ttl", &self.evicted_by_ttl)
      .field("expiry_records_discarded", &self.expiry_records_discarded)
      .field("expiry_queue_overflows", &self.expiry_queue_overflows)
      .field("current_entries", &self.current_entries)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
