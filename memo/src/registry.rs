use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// Counters kept for one function cache.
#[derive(Debug, Default)]
pub struct FunctionStats {
  pending_requests: CachePadded<AtomicU64>,
  cache_hits: CachePadded<AtomicU64>,
  fetches: CachePadded<AtomicU64>,
  errors: CachePadded<AtomicU64>,
}

impl FunctionStats {
  /// Marks a request as pending until the returned guard is dropped.
  pub(crate) fn pending(&self) -> PendingGuard<'_> {
    self.pending_requests.fetch_add(1, Ordering::Relaxed);
    PendingGuard(self)
  }

  #[inline]
  pub(crate) fn record_cache_hits(&self, count: u64) {
    self.cache_hits.fetch_add(count, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_fetch(&self) {
    self.fetches.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn record_error(&self) {
    self.errors.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> FunctionStatsSnapshot {
    FunctionStatsSnapshot {
      pending_requests: self.pending_requests.load(Ordering::Relaxed),
      cache_hits: self.cache_hits.load(Ordering::Relaxed),
      fetches: self.fetches.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
    }
  }
}

pub(crate) struct PendingGuard<'a>(&'a FunctionStats);

impl Drop for PendingGuard<'_> {
  fn drop(&mut self) {
    self.0.pending_requests.fetch_sub(1, Ordering::Relaxed);
  }
}

/// A point-in-time copy of one function cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionStatsSnapshot {
  /// Calls currently inside `get`/`get_many`.
  pub pending_requests: u64,
  /// Keys served from a cache tier.
  pub cache_hits: u64,
  /// Fetches issued after a cache miss, including ones joined to a fetch
  /// another caller had already started.
  pub fetches: u64,
  /// Failed operations, whether or not a default value was substituted.
  pub errors: u64,
}

/// Process-level bookkeeping for function caches.
///
/// Build one at startup and pass it to every function cache that should
/// report into it. Function caches registered under the same name share
/// their counters.
#[derive(Default)]
pub struct Registry {
  functions: Mutex<HashMap<Arc<str>, Arc<FunctionStats>>>,
}

impl fmt::Debug for Registry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registry")
      .field("functions", &self.functions.lock().len())
      .finish()
  }
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the counters for `name`, creating them on first use.
  pub fn register(&self, name: &str) -> Arc<FunctionStats> {
    self
      .functions
      .lock()
      .entry(Arc::from(name))
      .or_default()
      .clone()
  }

  pub fn get(&self, name: &str) -> Option<FunctionStatsSnapshot> {
    self.functions.lock().get(name).map(|stats| stats.snapshot())
  }

  /// Snapshots of every registered function cache, sorted by name.
  pub fn snapshot(&self) -> Vec<(Arc<str>, FunctionStatsSnapshot)> {
    let mut all: Vec<_> = self
      .functions
      .lock()
      .iter()
      .map(|(name, stats)| (name.clone(), stats.snapshot()))
      .collect();
    all.sort_by(|a, b| a.0.cmp(&b.0));
    all
  }

  /// Requests currently pending across every registered function cache.
  pub fn total_pending_requests(&self) -> u64 {
    self
      .functions
      .lock()
      .values()
      .map(|stats| stats.snapshot().pending_requests)
      .sum()
  }
}
