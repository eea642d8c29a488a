use crate::metrics::Metrics;
use crate::store::ShardedStore;
use crate::time;

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fibre::mpsc;
use fibre::TrySendError;
use generational_arena::Index;
use parking_lot::Mutex;

/// A request to remove `key` once `expires_at` has passed, provided the entry
/// at `index` is still the live one.
#[derive(Debug)]
pub(crate) struct ExpiryRecord<K> {
  pub(crate) key: K,
  pub(crate) index: Index,
  pub(crate) expires_at: u64,
}

// `BinaryHeap` is a max-heap; the comparison is reversed so the earliest
// expiry sits at the top.
impl<K> Ord for ExpiryRecord<K> {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    other.expires_at.cmp(&self.expires_at)
  }
}

impl<K> PartialOrd for ExpiryRecord<K> {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

impl<K> PartialEq for ExpiryRecord<K> {
  fn eq(&self, other: &Self) -> bool {
    self.expires_at == other.expires_at
  }
}

impl<K> Eq for ExpiryRecord<K> {}

/// The writer side of the expiry queue. Pushing never blocks.
pub(crate) struct ExpiryQueue<K: Send> {
  sender: mpsc::BoundedSender<ExpiryRecord<K>>,
  overflow: Arc<Mutex<Vec<ExpiryRecord<K>>>>,
  metrics: Arc<Metrics>,
}

impl<K: Send> ExpiryQueue<K> {
  pub(crate) fn push(&self, record: ExpiryRecord<K>) {
    match self.sender.try_send(record) {
      Ok(()) => {}
      Err(TrySendError::Full(record)) => {
        let overflows = self.metrics.expiry_queue_overflows.fetch_add(1, Ordering::Relaxed);
        if overflows == 0 {
          tracing::warn!("expiry queue is full; spilling records to the overflow list");
        }
        self.overflow.lock().push(record);
      }
      // The sweeper is gone, so the store is being torn down.
      Err(_) => {}
    }
  }
}

/// State owned by the sweeper: the receiving end of the queue and the heap.
///
/// Only one sweep runs at a time; the background thread and
/// `run_pending_sweep` both go through `state`.
pub(crate) struct SweeperContext<K: Send, V, H> {
  store: Arc<ShardedStore<K, V, H>>,
  metrics: Arc<Metrics>,
  state: Mutex<SweepState<K>>,
  overflow: Arc<Mutex<Vec<ExpiryRecord<K>>>>,
}

struct SweepState<K: Send> {
  receiver: mpsc::BoundedReceiver<ExpiryRecord<K>>,
  heap: BinaryHeap<ExpiryRecord<K>>,
}

impl<K, V, H> SweeperContext<K, V, H>
where
  K: Eq + Hash + Send,
  H: BuildHasher + Clone,
{
  /// Creates the sweeper context together with the queue writers push into.
  pub(crate) fn new(
    store: Arc<ShardedStore<K, V, H>>,
    metrics: Arc<Metrics>,
    queue_capacity: usize,
  ) -> (Self, ExpiryQueue<K>) {
    let (tx, rx): (
      mpsc::BoundedSender<ExpiryRecord<K>>,
      mpsc::BoundedReceiver<ExpiryRecord<K>>,
    ) = mpsc::bounded(queue_capacity);
    let overflow = Arc::new(Mutex::new(Vec::new()));

    let queue = ExpiryQueue {
      sender: tx,
      overflow: overflow.clone(),
      metrics: metrics.clone(),
    };
    let context = Self {
      store,
      metrics,
      state: Mutex::new(SweepState {
        receiver: rx,
        heap: BinaryHeap::new(),
      }),
      overflow,
    };
    (context, queue)
  }

  /// Moves queued records into the heap, then removes every entry whose
  /// expiry has passed. Returns the number of entries removed.
  pub(crate) fn sweep(&self) -> usize {
    let mut state = self.state.lock();
    let SweepState { receiver, heap } = &mut *state;

    while let Ok(record) = receiver.try_recv() {
      heap.push(record);
    }
    {
      let mut overflow = self.overflow.lock();
      if !overflow.is_empty() {
        heap.extend(overflow.drain(..));
      }
    }

    let now = time::now_nanos();
    let mut removed = 0;
    let mut discarded = 0;

    while heap.peek().map_or(false, |top| top.expires_at <= now) {
      let record = match heap.pop() {
        Some(record) => record,
        None => break,
      };

      let shard = self.store.get_shard(&record.key);
      let evicted = shard
        .write()
        .remove_if_current(&record.key, record.index, record.expires_at);

      if evicted.is_some() {
        removed += 1;
      } else {
        // The key was overwritten or removed since this record was queued.
        discarded += 1;
      }
    }

    if removed > 0 {
      self
        .metrics
        .evicted_by_ttl
        .fetch_add(removed as u64, Ordering::Relaxed);
      self.metrics.record_removed(removed as u64);
      tracing::debug!(removed, pending = heap.len(), "expired entries swept");
    }
    if discarded > 0 {
      self
        .metrics
        .expiry_records_discarded
        .fetch_add(discarded, Ordering::Relaxed);
    }
    removed
  }
}

/// The background thread that periodically sweeps expired entries.
pub(crate) struct Sweeper {
  handle: JoinHandle<()>,
  stop_flag: Arc<AtomicBool>,
}

impl Sweeper {
  /// Spawns a new sweeper thread.
  pub(crate) fn spawn<K, V, H>(context: Arc<SweeperContext<K, V, H>>, tick_interval: Duration) -> Self
  where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    let handle = thread::spawn(move || {
      tracing::debug!(?tick_interval, "sweeper started");
      while !stop_clone.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        context.sweep();

        // Park for the rest of the tick; `stop` unparks us early.
        if let Some(remaining) = tick_interval.checked_sub(tick_start.elapsed()) {
          thread::park_timeout(remaining);
        }
      }
      tracing::debug!("sweeper stopped");
    });

    Self { handle, stop_flag }
  }

  /// Signals the sweeper thread to stop.
  pub(crate) fn stop(self) {
    self.stop_flag.store(true, Ordering::Release);
    self.handle.thread().unpark();
  }
}
