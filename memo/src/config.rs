use crate::function::BatchBehaviour;

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Defaults shared by many function caches.
///
/// Construct one at startup (or deserialize it from configuration) and hand
/// it to each [`FunctionCacheBuilder`](crate::FunctionCacheBuilder) via
/// `settings`. Options set on the builder afterwards take precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FunctionCacheSettings {
  pub time_to_live: Option<Duration>,
  pub max_fetch_batch_size: Option<usize>,
  pub batch_behaviour: BatchBehaviour,
  pub duplicate_task_catcher_enabled: bool,
  pub swallow_distributed_cache_errors: bool,
}

impl Default for FunctionCacheSettings {
  fn default() -> Self {
    Self {
      time_to_live: None,
      max_fetch_batch_size: None,
      batch_behaviour: BatchBehaviour::default(),
      duplicate_task_catcher_enabled: true,
      swallow_distributed_cache_errors: false,
    }
  }
}
