use crate::error::BuildError;

use std::sync::Arc;
use std::{future::Future, pin::Pin};

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Shared fetches run on spawned tasks so that a caller dropping its future
/// does not cancel work other callers are still waiting on.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner for the current Tokio runtime, if there is one.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Resolves the spawner to use when none was configured explicitly.
pub(crate) fn default_spawner() -> Result<Arc<dyn TaskSpawner>, BuildError> {
  #[cfg(feature = "tokio")]
  {
    if let Some(spawner) = TokioSpawner::try_current() {
      return Ok(Arc::new(spawner));
    }
  }
  Err(BuildError::SpawnerRequired)
}
