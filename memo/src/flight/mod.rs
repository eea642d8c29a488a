//! Single-flight coordination: concurrent requests for the same key share
//! one outstanding fetch.
//!
//! Shared fetches run on tasks handed to a [`TaskSpawner`](crate::TaskSpawner),
//! so a caller that drops its future stops waiting without cancelling the
//! fetch for everyone else. The in-flight entry for a key is removed before
//! its waiters are released; a caller arriving afterwards starts a new fetch.

mod combined;
mod load_future;
mod multi;
mod single;

pub use combined::DuplicateTaskCatcherCombined;
pub use multi::DuplicateTaskCatcherMulti;
pub use single::DuplicateTaskCatcher;

use crate::error::{share, BoxError, FetchPanicked, SharedError};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

fn panicked(payload: Box<dyn Any + Send>) -> SharedError {
  let message = panic_message(payload.as_ref());
  tracing::warn!(panic = %message, "fetch function panicked");
  share(Box::new(FetchPanicked(message)))
}

/// Calls a fetch function, turning a panic before it returns its future into
/// a [`SharedError`].
pub(crate) fn start_guarded<Fut>(start: impl FnOnce() -> Fut) -> Result<Fut, SharedError> {
  std::panic::catch_unwind(AssertUnwindSafe(start)).map_err(panicked)
}

/// Runs a fetch, turning both its error and a panic into a [`SharedError`].
pub(crate) async fn run_guarded<T, Fut>(fetch: Fut) -> Result<T, SharedError>
where
  Fut: Future<Output = Result<T, BoxError>>,
{
  match AssertUnwindSafe(fetch).catch_unwind().await {
    Ok(result) => result.map_err(share),
    Err(payload) => Err(panicked(payload)),
  }
}
