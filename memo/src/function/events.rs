use crate::error::GetError;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// How a key's value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
  /// The operation failed and a default value was substituted.
  Error,
  FromCache,
  Fetch,
}

/// One key's part of a `get` call.
#[derive(Debug, Clone)]
pub struct KeyResult<K, V> {
  pub key: K,
  pub value: V,
  pub outcome: Outcome,
  /// The tier that served the value, for `Outcome::FromCache`.
  pub tier: Option<&'static str>,
  /// Whether the value came from a fetch started by another caller.
  pub duplicate: bool,
}

/// Reported once per `get`/`get_many` call.
#[derive(Debug, Clone)]
pub struct GetResult<K, V> {
  pub function_name: Arc<str>,
  pub results: Vec<KeyResult<K, V>>,
  pub success: bool,
  pub start: SystemTime,
  pub duration: Duration,
}

/// One key returned by a fetch.
#[derive(Debug, Clone)]
pub struct FetchedKey<K, V> {
  pub key: K,
  pub value: V,
  pub duplicate: bool,
}

/// Reported once per underlying fetch (one per sub-batch).
#[derive(Debug, Clone)]
pub struct FetchResult<K, V> {
  pub function_name: Arc<str>,
  /// The keys this fetch was asked for.
  pub requested: Vec<K>,
  pub results: Vec<FetchedKey<K, V>>,
  pub success: bool,
  pub start: SystemTime,
  pub duration: Duration,
}

/// Reported once per failure.
#[derive(Debug, Clone)]
pub struct ExceptionEvent {
  pub function_name: Arc<str>,
  pub error: GetError,
  pub timestamp: SystemTime,
}

/// What happens when an observer callback panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObserverErrorPolicy {
  /// Log the panic and carry on.
  #[default]
  Log,
  /// Return [`GetError::Observer`] from an otherwise successful call.
  Propagate,
}

pub(crate) type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// The ordered observer lists of one function cache.
pub(crate) struct Observers<K, V> {
  pub(crate) on_result: Vec<Callback<GetResult<K, V>>>,
  pub(crate) on_fetch: Vec<Callback<FetchResult<K, V>>>,
  pub(crate) on_exception: Vec<Callback<ExceptionEvent>>,
  pub(crate) policy: ObserverErrorPolicy,
}

impl<K, V> Default for Observers<K, V> {
  fn default() -> Self {
    Self {
      on_result: Vec::new(),
      on_fetch: Vec::new(),
      on_exception: Vec::new(),
      policy: ObserverErrorPolicy::default(),
    }
  }
}

impl<K, V> Clone for Observers<K, V> {
  fn clone(&self) -> Self {
    Self {
      on_result: self.on_result.clone(),
      on_fetch: self.on_fetch.clone(),
      on_exception: self.on_exception.clone(),
      policy: self.policy,
    }
  }
}

impl<K, V> fmt::Debug for Observers<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Observers")
      .field("on_result", &self.on_result.len())
      .field("on_fetch", &self.on_fetch.len())
      .field("on_exception", &self.on_exception.len())
      .field("policy", &self.policy)
      .finish()
  }
}

fn notify<E>(callbacks: &[Callback<E>], event: &E, hook: &'static str, panics: &mut Option<String>) {
  for callback in callbacks {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
      let message = payload
        .downcast_ref::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
      tracing::warn!(hook, panic = %message, "observer callback panicked");
      panics.get_or_insert(message);
    }
  }
}

impl<K, V> Observers<K, V> {
  /// Whether any `on_result` observer is registered, so callers can skip
  /// building the event.
  pub(crate) fn wants_results(&self) -> bool {
    !self.on_result.is_empty()
  }

  pub(crate) fn wants_fetches(&self) -> bool {
    !self.on_fetch.is_empty()
  }

  /// Calls the `on_result` observers in order, recording the first panic in `panics`.
  pub(crate) fn result(&self, event: &GetResult<K, V>, panics: &mut Option<String>) {
    notify(&self.on_result, event, "on_result", panics);
  }

  pub(crate) fn fetch(&self, event: &FetchResult<K, V>, panics: &mut Option<String>) {
    notify(&self.on_fetch, event, "on_fetch", panics);
  }

  pub(crate) fn exception(&self, event: &ExceptionEvent, panics: &mut Option<String>) {
    notify(&self.on_exception, event, "on_exception", panics);
  }

  /// Converts a recorded observer panic into the error the caller should see.
  pub(crate) fn escalate(&self, function_name: &Arc<str>, panics: Option<String>) -> Result<(), GetError> {
    match (self.policy, panics) {
      (ObserverErrorPolicy::Propagate, Some(message)) => Err(GetError::Observer {
        function_name: function_name.clone(),
        message,
      }),
      _ => Ok(()),
    }
  }
}
