use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// An owned, type-erased error as returned by user fetch functions and cache backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A type-erased error that can be handed to every waiter of a shared fetch.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Converts an owned error into its shareable form.
#[inline]
pub(crate) fn share(err: BoxError) -> SharedError {
  Arc::from(err)
}

/// Errors that can occur when building a cache or a function cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The store was configured with zero shards, which is not allowed.
  ZeroShards,
  /// The expiry queue was configured with a capacity of zero.
  ZeroQueueCapacity,
  /// A maximum fetch batch size of zero was configured.
  ZeroBatchSize,
  /// No `TaskSpawner` was configured and the default `tokio` feature is not
  /// enabled (or no Tokio runtime was running at build time).
  SpawnerRequired,
  /// A cache tier was configured without a time-to-live or a TTL factory.
  MissingTimeToLive,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroShards => write!(f, "shard count cannot be zero"),
      BuildError::ZeroQueueCapacity => write!(f, "expiry queue capacity cannot be zero"),
      BuildError::ZeroBatchSize => write!(f, "max fetch batch size cannot be zero"),
      BuildError::SpawnerRequired => write!(
        f,
        "a function cache requires a task spawner, a running Tokio runtime or the 'tokio' feature"
      ),
      BuildError::MissingTimeToLive => write!(
        f,
        "a cache tier was configured without a time-to-live or a time-to-live factory"
      ),
    }
  }
}

impl std::error::Error for BuildError {}

/// Errors surfaced by cache tiers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  /// The store was shut down; every operation fails fast afterwards.
  #[error("cache has been disposed")]
  Disposed,
  /// A backend (typically the distributed tier) failed.
  #[error("{tier} cache operation failed: {source}")]
  Backend {
    tier: &'static str,
    #[source]
    source: SharedError,
  },
}

impl CacheError {
  /// Wraps a backend failure for the given tier.
  pub fn backend(tier: &'static str, source: impl Into<BoxError>) -> Self {
    CacheError::Backend {
      tier,
      source: share(source.into()),
    }
  }
}

/// Raised inside the coordinator when a fetch function panics instead of returning.
#[derive(Debug, thiserror::Error)]
#[error("fetch function panicked: {0}")]
pub struct FetchPanicked(pub String);

/// The underlying fetch function failed for a set of keys.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fetch failed in function cache '{function_name}' for keys [{}]: {source}", .keys.join(", "))]
pub struct FetchError {
  pub function_name: Arc<str>,
  pub keys: Vec<String>,
  pub timestamp: SystemTime,
  #[source]
  pub source: SharedError,
}

/// The error returned from a function cache `get`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GetError {
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error("cache lookup failed in function cache '{function_name}' for keys [{}]: {source}", .keys.join(", "))]
  Cache {
    function_name: Arc<str>,
    keys: Vec<String>,
    timestamp: SystemTime,
    #[source]
    source: CacheError,
  },
  /// An observer callback panicked and the cache was configured to propagate it.
  #[error("observer callback panicked in function cache '{function_name}': {message}")]
  Observer {
    function_name: Arc<str>,
    message: String,
  },
  /// The caller-provided destination cannot hold every result.
  #[error("destination holds {available} results but {required} are required")]
  DestinationTooSmall { required: usize, available: usize },
}

impl GetError {
  /// The serialized keys affected by this error, if any.
  pub fn keys(&self) -> &[String] {
    match self {
      GetError::Fetch(err) => &err.keys,
      GetError::Cache { keys, .. } => keys,
      GetError::Observer { .. } | GetError::DestinationTooSmall { .. } => &[],
    }
  }

  /// The name of the function cache that raised this error, if any.
  pub fn function_name(&self) -> Option<&str> {
    match self {
      GetError::Fetch(err) => Some(&err.function_name),
      GetError::Cache { function_name, .. } | GetError::Observer { function_name, .. } => {
        Some(function_name)
      }
      GetError::DestinationTooSmall { .. } => None,
    }
  }
}
