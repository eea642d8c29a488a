//! Concurrent function-result caching: memoize expensive async fetches behind
//! an in-process TTL store and an optional distributed cache.
//!
//! # Features
//! - **TTL Memory Store**: A sharded, thread-safe store where every entry has its
//!   own time-to-live and a background sweeper reclaims expired entries.
//! - **Single-Flight Fetching**: Concurrent requests for the same keys share one
//!   outstanding fetch, including batch and `(outer, inner)` keyed fetches.
//! - **Function Caches**: A get → fetch → set pipeline with sub-batching, per-key
//!   TTLs, skip predicates, default values on failure and result observers.
//! - **Two Tiers**: Local reads first, then the distributed cache, backfilling the
//!   local tier with the remaining TTL.
//! - **Observability**: Store metrics and per-function counters via a [`Registry`].
//! - **Configuration**: Optional `serde` feature for loading [`FunctionCacheSettings`].

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod flight;
pub mod function;
pub mod key;
pub mod local;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod tier;

// Internal, crate-only modules
mod entry;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::MemoryCacheBuilder;
pub use config::FunctionCacheSettings;
pub use error::{BoxError, BuildError, CacheError, FetchError, FetchPanicked, GetError, SharedError};
pub use flight::{DuplicateTaskCatcher, DuplicateTaskCatcherCombined, DuplicateTaskCatcherMulti};
pub use function::{
  BatchBehaviour, EnumerableKeyFunctionCache, ExceptionEvent, FetchResult, FunctionCacheBuilder, GetResult,
  KeyResult, MultiParamEnumerableKeyFunctionCache, ObserverErrorPolicy, Outcome, SingleKeyFunctionCache,
};
pub use key::{Key, KeySerializer};
pub use local::MemoryCache;
pub use metrics::MetricsSnapshot;
pub use registry::{FunctionStatsSnapshot, Registry};
pub use runtime::TaskSpawner;
pub use tier::{
  Cache, CacheHit, DistributedCache, DistributedTier, LocalCache, LocalTier, TierPolicy, TwoTierCache, ValueAndTtl,
};

#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
