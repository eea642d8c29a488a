//! Function caches: memoize an async fetch function behind the cache tiers.
//!
//! Every flavour runs the same pipeline. Keys are looked up in the cache,
//! misses are fetched (deduplicated across concurrent callers and split into
//! sub-batches when configured), fresh values are written back with their
//! time-to-live, and observers are told what happened.
//!
//! - [`SingleKeyFunctionCache`] memoizes a function of one parameter set.
//! - [`EnumerableKeyFunctionCache`] memoizes a batch function over many keys.
//! - [`MultiParamEnumerableKeyFunctionCache`] memoizes a batch function over
//!   many inner keys that share one outer key.
//!
//! All three are built with [`FunctionCacheBuilder`].

mod batch;
mod builder;
mod core;
mod enumerable;
mod events;
mod multi_param;
mod single;

pub use self::batch::BatchBehaviour;
pub use self::builder::FunctionCacheBuilder;
pub use self::core::TimeToLiveFactory;
pub use self::enumerable::EnumerableKeyFunctionCache;
pub use self::events::{ExceptionEvent, FetchResult, FetchedKey, GetResult, KeyResult, ObserverErrorPolicy, Outcome};
pub use self::multi_param::MultiParamEnumerableKeyFunctionCache;
pub use self::single::SingleKeyFunctionCache;
