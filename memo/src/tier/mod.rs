//! Cache capabilities and the tiers a function cache reads from and writes to.
//!
//! [`LocalCache`] and [`DistributedCache`] are the contracts a backend must
//! satisfy. [`Cache`] is the single shape the function caches talk to; it is
//! implemented by [`LocalTier`], [`DistributedTier`] and [`TwoTierCache`].

mod distributed;
mod local;
pub(crate) mod policy;
mod two_tier;

pub use distributed::{DistributedCache, DistributedTier, ValueAndTtl};
pub use local::{LocalCache, LocalTier};
pub use policy::TierPolicy;
pub use two_tier::TwoTierCache;

use crate::error::CacheError;
use crate::key::Key;

use std::time::Duration;

use async_trait::async_trait;

/// Label reported for values served from the local tier.
pub const LOCAL_TIER: &str = "local";
/// Label reported for values served from the distributed tier.
pub const DISTRIBUTED_TIER: &str = "distributed";

/// A value found in a cache, tagged with the tier that served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit<V> {
  pub value: V,
  pub tier: &'static str,
}

impl<V> CacheHit<V> {
  pub fn new(value: V, tier: &'static str) -> Self {
    Self { value, tier }
  }
}

/// The cache shape consumed by the function caches.
#[async_trait]
pub trait Cache<K, V>: Send + Sync {
  async fn get(&self, key: &Key<K>) -> Result<Option<CacheHit<V>>, CacheError>;

  async fn set(&self, key: &Key<K>, value: V, ttl: Duration) -> Result<(), CacheError>;

  /// Returns a hit for every key found; missing keys are simply absent.
  async fn get_many(&self, keys: &[Key<K>]) -> Result<Vec<(Key<K>, CacheHit<V>)>, CacheError>;

  async fn set_many(&self, items: Vec<(Key<K>, V)>, ttl: Duration) -> Result<(), CacheError>;
}
