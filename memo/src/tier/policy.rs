use std::fmt;
use std::sync::Arc;

pub(crate) type SkipGet<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;
pub(crate) type SkipSet<K, V> = Arc<dyn Fn(&K, &V) -> bool + Send + Sync>;

/// Per-tier predicates that keep keys away from one tier.
///
/// A key for which `skip_get` answers `true` is never read from the tier; a
/// pair for which `skip_set` answers `true` is never written to it.
pub struct TierPolicy<K, V> {
  skip_get: Option<SkipGet<K>>,
  skip_set: Option<SkipSet<K, V>>,
}

impl<K, V> TierPolicy<K, V> {
  /// A policy that lets every key through.
  pub fn allow_all() -> Self {
    Self {
      skip_get: None,
      skip_set: None,
    }
  }

  pub fn skip_get_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K) -> bool + Send + Sync + 'static,
  {
    self.skip_get = Some(Arc::new(predicate));
    self
  }

  pub fn skip_set_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    self.skip_set = Some(Arc::new(predicate));
    self
  }

  pub(crate) fn with_predicates(skip_get: Option<SkipGet<K>>, skip_set: Option<SkipSet<K, V>>) -> Self {
    Self { skip_get, skip_set }
  }

  #[inline]
  pub fn skips_get(&self, key: &K) -> bool {
    self.skip_get.as_ref().map_or(false, |skip| skip(key))
  }

  #[inline]
  pub fn skips_set(&self, key: &K, value: &V) -> bool {
    self.skip_set.as_ref().map_or(false, |skip| skip(key, value))
  }
}

impl<K, V> Default for TierPolicy<K, V> {
  fn default() -> Self {
    Self::allow_all()
  }
}

impl<K, V> Clone for TierPolicy<K, V> {
  fn clone(&self) -> Self {
    Self {
      skip_get: self.skip_get.clone(),
      skip_set: self.skip_set.clone(),
    }
  }
}

impl<K, V> fmt::Debug for TierPolicy<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TierPolicy")
      .field("skip_get", &self.skip_get.is_some())
      .field("skip_set", &self.skip_set.is_some())
      .finish()
  }
}
