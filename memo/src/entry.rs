/// A value in the memory store together with its absolute expiry.
///
/// Entries live in a per-shard `generational_arena::Arena`. The arena's
/// `Index` carries the slot's generation, so a handle taken before a slot was
/// recycled can never resolve to the entry that replaced it.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  pub(crate) value: V,
  /// Expiry in nanoseconds since the cache epoch.
  pub(crate) expires_at: u64,
}

impl<V> CacheEntry<V> {
  #[inline]
  pub(crate) fn new(value: V, expires_at: u64) -> Self {
    Self { value, expires_at }
  }

  #[inline]
  pub(crate) fn is_expired_at(&self, now_nanos: u64) -> bool {
    now_nanos >= self.expires_at
  }
}
