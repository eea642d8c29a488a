use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all expiry calculations.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Converts an `Instant` into nanoseconds since the cache's epoch.
#[inline]
pub(crate) fn instant_to_nanos(instant: Instant) -> u64 {
  instant.saturating_duration_since(*CACHE_EPOCH).as_nanos() as u64
}

/// The current time in nanoseconds since the epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  instant_to_nanos(Instant::now())
}

/// The absolute expiry, in epoch nanoseconds, of an entry written now with `ttl`.
#[inline]
pub(crate) fn expiry_after(ttl: Duration) -> u64 {
  now_nanos().saturating_add(ttl.as_nanos().min(u64::MAX as u128) as u64)
}

/// Time left until `expires_at`, or `None` once it has passed.
#[inline]
pub(crate) fn remaining(expires_at: u64) -> Option<Duration> {
  let now = now_nanos();
  if now >= expires_at {
    None
  } else {
    Some(Duration::from_nanos(expires_at - now))
  }
}
