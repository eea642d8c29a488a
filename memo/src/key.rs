use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Turns a logical key into the string form used by backends that need serialized keys.
pub type KeySerializer<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// A serializer that renders keys with their `Debug` representation.
pub fn debug_serializer<K: fmt::Debug>() -> KeySerializer<K> {
  Arc::new(|key: &K| format!("{:?}", key))
}

/// A logical cache key paired with its lazily computed serialized form.
///
/// Equality and hashing always use the underlying `K`; the serialized string
/// is only produced when a backend asks for it, and at most once.
pub struct Key<K> {
  key: K,
  serializer: KeySerializer<K>,
  serialized: OnceCell<Arc<str>>,
}

impl<K> Key<K> {
  pub fn new(key: K, serializer: KeySerializer<K>) -> Self {
    Self {
      key,
      serializer,
      serialized: OnceCell::new(),
    }
  }

  /// The logical key.
  #[inline]
  pub fn key(&self) -> &K {
    &self.key
  }

  pub fn into_inner(self) -> K {
    self.key
  }

  /// The serialized form, computed on first use.
  pub fn as_str(&self) -> &str {
    self
      .serialized
      .get_or_init(|| Arc::from((self.serializer)(&self.key)))
  }

  /// Whether the serialized form has already been computed.
  pub fn is_serialized(&self) -> bool {
    self.serialized.get().is_some()
  }
}

impl<K: Clone> Clone for Key<K> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      serializer: self.serializer.clone(),
      serialized: self.serialized.clone(),
    }
  }
}

impl<K: PartialEq> PartialEq for Key<K> {
  fn eq(&self, other: &Self) -> bool {
    self.key == other.key
  }
}

impl<K: Eq> Eq for Key<K> {}

impl<K: Hash> Hash for Key<K> {
  fn hash<S: Hasher>(&self, state: &mut S) {
    self.key.hash(state);
  }
}

impl<K: fmt::Debug> fmt::Debug for Key<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Key").field(&self.key).finish()
  }
}

impl<K> fmt::Display for Key<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
