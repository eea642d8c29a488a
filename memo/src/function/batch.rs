#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How keys are spread across sub-batches when a fetch exceeds the maximum batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BatchBehaviour {
  /// Use as few batches as possible and make their sizes differ by at most one.
  #[default]
  FillBatchesEvenly,
  /// Fill every batch to the maximum before starting the next; the last takes the remainder.
  FillEachBatchBeforeStartingNext,
}

/// Splits `keys` into batches of at most `max_batch_size` keys.
///
/// With no limit, or when the keys fit in one batch, a single batch is returned.
pub(crate) fn split_batches<K>(
  mut keys: Vec<K>,
  max_batch_size: Option<usize>,
  behaviour: BatchBehaviour,
) -> Vec<Vec<K>> {
  let max = match max_batch_size {
    Some(max) if max > 0 && keys.len() > max => max,
    _ => return if keys.is_empty() { Vec::new() } else { vec![keys] },
  };

  let batch_count = (keys.len() + max - 1) / max;
  let sizes: Vec<usize> = match behaviour {
    BatchBehaviour::FillBatchesEvenly => {
      let base = keys.len() / batch_count;
      let remainder = keys.len() % batch_count;
      (0..batch_count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
    }
    BatchBehaviour::FillEachBatchBeforeStartingNext => {
      let last = keys.len() - max * (batch_count - 1);
      (0..batch_count)
        .map(|i| if i + 1 == batch_count { last } else { max })
        .collect()
    }
  };

  let mut batches = Vec::with_capacity(batch_count);
  for size in sizes.into_iter().rev() {
    let tail = keys.split_off(keys.len() - size);
    batches.push(tail);
  }
  batches.reverse();
  batches
}
