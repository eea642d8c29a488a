use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// The internal state of an in-flight fetch.
enum State<T> {
  Computing,
  Complete(T),
}

struct Inner<T> {
  state: State<T>,
  waiters: VecDeque<Waker>,
}

/// A result being computed for one key, awaited by every caller that asked
/// for that key while it was in flight.
pub(crate) struct LoadFuture<T> {
  inner: Mutex<Inner<T>>,
}

impl<T> LoadFuture<T> {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the future with a result, waking all waiters.
  pub(crate) fn complete(&self, result: T) {
    let waiters = {
      let mut inner = self.inner.lock();
      inner.state = State::Complete(result);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters {
      waker.wake();
    }
  }
}

impl<T: Clone> Future for &LoadFuture<T> {
  type Output = T;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Computing => {
        if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
          inner.waiters.push_back(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn every_waiter_observes_the_same_result() {
    let load = Arc::new(LoadFuture::<Result<u32, String>>::new());

    let waiter = {
      let load = load.clone();
      std::thread::spawn(move || futures_executor::block_on(&*load))
    };
    load.complete(Err("boom".to_string()));

    assert_eq!(waiter.join().unwrap(), Err("boom".to_string()));
    assert_eq!(futures_executor::block_on(&*load), Err("boom".to_string()));
  }
}
