//! Cross-thread wake-up primitive used by mailboxes and the poller.
//!
//! A boolean latch behind a mutex/condvar pair. `signal` is idempotent
//! until the next successful `wait`; a signal sent while nobody is waiting
//! is latched, not lost.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct Signaler {
  flag: Mutex<bool>,
  cond: Condvar,
}

impl Signaler {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Raises the latch and wakes any waiter.
  pub(crate) fn signal(&self) {
    let mut raised = self.flag.lock();
    if !*raised {
      *raised = true;
      self.cond.notify_all();
    }
  }

  /// Waits for the latch, consuming it on success.
  ///
  /// `None` blocks indefinitely. Returns `true` if signaled, `false` on
  /// timeout (a zero timeout polls).
  pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
    let mut raised = self.flag.lock();
    match timeout {
      None => {
        while !*raised {
          self.cond.wait(&mut raised);
        }
      }
      Some(timeout) => {
        if !*raised && !timeout.is_zero() {
          let deadline = std::time::Instant::now() + timeout;
          while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
              break;
            }
          }
        }
        if !*raised {
          return false;
        }
      }
    }
    *raised = false;
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn signal_before_wait_is_latched() {
    let s = Signaler::new();
    s.signal();
    assert!(s.wait(Some(Duration::ZERO)));
    // Consumed by the successful wait.
    assert!(!s.wait(Some(Duration::ZERO)));
  }

  #[test]
  fn wait_times_out_without_signal() {
    let s = Signaler::new();
    assert!(!s.wait(Some(Duration::from_millis(10))));
  }

  #[test]
  fn wait_wakes_on_cross_thread_signal() {
    let s = Arc::new(Signaler::new());
    let s2 = s.clone();
    let waiter = thread::spawn(move || s2.wait(None));
    thread::sleep(Duration::from_millis(20));
    s.signal();
    assert!(waiter.join().unwrap());
  }
}
