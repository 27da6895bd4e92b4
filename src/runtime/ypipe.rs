//! Lock-free single-producer/single-consumer pipe.
//!
//! A `ypipe` wraps a [`YQueue`](super::yqueue::YQueue) with the
//! write/flush/check-read handshake that lets a producer batch items and
//! publish them to the consumer with a single atomic operation. The shared
//! cursor `c` is the only word both threads touch: it holds the publication
//! boundary as a tagged `u64` (`pos + 1`, with `0` meaning "consumer
//! asleep"). When `flush` finds the consumer asleep it force-publishes and
//! returns `false`, telling the caller to wake the consumer out of band
//! (the mailbox signaler, an `ActivateRead` command, ...).
//!
//! The pipe is handed out as a split [`YPipeWriter`]/[`YPipeReader`] pair.
//! Each handle is `Send` but not `Sync` and takes `&mut self`, so the
//! one-thread-per-side contract is enforced by the type system rather than
//! by a comment.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::yqueue::YQueue;

// `pos + 1`; 0 is the consumer-asleep sentinel.
const ASLEEP: u64 = 0;

#[inline]
fn encode(pos: u64) -> u64 {
  pos + 1
}

struct YPipeInner<T, const N: usize> {
  queue: YQueue<T, N>,
  // Producer-private cursors: first unflushed item / publication candidate.
  w: Cell<u64>,
  f: Cell<u64>,
  // Consumer-private cursor: items below `r` are known readable.
  r: Cell<u64>,
  // Shared publication boundary, tagged (see module docs).
  c: AtomicU64,
}

// SAFETY: the split handles guarantee one producer thread and one consumer
// thread. Producer-only state (`w`, `f`, queue end) and consumer-only state
// (`r`, queue begin) are disjoint; the handshake over `c` orders every
// cross-thread access to queue slots.
unsafe impl<T: Send, const N: usize> Send for YPipeInner<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for YPipeInner<T, N> {}

/// Creates a connected writer/reader pair over one fresh queue.
pub(crate) fn ypipe<T: Send, const N: usize>() -> (YPipeWriter<T, N>, YPipeReader<T, N>) {
  let inner = Arc::new(YPipeInner {
    queue: YQueue::new(),
    w: Cell::new(0),
    f: Cell::new(0),
    r: Cell::new(0),
    c: AtomicU64::new(encode(0)),
  });
  (
    YPipeWriter {
      inner: inner.clone(),
      _not_sync: PhantomData,
    },
    YPipeReader {
      inner,
      _not_sync: PhantomData,
    },
  )
}

/// Producer half. `Send`, deliberately `!Sync`.
pub(crate) struct YPipeWriter<T, const N: usize> {
  inner: Arc<YPipeInner<T, N>>,
  _not_sync: PhantomData<Cell<()>>,
}

/// Consumer half. `Send`, deliberately `!Sync`.
pub(crate) struct YPipeReader<T, const N: usize> {
  inner: Arc<YPipeInner<T, N>>,
  _not_sync: PhantomData<Cell<()>>,
}

impl<T: Send, const N: usize> YPipeWriter<T, N> {
  /// Appends `value`. With `incomplete = true` the item (and everything
  /// after the last complete write) stays invisible to the consumer until
  /// a later complete write moves the flush boundary past it.
  pub(crate) fn write(&mut self, value: T, incomplete: bool) {
    // SAFETY: producer side; this handle is the only producer.
    let seq = unsafe { self.inner.queue.push(value) };
    if !incomplete {
      self.inner.f.set(seq + 1);
    }
  }

  /// Rolls back the most recently written, not yet completed item.
  /// Returns `None` once everything written has been completed.
  pub(crate) fn unwrite(&mut self) -> Option<T> {
    let inner = &*self.inner;
    if inner.f.get() == inner.queue.end_seq() {
      return None;
    }
    // SAFETY: producer side; the back item is past the flush boundary so
    // the consumer cannot be touching it.
    Some(unsafe { inner.queue.unpush() })
  }

  /// Publishes all complete writes to the consumer.
  ///
  /// Returns `false` if the consumer had gone to sleep: the items are
  /// published anyway, but the caller must deliver a wake-up.
  pub(crate) fn flush(&mut self) -> bool {
    let inner = &*self.inner;
    let w = inner.w.get();
    let f = inner.f.get();
    if w == f {
      return true;
    }
    match inner
      .c
      .compare_exchange(encode(w), encode(f), Ordering::Release, Ordering::Relaxed)
    {
      Ok(_) => {
        inner.w.set(f);
        true
      }
      Err(actual) => {
        // The consumer swapped in the asleep sentinel. Publish over it and
        // report that a wake-up is owed.
        debug_assert_eq!(actual, ASLEEP);
        inner.c.store(encode(f), Ordering::Release);
        inner.w.set(f);
        false
      }
    }
  }
}

impl<T: Send, const N: usize> YPipeReader<T, N> {
  /// Is at least one item readable? On an empty pipe this atomically parks
  /// the consumer-asleep sentinel in the shared cursor, so the producer's
  /// next `flush` knows to wake us.
  pub(crate) fn check_read(&mut self) -> bool {
    let inner = &*self.inner;
    let front = inner.queue.front_seq();
    if front < inner.r.get() {
      // Still inside the prefetched region.
      return true;
    }
    match inner
      .c
      .compare_exchange(encode(front), ASLEEP, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(_) => {
        // Nothing published beyond what we already consumed; we are now
        // registered as asleep.
        inner.r.set(front);
        false
      }
      Err(ASLEEP) => {
        // Already asleep from an earlier miss.
        inner.r.set(front);
        false
      }
      Err(published) => {
        // Adopt the producer's boundary; it is strictly past `front`.
        inner.r.set(published - 1);
        true
      }
    }
  }

  /// Pops the next item, or `None` if nothing is readable.
  pub(crate) fn read(&mut self) -> Option<T> {
    if !self.check_read() {
      return None;
    }
    // SAFETY: consumer side; check_read just proved the front item is
    // inside the published region.
    Some(unsafe { self.inner.queue.pop() })
  }

  /// Applies `pred` to the next readable item without consuming it.
  /// The pipe must be readable; probing an empty pipe is a protocol bug.
  pub(crate) fn probe(&mut self, pred: impl FnOnce(&T) -> bool) -> bool {
    let readable = self.check_read();
    assert!(readable, "probe on an empty pipe");
    // SAFETY: consumer side, front is readable per check above.
    pred(unsafe { self.inner.queue.front() })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use std::time::Duration;

  type Pair = (YPipeWriter<u64, 4>, YPipeReader<u64, 4>);

  fn pipe() -> Pair {
    ypipe::<u64, 4>()
  }

  #[test]
  fn reads_return_writes_in_order() {
    let (mut w, mut r) = pipe();
    for i in 0..10 {
      w.write(i, false);
    }
    w.flush();
    for i in 0..10 {
      assert_eq!(r.read(), Some(i));
    }
    assert_eq!(r.read(), None);
  }

  #[test]
  fn incomplete_writes_stay_invisible_until_completed() {
    let (mut w, mut r) = pipe();
    w.write(1, true);
    w.write(2, true);
    w.flush();
    assert_eq!(r.read(), None, "incomplete items must not publish");
    w.write(3, false);
    w.flush();
    assert_eq!(r.read(), Some(1));
    assert_eq!(r.read(), Some(2));
    assert_eq!(r.read(), Some(3));
  }

  #[test]
  fn unwrite_rolls_back_incomplete_items_only() {
    let (mut w, mut r) = pipe();
    w.write(1, false);
    assert!(w.unwrite().is_none(), "complete items are not reclaimable");
    w.write(2, true);
    w.write(3, true);
    assert_eq!(w.unwrite(), Some(3));
    assert_eq!(w.unwrite(), Some(2));
    assert!(w.unwrite().is_none());
    w.flush();
    assert_eq!(r.read(), Some(1));
    assert_eq!(r.read(), None);
  }

  #[test]
  fn flush_reports_sleeping_reader_exactly_once() {
    let (mut w, mut r) = pipe();
    // Drain while empty: the reader parks the asleep sentinel.
    assert_eq!(r.read(), None);
    w.write(7, false);
    assert!(!w.flush(), "reader was asleep, wake-up is owed");
    // Published despite the failed CAS.
    assert_eq!(r.read(), Some(7));
    w.write(8, false);
    assert!(w.flush(), "reader is active again");
  }

  #[test]
  fn probe_peeks_without_consuming() {
    let (mut w, mut r) = pipe();
    w.write(42, false);
    w.flush();
    assert!(r.probe(|v| *v == 42));
    assert_eq!(r.read(), Some(42));
  }

  #[test]
  fn cross_thread_fifo_stress() {
    const COUNT: u64 = 100_000;
    let (mut w, mut r) = ypipe::<u64, 256>();
    let producer = thread::spawn(move || {
      for i in 0..COUNT {
        w.write(i, false);
        if i % 17 == 0 {
          w.flush();
        }
      }
      w.flush();
    });
    let mut expected = 0;
    while expected < COUNT {
      match r.read() {
        Some(v) => {
          assert_eq!(v, expected);
          expected += 1;
        }
        None => thread::sleep(Duration::from_micros(10)),
      }
    }
    producer.join().unwrap();
  }
}
