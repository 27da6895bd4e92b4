//! Chunked unbounded FIFO underlying the lock-free pipes.
//!
//! The queue is a singly linked chain of fixed-granularity chunks. The
//! producer only ever touches the `end_*` fields, the consumer only the
//! `begin_*` fields; the one retired chunk cached in `spare_chunk` crosses
//! between the two sides through an `AtomicPtr`, so steady-state push/pop
//! never hits the allocator. All cross-thread synchronization is the
//! caller's problem (see `ypipe`); the queue itself only guarantees that
//! the two sides' state is disjoint.

use std::cell::Cell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Chunk granularity for command queues. Commands are rare and small.
pub(crate) const COMMAND_PIPE_GRANULARITY: usize = 16;
/// Chunk granularity for message queues. Messages are the hot path.
pub(crate) const MESSAGE_PIPE_GRANULARITY: usize = 256;

struct Chunk<T, const N: usize> {
  values: [MaybeUninit<T>; N],
  prev: *mut Chunk<T, N>,
  next: *mut Chunk<T, N>,
}

fn alloc_chunk<T, const N: usize>() -> *mut Chunk<T, N> {
  // SAFETY: an array of MaybeUninit does not require initialization.
  let values = unsafe { MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init() };
  Box::into_raw(Box::new(Chunk {
    values,
    prev: ptr::null_mut(),
    next: ptr::null_mut(),
  }))
}

/// Unbounded FIFO of `T` in chunks of `N`.
///
/// Items are addressed by an absolute, monotonically increasing sequence
/// number: the first item ever pushed is seq 0. `front_seq`/`end_seq`
/// expose the live range `[front_seq, end_seq)`; `ypipe` does all of its
/// cursor arithmetic in this sequence space.
///
/// The `unsafe fn`s split into a producer contract (`push`, `unpush`,
/// `end_seq`) and a consumer contract (`pop`, `front`, `front_seq`).
/// Exactly one thread at a time may act as producer, and one as consumer;
/// a side must only touch items the handshake in `ypipe` has handed to it.
pub(crate) struct YQueue<T, const N: usize> {
  // Consumer side.
  begin_chunk: Cell<*mut Chunk<T, N>>,
  begin_pos: Cell<usize>,
  begin_seq: Cell<u64>,
  // Producer side.
  end_chunk: Cell<*mut Chunk<T, N>>,
  end_pos: Cell<usize>,
  end_seq: Cell<u64>,
  // One retired chunk kept around for reuse; the only field both sides touch.
  spare_chunk: AtomicPtr<Chunk<T, N>>,
}

impl<T, const N: usize> YQueue<T, N> {
  pub(crate) fn new() -> Self {
    assert!(N > 0);
    let chunk = alloc_chunk::<T, N>();
    Self {
      begin_chunk: Cell::new(chunk),
      begin_pos: Cell::new(0),
      begin_seq: Cell::new(0),
      end_chunk: Cell::new(chunk),
      end_pos: Cell::new(0),
      end_seq: Cell::new(0),
      spare_chunk: AtomicPtr::new(ptr::null_mut()),
    }
  }

  /// Sequence number of the front item. Consumer side.
  pub(crate) fn front_seq(&self) -> u64 {
    self.begin_seq.get()
  }

  /// Sequence number the next push will get. Producer side.
  pub(crate) fn end_seq(&self) -> u64 {
    self.end_seq.get()
  }

  /// Appends `value` and returns its sequence number.
  ///
  /// SAFETY: producer side only.
  pub(crate) unsafe fn push(&self, value: T) -> u64 {
    let chunk = self.end_chunk.get();
    let pos = self.end_pos.get();
    // SAFETY: `chunk` is the live end chunk and `pos < N`; the slot is
    // unoccupied (past every live item).
    ptr::addr_of_mut!((*chunk).values[pos]).cast::<T>().write(value);
    let seq = self.end_seq.get();
    self.end_seq.set(seq + 1);
    if pos + 1 == N {
      // Chunk full: grab the spare if the consumer left one, else allocate.
      let spare = self.spare_chunk.swap(ptr::null_mut(), Ordering::Acquire);
      let next = if spare.is_null() { alloc_chunk::<T, N>() } else { spare };
      (*next).prev = chunk;
      (*next).next = ptr::null_mut();
      (*chunk).next = next;
      self.end_chunk.set(next);
      self.end_pos.set(0);
    } else {
      self.end_pos.set(pos + 1);
    }
    seq
  }

  /// Removes and returns the most recently pushed item.
  ///
  /// SAFETY: producer side only, and the back item must not have been made
  /// visible to the consumer (it is still on the producer's side of the
  /// `ypipe` flush boundary).
  pub(crate) unsafe fn unpush(&self) -> T {
    self.end_seq.set(self.end_seq.get() - 1);
    let chunk = self.end_chunk.get();
    let pos = self.end_pos.get();
    let (chunk, pos) = if pos == 0 {
      // The end chunk holds nothing; the item lives at the tail of the
      // previous chunk. Drop the surplus chunk rather than sparing it:
      // unpush is a rollback path, not a hot path.
      let prev = (*chunk).prev;
      debug_assert!(!prev.is_null());
      (*prev).next = ptr::null_mut();
      drop(Box::from_raw(chunk));
      self.end_chunk.set(prev);
      (prev, N - 1)
    } else {
      (chunk, pos - 1)
    };
    self.end_pos.set(pos);
    ptr::addr_of!((*chunk).values[pos]).cast::<T>().read()
  }

  /// Removes and returns the front item.
  ///
  /// SAFETY: consumer side only, and the front item must be readable
  /// (handed over by the `ypipe` handshake).
  pub(crate) unsafe fn pop(&self) -> T {
    let chunk = self.begin_chunk.get();
    let pos = self.begin_pos.get();
    let value = ptr::addr_of!((*chunk).values[pos]).cast::<T>().read();
    self.begin_seq.set(self.begin_seq.get() + 1);
    if pos + 1 == N {
      // `next` exists: the producer links the successor while writing the
      // last slot of a chunk, and we just consumed that slot.
      let next = (*chunk).next;
      debug_assert!(!next.is_null());
      (*next).prev = ptr::null_mut();
      self.begin_chunk.set(next);
      self.begin_pos.set(0);
      // Retire the emptied chunk into the spare slot for the producer;
      // free whichever chunk it displaces.
      let old = self.spare_chunk.swap(chunk, Ordering::Release);
      if !old.is_null() {
        drop(Box::from_raw(old));
      }
    } else {
      self.begin_pos.set(pos + 1);
    }
    value
  }

  /// Borrows the front item without consuming it.
  ///
  /// SAFETY: consumer side only; same readability contract as `pop`.
  pub(crate) unsafe fn front(&self) -> &T {
    &*ptr::addr_of!((*self.begin_chunk.get()).values[self.begin_pos.get()]).cast::<T>()
  }
}

impl<T, const N: usize> Drop for YQueue<T, N> {
  fn drop(&mut self) {
    // &mut self: both sides are quiesced, all items are ours to drop.
    unsafe {
      while self.begin_seq.get() != self.end_seq.get() {
        drop(self.pop());
      }
      let mut chunk = self.begin_chunk.get();
      while !chunk.is_null() {
        let next = (*chunk).next;
        drop(Box::from_raw(chunk));
        chunk = next;
      }
      let spare = self.spare_chunk.swap(ptr::null_mut(), Ordering::Relaxed);
      if !spare.is_null() {
        drop(Box::from_raw(spare));
      }
    }
  }
}
