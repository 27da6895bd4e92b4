//! Minimal proactor collaborator driving one worker thread.
//!
//! The kernel treats event multiplexing as a black box: a poller owns one
//! OS thread, one wake source and an id-keyed timer set, and reports
//! everything through the [`PollEvents`] callbacks. An I/O thread is a
//! thin adapter over this.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::runtime::signaler::Signaler;

/// Completion callbacks a poller client implements.
pub(crate) trait PollEvents: Send + Sync {
  /// The wake source fired (for an I/O thread: mailbox activity).
  fn in_event(&self);
  /// Timer `id` expired.
  fn timer_event(&self, id: u64);
}

#[derive(Default)]
struct Timers {
  // (deadline, id) keys give expiry order with distinct entries per id.
  deadlines: BTreeMap<(Instant, u64), ()>,
}

pub(crate) struct Poller {
  wake: Arc<Signaler>,
  timers: Mutex<Timers>,
  stopping: AtomicBool,
  // Collaborator-reported load: wake sources registered with this poller.
  load: AtomicUsize,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
  pub(crate) fn new() -> Self {
    Self {
      wake: Arc::new(Signaler::new()),
      timers: Mutex::new(Timers::default()),
      stopping: AtomicBool::new(false),
      load: AtomicUsize::new(0),
      worker: Mutex::new(None),
    }
  }

  /// The signaler that wakes this poller's thread. A client registers it
  /// as its mailbox wake source; each registration counts towards load.
  pub(crate) fn wake_source(&self) -> Arc<Signaler> {
    self.load.fetch_add(1, Ordering::Relaxed);
    self.wake.clone()
  }

  /// Load metric used for least-loaded I/O thread selection.
  pub(crate) fn get_load(&self) -> usize {
    self.load.load(Ordering::Relaxed)
  }

  /// Schedules `timer_event(id)` after `after`.
  pub(crate) fn add_timer(&self, after: Duration, id: u64) {
    self
      .timers
      .lock()
      .deadlines
      .insert((Instant::now() + after, id), ());
    self.wake.signal();
  }

  /// Removes every pending timer with `id`.
  pub(crate) fn cancel_timer(&self, id: u64) {
    self
      .timers
      .lock()
      .deadlines
      .retain(|(_, timer_id), ()| *timer_id != id);
  }

  /// Spawns the worker loop delivering events to `events`. The poller
  /// must already live in an `Arc`; the worker holds a clone.
  pub(crate) fn start(self: &Arc<Self>, events: Weak<dyn PollEvents>, name: &str) {
    let poller = self.clone();
    let handle = std::thread::Builder::new()
      .name(name.to_string())
      .spawn(move || poller.run(events))
      .expect("spawning poller worker");
    *self.worker.lock() = Some(handle);
  }

  fn run(self: Arc<Self>, events: Weak<dyn PollEvents>) {
    debug!(thread = ?std::thread::current().name(), "poller worker started");
    loop {
      let timeout = self
        .next_deadline()
        .map(|deadline| deadline.saturating_duration_since(Instant::now()));
      let signaled = self.wake.wait(timeout);
      if self.stopping.load(Ordering::Acquire) {
        break;
      }
      let Some(events) = events.upgrade() else { break };
      if signaled {
        events.in_event();
      }
      self.fire_expired(&events);
    }
    debug!(thread = ?std::thread::current().name(), "poller worker exiting");
  }

  fn next_deadline(&self) -> Option<Instant> {
    self
      .timers
      .lock()
      .deadlines
      .keys()
      .next()
      .map(|(deadline, _)| *deadline)
  }

  fn fire_expired(&self, events: &Arc<dyn PollEvents>) {
    loop {
      let due = {
        let mut timers = self.timers.lock();
        let now = Instant::now();
        match timers.deadlines.keys().next().copied() {
          Some(key) if key.0 <= now => {
            timers.deadlines.remove(&key);
            Some(key.1)
          }
          _ => None,
        }
      };
      match due {
        Some(id) => events.timer_event(id),
        None => break,
      }
    }
  }

  /// Flags the worker to exit after its current drain. Safe to call from
  /// the worker itself.
  pub(crate) fn request_stop(&self) {
    self.stopping.store(true, Ordering::Release);
    self.wake.signal();
  }

  /// Signals the worker to exit and joins it. Idempotent; must not be
  /// called from the worker thread.
  pub(crate) fn stop(&self) {
    self.request_stop();
    if let Some(handle) = self.worker.lock().take() {
      let _ = handle.join();
    }
  }
}
