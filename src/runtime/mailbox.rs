//! Per-thread command inboxes.
//!
//! `Mailbox` wraps one command `ypipe` with a [`Signaler`]: senders from
//! any thread serialize on an internal lock, the single receiver reads
//! lock-free and only falls back to the signaler when the pipe runs dry.
//! The active/passive flag lets a busy receiver skip the wake-wait
//! entirely.
//!
//! `MailboxSafe` is the multi-reader variant guarded by one monitor; the
//! context's terminator mailbox uses it because `Context::term` may be
//! called from any thread, concurrently.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::ZmqResult;
use crate::runtime::command::Command;
use crate::runtime::signaler::Signaler;
use crate::runtime::ypipe::{ypipe, YPipeReader, YPipeWriter};
use crate::runtime::yqueue::COMMAND_PIPE_GRANULARITY;

struct MailboxShared {
  // Multiple senders are possible; the queue itself only tolerates one.
  writer: Mutex<YPipeWriter<Command, COMMAND_PIPE_GRANULARITY>>,
  signaler: Arc<Signaler>,
  // Extra wake target, prodded alongside the signaler. The reaper points
  // this at its own wake source for every socket it adopts, multiplexing
  // many mailboxes onto one waiting thread.
  forward: Mutex<Option<Arc<Signaler>>>,
}

/// Cloneable sending half.
#[derive(Clone)]
pub(crate) struct MailboxSender {
  shared: Arc<MailboxShared>,
}

/// Receiving half; owned by exactly one thread at a time.
pub(crate) struct Mailbox {
  reader: YPipeReader<Command, COMMAND_PIPE_GRANULARITY>,
  active: bool,
  shared: Arc<MailboxShared>,
}

/// Creates a mailbox with its own private wake signaler.
pub(crate) fn mailbox() -> (MailboxSender, Mailbox) {
  mailbox_with_signaler(Arc::new(Signaler::new()))
}

/// Creates a mailbox waking through a caller-supplied signaler. Used by
/// the reaper, which shares one wake source across many mailboxes (and
/// therefore drains with `try_recv`, never the asserting `recv`).
pub(crate) fn mailbox_with_signaler(signaler: Arc<Signaler>) -> (MailboxSender, Mailbox) {
  let (writer, reader) = ypipe::<Command, COMMAND_PIPE_GRANULARITY>();
  let shared = Arc::new(MailboxShared {
    writer: Mutex::new(writer),
    signaler,
    forward: Mutex::new(None),
  });
  (
    MailboxSender {
      shared: shared.clone(),
    },
    Mailbox {
      reader,
      active: true,
      shared,
    },
  )
}

impl MailboxSender {
  /// Enqueues a command. Never fails and never blocks on the receiver;
  /// wakes it if the flush found it asleep.
  pub(crate) fn send(&self, cmd: Command) {
    let receiver_awake = {
      let mut writer = self.shared.writer.lock();
      writer.write(cmd, false);
      writer.flush()
    };
    if !receiver_awake {
      self.shared.signaler.signal();
      let forward = self.shared.forward.lock().clone();
      if let Some(forward) = forward {
        forward.signal();
      }
    }
  }

  /// Routes future wake-ups to `target` as well.
  pub(crate) fn set_forward_signaler(&self, target: Arc<Signaler>) {
    *self.shared.forward.lock() = Some(target);
  }
}

impl Mailbox {
  /// Receives one command, waiting up to `timeout` (`None` = forever).
  /// Timeout expiry is `Ok(None)`, not an error.
  pub(crate) fn recv(&mut self, timeout: Option<Duration>) -> ZmqResult<Option<Command>> {
    if self.active {
      if let Some(cmd) = self.reader.read() {
        return Ok(Some(cmd));
      }
      // The failed read parked the consumer-asleep sentinel; the next
      // flush into this mailbox will raise the signaler.
      self.active = false;
    }
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
      let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
      if !self.shared.signaler.wait(wait) {
        return Ok(None);
      }
      // A wake-up usually follows a publication over the asleep sentinel,
      // but the latch can be stale: `try_recv` reads past the sentinel
      // without consuming the wake-up. Absorb the miss and keep waiting.
      match self.reader.read() {
        Some(cmd) => {
          self.active = true;
          return Ok(Some(cmd));
        }
        None => continue,
      }
    }
  }

  /// Non-waiting read, for receivers multiplexing several mailboxes over
  /// one external signaler.
  pub(crate) fn try_recv(&mut self) -> Option<Command> {
    self.reader.read()
  }

  /// A fresh sender for this mailbox.
  pub(crate) fn sender(&self) -> MailboxSender {
    MailboxSender {
      shared: self.shared.clone(),
    }
  }
}

// --- Thread-safe variant ---

/// Multi-reader, multi-writer mailbox on one monitor.
#[derive(Default)]
pub(crate) struct MailboxSafe {
  sync: Mutex<VecDeque<Command>>,
  cond: Condvar,
}

impl MailboxSafe {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn send(&self, cmd: Command) {
    self.sync.lock().push_back(cmd);
    self.cond.notify_one();
  }

  /// Same timeout semantics as [`Mailbox::recv`].
  pub(crate) fn recv(&self, timeout: Option<Duration>) -> ZmqResult<Option<Command>> {
    let mut queue = self.sync.lock();
    match timeout {
      None => {
        while queue.is_empty() {
          self.cond.wait(&mut queue);
        }
      }
      Some(timeout) => {
        if queue.is_empty() && !timeout.is_zero() {
          let deadline = std::time::Instant::now() + timeout;
          while queue.is_empty() {
            if self.cond.wait_until(&mut queue, deadline).timed_out() {
              break;
            }
          }
        }
      }
    }
    Ok(queue.pop_front())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::command::CommandKind;
  use std::thread;

  fn stop() -> Command {
    Command {
      destination: None,
      kind: CommandKind::Stop,
    }
  }

  #[test]
  fn recv_times_out_with_none() {
    let (_tx, mut rx) = mailbox();
    let got = rx.recv(Some(Duration::from_millis(10))).unwrap();
    assert!(got.is_none());
  }

  #[test]
  fn send_wakes_blocked_receiver() {
    let (tx, mut rx) = mailbox();
    // Park the receiver first so the send takes the wake path.
    assert!(rx.recv(Some(Duration::from_millis(5))).unwrap().is_none());
    let sender = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      tx.send(stop());
    });
    let got = rx.recv(None).unwrap();
    assert!(matches!(got, Some(Command { kind: CommandKind::Stop, .. })));
    sender.join().unwrap();
  }

  #[test]
  fn commands_from_one_sender_arrive_in_order() {
    let (tx, mut rx) = mailbox();
    for i in 0..100u64 {
      tx.send(Command {
        destination: None,
        kind: CommandKind::ActivateWrite { msgs_read: i },
      });
    }
    for i in 0..100u64 {
      match rx.recv(None).unwrap().unwrap().kind {
        CommandKind::ActivateWrite { msgs_read } => assert_eq!(msgs_read, i),
        other => panic!("unexpected {}", other.variant_name()),
      }
    }
  }

  #[test]
  fn concurrent_senders_all_delivered() {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 1000;
    let (tx, mut rx) = mailbox();
    let handles: Vec<_> = (0..SENDERS)
      .map(|_| {
        let tx = tx.clone();
        thread::spawn(move || {
          for _ in 0..PER_SENDER {
            tx.send(stop());
          }
        })
      })
      .collect();
    let mut received = 0;
    while received < SENDERS * PER_SENDER {
      if rx.recv(Some(Duration::from_millis(100))).unwrap().is_some() {
        received += 1;
      }
    }
    for h in handles {
      h.join().unwrap();
    }
  }

  #[test]
  fn forward_signaler_is_prodded_on_wake_path() {
    let wake = Arc::new(Signaler::new());
    let (tx, mut rx) = mailbox();
    tx.set_forward_signaler(wake.clone());
    // Receiver asleep: the send must prod the forward target too.
    assert!(rx.recv(Some(Duration::from_millis(5))).unwrap().is_none());
    tx.send(stop());
    assert!(wake.wait(Some(Duration::from_millis(100))));
    assert!(rx.try_recv().is_some());
  }

  #[test]
  fn stale_wake_after_try_recv_drain_reads_as_timeout() {
    let (tx, mut rx) = mailbox();
    // The miss parks the asleep sentinel without touching the signaler.
    assert!(rx.try_recv().is_none());
    tx.send(stop());
    // Fast-path drain leaves the wake-up latch raised with nothing behind it.
    assert!(rx.try_recv().is_some());
    let got = rx.recv(Some(Duration::from_millis(20))).unwrap();
    assert!(got.is_none(), "stale latch must not surface as a command");
    // Later publications still wake the receiver normally.
    tx.send(stop());
    assert!(rx.recv(Some(Duration::from_millis(500))).unwrap().is_some());
  }

  #[test]
  fn safe_mailbox_supports_concurrent_readers() {
    let mb = Arc::new(MailboxSafe::new());
    let readers: Vec<_> = (0..2)
      .map(|_| {
        let mb = mb.clone();
        thread::spawn(move || mb.recv(None).unwrap().is_some())
      })
      .collect();
    thread::sleep(Duration::from_millis(10));
    mb.send(stop());
    mb.send(stop());
    for r in readers {
      assert!(r.join().unwrap());
    }
  }

  #[test]
  fn safe_mailbox_recv_times_out_with_none() {
    let mb = MailboxSafe::new();
    assert!(mb.recv(Some(Duration::from_millis(10))).unwrap().is_none());
    mb.send(stop());
    assert!(mb.recv(Some(Duration::ZERO)).unwrap().is_some());
  }
}
