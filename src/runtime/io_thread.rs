//! Dedicated execution unit for engine-side objects.
//!
//! An I/O thread is a mailbox plus a poller worker: every wake-up drains
//! the mailbox fully before yielding back to the multiplexer. Objects
//! living on an I/O thread (sessions, listeners, test fixtures) receive
//! their commands on this thread.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::ctx::Context;
use crate::runtime::mailbox::{mailbox_with_signaler, Mailbox, MailboxSender};
use crate::runtime::object::{Object, ObjectCore};
use crate::runtime::poller::{PollEvents, Poller};

pub(crate) struct IoThread {
  core: ObjectCore,
  poller: Arc<Poller>,
  // Drained only by the poller worker, via in_event.
  mailbox: Mutex<Mailbox>,
  sender: MailboxSender,
}

impl IoThread {
  pub(crate) fn new(ctx: Context, tid: u32) -> Arc<Self> {
    let poller = Arc::new(Poller::new());
    let (sender, mailbox) = mailbox_with_signaler(poller.wake_source());
    Arc::new(IoThread {
      core: ObjectCore::new(ctx, tid),
      poller,
      mailbox: Mutex::new(mailbox),
      sender,
    })
  }

  pub(crate) fn sender(&self) -> MailboxSender {
    self.sender.clone()
  }

  pub(crate) fn get_load(&self) -> usize {
    self.poller.get_load()
  }

  pub(crate) fn start(self: &Arc<Self>) {
    let weak = Arc::downgrade(self);
    let events: Weak<dyn PollEvents> = weak;
    self
      .poller
      .start(events, &format!("ozmq-io-{}", self.core.tid));
  }

  /// Stops the worker, joins it and discards whatever is left in the
  /// mailbox: an undelivered command holds an `Arc` to its destination
  /// and would keep this thread's state alive past teardown.
  pub(crate) fn stop(self: &Arc<Self>) {
    self.poller.stop();
    let mut mailbox = self.mailbox.lock();
    while mailbox.try_recv().is_some() {}
  }
}

impl Object for IoThread {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn process_stop(&self) {
    debug!(tid = self.core.tid, "io thread stopping");
    // The worker checks this flag right after the current drain.
    self.poller.request_stop();
  }
}

impl PollEvents for IoThread {
  fn in_event(&self) {
    // Drain fully; the wake source is shared with nothing else, so every
    // published command is picked up here.
    let mut mailbox = self.mailbox.lock();
    while let Some(cmd) = mailbox.try_recv() {
      let destination = cmd
        .destination
        .expect("io thread commands carry a destination");
      destination.process_command(cmd.kind);
    }
  }

  fn timer_event(&self, _id: u64) {
    // No timer clients without transports.
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::command::{Command, CommandKind};

  #[test]
  fn stop_releases_undelivered_commands() {
    let ctx = Context::new();
    let io_thread = IoThread::new(ctx, 2);
    io_thread.start();
    // Stop is safe in both outcomes of the race: dispatched it halts the
    // worker, undelivered it is discarded by stop().
    let destination: Arc<dyn Object> = io_thread.clone();
    io_thread.sender().send(Command {
      destination: Some(destination),
      kind: CommandKind::Stop,
    });
    io_thread.stop();
    // No command may still pin the thread through its destination Arc.
    assert_eq!(Arc::strong_count(&io_thread), 1);
  }
}
