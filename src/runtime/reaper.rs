//! Asynchronous socket teardown.
//!
//! `close()` hands a socket to the reaper, decoupling user-visible close
//! latency from the actual termination handshake. The reaper multiplexes
//! its own mailbox and every adopted socket's mailbox over one wake
//! source (the sockets' forward signalers), drains them on each wake-up,
//! and reports `Done` to the terminating context thread once the last
//! socket is gone.
//!
//! The command loop here is the one deliberate catch-and-ignore boundary
//! in the crate: a panicking socket must not stall global shutdown.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::ctx::Context;
use crate::runtime::mailbox::{mailbox_with_signaler, Mailbox, MailboxSender};
use crate::runtime::object::{Object, ObjectCore};
use crate::runtime::signaler::Signaler;
use crate::socket::core::SocketCore;

#[derive(Default)]
struct ReaperState {
  sockets: Vec<Arc<SocketCore>>,
  terminating: bool,
  forced: bool,
}

pub(crate) struct Reaper {
  core: ObjectCore,
  wake: Arc<Signaler>,
  mailbox: Mutex<Mailbox>,
  sender: MailboxSender,
  state: Mutex<ReaperState>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
  pub(crate) fn new(ctx: Context, tid: u32) -> Arc<Self> {
    let wake = Arc::new(Signaler::new());
    let (sender, mailbox) = mailbox_with_signaler(wake.clone());
    Arc::new(Reaper {
      core: ObjectCore::new(ctx, tid),
      wake,
      mailbox: Mutex::new(mailbox),
      sender,
      state: Mutex::new(ReaperState::default()),
      worker: Mutex::new(None),
    })
  }

  pub(crate) fn sender(&self) -> MailboxSender {
    self.sender.clone()
  }

  pub(crate) fn start(self: &Arc<Self>) {
    let reaper = self.clone();
    let handle = std::thread::Builder::new()
      .name("ozmq-reaper".into())
      .spawn(move || reaper.run())
      .expect("spawning reaper thread");
    *self.worker.lock() = Some(handle);
  }

  /// Joins the worker after it exited (it exits by sending `Done`).
  pub(crate) fn join(&self) {
    if let Some(handle) = self.worker.lock().take() {
      let _ = handle.join();
    }
  }

  fn run(self: Arc<Self>) {
    debug!("reaper thread started");
    loop {
      // Drain our own mailbox. Dispatch is shielded: one misbehaving
      // socket must not take global shutdown down with it.
      loop {
        let cmd = self.mailbox.lock().try_recv();
        let Some(cmd) = cmd else { break };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
          let destination = cmd
            .destination
            .expect("reaper commands carry a destination");
          destination.process_command(cmd.kind);
        }));
        if outcome.is_err() {
          error!("reaper discarded a panic from command processing");
        }
      }
      // Drive every socket under reap: their mailbox activity routed us
      // the wake-up, the commands themselves sit in their mailboxes.
      let sockets = self.state.lock().sockets.clone();
      for socket in sockets {
        let outcome = catch_unwind(AssertUnwindSafe(|| socket.process_pending_commands()));
        if outcome.is_err() {
          error!(
            socket_handle = socket.handle(),
            "reaper discarded a panic from socket teardown"
          );
        }
      }
      let finished = {
        let st = self.state.lock();
        st.forced || (st.terminating && st.sockets.is_empty())
      };
      if finished {
        break;
      }
      self.wake.wait(None);
    }
    debug!("reaper thread finished, signalling done");
    self.send_done();
  }
}

impl Object for Reaper {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn process_stop(&self) {
    self.state.lock().terminating = true;
  }

  fn process_force_stop(&self) {
    debug!("reaper force-stopped; abandoning pending sockets");
    self.state.lock().forced = true;
  }

  fn process_reap(&self, socket: Arc<SocketCore>) {
    debug!(socket_handle = socket.handle(), "reaper adopted socket");
    // Route the socket's future mailbox activity to our wake source,
    // then kick off its termination on this thread.
    socket.command_sender().set_forward_signaler(self.wake.clone());
    self.state.lock().sockets.push(socket.clone());
    socket.start_reaping();
  }

  fn process_reaped(&self, handle: u32) {
    let mut st = self.state.lock();
    st.sockets.retain(|s| s.handle() != handle);
    debug!(socket_handle = handle, remaining = st.sockets.len(), "socket reaped");
  }
}
