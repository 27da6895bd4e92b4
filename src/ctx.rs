//! Process-wide registry: slot table, execution units, inproc directory.
//!
//! A `Context` is a cheap cloneable handle over the shared state. The
//! slot table maps thread ids to mailboxes: slot 0 is reserved for the
//! terminator mailbox, slot 1 for the reaper, the next N for I/O threads
//! and the remainder for sockets. The table, the free-slot stack and the
//! live-socket list share one mutex; the inproc endpoint directory has
//! its own, so address lookups never serialize against socket lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ZmqError, ZmqResult};
use crate::runtime::io_thread::IoThread;
use crate::runtime::mailbox::{MailboxSafe, MailboxSender};
use crate::runtime::reaper::Reaper;
use crate::runtime::{Command, CommandKind, Object};
use crate::socket::core::SocketCore;
use crate::socket::types::{Socket, SocketType};

/// Slot index of the terminator mailbox.
pub(crate) const TERM_TID: u32 = 0;
/// Slot index of the reaper thread.
pub(crate) const REAPER_TID: u32 = 1;

// Socket ids are process-wide and monotonic across every context.
static NEXT_SOCKET_ID: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(0));

#[derive(Clone)]
struct CtxOptions {
  io_threads: usize,
  max_sockets: usize,
  blocky: bool,
  max_wm_delta: u64,
}

impl Default for CtxOptions {
  fn default() -> Self {
    Self {
      io_threads: 1,
      max_sockets: 1023,
      blocky: true,
      max_wm_delta: 1024,
    }
  }
}

/// Record in the inproc endpoint directory: the bound socket plus the
/// option snapshot connectors combine with their own.
#[derive(Clone)]
pub(crate) struct InprocEndpoint {
  pub(crate) socket: Arc<SocketCore>,
  pub(crate) sndhwm: i32,
  pub(crate) rcvhwm: i32,
}

#[derive(Default)]
struct SlotTable {
  starting: bool,
  terminating: bool,
  reaper_stop_sent: bool,
  slots: Vec<Option<MailboxSender>>,
  empty_slots: Vec<u32>,
  sockets: Vec<Arc<SocketCore>>,
}

struct CtxInner {
  slot_sync: Mutex<SlotTable>,
  // Receives the reaper's Done; safe variant because term() may be
  // entered from any thread.
  term_mailbox: MailboxSafe,
  // Serializes term() callers; true once teardown completed.
  term_sync: Mutex<bool>,
  endpoints: Mutex<HashMap<String, InprocEndpoint>>,
  opts: Mutex<CtxOptions>,
  io_threads: Mutex<Vec<Arc<IoThread>>>,
  reaper: Mutex<Option<Arc<Reaper>>>,
}

/// Handle to one ØMQ context. Clones share the same underlying state.
#[derive(Clone)]
pub struct Context {
  inner: Arc<CtxInner>,
}

impl Default for Context {
  fn default() -> Self {
    Self::new()
  }
}

impl Context {
  pub fn new() -> Self {
    info!("creating new context");
    Self {
      inner: Arc::new(CtxInner {
        slot_sync: Mutex::new(SlotTable {
          starting: true,
          ..SlotTable::default()
        }),
        term_mailbox: MailboxSafe::new(),
        term_sync: Mutex::new(false),
        endpoints: Mutex::new(HashMap::new()),
        opts: Mutex::new(CtxOptions::default()),
        io_threads: Mutex::new(Vec::new()),
        reaper: Mutex::new(None),
      }),
    }
  }

  // --- Options (fixed once the context has started) ---

  fn set_option<T>(&self, apply: impl FnOnce(&mut CtxOptions) -> T) -> ZmqResult<T> {
    let st = self.inner.slot_sync.lock();
    if !st.starting {
      return Err(ZmqError::InvalidState("context options are fixed after startup"));
    }
    Ok(apply(&mut self.inner.opts.lock()))
  }

  /// Number of I/O threads to spawn (default 1; 0 is valid for
  /// inproc-only use).
  pub fn set_io_threads(&self, count: usize) -> ZmqResult<()> {
    self.set_option(|o| o.io_threads = count)
  }

  /// Socket capacity of this context (default 1023).
  pub fn set_max_sockets(&self, count: usize) -> ZmqResult<()> {
    if count == 0 {
      return Err(ZmqError::InvalidArgument("max_sockets must be positive".into()));
    }
    self.set_option(|o| o.max_sockets = count)
  }

  /// Whether `term` waits for unclosed sockets (default true). With
  /// `false`, termination abandons whatever is still pending.
  pub fn set_blocky(&self, blocky: bool) -> ZmqResult<()> {
    self.set_option(|o| o.blocky = blocky)
  }

  /// Gap between a pipe's high and low watermark for large queues
  /// (default 1024). Tunable policy; only `lwm < hwm` is load-bearing.
  pub fn set_max_wm_delta(&self, delta: u64) -> ZmqResult<()> {
    if delta == 0 {
      return Err(ZmqError::InvalidArgument("max_wm_delta must be positive".into()));
    }
    self.set_option(|o| o.max_wm_delta = delta)
  }

  pub fn io_threads(&self) -> usize {
    self.inner.opts.lock().io_threads
  }

  pub fn max_sockets(&self) -> usize {
    self.inner.opts.lock().max_sockets
  }

  pub fn blocky(&self) -> bool {
    self.inner.opts.lock().blocky
  }

  pub fn max_wm_delta(&self) -> u64 {
    self.inner.opts.lock().max_wm_delta
  }

  // --- Socket lifecycle ---

  /// Creates a socket. The first call starts the context: slot table,
  /// reaper and I/O threads come up lazily here.
  pub fn socket(&self, socket_type: SocketType) -> ZmqResult<Socket> {
    Ok(Socket::new(self.create_socket_core(socket_type)?))
  }

  pub(crate) fn create_socket_core(&self, socket_type: SocketType) -> ZmqResult<Arc<SocketCore>> {
    let mut st = self.inner.slot_sync.lock();
    if st.terminating {
      return Err(ZmqError::Terminating);
    }
    if st.starting {
      self.start_locked(&mut st);
    }
    let Some(tid) = st.empty_slots.pop() else {
      return Err(ZmqError::TooManySockets);
    };
    let handle = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
    let socket = SocketCore::new(self.clone(), tid, handle, socket_type);
    st.slots[tid as usize] = Some(socket.command_sender());
    st.sockets.push(socket.clone());
    debug!(socket_handle = handle, tid, socket_type = ?socket_type, "socket created");
    Ok(socket)
  }

  fn start_locked(&self, st: &mut SlotTable) {
    let opts = self.inner.opts.lock().clone();
    let slot_count = opts.max_sockets + opts.io_threads + 2;
    debug!(
      io_threads = opts.io_threads,
      max_sockets = opts.max_sockets,
      slot_count,
      "starting context"
    );
    st.slots = vec![None; slot_count];
    let reaper = Reaper::new(self.clone(), REAPER_TID);
    st.slots[REAPER_TID as usize] = Some(reaper.sender());
    reaper.start();
    *self.inner.reaper.lock() = Some(reaper);
    let mut io_threads = Vec::with_capacity(opts.io_threads);
    for i in 0..opts.io_threads {
      let tid = 2 + i as u32;
      let io_thread = IoThread::new(self.clone(), tid);
      st.slots[tid as usize] = Some(io_thread.sender());
      io_thread.start();
      io_threads.push(io_thread);
    }
    *self.inner.io_threads.lock() = io_threads;
    // Free slots in reverse so low indices hand out first.
    for tid in (2 + opts.io_threads..slot_count).rev() {
      st.empty_slots.push(tid as u32);
    }
    st.starting = false;
  }

  /// Releases a destroyed socket's slot; called from the socket's own
  /// destroy hook. If this was the last socket of a terminating context,
  /// tells the reaper to finish.
  pub(crate) fn destroy_socket(&self, socket: &SocketCore) {
    let stop_reaper = {
      let mut st = self.inner.slot_sync.lock();
      let tid = socket.tid();
      st.slots[tid as usize] = None;
      st.empty_slots.push(tid);
      st.sockets.retain(|s| s.handle() != socket.handle());
      debug!(socket_handle = socket.handle(), tid, "socket destroyed");
      if st.terminating && st.sockets.is_empty() && !st.reaper_stop_sent {
        st.reaper_stop_sent = true;
        true
      } else {
        false
      }
    };
    if stop_reaper {
      self.send_to_reaper(CommandKind::Stop);
    }
  }

  /// Least-loaded I/O thread among those allowed by the affinity mask
  /// (0 = all eligible).
  pub(crate) fn choose_io_thread(&self, affinity: u64) -> Option<Arc<IoThread>> {
    let io_threads = self.inner.io_threads.lock();
    io_threads
      .iter()
      .enumerate()
      .filter(|(i, _)| affinity == 0 || affinity & (1u64 << i) != 0)
      .min_by_key(|(_, t)| t.get_load())
      .map(|(_, t)| t.clone())
  }

  // --- Command routing ---

  /// Routes a command to the mailbox registered for `tid`.
  pub(crate) fn send_command(&self, tid: u32, cmd: Command) {
    let sender = {
      let st = self.inner.slot_sync.lock();
      st.slots.get(tid as usize).and_then(|s| s.clone())
    };
    match sender {
      Some(sender) => sender.send(cmd),
      // Seqnum fencing makes this unreachable for live destinations.
      None => warn!(tid, cmd = cmd.kind.variant_name(), "command dropped: empty slot"),
    }
  }

  pub(crate) fn send_reap(&self, socket: Arc<SocketCore>) {
    self.send_to_reaper(CommandKind::Reap { socket });
  }

  pub(crate) fn send_reaped(&self, handle: u32) {
    self.send_to_reaper(CommandKind::Reaped { handle });
  }

  fn send_to_reaper(&self, kind: CommandKind) {
    let reaper = self.inner.reaper.lock().clone();
    if let Some(reaper) = reaper {
      let destination: Arc<dyn Object> = reaper.clone();
      reaper.sender().send(Command {
        destination: Some(destination),
        kind,
      });
    }
  }

  /// Delivers `Done` into the terminator mailbox.
  pub(crate) fn send_done(&self) {
    self.inner.term_mailbox.send(Command {
      destination: None,
      kind: CommandKind::Done,
    });
  }

  // --- Inproc endpoint directory ---

  pub(crate) fn register_endpoint(&self, name: &str, endpoint: InprocEndpoint) -> ZmqResult<()> {
    let mut endpoints = self.inner.endpoints.lock();
    if endpoints.contains_key(name) {
      return Err(ZmqError::AddrInUse(name.to_string()));
    }
    endpoints.insert(name.to_string(), endpoint);
    Ok(())
  }

  pub(crate) fn unregister_endpoints(&self, socket: &SocketCore) {
    self
      .inner
      .endpoints
      .lock()
      .retain(|_, ep| ep.socket.handle() != socket.handle());
  }

  /// Looks up an inproc name. Bumps the binder's sent-seqnum as a side
  /// effect, guaranteeing it survives until the caller's Bind command is
  /// processed.
  pub(crate) fn find_endpoint(&self, name: &str) -> ZmqResult<InprocEndpoint> {
    let endpoints = self.inner.endpoints.lock();
    let endpoint = endpoints
      .get(name)
      .cloned()
      .ok_or_else(|| ZmqError::EndpointNotFound(name.to_string()))?;
    endpoint.socket.inc_seqnum();
    Ok(endpoint)
  }

  // --- Shutdown ---

  /// Non-blocking shutdown: marks the context terminating and stops every
  /// live socket, unblocking their pending operations with `Terminating`.
  /// Idempotent; `term` still completes the teardown.
  pub fn shutdown(&self) -> ZmqResult<()> {
    let st = &mut *self.inner.slot_sync.lock();
    if st.starting || st.terminating {
      st.terminating = true;
      return Ok(());
    }
    st.terminating = true;
    info!("context shutting down");
    for socket in &st.sockets {
      Self::send_stop_to_socket(socket);
    }
    Ok(())
  }

  fn send_stop_to_socket(socket: &Arc<SocketCore>) {
    let destination: Arc<dyn Object> = socket.clone();
    socket.command_sender().send(Command {
      destination: Some(destination),
      kind: CommandKind::Stop,
    });
  }

  /// Blocking termination. Safe to call from any thread, concurrently and
  /// repeatedly; later calls return once the first completed.
  ///
  /// With the `blocky` option set (the default) this waits until every
  /// socket has been closed and reaped. Otherwise the reaper is
  /// force-stopped and pending sockets are abandoned (kept alive by their
  /// handles, but never reaped).
  pub fn term(&self) -> ZmqResult<()> {
    let mut terminated = self.inner.term_sync.lock();
    if *terminated {
      return Ok(());
    }
    let started = {
      let st = &mut *self.inner.slot_sync.lock();
      if st.starting {
        // Never started: nothing to tear down.
        st.terminating = true;
        false
      } else {
        if !st.terminating {
          st.terminating = true;
          info!("context terminating");
          for socket in &st.sockets {
            Self::send_stop_to_socket(socket);
          }
        }
        if !st.reaper_stop_sent {
          if st.sockets.is_empty() {
            st.reaper_stop_sent = true;
            self.send_to_reaper(CommandKind::Stop);
          } else if !self.blocky() {
            st.reaper_stop_sent = true;
            self.send_to_reaper(CommandKind::ForceStop);
          }
          // Otherwise destroy_socket stops the reaper after the last
          // socket is reaped.
        }
        true
      }
    };
    if started {
      let done = self.inner.term_mailbox.recv(None)?;
      assert!(
        matches!(done, Some(Command { kind: CommandKind::Done, .. })),
        "terminator mailbox must receive Done"
      );
      for io_thread in self.inner.io_threads.lock().drain(..) {
        io_thread.stop();
      }
      if let Some(reaper) = self.inner.reaper.lock().take() {
        reaper.join();
      }
    }
    *terminated = true;
    info!("context terminated");
    Ok(())
  }

  // --- Test support ---

  /// Registers a bare mailbox in a fresh slot so unit tests can stand in
  /// for a threaded object and drain its commands deterministically.
  #[cfg(test)]
  pub(crate) fn register_test_mailbox(&self) -> (u32, crate::runtime::mailbox::Mailbox) {
    let (sender, mb) = crate::runtime::mailbox::mailbox();
    let mut st = self.inner.slot_sync.lock();
    let tid = st.slots.len() as u32;
    st.slots.push(Some(sender));
    (tid, mb)
  }
}
