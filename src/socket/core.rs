//! The threaded half of every socket.
//!
//! A socket is an ownership-tree root living in its own slot of the
//! context's thread table. User calls (`send`, `recv`, `bind`, ...) run on
//! whatever application thread holds the handle; that thread doubles as
//! the socket's command-processing thread by draining the mailbox before
//! and during every blocking operation. After `close` the reaper takes
//! over the mailbox and drives the termination handshake to completion.
//!
//! Sockets are not thread-safe: one thread at a time may drive a handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::ctx::{Context, InprocEndpoint};
use crate::error::{ZmqError, ZmqResult};
use crate::message::Msg;
use crate::runtime::command::Command;
use crate::runtime::mailbox::{mailbox, Mailbox, MailboxSender};
use crate::runtime::object::{Object, ObjectCore};
use crate::runtime::own::{Own, OwnCore, OwnRef};
use crate::runtime::pipe::{IPipeEvents, Pipe};
use crate::socket::types::SocketType;
use crate::socket::options::SocketOptions;
use crate::socket::{create_pattern, ISocket};
use crate::transport::{parse_endpoint, Endpoint};

/// Sum of the two facing watermarks; either side opting out (0) disables
/// the limit entirely.
fn combined_hwm(local: i32, peer: i32) -> u64 {
  if local == 0 || peer == 0 {
    0
  } else {
    local as u64 + peer as u64
  }
}

#[derive(Default)]
struct CoreState {
  /// Inproc names this socket registered via bind.
  bound_endpoints: Vec<String>,
  pipes: Vec<Arc<Pipe>>,
}

pub(crate) struct SocketCore {
  core: ObjectCore,
  own: OwnCore,
  self_ref: Weak<SocketCore>,
  handle: u32,
  socket_type: SocketType,
  mailbox: Mutex<Mailbox>,
  sender: MailboxSender,
  options: Mutex<SocketOptions>,
  pattern: Mutex<Box<dyn ISocket>>,
  state: Mutex<CoreState>,
  closed: AtomicBool,
  ctx_terminated: AtomicBool,
}

impl SocketCore {
  pub(crate) fn new(ctx: Context, tid: u32, handle: u32, socket_type: SocketType) -> Arc<Self> {
    let (sender, mb) = mailbox();
    Arc::new_cyclic(|weak| SocketCore {
      core: ObjectCore::new(ctx, tid),
      own: OwnCore::new(),
      self_ref: weak.clone(),
      handle,
      socket_type,
      mailbox: Mutex::new(mb),
      sender,
      options: Mutex::new(SocketOptions::default()),
      pattern: Mutex::new(create_pattern(socket_type)),
      state: Mutex::new(CoreState::default()),
      closed: AtomicBool::new(false),
      ctx_terminated: AtomicBool::new(false),
    })
  }

  fn arc(&self) -> Arc<SocketCore> {
    self.self_ref.upgrade().expect("socket outlives its commands")
  }

  pub(crate) fn handle(&self) -> u32 {
    self.handle
  }

  pub(crate) fn tid(&self) -> u32 {
    self.core.tid
  }

  pub(crate) fn socket_type(&self) -> SocketType {
    self.socket_type
  }

  pub(crate) fn command_sender(&self) -> MailboxSender {
    self.sender.clone()
  }

  fn check_open(&self) -> ZmqResult<()> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(ZmqError::InvalidState("socket is closed"));
    }
    if self.ctx_terminated.load(Ordering::SeqCst) {
      return Err(ZmqError::Terminating);
    }
    Ok(())
  }

  // --- Command processing ---

  /// Drains the mailbox, blocking up to `timeout` for the first command
  /// (`Some(ZERO)` = non-blocking sweep, `None` = wait indefinitely).
  /// Reports `Terminating` once the context has stopped this socket.
  fn process_commands(&self, timeout: Option<Duration>) -> ZmqResult<()> {
    let mut cmd = self.mailbox.lock().recv(timeout)?;
    while let Some(Command { destination, kind }) = cmd {
      let destination = destination.expect("socket thread commands carry a destination");
      destination.process_command(kind);
      cmd = self.mailbox.lock().try_recv();
    }
    if self.ctx_terminated.load(Ordering::SeqCst) {
      return Err(ZmqError::Terminating);
    }
    Ok(())
  }

  /// Non-blocking drain for the reaper, which multiplexes many socket
  /// mailboxes over its own wake source.
  pub(crate) fn process_pending_commands(&self) {
    loop {
      let cmd = self.mailbox.lock().try_recv();
      let Some(Command { destination, kind }) = cmd else {
        break;
      };
      let destination = destination.expect("socket thread commands carry a destination");
      destination.process_command(kind);
    }
  }

  // --- Options ---

  pub(crate) fn set_option(&self, option: i32, value: &[u8]) -> ZmqResult<()> {
    self.check_open()?;
    self.options.lock().set(option, value)
  }

  pub(crate) fn get_option(&self, option: i32) -> ZmqResult<Vec<u8>> {
    self.check_open()?;
    self.options.lock().get(option)
  }

  // --- Bind / connect ---

  pub(crate) fn bind(&self, endpoint: &str) -> ZmqResult<()> {
    self.check_open()?;
    self.process_commands(Some(Duration::ZERO))?;
    match parse_endpoint(endpoint)? {
      Endpoint::Inproc(name) => {
        let (sndhwm, rcvhwm) = {
          let opts = self.options.lock();
          (opts.sndhwm, opts.rcvhwm)
        };
        self.core.ctx.register_endpoint(
          &name,
          InprocEndpoint {
            socket: self.arc(),
            sndhwm,
            rcvhwm,
          },
        )?;
        self.state.lock().bound_endpoints.push(name);
        info!(socket_handle = self.handle, %endpoint, "socket bound");
        Ok(())
      }
      other => self.reject_transport(other),
    }
  }

  pub(crate) fn connect(&self, endpoint: &str) -> ZmqResult<()> {
    self.check_open()?;
    self.process_commands(Some(Duration::ZERO))?;
    match parse_endpoint(endpoint)? {
      Endpoint::Inproc(name) => {
        self.connect_inproc(&name)?;
        info!(socket_handle = self.handle, %endpoint, "socket connected");
        Ok(())
      }
      other => self.reject_transport(other),
    }
  }

  fn reject_transport(&self, endpoint: Endpoint) -> ZmqResult<()> {
    // Session placement would come first for a wire transport; resolve the
    // hosting thread so an exhausted affinity mask reports as such.
    let affinity = self.options.lock().affinity;
    if self.core.ctx.choose_io_thread(affinity).is_none() {
      return Err(ZmqError::InvalidArgument(
        "no I/O thread matches the affinity mask".into(),
      ));
    }
    Err(ZmqError::UnsupportedTransport(endpoint.scheme().to_string()))
  }

  fn connect_inproc(&self, name: &str) -> ZmqResult<()> {
    // Resolving the name bumps the binder's sent-seqnum, pinning it until
    // our Bind command below is processed.
    let peer = self.core.ctx.find_endpoint(name)?;
    let opts = self.options.lock().clone();
    let hwm_in = combined_hwm(opts.rcvhwm, peer.sndhwm);
    let hwm_out = combined_hwm(opts.sndhwm, peer.rcvhwm);
    let (local, remote) = Pipe::pair(
      &self.core.ctx,
      [self.core.tid, peer.socket.tid()],
      [hwm_in, hwm_out],
      [true, true],
    );
    self.attach_pipe(&local);
    let destination: Arc<dyn Object> = peer.socket.clone();
    self.send_bind(&destination, remote, false);
    Ok(())
  }

  /// Hooks a pipe end into this socket: event sink, pipe set, pattern.
  fn attach_pipe(&self, pipe: &Arc<Pipe>) {
    let sink: Arc<dyn IPipeEvents> = self.arc();
    pipe.set_event_sink(sink);
    self.state.lock().pipes.push(pipe.clone());
    self.pattern.lock().xattach_pipe(pipe);
    // A pipe arriving into a terminating socket joins the shutdown
    // immediately instead of being serviced.
    if self.own.is_terminating() {
      self.register_term_acks(1);
      pipe.terminate(false);
    }
  }

  // --- Send / recv ---

  pub(crate) fn send(&self, msg: Msg) -> ZmqResult<()> {
    self.check_open()?;
    self.process_commands(Some(Duration::ZERO))?;
    let mut msg = match self.pattern.lock().xsend(msg) {
      Ok(()) => return Ok(()),
      Err(msg) => msg,
    };
    let timeout = self.options.lock().sndtimeo;
    if matches!(timeout, Some(t) if t.is_zero()) {
      return Err(ZmqError::WouldBlock);
    }
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
      let wait = match deadline {
        None => None,
        Some(deadline) => Some(
          deadline
            .checked_duration_since(Instant::now())
            .ok_or(ZmqError::WouldBlock)?,
        ),
      };
      // Block here until pipe activity (or Stop) arrives.
      self.process_commands(wait)?;
      msg = match self.pattern.lock().xsend(msg) {
        Ok(()) => return Ok(()),
        Err(msg) => msg,
      };
    }
  }

  pub(crate) fn recv(&self) -> ZmqResult<Msg> {
    self.check_open()?;
    self.process_commands(Some(Duration::ZERO))?;
    if let Some(msg) = self.pattern.lock().xrecv() {
      return Ok(msg);
    }
    let timeout = self.options.lock().rcvtimeo;
    if matches!(timeout, Some(t) if t.is_zero()) {
      return Err(ZmqError::WouldBlock);
    }
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
      let wait = match deadline {
        None => None,
        Some(deadline) => Some(
          deadline
            .checked_duration_since(Instant::now())
            .ok_or(ZmqError::WouldBlock)?,
        ),
      };
      self.process_commands(wait)?;
      if let Some(msg) = self.pattern.lock().xrecv() {
        return Ok(msg);
      }
    }
  }

  // --- Close / teardown ---

  /// Hands the socket to the reaper. Returns immediately; the termination
  /// handshake (bounded by the linger option) runs on the reaper thread.
  pub(crate) fn close(&self) -> ZmqResult<()> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Err(ZmqError::InvalidState("socket already closed"));
    }
    info!(socket_handle = self.handle, "closing socket");
    self.core.ctx.send_reap(self.arc());
    Ok(())
  }

  /// First thing the reaper runs after adopting this socket.
  pub(crate) fn start_reaping(&self) {
    self.terminate();
    // Catch up on anything queued between close() and adoption.
    self.process_pending_commands();
  }
}

impl Object for SocketCore {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn inc_seqnum(&self) {
    self.own.inc_sent();
  }

  fn process_stop(&self) {
    // Unblocks any pending send/recv; the next process_commands pass
    // reports Terminating.
    debug!(socket_handle = self.handle, "socket stopped by context");
    self.ctx_terminated.store(true, Ordering::SeqCst);
  }

  fn process_bind(&self, pipe: Arc<Pipe>) {
    self.attach_pipe(&pipe);
  }

  fn process_own(&self, object: OwnRef) {
    self.handle_own(object);
  }

  fn process_term_req(&self, object: OwnRef) {
    self.handle_term_req(object);
  }

  fn process_term(&self, linger_ms: i32) {
    debug!(socket_handle = self.handle, linger_ms, "socket terminating");
    // Stop resolving to this socket before the pipes go down.
    self.core.ctx.unregister_endpoints(self);
    let pipes = self.state.lock().pipes.clone();
    self.register_term_acks(pipes.len() as u32);
    for pipe in &pipes {
      // Zero linger forfeits undelivered messages instead of draining.
      pipe.terminate(linger_ms != 0);
    }
    self.handle_term(linger_ms);
  }

  fn process_term_ack(&self) {
    self.handle_term_ack();
  }

  fn process_seqnum(&self) {
    self.handle_seqnum();
  }
}

impl Own for SocketCore {
  fn own(&self) -> &OwnCore {
    &self.own
  }

  fn own_ref(&self) -> OwnRef {
    self.arc()
  }

  fn linger(&self) -> i32 {
    self.options.lock().linger_ms()
  }

  fn process_destroy(&self) {
    info!(socket_handle = self.handle, "socket destroyed");
    self.core.ctx.destroy_socket(self);
    self.core.ctx.send_reaped(self.handle);
  }
}

impl IPipeEvents for SocketCore {
  fn read_activated(&self, pipe: &Arc<Pipe>) {
    self.pattern.lock().xread_activated(pipe);
  }

  fn write_activated(&self, pipe: &Arc<Pipe>) {
    self.pattern.lock().xwrite_activated(pipe);
  }

  fn hiccuped(&self, pipe: &Arc<Pipe>) {
    self.pattern.lock().xhiccuped(pipe);
  }

  fn pipe_terminated(&self, pipe: &Arc<Pipe>) {
    self.pattern.lock().xpipe_terminated(pipe);
    self
      .state
      .lock()
      .pipes
      .retain(|p| !Arc::ptr_eq(p, pipe));
    // During shutdown every pipe counts as one pending ack.
    if self.own.is_terminating() {
      self.unregister_term_ack();
    }
  }
}
