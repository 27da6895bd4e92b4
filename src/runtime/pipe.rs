//! Bounded, flow-controlled message channel between two threaded objects.
//!
//! A pipe is always created as a pair of half-pipe ends over two
//! independent SPSC message queues, one per direction. Each end lives on
//! its endpoint's thread; the ends talk to each other exclusively through
//! commands (`ActivateRead`, `ActivateWrite`, `Hiccup`, `PipeTerm`,
//! `PipeTermAck`), never through shared state beyond the queues
//! themselves.
//!
//! Flow control is advisory: `check_write` goes false once
//! `written - peer_acknowledged` hits the high watermark, and the reader
//! re-opens the window by sending `ActivateWrite` with its cumulative read
//! count every low-watermark-th message.
//!
//! Termination is a delimiter-plus-handshake protocol; see the state
//! machine in `terminate`/`process_pipe_term`/`process_pipe_term_ack`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::ctx::Context;
use crate::message::Msg;
use crate::runtime::command::MsgPipeWriter;
use crate::runtime::object::{Object, ObjectCore};
use crate::runtime::ypipe::{ypipe, YPipeReader};
use crate::runtime::yqueue::MESSAGE_PIPE_GRANULARITY;

/// Sink for pipe events, implemented by the attached endpoint (a socket).
/// Callbacks arrive on the endpoint's own thread, outside any pipe lock.
pub(crate) trait IPipeEvents: Send + Sync {
  /// The in-direction went readable again after running dry.
  fn read_activated(&self, pipe: &Arc<Pipe>);
  /// The out-direction went writable again after hitting the watermark.
  fn write_activated(&self, pipe: &Arc<Pipe>);
  /// The peer dropped and replaced its inbound queue.
  fn hiccuped(&self, pipe: &Arc<Pipe>);
  /// The termination handshake completed; the pipe is gone.
  fn pipe_terminated(&self, pipe: &Arc<Pipe>);
}

/// Derives the low watermark from a high watermark.
///
/// Half the high watermark for small queues, a fixed gap of
/// `max_wm_delta` for large ones. Only `lwm < hwm` matters for
/// correctness; the split balances wake-up chatter against refill
/// latency.
pub(crate) fn compute_lwm(hwm: u64, max_wm_delta: u64) -> u64 {
  if hwm == 0 {
    0
  } else if hwm > max_wm_delta * 2 {
    hwm - max_wm_delta
  } else {
    (hwm + 1) / 2
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeState {
  /// Normal read/write.
  Active,
  /// Delimiter seen; peer-initiated close not yet matched by a PipeTerm.
  Delimited,
  /// PipeTerm received, draining until the delimiter arrives.
  Pending,
  /// We sent PipeTermAck; nothing further to do locally.
  Terminated,
  /// We sent PipeTerm and await the ack.
  Terminating,
  /// Both sides closed concurrently; ack sent for the crossing PipeTerm.
  DoubleTerminated,
}

struct PipeInner {
  in_pipe: Option<YPipeReader<Msg, MESSAGE_PIPE_GRANULARITY>>,
  out_pipe: Option<MsgPipeWriter>,
  in_active: bool,
  out_active: bool,
  /// Outbound message limit; 0 disables flow control.
  hwm: u64,
  /// Inbound low watermark: cadence of ActivateWrite acknowledgements.
  lwm: u64,
  msgs_read: u64,
  msgs_written: u64,
  /// Peer's cumulative read count, from its last ActivateWrite.
  peers_msgs_read: u64,
  peer: Option<Arc<Pipe>>,
  sink: Option<Arc<dyn IPipeEvents>>,
  state: PipeState,
  /// Whether local termination waits for the peer to drain us first.
  delay: bool,
}

pub(crate) struct Pipe {
  core: ObjectCore,
  self_ref: Weak<Pipe>,
  inner: Mutex<PipeInner>,
}

impl Pipe {
  /// Creates a connected pair of pipe ends.
  ///
  /// `tids[i]` is the thread the `i`-th end lives on; `hwms[i]` bounds the
  /// messages flowing *towards* end `i`; `delays[i]` makes end `i`'s
  /// termination wait for a full drain.
  pub(crate) fn pair(
    ctx: &Context,
    tids: [u32; 2],
    hwms: [u64; 2],
    delays: [bool; 2],
  ) -> (Arc<Pipe>, Arc<Pipe>) {
    let max_wm_delta = ctx.max_wm_delta();
    // Queue A carries end0 -> end1 traffic, queue B the reverse.
    let (writer_a, reader_a) = ypipe::<Msg, MESSAGE_PIPE_GRANULARITY>();
    let (writer_b, reader_b) = ypipe::<Msg, MESSAGE_PIPE_GRANULARITY>();
    let end0 = Arc::new_cyclic(|weak| Pipe {
      core: ObjectCore::new(ctx.clone(), tids[0]),
      self_ref: weak.clone(),
      inner: Mutex::new(PipeInner {
        in_pipe: Some(reader_b),
        out_pipe: Some(writer_a),
        in_active: true,
        out_active: true,
        hwm: hwms[1],
        lwm: compute_lwm(hwms[0], max_wm_delta),
        msgs_read: 0,
        msgs_written: 0,
        peers_msgs_read: 0,
        peer: None,
        sink: None,
        state: PipeState::Active,
        delay: delays[0],
      }),
    });
    let end1 = Arc::new_cyclic(|weak| Pipe {
      core: ObjectCore::new(ctx.clone(), tids[1]),
      self_ref: weak.clone(),
      inner: Mutex::new(PipeInner {
        in_pipe: Some(reader_a),
        out_pipe: Some(writer_b),
        in_active: true,
        out_active: true,
        hwm: hwms[0],
        lwm: compute_lwm(hwms[1], max_wm_delta),
        msgs_read: 0,
        msgs_written: 0,
        peers_msgs_read: 0,
        peer: None,
        sink: None,
        state: PipeState::Active,
        delay: delays[1],
      }),
    });
    end0.inner.lock().peer = Some(end1.clone());
    end1.inner.lock().peer = Some(end0.clone());
    (end0, end1)
  }

  fn arc(&self) -> Arc<Pipe> {
    self.self_ref.upgrade().expect("pipe outlives its commands")
  }

  /// Registers the event sink. Must happen before the pipe is used.
  pub(crate) fn set_event_sink(&self, sink: Arc<dyn IPipeEvents>) {
    self.inner.lock().sink = Some(sink);
  }

  // --- Read side (endpoint thread) ---

  /// Is a message readable right now? Consumes a pending delimiter as a
  /// side effect (the caller never sees it).
  pub(crate) fn check_read(&self) -> bool {
    let mut inner = self.inner.lock();
    if !inner.in_active || !matches!(inner.state, PipeState::Active | PipeState::Pending) {
      return false;
    }
    let readable = match inner.in_pipe.as_mut() {
      Some(reader) => reader.check_read(),
      None => false,
    };
    if !readable {
      inner.in_active = false;
      return false;
    }
    // Peek for the termination sentinel.
    if inner
      .in_pipe
      .as_mut()
      .map_or(false, |r| r.probe(|m| m.is_delimiter()))
    {
      let _ = inner.in_pipe.as_mut().and_then(|r| r.read());
      self.process_delimiter(&mut inner);
      return false;
    }
    true
  }

  /// Reads one message, or `None` when dry / terminated. Acknowledges
  /// consumption to the peer every `lwm`-th logical message.
  pub(crate) fn read(&self) -> Option<Msg> {
    let mut inner = self.inner.lock();
    if !inner.in_active || !matches!(inner.state, PipeState::Active | PipeState::Pending) {
      return None;
    }
    let msg = match inner.in_pipe.as_mut().and_then(|r| r.read()) {
      Some(msg) => msg,
      None => {
        inner.in_active = false;
        return None;
      }
    };
    if msg.is_delimiter() {
      self.process_delimiter(&mut inner);
      return None;
    }
    if !msg.is_more() {
      inner.msgs_read += 1;
      if inner.lwm > 0 && inner.msgs_read % inner.lwm == 0 {
        let peer = inner.peer.clone().expect("live pipe has a peer");
        self.send_activate_write(&peer, inner.msgs_read);
      }
    }
    Some(msg)
  }

  // --- Write side (endpoint thread) ---

  /// Is there room for another message?
  pub(crate) fn check_write(&self) -> bool {
    let mut inner = self.inner.lock();
    if !inner.out_active || inner.state != PipeState::Active {
      return false;
    }
    let full =
      inner.hwm > 0 && inner.msgs_written.saturating_sub(inner.peers_msgs_read) == inner.hwm;
    if full {
      inner.out_active = false;
      return false;
    }
    true
  }

  /// Writes one frame. On a full or closing pipe the frame is handed back
  /// untouched. Frames with `MORE` remain unpublished until the closing
  /// frame of the logical message.
  pub(crate) fn write(&self, msg: Msg) -> Result<(), Msg> {
    if !self.check_write() {
      return Err(msg);
    }
    let mut inner = self.inner.lock();
    let more = msg.is_more();
    if let Some(writer) = inner.out_pipe.as_mut() {
      writer.write(msg, more);
    }
    if !more {
      inner.msgs_written += 1;
    }
    Ok(())
  }

  /// Discards the unfinished tail of a partially written multipart
  /// message.
  pub(crate) fn rollback(&self) {
    let mut inner = self.inner.lock();
    Self::rollback_locked(&mut inner);
  }

  fn rollback_locked(inner: &mut PipeInner) {
    if let Some(writer) = inner.out_pipe.as_mut() {
      while writer.unwrite().is_some() {}
    }
  }

  /// Publishes written messages to the peer, waking it if needed.
  pub(crate) fn flush(&self) {
    let mut inner = self.inner.lock();
    if inner.state == PipeState::Terminated {
      return;
    }
    let flushed = match inner.out_pipe.as_mut() {
      Some(writer) => writer.flush(),
      None => true,
    };
    if !flushed {
      let peer = inner.peer.clone().expect("live pipe has a peer");
      self.send_activate_read(&peer);
    }
  }

  // --- Termination ---

  /// Begins the termination handshake from this end.
  ///
  /// `delay` is recorded for a PipeTerm that may still cross over from the
  /// peer: `true` keeps draining until the peer's delimiter arrives,
  /// `false` finalizes immediately. Messages this end never read are
  /// forfeited either way; messages already written stay readable to the
  /// peer until it completes its half of the handshake.
  pub(crate) fn terminate(&self, delay: bool) {
    let mut inner = self.inner.lock();
    inner.delay = delay;
    let peer = inner.peer.clone();
    match inner.state {
      // Already underway or done from this side.
      PipeState::Terminating | PipeState::DoubleTerminated | PipeState::Terminated => return,
      PipeState::Active => {
        self.send_pipe_term(peer.as_ref().expect("live pipe has a peer"));
        inner.state = PipeState::Terminating;
      }
      PipeState::Pending => {
        // The endpoint is closing and will never drain the rest; act as
        // if everything pending had been read.
        Self::rollback_locked(&mut inner);
        inner.out_pipe = None;
        self.send_pipe_term_ack(peer.as_ref().expect("live pipe has a peer"));
        inner.state = PipeState::Terminated;
      }
      PipeState::Delimited => {
        self.send_pipe_term(peer.as_ref().expect("live pipe has a peer"));
        inner.state = PipeState::Terminating;
      }
    }
    // Whatever the branch, stop the outbound stream with a delimiter. The
    // sentinel is exempt from the watermark check.
    if inner.out_pipe.is_some() {
      Self::rollback_locked(&mut inner);
      let flushed = {
        let writer = inner.out_pipe.as_mut().expect("checked above");
        writer.write(Msg::delimiter(), false);
        writer.flush()
      };
      if !flushed {
        let peer = inner.peer.clone().expect("live pipe has a peer");
        self.send_activate_read(&peer);
      }
    }
  }

  /// Reader hit the delimiter sentinel. Called with the lock held.
  fn process_delimiter(&self, inner: &mut PipeInner) {
    debug_assert!(matches!(
      inner.state,
      PipeState::Active | PipeState::Pending
    ));
    trace!(tid = self.core.tid, "pipe delimiter received");
    if inner.state == PipeState::Active {
      inner.state = PipeState::Delimited;
    } else {
      // Drain complete: finish the handshake we parked in Pending.
      Self::rollback_locked(inner);
      inner.out_pipe = None;
      let peer = inner.peer.clone().expect("live pipe has a peer");
      self.send_pipe_term_ack(&peer);
      inner.state = PipeState::Terminated;
    }
  }

  /// Final teardown after the handshake: drop queues, peer and sink links.
  fn release(&self, inner: &mut PipeInner) {
    // Drain and discard whatever the peer never read.
    if let Some(reader) = inner.in_pipe.as_mut() {
      while reader.read().is_some() {}
    }
    inner.in_pipe = None;
    inner.out_pipe = None;
    inner.peer = None;
    inner.sink = None;
  }
}

impl Object for Pipe {
  fn core(&self) -> &ObjectCore {
    &self.core
  }

  fn process_activate_read(&self) {
    let sink = {
      let mut inner = self.inner.lock();
      if inner.in_active || !matches!(inner.state, PipeState::Active | PipeState::Pending) {
        return;
      }
      inner.in_active = true;
      inner.sink.clone()
    };
    if let Some(sink) = sink {
      sink.read_activated(&self.arc());
    }
  }

  fn process_activate_write(&self, msgs_read: u64) {
    let sink = {
      let mut inner = self.inner.lock();
      inner.peers_msgs_read = msgs_read;
      if inner.out_active || inner.state != PipeState::Active {
        return;
      }
      inner.out_active = true;
      inner.sink.clone()
    };
    if let Some(sink) = sink {
      sink.write_activated(&self.arc());
    }
  }

  fn process_hiccup(&self, pipe: MsgPipeWriter) {
    let sink = {
      let mut inner = self.inner.lock();
      // The old outbound queue died with the peer's old reader. Unread
      // messages are gone; treat the window as empty again.
      inner.out_pipe = Some(pipe);
      inner.msgs_written = inner.peers_msgs_read;
      inner.out_active = true;
      if inner.state != PipeState::Active {
        return;
      }
      inner.sink.clone()
    };
    if let Some(sink) = sink {
      sink.hiccuped(&self.arc());
    }
  }

  fn process_pipe_term(&self) {
    let mut inner = self.inner.lock();
    let peer = inner.peer.clone().expect("live pipe has a peer");
    match inner.state {
      PipeState::Active => {
        if inner.delay {
          inner.state = PipeState::Pending;
        } else {
          inner.state = PipeState::Terminated;
          inner.out_pipe = None;
          self.send_pipe_term_ack(&peer);
        }
      }
      PipeState::Delimited => {
        inner.state = PipeState::Terminated;
        inner.out_pipe = None;
        self.send_pipe_term_ack(&peer);
      }
      PipeState::Terminating => {
        // Concurrent close from both ends.
        inner.state = PipeState::DoubleTerminated;
        inner.out_pipe = None;
        self.send_pipe_term_ack(&peer);
      }
      other => panic!("PipeTerm in invalid pipe state {other:?}"),
    }
  }

  fn process_pipe_term_ack(&self) {
    let (sink, pipe) = {
      let mut inner = self.inner.lock();
      match inner.state {
        PipeState::Terminating => {
          // Our PipeTerm crossed with the peer's ack path; return the
          // courtesy ack that lets the peer finish too.
          let peer = inner.peer.clone().expect("live pipe has a peer");
          inner.out_pipe = None;
          self.send_pipe_term_ack(&peer);
        }
        PipeState::Terminated | PipeState::DoubleTerminated => {}
        other => panic!("PipeTermAck in invalid pipe state {other:?}"),
      }
      let sink = inner.sink.clone();
      self.release(&mut inner);
      (sink, self.arc())
    };
    debug!(tid = self.core.tid, "pipe terminated");
    if let Some(sink) = sink {
      sink.pipe_terminated(&pipe);
    }
  }
}

// --- Hiccup (reader-side queue replacement) ---

impl Pipe {
  /// Drops the inbound queue and starts a fresh one, telling the peer to
  /// resume writing into it. Only meaningful on an active pipe.
  pub(crate) fn hiccup(&self) {
    let (peer, writer) = {
      let mut inner = self.inner.lock();
      if inner.state != PipeState::Active {
        return;
      }
      let (writer, reader) = ypipe::<Msg, MESSAGE_PIPE_GRANULARITY>();
      inner.in_pipe = Some(reader);
      inner.in_active = true;
      (inner.peer.clone().expect("live pipe has a peer"), writer)
    };
    self.send_hiccup(&peer, writer);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use crate::message::MsgFlags;
  use crate::runtime::mailbox::Mailbox;

  #[derive(Default)]
  struct Events {
    read_activations: AtomicUsize,
    write_activations: AtomicUsize,
    hiccups: AtomicUsize,
    terminated: AtomicBool,
  }

  impl IPipeEvents for Events {
    fn read_activated(&self, _pipe: &Arc<Pipe>) {
      self.read_activations.fetch_add(1, Ordering::SeqCst);
    }
    fn write_activated(&self, _pipe: &Arc<Pipe>) {
      self.write_activations.fetch_add(1, Ordering::SeqCst);
    }
    fn hiccuped(&self, _pipe: &Arc<Pipe>) {
      self.hiccups.fetch_add(1, Ordering::SeqCst);
    }
    fn pipe_terminated(&self, _pipe: &Arc<Pipe>) {
      self.terminated.store(true, Ordering::SeqCst);
    }
  }

  struct Harness {
    ends: [Arc<Pipe>; 2],
    mailboxes: [Mailbox; 2],
    events: [Arc<Events>; 2],
  }

  /// Two pipe ends whose threads are simulated by test mailboxes the
  /// test drains by hand.
  fn harness(hwms: [u64; 2]) -> Harness {
    let ctx = Context::new();
    let (tid0, mb0) = ctx.register_test_mailbox();
    let (tid1, mb1) = ctx.register_test_mailbox();
    let (end0, end1) = Pipe::pair(&ctx, [tid0, tid1], hwms, [true, true]);
    let ev0 = Arc::new(Events::default());
    let ev1 = Arc::new(Events::default());
    end0.set_event_sink(ev0.clone());
    end1.set_event_sink(ev1.clone());
    Harness {
      ends: [end0, end1],
      mailboxes: [mb0, mb1],
      events: [ev0, ev1],
    }
  }

  fn drain(mb: &mut Mailbox) -> usize {
    let mut dispatched = 0;
    while let Some(cmd) = mb.try_recv() {
      let destination = cmd.destination.expect("pipe commands carry a destination");
      destination.process_command(cmd.kind);
      dispatched += 1;
    }
    dispatched
  }

  fn msg(text: &'static str) -> Msg {
    Msg::from_static(text.as_bytes())
  }

  #[test]
  fn lwm_is_half_for_small_and_fixed_gap_for_large() {
    assert_eq!(compute_lwm(0, 1024), 0);
    assert_eq!(compute_lwm(1, 1024), 1);
    assert_eq!(compute_lwm(4, 1024), 2);
    assert_eq!(compute_lwm(1000, 1024), 500);
    assert_eq!(compute_lwm(10_000, 1024), 8976);
  }

  #[test]
  fn watermark_closes_and_reader_reopens_the_window() {
    let mut h = harness([0, 4]);
    for i in 0..4 {
      assert!(h.ends[0].write(msg("m")).is_ok(), "write {i} within hwm");
      h.ends[0].flush();
    }
    assert!(!h.ends[0].check_write());
    assert!(h.ends[0].write(msg("over")).is_err());

    drain(&mut h.mailboxes[1]);
    // lwm of 4 is 2: the second read acknowledges cumulatively.
    assert!(h.ends[1].read().is_some());
    assert!(h.ends[1].read().is_some());
    drain(&mut h.mailboxes[0]);
    assert_eq!(h.events[0].write_activations.load(Ordering::SeqCst), 1);
    assert!(h.ends[0].check_write());
    assert!(h.ends[0].write(msg("fits-again")).is_ok());
  }

  #[test]
  fn zero_hwm_disables_flow_control() {
    let mut h = harness([0, 0]);
    for _ in 0..500 {
      assert!(h.ends[0].write(msg("m")).is_ok());
    }
    h.ends[0].flush();
    drain(&mut h.mailboxes[1]);
    for _ in 0..500 {
      assert!(h.ends[1].read().is_some());
    }
  }

  #[test]
  fn more_frames_count_as_one_logical_message() {
    let mut h = harness([0, 2]);
    for _ in 0..2 {
      let mut head = msg("head");
      head.set_flags(MsgFlags::MORE);
      assert!(h.ends[0].write(head).is_ok());
      assert!(h.ends[0].write(msg("tail")).is_ok());
      h.ends[0].flush();
    }
    // Two logical messages hit the watermark despite four frames.
    assert!(!h.ends[0].check_write());
    drain(&mut h.mailboxes[1]);
    assert!(h.ends[1].read().map_or(false, |m| m.is_more()));
  }

  #[test]
  fn delayed_termination_keeps_pending_messages_readable() {
    let mut h = harness([0, 0]);
    assert!(h.ends[0].write(msg("last words")).is_ok());
    h.ends[0].flush();
    h.ends[0].terminate(true);

    // Peer sees the PipeTerm but keeps draining until the delimiter.
    drain(&mut h.mailboxes[1]);
    let delivered = h.ends[1].read().expect("message survives delayed close");
    assert_eq!(delivered.data(), Some(&b"last words"[..]));
    // Next probe hits the delimiter, completing the handshake.
    assert!(!h.ends[1].check_read());
    drain(&mut h.mailboxes[0]);
    drain(&mut h.mailboxes[1]);
    assert!(h.events[0].terminated.load(Ordering::SeqCst));
    assert!(h.events[1].terminated.load(Ordering::SeqCst));
    assert!(h.ends[1].read().is_none());
  }

  #[test]
  fn reader_side_close_without_delay_forfeits_pending() {
    let mut h = harness([0, 0]);
    assert!(h.ends[0].write(msg("doomed")).is_ok());
    h.ends[0].flush();
    h.ends[1].terminate(false);

    // end0 drains end1's delimiter, acks, and the courtesy ack crosses back.
    drain(&mut h.mailboxes[0]);
    assert!(!h.ends[0].check_read());
    drain(&mut h.mailboxes[1]);
    drain(&mut h.mailboxes[0]);
    assert!(h.events[0].terminated.load(Ordering::SeqCst));
    assert!(h.events[1].terminated.load(Ordering::SeqCst));
    assert!(h.ends[1].read().is_none());
  }

  #[test]
  fn concurrent_close_from_both_ends_completes() {
    let mut h = harness([0, 0]);
    h.ends[0].terminate(false);
    h.ends[1].terminate(false);
    for _ in 0..3 {
      drain(&mut h.mailboxes[0]);
      drain(&mut h.mailboxes[1]);
    }
    assert!(h.events[0].terminated.load(Ordering::SeqCst));
    assert!(h.events[1].terminated.load(Ordering::SeqCst));
  }

  #[test]
  fn hiccup_discards_inbound_and_resumes_on_fresh_queue() {
    let mut h = harness([0, 0]);
    for _ in 0..3 {
      assert!(h.ends[0].write(msg("stale")).is_ok());
    }
    h.ends[0].flush();
    h.ends[1].hiccup();
    drain(&mut h.mailboxes[0]);
    assert_eq!(h.events[0].hiccups.load(Ordering::SeqCst), 1);

    assert!(h.ends[0].write(msg("fresh")).is_ok());
    h.ends[0].flush();
    drain(&mut h.mailboxes[1]);
    let got = h.ends[1].read().expect("fresh message readable");
    assert_eq!(got.data(), Some(&b"fresh"[..]));
    assert!(h.ends[1].read().is_none(), "stale messages are gone");
  }
}
