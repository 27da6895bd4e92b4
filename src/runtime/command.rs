//! Inter-thread command envelope.
//!
//! Commands are value objects delivered through mailboxes. The payload
//! shape is fixed per tag by the `CommandKind` union; dispatch is purely
//! `destination.process_command(kind)`.

use std::fmt;
use std::sync::Arc;

use crate::message::Msg;
use crate::runtime::object::Object;
use crate::runtime::own::OwnRef;
use crate::runtime::pipe::Pipe;
use crate::runtime::ypipe::YPipeWriter;
use crate::runtime::yqueue::MESSAGE_PIPE_GRANULARITY;
use crate::socket::core::SocketCore;
use crate::engine::IEngine;

/// Writer half of a message queue, as carried by `Hiccup`.
pub(crate) type MsgPipeWriter = YPipeWriter<Msg, MESSAGE_PIPE_GRANULARITY>;

/// A command addressed to one threaded object.
///
/// `destination` is `None` only for `Done`, which is consumed by the
/// context's terminator mailbox rather than dispatched. Holding the
/// destination by `Arc` keeps it alive while the command is in flight,
/// which backs up the seqnum fencing in `own`.
pub(crate) struct Command {
  pub(crate) destination: Option<Arc<dyn Object>>,
  pub(crate) kind: CommandKind,
}

/// The closed set of command tags and their payloads.
pub(crate) enum CommandKind {
  /// Stop processing; sent by the context to sockets and I/O threads.
  Stop,
  /// First command an object receives after creation; seqnum-tracked.
  Plug,
  /// Registers `object` as a child of the receiver; seqnum-tracked.
  Own { object: OwnRef },
  /// Hands a transport engine to a session; seqnum-tracked.
  Attach { engine: Box<dyn IEngine> },
  /// Attaches a pipe end to the receiver; seqnum-tracked.
  Bind { pipe: Arc<Pipe> },
  /// The peer flushed messages into a pipe whose reader was asleep.
  ActivateRead,
  /// The peer consumed messages; carries its cumulative read count so the
  /// writer can re-evaluate flow control.
  ActivateWrite { msgs_read: u64 },
  /// The peer replaced its inbound queue; carries the writer half of the
  /// replacement so our writes resume into the new queue.
  Hiccup { pipe: MsgPipeWriter },
  /// Pipe termination request (peer-to-peer half of the handshake).
  PipeTerm,
  /// Pipe termination acknowledgement.
  PipeTermAck,
  /// A child asks its owner to shut it down.
  TermReq { object: OwnRef },
  /// Owner orders the receiver to terminate, carrying the linger budget.
  Term { linger_ms: i32 },
  /// A child acknowledges its termination to its owner.
  TermAck,
  /// Hands a closing socket to the reaper.
  Reap { socket: Arc<SocketCore> },
  /// A reaped socket finished destruction.
  Reaped { handle: u32 },
  /// Reaper tells the terminating context thread that shutdown is complete.
  Done,
  /// Stops the reaper without waiting for pending sockets.
  ForceStop,
}

impl CommandKind {
  /// Stable name for logging.
  pub(crate) fn variant_name(&self) -> &'static str {
    match self {
      CommandKind::Stop => "Stop",
      CommandKind::Plug => "Plug",
      CommandKind::Own { .. } => "Own",
      CommandKind::Attach { .. } => "Attach",
      CommandKind::Bind { .. } => "Bind",
      CommandKind::ActivateRead => "ActivateRead",
      CommandKind::ActivateWrite { .. } => "ActivateWrite",
      CommandKind::Hiccup { .. } => "Hiccup",
      CommandKind::PipeTerm => "PipeTerm",
      CommandKind::PipeTermAck => "PipeTermAck",
      CommandKind::TermReq { .. } => "TermReq",
      CommandKind::Term { .. } => "Term",
      CommandKind::TermAck => "TermAck",
      CommandKind::Reap { .. } => "Reap",
      CommandKind::Reaped { .. } => "Reaped",
      CommandKind::Done => "Done",
      CommandKind::ForceStop => "ForceStop",
    }
  }
}

impl fmt::Debug for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Command")
      .field("kind", &self.kind.variant_name())
      .field(
        "dest_tid",
        &self.destination.as_ref().map(|d| d.core().tid),
      )
      .finish()
  }
}
