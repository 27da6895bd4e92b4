//! Base trait for every threaded entity that can receive commands.
//!
//! An object lives on one logical thread (`tid` indexes the context's slot
//! table) and receives commands through that thread's mailbox. Dispatch is
//! a pure switch over the command tag into one hook per tag; hooks default
//! to a loud panic, so receiving a tag an entity cannot legally handle is
//! a programming error, never silently ignored.

use std::sync::Arc;

use tracing::trace;

use crate::ctx::Context;
use crate::runtime::command::{Command, CommandKind, MsgPipeWriter};
use crate::runtime::own::OwnRef;
use crate::runtime::pipe::Pipe;
use crate::socket::core::SocketCore;
use crate::engine::IEngine;

/// Thread identity plus the context an object belongs to.
pub(crate) struct ObjectCore {
  pub(crate) ctx: Context,
  pub(crate) tid: u32,
}

impl ObjectCore {
  pub(crate) fn new(ctx: Context, tid: u32) -> Self {
    Self { ctx, tid }
  }
}

pub(crate) trait Object: Send + Sync {
  fn core(&self) -> &ObjectCore;

  /// Bumps the receiver's sent-command counter. Overridden by ownership
  /// nodes; a plain object has no destruction fencing and ignores it.
  fn inc_seqnum(&self) {}

  /// Dispatches one command into the per-tag hooks.
  fn process_command(&self, kind: CommandKind) {
    trace!(tid = self.core().tid, cmd = kind.variant_name(), "processing command");
    match kind {
      CommandKind::ActivateRead => self.process_activate_read(),
      CommandKind::ActivateWrite { msgs_read } => self.process_activate_write(msgs_read),
      CommandKind::Stop => self.process_stop(),
      CommandKind::Plug => {
        self.process_plug();
        self.process_seqnum();
      }
      CommandKind::Own { object } => {
        self.process_own(object);
        self.process_seqnum();
      }
      CommandKind::Attach { engine } => {
        self.process_attach(engine);
        self.process_seqnum();
      }
      CommandKind::Bind { pipe } => {
        self.process_bind(pipe);
        self.process_seqnum();
      }
      CommandKind::Hiccup { pipe } => self.process_hiccup(pipe),
      CommandKind::PipeTerm => self.process_pipe_term(),
      CommandKind::PipeTermAck => self.process_pipe_term_ack(),
      CommandKind::TermReq { object } => self.process_term_req(object),
      CommandKind::Term { linger_ms } => self.process_term(linger_ms),
      CommandKind::TermAck => self.process_term_ack(),
      CommandKind::Reap { socket } => self.process_reap(socket),
      CommandKind::Reaped { handle } => self.process_reaped(handle),
      CommandKind::ForceStop => self.process_force_stop(),
      // Done never reaches dispatch; the terminator mailbox consumes it.
      CommandKind::Done => self.unhandled("Done"),
    }
  }

  // --- Per-tag hooks. Override only the tags the entity can receive. ---

  fn process_stop(&self) {
    self.unhandled("Stop")
  }
  fn process_plug(&self) {
    self.unhandled("Plug")
  }
  fn process_own(&self, _object: OwnRef) {
    self.unhandled("Own")
  }
  fn process_attach(&self, _engine: Box<dyn IEngine>) {
    self.unhandled("Attach")
  }
  fn process_bind(&self, _pipe: Arc<Pipe>) {
    self.unhandled("Bind")
  }
  fn process_activate_read(&self) {
    self.unhandled("ActivateRead")
  }
  fn process_activate_write(&self, _msgs_read: u64) {
    self.unhandled("ActivateWrite")
  }
  fn process_hiccup(&self, _pipe: MsgPipeWriter) {
    self.unhandled("Hiccup")
  }
  fn process_pipe_term(&self) {
    self.unhandled("PipeTerm")
  }
  fn process_pipe_term_ack(&self) {
    self.unhandled("PipeTermAck")
  }
  fn process_term_req(&self, _object: OwnRef) {
    self.unhandled("TermReq")
  }
  fn process_term(&self, _linger_ms: i32) {
    self.unhandled("Term")
  }
  fn process_term_ack(&self) {
    self.unhandled("TermAck")
  }
  fn process_reap(&self, _socket: Arc<SocketCore>) {
    self.unhandled("Reap")
  }
  fn process_reaped(&self, _handle: u32) {
    self.unhandled("Reaped")
  }
  fn process_force_stop(&self) {
    self.unhandled("ForceStop")
  }

  /// Follows seqnum-tracked commands (Plug/Own/Attach/Bind); overridden by
  /// ownership nodes to advance the processed counter.
  fn process_seqnum(&self) {
    self.unhandled("seqnum")
  }

  fn unhandled(&self, tag: &'static str) {
    panic!(
      "object on tid {} received unsupported command {tag}",
      self.core().tid
    );
  }

  // --- Typed send helpers. ---
  //
  // Sending routes through the context's slot table: the command lands in
  // the mailbox registered for the destination's tid. Seqnum-tracked sends
  // bump the destination's sent counter *before* the command is enqueued.

  fn send_plug(&self, dest: &OwnRef, inc_seqnum: bool) {
    if inc_seqnum {
      dest.inc_seqnum();
    }
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::Plug,
      },
    );
  }

  fn send_own(&self, dest: &OwnRef, object: OwnRef) {
    dest.inc_seqnum();
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::Own { object },
      },
    );
  }

  fn send_attach(&self, dest: &Arc<dyn Object>, engine: Box<dyn IEngine>, inc_seqnum: bool) {
    if inc_seqnum {
      dest.inc_seqnum();
    }
    trace!(engine = engine.kind(), dest_tid = dest.core().tid, "attaching engine");
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(dest.clone()),
        kind: CommandKind::Attach { engine },
      },
    );
  }

  fn send_bind(&self, dest: &Arc<dyn Object>, pipe: Arc<Pipe>, inc_seqnum: bool) {
    if inc_seqnum {
      dest.inc_seqnum();
    }
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(dest.clone()),
        kind: CommandKind::Bind { pipe },
      },
    );
  }

  fn send_activate_read(&self, dest: &Arc<Pipe>) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::ActivateRead,
      },
    );
  }

  fn send_activate_write(&self, dest: &Arc<Pipe>, msgs_read: u64) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::ActivateWrite { msgs_read },
      },
    );
  }

  fn send_hiccup(&self, dest: &Arc<Pipe>, pipe: MsgPipeWriter) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::Hiccup { pipe },
      },
    );
  }

  fn send_pipe_term(&self, dest: &Arc<Pipe>) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::PipeTerm,
      },
    );
  }

  fn send_pipe_term_ack(&self, dest: &Arc<Pipe>) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::PipeTermAck,
      },
    );
  }

  fn send_term_req(&self, dest: &OwnRef, object: OwnRef) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::TermReq { object },
      },
    );
  }

  fn send_term(&self, dest: &OwnRef, linger_ms: i32) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::Term { linger_ms },
      },
    );
  }

  fn send_term_ack(&self, dest: &OwnRef) {
    let destination: Arc<dyn Object> = dest.clone();
    self.core().ctx.send_command(
      dest.core().tid,
      Command {
        destination: Some(destination),
        kind: CommandKind::TermAck,
      },
    );
  }

  fn send_reap(&self, socket: Arc<SocketCore>) {
    self.core().ctx.send_reap(socket);
  }

  fn send_reaped(&self, handle: u32) {
    self.core().ctx.send_reaped(handle);
  }

  fn send_done(&self) {
    self.core().ctx.send_done();
  }
}
