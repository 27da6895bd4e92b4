//! Socket layer: the threaded core plus per-pattern state machines.

use std::sync::Arc;

use crate::message::Msg;
use crate::runtime::Pipe;

pub(crate) mod core;
pub mod options;
pub(crate) mod pair_socket;
pub(crate) mod types;

/// Pattern-specific hooks, called by the core on the thread currently
/// driving the socket (a user thread or, during teardown, the reaper).
/// The core serializes all calls, so implementations hold plain state.
pub(crate) trait ISocket: Send {
  /// A new pipe was attached (local connect or a peer's bind delivery).
  fn xattach_pipe(&mut self, pipe: &Arc<Pipe>);

  /// Routes one outbound frame. `Err` hands the frame back when no pipe
  /// can take it right now.
  fn xsend(&mut self, msg: Msg) -> Result<(), Msg>;

  /// Fetches one inbound frame, if any pipe has one ready.
  fn xrecv(&mut self) -> Option<Msg>;

  fn xhas_in(&mut self) -> bool;
  fn xhas_out(&mut self) -> bool;

  fn xread_activated(&mut self, pipe: &Arc<Pipe>);
  fn xwrite_activated(&mut self, pipe: &Arc<Pipe>);
  fn xhiccuped(&mut self, pipe: &Arc<Pipe>);
  fn xpipe_terminated(&mut self, pipe: &Arc<Pipe>);
}

pub(crate) fn create_pattern(socket_type: types::SocketType) -> Box<dyn ISocket> {
  match socket_type {
    types::SocketType::Pair => Box::new(pair_socket::PairSocket::new()),
  }
}
