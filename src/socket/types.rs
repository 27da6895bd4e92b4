//! Public socket handle.

use std::fmt;
use std::sync::Arc;

use crate::error::ZmqResult;
use crate::message::Msg;
use crate::socket::core::SocketCore;

/// Messaging pattern of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
  /// Exclusive one-to-one connection.
  Pair,
}

/// User-facing socket handle.
///
/// Not thread-safe: one thread at a time may drive a handle. Dropping the
/// handle closes the socket if `close` was not called explicitly.
pub struct Socket {
  core: Arc<SocketCore>,
}

impl Socket {
  pub(crate) fn new(core: Arc<SocketCore>) -> Self {
    Self { core }
  }

  pub fn socket_type(&self) -> SocketType {
    self.core.socket_type()
  }

  /// Registers an endpoint for peers to connect to.
  pub fn bind(&self, endpoint: &str) -> ZmqResult<()> {
    self.core.bind(endpoint)
  }

  /// Connects to a bound endpoint.
  pub fn connect(&self, endpoint: &str) -> ZmqResult<()> {
    self.core.connect(endpoint)
  }

  /// Sends one frame, blocking per the send-timeout option when the
  /// pattern cannot take it immediately.
  pub fn send(&self, msg: Msg) -> ZmqResult<()> {
    self.core.send(msg)
  }

  /// Receives one frame, blocking per the receive-timeout option.
  pub fn recv(&self) -> ZmqResult<Msg> {
    self.core.recv()
  }

  /// Sets an integer-valued option (see [`crate::socket::options`]).
  pub fn set_option(&self, option: i32, value: i32) -> ZmqResult<()> {
    self.core.set_option(option, &value.to_ne_bytes())
  }

  /// Sets an option from its raw byte encoding (needed for 64-bit options
  /// such as `AFFINITY`).
  pub fn set_option_raw(&self, option: i32, value: &[u8]) -> ZmqResult<()> {
    self.core.set_option(option, value)
  }

  /// Reads back an option in its raw byte encoding.
  pub fn get_option(&self, option: i32) -> ZmqResult<Vec<u8>> {
    self.core.get_option(option)
  }

  /// Closes the socket. Returns immediately; undelivered messages drain in
  /// the background within the linger budget.
  pub fn close(self) -> ZmqResult<()> {
    self.core.close()
    // Drop runs next and sees the socket already closed.
  }
}

impl Drop for Socket {
  fn drop(&mut self) {
    let _ = self.core.close();
  }
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("handle", &self.core.handle())
      .field("type", &self.core.socket_type())
      .finish()
  }
}
