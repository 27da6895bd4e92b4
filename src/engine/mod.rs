//! Transport engine seam.
//!
//! An engine encapsulates one wire connection and is handed to its
//! session through an `Attach` command. Inproc connections bypass engines
//! entirely (pipes run directly between the two sockets), so no concrete
//! engine ships here; the seam exists so network transports can plug in
//! without touching the command layer.

/// One attached wire connection.
pub(crate) trait IEngine: Send {
  /// Transport name for diagnostics ("tcp", "ipc", ...).
  fn kind(&self) -> &'static str;
}
