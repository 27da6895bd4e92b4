use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type ZmqResult<T> = Result<T, ZmqError>;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum ZmqError {
  // --- Lifecycle Errors ---
  #[error("Context is terminating")]
  Terminating, // Corresponds to ETERM

  #[error("Too many open sockets for this context")]
  TooManySockets, // Corresponds to EMFILE

  #[error("Operation is invalid for the current socket state: {0}")]
  InvalidState(&'static str), // EFSM

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String), // EINVAL

  #[error("Endpoint not found: {0}")]
  EndpointNotFound(String), // Unregistered inproc name

  #[error("Address already in use: {0}")]
  AddrInUse(String), // Endpoint string EADDRINUSE

  #[error("Transport scheme not supported or enabled: {0}")]
  UnsupportedTransport(String), // EPROTONOSUPPORT

  // --- Flow Control & Timeouts ---
  #[error("Operation would block")]
  WouldBlock, // EAGAIN / EWOULDBLOCK

  #[error("Operation timed out")]
  Timeout, // Corresponds to ETIMEDOUT

  // --- Argument Errors ---
  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String), // EINVAL for non-option errors

  #[error("Invalid socket option ID: {0}")]
  InvalidOption(i32), // EINVAL

  #[error("Invalid value provided for option ID {0}")]
  InvalidOptionValue(i32), // EINVAL

  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}
