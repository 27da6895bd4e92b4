//! Asynchronous messaging kernel: sockets, contexts and the lock-light
//! command plumbing between them.
//!
//! Everything in the library is organized around threaded *objects*
//! exchanging *commands* through per-thread mailboxes built on wait-free
//! SPSC queues. Sockets form the roots of ownership trees whose two-phase
//! termination protocol guarantees orderly teardown without blocking the
//! caller; the in-process transport connects sockets directly with
//! flow-controlled pipes.
//!
//! ```no_run
//! use ozmq::{Context, Msg, SocketType};
//!
//! let ctx = Context::new();
//! let server = ctx.socket(SocketType::Pair)?;
//! server.bind("inproc://demo")?;
//! let client = ctx.socket(SocketType::Pair)?;
//! client.connect("inproc://demo")?;
//!
//! client.send(Msg::from_static(b"hello"))?;
//! let msg = server.recv()?;
//! assert_eq!(msg.data(), Some(&b"hello"[..]));
//!
//! drop((server, client));
//! ctx.term()?;
//! # Ok::<(), ozmq::ZmqError>(())
//! ```

mod ctx;
mod engine;
mod error;
mod message;
mod runtime;
mod socket;
mod transport;

pub use ctx::Context;
pub use error::{ZmqError, ZmqResult};
pub use message::{Msg, MsgFlags};
pub use socket::options;
pub use socket::types::{Socket, SocketType};

/// Library version as (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (
    env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
    env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
    env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
  )
}
