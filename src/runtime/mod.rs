//! The concurrency kernel: queues, mailboxes, commands, objects, pipes
//! and the dedicated execution units.

pub(crate) mod command;
pub(crate) mod io_thread;
pub(crate) mod mailbox;
pub(crate) mod object;
pub(crate) mod own;
pub(crate) mod pipe;
pub(crate) mod poller;
pub(crate) mod reaper;
pub(crate) mod signaler;
pub(crate) mod ypipe;
pub(crate) mod yqueue;

pub(crate) use command::{Command, CommandKind};
pub(crate) use object::Object;
pub(crate) use pipe::Pipe;
