//! PAIR pattern: exclusive one-to-one messaging over a single pipe.

use std::sync::Arc;

use tracing::debug;

use crate::message::Msg;
use crate::runtime::Pipe;
use crate::socket::ISocket;

pub(crate) struct PairSocket {
  pipe: Option<Arc<Pipe>>,
}

impl PairSocket {
  pub(crate) fn new() -> Self {
    Self { pipe: None }
  }

  fn is_current(&self, pipe: &Arc<Pipe>) -> bool {
    self.pipe.as_ref().map_or(false, |p| Arc::ptr_eq(p, pipe))
  }
}

impl ISocket for PairSocket {
  fn xattach_pipe(&mut self, pipe: &Arc<Pipe>) {
    if self.pipe.is_some() {
      // PAIR carries exactly one connection; excess peers are refused.
      debug!("pair socket already connected, dropping extra pipe");
      pipe.terminate(false);
      return;
    }
    self.pipe = Some(pipe.clone());
  }

  fn xsend(&mut self, msg: Msg) -> Result<(), Msg> {
    let Some(pipe) = self.pipe.as_ref() else {
      return Err(msg);
    };
    let more = msg.is_more();
    if let Err(msg) = pipe.write(msg) {
      // Full or closing; the caller keeps the frame and may retry.
      return Err(msg);
    }
    if !more {
      pipe.flush();
    }
    Ok(())
  }

  fn xrecv(&mut self) -> Option<Msg> {
    self.pipe.as_ref().and_then(|pipe| pipe.read())
  }

  fn xhas_in(&mut self) -> bool {
    self.pipe.as_ref().map_or(false, |pipe| pipe.check_read())
  }

  fn xhas_out(&mut self) -> bool {
    self.pipe.as_ref().map_or(false, |pipe| pipe.check_write())
  }

  fn xread_activated(&mut self, _pipe: &Arc<Pipe>) {
    // Nothing to rebalance with a single pipe.
  }

  fn xwrite_activated(&mut self, _pipe: &Arc<Pipe>) {}

  fn xhiccuped(&mut self, _pipe: &Arc<Pipe>) {}

  fn xpipe_terminated(&mut self, pipe: &Arc<Pipe>) {
    if self.is_current(pipe) {
      self.pipe = None;
    }
  }
}
