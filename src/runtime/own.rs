//! Ownership-tree node: two-phase termination with seqnum fencing.
//!
//! Every non-leaf engine object belongs to exactly one owner, set once at
//! attach time. Termination cascades down the tree as `Term` commands and
//! acknowledgements cascade back up as `TermAck`. A node is destroyed only
//! when all three quiescence conditions hold at once: it is terminating,
//! every command ever addressed to it has been processed
//! (`processed == sent`), and no child acknowledgement is outstanding.
//! Deciding to die is purely local and never blocks; proving quiescence is
//! asynchronous and safe under arbitrary command reordering delays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::runtime::object::Object;

/// Shared handle to an ownership-tree node.
pub(crate) type OwnRef = Arc<dyn Own>;

#[derive(Default)]
struct OwnState {
  // Back-reference to the owner; non-owning so the tree's only strong
  // edges point downward (owner -> owned).
  owner: Option<Weak<dyn Own>>,
  owned: Vec<OwnRef>,
  term_acks: u32,
  terminating: bool,
  destroyed: bool,
}

/// Bookkeeping embedded in every `Own` implementor.
pub(crate) struct OwnCore {
  // Commands addressed to this node: bumped by senders (any thread),
  // matched by `processed` on the node's own thread.
  sent_seqnum: AtomicU64,
  processed_seqnum: AtomicU64,
  state: Mutex<OwnState>,
}

impl OwnCore {
  pub(crate) fn new() -> Self {
    Self {
      sent_seqnum: AtomicU64::new(0),
      processed_seqnum: AtomicU64::new(0),
      state: Mutex::new(OwnState::default()),
    }
  }

  pub(crate) fn inc_sent(&self) {
    self.sent_seqnum.fetch_add(1, Ordering::SeqCst);
  }

  fn set_owner(&self, owner: Weak<dyn Own>) {
    let mut st = self.state.lock();
    debug_assert!(st.owner.is_none(), "owner is set exactly once");
    st.owner = Some(owner);
  }

  pub(crate) fn is_terminating(&self) -> bool {
    self.state.lock().terminating
  }
}

pub(crate) trait Own: Object {
  fn own(&self) -> &OwnCore;

  /// Strong handle to self, reconstructed from the weak self-reference the
  /// implementor captured at construction (`Arc::new_cyclic`).
  fn own_ref(&self) -> OwnRef;

  /// Invoked exactly once, after quiescence. The implementor releases its
  /// resources here; the `TermAck` to the owner has already been sent.
  fn process_destroy(&self);

  /// Linger budget this node passes down when terminating children.
  fn linger(&self) -> i32 {
    0
  }

  // --- Provided protocol. Implementors forward the corresponding
  // `Object` hooks here (process_own -> handle_own, and so on). ---

  /// Takes ownership of `child`: sets the back-reference, plugs the child
  /// in on its own thread, then registers it with self via an `Own`
  /// command (so the owned set is only mutated on the owner's thread).
  fn launch_child(&self, child: OwnRef) {
    child.own().set_owner(Arc::downgrade(&self.own_ref()));
    self.send_plug(&child, true);
    self.send_own(&self.own_ref(), child);
  }

  /// Requests asynchronous shutdown of this node. Idempotent.
  fn terminate(&self) {
    let owner = {
      let st = self.own().state.lock();
      if st.terminating {
        return;
      }
      st.owner.as_ref().and_then(Weak::upgrade)
    };
    match owner {
      // Route through the owner so it can drop us from its owned set.
      Some(owner) => self.send_term_req(&owner, self.own_ref()),
      // Tree root: begin termination directly.
      None => self.process_term(self.linger()),
    }
  }

  fn handle_own(&self, object: OwnRef) {
    let terminating = self.own().state.lock().terminating;
    if terminating {
      // Too late to adopt: demand immediate termination instead.
      self.register_term_acks(1);
      self.send_term(&object, 0);
    } else {
      self.own().state.lock().owned.push(object);
    }
  }

  fn handle_term_req(&self, object: OwnRef) {
    {
      let mut st = self.own().state.lock();
      if st.terminating {
        // Termination already sweeping down this subtree.
        return;
      }
      let Some(idx) = st.owned.iter().position(|o| Arc::ptr_eq(o, &object)) else {
        // Not owned (any more): the request raced with our own Term.
        return;
      };
      st.owned.swap_remove(idx);
      st.term_acks += 1;
    }
    // The subtree inherits the terminator's linger, not its own.
    self.send_term(&object, self.linger());
  }

  fn handle_term(&self, linger_ms: i32) {
    let children = {
      let mut st = self.own().state.lock();
      assert!(!st.terminating, "double termination");
      st.terminating = true;
      st.term_acks += st.owned.len() as u32;
      std::mem::take(&mut st.owned)
    };
    for child in &children {
      self.send_term(child, linger_ms);
    }
    self.check_term_acks();
  }

  fn handle_term_ack(&self) {
    self.unregister_term_ack();
  }

  /// Advances the processed counter; follows Plug/Own/Attach/Bind.
  fn handle_seqnum(&self) {
    self.own().processed_seqnum.fetch_add(1, Ordering::SeqCst);
    self.check_term_acks();
  }

  fn register_term_acks(&self, count: u32) {
    self.own().state.lock().term_acks += count;
  }

  fn unregister_term_ack(&self) {
    {
      let mut st = self.own().state.lock();
      assert!(st.term_acks > 0, "unbalanced term ack");
      st.term_acks -= 1;
    }
    self.check_term_acks();
  }

  /// Destroys the node iff it is terminating, childless and provably
  /// quiescent. Safe to call speculatively; fires the destroy hook once.
  fn check_term_acks(&self) {
    let owner = {
      let core = self.own();
      let mut st = core.state.lock();
      if !st.terminating || st.destroyed || st.term_acks != 0 {
        return;
      }
      if core.processed_seqnum.load(Ordering::SeqCst) != core.sent_seqnum.load(Ordering::SeqCst) {
        // Commands addressed to us are still in flight.
        return;
      }
      assert!(st.owned.is_empty());
      st.destroyed = true;
      st.owner.take().and_then(|w| w.upgrade())
    };
    debug!(tid = self.core().tid, "ownership node quiescent, destroying");
    if let Some(owner) = owner {
      self.send_term_ack(&owner);
    }
    self.process_destroy();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

  use crate::ctx::Context;
  use crate::runtime::command::CommandKind;
  use crate::runtime::mailbox::Mailbox;
  use crate::runtime::object::ObjectCore;

  struct TestNode {
    core: ObjectCore,
    own: OwnCore,
    self_ref: Weak<TestNode>,
    plugged: AtomicBool,
    destroyed: AtomicBool,
  }

  impl TestNode {
    fn new(ctx: &Context, tid: u32) -> Arc<Self> {
      Arc::new_cyclic(|weak| TestNode {
        core: ObjectCore::new(ctx.clone(), tid),
        own: OwnCore::new(),
        self_ref: weak.clone(),
        plugged: AtomicBool::new(false),
        destroyed: AtomicBool::new(false),
      })
    }

    fn destroyed(&self) -> bool {
      self.destroyed.load(AtomicOrdering::SeqCst)
    }
  }

  impl Object for TestNode {
    fn core(&self) -> &ObjectCore {
      &self.core
    }
    fn inc_seqnum(&self) {
      self.own.inc_sent();
    }
    fn process_plug(&self) {
      self.plugged.store(true, AtomicOrdering::SeqCst);
    }
    fn process_own(&self, object: OwnRef) {
      self.handle_own(object);
    }
    fn process_term_req(&self, object: OwnRef) {
      self.handle_term_req(object);
    }
    fn process_term(&self, linger_ms: i32) {
      self.handle_term(linger_ms);
    }
    fn process_term_ack(&self) {
      self.handle_term_ack();
    }
    fn process_seqnum(&self) {
      self.handle_seqnum();
    }
  }

  impl Own for TestNode {
    fn own(&self) -> &OwnCore {
      &self.own
    }
    fn own_ref(&self) -> OwnRef {
      self.self_ref.upgrade().expect("node alive")
    }
    fn process_destroy(&self) {
      assert!(!self.destroyed.swap(true, AtomicOrdering::SeqCst), "destroyed twice");
    }
  }

  fn drain(mb: &mut Mailbox) -> usize {
    let mut dispatched = 0;
    while let Some(cmd) = mb.try_recv() {
      let destination = cmd.destination.expect("tree commands carry a destination");
      destination.process_command(cmd.kind);
      dispatched += 1;
    }
    dispatched
  }

  fn tree() -> (Arc<TestNode>, Arc<TestNode>, Mailbox, Mailbox) {
    let ctx = Context::new();
    let (tid_parent, mb_parent) = ctx.register_test_mailbox();
    let (tid_child, mb_child) = ctx.register_test_mailbox();
    let parent = TestNode::new(&ctx, tid_parent);
    let child = TestNode::new(&ctx, tid_child);
    (parent, child, mb_parent, mb_child)
  }

  #[test]
  fn termination_cascades_down_and_acks_back_up() {
    let (parent, child, mut mb_parent, mut mb_child) = tree();
    parent.launch_child(child.own_ref());
    drain(&mut mb_child);
    drain(&mut mb_parent);
    assert!(child.plugged.load(AtomicOrdering::SeqCst));

    parent.terminate();
    assert!(!parent.destroyed(), "waits for the child's ack");
    drain(&mut mb_child);
    assert!(child.destroyed());
    drain(&mut mb_parent);
    assert!(parent.destroyed());
  }

  #[test]
  fn destruction_waits_for_commands_still_in_flight() {
    let (parent, child, mut mb_parent, mut mb_child) = tree();
    parent.launch_child(child.own_ref());
    drain(&mut mb_child);
    drain(&mut mb_parent);

    // A sender bumped the child's seqnum but its command is still in
    // flight; quiescence must not be declared under it.
    child.inc_seqnum();
    parent.terminate();
    drain(&mut mb_child);
    assert!(child.own().is_terminating());
    assert!(!child.destroyed());

    // The late command lands; now the counters match and the node dies.
    child.process_command(CommandKind::Plug);
    assert!(child.destroyed());
    drain(&mut mb_parent);
    assert!(parent.destroyed());
  }

  #[test]
  fn child_initiated_shutdown_routes_through_the_owner() {
    let (parent, child, mut mb_parent, mut mb_child) = tree();
    parent.launch_child(child.own_ref());
    drain(&mut mb_child);
    drain(&mut mb_parent);

    child.terminate();
    drain(&mut mb_parent);
    drain(&mut mb_child);
    assert!(child.destroyed());
    drain(&mut mb_parent);
    assert!(!parent.destroyed(), "owner keeps running");
  }

  #[test]
  fn child_adopted_during_termination_is_refused_and_reaped() {
    let (parent, child, mut mb_parent, mut mb_child) = tree();
    // The Own command races with termination: it arrives after the
    // parent already started shutting down, so the child is turned away
    // with an immediate Term instead of joining the owned set.
    parent.launch_child(child.own_ref());
    parent.terminate();
    drain(&mut mb_parent);
    drain(&mut mb_child);
    assert!(child.destroyed());
    drain(&mut mb_parent);
    assert!(parent.destroyed());
  }

  #[test]
  fn terminate_is_idempotent() {
    let (parent, child, mut mb_parent, mut mb_child) = tree();
    parent.launch_child(child.own_ref());
    drain(&mut mb_child);
    drain(&mut mb_parent);
    parent.terminate();
    parent.terminate();
    drain(&mut mb_child);
    drain(&mut mb_parent);
    assert!(parent.destroyed());
    assert!(child.destroyed());
  }
}
