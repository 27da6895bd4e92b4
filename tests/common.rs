#![allow(dead_code)]

use std::sync::Once;
use std::time::{Duration, Instant};

use ozmq::Context;

static INIT: Once = Once::new();

/// A context with test logging wired up (`RUST_LOG` controls verbosity).
pub fn test_context() -> Context {
  INIT.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
  Context::new()
}

/// Polls `check` until it returns true or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if check() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    std::thread::sleep(Duration::from_millis(2));
  }
}
