//! Socket options: ids, validated storage and value parsing.

use std::time::Duration;

use crate::error::{ZmqError, ZmqResult};

// --- Option ids (wire-compatible numbering) ---

pub const AFFINITY: i32 = 4;
pub const LINGER: i32 = 17;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const RCVTIMEO: i32 = 27;
pub const SNDTIMEO: i32 = 28;

pub(crate) const DEFAULT_HWM: i32 = 1000;

/// Holds parsed and validated socket options.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  // High water marks, applied to pipes at creation time; 0 = unlimited.
  pub sndhwm: i32,
  pub rcvhwm: i32,
  // Timeouts: None = -1 (infinite), Some(ZERO) = immediate, Some(>0) = bounded.
  pub sndtimeo: Option<Duration>,
  pub rcvtimeo: Option<Duration>,
  // Close behavior: None = wait forever for pending messages to drain.
  pub linger: Option<Duration>,
  // I/O thread selection mask; 0 = any thread.
  pub affinity: u64,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      sndhwm: DEFAULT_HWM,
      rcvhwm: DEFAULT_HWM,
      sndtimeo: None,
      rcvtimeo: None,
      linger: None,
      affinity: 0,
    }
  }
}

impl SocketOptions {
  pub(crate) fn set(&mut self, option: i32, value: &[u8]) -> ZmqResult<()> {
    match option {
      SNDHWM => self.sndhwm = parse_hwm_option(value, SNDHWM)?,
      RCVHWM => self.rcvhwm = parse_hwm_option(value, RCVHWM)?,
      SNDTIMEO => self.sndtimeo = parse_timeout_option(value, SNDTIMEO)?,
      RCVTIMEO => self.rcvtimeo = parse_timeout_option(value, RCVTIMEO)?,
      LINGER => self.linger = parse_timeout_option(value, LINGER)?,
      AFFINITY => self.affinity = parse_u64_option(value, AFFINITY)?,
      _ => return Err(ZmqError::InvalidOption(option)),
    }
    Ok(())
  }

  pub(crate) fn get(&self, option: i32) -> ZmqResult<Vec<u8>> {
    match option {
      SNDHWM => Ok(self.sndhwm.to_ne_bytes().to_vec()),
      RCVHWM => Ok(self.rcvhwm.to_ne_bytes().to_vec()),
      SNDTIMEO => Ok(encode_timeout(self.sndtimeo)),
      RCVTIMEO => Ok(encode_timeout(self.rcvtimeo)),
      LINGER => Ok(encode_timeout(self.linger)),
      AFFINITY => Ok(self.affinity.to_ne_bytes().to_vec()),
      _ => Err(ZmqError::InvalidOption(option)),
    }
  }

  /// Linger as the millisecond budget carried by `Term` commands.
  pub(crate) fn linger_ms(&self) -> i32 {
    match self.linger {
      None => -1,
      Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
    }
  }
}

// --- Value parsing ---

pub(crate) fn parse_i32_option(value: &[u8], option_id: i32) -> ZmqResult<i32> {
  let arr: [u8; 4] = value
    .try_into()
    .map_err(|_| ZmqError::InvalidOptionValue(option_id))?;
  Ok(i32::from_ne_bytes(arr))
}

fn parse_hwm_option(value: &[u8], option_id: i32) -> ZmqResult<i32> {
  let val = parse_i32_option(value, option_id)?;
  if val < 0 {
    return Err(ZmqError::InvalidOptionValue(option_id));
  }
  Ok(val)
}

/// -1 = infinite, 0 = immediate, >0 = milliseconds.
pub(crate) fn parse_timeout_option(value: &[u8], option_id: i32) -> ZmqResult<Option<Duration>> {
  let val = parse_i32_option(value, option_id)?;
  match val {
    -1 => Ok(None),
    0.. => Ok(Some(Duration::from_millis(val as u64))),
    _ => Err(ZmqError::InvalidOptionValue(option_id)),
  }
}

pub(crate) fn parse_u64_option(value: &[u8], option_id: i32) -> ZmqResult<u64> {
  let arr: [u8; 8] = value
    .try_into()
    .map_err(|_| ZmqError::InvalidOptionValue(option_id))?;
  Ok(u64::from_ne_bytes(arr))
}

fn encode_timeout(timeout: Option<Duration>) -> Vec<u8> {
  let val: i32 = match timeout {
    None => -1,
    Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
  };
  val.to_ne_bytes().to_vec()
}
