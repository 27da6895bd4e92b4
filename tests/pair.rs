use std::time::Duration;

use ozmq::{options, Msg, MsgFlags, SocketType, ZmqError, ZmqResult};

mod common;

#[test]
fn pair_roundtrip_over_inproc() -> ZmqResult<()> {
  let ctx = common::test_context();
  let server = ctx.socket(SocketType::Pair)?;
  server.bind("inproc://pair-roundtrip")?;
  let client = ctx.socket(SocketType::Pair)?;
  client.connect("inproc://pair-roundtrip")?;

  client.send(Msg::from_static(b"ping"))?;
  let msg = server.recv()?;
  assert_eq!(msg.data(), Some(&b"ping"[..]));

  server.send(Msg::from_static(b"pong"))?;
  let msg = client.recv()?;
  assert_eq!(msg.data(), Some(&b"pong"[..]));

  server.close()?;
  client.close()?;
  ctx.term()
}

#[test]
fn multipart_frames_preserve_more_flag_and_order() -> ZmqResult<()> {
  let ctx = common::test_context();
  let server = ctx.socket(SocketType::Pair)?;
  server.bind("inproc://pair-multipart")?;
  let client = ctx.socket(SocketType::Pair)?;
  client.connect("inproc://pair-multipart")?;

  let mut head = Msg::from_static(b"head");
  head.set_flags(MsgFlags::MORE);
  client.send(head)?;
  client.send(Msg::from_static(b"tail"))?;

  let first = server.recv()?;
  assert!(first.is_more());
  assert_eq!(first.data(), Some(&b"head"[..]));
  let second = server.recv()?;
  assert!(!second.is_more());
  assert_eq!(second.data(), Some(&b"tail"[..]));

  server.close()?;
  client.close()?;
  ctx.term()
}

#[test]
fn cross_thread_fifo_order_holds() -> ZmqResult<()> {
  const COUNT: u64 = 10_000;
  let ctx = common::test_context();
  let server = ctx.socket(SocketType::Pair)?;
  server.bind("inproc://pair-fifo")?;
  let client = ctx.socket(SocketType::Pair)?;
  client.connect("inproc://pair-fifo")?;

  let producer = std::thread::spawn(move || -> ZmqResult<()> {
    for i in 0..COUNT {
      client.send(Msg::from_vec(i.to_le_bytes().to_vec()))?;
    }
    client.close()
  });
  for i in 0..COUNT {
    let msg = server.recv()?;
    let bytes: [u8; 8] = msg.data().unwrap().try_into().unwrap();
    assert_eq!(u64::from_le_bytes(bytes), i);
  }
  producer.join().unwrap()?;
  server.close()?;
  ctx.term()
}

#[test]
fn watermark_applies_backpressure_and_reader_releases_it() -> ZmqResult<()> {
  let ctx = common::test_context();
  let server = ctx.socket(SocketType::Pair)?;
  server.set_option(options::RCVHWM, 2)?;
  server.bind("inproc://pair-hwm")?;
  let client = ctx.socket(SocketType::Pair)?;
  client.set_option(options::SNDHWM, 2)?;
  client.set_option(options::SNDTIMEO, 0)?;
  client.connect("inproc://pair-hwm")?;

  // Combined watermark is 4: both directions' opt-ins add up.
  for _ in 0..4 {
    client.send(Msg::from_static(b"fill"))?;
  }
  assert!(matches!(
    client.send(Msg::from_static(b"over")),
    Err(ZmqError::WouldBlock)
  ));

  // Draining past the low watermark reopens the window.
  server.recv()?;
  server.recv()?;
  client.set_option(options::SNDTIMEO, 2000)?;
  client.send(Msg::from_static(b"fits"))?;

  server.close()?;
  client.close()?;
  ctx.term()
}

#[test]
fn recv_honors_timeout_options() -> ZmqResult<()> {
  let ctx = common::test_context();
  let server = ctx.socket(SocketType::Pair)?;
  server.bind("inproc://pair-timeouts")?;
  let client = ctx.socket(SocketType::Pair)?;
  client.connect("inproc://pair-timeouts")?;

  server.set_option(options::RCVTIMEO, 0)?;
  assert!(matches!(server.recv(), Err(ZmqError::WouldBlock)));

  // A bounded timeout waits the full budget and then reports would-block,
  // same as the zero timeout does immediately.
  server.set_option(options::RCVTIMEO, 30)?;
  let started = std::time::Instant::now();
  assert!(matches!(server.recv(), Err(ZmqError::WouldBlock)));
  assert!(started.elapsed() >= Duration::from_millis(25));

  server.close()?;
  client.close()?;
  ctx.term()
}

#[test]
fn messages_in_flight_survive_close_with_linger() -> ZmqResult<()> {
  let ctx = common::test_context();
  let server = ctx.socket(SocketType::Pair)?;
  server.bind("inproc://pair-linger")?;
  let client = ctx.socket(SocketType::Pair)?;
  client.connect("inproc://pair-linger")?;

  client.send(Msg::from_static(b"parting gift"))?;
  client.close()?;

  // The pipe drains before its termination completes.
  let msg = server.recv()?;
  assert_eq!(msg.data(), Some(&b"parting gift"[..]));

  server.close()?;
  ctx.term()
}
