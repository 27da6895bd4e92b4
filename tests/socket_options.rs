use ozmq::{options, SocketType, ZmqError, ZmqResult};

mod common;

#[test]
fn options_round_trip_through_the_handle() -> ZmqResult<()> {
  let ctx = common::test_context();
  let socket = ctx.socket(SocketType::Pair)?;

  socket.set_option(options::SNDHWM, 512)?;
  assert_eq!(socket.get_option(options::SNDHWM)?, 512i32.to_ne_bytes());
  socket.set_option(options::LINGER, 100)?;
  assert_eq!(socket.get_option(options::LINGER)?, 100i32.to_ne_bytes());
  socket.set_option_raw(options::AFFINITY, &5u64.to_ne_bytes())?;
  assert_eq!(socket.get_option(options::AFFINITY)?, 5u64.to_ne_bytes());

  socket.close()?;
  ctx.term()
}

#[test]
fn invalid_options_are_rejected() -> ZmqResult<()> {
  let ctx = common::test_context();
  let socket = ctx.socket(SocketType::Pair)?;

  assert!(matches!(
    socket.set_option(9999, 1),
    Err(ZmqError::InvalidOption(9999))
  ));
  assert!(matches!(
    socket.set_option(options::RCVHWM, -5),
    Err(ZmqError::InvalidOptionValue(_))
  ));
  assert!(matches!(
    socket.set_option_raw(options::AFFINITY, &[1, 2, 3]),
    Err(ZmqError::InvalidOptionValue(_))
  ));

  socket.close()?;
  ctx.term()
}

#[test]
fn endpoint_errors_surface_precisely() -> ZmqResult<()> {
  let ctx = common::test_context();
  let socket = ctx.socket(SocketType::Pair)?;

  assert!(matches!(
    socket.bind("garbled"),
    Err(ZmqError::InvalidEndpoint(_))
  ));
  assert!(matches!(
    socket.bind("pgm://224.0.0.1:7777"),
    Err(ZmqError::UnsupportedTransport(_))
  ));
  assert!(matches!(
    socket.bind("tcp://127.0.0.1:5555"),
    Err(ZmqError::UnsupportedTransport(_))
  ));
  assert!(matches!(
    socket.connect("inproc://never-bound"),
    Err(ZmqError::EndpointNotFound(_))
  ));

  socket.bind("inproc://options-dup")?;
  let other = ctx.socket(SocketType::Pair)?;
  assert!(matches!(
    other.bind("inproc://options-dup"),
    Err(ZmqError::AddrInUse(_))
  ));

  other.close()?;
  socket.close()?;
  ctx.term()
}

#[test]
fn bound_name_frees_when_the_socket_closes() -> ZmqResult<()> {
  let ctx = common::test_context();
  let first = ctx.socket(SocketType::Pair)?;
  first.bind("inproc://options-rebind")?;
  first.close()?;

  let second = ctx.socket(SocketType::Pair)?;
  assert!(
    common::wait_until(std::time::Duration::from_secs(5), || {
      match second.bind("inproc://options-rebind") {
        Ok(()) => true,
        Err(ZmqError::AddrInUse(_)) => false,
        Err(other) => panic!("unexpected error {other}"),
      }
    }),
    "endpoint never unregistered"
  );
  second.close()?;
  ctx.term()
}
