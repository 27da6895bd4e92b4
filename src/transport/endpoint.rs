//! Endpoint URI parsing.
//!
//! The addressing grammar is `scheme://address`. All three historical
//! schemes parse; only `inproc` currently resolves to a transport, the
//! others are rejected at bind/connect time with `UnsupportedTransport`
//! so their addresses still get early validation.

use crate::error::{ZmqError, ZmqResult};

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Endpoint {
  /// In-process: name scoped to one context.
  Inproc(String),
  /// TCP: `host:port`.
  Tcp(String),
  /// Unix domain socket path.
  Ipc(String),
}

impl Endpoint {
  pub(crate) fn scheme(&self) -> &'static str {
    match self {
      Endpoint::Inproc(_) => "inproc",
      Endpoint::Tcp(_) => "tcp",
      Endpoint::Ipc(_) => "ipc",
    }
  }
}

/// Parses an endpoint URI string.
pub(crate) fn parse_endpoint(endpoint: &str) -> ZmqResult<Endpoint> {
  let Some((scheme, address)) = endpoint.split_once("://") else {
    return Err(ZmqError::InvalidEndpoint(endpoint.to_string()));
  };
  if address.is_empty() {
    return Err(ZmqError::InvalidEndpoint(endpoint.to_string()));
  }
  match scheme {
    "inproc" => Ok(Endpoint::Inproc(address.to_string())),
    "tcp" => {
      // Validate the host:port shape up front; resolution happens later.
      let Some((host, port)) = address.rsplit_once(':') else {
        return Err(ZmqError::InvalidEndpoint(endpoint.to_string()));
      };
      if host.is_empty() || (port != "*" && port.parse::<u16>().is_err()) {
        return Err(ZmqError::InvalidEndpoint(endpoint.to_string()));
      }
      Ok(Endpoint::Tcp(address.to_string()))
    }
    "ipc" => Ok(Endpoint::Ipc(address.to_string())),
    _ => Err(ZmqError::UnsupportedTransport(scheme.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_inproc_names() {
    assert_eq!(
      parse_endpoint("inproc://my-endpoint").unwrap(),
      Endpoint::Inproc("my-endpoint".to_string())
    );
  }

  #[test]
  fn parses_tcp_addresses() {
    assert_eq!(
      parse_endpoint("tcp://127.0.0.1:5555").unwrap(),
      Endpoint::Tcp("127.0.0.1:5555".to_string())
    );
    assert_eq!(
      parse_endpoint("tcp://eth0:*").unwrap(),
      Endpoint::Tcp("eth0:*".to_string())
    );
    assert!(parse_endpoint("tcp://127.0.0.1").is_err());
    assert!(parse_endpoint("tcp://:5555").is_err());
    assert!(parse_endpoint("tcp://host:notaport").is_err());
  }

  #[test]
  fn rejects_malformed_uris() {
    assert!(matches!(
      parse_endpoint("no-scheme"),
      Err(ZmqError::InvalidEndpoint(_))
    ));
    assert!(matches!(
      parse_endpoint("inproc://"),
      Err(ZmqError::InvalidEndpoint(_))
    ));
    assert!(matches!(
      parse_endpoint("pgm://224.0.0.1:7777"),
      Err(ZmqError::UnsupportedTransport(_))
    ));
  }
}
