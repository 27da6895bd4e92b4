//! Endpoint addressing.

pub(crate) mod endpoint;

pub(crate) use endpoint::{parse_endpoint, Endpoint};
