//! minirpc registry: a TTL map of live server addresses over HTTP.
//!
//! # Overview
//!
//! Servers announce themselves with periodic `POST` heartbeats carrying
//! their address in a header; clients `GET` the sorted list of addresses
//! whose last heartbeat is still within the TTL. Expired entries are purged
//! lazily on query. The [`heartbeat`] helper runs a server's announce loop:
//! one immediate beat, then a ticker until the first failure.

pub mod registry;

pub use registry::{heartbeat, Registry, DEFAULT_TIMEOUT};
