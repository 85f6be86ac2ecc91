//! minirpc xclient: service discovery and a load-balancing super-client.
//!
//! # Overview
//!
//! [`Discovery`] answers "which server?": [`MultiServersDiscovery`] from a
//! manual list, [`RegistryDiscovery`] by polling a heartbeat registry.
//! [`XClient`] sits on top with a per-endpoint connection cache, balancing
//! unary [`call`](XClient::call)s by [`SelectMode`] and fanning
//! [`broadcast`](XClient::broadcast)s out to every endpoint with
//! first-reply-wins / first-error-aborts semantics.

pub mod discovery;
pub mod registry;
pub mod xclient;

pub use discovery::{Discovery, MultiServersDiscovery, SelectMode};
pub use registry::RegistryDiscovery;
pub use xclient::XClient;
