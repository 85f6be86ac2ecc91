//! minirpc server: service registration and the connection dispatch engine.
//!
//! # Overview
//!
//! A [`Server`] owns a map of named [`Service`]s. Each accepted connection
//! gets its own reader task; each inbound request gets its own worker task;
//! workers share the connection's write half behind a lock so responses
//! never interleave. Server-side handling can be bounded per request by the
//! `handle_timeout` the client picked in its handshake; on expiry the
//! handler is cancelled and a timeout error is the one response written.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use minirpc_server::{Server, Service};
//! use serde::{Deserialize, Serialize};
//! use tokio::net::TcpListener;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { a: i32, b: i32 }
//!
//! #[tokio::main]
//! async fn main() -> minirpc_core::Result<()> {
//!     let server = Arc::new(Server::new());
//!     server.register(
//!         Service::new("Foo").method("Sum", |args: Args| async move { Ok(args.a + args.b) }),
//!     )?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:9999").await?;
//!     server.accept(listener).await;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod server;
pub mod service;

pub use http::{serve_http, serve_http_path};
pub use server::Server;
pub use service::{Method, Service};
