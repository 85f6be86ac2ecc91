//! minirpc client: a concurrent call multiplexer over one connection.
//!
//! # Overview
//!
//! A [`Client`] shares a single connection among any number of in-flight
//! calls. [`Client::go`] is the asynchronous primitive (send now, wait
//! later); [`Client::call`] is the synchronous wrapper. A background
//! receiver correlates responses by sequence number; responses for calls
//! that were cancelled in the meantime are drained and discarded.
//!
//! # Example
//!
//! ```no_run
//! use minirpc_client::dial;
//! use minirpc_core::Options;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { a: i32, b: i32 }
//!
//! #[tokio::main]
//! async fn main() -> minirpc_core::Result<()> {
//!     let client = dial("tcp@127.0.0.1:9999", Options::default()).await?;
//!     let sum: i32 = client.call("Foo.Sum", &Args { a: 3, b: 4 }).await?;
//!     assert_eq!(sum, 7);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod dial;

pub use client::{Call, Client};
pub use dial::dial;
