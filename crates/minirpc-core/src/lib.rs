//! minirpc core: wire protocol, codecs and framing.
//!
//! This crate carries everything both sides of a connection agree on:
//!
//! - **Protocol**: the JSON handshake ([`Options`]) and the per-call
//!   [`Header`], plus the shared wire constants.
//! - **Codecs**: pluggable body codecs selected by name ([`CodecKind`],
//!   [`Codec`]). MessagePack by default, JSON as an alternative.
//! - **Framing**: 4-byte length-prefixed frames over any async byte stream
//!   ([`FrameReader`], [`FrameWriter`]).
//! - **Addresses**: the `tcp@`/`unix@`/`http@` endpoint scheme
//!   ([`RpcAddr`]).
//!
//! The server, client, load-balancing super-client and registry crates all
//! build on these types; none of them define wire formats of their own.

pub mod addr;
pub mod codec;
pub mod error;
pub mod framing;
pub mod proto;

pub use addr::{Protocol, RpcAddr};
pub use codec::{Codec, CodecKind};
pub use error::{Result, RpcError};
pub use framing::{split_stream, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use proto::{
    Header, Options, CONNECTED_STATUS, DEFAULT_REGISTRY_PATH, DEFAULT_RPC_PATH, MAGIC,
    SERVERS_HEADER, SERVER_HEADER,
};
