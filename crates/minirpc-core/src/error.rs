use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("invalid handshake: {0}")]
    Handshake(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// The peer closed the stream at a frame boundary (or mid-frame).
    #[error("connection closed")]
    Disconnected,

    /// The client was closed locally.
    #[error("connection is shut down")]
    Shutdown,

    /// An error reported by the server for a single call, carried in the
    /// response header.
    #[error("{0}")]
    Server(String),

    #[error("connect timeout: expected within {0:?}")]
    ConnectTimeout(Duration),

    #[error("request handle timeout: expected within {0:?}")]
    HandleTimeout(Duration),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("invalid rpc address: {0}")]
    InvalidAddress(String),

    #[error("service already defined: {0}")]
    DuplicateService(String),

    #[error("can't find service: {0}")]
    ServiceNotFound(String),

    #[error("can't find method: {0}")]
    MethodNotFound(String),

    #[error("service/method request ill-formed: {0}")]
    IllFormedMethod(String),

    #[error("no available servers")]
    NoAvailableServers,

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
