//! Dialing by address string: `tcp@host:port`, `unix@/path`,
//! `http@host:port` (CONNECT upgrade, then the normal protocol).

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use minirpc_core::framing::read_http_head;
use minirpc_core::{
    Options, Protocol, Result, RpcAddr, RpcError, CONNECTED_STATUS, DEFAULT_RPC_PATH,
};

use crate::client::Client;

/// Connects to `rpc_addr` and performs the handshake. Both the transport
/// connect and the client construction are bounded by
/// `options.connect_timeout`; zero waits indefinitely.
pub async fn dial(rpc_addr: &str, options: Options) -> Result<Client> {
    let addr: RpcAddr = rpc_addr.parse()?;
    let options = options.normalized();
    let timeout = options.connect_timeout;

    match addr.protocol {
        Protocol::Tcp => {
            let stream = connect(timeout, TcpStream::connect(addr.address.clone())).await?;
            construct(stream, options).await
        }
        Protocol::Unix => {
            let stream = connect(timeout, UnixStream::connect(addr.address.clone())).await?;
            construct(stream, options).await
        }
        Protocol::Http => {
            let stream = connect(timeout, TcpStream::connect(addr.address.clone())).await?;
            construct_http(stream, options).await
        }
    }
}

async fn connect<F, S>(timeout: Duration, fut: F) -> Result<S>
where
    F: Future<Output = std::io::Result<S>>,
{
    if timeout.is_zero() {
        return Ok(fut.await?);
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

/// Client construction writes the handshake frame, which can stall on a
/// dead peer just like the connect can, so it gets the same bound.
async fn construct<S>(stream: S, options: Options) -> Result<Client>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let timeout = options.connect_timeout;
    if timeout.is_zero() {
        return Client::new(stream, options).await;
    }
    match tokio::time::timeout(timeout, Client::new(stream, options)).await {
        Ok(client) => client,
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

async fn construct_http(mut stream: TcpStream, options: Options) -> Result<Client> {
    let timeout = options.connect_timeout;
    if timeout.is_zero() {
        http_handshake(&mut stream).await?;
        return Client::new(stream, options).await;
    }
    match tokio::time::timeout(timeout, async move {
        http_handshake(&mut stream).await?;
        Client::new(stream, options).await
    })
    .await
    {
        Ok(client) => client,
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

async fn http_handshake(stream: &mut TcpStream) -> Result<()> {
    stream
        .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
        .await?;
    stream.flush().await?;

    let head = read_http_head(stream).await?;
    let status_line = head.lines().next().unwrap_or("").trim();
    let expected = format!("HTTP/1.0 {CONNECTED_STATUS}");
    if status_line != expected {
        return Err(RpcError::Handshake(format!(
            "unexpected CONNECT response: {status_line}"
        )));
    }
    Ok(())
}
