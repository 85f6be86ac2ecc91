//! HTTP CONNECT upgrade: serve the RPC protocol on a port that speaks HTTP
//! first. A client sends `CONNECT <path> HTTP/1.0`; the server answers with
//! a `200` status line, takes the raw stream over and runs the normal
//! dispatch loop on it. Anything other than CONNECT gets a 405.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use minirpc_core::framing::read_http_head;
use minirpc_core::{Result, CONNECTED_STATUS, DEFAULT_RPC_PATH};

use crate::server::Server;

/// Accepts HTTP connections and upgrades CONNECT requests on
/// [`DEFAULT_RPC_PATH`] into RPC connections. Returns when the listener
/// fails.
pub async fn serve_http(server: Arc<Server>, listener: TcpListener) -> Result<()> {
    serve_http_path(server, listener, DEFAULT_RPC_PATH).await
}

/// Same as [`serve_http`] with an explicit upgrade path.
pub async fn serve_http_path(
    server: Arc<Server>,
    listener: TcpListener,
    rpc_path: &str,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "http connection established");
        let server = Arc::clone(&server);
        let rpc_path = rpc_path.to_string();
        tokio::spawn(async move {
            if let Err(e) = upgrade(server, stream, &rpc_path).await {
                warn!("http upgrade error: {e}");
            }
        });
    }
}

async fn upgrade(server: Arc<Server>, mut stream: TcpStream, rpc_path: &str) -> Result<()> {
    let head = read_http_head(&mut stream).await?;
    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    if method != "CONNECT" {
        stream
            .write_all(
                b"HTTP/1.0 405 Method Not Allowed\r\n\
                  Content-Type: text/plain; charset=utf-8\r\n\r\n\
                  405 must CONNECT\n",
            )
            .await?;
        return Ok(());
    }
    if path != rpc_path {
        stream.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await?;
        return Ok(());
    }

    stream
        .write_all(format!("HTTP/1.0 {CONNECTED_STATUS}\r\n\r\n").as_bytes())
        .await?;
    server.serve_conn(stream).await;
    Ok(())
}
