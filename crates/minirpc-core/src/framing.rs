//! Length-delimited framing over arbitrary byte streams.
//!
//! Every message on the wire is a frame: a 4-byte big-endian length prefix
//! followed by that many payload bytes. Handshake, headers and bodies are
//! all individual frames; what the payload bytes mean is the codec's
//! business, not the framing layer's.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{Result, RpcError};

/// Maximum frame payload size (16 MiB). Larger frames are rejected before
/// the buffer is allocated.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Reading half of a framed connection. One reader task per connection.
pub struct FrameReader {
    inner: BufReader<BoxedRead>,
}

impl FrameReader {
    pub fn new(read: BoxedRead) -> Self {
        Self {
            inner: BufReader::new(read),
        }
    }

    /// Reads one frame. A clean close at the length prefix (and an abrupt
    /// close mid-frame) both surface as [`RpcError::Disconnected`].
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.inner
            .read_exact(&mut len_buf)
            .await
            .map_err(map_eof)?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(len));
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await.map_err(map_eof)?;
        Ok(buf)
    }
}

/// Writing half of a framed connection. Not internally synchronised: the
/// owner serialises writers (the per-connection sending lock).
pub struct FrameWriter {
    inner: BufWriter<BoxedWrite>,
}

impl FrameWriter {
    pub fn new(write: BoxedWrite) -> Self {
        Self {
            inner: BufWriter::new(write),
        }
    }

    /// Writes one frame into the buffer without flushing.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(payload.len()));
        }
        let len = payload.len() as u32;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(payload).await?;
        Ok(())
    }

    /// Writes a header frame and a body frame back to back, then flushes.
    /// Callers must hold the connection's sending lock across this so a
    /// logical message is never interleaved with another writer's bytes.
    pub async fn write_message(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        self.write_frame(header).await?;
        self.write_frame(body).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Splits any bidirectional stream (TCP, Unix, in-memory duplex) into a
/// framed reader/writer pair.
pub fn split_stream<S>(stream: S) -> (FrameReader, FrameWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    (
        FrameReader::new(Box::new(read) as BoxedRead),
        FrameWriter::new(Box::new(write) as BoxedWrite),
    )
}

/// Reads an HTTP request or response head off a raw socket, one byte at a
/// time, up to the terminating blank line. Used by the CONNECT upgrade on
/// both ends; reading byte-wise guarantees nothing past the head is
/// consumed before the stream switches to framed mode.
pub async fn read_http_head<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    const MAX_HEAD: usize = 8 * 1024;

    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
        if head.len() >= MAX_HEAD {
            return Err(RpcError::Handshake("oversized http head".into()));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(RpcError::Disconnected);
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).map_err(|_| RpcError::Handshake("http head is not utf-8".into()))
}

fn map_eof(err: std::io::Error) -> RpcError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        RpcError::Disconnected
    } else {
        RpcError::Io(err)
    }
}
