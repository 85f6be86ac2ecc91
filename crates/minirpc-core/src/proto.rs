//! Protocol types: the per-connection handshake and the per-call header.
//!
//! A connection opens with exactly one JSON-encoded [`Options`] frame sent by
//! the client. The server validates the magic number, resolves the codec by
//! name and only then starts reading framed messages. Every message after
//! the handshake is a [`Header`] frame followed by a body frame, both in the
//! negotiated codec.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};
use crate::framing::{FrameReader, FrameWriter};

/// Marks a connection as speaking this protocol. Sent in the handshake;
/// mismatch aborts the connection without a response.
pub const MAGIC: u32 = 0x1A2B3C;

/// Default path served by the HTTP CONNECT upgrade.
pub const DEFAULT_RPC_PATH: &str = "/_minirpc_";

/// Status sent (and expected) on a successful CONNECT upgrade. A fixed
/// wire value, kept verbatim for compatibility with existing peers.
pub const CONNECTED_STATUS: &str = "200 Connected to Go RPC";

/// Default path of the registry's HTTP endpoint. Fixed wire value.
pub const DEFAULT_REGISTRY_PATH: &str = "/_gorpc_/registry";

/// Response header carrying the comma-joined, sorted list of live servers.
/// Fixed wire value.
pub const SERVERS_HEADER: &str = "X-Gorpc-Servers";

/// Request header naming the server a heartbeat announces. Fixed wire
/// value.
pub const SERVER_HEADER: &str = "X-Gorpc-Server";

/// Connection options, exchanged once per connection as a JSON frame.
///
/// The handshake is always JSON regardless of the body codec, so the server
/// can pick the body codec before decoding anything else. Timeout fields
/// travel as nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    #[serde(rename = "Number")]
    pub magic: u32,
    #[serde(rename = "CodecType")]
    pub codec: CodecKind,
    #[serde(rename = "ConnectTimeout", with = "duration_nanos")]
    pub connect_timeout: Duration,
    #[serde(rename = "HandleTimeout", with = "duration_nanos")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            codec: CodecKind::Msgpack,
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds server-side handling of each request. Zero (the default)
    /// disables the bound.
    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = timeout;
        self
    }

    /// Returns a copy with the magic forced to [`MAGIC`]. Dialing always
    /// normalises; the caller's value is never mutated in place.
    pub fn normalized(mut self) -> Self {
        self.magic = MAGIC;
        self
    }

    /// Writes the handshake frame (JSON) and flushes.
    pub async fn write_to(&self, writer: &mut FrameWriter) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        writer.write_frame(&payload).await?;
        writer.flush().await
    }

    /// Reads and decodes the handshake frame. Does not validate the magic;
    /// the server checks it so it can log the rejected value.
    pub async fn read_from(reader: &mut FrameReader) -> Result<Options> {
        let payload = reader.read_frame().await?;
        serde_json::from_slice(&payload)
            .map_err(|e| RpcError::Handshake(format!("bad options frame: {e}")))
    }
}

/// Per-call header, written in front of every body frame in both
/// directions. `error` is empty on requests and on successful responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "ServiceMethod")]
    pub service_method: String,
    #[serde(rename = "Seq")]
    pub seq: u64,
    #[serde(rename = "Error")]
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(d)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::split_stream;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.magic, MAGIC);
        assert_eq!(opts.codec, CodecKind::Msgpack);
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert_eq!(opts.handle_timeout, Duration::ZERO);
    }

    #[test]
    fn test_options_wire_field_names() {
        let opts = Options::default()
            .with_codec(CodecKind::Json)
            .with_connect_timeout(Duration::from_secs(1));
        let value = serde_json::to_value(&opts).unwrap();

        assert_eq!(value["Number"], 0x1A2B3C);
        assert_eq!(value["CodecType"], "json");
        assert_eq!(value["ConnectTimeout"], 1_000_000_000u64);
        assert_eq!(value["HandleTimeout"], 0);
    }

    #[test]
    fn test_options_round_trip() {
        let opts = Options::default().with_handle_timeout(Duration::from_millis(250));
        let json = serde_json::to_vec(&opts).unwrap();
        let back: Options = serde_json::from_slice(&json).unwrap();
        assert_eq!(opts, back);
    }

    #[test]
    fn test_normalized_forces_magic() {
        let mut opts = Options::default();
        opts.magic = 7;
        assert_eq!(opts.normalized().magic, MAGIC);
    }

    #[test]
    fn test_header_wire_field_names() {
        let header = Header::request("Foo.Sum", 3);
        let value = serde_json::to_value(&header).unwrap();

        assert_eq!(value["ServiceMethod"], "Foo.Sum");
        assert_eq!(value["Seq"], 3);
        assert_eq!(value["Error"], "");
    }

    #[tokio::test]
    async fn test_handshake_frame_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = split_stream(client);
        let (mut reader, _) = split_stream(server);

        let opts = Options::default().with_codec(CodecKind::Json);
        opts.write_to(&mut writer).await.unwrap();

        let received = Options::read_from(&mut reader).await.unwrap();
        assert_eq!(received, opts);
    }

    #[tokio::test]
    async fn test_handshake_rejects_garbage() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = split_stream(client);
        let (mut reader, _) = split_stream(server);

        writer.write_frame(b"not json at all").await.unwrap();
        writer.flush().await.unwrap();

        match Options::read_from(&mut reader).await {
            Err(RpcError::Handshake(_)) => {}
            other => panic!("expected Handshake error, got {:?}", other.map(|_| ())),
        }
    }
}
