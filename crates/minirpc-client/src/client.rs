//! The call multiplexer: one connection, many concurrent calls.
//!
//! Every call gets a fresh sequence number and a one-shot completion
//! channel; a background receiver task matches response headers back to the
//! pending map. Writes share the connection's write half behind a lock, so
//! a header+body pair is never interleaved with another call's bytes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, warn};

use minirpc_core::{
    split_stream, Codec, FrameReader, FrameWriter, Header, Options, Result, RpcError,
};

type CallOutcome = Result<Vec<u8>>;

struct ClientState {
    /// Next sequence number; starts at 1, zero never names a call.
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallOutcome>>,
    /// User called `close`.
    closing: bool,
    /// The receiver terminated (read error or close signal).
    shutdown: bool,
}

struct ClientCore {
    codec: Codec,
    options: Options,
    /// The sending lock. Whoever writes a message holds this across both
    /// frames. Lock order is always sending lock before state lock.
    writer: Mutex<FrameWriter>,
    state: StdMutex<ClientState>,
    close_signal: Notify,
}

impl ClientCore {
    fn register_call(&self, done: oneshot::Sender<CallOutcome>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, done);
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<oneshot::Sender<CallOutcome>> {
        self.state.lock().unwrap().pending.remove(&seq)
    }

    /// Fails every pending call and marks the client shut down. Takes the
    /// sending lock first so no `go` is mid-write while the map drains.
    async fn terminate_calls(&self, err: RpcError) {
        let _sending = self.writer.lock().await;
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        let message = err.to_string();
        let closing = matches!(err, RpcError::Shutdown);
        for (_, done) in state.pending.drain() {
            let outcome = if closing {
                RpcError::Shutdown
            } else {
                RpcError::Connection(message.clone())
            };
            let _ = done.send(Err(outcome));
        }
    }
}

/// An in-flight call returned by [`Client::go`]. Await it with
/// [`Call::wait`]; dropping it first (cancellation, a caller-side timeout)
/// unregisters the call, and the eventual response is discarded by the
/// receiver. The request is not aborted on the wire.
pub struct Call {
    pub seq: u64,
    pub service_method: String,
    done: oneshot::Receiver<CallOutcome>,
    core: Weak<ClientCore>,
    finished: bool,
}

impl Call {
    /// Waits for the response body bytes (or the call's error).
    pub async fn wait(mut self) -> Result<Vec<u8>> {
        let outcome = (&mut self.done).await;
        self.finished = true;
        match outcome {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Shutdown),
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(core) = self.core.upgrade() {
                core.remove_call(self.seq);
            }
        }
    }
}

/// An RPC client over a single connection.
///
/// Any number of calls may be in flight at once; they complete in whatever
/// order the server answers. The client writes the handshake on
/// construction and spawns the background receiver.
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    /// Builds a client over an already-connected stream. Prefer
    /// [`dial`](crate::dial) for address strings.
    pub async fn new<S>(stream: S, options: Options) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let options = options.normalized();
        let (reader, mut writer) = split_stream(stream);
        options.write_to(&mut writer).await?;

        let core = Arc::new(ClientCore {
            codec: Codec::new(options.codec),
            options,
            writer: Mutex::new(writer),
            state: StdMutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            close_signal: Notify::new(),
        });
        tokio::spawn(receive_loop(Arc::clone(&core), reader));
        Ok(Client { core })
    }

    pub fn options(&self) -> &Options {
        &self.core.options
    }

    /// The asynchronous primitive: registers and sends one call, returning
    /// its [`Call`] handle without waiting for the response.
    pub async fn go<A: Serialize>(&self, service_method: &str, args: &A) -> Result<Call> {
        let body = self.core.codec.encode(args)?;
        self.go_raw(service_method, body).await
    }

    /// Like [`go`](Self::go) with pre-encoded argument bytes. Useful when
    /// one encoded body is fanned out to several servers.
    pub async fn go_raw(&self, service_method: &str, body: Vec<u8>) -> Result<Call> {
        let (done_tx, done_rx) = oneshot::channel();

        let mut writer = self.core.writer.lock().await;
        let seq = self.core.register_call(done_tx)?;

        let header = Header::request(service_method, seq);
        let header_bytes = match self.core.codec.encode(&header) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.core.remove_call(seq);
                return Err(e);
            }
        };
        if let Err(e) = writer.write_message(&header_bytes, &body).await {
            // The entry may already be gone if a partial write still got a
            // response through; either way the call is dead.
            self.core.remove_call(seq);
            return Err(e);
        }
        drop(writer);

        Ok(Call {
            seq,
            service_method: service_method.to_string(),
            done: done_rx,
            core: Arc::downgrade(&self.core),
            finished: false,
        })
    }

    /// The synchronous interface: send, wait, decode. Cancellation is the
    /// caller's: wrap the returned future in `tokio::time::timeout` (or
    /// drop it) and the call unregisters itself; the connection stays
    /// healthy and later calls proceed normally.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let call = self.go(service_method, args).await?;
        let body = call.wait().await?;
        self.core.codec.decode(&body)
    }

    /// [`call`](Self::call) with pre-encoded arguments and a raw reply.
    pub async fn call_raw(&self, service_method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let call = self.go_raw(service_method, body).await?;
        call.wait().await
    }

    /// Closes the connection. The first close wins; a second call returns
    /// the shutdown error. Pending calls are failed by the receiver as it
    /// winds down.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.core.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.core.close_signal.notify_one();
        let mut writer = self.core.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("shutdown error: {e}");
        }
        Ok(())
    }

    /// False once the client is closing or the connection broke.
    pub fn is_available(&self) -> bool {
        let state = self.core.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Number of calls currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.core.state.lock().unwrap().pending.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let mut state = self.core.state.lock().unwrap();
        if !state.closing {
            state.closing = true;
            self.core.close_signal.notify_one();
        }
    }
}

/// Background receiver: pairs response headers with pending calls until the
/// stream breaks or the client closes, then fails whatever is left.
async fn receive_loop(core: Arc<ClientCore>, mut reader: FrameReader) {
    let err = loop {
        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            _ = core.close_signal.notified() => Err(RpcError::Shutdown),
        };
        let header: Header = match frame.and_then(|f| core.codec.decode(&f)) {
            Ok(header) => header,
            Err(e) => break e,
        };

        // The body frame is always consumed, matched or not, so the stream
        // stays framed.
        let body = tokio::select! {
            frame = reader.read_frame() => frame,
            _ = core.close_signal.notified() => Err(RpcError::Shutdown),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => break e,
        };

        match core.remove_call(header.seq) {
            // Cancelled or timed out on our side; the server answered
            // anyway. Drop it.
            None => debug!(seq = header.seq, "discarding response for unknown call"),
            Some(done) => {
                let outcome = if header.error.is_empty() {
                    Ok(body)
                } else {
                    Err(RpcError::Server(header.error))
                };
                let _ = done.send(outcome);
            }
        }
    };

    if !matches!(err, RpcError::Shutdown | RpcError::Disconnected) {
        warn!("receive error: {err}");
    }
    core.terminate_calls(err).await;
}
