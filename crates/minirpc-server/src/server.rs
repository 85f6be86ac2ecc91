//! The connection dispatch engine.
//!
//! One task per accepted connection reads frames and spawns one worker per
//! request; workers answer through a shared, mutex-guarded write half so
//! responses never interleave. Responses are not ordered: clients correlate
//! them by the sequence number echoed in the header.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use minirpc_core::{split_stream, Codec, FrameWriter, Header, Options, Result, RpcError, MAGIC};

use crate::service::Service;

/// An RPC server: a concurrent map of registered services plus the accept
/// and per-connection dispatch loops.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a service under its name. Registered services are
    /// immutable; a second registration under the same name fails and
    /// leaves the first one untouched.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RpcError::DuplicateService(name));
        }
        services.insert(name, Arc::new(service));
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().unwrap().get(name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().unwrap().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Resolves `"Service.Method"` to the service and method name, splitting
    /// at the last dot.
    fn find(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let (service_name, method_name) = service_method
            .rsplit_once('.')
            .ok_or_else(|| RpcError::IllFormedMethod(service_method.to_string()))?;
        let service = self
            .service(service_name)
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        if !service.has_method(method_name) {
            return Err(RpcError::MethodNotFound(method_name.to_string()));
        }
        Ok((service, method_name.to_string()))
    }

    /// Accepts connections until the listener fails, serving each one on
    /// its own task.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection established");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(e) => {
                    warn!("accept error: {e}");
                    return;
                }
            }
        }
    }

    /// Serves a single connection: handshake, then the dispatch loop until
    /// the peer goes away or the stream breaks. Works over any
    /// bidirectional byte stream (TCP, Unix socket, hijacked CONNECT
    /// stream, in-memory pipe).
    pub async fn serve_conn<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = split_stream(stream);

        let options = match Options::read_from(&mut reader).await {
            Ok(options) => options,
            Err(e) => {
                warn!("options error: {e}");
                return;
            }
        };
        if options.magic != MAGIC {
            warn!("invalid magic number {:#x}", options.magic);
            return;
        }

        let codec = Codec::new(options.codec);
        let writer = Arc::new(Mutex::new(writer));
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            let header: Header = match reader.read_frame().await {
                Ok(frame) => match codec.decode(&frame) {
                    Ok(header) => header,
                    Err(e) => {
                        warn!("read header error: {e}");
                        break;
                    }
                },
                Err(RpcError::Disconnected) => break,
                Err(e) => {
                    warn!("read header error: {e}");
                    break;
                }
            };

            match self.find(&header.service_method) {
                Err(e) => {
                    // Skip the body so the stream stays framed, then answer
                    // with a per-call error; the connection survives.
                    if reader.read_frame().await.is_err() {
                        break;
                    }
                    let mut header = header;
                    header.error = e.to_string();
                    send_response(&writer, codec, &header, None).await;
                }
                Ok((service, method_name)) => {
                    let body = match reader.read_frame().await {
                        Ok(body) => body,
                        Err(e) => {
                            warn!("read body error: {e}");
                            break;
                        }
                    };
                    workers.spawn(handle_request(
                        Arc::clone(&writer),
                        codec,
                        header,
                        service,
                        method_name,
                        body,
                        options.handle_timeout,
                    ));
                }
            }
        }

        // In-flight workers still get to answer before the connection is
        // dropped.
        while workers.join_next().await.is_some() {}
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// One worker per request. Runs the handler, bounded by `handle_timeout`
/// when non-zero, and writes exactly one response.
async fn handle_request(
    writer: Arc<Mutex<FrameWriter>>,
    codec: Codec,
    mut header: Header,
    service: Arc<Service>,
    method_name: String,
    body: Vec<u8>,
    handle_timeout: Duration,
) {
    let invocation = service.invoke(&method_name, codec, body);

    let result = if handle_timeout.is_zero() {
        invocation.await
    } else {
        match tokio::time::timeout(handle_timeout, invocation).await {
            Ok(result) => result,
            // The handler future is dropped on expiry, so the timeout reply
            // is the only response this request will ever produce.
            Err(_) => Err(RpcError::HandleTimeout(handle_timeout)),
        }
    };

    match result {
        Ok(reply) => send_response(&writer, codec, &header, Some(reply)).await,
        Err(e) => {
            header.error = e.to_string();
            send_response(&writer, codec, &header, None).await;
        }
    }
}

/// Writes one response under the sending lock. `None` body means the `{}`
/// placeholder that accompanies an error header.
async fn send_response(
    writer: &Mutex<FrameWriter>,
    codec: Codec,
    header: &Header,
    body: Option<Vec<u8>>,
) {
    let header_bytes = match codec.encode(header) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("encode response header error: {e}");
            return;
        }
    };
    let body_bytes = match body {
        Some(bytes) => bytes,
        None => match codec.encode_placeholder() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("encode placeholder error: {e}");
                return;
            }
        },
    };

    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_message(&header_bytes, &body_bytes).await {
        warn!("write response error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        a: i32,
        b: i32,
    }

    fn sum_service() -> Service {
        Service::new("Foo").method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let server = Server::new();
        server.register(sum_service()).unwrap();

        match server.register(sum_service()) {
            Err(RpcError::DuplicateService(name)) => assert_eq!(name, "Foo"),
            other => panic!("expected DuplicateService, got {other:?}"),
        }
        // The first registration stays usable.
        assert!(server.service("Foo").is_some());
    }

    #[test]
    fn test_find_resolves_last_dot() {
        let server = Server::new();
        server
            .register(
                Service::new("ns.Foo")
                    .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) }),
            )
            .unwrap();

        let (service, method) = server.find("ns.Foo.Sum").unwrap();
        assert_eq!(service.name(), "ns.Foo");
        assert_eq!(method, "Sum");
    }

    #[test]
    fn test_find_errors() {
        let server = Server::new();
        server.register(sum_service()).unwrap();

        assert!(matches!(
            server.find("no-dot"),
            Err(RpcError::IllFormedMethod(_))
        ));
        assert!(matches!(
            server.find("Bar.Sum"),
            Err(RpcError::ServiceNotFound(_))
        ));
        assert!(matches!(
            server.find("Foo.Mul"),
            Err(RpcError::MethodNotFound(_))
        ));
    }

    #[test]
    fn test_service_names_sorted() {
        let server = Server::new();
        server.register(Service::new("Zoo")).unwrap();
        server.register(Service::new("Bar")).unwrap();
        assert_eq!(server.service_names(), vec!["Bar", "Zoo"]);
    }
}
