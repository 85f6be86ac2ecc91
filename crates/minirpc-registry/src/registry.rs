use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use minirpc_core::{Result, RpcError, DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};

/// Entries older than this are expired. Five minutes, like the heartbeat
/// default of four.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A TTL map of server addresses, refreshed by heartbeats.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// A zero `timeout` disables expiry: every registered address stays
    /// alive forever.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an address, or refreshes its `last_seen` if already known.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// The sorted list of addresses still within the TTL. Expired entries
    /// are removed on the way.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        if !self.timeout.is_zero() {
            servers.retain(|_, last_seen| last_seen.elapsed() < self.timeout);
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort_unstable();
        alive
    }

    /// Serves the registry protocol on [`DEFAULT_REGISTRY_PATH`] until the
    /// listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        self.serve_path(listener, DEFAULT_REGISTRY_PATH).await
    }

    /// Same as [`serve`](Self::serve) with an explicit path.
    pub async fn serve_path(self: Arc<Self>, listener: TcpListener, path: &str) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "registry connection established");
            let registry = Arc::clone(&self);
            let path = path.to_string();
            tokio::spawn(async move {
                let service = service_fn(move |request| {
                    let registry = Arc::clone(&registry);
                    let path = path.clone();
                    async move { Ok::<_, Infallible>(registry.handle(&path, request)) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("registry connection error: {e}");
                }
            });
        }
    }

    fn handle(&self, path: &str, request: Request<Incoming>) -> Response<Full<Bytes>> {
        if request.uri().path() != path {
            return respond(StatusCode::NOT_FOUND);
        }
        match request.method() {
            &Method::GET => {
                let alive = self.alive_servers().join(",");
                match Response::builder()
                    .status(StatusCode::OK)
                    .header(SERVERS_HEADER, alive)
                    .body(Full::new(Bytes::new()))
                {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("registry response error: {e}");
                        respond(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                }
            }
            &Method::POST => {
                let addr = request
                    .headers()
                    .get(SERVER_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("");
                if addr.is_empty() {
                    return respond(StatusCode::INTERNAL_SERVER_ERROR);
                }
                self.put_server(addr);
                respond(StatusCode::OK)
            }
            _ => respond(StatusCode::METHOD_NOT_ALLOWED),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn respond(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Announces `addr` to the registry: one immediate heartbeat (whose failure
/// is returned), then a background ticker that beats until the first
/// failure and gives up (best-effort, no reconnection). A zero `period`
/// defaults to the registry TTL minus one minute.
pub async fn heartbeat(
    registry_url: &str,
    addr: &str,
    period: Duration,
) -> Result<JoinHandle<()>> {
    let period = if period.is_zero() {
        DEFAULT_TIMEOUT - Duration::from_secs(60)
    } else {
        period
    };

    let http = reqwest::Client::new();
    send_heartbeat(&http, registry_url, addr).await?;

    let registry_url = registry_url.to_string();
    let addr = addr.to_string();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick is immediate and the immediate beat already went
        // out.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
                warn!("heartbeat error: {e}");
                return;
            }
        }
    });
    Ok(handle)
}

async fn send_heartbeat(http: &reqwest::Client, registry_url: &str, addr: &str) -> Result<()> {
    debug!("{addr} sends heartbeat to registry {registry_url}");
    let response = http
        .post(registry_url)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(e.to_string()))?;
    if !response.status().is_success() {
        return Err(RpcError::Registry(format!(
            "heartbeat rejected: {}",
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_list_sorted() {
        let registry = Registry::default();
        registry.put_server("tcp@zzz:1");
        registry.put_server("tcp@aaa:1");
        registry.put_server("tcp@mmm:1");
        assert_eq!(
            registry.alive_servers(),
            vec!["tcp@aaa:1", "tcp@mmm:1", "tcp@zzz:1"]
        );
    }

    #[test]
    fn test_put_is_upsert() {
        let registry = Registry::default();
        registry.put_server("tcp@a:1");
        registry.put_server("tcp@a:1");
        assert_eq!(registry.alive_servers().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_purged() {
        let registry = Registry::new(Duration::from_millis(20));
        registry.put_server("tcp@old:1");
        tokio::time::sleep(Duration::from_millis(40)).await;
        registry.put_server("tcp@new:1");
        assert_eq!(registry.alive_servers(), vec!["tcp@new:1"]);
    }

    #[tokio::test]
    async fn test_zero_timeout_keeps_everything() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_server("tcp@a:1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.alive_servers(), vec!["tcp@a:1"]);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_ttl() {
        let registry = Registry::new(Duration::from_millis(50));
        registry.put_server("tcp@a:1");
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            registry.put_server("tcp@a:1");
        }
        assert_eq!(registry.alive_servers(), vec!["tcp@a:1"]);
    }
}
