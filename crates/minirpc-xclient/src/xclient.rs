//! The load-balancing super-client: discovery in front, a cache of one
//! [`Client`] per endpoint behind.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use minirpc_client::{dial, Client};
use minirpc_core::{Codec, Options, Result, RpcError};

use crate::discovery::{Discovery, SelectMode};

struct XClientInner<D> {
    discovery: D,
    mode: SelectMode,
    options: Options,
    /// One cached client per endpoint, owned by the cache; eviction closes
    /// it. Held across dials so concurrent callers don't race to the same
    /// endpoint.
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl<D: Discovery> XClientInner<D> {
    async fn dial_cached(&self, rpc_addr: &str) -> Result<Arc<Client>> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(Arc::clone(client));
            }
            debug!(%rpc_addr, "evicting dead cached client");
            if let Some(stale) = clients.remove(rpc_addr) {
                let _ = stale.close().await;
            }
        }

        let client = Arc::new(dial(rpc_addr, self.options.clone()).await?);
        clients.insert(rpc_addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    async fn call_addr(&self, rpc_addr: &str, service_method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let client = self.dial_cached(rpc_addr).await?;
        client.call_raw(service_method, body).await
    }
}

/// A client spanning every server the discovery knows, balancing unary
/// calls and fanning out broadcasts.
pub struct XClient<D: Discovery> {
    inner: Arc<XClientInner<D>>,
}

impl<D: Discovery> Clone for XClient<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, options: Options) -> Self {
        Self {
            inner: Arc::new(XClientInner {
                discovery,
                mode,
                options: options.normalized(),
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Calls one server picked by the discovery under the configured
    /// selection mode, reusing the cached connection when it is still
    /// healthy.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let codec = Codec::new(self.inner.options.codec);
        let rpc_addr = self.inner.discovery.get(self.inner.mode).await?;
        let body = codec.encode(args)?;
        let reply = self.inner.call_addr(&rpc_addr, service_method, body).await?;
        codec.decode(&reply)
    }

    /// Invokes the method on every known server at once.
    ///
    /// The first successful reply wins and is the one returned; later
    /// successes are discarded. The first error wins harder: it aborts the
    /// remaining in-flight siblings (their responses, if any, are dropped
    /// by each client's receiver) and becomes the broadcast's result. The
    /// future resolves only after every spawned task has settled.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let servers = self.inner.discovery.get_all().await?;
        let codec = Codec::new(self.inner.options.codec);
        let body = codec.encode(args)?;

        let mut tasks: JoinSet<Result<Vec<u8>>> = JoinSet::new();
        for rpc_addr in servers {
            let inner = Arc::clone(&self.inner);
            let service_method = service_method.to_string();
            let body = body.clone();
            tasks.spawn(async move { inner.call_addr(&rpc_addr, &service_method, body).await });
        }

        let mut winner: Option<Vec<u8>> = None;
        let mut first_err: Option<RpcError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(reply)) => {
                    if winner.is_none() {
                        winner = Some(reply);
                    }
                }
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                        tasks.abort_all();
                    }
                }
                Err(join_err) => {
                    // Aborted siblings land here; a panic would too.
                    if !join_err.is_cancelled() && first_err.is_none() {
                        first_err = Some(RpcError::Connection(join_err.to_string()));
                    }
                }
            }
        }

        match (first_err, winner) {
            (Some(e), _) => Err(e),
            (None, Some(reply)) => codec.decode(&reply),
            // get_all errors on an empty list, so only reachable if every
            // task was cancelled externally.
            (None, None) => Err(RpcError::NoAvailableServers),
        }
    }

    /// Closes every cached client and empties the cache. Per-client close
    /// errors are ignored.
    pub async fn close(&self) {
        let mut clients = self.inner.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }

    /// Number of endpoints with a cached connection.
    pub async fn cached_clients(&self) -> usize {
        self.inner.clients.lock().await.len()
    }
}
