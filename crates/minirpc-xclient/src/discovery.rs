//! Endpoint discovery: something that can name a server (under a selection
//! mode) or list them all.

use std::future::Future;
use std::sync::Mutex;

use rand::Rng;

use minirpc_core::{Result, RpcError};

/// How [`Discovery::get`] picks among the known servers.
///
/// Unsupported modes are unrepresentable: adding a strategy means adding a
/// variant here and handling it in every implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// A uniformly random server.
    Random,
    /// Servers in turn, wrapping around.
    RoundRobin,
}

/// A provider of server endpoints.
pub trait Discovery: Send + Sync + 'static {
    /// Re-fetches the server list from wherever it comes from. A no-op for
    /// manual lists.
    fn refresh(&self) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the server list.
    fn update(&self, servers: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Picks one server. Errors with [`RpcError::NoAvailableServers`] when
    /// the list is empty.
    fn get(&self, mode: SelectMode) -> impl Future<Output = Result<String>> + Send;

    /// Returns every known server; an empty list is an error, same as
    /// [`get`](Discovery::get).
    fn get_all(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

struct MultiState {
    servers: Vec<String>,
    index: usize,
}

/// A manually maintained server list.
pub struct MultiServersDiscovery {
    state: Mutex<MultiState>,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        // Random initial offset so unrelated clients don't walk the list in
        // lockstep.
        let index = rand::thread_rng().gen_range(0..usize::MAX / 2);
        Self {
            state: Mutex::new(MultiState { servers, index }),
        }
    }
}

impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.state.lock().unwrap().servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                Ok(state.servers[rand::thread_rng().gen_range(0..n)].clone())
            }
            SelectMode::RoundRobin => {
                let picked = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(picked)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.servers.is_empty() {
            return Err(RpcError::NoAvailableServers);
        }
        Ok(state.servers.clone())
    }
}
