//! Discovery backed by the heartbeat registry's HTTP endpoint.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use minirpc_core::{Result, RpcError, SERVERS_HEADER};

use crate::discovery::{Discovery, MultiServersDiscovery, SelectMode};

/// How long a fetched server list stays fresh before the next `get`
/// triggers a re-fetch.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// A server list periodically pulled from a registry. Wraps
/// [`MultiServersDiscovery`] for selection; only the refresh path differs.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry_url: String,
    refresh_timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `registry_url` is the registry's full endpoint URL. A zero
    /// `refresh_timeout` means [`DEFAULT_REFRESH_TIMEOUT`].
    pub fn new(registry_url: impl Into<String>, refresh_timeout: Duration) -> Self {
        let refresh_timeout = if refresh_timeout.is_zero() {
            DEFAULT_REFRESH_TIMEOUT
        } else {
            refresh_timeout
        };
        Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            refresh_timeout,
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        {
            let last_update = self.last_update.lock().unwrap();
            if let Some(at) = *last_update {
                if at.elapsed() < self.refresh_timeout {
                    return Ok(());
                }
            }
        }

        debug!("refreshing servers from registry {}", self.registry_url);
        let response = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))?;

        let servers: Vec<String> = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        self.servers.update(servers).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.servers.update(servers).await?;
        *self.last_update.lock().unwrap() = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.servers.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_update_suppresses_refresh() {
        // The registry URL is never contacted while the manual update is
        // fresh, so a bogus URL must not produce an error.
        let d = RegistryDiscovery::new("http://127.0.0.1:1/none", Duration::from_secs(60));
        d.update(vec!["tcp@a:1".into()]).await.unwrap();
        assert_eq!(d.get_all().await.unwrap(), vec!["tcp@a:1".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_list_triggers_refresh_and_surfaces_errors() {
        let d = RegistryDiscovery::new("http://127.0.0.1:1/none", Duration::from_millis(1));
        d.update(vec!["tcp@a:1".into()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(d.get_all().await, Err(RpcError::Registry(_))));
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let d = RegistryDiscovery::new("http://example.invalid", Duration::ZERO);
        assert_eq!(d.refresh_timeout, DEFAULT_REFRESH_TIMEOUT);
    }
}
