//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Discovery backed by the self-hosted HTTP registry.
//!
//! The registry advertises alive servers in the `X-Wirecall-Servers`
//! response header of a `GET`. This discovery pulls that list lazily:
//! every `get`/`get_all` refreshes first, and a refresh is a no-op while
//! the cached list is younger than the update timeout.

use crate::discovery::{Discovery, SelectMode, StaticDiscovery};
use crate::error::RpcError;
use crate::registry::SERVERS_HEADER;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default lifetime of a pulled server list.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery that polls a self-hosted registry over HTTP.
///
/// Selection and list bookkeeping are delegated to an owned
/// [`StaticDiscovery`]; this type only adds the pull-and-cache layer.
pub struct RegistryDiscovery {
    servers: StaticDiscovery,
    registry_url: String,
    update_timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// Creates a discovery polling the given registry URL.
    ///
    /// A zero `update_timeout` falls back to
    /// [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new(registry_url: impl Into<String>, update_timeout: Duration) -> Self {
        let update_timeout = if update_timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            update_timeout
        };
        Self {
            servers: StaticDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            update_timeout,
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .expect("registry discovery lock poisoned")
            .is_some_and(|at| at + self.update_timeout > Instant::now())
    }

    fn mark_updated(&self) {
        *self
            .last_update
            .lock()
            .expect("registry discovery lock poisoned") = Some(Instant::now());
    }

    async fn pull(&self) -> Result<(), RpcError> {
        debug!(registry = %self.registry_url, "rpc discovery: refreshing servers from registry");
        let response = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| RpcError::Discovery(format!("registry refresh failed: {e}")))?;
        let header = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let servers: Vec<String> = header
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(str::to_string)
            .collect();
        if servers.is_empty() {
            warn!(registry = %self.registry_url, "rpc discovery: registry returned no servers");
        }
        self.servers.update(servers).await?;
        self.mark_updated();
        Ok(())
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<(), RpcError> {
        if self.is_fresh() {
            return Ok(());
        }
        self.pull().await
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError> {
        self.servers.update(servers).await?;
        self.mark_updated();
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String, RpcError> {
        self.refresh().await?;
        self.servers.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>, RpcError> {
        self.refresh().await?;
        self.servers.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_update_counts_as_fresh() {
        // Pointing at a dead URL: a fresh manual update must keep get()
        // from ever touching the network.
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/registry", Duration::from_secs(60));
        discovery
            .update(vec!["tcp@127.0.0.1:7001".to_string()])
            .await
            .unwrap();

        let server = discovery.get(SelectMode::RoundRobin).await.unwrap();
        assert_eq!(server, "tcp@127.0.0.1:7001");
    }

    #[tokio::test]
    async fn test_stale_list_triggers_pull_and_propagates_failure() {
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/registry", Duration::from_millis(1));
        discovery
            .update(vec!["tcp@127.0.0.1:7001".to_string()])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = discovery.get(SelectMode::RoundRobin).await.unwrap_err();
        assert!(matches!(err, RpcError::Discovery(_)));
    }
}
