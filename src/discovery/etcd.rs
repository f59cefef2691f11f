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

//! Discovery backed by an etcd registry.
//!
//! On construction a long-lived session is established and a watcher task
//! is spawned, bound to a cancellation token. The watcher blocks on
//! change notifications under the provider prefix and triggers a full
//! refresh on every event, re-arming the watch whenever the stream ends.
//! [`EtcdDiscovery::close`] cancels the watcher before the session is
//! dropped.

use crate::cancel::CancelToken;
use crate::discovery::{Discovery, SelectMode, StaticDiscovery};
use crate::discovery::registry::DEFAULT_UPDATE_TIMEOUT;
use crate::error::RpcError;
use crate::registry::etcd::PROVIDER_PREFIX;
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, WatchOptions};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Discovery pulling provider addresses from etcd.
pub struct EtcdDiscovery {
    servers: StaticDiscovery,
    client: Client,
    update_timeout: Duration,
    last_update: Mutex<Option<Instant>>,
    cancel: CancelToken,
}

impl EtcdDiscovery {
    /// Connects to an etcd cluster and starts the change watcher.
    ///
    /// A zero `update_timeout` falls back to
    /// [`DEFAULT_UPDATE_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Discovery`] if the session cannot be
    /// established.
    pub async fn connect<S: AsRef<str>>(
        endpoints: &[S],
        update_timeout: Duration,
    ) -> Result<Arc<Self>, RpcError> {
        let update_timeout = if update_timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            update_timeout
        };
        let client = Client::connect(
            endpoints,
            Some(ConnectOptions::new().with_connect_timeout(update_timeout)),
        )
        .await
        .map_err(|e| RpcError::Discovery(format!("etcd connect failed: {e}")))?;

        let discovery = Arc::new(Self {
            servers: StaticDiscovery::new(Vec::new()),
            client,
            update_timeout,
            last_update: Mutex::new(None),
            cancel: CancelToken::new(),
        });

        let watcher = Arc::clone(&discovery);
        tokio::spawn(async move { watcher.watch_providers().await });
        Ok(discovery)
    }

    /// Cancels the watcher task; the session drops with the handle.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .expect("etcd discovery lock poisoned")
            .is_some_and(|at| at + self.update_timeout > Instant::now())
    }

    /// Pulls the full provider list from etcd.
    async fn pull(&self) -> Result<(), RpcError> {
        let mut client = self.client.clone();
        let response = client
            .get(PROVIDER_PREFIX, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| RpcError::Discovery(format!("etcd get failed: {e}")))?;
        let servers: Vec<String> = response
            .kvs()
            .iter()
            .filter_map(|kv| kv.value_str().ok())
            .map(str::to_string)
            .collect();
        debug!(count = servers.len(), "rpc discovery: refreshed providers from etcd");
        self.servers.update(servers).await?;
        *self
            .last_update
            .lock()
            .expect("etcd discovery lock poisoned") = Some(Instant::now());
        Ok(())
    }

    /// Blocks on prefix change notifications, refreshing on each one.
    /// The watch is re-armed whenever the stream ends, so a one-shot
    /// notification source still yields continuous coverage.
    async fn watch_providers(self: Arc<Self>) {
        loop {
            let mut client = self.client.clone();
            let arm = client.watch(PROVIDER_PREFIX, Some(WatchOptions::new().with_prefix()));
            let (mut watcher, mut events) = tokio::select! {
                _ = self.cancel.cancelled() => return,
                armed = arm => match armed {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("rpc discovery: etcd watch failed: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        let _ = watcher.cancel().await;
                        return;
                    }
                    message = events.message() => match message {
                        Ok(Some(_event)) => {
                            // Something under the prefix changed; pull
                            // the full list rather than patching.
                            let _ = self.pull().await;
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Discovery for EtcdDiscovery {
    async fn refresh(&self) -> Result<(), RpcError> {
        if self.is_fresh() {
            return Ok(());
        }
        self.pull().await
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError> {
        self.servers.update(servers).await?;
        *self
            .last_update
            .lock()
            .expect("etcd discovery lock poisoned") = Some(Instant::now());
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
