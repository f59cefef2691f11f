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

//! Etcd-backed server registration.
//!
//! A server registers itself as an ephemeral key
//! `/wirecall/providers/<addr>` bound to a lease sized to the registry
//! timeout. A background task renews the lease until the registration is
//! closed; if the process dies, the lease expires and the key vanishes on
//! its own, so no sweep is needed.

use crate::cancel::CancelToken;
use crate::error::RpcError;
use crate::registry::DEFAULT_REGISTRY_TIMEOUT;
use etcd_client::{Client, ConnectOptions, PutOptions};
use std::time::Duration;
use tracing::{debug, warn};

/// Key prefix ephemeral provider registrations live under.
pub const PROVIDER_PREFIX: &str = "/wirecall/providers";

/// Handle to an etcd cluster used for server registration.
pub struct EtcdRegistry {
    client: Client,
    timeout: Duration,
    cancel: CancelToken,
}

impl EtcdRegistry {
    /// Connects to an etcd cluster.
    ///
    /// A zero `timeout` falls back to the default registry timeout less
    /// one minute, matching the self-hosted registry's heartbeat cadence.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Discovery`] if the session cannot be
    /// established.
    pub async fn connect<S: AsRef<str>>(
        endpoints: &[S],
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let timeout = if timeout.is_zero() {
            DEFAULT_REGISTRY_TIMEOUT.saturating_sub(Duration::from_secs(60))
        } else {
            timeout
        };
        let client = Client::connect(
            endpoints,
            Some(ConnectOptions::new().with_connect_timeout(timeout)),
        )
        .await
        .map_err(|e| RpcError::Discovery(format!("etcd connect failed: {e}")))?;
        Ok(Self {
            client,
            timeout,
            cancel: CancelToken::new(),
        })
    }

    /// Registers a server address under an ephemeral lease-bound key and
    /// starts renewing the lease in the background.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Discovery`] if the lease or put fails.
    pub async fn register(&self, addr: &str) -> Result<(), RpcError> {
        let mut client = self.client.clone();
        let ttl = self.timeout.as_secs().max(2) as i64;
        let lease = client
            .lease_grant(ttl, None)
            .await
            .map_err(|e| RpcError::Discovery(format!("etcd lease grant failed: {e}")))?;
        client
            .put(
                format!("{PROVIDER_PREFIX}/{addr}"),
                addr,
                Some(PutOptions::new().with_lease(lease.id())),
            )
            .await
            .map_err(|e| RpcError::Discovery(format!("etcd put failed: {e}")))?;
        debug!(%addr, lease = lease.id(), "rpc registry: registered with etcd");

        let (mut keeper, mut responses) = client
            .lease_keep_alive(lease.id())
            .await
            .map_err(|e| RpcError::Discovery(format!("etcd keep-alive failed: {e}")))?;

        // Renew well inside the ttl and drain the acknowledgements so the
        // response stream never backs up.
        let cancel = self.cancel.child();
        let period = Duration::from_secs((ttl as u64 / 3).max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = keeper.keep_alive().await {
                            warn!("rpc registry: etcd lease renewal failed: {e}");
                            return;
                        }
                        match responses.message().await {
                            Ok(Some(_)) => {}
                            Ok(None) | Err(_) => return,
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops lease renewal; registrations expire with their leases.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
