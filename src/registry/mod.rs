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

//! Self-hosted service registry.
//!
//! A [`Registry`] tracks `{server address -> last heartbeat}` and serves
//! two HTTP verbs on a fixed path:
//!
//! - `POST` with header `X-Wirecall-Server: <addr>` registers the address
//!   or refreshes its heartbeat; a missing header is a `500`.
//! - `GET` answers with `X-Wirecall-Servers: <a,b,c>`, the alive servers
//!   sorted lexicographically; expired entries are deleted during the
//!   sweep.
//! - Any other method is a `405`.
//!
//! Servers keep themselves alive with the [`heartbeat`] helper.

#[cfg(feature = "etcd")]
pub mod etcd;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Path the registry HTTP surface is served on.
pub const DEFAULT_REGISTRY_PATH: &str = "/_wirecall_/registry";

/// Request header carrying one server address on `POST`.
pub const SERVER_HEADER: &str = "X-Wirecall-Server";

/// Response header carrying the alive server list on `GET`.
pub const SERVERS_HEADER: &str = "X-Wirecall-Servers";

/// Default lifetime of a heartbeat before an entry is swept.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Heartbeat-based server registry.
#[derive(Debug)]
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// Creates a registry whose entries expire after `timeout`. A zero
    /// timeout keeps entries alive forever.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a registry with [`DEFAULT_REGISTRY_TIMEOUT`].
    pub fn with_default_timeout() -> Self {
        Self::new(DEFAULT_REGISTRY_TIMEOUT)
    }

    /// Registers a server address or refreshes its heartbeat.
    pub fn put_server(&self, addr: impl Into<String>) {
        let addr = addr.into();
        debug!(%addr, "rpc registry: heartbeat");
        self.servers
            .lock()
            .expect("registry lock poisoned")
            .insert(addr, Instant::now());
    }

    /// Returns the alive servers sorted lexicographically, deleting
    /// expired entries along the way.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().expect("registry lock poisoned");
        let now = Instant::now();
        let timeout = self.timeout;
        servers.retain(|_, heartbeat| timeout.is_zero() || *heartbeat + timeout > now);
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// Builds the axum router exposing the registry on
    /// [`DEFAULT_REGISTRY_PATH`].
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(
                DEFAULT_REGISTRY_PATH,
                get(get_servers).post(post_server),
            )
            .with_state(Arc::clone(self))
    }

    /// Serves the registry on the listener until the server fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, path = DEFAULT_REGISTRY_PATH, "rpc registry: serving");
        }
        axum::serve(listener, self.router()).await
    }
}

async fn get_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive_servers().join(",");
    (StatusCode::OK, [(SERVERS_HEADER, alive)])
}

async fn post_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    match headers.get(SERVER_HEADER).and_then(|value| value.to_str().ok()) {
        Some(addr) if !addr.is_empty() => {
            registry.put_server(addr);
            StatusCode::OK
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Sends one heartbeat now, then keeps beating every `period` until the
/// first failure. With a zero `period` the cadence defaults to the
/// registry timeout less one minute, so a beat comfortably precedes
/// expiry.
///
/// Returns the handle of the beating task; aborting it stops the
/// heartbeat.
pub async fn heartbeat(
    registry_url: impl Into<String>,
    addr: impl Into<String>,
    period: Duration,
) -> JoinHandle<()> {
    let registry_url = registry_url.into();
    let addr = addr.into();
    let period = if period.is_zero() {
        DEFAULT_REGISTRY_TIMEOUT.saturating_sub(Duration::from_secs(60))
    } else {
        period
    };

    let client = reqwest::Client::new();
    let healthy = send_heartbeat(&client, &registry_url, &addr).await;
    tokio::spawn(async move {
        if !healthy {
            return;
        }
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if !send_heartbeat(&client, &registry_url, &addr).await {
                return;
            }
        }
    })
}

async fn send_heartbeat(client: &reqwest::Client, registry_url: &str, addr: &str) -> bool {
    debug!(%addr, %registry_url, "rpc server: send heartbeat to registry");
    match client
        .post(registry_url)
        .header(SERVER_HEADER, addr)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            warn!(%addr, status = %response.status(), "rpc server: heartbeat rejected");
            false
        }
        Err(e) => {
            warn!(%addr, "rpc server: heartbeat error: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_list() {
        let registry = Registry::new(Duration::from_secs(60));
        registry.put_server("tcp@127.0.0.1:7002");
        registry.put_server("tcp@127.0.0.1:7001");

        assert_eq!(
            registry.alive_servers(),
            vec![
                "tcp@127.0.0.1:7001".to_string(),
                "tcp@127.0.0.1:7002".to_string()
            ]
        );
    }

    #[test]
    fn test_put_refreshes_existing_entry() {
        let registry = Registry::new(Duration::from_secs(60));
        registry.put_server("tcp@127.0.0.1:7001");
        registry.put_server("tcp@127.0.0.1:7001");
        assert_eq!(registry.alive_servers().len(), 1);
    }

    #[test]
    fn test_sweep_deletes_expired_entries() {
        let registry = Registry::new(Duration::from_millis(10));
        registry.put_server("tcp@127.0.0.1:7001");
        std::thread::sleep(Duration::from_millis(30));
        registry.put_server("tcp@127.0.0.1:7002");

        // The expired entry never reappears, the fresh one always does.
        assert_eq!(
            registry.alive_servers(),
            vec!["tcp@127.0.0.1:7002".to_string()]
        );
        assert_eq!(registry.alive_servers().len(), 1);
    }

    #[test]
    fn test_zero_timeout_keeps_everything() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_server("tcp@127.0.0.1:7001");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.alive_servers().len(), 1);
    }
}
