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

//! Multi-endpoint client with discovery and load balancing.
//!
//! An [`XClient`] routes calls across the endpoints a
//! [`Discovery`] yields, reusing one [`Client`] per endpoint. Cached
//! clients that stopped being available are evicted and redialed.
//! [`XClient::broadcast`] fans one request out to every endpoint with
//! first-failure cancellation and first-success reply capture.

use crate::cancel::CancelToken;
use crate::client::{Client, x_dial};
use crate::codec::Options;
use crate::discovery::{Discovery, SelectMode};
use crate::error::RpcError;
use crate::serialization::WireFormat;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

struct XClientInner {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    options: Options,
    clients: tokio::sync::Mutex<HashMap<String, Client>>,
}

/// Load-balancing client over a set of discovered endpoints.
///
/// Cloning is cheap; all clones share the endpoint cache.
#[derive(Clone)]
pub struct XClient {
    inner: Arc<XClientInner>,
}

impl XClient {
    /// Creates a multi-endpoint client.
    ///
    /// Endpoint addresses produced by the discovery use the
    /// `protocol@host:port` shape of [`x_dial`].
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, options: Options) -> Self {
        Self {
            inner: Arc::new(XClientInner {
                discovery,
                mode,
                options: options.normalized(),
                clients: tokio::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    fn format(&self) -> Result<WireFormat, RpcError> {
        WireFormat::from_name(&self.inner.options.codec)
            .ok_or_else(|| RpcError::UnknownCodec(self.inner.options.codec.clone()))
    }

    /// Returns the cached client for an endpoint, dialing if the cache is
    /// empty or holds one that is no longer available.
    async fn dial_cached(&self, rpc_addr: &str) -> Result<Client, RpcError> {
        let mut clients = self.inner.clients.lock().await;
        if let Some(client) = clients.get(rpc_addr) {
            if client.is_available() {
                return Ok(client.clone());
            }
            debug!(addr = rpc_addr, "rpc xclient: evicting unavailable client");
            if let Some(stale) = clients.remove(rpc_addr) {
                let _ = stale.close().await;
            }
        }
        let client = x_dial(rpc_addr, self.inner.options.clone()).await?;
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    /// Calls a method on one endpoint chosen by the selection mode.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let addr = self.inner.discovery.get(self.inner.mode).await?;
        let client = self.dial_cached(&addr).await?;
        client.call(service_method, args).await
    }

    /// Like [`XClient::call`], racing the reply against a cancellation
    /// token.
    pub async fn call_cancel<A, R>(
        &self,
        service_method: &str,
        args: &A,
        cancel: &CancelToken,
    ) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let addr = self.inner.discovery.get(self.inner.mode).await?;
        let client = self.dial_cached(&addr).await?;
        client.call_cancel(service_method, args, cancel).await
    }

    /// Invokes a method on every discovered endpoint in parallel.
    ///
    /// The first failure is recorded and cancels the outstanding peer
    /// calls; the first success is captured as the result. The broadcast
    /// succeeds iff some endpoint succeeded before the first failure was
    /// recorded.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.broadcast_cancel(service_method, args, &CancelToken::new())
            .await
    }

    /// Like [`XClient::broadcast`], additionally bounded by the caller's
    /// cancellation token.
    pub async fn broadcast_cancel<A, R>(
        &self,
        service_method: &str,
        args: &A,
        cancel: &CancelToken,
    ) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let servers = self.inner.discovery.get_all().await?;
        let format = self.format()?;
        // Encode once; every peer call gets its own copy and its own
        // reply buffer.
        let body = format.to_vec(args)?;

        // Peer calls race a token derived from the caller's: the caller
        // canceling aborts the whole broadcast, a peer failure aborts
        // only the peers.
        let derived = cancel.child();
        let state = Arc::new(Mutex::new(BroadcastState::default()));

        let mut tasks = JoinSet::new();
        for addr in servers {
            let xclient = self.clone();
            let service_method = service_method.to_string();
            let body = body.clone();
            let derived = derived.clone();
            let state = Arc::clone(&state);
            tasks.spawn(async move {
                let result = async {
                    let client = xclient.dial_cached(&addr).await?;
                    client
                        .call_raw_cancel(&service_method, body, &derived)
                        .await
                }
                .await;

                let mut state = state.lock().expect("broadcast state lock poisoned");
                match result {
                    Err(err) => {
                        if state.error.is_none() && !state.reply_done {
                            state.error = Some(err);
                            derived.cancel();
                        }
                    }
                    Ok(reply) => {
                        if !state.reply_done {
                            state.reply = Some(reply);
                            state.reply_done = true;
                        }
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        let mut state = state.lock().expect("broadcast state lock poisoned");
        if let Some(err) = state.error.take() {
            return Err(err);
        }
        let reply = state.reply.take().ok_or(RpcError::NoAvailableServers)?;
        format.from_slice(&reply).map_err(Into::into)
    }

    /// Closes every cached client and clears the cache.
    pub async fn close(&self) {
        let mut clients = self.inner.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }
}

#[derive(Default)]
struct BroadcastState {
    error: Option<RpcError>,
    reply: Option<Vec<u8>>,
    reply_done: bool,
}
