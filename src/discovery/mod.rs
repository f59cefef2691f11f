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

//! Service discovery.
//!
//! A [`Discovery`] yields server addresses under a [`SelectMode`].
//! Addresses use the `protocol@host:port` shape understood by
//! [`x_dial`](crate::client::x_dial). Implementations:
//!
//! - [`StaticDiscovery`]: a user-maintained list; refresh is a no-op.
//! - [`RegistryDiscovery`](registry::RegistryDiscovery): polls the
//!   self-hosted HTTP registry, caching results under an update timeout.
//! - `EtcdDiscovery` (behind the `etcd` feature): watches an etcd prefix
//!   and refreshes on change notifications.

pub mod registry;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use registry::RegistryDiscovery;

use crate::error::RpcError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Mutex;

/// Endpoint selection policy for [`Discovery::get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectMode {
    /// Pick a uniformly random endpoint.
    Random,
    /// Rotate through the endpoints in order.
    RoundRobin,
}

/// Abstraction yielding server endpoints under a selection policy.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Re-pulls the server list from the backing source, if any.
    async fn refresh(&self) -> Result<(), RpcError>;

    /// Replaces the server list by hand.
    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError>;

    /// Picks one server under the given selection mode.
    async fn get(&self, mode: SelectMode) -> Result<String, RpcError>;

    /// Returns a copy of all known servers.
    async fn get_all(&self) -> Result<Vec<String>, RpcError>;
}

struct StaticState {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a hand-maintained server list.
pub struct StaticDiscovery {
    state: Mutex<StaticState>,
}

impl StaticDiscovery {
    /// Creates a discovery over the given servers.
    ///
    /// Round-robin starts at a random index so a fleet of clients does
    /// not converge on the same first endpoint.
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..usize::MAX / 2);
        Self {
            state: Mutex::new(StaticState { servers, index }),
        }
    }

    fn pick(&self, mode: SelectMode) -> Result<String, RpcError> {
        let mut state = self.state.lock().expect("discovery lock poisoned");
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                let i = rand::thread_rng().gen_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let server = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(server)
            }
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("discovery lock poisoned")
            .servers
            .clone()
    }

    fn replace(&self, servers: Vec<String>) {
        self.state.lock().expect("discovery lock poisoned").servers = servers;
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn refresh(&self) -> Result<(), RpcError> {
        // The list is maintained by hand; nothing to pull.
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<(), RpcError> {
        self.replace(servers);
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String, RpcError> {
        self.pick(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>, RpcError> {
        Ok(self.snapshot())
    }
}
