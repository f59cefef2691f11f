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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # Architecture
//!
//! The crate is organized bottom-up:
//!
//! - [`serialization`]: pluggable formats (JSON, postcard, TLV) behind the
//!   `Serializer` trait and the negotiated `WireFormat` registry
//! - [`codec`]: length-prefixed framing, the `{header, body}` codec
//!   contract, and the handshake prelude
//! - [`service`]: typed method registration with type-erased adapters
//! - [`server`]: connection acceptance, concurrent dispatch, ordered
//!   write-back, the HTTP CONNECT front door
//! - [`client`]: the multiplexed call tracker and dialing
//! - [`discovery`] / [`registry`] / [`xclient`]: endpoint discovery,
//!   heartbeat registry back-ends, and the load-balancing multi-endpoint
//!   client
//! - [`cancel`]: the cancellation token threaded through calls and
//!   broadcasts

pub mod cancel;
pub mod client;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod serialization;
pub mod server;
pub mod service;
pub mod xclient;

pub use cancel::CancelToken;
pub use client::{Call, Client, dial, dial_http, x_dial};
pub use codec::{Codec, FramedCodec, Header, Options};
pub use discovery::{Discovery, SelectMode, StaticDiscovery};
pub use error::RpcError;
pub use serialization::{Serializer, WireFormat};
pub use server::Server;
pub use service::{MethodError, Service};
pub use xclient::XClient;
