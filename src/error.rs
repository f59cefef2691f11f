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

//! Top-level error type.
//!
//! Errors fall into three layers with distinct handling:
//!
//! - **Wire/codec failures** ([`RpcError::Codec`], [`RpcError::Connect`],
//!   [`RpcError::ConnectionLost`]) are fatal to the connection. On the
//!   client every pending call is completed with the failure; on the
//!   server the connection is dropped.
//! - **Per-call failures** ([`RpcError::CallFailed`], [`RpcError::Decode`],
//!   [`RpcError::Encode`]) surface to one caller and leave the connection
//!   serving.
//! - **Local conditions** ([`RpcError::Shutdown`], [`RpcError::Canceled`],
//!   [`RpcError::ConnectTimeout`], discovery errors) never touch the wire.

use crate::codec::CodecError;
use crate::serialization::{DeserializationError, SerializationError};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by clients, discovery, and dialing.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The client is closing or has been shut down; no new calls can be
    /// registered.
    #[error("rpc client: connection is shut down")]
    Shutdown,

    /// Establishing the TCP connection failed outright.
    #[error("rpc client: connect failed: {source}")]
    Connect {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Connection establishment (connect plus handshake) exceeded the
    /// configured bound.
    #[error("rpc client: connect timeout within {0:?}")]
    ConnectTimeout(Duration),

    /// The requested codec name is not registered.
    #[error("rpc client: invalid codec type {0}")]
    UnknownCodec(String),

    /// The HTTP CONNECT handshake got an unexpected response.
    #[error("rpc client: unexpected HTTP response: {0}")]
    HttpHandshake(String),

    /// An address did not match the `protocol@host:port` shape.
    #[error("rpc client: wrong address format '{0}', expect protocol@addr")]
    BadAddress(String),

    /// The synchronous caller's cancellation token fired before the reply
    /// arrived. The call itself stays registered and is reaped later.
    #[error("rpc client: call failed: canceled")]
    Canceled,

    /// The server reported a per-call failure in the reply header.
    #[error("{0}")]
    CallFailed(String),

    /// The connection failed with every pending call drained.
    #[error("rpc client: connection lost: {reason}")]
    ConnectionLost {
        /// Text of the failure that tore the connection down.
        reason: String,
    },

    /// A frame could not be read or written.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Arguments could not be encoded in the negotiated format.
    #[error("rpc client: argument encode failed: {0}")]
    Encode(#[from] SerializationError),

    /// A reply body could not be decoded into the caller's type.
    #[error("rpc client: reply decode failed: {0}")]
    Decode(#[from] DeserializationError),

    /// Discovery produced no usable endpoint.
    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    /// A discovery back-end failed.
    #[error("rpc discovery: {0}")]
    Discovery(String),
}
