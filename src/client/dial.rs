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

//! Connection establishment.
//!
//! [`dial`] opens a plain TCP connection, [`dial_http`] tunnels through an
//! HTTP CONNECT exchange first, and [`x_dial`] dispatches between them
//! based on a `protocol@host:port` address. All three bound the total of
//! TCP connect plus client construction (handshake and receive-loop
//! startup) by the options' connect timeout.

use crate::client::Client;
use crate::codec::Options;
use crate::error::RpcError;
use crate::server::http::{CONNECTED, DEFAULT_RPC_PATH};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Dials a plain TCP endpoint.
///
/// # Errors
///
/// Returns [`RpcError::Connect`] if the TCP connect fails,
/// [`RpcError::ConnectTimeout`] if connect plus construction exceed the
/// configured bound, and handshake errors from client construction.
pub async fn dial(addr: &str, options: Options) -> Result<Client, RpcError> {
    dial_inner(addr, options, false).await
}

/// Dials an endpoint whose RPC service is tunneled behind an HTTP CONNECT
/// exchange, typically because it shares its port with an HTTP server.
///
/// # Errors
///
/// As [`dial`], plus [`RpcError::HttpHandshake`] if the CONNECT exchange
/// is answered with anything but the expected status.
pub async fn dial_http(addr: &str, options: Options) -> Result<Client, RpcError> {
    dial_inner(addr, options, true).await
}

/// Dials an address of the shape `<protocol>@<host:port>`.
///
/// `http@...` performs an HTTP-tunneled dial; every other protocol tag
/// dials plain TCP.
///
/// # Errors
///
/// Returns [`RpcError::BadAddress`] for addresses without a `@`, plus any
/// error of the underlying dial.
pub async fn x_dial(addr: &str, options: Options) -> Result<Client, RpcError> {
    let (protocol, host) = addr
        .split_once('@')
        .ok_or_else(|| RpcError::BadAddress(addr.to_string()))?;
    match protocol {
        "http" => dial_http(host, options).await,
        _ => dial(host, options).await,
    }
}

async fn dial_inner(addr: &str, options: Options, http: bool) -> Result<Client, RpcError> {
    // A fresh normalized copy per dial; caller-held options are never
    // mutated or shared.
    let options = options.normalized();
    let timeout = options.connect_timeout;
    let started = Instant::now();

    let stream = if timeout.is_zero() {
        TcpStream::connect(addr)
            .await
            .map_err(|source| RpcError::Connect { source })?
    } else {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(RpcError::Connect { source }),
            Err(_) => return Err(RpcError::ConnectTimeout(timeout)),
        }
    };

    // Construction runs in its own task and is raced against the rest of
    // the budget. Completion is a non-blocking send; if the dialer has
    // already given up, the construction task closes the freshly built
    // client itself so neither the task nor the socket leaks.
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let built = if http {
            new_http_client(stream, options).await
        } else {
            let (reader, writer) = stream.into_split();
            Client::new(reader, writer, options).await
        };
        if let Err(unclaimed) = tx.send(built) {
            if let Ok(client) = unclaimed {
                let _ = client.close().await;
            }
        }
    });

    if timeout.is_zero() {
        return match rx.await {
            Ok(result) => result,
            Err(_) => Err(construction_failed()),
        };
    }
    let remaining = timeout.saturating_sub(started.elapsed());
    match tokio::time::timeout(remaining, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(construction_failed()),
        Err(_) => Err(RpcError::ConnectTimeout(timeout)),
    }
}

fn construction_failed() -> RpcError {
    RpcError::ConnectionLost {
        reason: "client construction failed".to_string(),
    }
}

/// Performs the one-exchange CONNECT handshake, then builds the client on
/// the same socket.
async fn new_http_client(stream: TcpStream, options: Options) -> Result<Client, RpcError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n");
    writer
        .write_all(request.as_bytes())
        .await
        .map_err(|source| RpcError::Connect { source })?;

    let mut status = String::new();
    reader
        .read_line(&mut status)
        .await
        .map_err(|source| RpcError::Connect { source })?;
    if !status.contains(CONNECTED) {
        return Err(RpcError::HttpHandshake(status.trim().to_string()));
    }
    // Drain the response up to its blank line; the socket then carries
    // the raw RPC protocol.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                return Err(RpcError::HttpHandshake(
                    "connection closed during handshake".to_string(),
                ));
            }
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => {}
            Err(source) => return Err(RpcError::Connect { source }),
        }
    }

    Client::new(reader, writer, options).await
}
