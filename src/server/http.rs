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

//! HTTP front door for the RPC server.
//!
//! Lets the RPC service share a port with a minimal HTTP surface. A client
//! opens the connection with a single exchange:
//!
//! ```text
//! CONNECT /_wirecall_ HTTP/1.0
//!
//! HTTP/1.0 200 Connected to WireCall RPC
//! ```
//!
//! after which the socket carries the ordinary RPC protocol. Non-CONNECT
//! methods on the RPC path are answered `405 must CONNECT`. A debug path
//! serves an HTML summary of the registered services and their per-method
//! call counts.

use crate::server::Server;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

/// Path the RPC CONNECT handshake is served on.
pub const DEFAULT_RPC_PATH: &str = "/_wirecall_";

/// Path the HTML service summary is served on.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/wirecall";

/// Status line a successful CONNECT handshake answers with.
pub const CONNECTED: &str = "200 Connected to WireCall RPC";

impl Server {
    /// Accepts HTTP-fronted connections until accepting fails.
    ///
    /// Each connection is served in its own task: CONNECT on the RPC path
    /// switches the socket to the RPC protocol, GET on the debug path
    /// renders the service summary, everything else is refused.
    pub async fn serve_http(self: &Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc server: accepted http connection");
                    let server = Arc::clone(self);
                    tokio::spawn(async move { server.serve_http_conn(stream).await });
                }
                Err(e) => {
                    error!("rpc server: http accept error: {e}");
                    return;
                }
            }
        }
    }

    /// Handles one HTTP-fronted connection.
    pub async fn serve_http_conn(self: Arc<Self>, stream: TcpStream) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut request_line = String::new();
        match reader.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // Drain the remaining request headers up to the blank line.
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => {}
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");

        match (method, path) {
            ("CONNECT", p) if p == DEFAULT_RPC_PATH => {
                let response = format!("HTTP/1.0 {CONNECTED}\r\n\r\n");
                if writer.write_all(response.as_bytes()).await.is_err() {
                    return;
                }
                // The socket now speaks the RPC protocol; any bytes the
                // client pipelined are already in the buffered reader.
                self.serve_stream(reader, writer).await;
            }
            ("GET", p) if p == DEFAULT_DEBUG_PATH => {
                let body = self.render_debug_page();
                let response = format!(
                    "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = writer.write_all(response.as_bytes()).await;
                let _ = writer.shutdown().await;
            }
            _ => {
                let _ = write_must_connect(&mut writer).await;
                let _ = writer.shutdown().await;
            }
        }
    }

    /// Renders the HTML summary of registered services and call counts.
    fn render_debug_page(&self) -> String {
        let mut html = String::from("<html>\n<body>\n<title>WireCall Services</title>\n");
        for (service, methods) in self.services_snapshot() {
            let _ = write!(
                html,
                "<hr>\nService {service}\n<hr>\n<table>\n<th align=center>Method</th><th align=center>Calls</th>\n"
            );
            for (method, calls) in methods {
                let _ = write!(
                    html,
                    "<tr>\n<td align=left font=fixed>{method}</td>\n<td align=center>{calls}</td>\n</tr>\n"
                );
            }
            html.push_str("</table>\n");
        }
        html.push_str("</body>\n</html>");
        html
    }
}

async fn write_must_connect<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(
            b"HTTP/1.0 405 Method Not Allowed\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n405 must CONNECT\n",
        )
        .await
}
