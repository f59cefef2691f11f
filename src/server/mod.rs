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

//! RPC server: connection acceptance, dispatch, and write-back.
//!
//! Each accepted connection is served by one task that validates and
//! echoes the [`Options`] prelude, then loops reading framed requests.
//! Every well-formed request runs in its own spawned handler; replies
//! funnel through the codec's send lock so a reply header and body are
//! atomically adjacent on the wire. The connection closes only after all
//! in-flight handlers finish.

pub mod http;

use crate::codec::options::{read_prelude, write_prelude};
use crate::codec::{Codec, FramedCodec, Header, MAGIC};
use crate::serialization::WireFormat;
use crate::service::Service;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Error returned when registering a service fails.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// A service with the same name is already registered.
    #[error("rpc server: service already defined: {0}")]
    AlreadyRegistered(String),
}

/// Errors resolving a `Service.Method` name to a registered handler.
///
/// These are per-request failures: the text is sent back in the reply
/// header and the connection keeps serving.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The name did not contain a `.` separator.
    #[error("rpc server: service/method request ill-formed: {0}")]
    Malformed(String),

    /// No service is registered under the requested name.
    #[error("rpc server: can't find service {0}")]
    UnknownService(String),

    /// The service exists but has no such method.
    #[error("rpc server: can't find method {0}")]
    UnknownMethod(String),
}

/// RPC server holding the registered services.
///
/// The service map is append-only for the server's lifetime; connections
/// hold the server behind an `Arc` and resolve methods per request.
#[derive(Debug, Default)]
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::AlreadyRegistered`] if a service with
    /// the same name exists; the original registration is kept.
    pub fn register(&self, service: Service) -> Result<(), RegistrationError> {
        let mut services = self.services.write().expect("service map lock poisoned");
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RegistrationError::AlreadyRegistered(name));
        }
        info!(service = %name, "rpc server: registered service");
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Splits a qualified name on its last `.` and resolves both halves.
    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String), DispatchError> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| DispatchError::Malformed(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

        let service = self
            .services
            .read()
            .expect("service map lock poisoned")
            .get(service_name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownService(service_name.to_string()))?;
        if service.method(method_name).is_none() {
            return Err(DispatchError::UnknownMethod(method_name.to_string()));
        }
        Ok((service, method_name.to_string()))
    }

    /// Snapshot of services, methods, and call counts for the debug page.
    pub(crate) fn services_snapshot(&self) -> Vec<(String, Vec<(String, u64)>)> {
        let services = self.services.read().expect("service map lock poisoned");
        let mut snapshot: Vec<_> = services
            .values()
            .map(|service| {
                let mut methods: Vec<_> = service
                    .methods()
                    .map(|(name, calls)| (name.to_string(), calls))
                    .collect();
                methods.sort();
                (service.name().to_string(), methods)
            })
            .collect();
        snapshot.sort();
        snapshot
    }

    /// Accepts connections from the listener until accepting fails,
    /// serving each connection in its own task.
    pub async fn accept(self: &Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc server: accepted connection");
                    let server = Arc::clone(self);
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(e) => {
                    error!("rpc server: accept error: {e}");
                    return;
                }
            }
        }
    }

    /// Serves a single established connection to completion.
    pub async fn serve_conn(self: Arc<Self>, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        self.serve_stream(reader, writer).await;
    }

    /// Serves a connection given as split read/write halves.
    pub(crate) async fn serve_stream<R, W>(self: Arc<Self>, mut reader: R, mut writer: W)
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let options = match read_prelude(&mut reader).await {
            Ok(options) => options,
            Err(e) => {
                error!("rpc server: option error: {e}");
                return;
            }
        };
        if options.magic != MAGIC {
            error!("rpc server: invalid magic number {:#x}", options.magic);
            return;
        }
        let Some(format) = WireFormat::from_name(&options.codec) else {
            error!(codec = %options.codec, "rpc server: unknown codec");
            return;
        };
        // Echo the prelude so the client can separate the handshake from
        // the first framed reply.
        if let Err(e) = write_prelude(&mut writer, &options).await {
            error!("rpc server: option echo error: {e}");
            return;
        }

        let codec: Arc<dyn Codec> = Arc::new(FramedCodec::new(format, reader, writer));
        self.serve_codec(codec, options.handle_timeout).await;
    }

    /// The per-connection request loop.
    async fn serve_codec(self: Arc<Self>, codec: Arc<dyn Codec>, handle_timeout: Duration) {
        let mut handlers = JoinSet::new();
        loop {
            let header = match codec.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    // EOF just means the peer is done sending.
                    if !e.is_eof() {
                        error!("rpc server: read header error: {e}");
                    }
                    break;
                }
            };
            let lookup = self.find_service(&header.service_method);
            // The body frame is always consumed so the stream stays
            // aligned on the next header.
            let argv = match codec.read_body().await {
                Ok(argv) => argv,
                Err(e) => {
                    error!("rpc server: read body error: {e}");
                    break;
                }
            };
            match lookup {
                Err(e) => {
                    let mut reply = header;
                    reply.error = e.to_string();
                    send_response(&codec, &reply, &placeholder_body(codec.format())).await;
                }
                Ok((service, method)) => {
                    handlers.spawn(handle_request(
                        Arc::clone(&codec),
                        service,
                        method,
                        header,
                        argv,
                        handle_timeout,
                    ));
                }
            }
        }
        // Requests already in flight get to finish and reply.
        while handlers.join_next().await.is_some() {}
        let _ = codec.close().await;
    }
}

/// Runs one request, bounding the invocation by `timeout` when non-zero.
///
/// The invocation runs in its own task and coordinates with this handler
/// through two signals: `called` fires when the method has produced a
/// result, `sent` when its reply hit the wire. A timed-out handler drops
/// its `called` receiver, so the invocation's completion send fails and
/// the late result is discarded instead of blocking the task forever. The
/// `replied` flag decides which side writes when both race the deadline;
/// the loser must not write.
async fn handle_request(
    codec: Arc<dyn Codec>,
    service: Arc<Service>,
    method: String,
    header: Header,
    argv: Vec<u8>,
    timeout: Duration,
) {
    let (called_tx, called_rx) = oneshot::channel::<()>();
    let (sent_tx, sent_rx) = oneshot::channel::<()>();
    let replied = Arc::new(AtomicBool::new(false));

    let invoke_codec = Arc::clone(&codec);
    let invoke_header = header.clone();
    let invoke_replied = Arc::clone(&replied);
    tokio::spawn(async move {
        let format = invoke_codec.format();
        let result = service.invoke(&method, format, argv).await;
        if called_tx.send(()).is_err() {
            // The handler timed out and moved on; the method ran to
            // completion but its result is discarded.
            return;
        }
        if invoke_replied.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut reply = invoke_header;
        match result {
            Ok(body) => send_response(&invoke_codec, &reply, &body).await,
            Err(e) => {
                reply.error = e.to_string();
                send_response(&invoke_codec, &reply, &placeholder_body(format)).await;
            }
        }
        let _ = sent_tx.send(());
    });

    if timeout.is_zero() {
        let _ = called_rx.await;
        let _ = sent_rx.await;
        return;
    }

    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            if !replied.swap(true, Ordering::SeqCst) {
                let mut reply = header;
                reply.error =
                    format!("rpc server: request handle timeout: expect within {timeout:?}");
                send_response(&codec, &reply, &placeholder_body(codec.format())).await;
            }
        }
        _ = called_rx => {
            let _ = sent_rx.await;
        }
    }
}

/// Writes a reply, logging failures; the codec shuts the stream down on a
/// write error, which ends the connection loop.
async fn send_response(codec: &Arc<dyn Codec>, header: &Header, body: &[u8]) {
    if let Err(e) = codec.write(header, body).await {
        error!("rpc server: send response fail: {e}");
    }
}

/// Body sent alongside error replies, in place of a real reply value.
fn placeholder_body(format: WireFormat) -> Vec<u8> {
    format.to_vec(&()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    fn arith() -> Service {
        Service::builder("Arith")
            .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
            .build()
    }

    #[test]
    fn test_register_duplicate_fails() {
        let server = Server::new();
        server.register(arith()).unwrap();
        let err = server.register(arith()).unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_find_service() {
        let server = Server::new();
        server.register(arith()).unwrap();

        let (service, method) = server.find_service("Arith.Sum").unwrap();
        assert_eq!(service.name(), "Arith");
        assert_eq!(method, "Sum");
    }

    #[test]
    fn test_find_service_splits_on_last_dot() {
        let server = Server::new();
        server
            .register(
                Service::builder("ns.Arith")
                    .method("Sum", |args: SumArgs| async move { Ok(args.a + args.b) })
                    .build(),
            )
            .unwrap();

        let (service, method) = server.find_service("ns.Arith.Sum").unwrap();
        assert_eq!(service.name(), "ns.Arith");
        assert_eq!(method, "Sum");
    }

    #[test]
    fn test_find_service_errors() {
        let server = Server::new();
        server.register(arith()).unwrap();

        assert!(matches!(
            server.find_service("no-dot"),
            Err(DispatchError::Malformed(_))
        ));
        assert!(matches!(
            server.find_service("Nope.Sum"),
            Err(DispatchError::UnknownService(_))
        ));
        assert!(matches!(
            server.find_service("Arith.Nope"),
            Err(DispatchError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_services_snapshot_sorted() {
        let server = Server::new();
        server.register(arith()).unwrap();
        server
            .register(
                Service::builder("Echo")
                    .method("Say", |s: String| async move { Ok(s) })
                    .build(),
            )
            .unwrap();

        let snapshot = server.services_snapshot();
        let names: Vec<_> = snapshot.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["Arith", "Echo"]);
    }
}
