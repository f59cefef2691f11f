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

//! Multiplexed RPC client.
//!
//! One [`Client`] owns one connection. Callers fire any number of calls
//! concurrently; each is assigned a strictly increasing sequence number,
//! parked in a pending map, and completed exactly once: by the receive
//! loop when its reply arrives, or by connection teardown, which fans the
//! fatal error out to every in-flight call.
//!
//! Two locks keep the wire sane. The `sending` mutex is held across the
//! register-then-write pair so a header and its body are adjacent on the
//! wire and sequence order matches write order. The `state` mutex guards
//! the pending map, the sequence counter, and the closing/shutdown flags,
//! and is never held across an await. Teardown takes both, `sending`
//! first, so a concurrent sender cannot observe a usable client and then
//! write into a dead codec.

pub mod dial;

pub use dial::{dial, dial_http, x_dial};

use crate::cancel::CancelToken;
use crate::codec::options::{read_prelude, write_prelude};
use crate::codec::{Codec, FramedCodec, Header, Options};
use crate::error::RpcError;
use crate::serialization::WireFormat;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, error};

type CallOutcome = Result<Vec<u8>, RpcError>;

/// One in-flight invocation.
///
/// Returned by [`Client::go`]; awaiting [`Call::outcome`] yields the raw
/// reply body or the call's failure. Dropping the handle abandons the
/// result without affecting the call's bookkeeping.
#[derive(Debug)]
pub struct Call {
    /// Sequence number assigned to this call; `0` when registration
    /// failed before a number was assigned.
    pub seq: u64,
    /// The invoked `Service.Method` name.
    pub service_method: String,
    done: oneshot::Receiver<CallOutcome>,
}

impl Call {
    /// Waits for the call to complete and returns the raw reply body.
    pub async fn outcome(self) -> Result<Vec<u8>, RpcError> {
        match self.done.await {
            Ok(outcome) => outcome,
            // The pending slot vanished without a completion; the client
            // was torn down.
            Err(_) => Err(RpcError::ConnectionLost {
                reason: "client dropped".to_string(),
            }),
        }
    }

    fn failed(service_method: String, error: RpcError) -> Call {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Call {
            seq: 0,
            service_method,
            done: rx,
        }
    }
}

struct ClientState {
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallOutcome>>,
    closing: bool,
    shutdown: bool,
}

struct ClientInner {
    codec: Arc<dyn Codec>,
    sending: tokio::sync::Mutex<()>,
    state: Mutex<ClientState>,
}

impl ClientInner {
    fn register(&self, tx: oneshot::Sender<CallOutcome>) -> Result<u64, RpcError> {
        let mut state = self.state.lock().expect("client state lock poisoned");
        if state.closing || state.shutdown {
            return Err(RpcError::Shutdown);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, tx);
        Ok(seq)
    }

    fn remove(&self, seq: u64) -> Option<oneshot::Sender<CallOutcome>> {
        self.state
            .lock()
            .expect("client state lock poisoned")
            .pending
            .remove(&seq)
    }

    /// Fans a fatal connection error out to every pending call.
    async fn terminate_all(&self, err: RpcError) {
        // Lock order: sending before state. Holding the send lock keeps a
        // concurrent sender from registering into the dead connection
        // mid-teardown.
        let _sending = self.sending.lock().await;
        let mut state = self.state.lock().expect("client state lock poisoned");
        state.shutdown = true;
        let reason = err.to_string();
        for (_, tx) in state.pending.drain() {
            let _ = tx.send(Err(RpcError::ConnectionLost {
                reason: reason.clone(),
            }));
        }
    }
}

/// Multiplexed RPC client over one connection.
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Performs the handshake over an established duplex stream and
    /// starts the receive loop.
    ///
    /// The prelude is sent JSON-framed, then the server's echo of it is
    /// awaited before any codec frames are read; the echo keeps a fast
    /// first reply from being swallowed by prelude decoding.
    ///
    /// # Errors
    ///
    /// Fails if the options name an unregistered codec or if the
    /// handshake I/O fails; the stream is dropped (closed) on failure.
    pub async fn new<R, W>(mut reader: R, mut writer: W, options: Options) -> Result<Client, RpcError>
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let format = WireFormat::from_name(&options.codec)
            .ok_or_else(|| RpcError::UnknownCodec(options.codec.clone()))?;

        write_prelude(&mut writer, &options).await?;
        let echo = read_prelude(&mut reader).await?;
        if echo != options {
            debug!("rpc client: server echoed modified options");
        }

        let inner = Arc::new(ClientInner {
            codec: Arc::new(FramedCodec::new(format, reader, writer)),
            sending: tokio::sync::Mutex::new(()),
            state: Mutex::new(ClientState {
                seq: 1, // 0 is reserved as the invalid sequence number
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });

        let receive_inner = Arc::clone(&inner);
        tokio::spawn(async move { receive(receive_inner).await });

        Ok(Client { inner })
    }

    /// Returns the connection's negotiated wire format.
    pub fn format(&self) -> WireFormat {
        self.inner.codec.format()
    }

    /// Returns `true` while the client can register new calls.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock().expect("client state lock poisoned");
        !state.closing && !state.shutdown
    }

    /// Closes the client. In-flight calls are completed by teardown once
    /// the connection unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Shutdown`] if the client was already closed.
    pub async fn close(&self) -> Result<(), RpcError> {
        {
            let mut state = self.inner.state.lock().expect("client state lock poisoned");
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.inner.codec.close().await.map_err(Into::into)
    }

    /// Fires a call asynchronously with a pre-encoded argument body.
    ///
    /// The call is registered and written under the send lock; failures
    /// (shutdown, write errors) complete the returned [`Call`]
    /// immediately.
    pub async fn go(&self, service_method: &str, args_body: Vec<u8>) -> Call {
        let (tx, rx) = oneshot::channel();

        let _sending = self.inner.sending.lock().await;
        let seq = match self.inner.register(tx) {
            Ok(seq) => seq,
            Err(err) => {
                debug!(service_method, "rpc client: register call: {err}");
                return Call::failed(service_method.to_string(), err);
            }
        };

        let header = Header::request(service_method, seq);
        if let Err(err) = self.inner.codec.write(&header, &args_body).await {
            // The reply will never come; pull the call back out and fail
            // it here.
            if let Some(tx) = self.inner.remove(seq) {
                let _ = tx.send(Err(err.into()));
            }
        }

        Call {
            seq,
            service_method: service_method.to_string(),
            done: rx,
        }
    }

    /// Calls a method and decodes the typed reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = self.format().to_vec(args)?;
        let reply = self.go(service_method, body).await.outcome().await?;
        self.format().from_slice(&reply).map_err(Into::into)
    }

    /// Calls a method, racing the reply against a cancellation token.
    ///
    /// A token canceled at entry still enqueues the call; the synchronous
    /// result is [`RpcError::Canceled`] and the in-flight record is left
    /// for the receive loop or teardown to complete.
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
        let body = self.format().to_vec(args)?;
        let reply = self.call_raw_cancel(service_method, body, cancel).await?;
        self.format().from_slice(&reply).map_err(Into::into)
    }

    /// Raw-body variant of [`Client::call_cancel`]; returns the reply
    /// bytes undecoded. Broadcast uses this so every peer call gets its
    /// own reply buffer from one pre-encoded argument body.
    pub async fn call_raw_cancel(
        &self,
        service_method: &str,
        args_body: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, RpcError> {
        let call = self.go(service_method, args_body).await;
        tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Canceled),
            outcome = call.outcome() => outcome,
        }
    }
}

/// The receive loop: match replies to pending calls until the connection
/// fails, then fan the failure out.
async fn receive(inner: Arc<ClientInner>) {
    let err: RpcError = loop {
        let header = match inner.codec.read_header().await {
            Ok(header) => header,
            Err(e) => break e.into(),
        };
        // The body belongs to this header regardless of whether anyone is
        // still waiting; consume it to stay frame-aligned.
        let body = match inner.codec.read_body().await {
            Ok(body) => body,
            Err(e) => break e.into(),
        };
        match inner.remove(header.seq) {
            // Send failed and already removed the call, or the reply is a
            // duplicate; the body has been drained, nothing else to do.
            None => {}
            Some(tx) if !header.error.is_empty() => {
                let _ = tx.send(Err(RpcError::CallFailed(header.error)));
            }
            Some(tx) => {
                let _ = tx.send(Ok(body));
            }
        }
    };
    if !matches!(&err, RpcError::Codec(codec_err) if codec_err.is_eof()) {
        error!("rpc client: receive loop ended: {err}");
    }
    inner.terminate_all(err).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::framing;
    use crate::serialization::JsonSerializer;
    use crate::serialization::Serializer;
    use tokio::io::DuplexStream;

    /// Minimal in-memory peer: echo the prelude, then answer every
    /// request by `seq`, adding the two numbers in the body.
    async fn run_sum_peer(stream: DuplexStream) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let options = read_prelude(&mut reader).await.unwrap();
        write_prelude(&mut writer, &options).await.unwrap();

        let format = WireFormat::from_name(&options.codec).unwrap();
        let codec = FramedCodec::new(format, reader, writer);
        while let Ok(header) = codec.read_header().await {
            let body = codec.read_body().await.unwrap();
            let (a, b): (i64, i64) = format.from_slice(&body).unwrap();
            let reply = format.to_vec(&(a + b)).unwrap();
            codec.write(&header, &reply).await.unwrap();
        }
    }

    async fn connected_client() -> Client {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_sum_peer(remote));
        let (reader, writer) = tokio::io::split(local);
        Client::new(reader, writer, Options::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let client = connected_client().await;
        let sum: i64 = client.call("Arith.Sum", &(3i64, 4i64)).await.unwrap();
        assert_eq!(sum, 7);
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_their_own_replies() {
        let client = connected_client().await;
        let mut handles = Vec::new();
        for i in 0..32i64 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let sum: i64 = client.call("Arith.Sum", &(i, i * i)).await.unwrap();
                assert_eq!(sum, i + i * i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_strictly_increase() {
        let client = connected_client().await;
        let mut last = 0;
        for _ in 0..5 {
            let body = client.format().to_vec(&(1i64, 1i64)).unwrap();
            let call = client.go("Arith.Sum", body).await;
            assert!(call.seq > last, "seq {} not above {}", call.seq, last);
            last = call.seq;
            call.outcome().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_rejects_new_calls() {
        let client = connected_client().await;
        client.close().await.unwrap();
        assert!(!client.is_available());

        let err = client
            .call::<_, i64>("Arith.Sum", &(1i64, 2i64))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Shutdown));

        // Double close also reports shutdown.
        assert!(matches!(client.close().await, Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_pending_calls_complete_on_connection_loss() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        // Peer that echoes the prelude and then hangs up without
        // answering any request.
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(remote);
            let options = read_prelude(&mut reader).await.unwrap();
            write_prelude(&mut writer, &options).await.unwrap();
            let _ = framing::read_frame(&mut reader).await;
            let _ = framing::read_frame(&mut reader).await;
            // Dropping both halves severs the connection.
        });

        let (reader, writer) = tokio::io::split(local);
        let client = Client::new(reader, writer, Options::default()).await.unwrap();
        let err = client
            .call::<_, i64>("Arith.Sum", &(1i64, 2i64))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ConnectionLost { .. }));
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_server_error_string_surfaces_per_call() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(remote);
            let options = read_prelude(&mut reader).await.unwrap();
            write_prelude(&mut writer, &options).await.unwrap();
            let codec = FramedCodec::new(WireFormat::Json, reader, writer);
            let mut header = codec.read_header().await.unwrap();
            let _ = codec.read_body().await.unwrap();
            header.error = "rpc server: can't find service Arith".to_string();
            let placeholder = JsonSerializer.serialize(&()).unwrap();
            codec.write(&header, &placeholder).await.unwrap();
        });

        let (reader, writer) = tokio::io::split(local);
        let client = Client::new(reader, writer, Options::default()).await.unwrap();
        let err = client
            .call::<_, i64>("Arith.Sum", &(1i64, 2i64))
            .await
            .unwrap_err();
        match err {
            RpcError::CallFailed(message) => assert!(message.contains("can't find service")),
            other => panic!("expected CallFailed, got {other:?}"),
        }
        // A per-call error does not shut the client down.
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_cancel_returns_immediately_and_call_stays_registered() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        // Peer that answers after a delay.
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(remote);
            let options = read_prelude(&mut reader).await.unwrap();
            write_prelude(&mut writer, &options).await.unwrap();
            let format = WireFormat::from_name(&options.codec).unwrap();
            let codec = FramedCodec::new(format, reader, writer);
            let header = codec.read_header().await.unwrap();
            let _ = codec.read_body().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            let reply = format.to_vec(&0i64).unwrap();
            codec.write(&header, &reply).await.unwrap();
        });

        let (reader, writer) = tokio::io::split(local);
        let client = Client::new(reader, writer, Options::default()).await.unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let err = client
            .call_cancel::<_, i64>("Arith.Sum", &(1i64, 2i64), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Canceled));
        assert!(started.elapsed() < std::time::Duration::from_millis(100));

        // The call was enqueued anyway; the late reply is drained without
        // disturbing the connection.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_unknown_codec_rejected() {
        let (local, _remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let err = Client::new(reader, writer, Options::with_codec("gob"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::UnknownCodec(_)));
    }

    // Exercises the raw write path used by the prelude to make sure the
    // client's first frames parse as strict {header, body} pairs.
    #[tokio::test]
    async fn test_wire_is_strict_header_body_pairs() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (mut peer_reader, mut peer_writer) = tokio::io::split(remote);

        let (reader, writer) = tokio::io::split(local);
        let client_task = tokio::spawn(async move {
            let client = Client::new(reader, writer, Options::default()).await.unwrap();
            let mut calls = Vec::new();
            for i in 0..8i64 {
                let body = client.format().to_vec(&(i, i)).unwrap();
                calls.push(client.go("Arith.Sum", body).await);
            }
            calls
        });

        let options = read_prelude(&mut peer_reader).await.unwrap();
        write_prelude(&mut peer_writer, &options).await.unwrap();

        // Capture the raw frames: they must alternate header, body.
        for _ in 0..8 {
            let header_frame = framing::read_frame(&mut peer_reader).await.unwrap();
            let header: Header = JsonSerializer.deserialize(&header_frame).unwrap();
            assert_eq!(header.service_method, "Arith.Sum");
            assert!(header.error.is_empty());
            let body_frame = framing::read_frame(&mut peer_reader).await.unwrap();
            let (a, b): (i64, i64) = JsonSerializer.deserialize(&body_frame).unwrap();
            assert_eq!(a, b);
        }
        let _ = client_task.await.unwrap();
    }
}
