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

//! End-to-end scenarios over real TCP connections.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use wirecall::cancel::CancelToken;
use wirecall::client::{dial, dial_http, x_dial};
use wirecall::codec::Options;
use wirecall::discovery::{SelectMode, StaticDiscovery};
use wirecall::error::RpcError;
use wirecall::server::Server;
use wirecall::service::{MethodError, Service};
use wirecall::xclient::XClient;

#[derive(Serialize, Deserialize, Clone, Copy)]
struct SumArgs {
    a: i64,
    b: i64,
}

fn arith_service(counter: Arc<AtomicU64>) -> Service {
    Service::builder("Arith")
        .method("Sum", move |args: SumArgs| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(args.a + args.b)
            }
        })
        .method("Sleep", |args: SumArgs| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(args.a + args.b)
        })
        .build()
}

async fn spawn_server() -> (SocketAddr, Arc<AtomicU64>) {
    let counter = Arc::new(AtomicU64::new(0));
    let server = Arc::new(Server::new());
    server.register(arith_service(Arc::clone(&counter))).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.accept(listener).await });
    (addr, counter)
}

#[tokio::test]
async fn simple_call_returns_sum() {
    let (addr, _) = spawn_server().await;
    let client = dial(&addr.to_string(), Options::default()).await.unwrap();

    let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 3, b: 4 }).await.unwrap();
    assert_eq!(sum, 7);
}

#[tokio::test]
async fn hundred_concurrent_callers_each_get_their_reply() {
    let (addr, counter) = spawn_server().await;
    let client = dial(&addr.to_string(), Options::default()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..100i64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let sum: i64 = client
                .call("Arith.Sum", &SumArgs { a: i, b: i * i })
                .await
                .unwrap();
            assert_eq!(sum, i + i * i);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn binary_codecs_work_end_to_end() {
    let (addr, _) = spawn_server().await;
    for codec in ["postcard", "tlv"] {
        let client = dial(&addr.to_string(), Options::with_codec(codec))
            .await
            .unwrap();
        let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 10, b: 11 }).await.unwrap();
        assert_eq!(sum, 21, "codec {codec}");
    }
}

#[tokio::test]
async fn handle_timeout_surfaces_quickly() {
    let (addr, _) = spawn_server().await;
    let options = Options {
        handle_timeout: Duration::from_millis(300),
        ..Options::default()
    };
    let client = dial(&addr.to_string(), options).await.unwrap();

    let started = Instant::now();
    let err = client
        .call::<_, i64>("Arith.Sleep", &SumArgs { a: 1, b: 1 })
        .await
        .unwrap_err();
    match err {
        RpcError::CallFailed(message) => assert!(
            message.contains("request handle timeout"),
            "unexpected message: {message}"
        ),
        other => panic!("expected CallFailed, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    // The connection survives the timeout; the next call works.
    let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 2, b: 2 }).await.unwrap();
    assert_eq!(sum, 4);
}

#[tokio::test]
async fn canceled_caller_returns_before_the_method_finishes() {
    let (addr, _) = spawn_server().await;
    let client = dial(&addr.to_string(), Options::default()).await.unwrap();

    let cancel = CancelToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        deadline.cancel();
    });

    let started = Instant::now();
    let err = client
        .call_cancel::<_, i64>("Arith.Sleep", &SumArgs { a: 1, b: 1 }, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Canceled));
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn unknown_service_and_method_leave_the_connection_usable() {
    let (addr, _) = spawn_server().await;
    let client = dial(&addr.to_string(), Options::default()).await.unwrap();

    let err = client
        .call::<_, i64>("Nope.Sum", &SumArgs { a: 1, b: 1 })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't find service"));

    let err = client
        .call::<_, i64>("Arith.Nope", &SumArgs { a: 1, b: 1 })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("can't find method"));

    let err = client
        .call::<_, i64>("no-dot", &SumArgs { a: 1, b: 1 })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ill-formed"));

    let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 4, b: 4 }).await.unwrap();
    assert_eq!(sum, 8);
}

#[tokio::test]
async fn http_tunneled_dial_works() {
    let counter = Arc::new(AtomicU64::new(0));
    let server = Arc::new(Server::new());
    server.register(arith_service(Arc::clone(&counter))).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve_http(listener).await });

    let client = dial_http(&addr.to_string(), Options::default()).await.unwrap();
    let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 20, b: 22 }).await.unwrap();
    assert_eq!(sum, 42);

    // The protocol@addr convenience form reaches the same endpoint.
    let client = x_dial(&format!("http@{addr}"), Options::default()).await.unwrap();
    let sum: i64 = client.call("Arith.Sum", &SumArgs { a: 1, b: 1 }).await.unwrap();
    assert_eq!(sum, 2);
}

#[tokio::test]
async fn round_robin_distributes_calls_evenly() {
    let mut addrs = Vec::new();
    let mut counters = Vec::new();
    for _ in 0..3 {
        let (addr, counter) = spawn_server().await;
        addrs.push(format!("tcp@{addr}"));
        counters.push(counter);
    }

    let discovery = Arc::new(StaticDiscovery::new(addrs));
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    for i in 0..6i64 {
        let sum: i64 = xclient
            .call("Arith.Sum", &SumArgs { a: i, b: i })
            .await
            .unwrap();
        assert_eq!(sum, i * 2);
    }
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
    xclient.close().await;
}

#[tokio::test]
async fn broadcast_invokes_every_endpoint_and_returns_a_reply() {
    let mut addrs = Vec::new();
    let mut counters = Vec::new();
    for _ in 0..3 {
        let (addr, counter) = spawn_server().await;
        addrs.push(format!("tcp@{addr}"));
        counters.push(counter);
    }

    let discovery = Arc::new(StaticDiscovery::new(addrs));
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    let sum: i64 = xclient
        .broadcast("Arith.Sum", &SumArgs { a: 1, b: 2 })
        .await
        .unwrap();
    assert_eq!(sum, 3);
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    xclient.close().await;
}

#[tokio::test]
async fn broadcast_fails_fast_when_one_endpoint_errors() {
    // One endpoint fails immediately; the others would take two seconds.
    let failing = Arc::new(Server::new());
    failing
        .register(
            Service::builder("Arith")
                .method("Work", |_: SumArgs| async move {
                    Err::<i64, _>(MethodError::new("disk on fire"))
                })
                .build(),
        )
        .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut addrs = vec![format!("tcp@{}", listener.local_addr().unwrap())];
    tokio::spawn(async move { failing.accept(listener).await });

    for _ in 0..2 {
        let slow = Arc::new(Server::new());
        slow.register(
            Service::builder("Arith")
                .method("Work", |args: SumArgs| async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(args.a + args.b)
                })
                .build(),
        )
        .unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.push(format!("tcp@{}", listener.local_addr().unwrap()));
        tokio::spawn(async move { slow.accept(listener).await });
    }

    let discovery = Arc::new(StaticDiscovery::new(addrs));
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    let started = Instant::now();
    let err = xclient
        .broadcast::<_, i64>("Arith.Work", &SumArgs { a: 1, b: 2 })
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("disk on fire"),
        "unexpected error: {err}"
    );
    // The slow peers were canceled instead of being awaited for their
    // full two seconds.
    assert!(started.elapsed() < Duration::from_secs(1));
    xclient.close().await;
}

#[tokio::test]
async fn malformed_header_kills_only_its_own_connection() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wirecall::codec::options::{read_prelude, write_prelude};

    let (addr, _) = spawn_server().await;
    let healthy = dial(&addr.to_string(), Options::default()).await.unwrap();

    // A raw connection that handshakes properly, then sends a header
    // frame that does not decode.
    let raw = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (mut reader, mut writer) = raw.into_split();
    write_prelude(&mut writer, &Options::default()).await.unwrap();
    let _ = read_prelude(&mut reader).await.unwrap();
    writer.write_all(&5u32.to_be_bytes()).await.unwrap();
    writer.write_all(b"kaput").await.unwrap();

    // The server drops the poisoned connection.
    let mut buf = [0u8; 8];
    let n = reader.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    // The healthy connection is unaffected.
    let sum: i64 = healthy.call("Arith.Sum", &SumArgs { a: 3, b: 4 }).await.unwrap();
    assert_eq!(sum, 7);
}

#[tokio::test]
async fn closed_client_rejects_calls_with_shutdown() {
    let (addr, _) = spawn_server().await;
    let client = dial(&addr.to_string(), Options::default()).await.unwrap();

    client.close().await.unwrap();
    let err = client
        .call::<_, i64>("Arith.Sum", &SumArgs { a: 1, b: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Shutdown));
}

#[tokio::test]
async fn xclient_reuses_one_connection_per_endpoint() {
    let (addr, counter) = spawn_server().await;
    let discovery = Arc::new(StaticDiscovery::new(vec![format!("tcp@{addr}")]));
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    for _ in 0..5 {
        let _: i64 = xclient
            .call("Arith.Sum", &SumArgs { a: 1, b: 1 })
            .await
            .unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 5);
    xclient.close().await;

    // After closing the cache, the next call dials a fresh connection.
    let _: i64 = xclient
        .call("Arith.Sum", &SumArgs { a: 1, b: 1 })
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 6);
}
