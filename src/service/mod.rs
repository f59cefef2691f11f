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

//! Service definitions and typed method adapters.
//!
//! A [`Service`] is a named collection of methods built through
//! [`ServiceBuilder`]. Each registered method is an async closure from one
//! deserializable argument to one serializable reply; the builder erases
//! the types into an adapter working on raw body bytes in the connection's
//! negotiated [`WireFormat`]. The adapter owns decode, invoke, and encode,
//! so a fresh argument and reply value exist per request and the method
//! signature contract is enforced by the compiler rather than checked at
//! registration time.
//!
//! Shared receiver state is captured by the closures, typically through an
//! `Arc`:
//!
//! ```rust
//! use wirecall::service::Service;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Args { a: i64, b: i64 }
//!
//! let hits = Arc::new(AtomicU64::new(0));
//! let counted = Arc::clone(&hits);
//! let service = Service::builder("Arith")
//!     .method("Sum", move |args: Args| {
//!         let counted = Arc::clone(&counted);
//!         async move {
//!             counted.fetch_add(1, Ordering::Relaxed);
//!             Ok(args.a + args.b)
//!         }
//!     })
//!     .build();
//! assert_eq!(service.name(), "Arith");
//! ```

use crate::serialization::{DeserializationError, SerializationError, WireFormat};
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Error returned by a service method implementation.
///
/// The message travels to the caller verbatim in the reply header's error
/// field; the connection and all other in-flight requests are unaffected.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MethodError {
    message: String,
}

impl MethodError {
    /// Creates a method error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failure modes of one method invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The request body did not decode into the method's argument type.
    #[error("rpc server: invalid request body: {source}")]
    BadBody {
        /// The underlying decode error.
        #[source]
        source: DeserializationError,
    },

    /// The method itself failed; surfaced per-call to the remote caller.
    #[error("{0}")]
    Method(MethodError),

    /// The reply value could not be encoded.
    #[error("rpc server: reply encode failed: {source}")]
    ReplyEncode {
        /// The underlying encode error.
        #[source]
        source: SerializationError,
    },
}

type MethodHandler =
    Box<dyn Fn(WireFormat, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, InvokeError>> + Send + Sync>;

/// One registered method: the type-erased adapter plus its call counter.
pub struct MethodEntry {
    handler: MethodHandler,
    calls: AtomicU64,
}

impl MethodEntry {
    /// Number of times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("calls", &self.num_calls())
            .finish_non_exhaustive()
    }
}

/// A named collection of invocable methods.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl Service {
    /// Starts building a service with the given name.
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Returns the service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.get(name)
    }

    /// Iterates the registered methods with their call counts.
    pub fn methods(&self) -> impl Iterator<Item = (&str, u64)> {
        self.methods
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.num_calls()))
    }

    /// Invokes a method with a raw argument body, producing a raw reply
    /// body. The call counter is bumped before the handler runs.
    pub async fn invoke(
        &self,
        method: &str,
        format: WireFormat,
        argv: Vec<u8>,
    ) -> Result<Vec<u8>, InvokeError> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| InvokeError::Method(MethodError::new(format!(
                "rpc server: can't find method {method}"
            ))))?;
        entry.calls.fetch_add(1, Ordering::Relaxed);
        (entry.handler)(format, argv).await
    }
}

/// Builder collecting typed methods into a [`Service`].
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceBuilder {
    /// Registers a method under the given name.
    ///
    /// The handler takes one deserializable argument and resolves to a
    /// serializable reply or a [`MethodError`]. Registering the same name
    /// twice replaces the earlier handler.
    pub fn method<A, R, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    {
        let name = name.into();
        let handler = Arc::new(handler);
        let erased: MethodHandler = Box::new(move |format: WireFormat, argv: Vec<u8>| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let args: A = format
                    .from_slice(&argv)
                    .map_err(|source| InvokeError::BadBody { source })?;
                let reply = handler(args).await.map_err(InvokeError::Method)?;
                format
                    .to_vec(&reply)
                    .map_err(|source| InvokeError::ReplyEncode { source })
            })
        });
        debug!(service = %self.name, method = %name, "registered method");
        self.methods.insert(
            name,
            MethodEntry {
                handler: erased,
                calls: AtomicU64::new(0),
            },
        );
        self
    }

    /// Finishes the service.
    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
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
            .method("Div", |args: SumArgs| async move {
                if args.b == 0 {
                    return Err(MethodError::new("division by zero"));
                }
                Ok(args.a / args.b)
            })
            .build()
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let service = arith();
        let format = WireFormat::Json;
        let argv = format.to_vec(&SumArgs { a: 3, b: 4 }).unwrap();

        let reply = service.invoke("Sum", format, argv).await.unwrap();
        let sum: i64 = format.from_slice(&reply).unwrap();
        assert_eq!(sum, 7);
    }

    #[tokio::test]
    async fn test_invoke_method_error() {
        let service = arith();
        let format = WireFormat::Json;
        let argv = format.to_vec(&SumArgs { a: 1, b: 0 }).unwrap();

        let err = service.invoke("Div", format, argv).await.unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[tokio::test]
    async fn test_invoke_bad_body() {
        let service = arith();
        let err = service
            .invoke("Sum", WireFormat::Json, b"not json".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::BadBody { .. }));
    }

    #[tokio::test]
    async fn test_invoke_unknown_method() {
        let service = arith();
        let err = service
            .invoke("Missing", WireFormat::Json, Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("can't find method"));
    }

    #[tokio::test]
    async fn test_call_counts() {
        let service = arith();
        let format = WireFormat::Json;
        let argv = format.to_vec(&SumArgs { a: 1, b: 1 }).unwrap();

        assert_eq!(service.method("Sum").unwrap().num_calls(), 0);
        for _ in 0..3 {
            service.invoke("Sum", format, argv.clone()).await.unwrap();
        }
        assert_eq!(service.method("Sum").unwrap().num_calls(), 3);
        assert_eq!(service.method("Div").unwrap().num_calls(), 0);
    }

    #[tokio::test]
    async fn test_counts_include_failed_calls() {
        let service = arith();
        let format = WireFormat::Json;
        let argv = format.to_vec(&SumArgs { a: 1, b: 0 }).unwrap();

        let _ = service.invoke("Div", format, argv).await;
        assert_eq!(service.method("Div").unwrap().num_calls(), 1);
    }

    #[test]
    fn test_methods_iterator() {
        let service = arith();
        let mut names: Vec<_> = service.methods().map(|(name, _)| name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["Div", "Sum"]);
    }
}
