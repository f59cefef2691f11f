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

//! Cooperative cancellation for async operations.
//!
//! A [`CancelToken`] is a cloneable handle; canceling any clone cancels
//! all of them, and done-ness is awaitable without polling. Child tokens
//! derived with [`CancelToken::child`] fire when either the parent fires
//! or the child itself is canceled, which is how broadcast aborts its
//! peers on first failure without canceling the caller's token.

use tokio::sync::watch;

/// A cancellation token for cooperative cancellation of async operations.
///
/// ```rust
/// use wirecall::cancel::CancelToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let token = CancelToken::new();
/// let observer = token.clone();
///
/// token.cancel();
/// assert!(observer.is_cancelled());
/// observer.cancelled().await; // resolves immediately
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a new, un-canceled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Requests cancellation. All clones and children observe it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    ///
    /// If the token is never canceled, this pends forever; callers race
    /// it against the work being bounded.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Every clone holds the sender, so the channel can only close once
        // no handle remains to cancel through.
        std::future::pending::<()>().await;
    }

    /// Derives a child token: it fires when this token fires or when the
    /// child itself is canceled. Canceling the child does not cancel the
    /// parent.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            forward.cancel();
        });
        child
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
