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

//! Per-call context: deadline, cancellation, metadata and user values.
//!
//! Every handler and client call receives a [`Context`]. Contexts are
//! immutable snapshots plus a shared cancellation broadcaster: deriving a
//! child context never mutates the parent, and cancelling a parent cancels
//! every context derived from it. Deadlines combine earliest-wins: a child
//! can only tighten its parent's deadline, never extend it.
//!
//! Cancellation fires once. Waiters observe either deadline expiry or an
//! explicit cancel, indistinguishably at this API; the cause is
//! distinguished by the status the call closes with.

use crate::metadata::Metadata;
use futures_util::future::select_all;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// A per-call context.
///
/// Cheap to clone; clones share the same node. Use [`Context::child`],
/// [`Context::with_deadline`], [`Context::with_timeout`] or
/// [`Context::with_value`] to derive new contexts.
///
/// # Examples
///
/// ```rust
/// use h2rpc::context::Context;
/// use std::time::Duration;
///
/// let root = Context::background();
/// let child = root.with_timeout(Duration::from_secs(5));
/// assert!(child.deadline().is_some());
/// assert!(root.deadline().is_none());
///
/// root.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    /// Absolute deadline, already combined with ancestors at derivation.
    deadline: Option<Instant>,
    /// This node's cancellation broadcaster.
    cancel: watch::Sender<bool>,
    /// Parent node; cancellation of any ancestor cancels this context.
    parent: Option<Arc<ContextInner>>,
    /// Metadata received with the call that created this context tree.
    inbound: Arc<Metadata>,
    /// Metadata to send with the call, shared across the derivation tree.
    outbound: Arc<Mutex<Metadata>>,
    /// User value slots for this node.
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Context {
    /// Creates a root context with no deadline and no inbound metadata.
    pub fn background() -> Self {
        Self::build(None, None, Arc::new(Metadata::new()), HashMap::new())
    }

    /// Creates the root context for an incoming call.
    ///
    /// Used by the server when a stream arrives: `inbound` carries the
    /// request headers, `deadline` the parsed `grpc-timeout`, if any.
    pub fn for_call(inbound: Metadata, deadline: Option<Instant>) -> Self {
        Self::build(deadline, None, Arc::new(inbound), HashMap::new())
    }

    /// Derives the context for an incoming call from a supervising
    /// context.
    ///
    /// The child carries the call's inbound metadata and the earlier of
    /// the parent deadline and the call deadline; cancelling the parent
    /// (server shutdown) cancels the call.
    pub fn call_child(&self, inbound: Metadata, deadline: Option<Instant>) -> Self {
        let combined = match (self.deadline(), deadline) {
            (Some(parent), Some(call)) => Some(parent.min(call)),
            (parent, call) => parent.or(call),
        };
        Self::build_with_outbound(
            combined,
            Some(Arc::clone(&self.inner)),
            Arc::new(inbound),
            HashMap::new(),
            Some(Arc::new(Mutex::new(Metadata::new()))),
        )
    }

    fn build(
        deadline: Option<Instant>,
        parent: Option<Arc<ContextInner>>,
        inbound: Arc<Metadata>,
        values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self::build_with_outbound(deadline, parent, inbound, values, None)
    }

    fn build_with_outbound(
        deadline: Option<Instant>,
        parent: Option<Arc<ContextInner>>,
        inbound: Arc<Metadata>,
        values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
        outbound: Option<Arc<Mutex<Metadata>>>,
    ) -> Self {
        let outbound = outbound.unwrap_or_else(|| {
            parent
                .as_ref()
                .map(|p| Arc::clone(&p.outbound))
                .unwrap_or_else(|| Arc::new(Mutex::new(Metadata::new())))
        });
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                deadline,
                cancel,
                parent,
                inbound,
                outbound,
                values,
            }),
        }
    }

    /// Derives a child context inheriting deadline and cancellation.
    pub fn child(&self) -> Self {
        Self::build(
            self.deadline(),
            Some(Arc::clone(&self.inner)),
            Arc::clone(&self.inner.inbound),
            HashMap::new(),
        )
    }

    /// Derives a child whose deadline is the earlier of the parent's and
    /// the given instant.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let combined = match self.deadline() {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self::build(
            Some(combined),
            Some(Arc::clone(&self.inner)),
            Arc::clone(&self.inner.inbound),
            HashMap::new(),
        )
    }

    /// Derives a child whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child carrying a typed user value.
    ///
    /// Values are keyed by type; looking one up walks the derivation chain
    /// towards the root, so a child value shadows its parent's.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut values: HashMap<TypeId, Arc<dyn Any + Send + Sync>> = HashMap::new();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self::build(
            self.deadline(),
            Some(Arc::clone(&self.inner)),
            Arc::clone(&self.inner.inbound),
            values,
        )
    }

    /// Looks up a typed user value along the derivation chain.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let key = TypeId::of::<T>();
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if let Some(value) = inner.values.get(&key) {
                return Arc::clone(value).downcast::<T>().ok();
            }
            node = inner.parent.as_ref();
        }
        None
    }

    /// Returns the effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        // Deadlines are combined at derivation, but the parent chain is
        // still consulted in case an ancestor was built with a tighter one.
        let mut deadline: Option<Instant> = None;
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if let Some(d) = inner.deadline {
                deadline = Some(deadline.map_or(d, |cur| cur.min(d)));
            }
            node = inner.parent.as_ref();
        }
        deadline
    }

    /// Returns the time remaining until the deadline.
    ///
    /// `None` if no deadline is set; zero if it already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` if the deadline has passed.
    pub fn deadline_expired(&self) -> bool {
        matches!(self.deadline(), Some(d) if Instant::now() >= d)
    }

    /// Cancels this context and everything derived from it.
    ///
    /// Idempotent; ancestors are unaffected.
    pub fn cancel(&self) {
        let _ = self.inner.cancel.send(true);
    }

    /// Returns `true` if this context was cancelled or its deadline passed.
    pub fn is_cancelled(&self) -> bool {
        if self.deadline_expired() {
            return true;
        }
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            if *inner.cancel.borrow() {
                return true;
            }
            node = inner.parent.as_ref();
        }
        false
    }

    /// Completes when this context is cancelled or its deadline expires.
    ///
    /// Fires at most once per waiter; the cause is not distinguished here.
    pub async fn cancelled(&self) {
        let mut receivers = Vec::new();
        let mut node = Some(&self.inner);
        while let Some(inner) = node {
            receivers.push(inner.cancel.subscribe());
            node = inner.parent.as_ref();
        }
        let any_cancel = async move {
            let waiters: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> = receivers
                .into_iter()
                .map(|mut rx| {
                    Box::pin(async move {
                        let _ = rx.wait_for(|cancelled| *cancelled).await;
                    }) as Pin<Box<dyn Future<Output = ()> + Send>>
                })
                .collect();
            let _ = select_all(waiters).await;
        };
        match self.deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = any_cancel => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            None => any_cancel.await,
        }
    }

    /// Returns the metadata received with the call.
    pub fn inbound_metadata(&self) -> &Metadata {
        &self.inner.inbound
    }

    /// Runs a closure over the outbound metadata builder.
    ///
    /// The builder is shared across the whole derivation tree of one call.
    pub fn with_outbound_metadata<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> R {
        f(&mut self.inner.outbound.lock())
    }

    /// Returns a snapshot of the outbound metadata.
    pub fn outbound_metadata(&self) -> Metadata {
        self.inner.outbound.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_cancel_observed() {
        let ctx = Context::background();
        let child = ctx.child();
        assert!(!child.is_cancelled());

        let waiter = tokio::spawn({
            let child = child.clone();
            async move { child.cancelled().await }
        });
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation not observed")
            .unwrap();
        assert!(child.is_cancelled());
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_grandchildren() {
        let root = Context::background();
        let child = root.child();
        let grandchild = child.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(grandchild.is_cancelled());
        assert!(!root.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), grandchild.cancelled())
            .await
            .expect("grandchild did not observe cancel");
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_affect_parent() {
        let root = Context::background();
        let child = root.child();
        child.cancel();
        assert!(!root.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_cancelled() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("deadline expiry not observed");
        assert!(ctx.is_cancelled());
        assert!(ctx.deadline_expired());
    }

    #[test]
    fn test_deadline_earliest_wins() {
        let now = Instant::now();
        let parent = Context::background().with_deadline(now + Duration::from_secs(5));
        let child = parent.with_deadline(now + Duration::from_secs(60));
        assert_eq!(child.deadline(), Some(now + Duration::from_secs(5)));

        let tighter = parent.with_deadline(now + Duration::from_secs(1));
        assert_eq!(tighter.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_values_shadow_along_chain() {
        #[derive(Debug, PartialEq)]
        struct Who(&'static str);

        let root = Context::background().with_value(Who("root"));
        let child = root.with_value(Who("child"));
        let other = root.child();

        assert_eq!(child.value::<Who>().unwrap().0, "child");
        assert_eq!(other.value::<Who>().unwrap().0, "root");
        assert!(root.value::<u32>().is_none());
    }

    #[test]
    fn test_outbound_metadata_shared() {
        let root = Context::background();
        let child = root.child();
        child
            .with_outbound_metadata(|md| md.insert("x-token", "abc"))
            .unwrap();
        assert_eq!(root.outbound_metadata().get("x-token"), Some("abc"));
    }

    #[test]
    fn test_remaining_zero_after_expiry() {
        let ctx = Context::background().with_deadline(Instant::now() - Duration::from_secs(1));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert!(ctx.deadline_expired());
        assert!(ctx.is_cancelled());
    }
}
