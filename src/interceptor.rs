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

//! Interceptor pipelines for unary and streaming calls.
//!
//! Unary interceptors wrap the whole request/response exchange: each one
//! receives the context, the encoded request and a `next` continuation
//! invoking the rest of the chain. The chain folds right-to-left, so
//! earlier entries wrap later ones:
//!
//! ```text
//! chain([a, b, c])  ==  a(.. b(.. c(.. handler)))
//! ```
//!
//! Streaming interceptors are a polymorphic hook capability observing
//! stream lifecycle events: `on_stream` before the handler sees the
//! stream, `on_send` / `on_recv` around every message. Returning an error
//! from any hook fails the call with that status.
//!
//! The same traits serve both peers; [`RpcInfo::role`](crate::service::RpcInfo::role)
//! tells an interceptor which side it is running on.

use crate::context::Context;
use crate::service::RpcInfo;
use crate::status::Status;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The continuation a unary interceptor invokes to run the rest of the
/// pipeline.
///
/// An interceptor must call [`UnaryNext::run`] at most once; a second
/// invocation fails with `INTERNAL`.
#[async_trait]
pub trait UnaryNext: Send + Sync {
    /// Runs the remaining interceptors and the final handler.
    async fn run(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status>;
}

/// A unary interceptor.
///
/// Implementations may short-circuit (return without calling `next`),
/// transform the request or response, derive a new context, or convert an
/// error status. Errors from `next` are surfaced unchanged unless the
/// interceptor converts them.
#[async_trait]
pub trait UnaryInterceptor: Send + Sync + 'static {
    /// Intercepts one unary exchange.
    async fn intercept(
        &self,
        ctx: Context,
        request: Bytes,
        info: &RpcInfo,
        next: &dyn UnaryNext,
    ) -> Result<Bytes, Status>;
}

/// A streaming interceptor: lifecycle hooks around stream operations.
///
/// All hooks default to no-ops, so implementations override only what
/// they observe.
#[async_trait]
pub trait StreamInterceptor: Send + Sync + 'static {
    /// Invoked once when the stream is established, before the handler
    /// (server) or caller (client) exchanges any message.
    async fn on_stream(&self, info: &RpcInfo, ctx: &Context) -> Result<(), Status> {
        let _ = (info, ctx);
        Ok(())
    }

    /// Invoked with each encoded message before it is framed and sent.
    async fn on_send(&self, info: &RpcInfo, message: &[u8]) -> Result<(), Status> {
        let _ = (info, message);
        Ok(())
    }

    /// Invoked with each decoded message before it is surfaced.
    async fn on_recv(&self, info: &RpcInfo, message: &[u8]) -> Result<(), Status> {
        let _ = (info, message);
        Ok(())
    }
}

/// An ordered unary interceptor chain.
#[derive(Clone, Default)]
pub struct UnaryChain {
    interceptors: Vec<Arc<dyn UnaryInterceptor>>,
}

impl std::fmt::Debug for UnaryChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnaryChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl UnaryChain {
    /// Creates a chain from interceptors in wrap order: the first entry
    /// wraps all later ones.
    pub fn new(interceptors: Vec<Arc<dyn UnaryInterceptor>>) -> Self {
        Self { interceptors }
    }

    /// Returns `true` if the chain has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs the chain around `handler`.
    pub async fn run(
        &self,
        ctx: Context,
        request: Bytes,
        info: &RpcInfo,
        handler: &dyn UnaryNext,
    ) -> Result<Bytes, Status> {
        let mut next: Box<dyn UnaryNext + '_> = Box::new(Tail { handler });
        for interceptor in self.interceptors.iter().rev() {
            next = Box::new(Link {
                interceptor: Arc::clone(interceptor),
                rest: next,
                info,
            });
        }
        next.run(ctx, request).await
    }
}

/// Terminal chain node delegating to the handler.
struct Tail<'a> {
    handler: &'a dyn UnaryNext,
}

#[async_trait]
impl UnaryNext for Tail<'_> {
    async fn run(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status> {
        self.handler.run(ctx, request).await
    }
}

/// One interceptor plus the rest of the chain.
struct Link<'a> {
    interceptor: Arc<dyn UnaryInterceptor>,
    rest: Box<dyn UnaryNext + 'a>,
    info: &'a RpcInfo,
}

#[async_trait]
impl UnaryNext for Link<'_> {
    async fn run(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status> {
        let guard = CallOnce {
            inner: self.rest.as_ref(),
            used: AtomicBool::new(false),
        };
        self.interceptor
            .intercept(ctx, request, self.info, &guard)
            .await
    }
}

/// Enforces the at-most-once contract on `next`.
struct CallOnce<'a> {
    inner: &'a dyn UnaryNext,
    used: AtomicBool,
}

#[async_trait]
impl UnaryNext for CallOnce<'_> {
    async fn run(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Status::internal(
                "interceptor invoked next more than once",
            ));
        }
        self.inner.run(ctx, request).await
    }
}

/// An ordered set of streaming interceptors, invoked in registration
/// order for every hook.
#[derive(Clone, Default)]
pub struct StreamChain {
    interceptors: Vec<Arc<dyn StreamInterceptor>>,
}

impl std::fmt::Debug for StreamChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl StreamChain {
    /// Creates a chain from interceptors in invocation order.
    pub fn new(interceptors: Vec<Arc<dyn StreamInterceptor>>) -> Self {
        Self { interceptors }
    }

    /// Returns `true` if the chain has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs every `on_stream` hook.
    pub async fn on_stream(&self, info: &RpcInfo, ctx: &Context) -> Result<(), Status> {
        for interceptor in &self.interceptors {
            interceptor.on_stream(info, ctx).await?;
        }
        Ok(())
    }

    /// Runs every `on_send` hook.
    pub async fn on_send(&self, info: &RpcInfo, message: &[u8]) -> Result<(), Status> {
        for interceptor in &self.interceptors {
            interceptor.on_send(info, message).await?;
        }
        Ok(())
    }

    /// Runs every `on_recv` hook.
    pub async fn on_recv(&self, info: &RpcInfo, message: &[u8]) -> Result<(), Status> {
        for interceptor in &self.interceptors {
            interceptor.on_recv(info, message).await?;
        }
        Ok(())
    }
}
