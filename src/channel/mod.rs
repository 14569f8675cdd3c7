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

//! Client channels: named pools of subchannels over a set of endpoints.
//!
//! A [`Channel`] resolves its target to endpoints, maintains one
//! [`Subchannel`] per endpoint, and picks a ready subchannel per call
//! according to its [`Balancer`] strategy. Channel names are unique
//! within the process; [`Channel::get`] retrieves a running channel by
//! name.

mod backoff;
mod balancer;
mod calls;
mod config;
mod error;
mod resolver;
mod subchannel;

pub use backoff::Backoff;
pub use balancer::{Balancer, BalancerKey, PickedSubchannel};
pub use calls::{CallSink, CallStream, ClientStreamingCall};
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use resolver::{Resolver, StaticResolver};
pub use subchannel::{Subchannel, SubchannelState};

use crate::call::Call;
use crate::codec::{Codec, Encoding};
use crate::context::Context;
use crate::error::Error;
use crate::interceptor::{StreamChain, UnaryChain, UnaryNext};
use crate::metadata::Timeout;
use crate::observability::StatsHandler;
use crate::service::{MethodDescriptor, Role, RpcInfo};
use crate::status::Status;
use crate::streaming::ClientCall;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, TE, USER_AGENT};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// A backend address plus its transport security.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub tls: bool,
}

impl Endpoint {
    /// A plaintext endpoint.
    pub fn plaintext(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }

    /// A TLS endpoint, using the channel's client TLS configuration.
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: true,
        }
    }

    /// The `host:port` authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Process-wide table of named channels, replaced copy-on-write.
static CHANNELS: OnceLock<RwLock<Arc<HashMap<String, Channel>>>> = OnceLock::new();

fn channels() -> &'static RwLock<Arc<HashMap<String, Channel>>> {
    CHANNELS.get_or_init(|| RwLock::new(Arc::new(HashMap::new())))
}

fn register(channel: Channel) -> Result<(), ChannelError> {
    let table = channels();
    let mut guard = table.write();
    let name = channel.name().to_string();
    if guard.contains_key(&name) {
        return Err(ChannelError::DuplicateName(name));
    }
    let mut next = HashMap::clone(&guard);
    next.insert(name, channel);
    *guard = Arc::new(next);
    Ok(())
}

fn deregister(name: &str) {
    let table = channels();
    let mut guard = table.write();
    if guard.contains_key(name) {
        let mut next = HashMap::clone(&guard);
        next.remove(name);
        *guard = Arc::new(next);
    }
}

/// A named pool of subchannels.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    name: String,
    target: String,
    balancer: Balancer,
    encoding: Encoding,
    unary: UnaryChain,
    streaming: StreamChain,
    stats: Arc<dyn StatsHandler>,
    tls: Option<Arc<rustls::ClientConfig>>,
    max_recv_message_size: usize,
    user_agent: String,
    subchannels: RwLock<Vec<Subchannel>>,
    cursor: AtomicUsize,
    resolver: Arc<dyn Resolver>,
    refresh: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("balancer", &self.inner.balancer)
            .field("subchannels", &self.inner.subchannels.read().len())
            .finish()
    }
}

impl Channel {
    /// Starts a channel and registers it under its name.
    ///
    /// With `sync_start` unset (the default) this returns immediately:
    /// subchannels stay idle and connect on first demand. With it set,
    /// every subchannel is connected before returning, and a resolver
    /// yielding no endpoints is fatal.
    pub async fn start(config: ChannelConfig) -> Result<Self, Error> {
        let resolver: Arc<dyn Resolver> = match config.resolver {
            Some(resolver) => resolver,
            None => Arc::new(StaticResolver::new(config.endpoints.clone())),
        };
        let endpoints = resolver.resolve(&config.target).await?;
        if endpoints.is_empty() && config.sync_start {
            return Err(Error::Channel(ChannelError::EmptyResolution {
                target: config.target,
            }));
        }

        let lazy = !config.sync_start;
        let subchannels: Vec<Subchannel> = endpoints
            .into_iter()
            .map(|endpoint| Subchannel::start(endpoint, config.tls.clone(), lazy))
            .collect();

        let channel = Self {
            inner: Arc::new(ChannelInner {
                name: config.name,
                target: config.target,
                balancer: config.balancer,
                encoding: config.encoding,
                unary: UnaryChain::new(config.unary_interceptors),
                streaming: StreamChain::new(config.stream_interceptors),
                stats: config.stats_handler,
                tls: config.tls,
                max_recv_message_size: config.max_recv_message_size,
                user_agent: config.user_agent,
                subchannels: RwLock::new(subchannels),
                cursor: AtomicUsize::new(0),
                resolver,
                refresh: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        };

        if let Err(error) = register(channel.clone()) {
            for subchannel in channel.inner.subchannels.read().iter() {
                subchannel.stop();
            }
            return Err(error.into());
        }
        debug!(channel = %channel.inner.name, "channel started");

        if config.sync_start {
            let ctx = Context::background();
            let snapshot: Vec<Subchannel> = channel.inner.subchannels.read().clone();
            for subchannel in snapshot {
                subchannel.wait_ready(&ctx).await.map_err(Error::Rpc)?;
            }
        }

        if let Some(interval) = config.refresh_interval {
            let weak = Arc::downgrade(&channel.inner);
            let task = tokio::spawn(refresh_loop(weak, interval));
            *channel.inner.refresh.lock() = Some(task);
        }
        Ok(channel)
    }

    /// Retrieves a running channel by name.
    pub fn get(name: &str) -> Result<Self, ChannelError> {
        let snapshot = Arc::clone(&channels().read());
        snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::Undefined(name.to_string()))
    }

    /// The channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` once at least one subchannel is connected.
    pub fn is_ready(&self) -> bool {
        self.inner
            .subchannels
            .read()
            .iter()
            .any(Subchannel::is_ready)
    }

    /// Stops the channel: pending calls fail as their connections close,
    /// subchannels stop, and the name is released.
    pub fn stop(&self, reason: &str) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel = %self.inner.name, reason, "stopping channel");
        if let Some(task) = self.inner.refresh.lock().take() {
            task.abort();
        }
        for subchannel in self.inner.subchannels.read().iter() {
            subchannel.stop();
        }
        deregister(&self.inner.name);
    }

    /// Picks a ready subchannel per the balancer strategy.
    ///
    /// Suspends while no subchannel is ready, bounded by the context
    /// deadline. Under the `claim` strategy the returned pick holds an
    /// exclusive lease released when it is dropped.
    pub async fn pick(&self, ctx: &Context) -> Result<PickedSubchannel, Error> {
        loop {
            if self.inner.stopped.load(Ordering::SeqCst) {
                return Err(Error::Channel(ChannelError::Stopped {
                    reason: "channel stopped".to_string(),
                }));
            }
            let snapshot: Vec<Subchannel> = self.inner.subchannels.read().clone();
            if snapshot.is_empty() {
                return Err(Error::Channel(ChannelError::NoEndpoints));
            }
            let ready: Vec<Subchannel> = snapshot
                .iter()
                .filter(|subchannel| subchannel.is_ready())
                .cloned()
                .collect();
            if ready.is_empty() {
                wait_any_ready(&snapshot, ctx).await.map_err(Error::Rpc)?;
                continue;
            }
            let picked = match self.inner.balancer {
                Balancer::RoundRobin => {
                    let index = balancer::round_robin_index(&self.inner.cursor, ready.len());
                    PickedSubchannel::new(ready[index].clone(), false)
                }
                Balancer::Random => {
                    PickedSubchannel::new(ready[balancer::random_index(ready.len())].clone(), false)
                }
                Balancer::Hash => {
                    let key = ctx
                        .value::<BalancerKey>()
                        .map(|key| key.key().to_string())
                        .unwrap_or_default();
                    let index = balancer::hash_index(&key, ready.len());
                    PickedSubchannel::new(ready[index].clone(), false)
                }
                Balancer::Direct => PickedSubchannel::new(ready[0].clone(), false),
                Balancer::Claim => {
                    match ready.iter().find(|subchannel| subchannel.try_claim()) {
                        Some(subchannel) => PickedSubchannel::new(subchannel.clone(), true),
                        None => return Err(Error::Channel(ChannelError::NoEndpoints)),
                    }
                }
            };
            return Ok(picked);
        }
    }

    /// Originates a raw call on a picked subchannel.
    ///
    /// The request headers (method path, metadata, `grpc-timeout`) go out
    /// immediately; the returned handle sends and receives messages.
    pub async fn call(
        &self,
        method: &MethodDescriptor,
        ctx: Context,
    ) -> Result<ClientCall, Error> {
        let info = RpcInfo::new(method, Role::Client);
        let picked = self.pick(&ctx).await?;
        let request = self.build_request(picked.subchannel().endpoint(), method, &ctx)?;
        let (response, stream) = picked
            .subchannel()
            .new_stream(request)
            .await
            .map_err(Error::Rpc)?;

        let call = Call::new(info.clone(), self.inner.encoding, Encoding::Identity);
        call.begin_headers().map_err(Error::Rpc)?;
        self.inner.stats.call_begin(&info);
        self.inner
            .streaming
            .on_stream(&info, &ctx)
            .await
            .map_err(Error::Rpc)?;

        let mut client_call = ClientCall::new(
            response,
            stream,
            call,
            ctx,
            self.inner.streaming.clone(),
            Arc::clone(&self.inner.stats),
            self.inner.max_recv_message_size,
        );
        client_call.hold_lease(Box::new(picked));
        Ok(client_call)
    }

    /// Runs a unary call through the client interceptor chain.
    pub async fn unary<C, Req, Resp>(
        &self,
        method: &MethodDescriptor,
        ctx: Context,
        codec: &C,
        request: &Req,
    ) -> Result<Resp, Status>
    where
        C: Codec<Req> + Codec<Resp>,
    {
        let request_bytes = <C as Codec<Req>>::encode(codec, request)?;
        let info = RpcInfo::new(method, Role::Client);
        let invoker = WireUnary {
            channel: self.clone(),
            method: method.clone(),
        };
        let response = self
            .inner
            .unary
            .run(ctx, request_bytes, &info, &invoker)
            .await?;
        <C as Codec<Resp>>::decode(codec, &response)
    }

    /// Starts a server-streaming call: one request, a response stream.
    pub async fn server_streaming<C, Req, Resp>(
        &self,
        method: &MethodDescriptor,
        ctx: Context,
        codec: &C,
        request: &Req,
    ) -> Result<CallStream<Resp>, Status>
    where
        C: Codec<Req> + Codec<Resp> + Clone + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let request_bytes = <C as Codec<Req>>::encode(codec, request)?;
        let call = self.call(method, ctx).await.map_err(error_to_status)?;
        // A send failure here is the stream being torn down by an early
        // server response; the terminal status arrives on the stream.
        let _ = call.send(&request_bytes).await;
        let _ = call.half_close().await;
        let (_sink, stream) = typed_halves::<C, Req, Resp>(call, codec.clone());
        Ok(stream)
    }

    /// Starts a client-streaming call: a request sink, one response.
    pub async fn client_streaming<C, Req, Resp>(
        &self,
        method: &MethodDescriptor,
        ctx: Context,
        codec: &C,
    ) -> Result<ClientStreamingCall<Req, Resp>, Status>
    where
        C: Codec<Req> + Codec<Resp> + Clone + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let call = self.call(method, ctx).await.map_err(error_to_status)?;
        let (sink, stream) = typed_halves::<C, Req, Resp>(call, codec.clone());
        Ok(calls::client_streaming_call(sink, stream))
    }

    /// Starts a bidirectional-streaming call.
    pub async fn bidi_streaming<C, Req, Resp>(
        &self,
        method: &MethodDescriptor,
        ctx: Context,
        codec: &C,
    ) -> Result<(CallSink<Req>, CallStream<Resp>), Status>
    where
        C: Codec<Req> + Codec<Resp> + Clone + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let call = self.call(method, ctx).await.map_err(error_to_status)?;
        Ok(typed_halves::<C, Req, Resp>(call, codec.clone()))
    }

    fn build_request(
        &self,
        endpoint: &Endpoint,
        method: &MethodDescriptor,
        ctx: &Context,
    ) -> Result<http::Request<()>, Error> {
        let scheme = if endpoint.tls { "https" } else { "http" };
        let uri = http::Uri::builder()
            .scheme(scheme)
            .authority(endpoint.authority())
            .path_and_query(method.path())
            .build()
            .map_err(|error| Error::Configuration(format!("invalid request uri: {}", error)))?;

        let mut request = http::Request::new(());
        *request.method_mut() = http::Method::POST;
        *request.uri_mut() = uri;
        *request.version_mut() = http::Version::HTTP_2;
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        headers.insert(TE, HeaderValue::from_static("trailers"));
        if let Ok(agent) = HeaderValue::from_str(&self.inner.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        headers.insert(
            HeaderName::from_static("grpc-encoding"),
            HeaderValue::from_static(self.inner.encoding.name()),
        );
        headers.insert(
            HeaderName::from_static("grpc-accept-encoding"),
            HeaderValue::from_static(Encoding::accept_header()),
        );
        if let Some(remaining) = ctx.remaining() {
            let timeout = Timeout::from_duration(remaining.max(Duration::from_millis(1)));
            if let Ok(value) = HeaderValue::from_str(&timeout.to_grpc_format()) {
                headers.insert(HeaderName::from_static("grpc-timeout"), value);
            }
        }
        ctx.outbound_metadata().append_to_headers(headers);
        Ok(request)
    }
}

/// Builds the typed halves of a raw call from a shared codec.
fn typed_halves<C, Req, Resp>(
    call: ClientCall,
    codec: C,
) -> (CallSink<Req>, CallStream<Resp>)
where
    C: Codec<Req> + Codec<Resp> + Clone + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let encode_codec = codec.clone();
    calls::typed_split(
        call,
        Arc::new(move |message: &Req| <C as Codec<Req>>::encode(&encode_codec, message)),
        Arc::new(move |bytes: &[u8]| <C as Codec<Resp>>::decode(&codec, bytes)),
    )
}

/// Maps infrastructure errors onto the status a caller observes.
fn error_to_status(error: Error) -> Status {
    match error {
        Error::Rpc(status) => status,
        Error::Channel(ChannelError::NoEndpoints) => Status::unavailable("no ready endpoints"),
        Error::Channel(error) => Status::unavailable(error.to_string()),
        Error::Transport(error) => Status::unavailable(error.to_string()),
        Error::Configuration(message) => Status::internal(message),
    }
}

/// The wire exchange at the tail of the client unary interceptor chain.
struct WireUnary {
    channel: Channel,
    method: MethodDescriptor,
}

#[async_trait]
impl UnaryNext for WireUnary {
    async fn run(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status> {
        let call = self
            .channel
            .call(&self.method, ctx)
            .await
            .map_err(error_to_status)?;
        // Send and receive run concurrently: a server may refuse the call
        // with a Trailer-Only response before the request body is fully
        // written, tearing down the send path. The terminal status from
        // the receive path is authoritative.
        let (writer, mut reader) = call.split();
        let send = async {
            writer.send(&request).await?;
            writer.half_close().await
        };
        let (send_result, recv_result) = tokio::join!(send, reader.recv());
        match recv_result {
            Ok(Some(response)) => {
                let status = reader.finish().await;
                if status.is_ok() {
                    Ok(response)
                } else {
                    Err(status)
                }
            }
            Ok(None) => {
                let status = reader.finish().await;
                if status.is_ok() {
                    send_result?;
                    Err(Status::internal(
                        "server closed unary call without a response",
                    ))
                } else {
                    Err(status)
                }
            }
            Err(status) => Err(status),
        }
    }
}

/// Waits until any of the subchannels reports ready.
async fn wait_any_ready(subchannels: &[Subchannel], ctx: &Context) -> Result<(), Status> {
    let waiters: Vec<Pin<Box<dyn Future<Output = Result<(), Status>> + Send>>> = subchannels
        .iter()
        .map(|subchannel| {
            let subchannel = subchannel.clone();
            let ctx = ctx.clone();
            Box::pin(async move { subchannel.wait_ready(&ctx).await })
                as Pin<Box<dyn Future<Output = Result<(), Status>> + Send>>
        })
        .collect();
    let (result, _, _) = futures_util::future::select_all(waiters).await;
    result
}

/// Periodic re-resolution: diff the endpoint set, start new subchannels,
/// stop removed ones.
async fn refresh_loop(weak: std::sync::Weak<ChannelInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        match inner.resolver.resolve(&inner.target).await {
            Ok(endpoints) => apply_resolution(&inner, endpoints),
            Err(error) => {
                warn!(channel = %inner.name, %error, "endpoint re-resolution failed");
            }
        }
    }
}

fn apply_resolution(inner: &ChannelInner, endpoints: Vec<Endpoint>) {
    let mut subchannels = inner.subchannels.write();
    subchannels.retain(|subchannel| {
        if endpoints.contains(subchannel.endpoint()) {
            true
        } else {
            debug!(channel = %inner.name, endpoint = %subchannel.endpoint(), "stopping removed endpoint");
            subchannel.stop();
            false
        }
    });
    for endpoint in endpoints {
        if !subchannels
            .iter()
            .any(|subchannel| subchannel.endpoint() == &endpoint)
        {
            debug!(channel = %inner.name, endpoint = %endpoint, "starting resolved endpoint");
            subchannels.push(Subchannel::start(endpoint, inner.tls.clone(), false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_authority() {
        let endpoint = Endpoint::plaintext("localhost", 50051);
        assert_eq!(endpoint.authority(), "localhost:50051");
        assert!(!endpoint.tls);
        assert!(Endpoint::tls("svc.internal", 443).tls);
    }

    #[tokio::test]
    async fn test_get_undefined_channel() {
        let error = Channel::get("no-such-channel-anywhere").unwrap_err();
        assert!(matches!(error, ChannelError::Undefined(_)));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let config = ChannelConfig::new("dup-name-test")
            .with_endpoint(Endpoint::plaintext("127.0.0.1", 1));
        let first = Channel::start(config).await.unwrap();
        let second = Channel::start(
            ChannelConfig::new("dup-name-test").with_endpoint(Endpoint::plaintext("127.0.0.1", 2)),
        )
        .await;
        assert!(matches!(
            second.unwrap_err(),
            Error::Channel(ChannelError::DuplicateName(_))
        ));
        first.stop("test done");
        assert!(Channel::get("dup-name-test").is_err());
    }

    #[tokio::test]
    async fn test_sync_start_requires_endpoints() {
        let config = ChannelConfig::new("sync-empty-test").with_sync_start(true);
        let error = Channel::start(config).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Channel(ChannelError::EmptyResolution { .. })
        ));
    }
}
