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

//! Channel configuration.

use super::{Balancer, Endpoint, Resolver};
use crate::codec::Encoding;
use crate::framing::DEFAULT_MAX_MESSAGE_SIZE;
use crate::interceptor::{StreamInterceptor, UnaryInterceptor};
use crate::observability::{NopStats, StatsHandler};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`Channel`](crate::channel::Channel).
///
/// # Examples
///
/// ```rust
/// use h2rpc::channel::{Balancer, ChannelConfig, Endpoint};
/// use h2rpc::codec::Encoding;
///
/// let config = ChannelConfig::new("orders")
///     .with_endpoint(Endpoint::plaintext("10.0.0.1", 50051))
///     .with_endpoint(Endpoint::plaintext("10.0.0.2", 50051))
///     .with_balancer(Balancer::RoundRobin)
///     .with_encoding(Encoding::Gzip);
/// assert_eq!(config.name, "orders");
/// assert_eq!(config.endpoints.len(), 2);
/// ```
pub struct ChannelConfig {
    /// Process-unique channel name.
    pub name: String,
    /// Target string handed to the resolver. Defaults to the name.
    pub target: String,
    /// Statically configured endpoints (the default resolver's output).
    pub endpoints: Vec<Endpoint>,
    /// Balancing strategy over ready subchannels.
    pub balancer: Balancer,
    /// Encoding applied to outbound messages.
    pub encoding: Encoding,
    /// Unary interceptors in wrap order.
    pub unary_interceptors: Vec<Arc<dyn UnaryInterceptor>>,
    /// Streaming interceptors in invocation order.
    pub stream_interceptors: Vec<Arc<dyn StreamInterceptor>>,
    /// Receiver for call observability events.
    pub stats_handler: Arc<dyn StatsHandler>,
    /// Connect all subchannels before `start` returns.
    pub sync_start: bool,
    /// Endpoint resolver; `None` uses the static endpoint list.
    pub resolver: Option<Arc<dyn Resolver>>,
    /// Re-resolve and diff endpoints at this interval.
    pub refresh_interval: Option<Duration>,
    /// Client TLS configuration for `tls` endpoints.
    ///
    /// Should advertise `h2` via ALPN.
    pub tls: Option<Arc<rustls::ClientConfig>>,
    /// Maximum accepted message size after decompression.
    pub max_recv_message_size: usize,
    /// `user-agent` sent with every call.
    pub user_agent: String,
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("endpoints", &self.endpoints)
            .field("balancer", &self.balancer)
            .field("encoding", &self.encoding)
            .field("sync_start", &self.sync_start)
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

impl ChannelConfig {
    /// Creates a configuration with defaults for the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            target: name.clone(),
            name,
            endpoints: Vec::new(),
            balancer: Balancer::default(),
            encoding: Encoding::Identity,
            unary_interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            stats_handler: Arc::new(NopStats),
            sync_start: false,
            resolver: None,
            refresh_interval: None,
            tls: None,
            max_recv_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            user_agent: concat!("h2rpc/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Appends an endpoint.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Replaces the endpoint list.
    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Sets the resolution target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sets the balancing strategy.
    pub fn with_balancer(mut self, balancer: Balancer) -> Self {
        self.balancer = balancer;
        self
    }

    /// Sets the outbound message encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Appends a unary interceptor; earlier entries wrap later ones.
    pub fn with_unary_interceptor(mut self, interceptor: Arc<dyn UnaryInterceptor>) -> Self {
        self.unary_interceptors.push(interceptor);
        self
    }

    /// Appends a streaming interceptor.
    pub fn with_stream_interceptor(mut self, interceptor: Arc<dyn StreamInterceptor>) -> Self {
        self.stream_interceptors.push(interceptor);
        self
    }

    /// Installs a stats handler.
    pub fn with_stats_handler(mut self, stats: Arc<dyn StatsHandler>) -> Self {
        self.stats_handler = stats;
        self
    }

    /// Connects all subchannels before `start` returns.
    pub fn with_sync_start(mut self, sync_start: bool) -> Self {
        self.sync_start = sync_start;
        self
    }

    /// Installs a resolver, optionally re-resolving at an interval.
    pub fn with_resolver(
        mut self,
        resolver: Arc<dyn Resolver>,
        refresh_interval: Option<Duration>,
    ) -> Self {
        self.resolver = Some(resolver);
        self.refresh_interval = refresh_interval;
        self
    }

    /// Sets the client TLS configuration.
    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets the maximum accepted message size.
    pub fn with_max_recv_message_size(mut self, limit: usize) -> Self {
        self.max_recv_message_size = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::new("orders");
        assert_eq!(config.target, "orders");
        assert_eq!(config.balancer, Balancer::RoundRobin);
        assert_eq!(config.encoding, Encoding::Identity);
        assert!(!config.sync_start);
        assert!(config.resolver.is_none());
        assert!(config.user_agent.starts_with("h2rpc/"));
    }

    #[test]
    fn test_builder_methods() {
        let config = ChannelConfig::new("orders")
            .with_target("dns:///orders.internal")
            .with_balancer(Balancer::Hash)
            .with_sync_start(true)
            .with_max_recv_message_size(1 << 20);
        assert_eq!(config.target, "dns:///orders.internal");
        assert_eq!(config.balancer, Balancer::Hash);
        assert!(config.sync_start);
        assert_eq!(config.max_recv_message_size, 1 << 20);
    }
}
