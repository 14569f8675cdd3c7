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

//! Server configuration.

use crate::codec::Encoding;
use crate::framing::DEFAULT_MAX_MESSAGE_SIZE;
use crate::interceptor::{StreamInterceptor, UnaryInterceptor};
use crate::observability::{NopStats, StatsHandler};
use crate::service::ServiceDescriptor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Transport security for the listener.
#[derive(Clone)]
pub enum ServerSecurity {
    /// Accept plaintext HTTP/2 (h2c with prior knowledge).
    Plaintext,
    /// Terminate TLS with the given rustls configuration.
    ///
    /// The configuration should advertise `h2` via ALPN.
    Tls(Arc<rustls::ServerConfig>),
}

impl std::fmt::Debug for ServerSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerSecurity::Plaintext => write!(f, "Plaintext"),
            ServerSecurity::Tls(_) => write!(f, "Tls"),
        }
    }
}

/// Configuration for a [`Server`](crate::server::Server).
///
/// # Examples
///
/// ```rust
/// use h2rpc::codec::JsonCodec;
/// use h2rpc::server::ServerConfig;
/// use h2rpc::service::ServiceDescriptor;
/// use h2rpc::status::Status;
/// use std::time::Duration;
///
/// let service = ServiceDescriptor::new("echo.Echo").unary(
///     "Unary",
///     JsonCodec,
///     |_ctx, msg: String| async move { Ok::<_, Status>(msg) },
/// );
///
/// let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
///     .with_service(service)
///     .with_drain_timeout(Duration::from_secs(5));
/// ```
pub struct ServerConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// Services to register at startup.
    pub services: Vec<ServiceDescriptor>,
    /// Unary interceptors in wrap order.
    pub unary_interceptors: Vec<Arc<dyn UnaryInterceptor>>,
    /// Streaming interceptors in invocation order.
    pub stream_interceptors: Vec<Arc<dyn StreamInterceptor>>,
    /// Receiver for call observability events.
    pub stats_handler: Arc<dyn StatsHandler>,
    /// Listener transport security.
    pub security: ServerSecurity,
    /// Maximum accepted message size after decompression.
    pub max_recv_message_size: usize,
    /// Preferred encoding for responses, subject to negotiation.
    pub default_encoding: Encoding,
    /// How long in-flight calls may run after graceful shutdown begins.
    pub drain_timeout: Duration,
    /// Optional name in the process-wide server registry.
    pub name: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("services", &self.services.len())
            .field("security", &self.security)
            .field("max_recv_message_size", &self.max_recv_message_size)
            .field("default_encoding", &self.default_encoding)
            .field("drain_timeout", &self.drain_timeout)
            .field("name", &self.name)
            .finish()
    }
}

impl ServerConfig {
    /// Creates a configuration with defaults for the given listen
    /// address.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            services: Vec::new(),
            unary_interceptors: Vec::new(),
            stream_interceptors: Vec::new(),
            stats_handler: Arc::new(NopStats),
            security: ServerSecurity::Plaintext,
            max_recv_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            default_encoding: Encoding::Identity,
            drain_timeout: Duration::from_secs(30),
            name: None,
        }
    }

    /// Registers a service.
    pub fn with_service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
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

    /// Terminates TLS on accepted connections.
    pub fn with_tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.security = ServerSecurity::Tls(tls);
        self
    }

    /// Sets the maximum accepted message size.
    pub fn with_max_recv_message_size(mut self, limit: usize) -> Self {
        self.max_recv_message_size = limit;
        self
    }

    /// Sets the preferred response encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    /// Sets the graceful shutdown drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Registers the server under a process-wide name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        assert!(config.services.is_empty());
        assert_eq!(config.max_recv_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.default_encoding, Encoding::Identity);
        assert!(matches!(config.security, ServerSecurity::Plaintext));
        assert!(config.name.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_encoding(Encoding::Gzip)
            .with_max_recv_message_size(1024)
            .with_drain_timeout(Duration::from_secs(1))
            .with_name("test-server");
        assert_eq!(config.default_encoding, Encoding::Gzip);
        assert_eq!(config.max_recv_message_size, 1024);
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
        assert_eq!(config.name.as_deref(), Some("test-server"));
    }
}
