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

//! Service and method descriptors, and the dispatch registry.
//!
//! A `.proto`-driven code generator produces one [`MethodDescriptor`] per
//! method and registers a typed handler for it on a [`ServiceDescriptor`].
//! At server startup the descriptors are walked once into a [`Registry`],
//! which is read-only for the lifetime of the server; the dispatch path
//! takes no locks.

mod handlers;
pub(crate) mod registry;

pub use handlers::{
    BidiStreamingMethod, ClientStreamingMethod, MethodHandler, RequestStream, ResponseSink,
    ServerStreamingMethod, UnaryMethod, UnaryMethodHandler,
};
pub use registry::{RegisteredMethod, Registry};

use std::fmt;
use std::sync::Arc;

/// The four gRPC call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcShape {
    /// One request, one response.
    Unary,
    /// One request, a stream of responses.
    ServerStreaming,
    /// A stream of requests, one response.
    ClientStreaming,
    /// Unrestricted interleaving of requests and responses.
    BidiStreaming,
}

impl RpcShape {
    /// Returns `true` if the client may send more than one message.
    pub fn client_streams(self) -> bool {
        matches!(self, RpcShape::ClientStreaming | RpcShape::BidiStreaming)
    }

    /// Returns `true` if the server may send more than one message.
    pub fn server_streams(self) -> bool {
        matches!(self, RpcShape::ServerStreaming | RpcShape::BidiStreaming)
    }
}

impl fmt::Display for RpcShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcShape::Unary => "unary",
            RpcShape::ServerStreaming => "server_streaming",
            RpcShape::ClientStreaming => "client_streaming",
            RpcShape::BidiStreaming => "bidi_streaming",
        };
        write!(f, "{}", name)
    }
}

/// Which side of the wire a call is observed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side accepting the stream.
    Server,
    /// The side originating the stream.
    Client,
}

/// An immutable description of one RPC method.
///
/// # Examples
///
/// ```rust
/// use h2rpc::service::{MethodDescriptor, RpcShape};
///
/// let method = MethodDescriptor::new("/routeguide.RouteGuide/ListFeatures", RpcShape::ServerStreaming);
/// assert_eq!(method.service_name(), Some("routeguide.RouteGuide"));
/// assert_eq!(method.method_name(), Some("ListFeatures"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Fully-qualified path, `/Package.Service/Method`.
    path: Arc<str>,
    /// The RPC shape of the method.
    shape: RpcShape,
}

impl MethodDescriptor {
    /// Creates a descriptor for the given path and shape.
    pub fn new(path: impl Into<Arc<str>>, shape: RpcShape) -> Self {
        Self {
            path: path.into(),
            shape,
        }
    }

    /// The fully-qualified method path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The RPC shape.
    pub fn shape(&self) -> RpcShape {
        self.shape
    }

    /// The `Package.Service` component of the path, if well-formed.
    pub fn service_name(&self) -> Option<&str> {
        self.path.strip_prefix('/')?.split('/').next()
    }

    /// The method component of the path, if well-formed.
    pub fn method_name(&self) -> Option<&str> {
        let mut parts = self.path.strip_prefix('/')?.split('/');
        parts.next()?;
        parts.next()
    }
}

/// Identifying information about a call, shared with interceptors and
/// stats handlers.
#[derive(Debug, Clone)]
pub struct RpcInfo {
    /// Fully-qualified method path.
    path: Arc<str>,
    /// The RPC shape.
    shape: RpcShape,
    /// Which peer this call is observed from.
    role: Role,
}

impl RpcInfo {
    /// Creates call info for a method observed from `role`.
    pub fn new(method: &MethodDescriptor, role: Role) -> Self {
        Self {
            path: Arc::clone(&method.path),
            shape: method.shape,
            role,
        }
    }

    /// Creates call info from raw parts (used for unrecognized paths).
    pub fn from_path(path: impl Into<Arc<str>>, shape: RpcShape, role: Role) -> Self {
        Self {
            path: path.into(),
            shape,
            role,
        }
    }

    /// The fully-qualified method path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The RPC shape.
    pub fn shape(&self) -> RpcShape {
        self.shape
    }

    /// The observing side.
    pub fn role(&self) -> Role {
        self.role
    }
}

/// A named collection of method handlers, as produced by generated code.
///
/// # Examples
///
/// ```rust
/// use h2rpc::codec::JsonCodec;
/// use h2rpc::service::ServiceDescriptor;
/// use h2rpc::status::Status;
///
/// let service = ServiceDescriptor::new("echo.Echo").unary(
///     "Unary",
///     JsonCodec,
///     |_ctx, msg: String| async move { Ok::<_, Status>(msg) },
/// );
/// assert_eq!(service.name(), "echo.Echo");
/// assert_eq!(service.methods().len(), 1);
/// ```
pub struct ServiceDescriptor {
    /// Fully-qualified service name, `Package.Service`.
    name: String,
    /// Registered methods.
    methods: Vec<RegisteredMethod>,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .finish()
    }
}

impl ServiceDescriptor {
    /// Creates an empty service descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// The fully-qualified service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered methods.
    pub fn methods(&self) -> &[RegisteredMethod] {
        &self.methods
    }

    fn path_for(&self, method: &str) -> String {
        format!("/{}/{}", self.name, method)
    }

    /// Registers a unary method.
    pub fn unary<C, Req, Resp, F, Fut>(mut self, method: &str, codec: C, handler: F) -> Self
    where
        C: crate::codec::Codec<Req> + crate::codec::Codec<Resp> + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
        F: Fn(crate::context::Context, Req) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Resp, crate::status::Status>> + Send + 'static,
    {
        let descriptor = MethodDescriptor::new(self.path_for(method), RpcShape::Unary);
        self.methods.push(RegisteredMethod::unary(
            descriptor,
            UnaryMethod::<C, Req, Resp, F>::new(codec, handler),
        ));
        self
    }

    /// Registers a server-streaming method.
    pub fn server_streaming<C, Req, Resp, F, Fut>(
        mut self,
        method: &str,
        codec: C,
        handler: F,
    ) -> Self
    where
        C: crate::codec::Codec<Req> + crate::codec::Codec<Resp> + Clone + 'static,
        Req: Send + 'static,
        Resp: Send + Sync + 'static,
        F: Fn(crate::context::Context, Req, ResponseSink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), crate::status::Status>> + Send + 'static,
    {
        let descriptor = MethodDescriptor::new(self.path_for(method), RpcShape::ServerStreaming);
        self.methods.push(RegisteredMethod::streaming(
            descriptor,
            Arc::new(ServerStreamingMethod::<C, Req, Resp, F>::new(codec, handler)),
        ));
        self
    }

    /// Registers a client-streaming method.
    pub fn client_streaming<C, Req, Resp, F, Fut>(
        mut self,
        method: &str,
        codec: C,
        handler: F,
    ) -> Self
    where
        C: crate::codec::Codec<Req> + crate::codec::Codec<Resp> + Clone + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
        F: Fn(crate::context::Context, RequestStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Resp, crate::status::Status>> + Send + 'static,
    {
        let descriptor = MethodDescriptor::new(self.path_for(method), RpcShape::ClientStreaming);
        self.methods.push(RegisteredMethod::streaming(
            descriptor,
            Arc::new(ClientStreamingMethod::<C, Req, Resp, F>::new(codec, handler)),
        ));
        self
    }

    /// Registers a bidirectional-streaming method.
    pub fn bidi_streaming<C, Req, Resp, F, Fut>(
        mut self,
        method: &str,
        codec: C,
        handler: F,
    ) -> Self
    where
        C: crate::codec::Codec<Req> + crate::codec::Codec<Resp> + Clone + 'static,
        Req: Send + 'static,
        Resp: Send + Sync + 'static,
        F: Fn(crate::context::Context, RequestStream<Req>, ResponseSink<Resp>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: std::future::Future<Output = Result<(), crate::status::Status>> + Send + 'static,
    {
        let descriptor = MethodDescriptor::new(self.path_for(method), RpcShape::BidiStreaming);
        self.methods.push(RegisteredMethod::streaming(
            descriptor,
            Arc::new(BidiStreamingMethod::<C, Req, Resp, F>::new(codec, handler)),
        ));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_descriptor_parts() {
        let method = MethodDescriptor::new("/echo.Echo/Unary", RpcShape::Unary);
        assert_eq!(method.path(), "/echo.Echo/Unary");
        assert_eq!(method.service_name(), Some("echo.Echo"));
        assert_eq!(method.method_name(), Some("Unary"));
        assert_eq!(method.shape(), RpcShape::Unary);
    }

    #[test]
    fn test_shape_streaming_predicates() {
        assert!(!RpcShape::Unary.client_streams());
        assert!(!RpcShape::Unary.server_streams());
        assert!(RpcShape::ServerStreaming.server_streams());
        assert!(!RpcShape::ServerStreaming.client_streams());
        assert!(RpcShape::ClientStreaming.client_streams());
        assert!(RpcShape::BidiStreaming.client_streams());
        assert!(RpcShape::BidiStreaming.server_streams());
    }

    #[test]
    fn test_rpc_info() {
        let method = MethodDescriptor::new("/a.B/C", RpcShape::BidiStreaming);
        let info = RpcInfo::new(&method, Role::Server);
        assert_eq!(info.path(), "/a.B/C");
        assert_eq!(info.shape(), RpcShape::BidiStreaming);
        assert_eq!(info.role(), Role::Server);
    }
}
