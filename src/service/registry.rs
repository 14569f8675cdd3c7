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

//! The dispatch registry.

use super::handlers::{MethodHandler, UnaryMethodHandler};
use super::{MethodDescriptor, ServiceDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// The handler form of a registered method.
#[derive(Clone)]
pub(crate) enum MethodKind {
    /// Unary methods dispatch through the unary interceptor chain.
    Unary(Arc<dyn UnaryMethodHandler>),
    /// Streaming shapes dispatch as raw streams.
    Streaming(Arc<dyn MethodHandler>),
}

/// A method descriptor paired with its handler.
#[derive(Clone)]
pub struct RegisteredMethod {
    descriptor: MethodDescriptor,
    kind: MethodKind,
}

impl std::fmt::Debug for RegisteredMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredMethod")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl RegisteredMethod {
    /// Pairs a unary handler with its descriptor.
    pub fn unary(
        descriptor: MethodDescriptor,
        handler: impl UnaryMethodHandler + 'static,
    ) -> Self {
        Self {
            descriptor,
            kind: MethodKind::Unary(Arc::new(handler)),
        }
    }

    /// Pairs a streaming handler with its descriptor.
    pub fn streaming(descriptor: MethodDescriptor, handler: Arc<dyn MethodHandler>) -> Self {
        Self {
            descriptor,
            kind: MethodKind::Streaming(handler),
        }
    }

    /// The method descriptor.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub(crate) fn kind(&self) -> &MethodKind {
        &self.kind
    }
}

/// The path-to-handler map consulted on every new stream.
///
/// Built once at server startup from the configured services; read-only
/// afterwards, so the dispatch path takes no locks.
#[derive(Debug, Default)]
pub struct Registry {
    methods: HashMap<String, RegisteredMethod>,
}

impl Registry {
    /// Builds the registry by walking the configured services.
    pub fn build(services: Vec<ServiceDescriptor>) -> Self {
        let mut methods = HashMap::new();
        for service in services {
            for method in service.methods {
                let path = method.descriptor().path().to_string();
                if methods.insert(path.clone(), method).is_some() {
                    warn!(path, "duplicate method registration, last wins");
                }
            }
        }
        Self { methods }
    }

    /// Looks up the handler for a `/Package.Service/Method` path.
    pub fn lookup(&self, path: &str) -> Option<&RegisteredMethod> {
        self.methods.get(path)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::service::RpcShape;
    use crate::status::Status;

    #[test]
    fn test_registry_lookup() {
        let service = ServiceDescriptor::new("echo.Echo")
            .unary("Unary", JsonCodec, |_ctx, msg: String| async move {
                Ok::<_, Status>(msg)
            })
            .client_streaming(
                "Collect",
                JsonCodec,
                |_ctx, mut stream: crate::service::RequestStream<String>| async move {
                    let mut count = 0u32;
                    while stream.next().await?.is_some() {
                        count += 1;
                    }
                    Ok::<_, Status>(count)
                },
            );
        let registry = Registry::build(vec![service]);
        assert_eq!(registry.len(), 2);

        let unary = registry.lookup("/echo.Echo/Unary").unwrap();
        assert_eq!(unary.descriptor().shape(), RpcShape::Unary);
        let streaming = registry.lookup("/echo.Echo/Collect").unwrap();
        assert_eq!(streaming.descriptor().shape(), RpcShape::ClientStreaming);
        assert!(registry.lookup("/echo.Echo/Missing").is_none());
    }
}
