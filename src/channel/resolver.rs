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

//! Endpoint resolution.
//!
//! A [`Resolver`] turns a target string into the current endpoint set.
//! The default is a static pass-through of the configured endpoints; a
//! channel configured with a refresh interval re-resolves periodically
//! and diffs the result, starting subchannels for new endpoints and
//! stopping removed ones.

use super::{ChannelError, Endpoint};
use async_trait::async_trait;

/// Resolves a target to a set of endpoints.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves `target` to the current endpoint set.
    async fn resolve(&self, target: &str) -> Result<Vec<Endpoint>, ChannelError>;
}

/// The default resolver: returns a fixed endpoint list.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    endpoints: Vec<Endpoint>,
}

impl StaticResolver {
    /// Creates a resolver always returning `endpoints`.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _target: &str) -> Result<Vec<Endpoint>, ChannelError> {
        Ok(self.endpoints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_passthrough() {
        let endpoints = vec![
            Endpoint::plaintext("10.0.0.1", 50051),
            Endpoint::plaintext("10.0.0.2", 50051),
        ];
        let resolver = StaticResolver::new(endpoints.clone());
        let resolved = resolver.resolve("ignored").await.unwrap();
        assert_eq!(resolved, endpoints);
    }
}
