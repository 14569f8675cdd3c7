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

//! Channel pool behavior: balancing, naming, readiness and claims.

use h2rpc::channel::{Balancer, Channel, ChannelConfig, ChannelError, Endpoint};
use h2rpc::codec::JsonCodec;
use h2rpc::context::Context;
use h2rpc::error::Error;
use h2rpc::server::{Server, ServerConfig};
use h2rpc::service::{MethodDescriptor, RpcShape, ServiceDescriptor};
use h2rpc::status::{Code, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WhoRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WhoResponse {
    tag: String,
}

/// Starts a backend that answers with its tag.
async fn start_backend(tag: &str) -> SocketAddr {
    let tag = tag.to_string();
    let service = ServiceDescriptor::new("who.Who").unary(
        "Ami",
        JsonCodec,
        move |_ctx, _req: WhoRequest| {
            let tag = tag.clone();
            async move { Ok::<_, Status>(WhoResponse { tag }) }
        },
    );
    let server = Server::bind(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_service(service),
    )
    .await
    .expect("bind failed");
    let addr = server.local_addr();
    tokio::spawn(server.serve());
    addr
}

fn who_method() -> MethodDescriptor {
    MethodDescriptor::new("/who.Who/Ami", RpcShape::Unary)
}

#[tokio::test]
async fn test_round_robin_visits_all_backends() {
    let addr_a = start_backend("a").await;
    let addr_b = start_backend("b").await;
    let channel = Channel::start(
        ChannelConfig::new("rr-pool")
            .with_endpoint(Endpoint::plaintext(addr_a.ip().to_string(), addr_a.port()))
            .with_endpoint(Endpoint::plaintext(addr_b.ip().to_string(), addr_b.port()))
            .with_balancer(Balancer::RoundRobin)
            .with_sync_start(true),
    )
    .await
    .expect("channel start failed");
    assert!(channel.is_ready());

    let mut counts: HashMap<String, u32> = HashMap::new();
    for _ in 0..4 {
        let reply: WhoResponse = channel
            .unary(&who_method(), Context::background(), &JsonCodec, &WhoRequest {})
            .await
            .unwrap();
        *counts.entry(reply.tag).or_default() += 1;
    }
    assert_eq!(counts.get("a"), Some(&2));
    assert_eq!(counts.get("b"), Some(&2));
    channel.stop("test done");
}

#[tokio::test]
async fn test_named_lookup_and_stop() {
    let addr = start_backend("solo").await;
    let channel = Channel::start(
        ChannelConfig::new("named-pool")
            .with_endpoint(Endpoint::plaintext(addr.ip().to_string(), addr.port())),
    )
    .await
    .unwrap();

    let found = Channel::get("named-pool").expect("lookup failed");
    let reply: WhoResponse = found
        .unary(&who_method(), Context::background(), &JsonCodec, &WhoRequest {})
        .await
        .unwrap();
    assert_eq!(reply.tag, "solo");

    channel.stop("done");
    assert!(matches!(
        Channel::get("named-pool"),
        Err(ChannelError::Undefined(_))
    ));
}

#[tokio::test]
async fn test_lazy_channel_connects_on_demand() {
    let addr = start_backend("lazy").await;
    let channel = Channel::start(
        ChannelConfig::new("lazy-pool")
            .with_endpoint(Endpoint::plaintext(addr.ip().to_string(), addr.port())),
    )
    .await
    .unwrap();
    // Idle until the first call forces a connection.
    assert!(!channel.is_ready());

    let reply: WhoResponse = channel
        .unary(&who_method(), Context::background(), &JsonCodec, &WhoRequest {})
        .await
        .unwrap();
    assert_eq!(reply.tag, "lazy");
    assert!(channel.is_ready());
    channel.stop("test done");
}

#[tokio::test]
async fn test_unreachable_backend_times_out() {
    // Nothing listens on the endpoint; pick waits for readiness until
    // the context deadline expires.
    let channel = Channel::start(
        ChannelConfig::new("dead-pool").with_endpoint(Endpoint::plaintext("127.0.0.1", 1)),
    )
    .await
    .unwrap();

    let ctx = Context::background().with_timeout(Duration::from_millis(200));
    let error = channel
        .unary::<_, WhoRequest, WhoResponse>(&who_method(), ctx, &JsonCodec, &WhoRequest {})
        .await
        .unwrap_err();
    assert_eq!(error.code(), Code::DeadlineExceeded);
    channel.stop("test done");
}

#[tokio::test]
async fn test_claim_balancer_leases_exclusively() {
    let addr = start_backend("claimed").await;
    let channel = Channel::start(
        ChannelConfig::new("claim-pool")
            .with_endpoint(Endpoint::plaintext(addr.ip().to_string(), addr.port()))
            .with_balancer(Balancer::Claim)
            .with_sync_start(true),
    )
    .await
    .unwrap();

    // The first call holds the lease for its whole lifetime.
    let held = channel
        .call(&who_method(), Context::background())
        .await
        .expect("first claim failed");

    let contended = channel.pick(&Context::background()).await;
    assert!(matches!(
        contended,
        Err(Error::Channel(ChannelError::NoEndpoints))
    ));

    // Dropping the call releases the lease.
    drop(held);
    let picked = channel
        .pick(&Context::background())
        .await
        .expect("lease was not released");
    drop(picked);
    channel.stop("test done");
}

#[tokio::test]
async fn test_hash_balancer_is_sticky() {
    use h2rpc::channel::BalancerKey;

    let addr_a = start_backend("a").await;
    let addr_b = start_backend("b").await;
    let channel = Channel::start(
        ChannelConfig::new("hash-pool")
            .with_endpoint(Endpoint::plaintext(addr_a.ip().to_string(), addr_a.port()))
            .with_endpoint(Endpoint::plaintext(addr_b.ip().to_string(), addr_b.port()))
            .with_balancer(Balancer::Hash)
            .with_sync_start(true),
    )
    .await
    .unwrap();

    let ctx = Context::background().with_value(BalancerKey::new("tenant-7"));
    let mut tags = Vec::new();
    for _ in 0..4 {
        let reply: WhoResponse = channel
            .unary(&who_method(), ctx.clone(), &JsonCodec, &WhoRequest {})
            .await
            .unwrap();
        tags.push(reply.tag);
    }
    assert!(tags.windows(2).all(|pair| pair[0] == pair[1]), "{:?}", tags);
    channel.stop("test done");
}
