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

//! End-to-end streaming tests: server-, client- and bidi-streaming.

use h2rpc::channel::{Channel, ChannelConfig, Endpoint};
use h2rpc::codec::JsonCodec;
use h2rpc::context::Context;
use h2rpc::metadata::Metadata;
use h2rpc::server::{Server, ServerConfig, ServerHandle};
use h2rpc::service::{MethodDescriptor, RequestStream, ResponseSink, RpcShape, ServiceDescriptor};
use h2rpc::status::{Code, Status};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Rectangle {
    lo: Point,
    hi: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Point {
    latitude: i32,
    longitude: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Feature {
    name: String,
    location: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RouteSummary {
    point_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RouteNote {
    location: Point,
    message: String,
}

fn route_guide() -> ServiceDescriptor {
    ServiceDescriptor::new("routeguide.RouteGuide")
        .server_streaming(
            "ListFeatures",
            JsonCodec,
            |_ctx, rect: Rectangle, sink: ResponseSink<Feature>| async move {
                sink.send(&Feature {
                    name: "one".into(),
                    location: rect.lo,
                })
                .await?;
                sink.send(&Feature {
                    name: "two".into(),
                    location: rect.hi,
                })
                .await?;
                Ok(())
            },
        )
        .client_streaming(
            "RecordRoute",
            JsonCodec,
            |_ctx, mut points: RequestStream<Point>| async move {
                let mut count = 0u32;
                while let Some(_point) = points.next().await? {
                    count += 1;
                }
                Ok::<_, Status>(RouteSummary { point_count: count })
            },
        )
        .bidi_streaming(
            "RouteChat",
            JsonCodec,
            |_ctx, mut notes: RequestStream<RouteNote>, sink: ResponseSink<RouteNote>| async move {
                let mut seen: Vec<RouteNote> = Vec::new();
                while let Some(note) = notes.next().await? {
                    for prior in seen.iter().filter(|prior| prior.location == note.location) {
                        sink.send(prior).await?;
                    }
                    seen.push(note);
                }
                Ok(())
            },
        )
}

async fn start_route_guide() -> (SocketAddr, ServerHandle) {
    let server = Server::bind(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_service(route_guide()),
    )
    .await
    .expect("bind failed");
    let addr = server.local_addr();
    let handle = server.handle();
    tokio::spawn(server.serve());
    (addr, handle)
}

async fn connect(name: &str, addr: SocketAddr) -> Channel {
    Channel::start(
        ChannelConfig::new(name)
            .with_endpoint(Endpoint::plaintext(addr.ip().to_string(), addr.port())),
    )
    .await
    .expect("channel start failed")
}

#[tokio::test]
async fn test_server_streaming_two_features() {
    let (addr, _handle) = start_route_guide().await;
    let channel = connect("stream-list", addr).await;

    let method = MethodDescriptor::new(
        "/routeguide.RouteGuide/ListFeatures",
        RpcShape::ServerStreaming,
    );
    let rect = Rectangle {
        lo: Point {
            latitude: 0,
            longitude: 0,
        },
        hi: Point {
            latitude: 10,
            longitude: 10,
        },
    };
    let mut stream = channel
        .server_streaming::<_, Rectangle, Feature>(
            &method,
            Context::background(),
            &JsonCodec,
            &rect,
        )
        .await
        .expect("call failed");

    let first = stream.next().await.unwrap().expect("missing first feature");
    assert_eq!(first.name, "one");
    assert_eq!(first.location, rect.lo);
    let second = stream.next().await.unwrap().expect("missing second feature");
    assert_eq!(second.name, "two");
    assert!(stream.next().await.unwrap().is_none());
    assert_eq!(stream.finish().await.code(), Code::Ok);
    channel.stop("test done");
}

#[tokio::test]
async fn test_client_streaming_counts_points() {
    let (addr, _handle) = start_route_guide().await;
    let channel = connect("stream-record", addr).await;

    let method = MethodDescriptor::new(
        "/routeguide.RouteGuide/RecordRoute",
        RpcShape::ClientStreaming,
    );
    let call = channel
        .client_streaming::<_, Point, RouteSummary>(&method, Context::background(), &JsonCodec)
        .await
        .expect("call failed");

    for i in 0..3 {
        call.send(&Point {
            latitude: i,
            longitude: -i,
        })
        .await
        .unwrap();
    }
    let summary = call.finish().await.expect("finish failed");
    assert_eq!(summary.point_count, 3);
    channel.stop("test done");
}

#[tokio::test]
async fn test_bidi_chat_replays_prior_notes() {
    let (addr, _handle) = start_route_guide().await;
    let channel = connect("stream-chat", addr).await;

    let method =
        MethodDescriptor::new("/routeguide.RouteGuide/RouteChat", RpcShape::BidiStreaming);
    let (sink, mut stream) = channel
        .bidi_streaming::<_, RouteNote, RouteNote>(&method, Context::background(), &JsonCodec)
        .await
        .expect("call failed");

    let here = Point {
        latitude: 1,
        longitude: 1,
    };
    let there = Point {
        latitude: 2,
        longitude: 2,
    };
    // Locations A, B, A: the third note is answered with the first.
    sink.send(&RouteNote {
        location: here,
        message: "first".into(),
    })
    .await
    .unwrap();
    sink.send(&RouteNote {
        location: there,
        message: "second".into(),
    })
    .await
    .unwrap();
    sink.send(&RouteNote {
        location: here,
        message: "third".into(),
    })
    .await
    .unwrap();
    sink.half_close().await.unwrap();

    let mut replies = Vec::new();
    while let Some(note) = stream.next().await.unwrap() {
        replies.push(note);
    }
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].message, "first");
    assert_eq!(replies[0].location, here);
    assert_eq!(stream.finish().await.code(), Code::Ok);
    channel.stop("test done");
}

#[tokio::test]
async fn test_server_streaming_rejects_second_request() {
    // Drive the wire by hand: a server-streaming method fed two request
    // messages must fail with INVALID_ARGUMENT before the handler runs.
    let (addr, _handle) = start_route_guide().await;
    let channel = connect("stream-cardinality", addr).await;

    let method = MethodDescriptor::new(
        "/routeguide.RouteGuide/ListFeatures",
        RpcShape::ServerStreaming,
    );
    let mut call = channel
        .call(&method, Context::background())
        .await
        .expect("call failed");
    let payload = serde_json::to_vec(&Rectangle {
        lo: Point {
            latitude: 0,
            longitude: 0,
        },
        hi: Point {
            latitude: 1,
            longitude: 1,
        },
    })
    .unwrap();
    call.send(&payload).await.unwrap();
    // The server may already be tearing the stream down when the second
    // message lands; the terminal status is what matters.
    let _ = call.send(&payload).await;
    let _ = call.half_close().await;
    let status = call.finish().await;
    assert_eq!(status.code(), Code::InvalidArgument);
    channel.stop("test done");
}

#[tokio::test]
async fn test_trailer_metadata_delivered() {
    let service = ServiceDescriptor::new("trailer.Trailer").server_streaming(
        "One",
        JsonCodec,
        |_ctx, _req: Point, sink: ResponseSink<Feature>| async move {
            let mut trailer = Metadata::new();
            trailer.insert("x-cost", "42").unwrap();
            sink.set_trailer(trailer);
            sink.send(&Feature {
                name: "only".into(),
                location: Point {
                    latitude: 0,
                    longitude: 0,
                },
            })
            .await?;
            Ok(())
        },
    );
    let server = Server::bind(
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_service(service),
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.serve());
    let channel = connect("stream-trailer", addr).await;

    let method = MethodDescriptor::new("/trailer.Trailer/One", RpcShape::ServerStreaming);
    let mut stream = channel
        .server_streaming::<_, Point, Feature>(
            &method,
            Context::background(),
            &JsonCodec,
            &Point {
                latitude: 0,
                longitude: 0,
            },
        )
        .await
        .unwrap();
    while stream.next().await.unwrap().is_some() {}
    assert_eq!(stream.finish().await.code(), Code::Ok);
    let trailers = stream.trailer_metadata().expect("missing trailers");
    assert_eq!(trailers.get("x-cost"), Some("42"));
    channel.stop("test done");
}
