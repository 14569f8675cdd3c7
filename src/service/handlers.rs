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

//! Typed handler adapters.
//!
//! Generated service code registers plain async functions; the adapters
//! here wrap them with the method's codec and enforce the cardinality of
//! each RPC shape. A shape violation (for example a second request on a
//! server-streaming method) fails the call with `INVALID_ARGUMENT`
//! without invoking the handler.

use crate::codec::Codec;
use crate::context::Context;
use crate::metadata::Metadata;
use crate::status::Status;
use crate::streaming::{ServerReader, ServerStream, ServerWriter};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// The byte-level entrypoint of a unary method, as seen by the unary
/// interceptor chain.
#[async_trait]
pub trait UnaryMethodHandler: Send + Sync {
    /// Handles one decoded-request/encoded-response exchange.
    async fn call(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status>;
}

/// The entrypoint of a streaming method.
///
/// The dispatcher ends the call after `handle` returns: `Ok(())` closes
/// with `OK` (unless the handler already ended the stream), `Err(status)`
/// closes with that status.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Handles one stream.
    async fn handle(&self, ctx: Context, stream: ServerStream) -> Result<(), Status>;
}

/// A typed stream of inbound request messages.
pub struct RequestStream<Req> {
    reader: ServerReader,
    decode: Arc<dyn Fn(&[u8]) -> Result<Req, Status> + Send + Sync>,
}

impl<Req> RequestStream<Req> {
    /// Receives and decodes the next request, or `None` at end-of-stream.
    pub async fn next(&mut self) -> Result<Option<Req>, Status> {
        match self.reader.recv().await? {
            Some(bytes) => (self.decode)(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

/// A typed sink for outbound response messages.
///
/// Cloneable; clones share the underlying stream.
pub struct ResponseSink<Resp> {
    writer: ServerWriter,
    encode: Arc<dyn Fn(&Resp) -> Result<Bytes, Status> + Send + Sync>,
}

impl<Resp> Clone for ResponseSink<Resp> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            encode: Arc::clone(&self.encode),
        }
    }
}

impl<Resp> ResponseSink<Resp> {
    /// Encodes and sends one response message.
    pub async fn send(&self, message: &Resp) -> Result<(), Status> {
        let bytes = (self.encode)(message)?;
        self.writer.send(&bytes).await
    }

    /// Sends the initial metadata explicitly.
    pub async fn send_headers(&self, metadata: Metadata) -> Result<(), Status> {
        self.writer.send_headers(metadata).await
    }

    /// Buffers trailer metadata for the terminal status.
    pub fn set_trailer(&self, metadata: Metadata) {
        self.writer.set_trailer(metadata);
    }
}

/// Adapter for unary methods.
pub struct UnaryMethod<C, Req, Resp, F> {
    codec: C,
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<C, Req, Resp, F> UnaryMethod<C, Req, Resp, F> {
    /// Wraps a unary handler function with its codec.
    pub fn new(codec: C, handler: F) -> Self {
        Self {
            codec,
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, Req, Resp, F, Fut> UnaryMethodHandler for UnaryMethod<C, Req, Resp, F>
where
    C: Codec<Req> + Codec<Resp> + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Context, Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, Status>> + Send,
{
    async fn call(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status> {
        let request = <C as Codec<Req>>::decode(&self.codec, &request)?;
        let response = (self.handler)(ctx, request).await?;
        <C as Codec<Resp>>::encode(&self.codec, &response)
    }
}

/// Adapter for server-streaming methods: exactly one request, then the
/// handler drives a typed response sink.
pub struct ServerStreamingMethod<C, Req, Resp, F> {
    codec: C,
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<C, Req, Resp, F> ServerStreamingMethod<C, Req, Resp, F> {
    /// Wraps a server-streaming handler function with its codec.
    pub fn new(codec: C, handler: F) -> Self {
        Self {
            codec,
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, Req, Resp, F, Fut> MethodHandler for ServerStreamingMethod<C, Req, Resp, F>
where
    C: Codec<Req> + Codec<Resp> + Clone + 'static,
    Req: Send + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Context, Req, ResponseSink<Resp>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Status>> + Send,
{
    async fn handle(&self, ctx: Context, stream: ServerStream) -> Result<(), Status> {
        let (mut reader, writer) = stream.split();
        let first = reader
            .recv()
            .await?
            .ok_or_else(|| Status::invalid_argument("missing request message"))?;
        let request = <C as Codec<Req>>::decode(&self.codec, &first)?;
        if reader.recv().await?.is_some() {
            return Err(Status::invalid_argument(
                "server-streaming call received more than one request",
            ));
        }
        let codec = self.codec.clone();
        let sink = ResponseSink {
            writer,
            encode: Arc::new(move |message| <C as Codec<Resp>>::encode(&codec, message)),
        };
        (self.handler)(ctx, request, sink).await
    }
}

/// Adapter for client-streaming methods: the handler consumes a typed
/// request stream and returns the single response.
pub struct ClientStreamingMethod<C, Req, Resp, F> {
    codec: C,
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<C, Req, Resp, F> ClientStreamingMethod<C, Req, Resp, F> {
    /// Wraps a client-streaming handler function with its codec.
    pub fn new(codec: C, handler: F) -> Self {
        Self {
            codec,
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, Req, Resp, F, Fut> MethodHandler for ClientStreamingMethod<C, Req, Resp, F>
where
    C: Codec<Req> + Codec<Resp> + Clone + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Context, RequestStream<Req>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, Status>> + Send,
{
    async fn handle(&self, ctx: Context, stream: ServerStream) -> Result<(), Status> {
        let (reader, writer) = stream.split();
        let codec = self.codec.clone();
        let requests = RequestStream {
            reader,
            decode: Arc::new(move |bytes| <C as Codec<Req>>::decode(&codec, bytes)),
        };
        let response = (self.handler)(ctx, requests).await?;
        let bytes = <C as Codec<Resp>>::encode(&self.codec, &response)?;
        writer.send(&bytes).await
    }
}

/// Adapter for bidirectional-streaming methods: the handler owns both
/// typed halves and interleaves freely.
pub struct BidiStreamingMethod<C, Req, Resp, F> {
    codec: C,
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<C, Req, Resp, F> BidiStreamingMethod<C, Req, Resp, F> {
    /// Wraps a bidi-streaming handler function with its codec.
    pub fn new(codec: C, handler: F) -> Self {
        Self {
            codec,
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, Req, Resp, F, Fut> MethodHandler for BidiStreamingMethod<C, Req, Resp, F>
where
    C: Codec<Req> + Codec<Resp> + Clone + 'static,
    Req: Send + 'static,
    Resp: Send + Sync + 'static,
    F: Fn(Context, RequestStream<Req>, ResponseSink<Resp>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Status>> + Send,
{
    async fn handle(&self, ctx: Context, stream: ServerStream) -> Result<(), Status> {
        let (reader, writer) = stream.split();
        let decode_codec = self.codec.clone();
        let encode_codec = self.codec.clone();
        let requests = RequestStream {
            reader,
            decode: Arc::new(move |bytes| <C as Codec<Req>>::decode(&decode_codec, bytes)),
        };
        let responses = ResponseSink {
            writer,
            encode: Arc::new(move |message| <C as Codec<Resp>>::encode(&encode_codec, message)),
        };
        (self.handler)(ctx, requests, responses).await
    }
}
