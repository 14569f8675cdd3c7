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

//! Typed call surfaces returned by the channel helpers.

use crate::metadata::Metadata;
use crate::status::Status;
use crate::streaming::{ClientCall, ClientReader, ClientWriter};
use bytes::Bytes;
use std::sync::Arc;

/// The typed request half of a streaming client call.
pub struct CallSink<Req> {
    writer: ClientWriter,
    encode: Arc<dyn Fn(&Req) -> Result<Bytes, Status> + Send + Sync>,
}

impl<Req> CallSink<Req> {
    /// Encodes and sends one request message.
    pub async fn send(&self, message: &Req) -> Result<(), Status> {
        let bytes = (self.encode)(message)?;
        self.writer.send(&bytes).await
    }

    /// Signals end-of-requests (local half-close).
    pub async fn half_close(&self) -> Result<(), Status> {
        self.writer.half_close().await
    }
}

/// The typed response half of a streaming client call.
pub struct CallStream<Resp> {
    reader: ClientReader,
    decode: Arc<dyn Fn(&[u8]) -> Result<Resp, Status> + Send + Sync>,
}

impl<Resp> CallStream<Resp> {
    /// Receives and decodes the next response, or `None` at
    /// end-of-stream.
    pub async fn next(&mut self) -> Result<Option<Resp>, Status> {
        match self.reader.recv().await? {
            Some(bytes) => (self.decode)(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Drains the stream and returns the terminal status.
    pub async fn finish(&mut self) -> Status {
        self.reader.finish().await
    }

    /// The initial metadata from the server, once headers arrived.
    pub fn initial_metadata(&self) -> Option<&Metadata> {
        self.reader.initial_metadata()
    }

    /// The trailer metadata, once the call terminated.
    pub fn trailer_metadata(&self) -> Option<&Metadata> {
        self.reader.trailer_metadata()
    }
}

/// A client-streaming call: many requests, then exactly one response.
pub struct ClientStreamingCall<Req, Resp> {
    sink: CallSink<Req>,
    stream: CallStream<Resp>,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp> {
    /// Encodes and sends one request message.
    pub async fn send(&self, message: &Req) -> Result<(), Status> {
        self.sink.send(message).await
    }

    /// Half-closes and awaits the single response and OK status.
    pub async fn finish(mut self) -> Result<Resp, Status> {
        self.sink.half_close().await?;
        let response = self.stream.next().await?;
        let status = self.stream.finish().await;
        if !status.is_ok() {
            return Err(status);
        }
        response.ok_or_else(|| Status::internal("server closed call without a response"))
    }
}

/// Splits a raw call into typed halves.
pub(crate) fn typed_split<Req, Resp>(
    call: ClientCall,
    encode: Arc<dyn Fn(&Req) -> Result<Bytes, Status> + Send + Sync>,
    decode: Arc<dyn Fn(&[u8]) -> Result<Resp, Status> + Send + Sync>,
) -> (CallSink<Req>, CallStream<Resp>) {
    let (writer, reader) = call.split();
    (
        CallSink { writer, encode },
        CallStream { reader, decode },
    )
}

/// Pairs typed halves into a client-streaming call.
pub(crate) fn client_streaming_call<Req, Resp>(
    sink: CallSink<Req>,
    stream: CallStream<Resp>,
) -> ClientStreamingCall<Req, Resp> {
    ClientStreamingCall { sink, stream }
}
