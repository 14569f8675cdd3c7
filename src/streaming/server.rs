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

//! The server-side stream handle.

use super::{cancellation_status, send_data_frames, status_trailers};
use crate::call::{Call, SendDisposition};
use crate::codec::compression::{compress, decompress};
use crate::codec::Encoding;
use crate::context::Context;
use crate::framing::{encode_frame, FrameDecoder};
use crate::interceptor::StreamChain;
use crate::metadata::Metadata;
use crate::observability::StatsHandler;
use crate::status::Status;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use parking_lot::Mutex;
use std::future::poll_fn;
use std::sync::Arc;
use tracing::debug;

/// The stream handle passed to server handlers.
///
/// Combines the receive half and a cloneable send handle. Handlers that
/// need concurrent send and receive call [`ServerStream::split`].
pub struct ServerStream {
    reader: ServerReader,
    writer: ServerWriter,
}

impl ServerStream {
    pub(crate) fn new(
        body: h2::RecvStream,
        respond: h2::server::SendResponse<Bytes>,
        call: Call,
        ctx: Context,
        interceptors: StreamChain,
        stats: Arc<dyn StatsHandler>,
        max_message_size: usize,
    ) -> Self {
        let writer = ServerWriter {
            inner: Arc::new(tokio::sync::Mutex::new(WriterInner {
                respond,
                stream: None,
            })),
            trailers: Arc::new(Mutex::new(Metadata::new())),
            call: call.clone(),
            ctx: ctx.clone(),
            interceptors: interceptors.clone(),
            stats: Arc::clone(&stats),
        };
        let reader = ServerReader {
            body,
            decoder: FrameDecoder::new(max_message_size),
            encoding: call.recv_encoding(),
            max_message_size,
            call,
            ctx,
            interceptors,
            stats,
            finished: false,
        };
        Self { reader, writer }
    }

    /// Returns a clone of the send handle.
    pub fn writer(&self) -> ServerWriter {
        self.writer.clone()
    }

    /// Splits into independently owned receive and send halves.
    pub fn split(self) -> (ServerReader, ServerWriter) {
        (self.reader, self.writer)
    }

    /// Receives the next message, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        self.reader.recv().await
    }

    /// Sends the initial metadata explicitly.
    pub async fn send_headers(&self, metadata: Metadata) -> Result<(), Status> {
        self.writer.send_headers(metadata).await
    }

    /// Sends one encoded message.
    pub async fn send(&self, message: &[u8]) -> Result<(), Status> {
        self.writer.send(message).await
    }

    /// Buffers trailer metadata for the terminal status.
    pub fn set_trailer(&self, metadata: Metadata) {
        self.writer.set_trailer(metadata);
    }

    /// Ends the call with a terminal status.
    pub async fn end(&self, status: Status) -> Result<(), Status> {
        self.writer.end(status).await
    }
}

/// The receive half of a server stream.
pub struct ServerReader {
    body: h2::RecvStream,
    decoder: FrameDecoder,
    encoding: Encoding,
    max_message_size: usize,
    call: Call,
    ctx: Context,
    interceptors: StreamChain,
    stats: Arc<dyn StatsHandler>,
    finished: bool,
}

impl ServerReader {
    /// Receives the next message.
    ///
    /// Returns `Ok(None)` once the client half-closes. Fails with
    /// `CANCELLED` or `DEADLINE_EXCEEDED` when the call context fires,
    /// and with the mapped transport status when the stream breaks.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        if self.finished {
            return Ok(None);
        }
        if let Some(status) = self.call.terminal_status() {
            if self.call.is_cancelled() {
                return Err(status);
            }
            return Ok(None);
        }
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                let message = decompress(self.encoding, frame, self.max_message_size).await?;
                self.interceptors
                    .on_recv(self.call.info(), &message)
                    .await?;
                self.stats.inbound_message(self.call.info(), message.len());
                return Ok(Some(message));
            }
            let body = &mut self.body;
            let ctx = self.ctx.clone();
            tokio::select! {
                data = poll_fn(|cx| body.poll_data(cx)) => match data {
                    Some(Ok(chunk)) => {
                        let _ = body.flow_control().release_capacity(chunk.len());
                        self.decoder.feed(&chunk);
                    }
                    Some(Err(error)) => {
                        let status = Status::from_h2(&error);
                        self.call.cancel(status.clone());
                        self.finished = true;
                        return Err(status);
                    }
                    None => {
                        self.call.note_remote_half_closed();
                        self.finished = true;
                        if self.decoder.has_partial_frame() {
                            return Err(self.decoder.truncation_error());
                        }
                        return Ok(None);
                    }
                },
                _ = ctx.cancelled() => {
                    return Err(cancellation_status(&self.ctx));
                }
            }
        }
    }
}

struct WriterInner {
    respond: h2::server::SendResponse<Bytes>,
    /// Present once the response HEADERS frame went out.
    stream: Option<h2::SendStream<Bytes>>,
}

/// The cloneable send half of a server stream.
///
/// Clones share one underlying HTTP/2 stream; sends are serialized.
#[derive(Clone)]
pub struct ServerWriter {
    inner: Arc<tokio::sync::Mutex<WriterInner>>,
    trailers: Arc<Mutex<Metadata>>,
    call: Call,
    ctx: Context,
    interceptors: StreamChain,
    stats: Arc<dyn StatsHandler>,
}

impl ServerWriter {
    /// Sends the initial metadata.
    ///
    /// Idempotence is not silent: a second explicit send is a programmer
    /// error reported as `INTERNAL`. If never called, default headers go
    /// out implicitly before the first message frame.
    pub async fn send_headers(&self, metadata: Metadata) -> Result<(), Status> {
        let mut inner = self.inner.lock().await;
        self.write_headers(&mut inner, metadata)
    }

    fn write_headers(&self, inner: &mut WriterInner, metadata: Metadata) -> Result<(), Status> {
        match self.call.begin_headers()? {
            SendDisposition::Dropped => Ok(()),
            SendDisposition::Proceed => {
                let mut response = http::Response::new(());
                *response.status_mut() = StatusCode::OK;
                let headers = response.headers_mut();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
                headers.insert(
                    HeaderName::from_static("grpc-encoding"),
                    HeaderValue::from_static(self.call.send_encoding().name()),
                );
                headers.insert(
                    HeaderName::from_static("grpc-accept-encoding"),
                    HeaderValue::from_static(Encoding::accept_header()),
                );
                metadata.append_to_headers(headers);
                let stream = inner
                    .respond
                    .send_response(response, false)
                    .map_err(|e| Status::from_h2(&e))?;
                inner.stream = Some(stream);
                Ok(())
            }
        }
    }

    /// Sends one encoded message as a framed DATA sequence.
    ///
    /// Suspends on flow control; writes initiated after cancellation are
    /// dropped silently.
    pub async fn send(&self, message: &[u8]) -> Result<(), Status> {
        self.interceptors.on_send(self.call.info(), message).await?;
        let (payload, compressed) = compress(self.call.send_encoding(), message).await?;
        let frame = encode_frame(&payload, compressed);
        let ctx = self.ctx.clone();
        let write = async {
            let mut inner = self.inner.lock().await;
            if inner.stream.is_none() {
                self.write_headers(&mut inner, Metadata::new())?;
            }
            match self.call.begin_message()? {
                SendDisposition::Dropped => return Ok(()),
                SendDisposition::Proceed => {}
            }
            let stream = match inner.stream.as_mut() {
                Some(stream) => stream,
                // Headers were dropped because the call was cancelled.
                None => return Ok(()),
            };
            send_data_frames(stream, frame, false).await
        };
        tokio::select! {
            result = write => {
                if result.is_ok() {
                    self.stats.outbound_message(self.call.info(), message.len());
                }
                result
            }
            _ = ctx.cancelled() => Err(cancellation_status(&self.ctx)),
        }
    }

    /// Buffers trailer metadata, merged into the terminal trailer block.
    pub fn set_trailer(&self, metadata: Metadata) {
        self.trailers.lock().extend(metadata);
    }

    /// Ends the call normally with `status`.
    ///
    /// The first terminal wins: if the call already closed or was
    /// cancelled this is a no-op.
    pub async fn end(&self, status: Status) -> Result<(), Status> {
        match self.call.close(status) {
            Some(status) => self.finish_on_wire(status).await,
            None => Ok(()),
        }
    }

    /// Cancels the call, writing `status` to the peer best-effort.
    pub(crate) async fn abort(&self, status: Status) {
        if let Some(status) = self.call.cancel(status) {
            if self.finish_on_wire(status).await.is_err() {
                let mut inner = self.inner.lock().await;
                match inner.stream.as_mut() {
                    Some(stream) => stream.send_reset(h2::Reason::CANCEL),
                    None => inner.respond.send_reset(h2::Reason::CANCEL),
                }
            }
        }
    }

    async fn finish_on_wire(&self, status: Status) -> Result<(), Status> {
        let duration = self.call.elapsed();
        let trailer_metadata = self.trailers.lock().clone();
        let mut inner = self.inner.lock().await;
        let result = match inner.stream.as_mut() {
            Some(stream) => stream
                .send_trailers(status_trailers(&status, &trailer_metadata))
                .map_err(|e| Status::from_h2(&e)),
            None => {
                // Trailer-Only: headers and trailers combined in a single
                // HEADERS frame with END_STREAM.
                let mut response = http::Response::new(());
                *response.status_mut() = StatusCode::OK;
                let headers = response.headers_mut();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
                super::write_status_fields(&status, headers);
                trailer_metadata.append_to_headers(headers);
                inner
                    .respond
                    .send_response(response, true)
                    .map(|_| ())
                    .map_err(|e| Status::from_h2(&e))
            }
        };
        if let Err(error) = &result {
            debug!(
                path = self.call.info().path(),
                %error,
                "failed to write terminal status"
            );
        }
        self.stats.call_end(self.call.info(), &status, duration);
        result
    }
}
