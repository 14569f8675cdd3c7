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

//! The client-side call handle.

use super::{cancellation_status, send_data_frames, status_from_headers};
use crate::call::{Call, SendDisposition};
use crate::codec::compression::{compress, decompress};
use crate::codec::Encoding;
use crate::context::Context;
use crate::framing::{encode_frame, FrameDecoder};
use crate::interceptor::StreamChain;
use crate::metadata::Metadata;
use crate::observability::StatsHandler;
use crate::status::{Code, Status};
use bytes::Bytes;
use http::StatusCode;
use std::future::poll_fn;
use std::sync::Arc;

/// Maps an unexpected HTTP response status onto the gRPC code set.
fn http_status_to_grpc(status: StatusCode) -> Status {
    let code = match status.as_u16() {
        400 => Code::Internal,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::Unimplemented,
        429 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    };
    Status::new(code, format!("unexpected http status {}", status))
}

/// The call handle returned to client callers.
///
/// Supports the four shapes: send zero or more requests, half-close, then
/// receive zero or more responses and the terminal status. Use
/// [`ClientCall::split`] for concurrent send and receive.
pub struct ClientCall {
    reader: ClientReader,
    writer: ClientWriter,
}

impl ClientCall {
    pub(crate) fn new(
        response: h2::client::ResponseFuture,
        stream: h2::SendStream<Bytes>,
        call: Call,
        ctx: Context,
        interceptors: StreamChain,
        stats: Arc<dyn StatsHandler>,
        max_message_size: usize,
    ) -> Self {
        let writer = ClientWriter {
            inner: Arc::new(tokio::sync::Mutex::new(stream)),
            call: call.clone(),
            ctx: ctx.clone(),
            interceptors: interceptors.clone(),
            stats: Arc::clone(&stats),
        };
        let reader = ClientReader {
            state: ReadState::Await(response),
            decoder: FrameDecoder::new(max_message_size),
            encoding: Encoding::Identity,
            max_message_size,
            call,
            ctx,
            interceptors,
            stats,
            initial_metadata: None,
            trailer_metadata: None,
            status: None,
            writer: None,
            _lease: None,
        };
        let mut this = Self { reader, writer };
        this.reader.writer = Some(this.writer.clone());
        this
    }

    /// Sends one encoded request message.
    pub async fn send(&self, message: &[u8]) -> Result<(), Status> {
        self.writer.send(message).await
    }

    /// Half-closes the request direction (local end-of-stream).
    pub async fn half_close(&self) -> Result<(), Status> {
        self.writer.half_close().await
    }

    /// Receives the next response message, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        self.reader.recv().await
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

    /// Splits into independently owned send and receive halves.
    pub fn split(self) -> (ClientWriter, ClientReader) {
        (self.writer, self.reader)
    }

    /// Attaches an opaque guard living as long as the receive half.
    ///
    /// Used by the channel to keep a `claim` lease held for the duration
    /// of the call.
    pub(crate) fn hold_lease(&mut self, lease: Box<dyn std::any::Any + Send + Sync>) {
        self.reader._lease = Some(lease);
    }
}

/// The cloneable send half of a client call.
#[derive(Clone)]
pub struct ClientWriter {
    inner: Arc<tokio::sync::Mutex<h2::SendStream<Bytes>>>,
    call: Call,
    ctx: Context,
    interceptors: StreamChain,
    stats: Arc<dyn StatsHandler>,
}

impl ClientWriter {
    /// Sends one encoded request message as a framed DATA sequence.
    pub async fn send(&self, message: &[u8]) -> Result<(), Status> {
        self.interceptors.on_send(self.call.info(), message).await?;
        let (payload, compressed) = compress(self.call.send_encoding(), message).await?;
        let frame = encode_frame(&payload, compressed);
        let ctx = self.ctx.clone();
        let write = async {
            let mut stream = self.inner.lock().await;
            match self.call.begin_message()? {
                SendDisposition::Dropped => return Ok(()),
                SendDisposition::Proceed => {}
            }
            send_data_frames(&mut stream, frame, false).await
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

    /// Half-closes the request direction.
    pub async fn half_close(&self) -> Result<(), Status> {
        match self.call.half_close_local()? {
            SendDisposition::Dropped => Ok(()),
            SendDisposition::Proceed => {
                let mut stream = self.inner.lock().await;
                stream
                    .send_data(Bytes::new(), true)
                    .map_err(|e| Status::from_h2(&e))
            }
        }
    }

    /// Resets the stream with `CANCEL`, used on local cancellation.
    pub(crate) async fn reset(&self) {
        let mut stream = self.inner.lock().await;
        stream.send_reset(h2::Reason::CANCEL);
    }
}

enum ReadState {
    /// Response HEADERS not yet received.
    Await(h2::client::ResponseFuture),
    /// Reading response DATA frames.
    Body(h2::RecvStream),
    /// Terminal. A pending error is surfaced by the next `recv`.
    Done { pending_error: Option<Status> },
}

/// The receive half of a client call.
pub struct ClientReader {
    state: ReadState,
    decoder: FrameDecoder,
    encoding: Encoding,
    max_message_size: usize,
    call: Call,
    ctx: Context,
    interceptors: StreamChain,
    stats: Arc<dyn StatsHandler>,
    initial_metadata: Option<Metadata>,
    trailer_metadata: Option<Metadata>,
    status: Option<Status>,
    /// Used to reset the stream when the context cancels a pending read.
    writer: Option<ClientWriter>,
    /// Opaque guard released when the call's receive half drops.
    _lease: Option<Box<dyn std::any::Any + Send + Sync>>,
}

impl ClientReader {
    /// The initial metadata from the server, once headers arrived.
    pub fn initial_metadata(&self) -> Option<&Metadata> {
        self.initial_metadata.as_ref()
    }

    /// The trailer metadata, once the call terminated.
    pub fn trailer_metadata(&self) -> Option<&Metadata> {
        self.trailer_metadata.as_ref()
    }

    /// The terminal status, once known.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    fn fail(&mut self, status: Status) -> Status {
        self.call.cancel(status.clone());
        self.status = Some(status.clone());
        self.state = ReadState::Done {
            pending_error: None,
        };
        self.stats
            .call_end(self.call.info(), &status, self.call.elapsed());
        status
    }

    fn complete(&mut self, status: Status) {
        self.call.close(status.clone());
        self.status = Some(status.clone());
        self.state = ReadState::Done {
            pending_error: None,
        };
        self.stats
            .call_end(self.call.info(), &status, self.call.elapsed());
    }

    async fn cancelled_locally(&mut self) -> Status {
        let status = cancellation_status(&self.ctx);
        if let Some(writer) = &self.writer {
            writer.reset().await;
        }
        self.fail(status)
    }

    /// Receives the next response message.
    ///
    /// Returns `Ok(None)` once the server closed the stream; the terminal
    /// status is then available via [`ClientReader::finish`] or
    /// [`ClientReader::status`].
    pub async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        loop {
            match &mut self.state {
                ReadState::Done { pending_error } => {
                    return match pending_error.take() {
                        Some(status) => Err(status),
                        None => Ok(None),
                    };
                }
                ReadState::Await(response) => {
                    let ctx = self.ctx.clone();
                    let outcome = tokio::select! {
                        outcome = &mut *response => Some(outcome),
                        _ = ctx.cancelled() => None,
                    };
                    let response = match outcome {
                        Some(Ok(response)) => response,
                        Some(Err(error)) => return Err(self.fail(Status::from_h2(&error))),
                        None => return Err(self.cancelled_locally().await),
                    };
                    let (parts, body) = response.into_parts();
                    if parts.status != StatusCode::OK {
                        let status = http_status_to_grpc(parts.status);
                        self.trailer_metadata = Some(Metadata::from_headers(&parts.headers));
                        self.complete(status);
                        continue;
                    }
                    if let Some(status) = status_from_headers(&parts.headers) {
                        // Trailer-Only response.
                        self.trailer_metadata = Some(Metadata::from_headers(&parts.headers));
                        self.complete(status);
                        continue;
                    }
                    match parts
                        .headers
                        .get("grpc-encoding")
                        .map(|v| v.to_str().unwrap_or(""))
                    {
                        None => self.encoding = Encoding::Identity,
                        Some(name) => match Encoding::from_name(name) {
                            Some(encoding) => self.encoding = encoding,
                            None => {
                                let status = Status::internal(format!(
                                    "server replied with unsupported encoding {:?}",
                                    name
                                ));
                                return Err(self.fail(status));
                            }
                        },
                    }
                    self.initial_metadata = Some(Metadata::from_headers(&parts.headers));
                    self.state = ReadState::Body(body);
                }
                ReadState::Body(body) => {
                    match self.decoder.next_frame() {
                        Ok(Some(frame)) => {
                            let message =
                                match decompress(self.encoding, frame, self.max_message_size).await
                                {
                                    Ok(message) => message,
                                    Err(status) => return Err(self.fail(status)),
                                };
                            if let Err(status) =
                                self.interceptors.on_recv(self.call.info(), &message).await
                            {
                                return Err(self.fail(status));
                            }
                            self.stats.inbound_message(self.call.info(), message.len());
                            return Ok(Some(message));
                        }
                        Ok(None) => {}
                        Err(status) => return Err(self.fail(status)),
                    }
                    let ctx = self.ctx.clone();
                    let step = tokio::select! {
                        data = poll_fn(|cx| body.poll_data(cx)) => Some(data),
                        _ = ctx.cancelled() => None,
                    };
                    match step {
                        Some(Some(Ok(chunk))) => {
                            let _ = body.flow_control().release_capacity(chunk.len());
                            self.decoder.feed(&chunk);
                        }
                        Some(Some(Err(error))) => {
                            let status = Status::from_h2(&error);
                            return Err(self.fail(status));
                        }
                        Some(None) => {
                            if self.decoder.has_partial_frame() {
                                let status = self.decoder.truncation_error();
                                return Err(self.fail(status));
                            }
                            let trailers = poll_fn(|cx| body.poll_trailers(cx)).await;
                            match trailers {
                                Ok(Some(trailers)) => {
                                    let status =
                                        status_from_headers(&trailers).unwrap_or_else(|| {
                                            Status::internal("trailers missing grpc-status")
                                        });
                                    self.trailer_metadata =
                                        Some(Metadata::from_headers(&trailers));
                                    self.complete(status);
                                }
                                Ok(None) => {
                                    let status =
                                        Status::internal("stream ended without grpc-status");
                                    return Err(self.fail(status));
                                }
                                Err(error) => {
                                    let status = Status::from_h2(&error);
                                    return Err(self.fail(status));
                                }
                            }
                        }
                        None => return Err(self.cancelled_locally().await),
                    }
                }
            }
        }
    }

    /// Drains remaining messages and returns the terminal status.
    pub async fn finish(&mut self) -> Status {
        loop {
            match self.recv().await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return self
                        .status
                        .clone()
                        .unwrap_or_else(|| Status::internal("call terminated without a status"));
                }
                Err(status) => return status,
            }
        }
    }
}
