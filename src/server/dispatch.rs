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

//! Per-stream dispatch: path lookup, validation, context construction and
//! handler supervision.

use crate::call::Call;
use crate::codec::Encoding;
use crate::context::Context;
use crate::interceptor::{StreamChain, UnaryChain, UnaryNext};
use crate::metadata::{Metadata, Timeout};
use crate::observability::StatsHandler;
use crate::service::registry::MethodKind;
use crate::service::{Registry, Role, RpcInfo, UnaryMethodHandler};
use crate::status::Status;
use crate::streaming::ServerStream;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// The per-server dispatch state shared by all connections.
pub(crate) struct Dispatcher {
    pub(crate) registry: Registry,
    pub(crate) unary: UnaryChain,
    pub(crate) streaming: StreamChain,
    pub(crate) stats: Arc<dyn StatsHandler>,
    pub(crate) max_recv_message_size: usize,
    pub(crate) preferred_encoding: Encoding,
}

/// Sends a Trailer-Only refusal before any call state exists.
fn refuse(
    mut respond: h2::server::SendResponse<Bytes>,
    http_status: StatusCode,
    status: &Status,
    advertise_encodings: bool,
) {
    let mut response = http::Response::new(());
    *response.status_mut() = http_status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    crate::streaming::write_status_fields(status, headers);
    if advertise_encodings {
        headers.insert(
            HeaderName::from_static("grpc-accept-encoding"),
            HeaderValue::from_static(Encoding::accept_header()),
        );
    }
    let _ = respond.send_response(response, true);
}

/// Adapts the registered unary handler as the tail of the interceptor
/// chain.
struct HandlerTail {
    handler: Arc<dyn UnaryMethodHandler>,
}

#[async_trait]
impl UnaryNext for HandlerTail {
    async fn run(&self, ctx: Context, request: Bytes) -> Result<Bytes, Status> {
        self.handler.call(ctx, request).await
    }
}

impl Dispatcher {
    /// Dispatches one accepted HTTP/2 stream.
    ///
    /// `server_ctx` is the server's supervising context; cancelling it
    /// (hard shutdown) cancels every call derived from it.
    pub(crate) async fn dispatch(
        self: Arc<Self>,
        request: http::Request<h2::RecvStream>,
        respond: h2::server::SendResponse<Bytes>,
        server_ctx: Context,
    ) {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        trace!(path, "dispatching stream");

        let content_type_ok = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/grpc"))
            .unwrap_or(false);
        if !content_type_ok {
            debug!(path, "rejecting request with invalid content-type");
            refuse(
                respond,
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                &Status::unknown("invalid content-type"),
                false,
            );
            return;
        }

        let method = match self.registry.lookup(&path) {
            Some(method) => method.clone(),
            None => {
                debug!(path, "no handler registered for path");
                refuse(
                    respond,
                    StatusCode::OK,
                    &Status::unimplemented(format!("unknown method {}", path)),
                    false,
                );
                return;
            }
        };

        let recv_encoding = match parts.headers.get("grpc-encoding") {
            None => Encoding::Identity,
            Some(value) => {
                match value.to_str().ok().and_then(Encoding::from_name) {
                    Some(encoding) => encoding,
                    None => {
                        // Unsupported request encoding: refuse and tell the
                        // peer what we do support.
                        refuse(
                            respond,
                            StatusCode::OK,
                            &Status::unimplemented("unsupported grpc-encoding"),
                            true,
                        );
                        return;
                    }
                }
            }
        };
        let send_encoding = Encoding::negotiate(
            parts
                .headers
                .get("grpc-accept-encoding")
                .and_then(|v| v.to_str().ok()),
            self.preferred_encoding,
        );

        let deadline = parts
            .headers
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
            .and_then(Timeout::parse)
            .map(|timeout| Instant::now() + timeout.as_duration());
        let metadata = Metadata::from_headers(&parts.headers);
        let ctx = server_ctx.call_child(metadata, deadline);

        let info = RpcInfo::new(method.descriptor(), Role::Server);
        let call = Call::new(info.clone(), send_encoding, recv_encoding);
        let stream = ServerStream::new(
            body,
            respond,
            call.clone(),
            ctx.clone(),
            self.streaming.clone(),
            Arc::clone(&self.stats),
            self.max_recv_message_size,
        );
        let writer = stream.writer();
        self.stats.call_begin(&info);

        // The handler runs in its own task so a panic is isolated and
        // surfaced as a redacted UNKNOWN rather than tearing down the
        // connection.
        let kind = method.kind().clone();
        let unary_chain = self.unary.clone();
        let stream_chain = self.streaming.clone();
        let handler_ctx = ctx.clone();
        let handler_info = info.clone();
        let mut handler = tokio::spawn(async move {
            match kind {
                MethodKind::Unary(handler) => {
                    run_unary(unary_chain, handler, handler_info, handler_ctx, stream).await
                }
                MethodKind::Streaming(handler) => {
                    stream_chain
                        .on_stream(&handler_info, &handler_ctx)
                        .await?;
                    handler.handle(handler_ctx, stream).await
                }
            }
        });

        tokio::select! {
            joined = &mut handler => match joined {
                Ok(Ok(())) => {
                    let _ = writer.end(Status::ok()).await;
                }
                Ok(Err(status)) => {
                    let _ = writer.end(status).await;
                }
                Err(join_error) => {
                    let status = if join_error.is_panic() {
                        Status::unknown("handler aborted")
                    } else {
                        Status::cancelled("handler cancelled")
                    };
                    writer.abort(status).await;
                }
            },
            _ = ctx.cancelled() => {
                let status = if ctx.deadline_expired() {
                    Status::deadline_exceeded("deadline exceeded")
                } else if server_ctx.is_cancelled() {
                    Status::unavailable("server shutting down")
                } else {
                    Status::cancelled("call cancelled")
                };
                debug!(path, status = %status.code(), "cancelling call");
                writer.abort(status).await;
                handler.abort();
            }
        }
    }
}

/// Runs a unary exchange: exactly one request in, the interceptor chain
/// around the handler, exactly one response out.
async fn run_unary(
    chain: UnaryChain,
    handler: Arc<dyn UnaryMethodHandler>,
    info: RpcInfo,
    ctx: Context,
    stream: ServerStream,
) -> Result<(), Status> {
    let (mut reader, writer) = stream.split();
    let request = reader
        .recv()
        .await?
        .ok_or_else(|| Status::invalid_argument("missing request message"))?;
    if reader.recv().await?.is_some() {
        return Err(Status::invalid_argument(
            "unary call received more than one request",
        ));
    }
    let tail = HandlerTail { handler };
    let response = chain.run(ctx, request, &info, &tail).await?;
    writer.send(&response).await
}
