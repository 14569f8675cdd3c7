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

//! Stream handles: the per-call objects for sending and receiving framed
//! messages.
//!
//! On the server a [`ServerStream`] is passed to the handler; on the
//! client a [`ClientCall`] is returned to the caller. Both are safe for
//! concurrent send and receive (the send side is a cloneable handle
//! serializing writers), but two concurrent sends race for the same
//! stream and are serialized, not interleaved.
//!
//! Sends suspend on HTTP/2 flow-control credit; receives suspend pending
//! the next frame. Both fail with `CANCELLED` or `DEADLINE_EXCEEDED` when
//! the call context is cancelled, depending on cause.

mod client;
mod server;

pub use client::{ClientCall, ClientReader, ClientWriter};
pub use server::{ServerReader, ServerStream, ServerWriter};

use crate::metadata::Metadata;
use crate::status::{percent_decode_message, percent_encode_message, Code, Status};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::future::poll_fn;

/// Writes one whole payload as DATA frames, honoring flow control.
///
/// Suspends whenever the connection or stream window is exhausted; h2
/// replenishes capacity as the peer releases it. Whole frames are always
/// flushed; a closed stream surfaces as `UNAVAILABLE`.
pub(crate) async fn send_data_frames(
    stream: &mut h2::SendStream<Bytes>,
    mut data: Bytes,
    end_of_stream: bool,
) -> Result<(), Status> {
    if data.is_empty() {
        return stream
            .send_data(data, end_of_stream)
            .map_err(|e| Status::from_h2(&e));
    }
    while !data.is_empty() {
        stream.reserve_capacity(data.len());
        let granted = match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(Ok(n)) => n,
            Some(Err(e)) => return Err(Status::from_h2(&e)),
            None => {
                return Err(Status::unavailable(
                    "stream closed while waiting for send capacity",
                ))
            }
        };
        if granted == 0 {
            continue;
        }
        let chunk = data.split_to(granted.min(data.len()));
        let last = end_of_stream && data.is_empty();
        stream
            .send_data(chunk, last)
            .map_err(|e| Status::from_h2(&e))?;
    }
    Ok(())
}

/// Builds the trailer header block for a terminal status.
pub(crate) fn status_trailers(status: &Status, trailer_metadata: &Metadata) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    write_status_fields(status, &mut trailers);
    trailer_metadata.append_to_headers(&mut trailers);
    trailers
}

/// Writes `grpc-status`, `grpc-message` and `grpc-status-details-bin`.
pub(crate) fn write_status_fields(status: &Status, headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("grpc-status"),
        HeaderValue::from(status.code().as_u32()),
    );
    if let Some(message) = status.message() {
        if let Ok(value) = HeaderValue::from_str(&percent_encode_message(message)) {
            headers.insert(HeaderName::from_static("grpc-message"), value);
        }
    }
    if let Some(details) = status.details() {
        if let Ok(value) = HeaderValue::from_str(&STANDARD_NO_PAD.encode(details)) {
            headers.insert(HeaderName::from_static("grpc-status-details-bin"), value);
        }
    }
}

/// Parses a terminal status out of a trailer (or Trailer-Only header)
/// block. Returns `None` if no `grpc-status` field is present.
pub(crate) fn status_from_headers(headers: &HeaderMap) -> Option<Status> {
    let code = headers
        .get("grpc-status")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()?;
    let code = Code::from_u32(code);
    let message = headers
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .map(percent_decode_message);
    let mut status = match message {
        Some(message) => Status::new(code, message),
        None => Status::from_code(code),
    };
    if let Some(details) = headers
        .get("grpc-status-details-bin")
        .and_then(|v| v.to_str().ok())
    {
        let decoded = STANDARD_NO_PAD
            .decode(details.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(details));
        if let Ok(bytes) = decoded {
            status = status.with_details(Bytes::from(bytes));
        }
    }
    Some(status)
}

/// Chooses the terminal status for a call whose context fired.
pub(crate) fn cancellation_status(ctx: &crate::context::Context) -> Status {
    if ctx.deadline_expired() {
        Status::deadline_exceeded("deadline exceeded")
    } else {
        Status::cancelled("context cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_trailers_round_trip() {
        let mut trailer_metadata = Metadata::new();
        trailer_metadata.insert("x-extra", "value").unwrap();
        let status =
            Status::new(Code::FailedPrecondition, "try again: 100%").with_details(Bytes::from_static(b"detail"));

        let trailers = status_trailers(&status, &trailer_metadata);
        assert_eq!(trailers.get("grpc-status").unwrap(), "9");
        assert_eq!(trailers.get("x-extra").unwrap(), "value");

        let parsed = status_from_headers(&trailers).unwrap();
        assert_eq!(parsed.code(), Code::FailedPrecondition);
        assert_eq!(parsed.message(), Some("try again: 100%"));
        assert_eq!(parsed.details().unwrap().as_ref(), b"detail");
    }

    #[test]
    fn test_status_from_headers_missing() {
        assert!(status_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_ok_status_has_no_message_field() {
        let trailers = status_trailers(&Status::ok(), &Metadata::new());
        assert_eq!(trailers.get("grpc-status").unwrap(), "0");
        assert!(trailers.get("grpc-message").is_none());
    }
}
