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

//! Message compression encodings and negotiation.
//!
//! A stream negotiates one encoding per direction: the client declares its
//! message encoding in `grpc-encoding` and the encodings it accepts in
//! `grpc-accept-encoding`; the server replies with any encoding it supports
//! that the client accepts, or identity. Two encodings are built in:
//! `identity` and `gzip`.

use crate::framing::Frame;
use crate::status::Status;
use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A message compression encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No compression.
    #[default]
    Identity,
    /// Gzip compression (RFC 1952).
    Gzip,
}

impl Encoding {
    /// The wire name of this encoding.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
        }
    }

    /// Looks up an encoding by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "identity" => Some(Encoding::Identity),
            "gzip" => Some(Encoding::Gzip),
            _ => None,
        }
    }

    /// The `grpc-accept-encoding` value advertising every supported
    /// encoding.
    pub fn accept_header() -> &'static str {
        "identity,gzip"
    }

    /// Picks the reply encoding given the peer's `grpc-accept-encoding`.
    ///
    /// Returns `preferred` if the peer accepts it, identity otherwise.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use h2rpc::codec::Encoding;
    ///
    /// assert_eq!(Encoding::negotiate(Some("gzip, br"), Encoding::Gzip), Encoding::Gzip);
    /// assert_eq!(Encoding::negotiate(Some("br"), Encoding::Gzip), Encoding::Identity);
    /// assert_eq!(Encoding::negotiate(None, Encoding::Gzip), Encoding::Identity);
    /// ```
    pub fn negotiate(accept: Option<&str>, preferred: Encoding) -> Encoding {
        if preferred == Encoding::Identity {
            return Encoding::Identity;
        }
        let accepted = accept
            .map(|csv| {
                csv.split(',')
                    .any(|name| Encoding::from_name(name) == Some(preferred))
            })
            .unwrap_or(false);
        if accepted {
            preferred
        } else {
            Encoding::Identity
        }
    }
}

/// Compresses an encoded message payload.
///
/// Returns the payload to frame plus the compressed flag to set on it.
pub async fn compress(encoding: Encoding, payload: &[u8]) -> Result<(Bytes, bool), Status> {
    match encoding {
        Encoding::Identity => Ok((Bytes::copy_from_slice(payload), false)),
        Encoding::Gzip => {
            let mut encoder = GzipEncoder::new(Vec::with_capacity(payload.len() / 2 + 16));
            encoder
                .write_all(payload)
                .await
                .map_err(|e| Status::internal(format!("gzip compression failed: {}", e)))?;
            encoder
                .shutdown()
                .await
                .map_err(|e| Status::internal(format!("gzip compression failed: {}", e)))?;
            Ok((Bytes::from(encoder.into_inner()), true))
        }
    }
}

/// Decompresses a received frame per the stream encoding.
///
/// A decompression failure, or a decompressed payload exceeding
/// `max_message_size`, fails the stream with `RESOURCE_EXHAUSTED`. A frame
/// flagged compressed on a stream negotiated to identity is a protocol
/// violation reported as `INTERNAL`.
pub async fn decompress(
    encoding: Encoding,
    frame: Frame,
    max_message_size: usize,
) -> Result<Bytes, Status> {
    if !frame.compressed {
        return Ok(frame.payload);
    }
    match encoding {
        Encoding::Identity => Err(Status::internal(
            "received compressed frame on identity-encoded stream",
        )),
        Encoding::Gzip => {
            let mut decoder = GzipDecoder::new(&frame.payload[..]);
            let mut out = Vec::new();
            let mut limited = (&mut decoder).take(max_message_size as u64 + 1);
            limited
                .read_to_end(&mut out)
                .await
                .map_err(|e| Status::resource_exhausted(format!("failed to decompress: {}", e)))?;
            if out.len() > max_message_size {
                return Err(Status::resource_exhausted(format!(
                    "decompressed message exceeds limit of {} bytes",
                    max_message_size
                )));
            }
            Ok(Bytes::from(out))
        }
    }
}
