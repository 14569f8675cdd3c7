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

//! Message coding for request and response payloads.
//!
//! The engine moves opaque byte payloads; a [`Codec`] turns typed messages
//! into those payloads and back. Protobuf coding is supplied by generated
//! code through this trait; two codecs are built in: [`JsonCodec`] for
//! serde-compatible message types and [`BytesCodec`] for raw payloads.
//!
//! Compression of encoded payloads is a separate concern, handled by
//! [`compression`].

pub mod compression;

pub use compression::Encoding;

use crate::status::Status;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes and decodes messages of type `T`.
///
/// A decode failure is an `INTERNAL` error: the peer framed a payload that
/// does not parse as the declared message type.
pub trait Codec<T>: Send + Sync {
    /// Encodes a message to its wire payload.
    fn encode(&self, message: &T) -> Result<Bytes, Status>;

    /// Decodes a message from a wire payload.
    fn decode(&self, buf: &[u8]) -> Result<T, Status>;
}

/// A serde-JSON message codec.
///
/// # Examples
///
/// ```rust
/// use h2rpc::codec::{Codec, JsonCodec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Point {
///     latitude: i32,
///     longitude: i32,
/// }
///
/// let point = Point { latitude: 41, longitude: -74 };
/// let encoded = JsonCodec.encode(&point).unwrap();
/// let decoded: Point = JsonCodec.decode(&encoded).unwrap();
/// assert_eq!(decoded, point);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned + Send,
{
    fn encode(&self, message: &T) -> Result<Bytes, Status> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| Status::internal(format!("failed to encode message: {}", e)))
    }

    fn decode(&self, buf: &[u8]) -> Result<T, Status> {
        serde_json::from_slice(buf)
            .map_err(|e| Status::internal(format!("failed to decode message: {}", e)))
    }
}

/// A pass-through codec for raw byte payloads.
///
/// Useful for handlers that do their own message coding, and for tests
/// exercising the wire path without a message layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Bytes> for BytesCodec {
    fn encode(&self, message: &Bytes) -> Result<Bytes, Status> {
        Ok(message.clone())
    }

    fn decode(&self, buf: &[u8]) -> Result<Bytes, Status> {
        Ok(Bytes::copy_from_slice(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        message: String,
        sequence: u64,
    }

    #[test]
    fn test_json_round_trip() {
        let note = Note {
            message: "hello".to_string(),
            sequence: 7,
        };
        let encoded = JsonCodec.encode(&note).unwrap();
        let decoded: Note = JsonCodec.decode(&encoded).unwrap();
        assert_eq!(decoded, note);
    }

    #[test]
    fn test_json_decode_failure_is_internal() {
        let result: Result<Note, _> = JsonCodec.decode(b"not json");
        assert_eq!(result.unwrap_err().code(), crate::status::Code::Internal);
    }

    #[test]
    fn test_bytes_round_trip() {
        let payload = Bytes::from_static(b"\x00\x01\x02");
        let encoded = BytesCodec.encode(&payload).unwrap();
        let decoded = BytesCodec.decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }
}
