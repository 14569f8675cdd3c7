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

//! gRPC Length-Prefixed Message framing.
//!
//! Each direction of a gRPC stream carries a sequence of length-prefixed
//! messages over HTTP/2 DATA frames:
//!
//! ```text
//! +------------------+------------------+------------------+
//! | Compressed (1)   | Length (4, BE)   | Payload (N)      |
//! +------------------+------------------+------------------+
//! ```
//!
//! The compressed flag is `1` when the payload is compressed with the
//! per-stream negotiated encoding, `0` for identity. Writers emit whole
//! frames only; the reader reassembles frames across arbitrary DATA
//! boundaries and enforces the receive size limit.

use crate::status::Status;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the message header: 1-byte compressed flag + 4-byte length.
pub const HEADER_SIZE: usize = 5;

/// Default maximum receive message size (4 MB, the gRPC default).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// A decoded Length-Prefixed Message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload, still compressed if `compressed` is set.
    pub payload: Bytes,
    /// Whether the payload is compressed with the stream encoding.
    pub compressed: bool,
}

/// Encodes a message into gRPC wire format.
///
/// # Examples
///
/// ```rust
/// use h2rpc::framing::{encode_frame, HEADER_SIZE};
///
/// let frame = encode_frame(b"hello", false);
/// assert_eq!(frame.len(), HEADER_SIZE + 5);
/// assert_eq!(frame[0], 0);
/// assert_eq!(&frame[1..5], &5u32.to_be_bytes());
/// ```
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(u8::from(compressed));
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Incremental decoder for Length-Prefixed Messages.
///
/// Fed chunks as they arrive from the transport; yields complete frames.
/// A frame longer than the configured limit fails the stream with
/// `RESOURCE_EXHAUSTED` before its payload is buffered.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Buffered bytes of incomplete frames.
    buffer: BytesMut,
    /// Maximum accepted payload length.
    max_message_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameDecoder {
    /// Creates a decoder with the given receive size limit.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Feeds transport data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Tries to decode the next complete frame.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, Status> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        let compressed = self.buffer[0] != 0;
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if length > self.max_message_size {
            return Err(Status::resource_exhausted(format!(
                "message of {} bytes exceeds limit of {} bytes",
                length, self.max_message_size
            )));
        }
        if self.buffer.len() < HEADER_SIZE + length {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(length).freeze();
        Ok(Some(Frame {
            payload,
            compressed,
        }))
    }

    /// Returns `true` if a partial frame is still buffered.
    ///
    /// Checked when the peer ends the stream: leftover bytes mean the
    /// sender was cut off mid-frame.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// The terminal status for a stream that ended with a partial frame.
    pub fn truncation_error(&self) -> Status {
        Status::internal(format!(
            "stream ended mid-frame with {} bytes buffered",
            self.buffer.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_frame() {
        let frame = encode_frame(&[], false);
        assert_eq!(frame.len(), HEADER_SIZE);
        assert_eq!(frame[0], 0);
        assert_eq!(&frame[1..5], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_compressed_flag() {
        let frame = encode_frame(b"x", true);
        assert_eq!(frame[0], 1);
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.feed(&encode_frame(b"hello world", false));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(!frame.compressed);
        assert_eq!(&frame.payload[..], b"hello world");
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn test_decode_across_chunks() {
        let mut decoder = FrameDecoder::default();
        let encoded = encode_frame(b"split me", true);
        for byte in &encoded[..] {
            assert!(decoder.next_frame().unwrap().is_none());
            decoder.feed(&[*byte]);
        }
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(frame.compressed);
        assert_eq!(&frame.payload[..], b"split me");
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut decoder = FrameDecoder::default();
        decoder.feed(&encode_frame(b"first", false));
        decoder.feed(&encode_frame(b"second", false));
        assert_eq!(
            &decoder.next_frame().unwrap().unwrap().payload[..],
            b"first"
        );
        assert_eq!(
            &decoder.next_frame().unwrap().unwrap().payload[..],
            b"second"
        );
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_round_trip_sequence_identity() {
        let messages: Vec<&[u8]> = vec![b"", b"a", b"longer payload", &[0u8; 1024]];
        let mut wire = Vec::new();
        for msg in &messages {
            wire.extend_from_slice(&encode_frame(msg, false));
        }
        let mut decoder = FrameDecoder::default();
        decoder.feed(&wire);
        for msg in &messages {
            let frame = decoder.next_frame().unwrap().unwrap();
            assert_eq!(&frame.payload[..], *msg);
        }
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut decoder = FrameDecoder::new(16);
        decoder.feed(&encode_frame(&[0u8; 17], false));
        let error = decoder.next_frame().unwrap_err();
        assert_eq!(error.code(), crate::status::Code::ResourceExhausted);
    }

    #[test]
    fn test_oversized_rejected_before_payload_arrives() {
        let mut decoder = FrameDecoder::new(16);
        // Header only: announces a 1 GB payload that never arrives.
        let mut header = Vec::new();
        header.push(0u8);
        header.extend_from_slice(&(1u32 << 30).to_be_bytes());
        decoder.feed(&header);
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_partial_frame_detected() {
        let mut decoder = FrameDecoder::default();
        let encoded = encode_frame(b"truncated", false);
        decoder.feed(&encoded[..encoded.len() - 2]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.has_partial_frame());
        assert_eq!(
            decoder.truncation_error().code(),
            crate::status::Code::Internal
        );
    }
}
