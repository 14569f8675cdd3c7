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

//! gRPC status codes and the terminal call status.
//!
//! Every call terminates with exactly one [`Status`], carried in the
//! `grpc-status` / `grpc-message` trailer fields. Transport-level failures
//! are mapped here into the canonical code set: a dropped connection or a
//! reset stream surfaces as [`Code::Unavailable`] unless a more specific
//! cause applies.

use bytes::Bytes;
use std::fmt;

/// Canonical gRPC status codes.
///
/// These are distinct from HTTP status codes; a gRPC response always uses
/// HTTP status 200 and carries one of these codes in the `grpc-status`
/// trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error, e.g. a handler failure without an explicit status.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// A requested entity was not found.
    NotFound = 5,
    /// The entity a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the operation.
    PermissionDenied = 7,
    /// A resource (quota, message size limit) has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or supported.
    Unimplemented = 12,
    /// An internal invariant was broken.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Creates a `Code` from its numeric wire value.
    ///
    /// Unknown values map to [`Code::Unknown`], as required for forward
    /// compatibility with peers speaking a newer revision of the protocol.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Returns the numeric wire value of this code.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns `true` if this is the successful status code.
    pub fn is_ok(self) -> bool {
        self == Code::Ok
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        };
        write!(f, "{}", name)
    }
}

/// The terminal status of a gRPC call.
///
/// A status pairs a [`Code`] with an optional human-readable message and an
/// optional opaque details blob (`grpc-status-details-bin`).
///
/// # Examples
///
/// ```rust
/// use h2rpc::status::{Code, Status};
///
/// let status = Status::new(Code::NotFound, "no such feature");
/// assert_eq!(status.code(), Code::NotFound);
/// assert!(!status.is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Status {
    /// The status code.
    code: Code,
    /// Optional human-readable message.
    message: Option<String>,
    /// Optional opaque status details.
    details: Option<Bytes>,
}

impl Status {
    /// Creates a new status with a message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: None,
        }
    }

    /// Creates a status carrying only a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: None,
        }
    }

    /// The successful status.
    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    /// Creates a `CANCELLED` status.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// Creates an `UNKNOWN` status.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Creates an `INVALID_ARGUMENT` status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Creates a `DEADLINE_EXCEEDED` status.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Creates a `NOT_FOUND` status.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Creates a `RESOURCE_EXHAUSTED` status.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    /// Creates an `UNIMPLEMENTED` status.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Creates an `INTERNAL` status.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Creates an `UNAVAILABLE` status.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Attaches an opaque details blob to this status.
    pub fn with_details(mut self, details: Bytes) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Returns the message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the details blob, if any.
    pub fn details(&self) -> Option<&Bytes> {
        self.details.as_ref()
    }

    /// Returns `true` if the status code is [`Code::Ok`].
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Maps an HTTP/2 layer error onto the canonical code set.
    ///
    /// Stream resets and connection-level failures become `UNAVAILABLE`;
    /// a `CANCEL` reset from the peer becomes `CANCELLED`; everything else
    /// that indicates a broken protocol exchange becomes `INTERNAL`.
    pub fn from_h2(error: &h2::Error) -> Self {
        if let Some(reason) = error.reason() {
            return if reason == h2::Reason::CANCEL {
                Status::cancelled("stream reset by peer")
            } else if reason == h2::Reason::NO_ERROR || reason == h2::Reason::REFUSED_STREAM {
                Status::unavailable(format!("stream closed: {}", reason))
            } else {
                Status::internal(format!("http/2 stream error: {}", reason))
            };
        }
        if error.is_io() {
            Status::unavailable(format!("transport failure: {}", error))
        } else {
            Status::internal(format!("http/2 protocol error: {}", error))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for Status {}

/// Percent-encodes a `grpc-message` value.
///
/// Bytes outside the printable ASCII range, and `%` itself, are encoded as
/// `%XX` so the message survives transport as an ASCII header value.
pub fn percent_encode_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &byte in message.as_bytes() {
        if (0x20..=0x7e).contains(&byte) && byte != b'%' {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{:02X}", byte));
        }
    }
    out
}

/// Decodes a percent-encoded `grpc-message` value.
///
/// Malformed escapes are passed through untouched rather than rejected, so
/// a sloppy peer cannot turn its own error message into a second error.
pub fn percent_decode_message(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &message[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for value in 0..=16u32 {
            let code = Code::from_u32(value);
            assert_eq!(code.as_u32(), value);
        }
    }

    #[test]
    fn test_unknown_numeric_code() {
        assert_eq!(Code::from_u32(99), Code::Unknown);
    }

    #[test]
    fn test_code_display() {
        assert_eq!(Code::Ok.to_string(), "OK");
        assert_eq!(Code::DeadlineExceeded.to_string(), "DEADLINE_EXCEEDED");
        assert_eq!(Code::Unimplemented.to_string(), "UNIMPLEMENTED");
    }

    #[test]
    fn test_status_accessors() {
        let status = Status::new(Code::Internal, "broken invariant");
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), Some("broken invariant"));
        assert!(status.details().is_none());
        assert!(!status.is_ok());
    }

    #[test]
    fn test_status_ok() {
        let status = Status::ok();
        assert!(status.is_ok());
        assert!(status.message().is_none());
    }

    #[test]
    fn test_status_details() {
        let status = Status::from_code(Code::Aborted).with_details(Bytes::from_static(b"blob"));
        assert_eq!(status.details().unwrap().as_ref(), b"blob");
    }

    #[test]
    fn test_percent_encode_plain_ascii() {
        assert_eq!(percent_encode_message("plain message"), "plain message");
    }

    #[test]
    fn test_percent_encode_special() {
        assert_eq!(percent_encode_message("50% done\n"), "50%25 done%0A");
    }

    #[test]
    fn test_percent_decode_round_trip() {
        let original = "ünïcode & 100%\n";
        let encoded = percent_encode_message(original);
        assert!(encoded.is_ascii());
        assert_eq!(percent_decode_message(&encoded), original);
    }

    #[test]
    fn test_percent_decode_malformed_passthrough() {
        assert_eq!(percent_decode_message("50%zz"), "50%zz");
        assert_eq!(percent_decode_message("trailing%"), "trailing%");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            Status::new(Code::NotFound, "missing").to_string(),
            "NOT_FOUND: missing"
        );
        assert_eq!(Status::ok().to_string(), "OK");
    }
}
