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

//! gRPC metadata: the ordered multimap carried in headers and trailers.
//!
//! Metadata keys are lowercase ASCII, normalized on insert. Duplicate keys
//! are allowed and preserve insertion order. Keys ending in `-bin` carry
//! binary values, base64-encoded on the wire. Reserved, framework-managed
//! names cannot be set through user metadata; attempting to do so is a
//! programmer error surfaced as `INTERNAL` at the call boundary.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;

/// Header names managed by the framework.
///
/// User metadata carrying one of these names is rejected: the engine owns
/// them and writes them itself at the appropriate point of the call
/// lifecycle.
pub const RESERVED_NAMES: &[&str] = &[
    ":status",
    ":path",
    ":authority",
    "grpc-status",
    "grpc-message",
    "grpc-encoding",
    "grpc-accept-encoding",
    "grpc-timeout",
    "content-type",
    "te",
    "user-agent",
];

/// Suffix marking a metadata key as carrying a binary value.
pub const BINARY_SUFFIX: &str = "-bin";

/// Errors produced when building metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// The key names a framework-managed header.
    #[error("reserved metadata key: {0}")]
    ReservedKey(String),

    /// The key is not valid lowercase-ASCII header material.
    #[error("invalid metadata key: {0}")]
    InvalidKey(String),

    /// An ASCII value was supplied for a `-bin` key, or vice versa.
    #[error("key {0} does not match its value kind")]
    ValueKindMismatch(String),
}

/// A single metadata value: printable ASCII or raw binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    /// A printable-ASCII value.
    Ascii(String),
    /// A binary value, carried base64-encoded on the wire under a `-bin`
    /// key.
    Binary(Vec<u8>),
}

impl MetadataValue {
    /// Returns the ASCII form of this value, if it is ASCII.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Ascii(s) => Some(s),
            MetadataValue::Binary(_) => None,
        }
    }

    /// Returns the binary form of this value, if it is binary.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MetadataValue::Ascii(_) => None,
            MetadataValue::Binary(b) => Some(b),
        }
    }
}

/// An ordered multimap of metadata entries.
///
/// # Examples
///
/// ```rust
/// use h2rpc::metadata::Metadata;
///
/// let mut metadata = Metadata::new();
/// metadata.insert("X-Request-Id", "abc").unwrap();
/// metadata.insert("x-request-id", "def").unwrap();
/// metadata.insert_bin("trace-bin", vec![1, 2, 3]).unwrap();
///
/// // Keys are normalized to lowercase; duplicates keep insertion order.
/// assert_eq!(metadata.get("X-REQUEST-ID"), Some("abc"));
/// let all: Vec<_> = metadata.get_all("x-request-id").collect();
/// assert_eq!(all, ["abc", "def"]);
/// assert_eq!(metadata.get_bin("trace-bin"), Some(&[1u8, 2, 3][..]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Entries in insertion order. Keys are lowercase.
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> Result<String, MetadataError> {
        if key.is_empty()
            || !key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        {
            return Err(MetadataError::InvalidKey(key.to_string()));
        }
        let key = key.to_ascii_lowercase();
        if RESERVED_NAMES.contains(&key.as_str()) {
            return Err(MetadataError::ReservedKey(key));
        }
        Ok(key)
    }

    /// Appends an ASCII entry.
    ///
    /// The key is normalized to lowercase. Keys ending in `-bin` must use
    /// [`Metadata::insert_bin`] instead.
    pub fn insert(
        &mut self,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<(), MetadataError> {
        let key = Self::normalize(key.as_ref())?;
        if key.ends_with(BINARY_SUFFIX) {
            return Err(MetadataError::ValueKindMismatch(key));
        }
        self.entries.push((key, MetadataValue::Ascii(value.into())));
        Ok(())
    }

    /// Appends a binary entry. The key must end in `-bin`.
    pub fn insert_bin(
        &mut self,
        key: impl AsRef<str>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), MetadataError> {
        let key = Self::normalize(key.as_ref())?;
        if !key.ends_with(BINARY_SUFFIX) {
            return Err(MetadataError::ValueKindMismatch(key));
        }
        self.entries
            .push((key, MetadataValue::Binary(value.into())));
        Ok(())
    }

    /// Returns the first ASCII value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_str())
    }

    /// Returns the first binary value for a key.
    pub fn get_bin(&self, key: &str) -> Option<&[u8]> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.as_bytes())
    }

    /// Iterates over every ASCII value for a key, in insertion order.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .filter_map(|(_, v)| v.as_str())
    }

    /// Returns `true` if any entry exists for the key.
    pub fn contains_key(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Removes every entry for a key, returning how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let key = key.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|(k, _)| *k != key);
        before - self.entries.len()
    }

    /// Iterates over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Merges another metadata set after this one, preserving order.
    pub fn extend(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }

    /// Appends every entry onto an [`http::HeaderMap`].
    ///
    /// Binary values are base64-encoded without padding. Entries whose key
    /// or value cannot form a legal header are skipped with a warning
    /// rather than poisoning the whole call.
    pub fn append_to_headers(&self, headers: &mut HeaderMap) {
        for (key, value) in &self.entries {
            let name = match HeaderName::from_bytes(key.as_bytes()) {
                Ok(name) => name,
                Err(_) => {
                    tracing::warn!(key, "skipping metadata entry with invalid header name");
                    continue;
                }
            };
            let value = match value {
                MetadataValue::Ascii(s) => HeaderValue::from_str(s),
                MetadataValue::Binary(b) => HeaderValue::from_str(&STANDARD_NO_PAD.encode(b)),
            };
            match value {
                Ok(value) => {
                    headers.append(name, value);
                }
                Err(_) => {
                    tracing::warn!(key, "skipping metadata entry with invalid header value");
                }
            }
        }
    }

    /// Extracts user metadata from an [`http::HeaderMap`].
    ///
    /// Reserved, framework-managed names are skipped. `-bin` values are
    /// base64-decoded; both padded and unpadded forms are accepted.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Metadata::new();
        for (name, value) in headers.iter() {
            let key = name.as_str();
            if RESERVED_NAMES.contains(&key) {
                continue;
            }
            if key.ends_with(BINARY_SUFFIX) {
                let text = match value.to_str() {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                let decoded = STANDARD_NO_PAD
                    .decode(text.trim_end_matches('='))
                    .or_else(|_| STANDARD.decode(text));
                if let Ok(bytes) = decoded {
                    metadata
                        .entries
                        .push((key.to_string(), MetadataValue::Binary(bytes)));
                }
            } else if let Ok(text) = value.to_str() {
                metadata
                    .entries
                    .push((key.to_string(), MetadataValue::Ascii(text.to_string())));
            }
        }
        metadata
    }
}

/// A `grpc-timeout` header value.
///
/// Wire format is a decimal integer followed by a single unit suffix:
/// `H` (hours), `M` (minutes), `S` (seconds), `m` (milliseconds),
/// `u` (microseconds) or `n` (nanoseconds).
///
/// # Examples
///
/// ```rust
/// use h2rpc::metadata::Timeout;
/// use std::time::Duration;
///
/// let timeout = Timeout::parse("50m").unwrap();
/// assert_eq!(timeout.as_duration(), Duration::from_millis(50));
/// assert_eq!(Timeout::from_duration(Duration::from_secs(2)).to_grpc_format(), "2S");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    /// Timeout in nanoseconds.
    nanos: u64,
}

impl Timeout {
    /// Creates a timeout from a [`Duration`].
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            nanos: duration.as_nanos().min(u64::MAX as u128) as u64,
        }
    }

    /// Returns the timeout as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }

    /// Formats as a `grpc-timeout` header value, using the largest unit
    /// that yields an integer value.
    pub fn to_grpc_format(self) -> String {
        const HOUR: u64 = 3_600_000_000_000;
        const MINUTE: u64 = 60_000_000_000;
        const SECOND: u64 = 1_000_000_000;
        const MILLI: u64 = 1_000_000;
        const MICRO: u64 = 1_000;
        if self.nanos >= HOUR && self.nanos % HOUR == 0 {
            format!("{}H", self.nanos / HOUR)
        } else if self.nanos >= MINUTE && self.nanos % MINUTE == 0 {
            format!("{}M", self.nanos / MINUTE)
        } else if self.nanos >= SECOND && self.nanos % SECOND == 0 {
            format!("{}S", self.nanos / SECOND)
        } else if self.nanos >= MILLI && self.nanos % MILLI == 0 {
            format!("{}m", self.nanos / MILLI)
        } else if self.nanos >= MICRO && self.nanos % MICRO == 0 {
            format!("{}u", self.nanos / MICRO)
        } else {
            format!("{}n", self.nanos)
        }
    }

    /// Parses a `grpc-timeout` header value.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() < 2 {
            return None;
        }
        let (value_str, unit) = s.split_at(s.len() - 1);
        let value: u64 = value_str.parse().ok()?;
        let nanos = match unit {
            "n" => value,
            "u" => value.checked_mul(1_000)?,
            "m" => value.checked_mul(1_000_000)?,
            "S" => value.checked_mul(1_000_000_000)?,
            "M" => value.checked_mul(60_000_000_000)?,
            "H" => value.checked_mul(3_600_000_000_000)?,
            _ => return None,
        };
        Some(Self { nanos })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_normalizes_case() {
        let mut metadata = Metadata::new();
        metadata.insert("X-Custom", "value").unwrap();
        assert_eq!(metadata.get("x-custom"), Some("value"));
        assert_eq!(metadata.get("X-CUSTOM"), Some("value"));
    }

    #[test]
    fn test_duplicates_preserve_order() {
        let mut metadata = Metadata::new();
        metadata.insert("k", "first").unwrap();
        metadata.insert("other", "x").unwrap();
        metadata.insert("k", "second").unwrap();
        let values: Vec<_> = metadata.get_all("k").collect();
        assert_eq!(values, ["first", "second"]);
        assert_eq!(metadata.len(), 3);
    }

    #[test]
    fn test_reserved_key_rejected() {
        let mut metadata = Metadata::new();
        assert_eq!(
            metadata.insert("grpc-status", "0"),
            Err(MetadataError::ReservedKey("grpc-status".to_string()))
        );
        assert_eq!(
            metadata.insert("Content-Type", "application/grpc"),
            Err(MetadataError::ReservedKey("content-type".to_string()))
        );
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut metadata = Metadata::new();
        assert!(matches!(
            metadata.insert("", "v"),
            Err(MetadataError::InvalidKey(_))
        ));
        assert!(matches!(
            metadata.insert("white space", "v"),
            Err(MetadataError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_binary_key_kind() {
        let mut metadata = Metadata::new();
        assert!(matches!(
            metadata.insert("trace-bin", "ascii"),
            Err(MetadataError::ValueKindMismatch(_))
        ));
        assert!(matches!(
            metadata.insert_bin("trace", vec![1]),
            Err(MetadataError::ValueKindMismatch(_))
        ));
        metadata.insert_bin("trace-bin", vec![0xff, 0x00]).unwrap();
        assert_eq!(metadata.get_bin("trace-bin"), Some(&[0xff, 0x00][..]));
    }

    #[test]
    fn test_remove() {
        let mut metadata = Metadata::new();
        metadata.insert("k", "a").unwrap();
        metadata.insert("k", "b").unwrap();
        metadata.insert("other", "c").unwrap();
        assert_eq!(metadata.remove("K"), 2);
        assert!(!metadata.contains_key("k"));
        assert!(metadata.contains_key("other"));
    }

    #[test]
    fn test_header_map_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert("x-request-id", "abc").unwrap();
        metadata.insert_bin("payload-bin", vec![1, 2, 3, 250]).unwrap();

        let mut headers = HeaderMap::new();
        metadata.append_to_headers(&mut headers);
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");

        let decoded = Metadata::from_headers(&headers);
        assert_eq!(decoded.get("x-request-id"), Some("abc"));
        assert_eq!(decoded.get_bin("payload-bin"), Some(&[1u8, 2, 3, 250][..]));
    }

    #[test]
    fn test_from_headers_skips_reserved() {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-status", HeaderValue::from_static("0"));
        headers.insert("content-type", HeaderValue::from_static("application/grpc"));
        headers.insert("x-user", HeaderValue::from_static("kept"));
        let metadata = Metadata::from_headers(&headers);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get("x-user"), Some("kept"));
    }

    #[test]
    fn test_binary_accepts_padded_base64() {
        let mut headers = HeaderMap::new();
        // "AQID" is [1, 2, 3]; the padded form must also decode.
        headers.insert("k-bin", HeaderValue::from_static("AQID"));
        headers.append("k2-bin", HeaderValue::from_static("AQI="));
        let metadata = Metadata::from_headers(&headers);
        assert_eq!(metadata.get_bin("k-bin"), Some(&[1u8, 2, 3][..]));
        assert_eq!(metadata.get_bin("k2-bin"), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_timeout_parse_units() {
        assert_eq!(
            Timeout::parse("1H").unwrap().as_duration(),
            Duration::from_secs(3600)
        );
        assert_eq!(
            Timeout::parse("2M").unwrap().as_duration(),
            Duration::from_secs(120)
        );
        assert_eq!(
            Timeout::parse("3S").unwrap().as_duration(),
            Duration::from_secs(3)
        );
        assert_eq!(
            Timeout::parse("50m").unwrap().as_duration(),
            Duration::from_millis(50)
        );
        assert_eq!(
            Timeout::parse("7u").unwrap().as_duration(),
            Duration::from_micros(7)
        );
        assert_eq!(
            Timeout::parse("9n").unwrap().as_duration(),
            Duration::from_nanos(9)
        );
    }

    #[test]
    fn test_timeout_parse_invalid() {
        assert!(Timeout::parse("").is_none());
        assert!(Timeout::parse("5").is_none());
        assert!(Timeout::parse("x5S").is_none());
        assert!(Timeout::parse("5q").is_none());
    }

    #[test]
    fn test_timeout_format_round_trip() {
        for duration in [
            Duration::from_secs(7200),
            Duration::from_secs(90),
            Duration::from_millis(50),
            Duration::from_micros(1500),
            Duration::from_nanos(17),
        ] {
            let timeout = Timeout::from_duration(duration);
            let parsed = Timeout::parse(&timeout.to_grpc_format()).unwrap();
            assert_eq!(parsed.as_duration(), duration);
        }
    }
}
