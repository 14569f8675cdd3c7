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

//! Top-level error types for H2RPC.
//!
//! Errors are layered by where they occur and what they take down:
//!
//! 1. **Transport layer**: connection-level failures ([`TransportError`]).
//!    Close the connection; subchannels reconnect with backoff.
//! 2. **Channel layer**: pool-level failures ([`ChannelError`]). The
//!    affected operation fails; the process keeps running.
//! 3. **Call layer**: a terminal [`Status`](crate::status::Status) at the
//!    call boundary. The call is over; transport and channel stay alive.

use crate::channel::ChannelError;
use crate::status::Status;
use std::io;
use thiserror::Error;

/// Errors that can occur in the transport layer.
///
/// Transport errors represent failures establishing or operating the
/// HTTP/2 connection underneath calls. They close the affected connection;
/// whether they are retried depends on the owner (subchannels retry with
/// backoff, servers surface listener failures as fatal).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a TCP connection to the remote endpoint.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The address that failed to connect.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to bind the server listener. Fatal at startup.
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        /// The listen address.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed.
    #[error("tls handshake with {address} failed: {source}")]
    TlsFailed {
        /// The peer address.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The HTTP/2 handshake or connection failed.
    #[error("http/2 connection error: {source}")]
    Http2 {
        /// The underlying h2 error.
        #[source]
        source: h2::Error,
    },

    /// An established connection was lost.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Description of why the connection was lost.
        reason: String,
    },

    /// The transport was closed locally.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Returns `true` if reconnecting may succeed.
    ///
    /// Connect failures and lost connections are transient by assumption;
    /// a deliberate local close is not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

impl From<h2::Error> for TransportError {
    fn from(source: h2::Error) -> Self {
        TransportError::Http2 { source }
    }
}

/// Top-level error type for H2RPC operations.
///
/// # Examples
///
/// ```rust
/// use h2rpc::error::{Error, TransportError};
///
/// let error = Error::from(TransportError::Closed);
/// assert!(matches!(error, Error::Transport(_)));
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// A transport-layer failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A channel-layer failure.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A call terminated with a non-OK gRPC status.
    #[error("rpc failed: {0}")]
    Rpc(#[from] Status),

    /// Invalid configuration detected before any I/O happened.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Returns the terminal status if this error is a call failure.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Rpc(status) => Some(status),
            _ => None,
        }
    }
}
