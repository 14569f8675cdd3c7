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

//! The per-call state machine.
//!
//! One [`Call`] exists per HTTP/2 stream, mirrored on both peers:
//!
//! ```text
//! Idle -> HeadersSent -> MsgExchange <-> MsgExchange -> HalfClosedLocal
//!   any post-Idle state -> Closed     (trailers carrying a status)
//!   any state           -> Cancelled  (deadline, context cancel, abort, reset)
//! ```
//!
//! The terminal status is set exactly once. After it is set, no further
//! frames are sent or observed: attempting to send after a normal close is
//! a local programmer error, while sends after cancellation are dropped
//! silently so a handler racing a deadline does not have to care.

use crate::codec::Encoding;
use crate::service::RpcInfo;
use crate::status::Status;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle states of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    HeadersSent,
    MsgExchange,
    HalfClosedLocal,
    Closed,
    Cancelled,
}

/// What the caller should do with an outbound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Write the frame.
    Proceed,
    /// The call was cancelled; drop the write silently.
    Dropped,
}

struct Lifecycle {
    state: State,
    terminal: Option<Status>,
    remote_half_closed: bool,
}

/// Shared per-stream call state.
///
/// Cheap to clone; all clones observe the same lifecycle. The stream
/// handles consult it before every wire operation, which is what enforces
/// the ordering invariants (headers before data, trailers after data, one
/// terminal status).
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    info: RpcInfo,
    send_encoding: Encoding,
    recv_encoding: Encoding,
    lifecycle: Mutex<Lifecycle>,
    started: Instant,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("Call")
            .field("path", &self.inner.info.path())
            .field("state", &lifecycle.state)
            .field("terminal", &lifecycle.terminal)
            .finish()
    }
}

impl Call {
    /// Creates a call in the `Idle` state.
    pub fn new(info: RpcInfo, send_encoding: Encoding, recv_encoding: Encoding) -> Self {
        Self {
            inner: Arc::new(CallInner {
                info,
                send_encoding,
                recv_encoding,
                lifecycle: Mutex::new(Lifecycle {
                    state: State::Idle,
                    terminal: None,
                    remote_half_closed: false,
                }),
                started: Instant::now(),
            }),
        }
    }

    /// Identifying information about this call.
    pub fn info(&self) -> &RpcInfo {
        &self.inner.info
    }

    /// The encoding applied to outbound messages.
    pub fn send_encoding(&self) -> Encoding {
        self.inner.send_encoding
    }

    /// The encoding expected on inbound messages.
    pub fn recv_encoding(&self) -> Encoding {
        self.inner.recv_encoding
    }

    /// Time elapsed since the call was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.inner.started.elapsed()
    }

    /// Permits sending the initial metadata.
    ///
    /// Valid exactly once, before any message frame. A second attempt is a
    /// programmer error surfaced as `INTERNAL`.
    pub fn begin_headers(&self) -> Result<SendDisposition, Status> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            State::Idle => {
                lifecycle.state = State::HeadersSent;
                Ok(SendDisposition::Proceed)
            }
            State::Cancelled => Ok(SendDisposition::Dropped),
            State::Closed => Err(Status::internal("initial metadata sent after close")),
            _ => Err(Status::internal("initial metadata already sent")),
        }
    }

    /// Permits sending one message frame.
    pub fn begin_message(&self) -> Result<SendDisposition, Status> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            State::HeadersSent | State::MsgExchange => {
                lifecycle.state = State::MsgExchange;
                Ok(SendDisposition::Proceed)
            }
            State::Idle => Err(Status::internal(
                "message frame sent before initial metadata",
            )),
            State::HalfClosedLocal => Err(Status::internal("message frame sent after half-close")),
            State::Cancelled => Ok(SendDisposition::Dropped),
            State::Closed => Err(Status::internal("message frame sent after close")),
        }
    }

    /// Permits the local end-of-stream (client half-close).
    pub fn half_close_local(&self) -> Result<SendDisposition, Status> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            State::HeadersSent | State::MsgExchange => {
                lifecycle.state = State::HalfClosedLocal;
                Ok(SendDisposition::Proceed)
            }
            State::Idle => Err(Status::internal("half-close before initial metadata")),
            State::HalfClosedLocal => Err(Status::internal("stream already half-closed")),
            State::Cancelled => Ok(SendDisposition::Dropped),
            State::Closed => Err(Status::internal("half-close after close")),
        }
    }

    /// Returns `true` once the initial metadata was sent.
    pub fn headers_sent(&self) -> bool {
        !matches!(self.inner.lifecycle.lock().state, State::Idle)
    }

    /// Closes the call with a terminal status (trailers path).
    ///
    /// Returns `Some(status)` if this invocation set the terminal status,
    /// `None` if the call was already terminal. Valid from any state:
    /// closing from `Idle` is the Trailer-Only response.
    pub fn close(&self, status: Status) -> Option<Status> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.terminal.is_some() {
            return None;
        }
        lifecycle.state = State::Closed;
        lifecycle.terminal = Some(status.clone());
        Some(status)
    }

    /// Cancels the call: deadline expiry, context cancel, local abort or
    /// stream reset.
    ///
    /// Returns `Some(status)` if this invocation set the terminal status.
    pub fn cancel(&self, status: Status) -> Option<Status> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.terminal.is_some() {
            return None;
        }
        lifecycle.state = State::Cancelled;
        lifecycle.terminal = Some(status.clone());
        Some(status)
    }

    /// The terminal status, once set.
    pub fn terminal_status(&self) -> Option<Status> {
        self.inner.lifecycle.lock().terminal.clone()
    }

    /// Returns `true` once a terminal status was set.
    pub fn is_terminal(&self) -> bool {
        self.inner.lifecycle.lock().terminal.is_some()
    }

    /// Returns `true` if the call terminated by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.inner.lifecycle.lock().state == State::Cancelled
    }

    /// Records that the peer half-closed its direction.
    pub fn note_remote_half_closed(&self) {
        self.inner.lifecycle.lock().remote_half_closed = true;
    }

    /// Returns `true` if the peer half-closed its direction.
    pub fn remote_half_closed(&self) -> bool {
        self.inner.lifecycle.lock().remote_half_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MethodDescriptor, Role, RpcShape};

    fn call() -> Call {
        let method = MethodDescriptor::new("/test.Test/Method", RpcShape::Unary);
        Call::new(
            RpcInfo::new(&method, Role::Server),
            Encoding::Identity,
            Encoding::Identity,
        )
    }

    #[test]
    fn test_normal_lifecycle() {
        let call = call();
        assert!(!call.headers_sent());
        assert_eq!(call.begin_headers().unwrap(), SendDisposition::Proceed);
        assert!(call.headers_sent());
        assert_eq!(call.begin_message().unwrap(), SendDisposition::Proceed);
        assert_eq!(call.begin_message().unwrap(), SendDisposition::Proceed);
        assert_eq!(call.half_close_local().unwrap(), SendDisposition::Proceed);
        assert!(call.close(Status::ok()).is_some());
        assert!(call.is_terminal());
        assert!(!call.is_cancelled());
    }

    #[test]
    fn test_double_headers_is_internal() {
        let call = call();
        call.begin_headers().unwrap();
        let error = call.begin_headers().unwrap_err();
        assert_eq!(error.code(), crate::status::Code::Internal);
    }

    #[test]
    fn test_message_before_headers_is_internal() {
        let call = call();
        assert!(call.begin_message().is_err());
    }

    #[test]
    fn test_send_after_half_close_is_internal() {
        let call = call();
        call.begin_headers().unwrap();
        call.half_close_local().unwrap();
        assert!(call.begin_message().is_err());
    }

    #[test]
    fn test_send_after_close_is_internal() {
        let call = call();
        call.begin_headers().unwrap();
        call.close(Status::ok());
        assert!(call.begin_message().is_err());
        assert!(call.begin_headers().is_err());
    }

    #[test]
    fn test_sends_after_cancel_dropped_silently() {
        let call = call();
        call.begin_headers().unwrap();
        call.cancel(Status::cancelled("deadline"));
        assert_eq!(call.begin_message().unwrap(), SendDisposition::Dropped);
        assert_eq!(call.half_close_local().unwrap(), SendDisposition::Dropped);
        assert!(call.is_cancelled());
    }

    #[test]
    fn test_terminal_status_set_once() {
        let call = call();
        call.begin_headers().unwrap();
        assert!(call.close(Status::ok()).is_some());
        assert!(call.cancel(Status::cancelled("late")).is_none());
        assert!(call.close(Status::internal("later")).is_none());
        assert_eq!(
            call.terminal_status().unwrap().code(),
            crate::status::Code::Ok
        );
    }

    #[test]
    fn test_trailer_only_close_from_idle() {
        let call = call();
        assert!(call.close(Status::unimplemented("no such method")).is_some());
        assert!(call.is_terminal());
    }

    #[test]
    fn test_remote_half_close_tracked() {
        let call = call();
        assert!(!call.remote_half_closed());
        call.note_remote_half_closed();
        assert!(call.remote_half_closed());
    }
}
