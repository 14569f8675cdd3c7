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

//! Observability hooks for calls and messages.
//!
//! A [`StatsHandler`] receives lifecycle events for every call on a server
//! or channel it is installed on. The framework itself only emits events;
//! exporting them to a metrics backend is the handler's business.

use crate::service::RpcInfo;
use crate::status::Status;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Receiver for per-call observability events.
///
/// Handlers are invoked synchronously on the call path and must be cheap;
/// heavy work belongs on a channel to a background task.
pub trait StatsHandler: Send + Sync {
    /// A call began: the stream was accepted (server) or originated
    /// (client).
    fn call_begin(&self, info: &RpcInfo) {
        let _ = info;
    }

    /// A message of `bytes` encoded bytes was sent.
    fn outbound_message(&self, info: &RpcInfo, bytes: usize) {
        let _ = (info, bytes);
    }

    /// A message of `bytes` encoded bytes was received.
    fn inbound_message(&self, info: &RpcInfo, bytes: usize) {
        let _ = (info, bytes);
    }

    /// The call terminated with `status` after `duration`.
    fn call_end(&self, info: &RpcInfo, status: &Status, duration: Duration) {
        let _ = (info, status, duration);
    }
}

/// A stats handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopStats;

impl StatsHandler for NopStats {}

/// An atomic aggregate of call activity.
///
/// # Examples
///
/// ```rust
/// use h2rpc::observability::{CallStats, StatsHandler};
/// use h2rpc::service::{MethodDescriptor, Role, RpcInfo, RpcShape};
/// use h2rpc::status::Status;
/// use std::time::Duration;
///
/// let stats = CallStats::new();
/// let method = MethodDescriptor::new("/echo.Echo/Unary", RpcShape::Unary);
/// let info = RpcInfo::new(&method, Role::Server);
///
/// stats.call_begin(&info);
/// stats.inbound_message(&info, 12);
/// stats.call_end(&info, &Status::ok(), Duration::from_millis(3));
///
/// assert_eq!(stats.calls_started(), 1);
/// assert_eq!(stats.calls_completed(), 1);
/// assert_eq!(stats.bytes_received(), 12);
/// ```
#[derive(Debug, Default)]
pub struct CallStats {
    /// Calls that began.
    calls_started: AtomicU64,
    /// Calls that terminated, any status.
    calls_completed: AtomicU64,
    /// Calls that terminated with a non-OK status.
    calls_failed: AtomicU64,
    /// Messages sent.
    messages_sent: AtomicU64,
    /// Messages received.
    messages_received: AtomicU64,
    /// Encoded bytes sent.
    bytes_sent: AtomicU64,
    /// Encoded bytes received.
    bytes_received: AtomicU64,
}

impl CallStats {
    /// Creates a zeroed aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls that began.
    pub fn calls_started(&self) -> u64 {
        self.calls_started.load(Ordering::Relaxed)
    }

    /// Number of calls that terminated.
    pub fn calls_completed(&self) -> u64 {
        self.calls_completed.load(Ordering::Relaxed)
    }

    /// Number of calls that terminated non-OK.
    pub fn calls_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }

    /// Number of calls currently in flight.
    pub fn calls_in_flight(&self) -> u64 {
        self.calls_started().saturating_sub(self.calls_completed())
    }

    /// Number of messages sent.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Number of messages received.
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Encoded bytes sent.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Encoded bytes received.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

impl StatsHandler for CallStats {
    fn call_begin(&self, _info: &RpcInfo) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    fn outbound_message(&self, _info: &RpcInfo, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn inbound_message(&self, _info: &RpcInfo, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn call_end(&self, info: &RpcInfo, status: &Status, duration: Duration) {
        self.calls_completed.fetch_add(1, Ordering::Relaxed);
        if !status.is_ok() {
            self.calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(
            path = info.path(),
            status = %status.code(),
            ?duration,
            "call completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MethodDescriptor, Role, RpcShape};

    fn info() -> RpcInfo {
        let method = MethodDescriptor::new("/test.Test/Method", RpcShape::Unary);
        RpcInfo::new(&method, Role::Server)
    }

    #[test]
    fn test_counts() {
        let stats = CallStats::new();
        let info = info();
        stats.call_begin(&info);
        stats.call_begin(&info);
        stats.outbound_message(&info, 10);
        stats.inbound_message(&info, 20);
        stats.inbound_message(&info, 5);
        stats.call_end(&info, &Status::ok(), Duration::from_millis(1));

        assert_eq!(stats.calls_started(), 2);
        assert_eq!(stats.calls_completed(), 1);
        assert_eq!(stats.calls_in_flight(), 1);
        assert_eq!(stats.calls_failed(), 0);
        assert_eq!(stats.messages_sent(), 1);
        assert_eq!(stats.messages_received(), 2);
        assert_eq!(stats.bytes_sent(), 10);
        assert_eq!(stats.bytes_received(), 25);
    }

    #[test]
    fn test_failed_call_counted() {
        let stats = CallStats::new();
        let info = info();
        stats.call_begin(&info);
        stats.call_end(
            &info,
            &Status::unavailable("gone"),
            Duration::from_millis(1),
        );
        assert_eq!(stats.calls_failed(), 1);
    }

    #[test]
    fn test_nop_stats_is_inert() {
        let stats = NopStats;
        stats.call_begin(&info());
        stats.call_end(&info(), &Status::ok(), Duration::ZERO);
    }
}
