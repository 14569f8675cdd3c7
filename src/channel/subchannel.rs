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

//! Subchannels: one HTTP/2 connection to one endpoint.
//!
//! A subchannel owns its connection lifecycle. It starts idle (lazy) or
//! connecting (`sync_start`), publishes `connecting | ready | down`
//! transitions on a watch, originates client streams on demand, and
//! reconnects after transport failure with exponential backoff. Transient
//! connect failures are retried, never surfaced; in-flight streams on a
//! lost connection fail with `UNAVAILABLE` through their h2 errors.

use super::{Backoff, Endpoint};
use crate::context::Context;
use crate::error::TransportError;
use crate::status::Status;
use bytes::Bytes;
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Connection state of a subchannel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelState {
    /// Created lazily; connects on first demand.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// The HTTP/2 connection is established.
    Ready,
    /// The connection failed or closed; backoff before reconnecting.
    Down,
}

/// One HTTP/2 connection to one endpoint.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Subchannel {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Endpoint,
    tls: Option<Arc<rustls::ClientConfig>>,
    state: watch::Sender<SubchannelState>,
    sender: Mutex<Option<h2::client::SendRequest<Bytes>>>,
    demand: Notify,
    shutdown: watch::Sender<bool>,
    claimed: AtomicBool,
}

impl std::fmt::Debug for Subchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subchannel")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Subchannel {
    /// Starts a subchannel for `endpoint`.
    ///
    /// With `lazy` set the connect loop waits for the first demand
    /// signal; otherwise it dials immediately.
    pub(crate) fn start(
        endpoint: Endpoint,
        tls: Option<Arc<rustls::ClientConfig>>,
        lazy: bool,
    ) -> Self {
        let (state, _) = watch::channel(if lazy {
            SubchannelState::Idle
        } else {
            SubchannelState::Connecting
        });
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            endpoint,
            tls,
            state,
            sender: Mutex::new(None),
            demand: Notify::new(),
            shutdown,
            claimed: AtomicBool::new(false),
        });
        tokio::spawn(run(Arc::clone(&inner), lazy));
        Self { inner }
    }

    /// The endpoint this subchannel dials.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The current connection state.
    pub fn state(&self) -> SubchannelState {
        *self.inner.state.borrow()
    }

    /// Readiness is purely connection state.
    pub fn is_ready(&self) -> bool {
        self.state() == SubchannelState::Ready
    }

    /// Stops the subchannel and closes its connection.
    pub(crate) fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.demand.notify_one();
    }

    /// Waits until the subchannel is ready, bounded by the context.
    pub(crate) async fn wait_ready(&self, ctx: &Context) -> Result<(), Status> {
        self.inner.demand.notify_one();
        let mut state = self.inner.state.subscribe();
        tokio::select! {
            result = state.wait_for(|state| *state == SubchannelState::Ready) => result
                .map(|_| ())
                .map_err(|_| Status::unavailable("subchannel stopped")),
            _ = ctx.cancelled() => Err(crate::streaming::cancellation_status(ctx)),
        }
    }

    /// Originates one stream on the connection.
    pub(crate) async fn new_stream(
        &self,
        request: http::Request<()>,
    ) -> Result<(h2::client::ResponseFuture, h2::SendStream<Bytes>), Status> {
        let sender = self.inner.sender.lock().clone();
        let sender = match sender {
            Some(sender) => sender,
            None => {
                self.inner.demand.notify_one();
                return Err(Status::unavailable("subchannel not connected"));
            }
        };
        let mut sender = sender.ready().await.map_err(|e| Status::from_h2(&e))?;
        sender
            .send_request(request, false)
            .map_err(|e| Status::from_h2(&e))
    }

    /// Tries to take the exclusive claim lease.
    pub(crate) fn try_claim(&self) -> bool {
        self.inner
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases the claim lease.
    pub(crate) fn release_claim(&self) {
        self.inner.claimed.store(false, Ordering::SeqCst);
    }

    /// Returns `true` while the claim lease is held.
    pub(crate) fn is_claimed(&self) -> bool {
        self.inner.claimed.load(Ordering::SeqCst)
    }
}

/// The connect loop: dial, serve, mark down, back off, repeat.
async fn run(inner: Arc<Inner>, lazy: bool) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut backoff = Backoff::reconnect();
    if lazy {
        trace!(endpoint = %inner.endpoint, "subchannel idle until first demand");
        tokio::select! {
            _ = inner.demand.notified() => {}
            _ = shutdown.changed() => {}
        }
    }
    while !*shutdown.borrow() {
        let _ = inner.state.send_replace(SubchannelState::Connecting);
        match connect(&inner).await {
            Ok((send_request, mut connection)) => {
                debug!(endpoint = %inner.endpoint, "subchannel ready");
                backoff.reset();
                *inner.sender.lock() = Some(send_request);
                let _ = inner.state.send_replace(SubchannelState::Ready);
                tokio::select! {
                    _ = &mut connection => {}
                    _ = shutdown.changed() => connection.abort(),
                }
                *inner.sender.lock() = None;
                // A lease cannot outlive the connection it was taken on.
                inner.claimed.store(false, Ordering::SeqCst);
                let _ = inner.state.send_replace(SubchannelState::Down);
                if !*shutdown.borrow() {
                    debug!(endpoint = %inner.endpoint, "subchannel connection lost");
                }
            }
            Err(error) => {
                debug!(endpoint = %inner.endpoint, %error, "subchannel connect failed");
                let _ = inner.state.send_replace(SubchannelState::Down);
            }
        }
        if *shutdown.borrow() {
            break;
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    *inner.sender.lock() = None;
    let _ = inner.state.send_replace(SubchannelState::Down);
    trace!(endpoint = %inner.endpoint, "subchannel stopped");
}

async fn connect(
    inner: &Inner,
) -> Result<(h2::client::SendRequest<Bytes>, tokio::task::JoinHandle<()>), TransportError> {
    let address = format!("{}:{}", inner.endpoint.host, inner.endpoint.port);
    let socket =
        TcpStream::connect(&address)
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                address: address.clone(),
                source,
            })?;
    let _ = socket.set_nodelay(true);
    if inner.endpoint.tls {
        let config = match inner.tls.clone() {
            Some(config) => config,
            None => {
                return Err(TransportError::TlsFailed {
                    address,
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "endpoint requires tls but the channel has no client tls configuration",
                    ),
                })
            }
        };
        let server_name =
            ServerName::try_from(inner.endpoint.host.clone()).map_err(|error| {
                TransportError::TlsFailed {
                    address: address.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, error),
                }
            })?;
        let stream = TlsConnector::from(config)
            .connect(server_name, socket)
            .await
            .map_err(|source| TransportError::TlsFailed {
                address: address.clone(),
                source,
            })?;
        handshake(stream, address).await
    } else {
        handshake(socket, address).await
    }
}

async fn handshake<IO>(
    io: IO,
    address: String,
) -> Result<(h2::client::SendRequest<Bytes>, tokio::task::JoinHandle<()>), TransportError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (send_request, connection) = h2::client::handshake(io).await?;
    let driver = tokio::spawn(async move {
        if let Err(error) = connection.await {
            debug!(%address, %error, "connection closed with error");
        }
    });
    Ok((send_request, driver))
}
