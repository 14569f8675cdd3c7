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

//! The gRPC server: listener lifecycle, per-connection HTTP/2 handshake
//! and per-stream dispatch.
//!
//! Each accepted connection runs its own task; each stream on it spawns a
//! logical call task executing the dispatcher. Graceful shutdown stops
//! accepting, lets in-flight calls drain up to the configured deadline,
//! then cancels the remainder with `UNAVAILABLE`.

mod config;
mod dispatch;

pub use config::{ServerConfig, ServerSecurity};

use crate::context::Context;
use crate::error::{Error, TransportError};
use crate::interceptor::{StreamChain, UnaryChain};
use crate::service::Registry;
use dispatch::Dispatcher;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

/// Process-wide table of named servers, replaced copy-on-write so reads
/// never hold a lock across a lookup.
static SERVERS: OnceLock<RwLock<Arc<HashMap<String, ServerHandle>>>> = OnceLock::new();

fn servers() -> &'static RwLock<Arc<HashMap<String, ServerHandle>>> {
    SERVERS.get_or_init(|| RwLock::new(Arc::new(HashMap::new())))
}

fn register(name: String, handle: ServerHandle) -> Result<(), Error> {
    let table = servers();
    let mut guard = table.write();
    if guard.contains_key(&name) {
        return Err(Error::Configuration(format!(
            "server name {:?} already registered",
            name
        )));
    }
    let mut next = HashMap::clone(&guard);
    next.insert(name, handle);
    *guard = Arc::new(next);
    Ok(())
}

fn deregister(name: &str) {
    let table = servers();
    let mut guard = table.write();
    if guard.contains_key(name) {
        let mut next = HashMap::clone(&guard);
        next.remove(name);
        *guard = Arc::new(next);
    }
}

/// Looks up a named server registered in this process.
pub fn named(name: &str) -> Option<ServerHandle> {
    let snapshot = Arc::clone(&servers().read());
    snapshot.get(name).cloned()
}

/// A cloneable handle to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl ServerHandle {
    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Begins graceful shutdown.
    ///
    /// The serve loop stops accepting, drains in-flight calls up to the
    /// configured drain timeout, cancels the rest with `UNAVAILABLE` and
    /// returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// A bound gRPC server.
///
/// Created with [`Server::bind`]; [`Server::serve`] runs the accept loop
/// to completion.
pub struct Server {
    listener: TcpListener,
    security: ServerSecurity,
    dispatcher: Arc<Dispatcher>,
    root_ctx: Context,
    shutdown: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    drain_timeout: Duration,
    name: Option<String>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("name", &self.name)
            .finish()
    }
}

impl Server {
    /// Binds the listener and builds the dispatch registry.
    ///
    /// A bind failure is fatal. If the configuration names the server,
    /// the name is claimed in the process-wide registry; a duplicate name
    /// is a configuration error.
    pub async fn bind(config: ServerConfig) -> Result<Self, Error> {
        let listener =
            TcpListener::bind(config.listen_addr)
                .await
                .map_err(|source| TransportError::BindFailed {
                    address: config.listen_addr.to_string(),
                    source,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::BindFailed {
                address: config.listen_addr.to_string(),
                source,
            })?;

        let registry = Registry::build(config.services);
        debug!(
            %local_addr,
            methods = registry.len(),
            "built dispatch registry"
        );
        let dispatcher = Arc::new(Dispatcher {
            registry,
            unary: UnaryChain::new(config.unary_interceptors),
            streaming: StreamChain::new(config.stream_interceptors),
            stats: config.stats_handler,
            max_recv_message_size: config.max_recv_message_size,
            preferred_encoding: config.default_encoding,
        });

        let (shutdown, _) = watch::channel(false);
        let server = Self {
            listener,
            security: config.security,
            dispatcher,
            root_ctx: Context::background(),
            shutdown,
            active: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            drain_timeout: config.drain_timeout,
            name: config.name,
            local_addr,
        };
        if let Some(name) = &server.name {
            register(name.clone(), server.handle())?;
        }
        Ok(server)
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle for triggering shutdown from elsewhere.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            local_addr: self.local_addr,
        }
    }

    /// Runs the accept loop until shutdown, then drains.
    pub async fn serve(self) -> Result<(), Error> {
        let Self {
            listener,
            security,
            dispatcher,
            root_ctx,
            shutdown,
            active,
            idle,
            drain_timeout,
            name,
            local_addr,
        } = self;

        let acceptor = match &security {
            ServerSecurity::Plaintext => None,
            ServerSecurity::Tls(tls) => Some(TlsAcceptor::from(Arc::clone(tls))),
        };
        let mut shutdown_rx = shutdown.subscribe();
        info!(%local_addr, "server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        trace!(%peer, "accepted connection");
                        let _ = socket.set_nodelay(true);
                        let dispatcher = Arc::clone(&dispatcher);
                        let server_ctx = root_ctx.clone();
                        let shutdown_rx = shutdown.subscribe();
                        let active = Arc::clone(&active);
                        let idle = Arc::clone(&idle);
                        match &acceptor {
                            None => {
                                tokio::spawn(serve_connection(
                                    socket, dispatcher, server_ctx, shutdown_rx, active, idle,
                                ));
                            }
                            Some(acceptor) => {
                                let acceptor = acceptor.clone();
                                tokio::spawn(async move {
                                    match acceptor.accept(socket).await {
                                        Ok(tls) => {
                                            serve_connection(
                                                tls, dispatcher, server_ctx, shutdown_rx, active,
                                                idle,
                                            )
                                            .await;
                                        }
                                        Err(error) => {
                                            debug!(%peer, %error, "tls handshake failed");
                                        }
                                    }
                                });
                            }
                        }
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        debug!(%local_addr, "draining in-flight calls");
        let drained = tokio::time::timeout(drain_timeout, wait_idle(&active, &idle)).await;
        if drained.is_err() {
            warn!(
                remaining = active.load(Ordering::SeqCst),
                "drain deadline reached, cancelling remaining calls"
            );
            root_ctx.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(1), wait_idle(&active, &idle)).await;
        }
        if let Some(name) = &name {
            deregister(name);
        }
        info!(%local_addr, "server stopped");
        Ok(())
    }
}

/// Waits until no calls are in flight.
async fn wait_idle(active: &AtomicUsize, idle: &Notify) {
    loop {
        let mut notified = pin!(idle.notified());
        notified.as_mut().enable();
        if active.load(Ordering::SeqCst) == 0 {
            return;
        }
        notified.await;
    }
}

/// Serves one HTTP/2 connection: handshake, then accept streams until the
/// peer goes away or shutdown drains the connection.
async fn serve_connection<IO>(
    io: IO,
    dispatcher: Arc<Dispatcher>,
    server_ctx: Context,
    mut shutdown: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = match h2::server::handshake(io).await {
        Ok(conn) => conn,
        Err(error) => {
            debug!(%error, "http/2 handshake failed");
            return;
        }
    };

    let mut draining = *shutdown.borrow();
    if draining {
        conn.graceful_shutdown();
    }
    loop {
        let accepted = if draining {
            conn.accept().await
        } else {
            tokio::select! {
                accepted = conn.accept() => accepted,
                _ = shutdown.changed() => {
                    draining = true;
                    conn.graceful_shutdown();
                    continue;
                }
            }
        };
        match accepted {
            Some(Ok((request, respond))) => {
                active.fetch_add(1, Ordering::SeqCst);
                let dispatcher = Arc::clone(&dispatcher);
                let ctx = server_ctx.clone();
                let active = Arc::clone(&active);
                let idle = Arc::clone(&idle);
                tokio::spawn(async move {
                    dispatcher.dispatch(request, respond, ctx).await;
                    if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                        idle.notify_waiters();
                    }
                });
            }
            Some(Err(error)) => {
                debug!(%error, "connection closing on error");
                break;
            }
            None => break,
        }
    }
}
