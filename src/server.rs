//! TCP listener and connection lifecycle.
//!
//! Binds the listening socket, accepts connections, registers each one and
//! spawns a handler task for it. `stop()` clears the running flag and shuts
//! down every registered socket.

use crate::config::Config;
use crate::error::ServerError;
use crate::protocols::mqtt::ConnectionHandler;
use crate::runtime::{Connection, ConnectionInfo, ConnectionRegistry, Lifecycle, ServerState};
use chrono::Utc;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Server instance. Clones share the same state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    lifecycle: Lifecycle,
    registry: ConnectionRegistry,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let registry = ConnectionRegistry::new(config.max_connections);

        Server {
            inner: Arc::new(Inner {
                config,
                lifecycle: Lifecycle::new(),
                registry,
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.state()
    }

    /// Connections currently in the registry.
    pub fn live_connections(&self) -> Vec<ConnectionInfo> {
        self.inner.registry.snapshot()
    }

    /// Bind and serve until stopped.
    ///
    /// A bind failure leaves the server in `NotStarted`, so this may be called
    /// again. The accept loop always finishes with [`Server::stop`].
    pub async fn start(&self) -> Result<(), ServerError> {
        match self.state() {
            ServerState::NotStarted => {}
            ServerState::Running => return Err(ServerError::AlreadyStarted),
            ServerState::Stopped => return Err(ServerError::Stopped),
        }

        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Create the listening socket. Must be called within a Tokio runtime.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let config = &self.inner.config;
        let addr = resolve(&config.host, config.port)?;

        let listener = create_listener(addr, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(listener)
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.inner.lifecycle.begin()?;

        match listener.local_addr() {
            Ok(addr) => info!(
                address = %addr,
                max_connections = ?self.inner.registry.capacity(),
                "MQTT server listening"
            ),
            Err(_) => info!(address = %self.inner.config.listen_addr(), "MQTT server listening"),
        }

        self.accept_loop(&listener).await;
        drop(listener);

        self.stop();
        Ok(())
    }

    /// Stop accepting and close every registered connection.
    ///
    /// Safe to call repeatedly and concurrently. Returns the number of
    /// connections this call closed.
    pub fn stop(&self) -> usize {
        let transitioned = self.inner.lifecycle.halt();
        let closed = self.inner.registry.close_all();

        if transitioned {
            info!(closed, "MQTT server stopped");
        } else if closed > 0 {
            debug!(closed, "Closed late connections");
        }

        closed
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        let accept_timeout = self.inner.config.accept_timeout();

        while self.inner.lifecycle.is_running() {
            match tokio::time::timeout(accept_timeout, listener.accept()).await {
                // Bounded wait elapsed, re-check the running flag
                Err(_) => continue,
                Ok(Ok((stream, peer))) => self.admit(stream, peer),
                Ok(Err(e)) => {
                    if self.inner.lifecycle.is_running() {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    /// Register an accepted socket and spawn its handler.
    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if !self.inner.lifecycle.is_running() {
            debug!(peer = %peer, "Dropping connection accepted during shutdown");
            return;
        }

        let handle = match shutdown_handle(&stream) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to duplicate socket handle");
                return;
            }
        };

        let conn = match self.inner.registry.register(peer, handle) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Rejecting connection");
                return;
            }
        };

        // stop() may have swept the registry between the check above and
        // registration
        if !self.inner.lifecycle.is_running() {
            self.inner.registry.close(&conn);
            return;
        }

        info!(
            peer = %peer,
            conn_id = conn.id(),
            live = self.inner.registry.len(),
            "Client connected"
        );

        let server = self.clone();
        tokio::spawn(async move {
            server.handle_connection(stream, conn).await;
        });
    }

    /// Handler task body: run the state machine, then close and deregister.
    async fn handle_connection(self, stream: TcpStream, conn: Arc<Connection>) {
        let lifecycle = &self.inner.lifecycle;
        let mut handler =
            ConnectionHandler::new(stream, conn.peer(), self.inner.config.read_buffer_size);

        let result = handler
            .run(|| lifecycle.is_running() && conn.is_connected())
            .await;

        if let Err(e) = &result {
            if e.is_rejection() || !conn.is_connected() {
                debug!(peer = %conn.peer(), error = %e, "Connection ended");
            } else {
                warn!(peer = %conn.peer(), error = %e, "Connection error");
            }
        }

        debug!(peer = %conn.peer(), state = ?handler.state(), "Handler finished");
        drop(handler);
        if !self.inner.registry.close(&conn) {
            debug!(peer = %conn.peer(), "Connection already closed by stop");
        }

        let duration = Utc::now() - conn.connected_at();
        info!(
            peer = %conn.peer(),
            conn_id = conn.id(),
            duration_ms = duration.num_milliseconds(),
            "Client disconnected"
        );
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let addr = format!("{host}:{port}");
    (host, port)
        .to_socket_addrs()
        .and_then(|mut addrs| {
            addrs.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "no addresses resolved")
            })
        })
        .map_err(|source| ServerError::Address { addr, source })
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Second OS handle to the same socket, kept by the registry for forced
/// shutdown.
fn shutdown_handle(stream: &TcpStream) -> io::Result<std::net::TcpStream> {
    let socket = socket2::SockRef::from(stream).try_clone()?;
    Ok(socket.into())
}
