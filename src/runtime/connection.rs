//! Live connection tracking.
//!
//! Each accepted socket gets a [`Connection`] entry in the shared
//! [`ConnectionRegistry`]. The handler task owns the async stream; the
//! registry keeps a duplicated OS handle so the socket can be shut down from
//! outside the task, which fails the task's pending read.

use crate::error::AdmissionError;
use chrono::{DateTime, Utc};
use slab::Slab;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Slab key of a registered connection.
pub type ConnectionId = usize;

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    connected: AtomicBool,
    /// Duplicate of the handler's socket, used only for forced shutdown.
    socket: TcpStream,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Shut down both directions of the socket. Only the first call acts.
    fn shutdown(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            match self.socket.shutdown(Shutdown::Both) {
                Ok(()) => {}
                // Peer already gone
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                Err(e) => debug!(peer = %self.peer, error = %e, "Socket shutdown failed"),
            }
        }
    }
}

/// Point-in-time description of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Registry of active connections using slab allocation.
///
/// All access goes through one mutex. An entry is removed only after its
/// socket has been shut down.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Mutex<Slab<Arc<Connection>>>,
    max_connections: Option<usize>,
}

impl ConnectionRegistry {
    /// Create a registry. `None` means no admission limit.
    pub fn new(max_connections: Option<usize>) -> Self {
        Self {
            connections: Mutex::new(Slab::new()),
            max_connections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slab<Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly accepted socket.
    ///
    /// `socket` must be a handle to the same OS socket the handler reads from.
    pub fn register(
        &self,
        peer: SocketAddr,
        socket: TcpStream,
    ) -> Result<Arc<Connection>, AdmissionError> {
        let mut connections = self.lock();

        if let Some(capacity) = self.max_connections {
            if connections.len() >= capacity {
                return Err(AdmissionError::Full { capacity });
            }
        }

        let entry = connections.vacant_entry();
        let conn = Arc::new(Connection {
            id: entry.key(),
            peer,
            connected_at: Utc::now(),
            connected: AtomicBool::new(true),
            socket,
        });
        entry.insert(Arc::clone(&conn));
        Ok(conn)
    }

    /// Shut down `conn` and remove it.
    ///
    /// Returns `false` if it was already removed, e.g. by [`close_all`].
    /// The slab slot is identity-checked so a stale handle never closes a
    /// newer connection that reused the same id.
    ///
    /// [`close_all`]: ConnectionRegistry::close_all
    pub fn close(&self, conn: &Arc<Connection>) -> bool {
        let mut connections = self.lock();

        match connections.get(conn.id) {
            Some(entry) if Arc::ptr_eq(entry, conn) => {
                conn.shutdown();
                connections.remove(conn.id);
                true
            }
            _ => {
                conn.shutdown();
                false
            }
        }
    }

    /// Shut down and remove every registered connection.
    pub fn close_all(&self) -> usize {
        let mut connections = self.lock();
        for (_, conn) in connections.iter() {
            conn.shutdown();
        }
        let count = connections.len();
        connections.clear();
        count
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.max_connections
    }

    /// Snapshot of all live connections, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.lock()
            .iter()
            .map(|(id, conn)| ConnectionInfo {
                id,
                peer: conn.peer,
                connected_at: conn.connected_at,
            })
            .collect()
    }
}
