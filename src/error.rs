//! Error types shared across the server.
//!
//! Per-connection failures ([`ConnectionError`]) never leave the task that
//! owns the connection. Only [`ServerError`] reaches the caller of
//! `Server::start`.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Startup and lifecycle failures. These propagate to whoever started the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{addr}': {source}")]
    Address { addr: String, source: io::Error },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("server is already running")]
    AlreadyStarted,

    #[error("server has been stopped and cannot be restarted")]
    Stopped,
}

/// Why a single connection ended abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("peer closed before sending CONNECT")]
    ClosedBeforeConnect,

    #[error("first packet was not CONNECT (control type {control_type:#x})")]
    NotConnect { control_type: u8 },
}

impl ConnectionError {
    /// True for protocol rejections, false for transport failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ConnectionError::ClosedBeforeConnect | ConnectionError::NotConnect { .. }
        )
    }
}

/// Classification failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
}

/// Registration refused by the admission limit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("connection limit reached ({capacity})")]
    Full { capacity: usize },
}
