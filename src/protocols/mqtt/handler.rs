//! MQTT connection handler.
//!
//! Drives one connection through `AwaitingConnect -> Connected -> Closed`.
//! Each read is treated as exactly one packet. Closing the socket and
//! removing the connection from the registry is left to the caller once
//! [`ConnectionHandler::run`] returns.

use super::parser::{classify, inspect_publish, puback, Hex, Packet, CONNACK_ACCEPTED};
use crate::error::ConnectionError;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Per-connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    AwaitingConnect,
    Connected,
    Closed,
}

pub struct ConnectionHandler<S> {
    stream: S,
    peer: SocketAddr,
    state: HandlerState,
    buffer: BytesMut,
    read_size: usize,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, read_size: usize) -> Self {
        Self {
            stream,
            peer,
            state: HandlerState::AwaitingConnect,
            buffer: BytesMut::with_capacity(read_size),
            read_size,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Run the state machine until the connection reaches `Closed`.
    ///
    /// `active` is polled before every read in the `Connected` state; it
    /// combines the server's running flag with the connection's own flag.
    /// Peer EOF after the handshake and a cleared `active` both end with
    /// `Ok(())`.
    pub async fn run<F>(&mut self, active: F) -> Result<(), ConnectionError>
    where
        F: Fn() -> bool,
    {
        let result = self.drive(active).await;
        self.state = HandlerState::Closed;
        result
    }

    async fn drive<F>(&mut self, active: F) -> Result<(), ConnectionError>
    where
        F: Fn() -> bool,
    {
        self.handshake().await?;

        while active() {
            let n = self.read_packet().await?;
            if n == 0 {
                debug!(peer = %self.peer, "Peer closed connection");
                return Ok(());
            }

            let packet = match classify(&self.buffer) {
                Ok(packet) => packet,
                Err(_) => return Ok(()),
            };
            self.log_packet(&packet);

            match packet {
                Packet::Publish { ack_id } => {
                    self.stream.write_all(&puback(ack_id)).await?;
                    debug!(peer = %self.peer, ack_id = %Hex(&ack_id), "Sent PUBACK");
                }
                Packet::Connect | Packet::Other(_) => {
                    debug!(peer = %self.peer, kind = packet.name(), "Ignoring packet");
                }
            }
        }

        Ok(())
    }

    /// `AwaitingConnect`: only a CONNECT moves the connection forward.
    async fn handshake(&mut self) -> Result<(), ConnectionError> {
        let n = self.read_packet().await?;
        if n == 0 {
            warn!(peer = %self.peer, "No data received before close");
            return Err(ConnectionError::ClosedBeforeConnect);
        }

        let packet = classify(&self.buffer).map_err(|_| ConnectionError::ClosedBeforeConnect)?;
        self.log_packet(&packet);

        match packet {
            Packet::Connect => {
                self.stream.write_all(&CONNACK_ACCEPTED).await?;
                self.state = HandlerState::Connected;
                info!(peer = %self.peer, "Sent CONNACK, session accepted");
                Ok(())
            }
            Packet::Publish { .. } | Packet::Other(_) => {
                warn!(
                    peer = %self.peer,
                    kind = packet.name(),
                    bytes = %Hex(&self.buffer),
                    "First packet is not CONNECT, rejecting"
                );
                Err(ConnectionError::NotConnect {
                    control_type: packet.control_type(),
                })
            }
        }
    }

    /// One read into a cleared buffer. Returns bytes read; 0 means EOF.
    async fn read_packet(&mut self) -> Result<usize, ConnectionError> {
        self.buffer.clear();
        self.buffer.reserve(self.read_size);
        let n = (&mut self.stream)
            .take(self.read_size as u64)
            .read_buf(&mut self.buffer)
            .await?;
        Ok(n)
    }

    fn log_packet(&self, packet: &Packet) {
        debug!(
            peer = %self.peer,
            state = ?self.state,
            kind = packet.name(),
            bytes = %Hex(&self.buffer),
            "Received packet"
        );

        if let Some(view) = inspect_publish(&self.buffer) {
            debug!(
                peer = %self.peer,
                topic = view.topic,
                qos = view.qos,
                packet_id = ?view.packet_id,
                payload = %String::from_utf8_lossy(view.payload),
                "Publish contents"
            );
        }
    }
}
