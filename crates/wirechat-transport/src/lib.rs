//! Transport layer for Wirechat.
//!
//! Provides the [`Transport`], [`Upgrade`] and [`Connection`] traits plus a
//! WebSocket implementation written directly against TCP: the HTTP upgrade
//! lives in [`handshake`] and RFC 6455 framing in [`frame`].
//!
//! # Feature Flags
//!
//! - `websocket` (default): the TCP listener and handshake (pulls in
//!   `sha1` and `base64` for the accept token)

use std::future::Future;
use std::net::SocketAddr;

mod error;
pub mod frame;
#[cfg(feature = "websocket")]
pub mod handshake;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::{FrameError, HandshakeError, TransportError};
#[cfg(feature = "websocket")]
pub use websocket::{PendingUpgrade, TransportConfig, WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Two handles for the same identity are told apart by this id, which is
/// what lets presence cleanup avoid evicting a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// An accepted stream still waiting for its upgrade.
    type Pending: Upgrade;

    /// Waits for and accepts the next incoming stream.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Pending, TransportError>> + Send;

    /// The address the listener is bound to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// A stream between accept and a completed handshake.
pub trait Upgrade: Send + 'static {
    /// The connection produced by a successful negotiation.
    type Connection: Connection;

    fn id(&self) -> ConnectionId;

    fn remote_addr(&self) -> SocketAddr;

    /// Performs the handshake. Failure is final; the stream is dropped.
    fn negotiate(
        self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that can send and receive message payloads.
///
/// `send` may be called from any task, concurrently with the owner's
/// `recv`; implementations serialize writes internally.
pub trait Connection: Send + Sync + 'static {
    /// Sends one message payload to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message payload from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is closed, by a close frame or
    /// by the peer hanging up.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    fn remote_addr(&self) -> SocketAddr;
}
