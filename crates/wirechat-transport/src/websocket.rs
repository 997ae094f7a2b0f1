//! WebSocket transport over raw TCP, framed by [`crate::frame`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::frame::{self, Frame, Inbound};
use crate::{handshake, Connection, ConnectionId, Transport, TransportError, Upgrade};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection limits shared by every accepted stream.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Inbound frames declaring a larger payload are a framing error.
    pub max_frame_bytes: u64,
    /// Deadline for the handshake and for each frame read. `None` waits
    /// forever.
    pub read_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024,
            read_timeout: None,
        }
    }
}

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: TransportConfig,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener, config })
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingUpgrade;

    async fn accept(&mut self) -> Result<PendingUpgrade, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, "accepted TCP connection");

        Ok(PendingUpgrade {
            id,
            addr,
            stream,
            config: self.config.clone(),
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// An accepted stream that has not completed the HTTP upgrade yet.
///
/// Negotiation happens in the connection's own task so a slow client never
/// holds up the accept loop.
pub struct PendingUpgrade {
    id: ConnectionId,
    addr: SocketAddr,
    stream: TcpStream,
    config: TransportConfig,
}

impl Upgrade for PendingUpgrade {
    type Connection = WebSocketConnection;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn negotiate(self) -> Result<WebSocketConnection, TransportError> {
        let (read_half, mut write_half) = self.stream.into_split();
        let mut reader = BufReader::new(read_half);

        let request = with_deadline(
            self.config.read_timeout,
            handshake::negotiate(&mut reader, &mut write_half),
        )
        .await?;
        tracing::debug!(id = %self.id, path = %request.path, "upgrade complete");

        Ok(WebSocketConnection {
            id: self.id,
            remote_addr: self.addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(write_half),
            config: self.config,
        })
    }
}

/// A single upgraded WebSocket connection.
///
/// The read half is only touched by the owning session task. The write half
/// sits behind its own lock because other sessions push routed messages
/// into it.
pub struct WebSocketConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    config: TransportConfig,
}

impl WebSocketConnection {
    async fn write_raw(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write_raw(&frame::encode_text(data)).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let next = with_deadline(
                self.config.read_timeout,
                frame::read_frame(&mut *reader, self.config.max_frame_bytes),
            )
            .await?;
            let Some(frame) = next else {
                return Ok(None);
            };

            match frame.into_inbound() {
                Inbound::Text(payload) => return Ok(Some(payload)),
                Inbound::Ping(payload) => {
                    self.write_raw(&Frame::pong(payload).encode()).await?;
                }
                Inbound::Close => return Ok(None),
                Inbound::Skipped(opcode) => {
                    tracing::debug!(id = %self.id, ?opcode, "skipping frame");
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        // The peer may already be gone; the shutdown below still matters.
        if let Err(e) = writer.write_all(&Frame::close().encode()).await {
            tracing::debug!(id = %self.id, error = %e, "close frame not delivered");
        }
        writer.shutdown().await.map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Runs `fut`, failing with [`TransportError::Timeout`] once `limit` elapses.
async fn with_deadline<T, E>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, TransportError>
where
    TransportError: From<E>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout),
        },
        None => Ok(fut.await?),
    }
}
