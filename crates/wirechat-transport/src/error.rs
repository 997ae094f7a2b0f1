/// Errors that can occur in the transport layer.
///
/// Every variant is fatal to the connection it came from: the session loop
/// stops reading and runs its cleanup. Nothing here is reported to the peer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// An inbound frame was malformed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The HTTP upgrade exchange failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// No data arrived within the configured idle timeout.
    #[error("peer idle for longer than the read timeout")]
    Timeout,
}

/// A malformed frame header or payload.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared payload is larger than this connection accepts.
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: u64, max: u64 },

    /// A 64-bit length with the most significant bit set.
    #[error("invalid 64-bit payload length {0:#x}")]
    InvalidLength(u64),

    /// Reading the frame from the stream failed.
    #[error("frame read failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Reasons an upgrade request is refused.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The request line or a header line could not be parsed.
    #[error("malformed upgrade request: {0}")]
    MalformedRequest(String),

    /// The `Sec-WebSocket-Key` header is absent or empty.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The request did not terminate within the read bound.
    #[error("upgrade request exceeds {0} bytes")]
    TooLarge(usize),

    /// The peer closed the stream before finishing the request.
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// Reading the request or writing the response failed.
    #[error("handshake io failed: {0}")]
    Io(#[source] std::io::Error),
}
