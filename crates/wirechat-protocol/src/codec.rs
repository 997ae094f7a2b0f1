//! The [`Codec`] trait and the runtime-selected wire format.
//!
//! Two payload formats exist: a plain JSON object ([`JsonCodec`]) and the
//! schema-driven [`BinaryCodec`](crate::BinaryCodec). Both produce and
//! consume the same [`Envelope`], so nothing above the codec knows which
//! one is in use.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::{BinaryCodec, Envelope, ProtocolError, Schema};

/// Converts envelopes to frame payloads and back.
///
/// `Send + Sync + 'static` because one codec is shared by every connection
/// task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes an envelope into a frame payload.
    ///
    /// # Errors
    /// Fails without producing output when the envelope cannot be
    /// represented in this format.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a frame payload into an envelope.
    fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that sends the envelope as a UTF-8 JSON object, relying on
/// the frame for the payload length.
///
/// ```rust
/// use wirechat_protocol::{Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::new("echo").with("message", "hi");
///
/// let bytes = codec.encode(&envelope).unwrap();
/// assert_eq!(codec.decode(&bytes).unwrap(), envelope);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(envelope).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// Runtime selection
// ---------------------------------------------------------------------------

/// Which payload format a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    #[default]
    Json,
    Binary,
}

impl FromStr for WireMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown wire mode '{other}', expected json or binary")),
        }
    }
}

impl fmt::Display for WireMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// The codec a server picked at startup.
#[derive(Debug, Clone)]
pub enum WireCodec {
    Json(JsonCodec),
    Binary(BinaryCodec),
}

impl WireCodec {
    pub fn new(mode: WireMode, schema: Arc<Schema>) -> Self {
        match mode {
            WireMode::Json => Self::Json(JsonCodec),
            WireMode::Binary => Self::Binary(BinaryCodec::new(schema)),
        }
    }

    pub fn mode(&self) -> WireMode {
        match self {
            Self::Json(_) => WireMode::Json,
            Self::Binary(_) => WireMode::Binary,
        }
    }
}

impl Codec for WireCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Json(codec) => codec.encode(envelope),
            Self::Binary(codec) => codec.encode(envelope),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        match self {
            Self::Json(codec) => codec.decode(data),
            Self::Binary(codec) => codec.decode(data),
        }
    }
}
