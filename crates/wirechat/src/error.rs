//! Unified error type for the Wirechat server.

use wirechat_protocol::{ProtocolError, SchemaError};
use wirechat_session::StoreError;
use wirechat_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so `?`
/// converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A transport-level error (bind, handshake, framing, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The schema failed to load or does not cover the action surface.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Startup configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
