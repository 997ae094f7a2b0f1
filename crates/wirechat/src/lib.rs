//! # Wirechat
//!
//! Real-time direct-message chat over WebSocket.
//!
//! Clients exchange one JSON or schema-driven binary envelope per text
//! frame. The server routes each envelope by its `action`, keeps track of
//! who is online, and pushes messages straight to an online receiver.
//! Persistence is an injected [`Store`](wirechat_session::Store).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wirechat::prelude::*;
//!
//! # async fn start() -> Result<(), ChatError> {
//! let server = ChatServerBuilder::new()
//!     .bind("0.0.0.0:8000")
//!     .build(MemoryStore::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod router;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::ChatError;
pub use router::{ActionRouter, Flow};
pub use server::{ChatServer, ChatServerBuilder};

/// Re-exports for typical server setup and tests.
pub mod prelude {
    pub use crate::{ChatError, ChatServer, ChatServerBuilder, ServerConfig};
    pub use wirechat_protocol::{
        Action, BinaryCodec, Codec, Envelope, JsonCodec, Reply, Schema, WireCodec, WireMode,
    };
    pub use wirechat_session::{MemoryStore, PresenceRegistry, Store, StoreError};
    pub use wirechat_transport::{Connection, ConnectionId, TransportError};
}
