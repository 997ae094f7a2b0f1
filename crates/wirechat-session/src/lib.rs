//! Session state and shared registries for Wirechat.
//!
//! This crate holds everything a connection knows about itself and the
//! state connections share:
//!
//! 1. **Session**: one connection's auth state and handle ([`Session`])
//! 2. **Presence**: who is online, and on which connection
//!    ([`PresenceRegistry`])
//! 3. **Storage**: the injected collaborator for users and messages
//!    ([`Store`] trait, [`MemoryStore`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Router (above)  ← reads and mutates sessions, consults presence and store
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Transport Layer (below)  ← provides Connection and ConnectionId
//! ```

mod error;
mod memory;
mod presence;
mod session;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use presence::PresenceRegistry;
pub use session::{AuthState, Session};
pub use store::{Store, StoredMessage};
