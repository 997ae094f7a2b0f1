//! Wire protocol for Wirechat.
//!
//! This crate defines what travels inside a frame payload:
//!
//! - **Envelope** ([`Envelope`]): the action-tagged message every layer
//!   above the codec works with.
//! - **Schema** ([`Schema`]): the typed action table that drives the binary
//!   format, loaded once and shared read-only.
//! - **Codecs** ([`Codec`] trait, [`JsonCodec`], [`BinaryCodec`],
//!   [`WireCodec`]): envelope to bytes and back.
//! - **Messages** ([`Action`], [`Request`], [`Reply`]): the closed set of
//!   things a client can ask for and the server can answer.
//!
//! ```text
//! Transport (frame payload) → Protocol (Envelope → Request) → Router
//! ```

mod binary;
mod codec;
mod envelope;
mod error;
mod message;
mod schema;

pub use binary::{BinaryCodec, MAX_WIRE_LEN};
pub use codec::{Codec, JsonCodec, WireCodec, WireMode};
pub use envelope::{Envelope, ACTION_KEY};
pub use error::{ProtocolError, RequestError, SchemaError};
pub use message::{Action, ChatMessage, Reply, Request};
pub use schema::{ActionSpec, FieldSpec, FieldType, Schema};
