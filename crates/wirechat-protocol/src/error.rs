//! Error types for the protocol layer.
//!
//! Each kind of failure gets its own enum. A `ProtocolError` means one
//! payload could not be encoded or decoded; the session replies with an
//! error envelope and keeps going. A `SchemaError` means the schema itself
//! is unusable and the server should not start. A `RequestError` is a
//! well-formed message whose fields fail validation.

/// Errors from encoding or decoding one message payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing an envelope to JSON failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a JSON object.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope has no `action` key.
    #[error("envelope has no action")]
    MissingAction,

    /// The schema declares no action with this name.
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// The schema declares no action with this id.
    #[error("unknown action id {0}")]
    UnknownActionId(u8),

    /// A field the schema declares is absent from the envelope.
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// A field value does not match its declared type.
    #[error("field '{field}' should be {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    /// A string longer than the u16 length prefix allows.
    #[error("field '{field}' is {len} bytes, over the 65535 byte limit")]
    StringTooLong { field: String, len: usize },

    /// A list longer than the u16 count prefix allows.
    #[error("field '{field}' has {len} elements, over the 65535 element limit")]
    ListTooLong { field: String, len: usize },

    /// An integer outside the i32 range.
    #[error("field '{field}' value {value} does not fit in 32 bits")]
    IntOutOfRange { field: String, value: String },

    /// The payload ended before a field was complete.
    #[error("payload ended inside '{field}': needed {needed} bytes, {remaining} left")]
    Underrun {
        field: String,
        needed: usize,
        remaining: usize,
    },

    /// String bytes that are not UTF-8.
    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: String },

    /// Bytes left over after the last declared field.
    #[error("{0} trailing bytes after the last field")]
    TrailingBytes(usize),
}

/// Errors from loading or validating a schema document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid schema document: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("schema declares no actions")]
    NoActions,

    #[error("action '{0}' is declared twice")]
    DuplicateAction(String),

    #[error("actions '{first}' and '{second}' share id {id}")]
    DuplicateId { id: u8, first: String, second: String },

    #[error("field '{field}' is declared twice in '{action}'")]
    DuplicateField { action: String, field: String },

    #[error("list '{0}' has no items type")]
    MissingItems(String),

    #[error("object '{0}' has no fields")]
    MissingFields(String),

    #[error("action '{0}' declares a field named 'action'")]
    ReservedField(String),

    /// A keyed-layout message with no entry in `action_ids`.
    #[error("action '{0}' has no id in action_ids")]
    MissingId(String),

    /// The schema does not cover every action the server speaks.
    #[error("schema is missing actions: {0:?}")]
    MissingActions(Vec<String>),
}

/// A request whose fields fail validation.
///
/// The display text is what the client sees in the error reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Username and password are required for {0}.")]
    MissingCredentials(&'static str),

    #[error("Receiver username is required.")]
    MissingReceiver,

    #[error("Empty message cannot be sent.")]
    EmptyMessage,

    #[error("'message_ids' should be a list.")]
    IdsNotList,

    #[error("All 'message_ids' should be integers.")]
    IdsNotIntegers,

    #[error("Number of unread messages is required.")]
    MissingUnreadCount,

    #[error("'n_unread_messages' must be a positive integer.")]
    InvalidUnreadCount,

    #[error("Invalid message ID format.")]
    InvalidMessageId,
}
