//! Error types for the session layer.

/// Errors reported by a [`Store`](crate::Store).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Registration picked a username that is taken.
    #[error("username '{0}' already exists")]
    UserExists(String),

    /// The operation names a user that does not exist.
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    /// The backing store could not complete the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
