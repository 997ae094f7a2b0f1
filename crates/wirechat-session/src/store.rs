//! The storage collaborator.
//!
//! Wirechat does not own persistence. It defines the [`Store`] trait: a
//! handful of keyed CRUD calls over users and messages. The server is
//! generic over it, so a database-backed store, the in-process
//! [`MemoryStore`](crate::MemoryStore), or a test double all plug in the
//! same way.

use std::future::Future;

use crate::StoreError;

/// One stored direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub read: bool,
}

/// Users, credentials, and messages.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → one store is shared by every connection task.
/// - Each method's future is `Send` so handlers can run on any runtime
///   worker thread.
pub trait Store: Send + Sync + 'static {
    /// Creates a user. Fails with [`StoreError::UserExists`] if taken.
    fn register(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Whether the username exists and the password matches.
    fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Removes a user. Returns whether the user existed.
    fn delete_account(&self, username: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Stores an unread message and assigns its id and timestamp.
    fn insert_message(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> impl Future<Output = Result<StoredMessage, StoreError>> + Send;

    /// The latest `limit` read messages sent or received by `username`,
    /// oldest first.
    fn recent_messages(
        &self,
        username: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, StoreError>> + Send;

    /// The first `limit` unread messages addressed to `username`, oldest
    /// first.
    fn unread_messages(
        &self,
        username: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, StoreError>> + Send;

    /// Flags the given messages as read. Unknown ids are ignored.
    fn mark_as_read(&self, ids: &[i64]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// The user's preferred history size, if they set one.
    fn history_limit(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send;

    fn set_history_limit(
        &self,
        username: &str,
        limit: u32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes one message. Returns whether it existed.
    fn delete_message(&self, id: i64) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Every username except `username`, sorted.
    fn users_except(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}
