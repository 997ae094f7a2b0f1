//! In-process [`Store`] used by the binary and the tests.
//!
//! Passwords are compared as given. Hashing belongs to a real backing store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};

use crate::{Store, StoreError, StoredMessage};

#[derive(Debug)]
struct UserRow {
    password: String,
    history_limit: Option<u32>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<String, UserRow>,
    messages: BTreeMap<i64, StoredMessage>,
    last_id: i64,
}

/// A [`Store`] kept entirely in memory behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    async fn register(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if tables.users.contains_key(username) {
            return Err(StoreError::UserExists(username.to_string()));
        }
        tables.users.insert(
            username.to_string(),
            UserRow {
                password: password.to_string(),
                history_limit: None,
            },
        );
        Ok(())
    }

    async fn verify_credentials(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables()
            .users
            .get(username)
            .is_some_and(|user| user.password == password))
    }

    async fn delete_account(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.tables().users.remove(username).is_some())
    }

    async fn insert_message(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut tables = self.tables();
        tables.last_id += 1;
        let message = StoredMessage {
            id: tables.last_id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            read: false,
        };
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let tables = self.tables();
        let mut recent: Vec<StoredMessage> = tables
            .messages
            .values()
            .rev()
            .filter(|m| m.read && (m.sender == username || m.receiver == username))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn unread_messages(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .tables()
            .messages
            .values()
            .filter(|m| !m.read && m.receiver == username)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_as_read(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut tables = self.tables();
        for id in ids {
            if let Some(message) = tables.messages.get_mut(id) {
                message.read = true;
            }
        }
        Ok(())
    }

    async fn history_limit(&self, username: &str) -> Result<Option<u32>, StoreError> {
        Ok(self
            .tables()
            .users
            .get(username)
            .and_then(|user| user.history_limit))
    }

    async fn set_history_limit(&self, username: &str, limit: u32) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let user = tables
            .users
            .get_mut(username)
            .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;
        user.history_limit = Some(limit);
        Ok(())
    }

    async fn delete_message(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables().messages.remove(&id).is_some())
    }

    async fn users_except(&self, username: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables()
            .users
            .keys()
            .filter(|name| name.as_str() != username)
            .cloned()
            .collect())
    }
}
