//! The live identity → connection table used for direct delivery.
//!
//! # Concurrency note
//!
//! Every operation takes the one lock for its whole read-modify-write and
//! never awaits while holding it. Callers get a cloned `Arc` back and do
//! their network writes after the lock is released, so a slow recipient
//! never stalls lookups for everyone else.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wirechat_transport::{Connection, ConnectionId};

/// Shared map from logged-in identity to that identity's connection.
///
/// At most one entry per identity. A login on a second connection replaces
/// the first; removal is conditional on the caller still owning the slot.
pub struct PresenceRegistry<C> {
    slots: Mutex<HashMap<String, Arc<C>>>,
}

impl<C: Connection> PresenceRegistry<C> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// A panic elsewhere cannot leave the map half-updated, so a poisoned
    /// lock is still safe to use.
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<C>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `conn` as the live connection for `identity`.
    ///
    /// Returns the connection it displaced, if that was a different one.
    pub fn insert(&self, identity: &str, conn: Arc<C>) -> Option<Arc<C>> {
        let id = conn.id();
        let previous = self.slots().insert(identity.to_string(), conn);
        tracing::info!(%identity, conn_id = %id, "presence registered");
        previous.filter(|old| old.id() != id)
    }

    /// The live connection for `identity`, if online.
    pub fn lookup(&self, identity: &str) -> Option<Arc<C>> {
        self.slots().get(identity).cloned()
    }

    /// Removes `identity` only if its slot still belongs to `owner`.
    ///
    /// Returns whether an entry was removed. A `false` here is normal when
    /// the identity has since logged in on another connection.
    pub fn remove_if_owned(&self, identity: &str, owner: ConnectionId) -> bool {
        let mut slots = self.slots();
        let owned = slots
            .get(identity)
            .is_some_and(|conn| conn.id() == owner);
        if owned {
            slots.remove(identity);
            tracing::info!(%identity, conn_id = %owner, "presence removed");
        } else {
            tracing::debug!(%identity, conn_id = %owner, "presence slot owned elsewhere, kept");
        }
        owned
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.slots().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

impl<C: Connection> Default for PresenceRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
