//! Per-connection session state.
//!
//! A session is created when a connection finishes its upgrade and lives
//! until the read loop exits. It is owned by that connection's task and is
//! never shared; other tasks only ever see the connection handle, through
//! the [`PresenceRegistry`](crate::PresenceRegistry).

use std::net::SocketAddr;
use std::sync::Arc;

use wirechat_transport::{Connection, ConnectionId};

/// Whether the session has logged in, and as whom.
///
/// ```text
///   Anonymous ──(login)──→ Authenticated ──(delete_account)──→ Anonymous
///                              │    ↑
///                              └────┘ (login as someone else)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated { identity: String },
}

/// One connection's state.
pub struct Session<C> {
    conn: Arc<C>,
    remote_addr: SocketAddr,
    auth: AuthState,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: Arc<C>) -> Self {
        let remote_addr = conn.remote_addr();
        Self {
            conn,
            remote_addr,
            auth: AuthState::Anonymous,
        }
    }

    /// The handle registered in presence on login.
    pub fn connection(&self) -> &Arc<C> {
        &self.conn
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn identity(&self) -> Option<&str> {
        match &self.auth {
            AuthState::Authenticated { identity } => Some(identity),
            AuthState::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated { .. })
    }

    /// Marks the session as `identity`, returning the identity it replaced.
    pub fn login(&mut self, identity: impl Into<String>) -> Option<String> {
        let previous = std::mem::replace(
            &mut self.auth,
            AuthState::Authenticated {
                identity: identity.into(),
            },
        );
        match previous {
            AuthState::Authenticated { identity } => Some(identity),
            AuthState::Anonymous => None,
        }
    }

    /// Drops back to anonymous, returning the identity that was active.
    pub fn logout(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.auth, AuthState::Anonymous) {
            AuthState::Authenticated { identity } => Some(identity),
            AuthState::Anonymous => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use wirechat_transport::TransportError;

    use super::*;

    struct StubConn;

    impl Connection for StubConn {
        async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            ConnectionId::new(9)
        }

        fn remote_addr(&self) -> SocketAddr {
            SocketAddr::from(([10, 0, 0, 1], 4242))
        }
    }

    #[test]
    fn test_new_session_is_anonymous() {
        let session = Session::new(Arc::new(StubConn));
        assert!(!session.is_authenticated());
        assert_eq!(session.identity(), None);
        assert_eq!(session.id(), ConnectionId::new(9));
        assert_eq!(session.remote_addr().port(), 4242);
    }

    #[test]
    fn test_login_replaces_identity() {
        let mut session = Session::new(Arc::new(StubConn));
        assert_eq!(session.login("alice"), None);
        assert_eq!(session.identity(), Some("alice"));

        assert_eq!(session.login("bob"), Some("alice".to_string()));
        assert_eq!(
            session.auth(),
            &AuthState::Authenticated {
                identity: "bob".into()
            }
        );
    }

    #[test]
    fn test_logout_returns_identity() {
        let mut session = Session::new(Arc::new(StubConn));
        session.login("alice");
        assert_eq!(session.logout(), Some("alice".to_string()));
        assert_eq!(session.logout(), None);
        assert!(!session.is_authenticated());
    }
}
