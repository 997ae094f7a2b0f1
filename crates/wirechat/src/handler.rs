//! Per-connection handler: upgrade, read loop, and cleanup.
//!
//! Each accepted socket gets its own Tokio task running this handler.
//! The flow is:
//!   1. Negotiate the WebSocket upgrade
//!   2. Loop: receive text payloads → route through the [`ActionRouter`]
//!   3. On exit, release the presence slot if this connection still owns it

use std::sync::Arc;

use wirechat_session::{PresenceRegistry, Session, Store};
use wirechat_transport::{Connection, Upgrade};

use crate::ChatError;
use crate::router::{ActionRouter, Flow};

/// Drop guard that releases the session's presence slot when the handler
/// exits, including on error or panic.
///
/// The registry lock is synchronous, so the release happens inline. A slot
/// already taken over by a newer login is left alone.
struct SessionGuard<C: Connection> {
    session: Session<C>,
    presence: Arc<PresenceRegistry<C>>,
}

impl<C: Connection> Drop for SessionGuard<C> {
    fn drop(&mut self) {
        if let Some(identity) = self.session.identity() {
            if self.presence.remove_if_owned(identity, self.session.id()) {
                tracing::info!(%identity, conn_id = %self.session.id(), "user went offline");
            }
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, U>(
    pending: U,
    router: Arc<ActionRouter<S, U::Connection>>,
) -> Result<(), ChatError>
where
    S: Store,
    U: Upgrade,
{
    let conn_id = pending.id();

    let conn = match pending.negotiate().await {
        Ok(conn) => Arc::new(conn),
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "upgrade rejected");
            return Err(e.into());
        }
    };
    tracing::info!(%conn_id, "connection established");

    let mut guard = SessionGuard {
        session: Session::new(Arc::clone(&conn)),
        presence: Arc::clone(router.presence()),
    };

    let result = read_loop(&conn, &router, &mut guard.session).await;

    // Release presence before the close handshake so no sender picks this
    // connection up while it is shutting down.
    drop(guard);

    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
    tracing::info!(%conn_id, "connection closed");
    result
}

async fn read_loop<S: Store, C: Connection>(
    conn: &Arc<C>,
    router: &ActionRouter<S, C>,
    session: &mut Session<C>,
) -> Result<(), ChatError> {
    loop {
        let payload = match conn.recv().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!(conn_id = %session.id(), "peer closed");
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(conn_id = %session.id(), error = %e, "recv failed");
                return Err(e.into());
            }
        };

        match router.handle_payload(session, &payload).await? {
            Flow::Continue => {}
            Flow::Close => return Ok(()),
        }
    }
}
