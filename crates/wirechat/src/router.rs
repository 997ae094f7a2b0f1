//! Action dispatch: envelope in, replies out.
//!
//! Every envelope goes through the same gate in [`ActionRouter::route`]:
//!   1. `action` present?
//!   2. a known [`Action`]?
//!   3. logged in, if the action needs it?
//!   4. fields valid ([`Request::parse`])?
//!
//! Only then does the exhaustive match in `dispatch` run a handler. Each
//! failing step answers with an error envelope and leaves all state alone.

use std::sync::Arc;

use wirechat_protocol::{Action, ChatMessage, Codec, Envelope, Reply, Request, WireCodec};
use wirechat_session::{PresenceRegistry, Session, Store, StoreError, StoredMessage};
use wirechat_transport::{Connection, TransportError};

const AUTH_REQUIRED: &str = "Authentication required. Please log in first.";

/// What the read loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// End the session, as after `delete_account`.
    Close,
}

/// Why a handler could not produce a reply.
#[derive(Debug)]
enum HandlerError {
    Store(StoreError),
    NotSignedIn,
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        HandlerError::Store(e)
    }
}

/// Routes decoded envelopes to handlers and writes their replies.
///
/// Shared by every connection task. Holds the injected store, the presence
/// registry, and the codec chosen at startup.
pub struct ActionRouter<S, C> {
    store: Arc<S>,
    presence: Arc<PresenceRegistry<C>>,
    codec: WireCodec,
    history_limit: u32,
}

impl<S: Store, C: Connection> ActionRouter<S, C> {
    pub fn new(
        store: Arc<S>,
        presence: Arc<PresenceRegistry<C>>,
        codec: WireCodec,
        history_limit: u32,
    ) -> Self {
        Self {
            store,
            presence,
            codec,
            history_limit,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry<C>> {
        &self.presence
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Decodes one frame payload and routes it.
    ///
    /// A payload that does not decode gets an error reply; the session goes
    /// on. Only a failed write back to this session's own connection is an
    /// `Err`.
    pub async fn handle_payload(
        &self,
        session: &mut Session<C>,
        payload: &[u8],
    ) -> Result<Flow, TransportError> {
        match self.codec.decode(payload) {
            Ok(envelope) => self.route(session, envelope).await,
            Err(e) => {
                tracing::debug!(conn_id = %session.id(), error = %e, "undecodable payload");
                self.reply(session, Reply::error(format!("Invalid message: {e}")))
                    .await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Validates an envelope, runs its handler, and sends the reply.
    pub async fn route(
        &self,
        session: &mut Session<C>,
        envelope: Envelope,
    ) -> Result<Flow, TransportError> {
        let Some(name) = envelope.action() else {
            self.reply(session, Reply::error("Missing 'action' in message."))
                .await?;
            return Ok(Flow::Continue);
        };
        let Some(action) = Action::from_name(name) else {
            tracing::warn!(conn_id = %session.id(), action = name, "unknown action");
            self.reply(session, Reply::error(format!("Unknown action '{name}'.")))
                .await?;
            return Ok(Flow::Continue);
        };
        if action.requires_auth() && !session.is_authenticated() {
            self.reply(session, Reply::error(AUTH_REQUIRED)).await?;
            return Ok(Flow::Continue);
        }
        let request = match Request::parse(action, &envelope) {
            Ok(request) => request,
            Err(e) => {
                self.reply(session, Reply::error(e)).await?;
                return Ok(Flow::Continue);
            }
        };

        tracing::debug!(conn_id = %session.id(), %action, "dispatching");
        let (reply, flow) = match self.dispatch(session, request).await {
            Ok(outcome) => outcome,
            Err(HandlerError::NotSignedIn) => (Reply::error(AUTH_REQUIRED), Flow::Continue),
            Err(HandlerError::Store(e)) => {
                tracing::error!(conn_id = %session.id(), %action, error = %e, "store call failed");
                (Reply::error("Internal storage error."), Flow::Continue)
            }
        };
        self.reply(session, reply).await?;
        Ok(flow)
    }

    async fn dispatch(
        &self,
        session: &mut Session<C>,
        request: Request,
    ) -> Result<(Reply, Flow), HandlerError> {
        let reply = match request {
            Request::Register { username, password } => {
                self.register(&username, &password).await?
            }
            Request::Login { username, password } => {
                self.login(session, username, &password).await?
            }
            Request::SendMessage { receiver, message } => {
                let me = signed_in(session)?;
                self.send_message(&me, &receiver, &message).await?
            }
            Request::GetRecentMessages => {
                let me = signed_in(session)?;
                let limit = self.limit_for(&me).await?;
                let messages = self.store.recent_messages(&me, limit).await?;
                Reply::RecentMessages(messages.into_iter().map(chat_message).collect())
            }
            Request::GetUnreadMessages => {
                let me = signed_in(session)?;
                let limit = self.limit_for(&me).await?;
                let messages = self.store.unread_messages(&me, limit).await?;
                Reply::UnreadMessages(messages.into_iter().map(chat_message).collect())
            }
            Request::MarkAsRead { ids } => {
                signed_in(session)?;
                self.store.mark_as_read(&ids).await?;
                Reply::ConfirmMarkAsRead
            }
            Request::SetNUnreadMessages { count } => {
                let me = signed_in(session)?;
                match self.store.set_history_limit(&me, count).await {
                    Ok(()) => Reply::ConfirmSetNUnreadMessages,
                    // The account was deleted from another connection.
                    Err(StoreError::UnknownUser(_)) => {
                        Reply::error("Failed to set number of unread messages.")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Request::DeleteMessage { id } => {
                signed_in(session)?;
                if self.store.delete_message(id).await? {
                    Reply::DeleteMessageSuccess { id }
                } else {
                    Reply::error("Failed to delete message.")
                }
            }
            Request::DeleteAccount => {
                let me = signed_in(session)?;
                return self.delete_account(session, &me).await;
            }
            Request::GetUsers => {
                let me = signed_in(session)?;
                Reply::UserList(self.store.users_except(&me).await?)
            }
            Request::Echo { message } => Reply::ConfirmEcho { message },
        };
        Ok((reply, Flow::Continue))
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    async fn register(&self, username: &str, password: &str) -> Result<Reply, HandlerError> {
        match self.store.register(username, password).await {
            Ok(()) => {
                tracing::info!(identity = %username, "user registered");
                Ok(Reply::ConfirmRegister)
            }
            Err(StoreError::UserExists(_)) => Ok(Reply::error("Username already exists.")),
            Err(e) => Err(e.into()),
        }
    }

    async fn login(
        &self,
        session: &mut Session<C>,
        username: String,
        password: &str,
    ) -> Result<Reply, HandlerError> {
        if !self.store.verify_credentials(&username, password).await? {
            return Ok(Reply::error("Invalid username or password."));
        }

        if let Some(previous) = session.login(username.clone()) {
            if previous != username {
                self.presence.remove_if_owned(&previous, session.id());
            }
        }
        let displaced = self
            .presence
            .insert(&username, Arc::clone(session.connection()));
        if let Some(old) = displaced {
            tracing::info!(identity = %username, old_conn = %old.id(), "login moved to new connection");
        }
        tracing::info!(identity = %username, conn_id = %session.id(), "user logged in");

        Ok(Reply::ConfirmLogin { username })
    }

    /// Stores the message, pushes it to the receiver if online, then
    /// confirms to the sender.
    async fn send_message(
        &self,
        sender: &str,
        receiver: &str,
        text: &str,
    ) -> Result<Reply, HandlerError> {
        let stored = self.store.insert_message(sender, receiver, text).await?;
        let message = chat_message(stored);

        // Lookup clones the handle; the registry lock is already released
        // when the write below runs.
        match self.presence.lookup(receiver) {
            Some(conn) => {
                let pushed = match self.encode(Reply::ReceivedMessage(message.clone())) {
                    Some(bytes) => conn.send(&bytes).await.map_err(|e| e.to_string()),
                    None => Err("encode failed".to_string()),
                };
                if let Err(e) = pushed {
                    tracing::info!(%receiver, error = %e, "direct delivery failed");
                    return Ok(Reply::error(format!(
                        "Failed to send message to '{receiver}'."
                    )));
                }
                tracing::info!(%sender, %receiver, id = message.id, "message delivered");
            }
            None => {
                tracing::info!(%sender, %receiver, id = message.id, "receiver offline, message stored");
            }
        }

        Ok(Reply::ConfirmSendMessage(message))
    }

    async fn delete_account(
        &self,
        session: &mut Session<C>,
        identity: &str,
    ) -> Result<(Reply, Flow), HandlerError> {
        if !self.store.delete_account(identity).await? {
            return Ok((Reply::error("Failed to delete account."), Flow::Continue));
        }
        self.presence.remove_if_owned(identity, session.id());
        session.logout();
        tracing::info!(%identity, conn_id = %session.id(), "account deleted");
        Ok((Reply::ConfirmDeleteAccount, Flow::Close))
    }

    async fn limit_for(&self, identity: &str) -> Result<usize, StoreError> {
        let limit = self.store.history_limit(identity).await?;
        Ok(limit.unwrap_or(self.history_limit) as usize)
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Encodes a reply. If the reply does not fit the wire format, an error
    /// envelope goes out in its place.
    fn encode(&self, reply: Reply) -> Option<Vec<u8>> {
        let action = reply.action();
        match self.codec.encode(&reply.into_envelope()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(action, error = %e, "reply could not be encoded");
                self.codec
                    .encode(&Reply::error("Failed to encode reply.").into_envelope())
                    .map_err(|e| tracing::error!(error = %e, "error reply could not be encoded"))
                    .ok()
            }
        }
    }

    async fn reply(&self, session: &Session<C>, reply: Reply) -> Result<(), TransportError> {
        match self.encode(reply) {
            Some(bytes) => session.connection().send(&bytes).await,
            None => Ok(()),
        }
    }
}

fn signed_in<C: Connection>(session: &Session<C>) -> Result<String, HandlerError> {
    session
        .identity()
        .map(str::to_owned)
        .ok_or(HandlerError::NotSignedIn)
}

fn chat_message(stored: StoredMessage) -> ChatMessage {
    ChatMessage {
        id: stored.id,
        from: stored.sender,
        message: stored.content,
        timestamp: stored.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use serde_json::{Value, json};
    use wirechat_protocol::{Schema, WireMode};
    use wirechat_session::MemoryStore;
    use wirechat_transport::ConnectionId;

    use super::*;

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    /// Records everything sent to it; can be told to fail writes.
    struct MockConnection {
        id: ConnectionId,
        sent: Mutex<Vec<Vec<u8>>>,
        broken: AtomicBool,
    }

    impl MockConnection {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                sent: Mutex::new(Vec::new()),
                broken: AtomicBool::new(false),
            })
        }

        fn break_writes(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }

        /// Decodes and drains everything sent so far.
        fn take_json(&self) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .drain(..)
                .map(|bytes| serde_json::from_slice(&bytes).unwrap())
                .collect()
        }
    }

    impl Connection for MockConnection {
        async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed("broken".into()));
            }
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }

        fn remote_addr(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], 0))
        }
    }

    type TestRouter = ActionRouter<MemoryStore, MockConnection>;

    async fn router_with_users(users: &[&str]) -> TestRouter {
        let store = MemoryStore::new();
        for user in users {
            store.register(user, "pw").await.unwrap();
        }
        let schema = Arc::new(Schema::builtin().unwrap());
        ActionRouter::new(
            Arc::new(store),
            Arc::new(PresenceRegistry::new()),
            WireCodec::new(WireMode::Json, schema),
            50,
        )
    }

    fn session() -> (Session<MockConnection>, Arc<MockConnection>) {
        let conn = MockConnection::new();
        (Session::new(Arc::clone(&conn)), conn)
    }

    async fn send(router: &TestRouter, session: &mut Session<MockConnection>, value: Value) -> Flow {
        let payload = serde_json::to_vec(&value).unwrap();
        router.handle_payload(session, &payload).await.unwrap()
    }

    async fn logged_in(router: &TestRouter, name: &str) -> (Session<MockConnection>, Arc<MockConnection>) {
        let (mut session, conn) = session();
        send(router, &mut session, json!({"action": "login", "username": name, "password": "pw"})).await;
        conn.take_json();
        (session, conn)
    }

    fn only(mut replies: Vec<Value>) -> Value {
        assert_eq!(replies.len(), 1, "expected one reply, got {replies:?}");
        replies.remove(0)
    }

    // =====================================================================
    // Gate
    // =====================================================================

    #[tokio::test]
    async fn test_missing_action() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();

        send(&router, &mut session, json!({"username": "x"})).await;
        let reply = only(conn.take_json());
        assert_eq!(reply["action"], "error");
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["message"], "Missing 'action' in message.");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();

        send(&router, &mut session, json!({"action": "teleport"})).await;
        assert_eq!(only(conn.take_json())["message"], "Unknown action 'teleport'.");
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_recoverable() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();

        let flow = router.handle_payload(&mut session, b"{not json").await.unwrap();
        assert_eq!(flow, Flow::Continue);
        let reply = only(conn.take_json());
        assert_eq!(reply["status"], "error");
        assert!(reply["message"].as_str().unwrap().starts_with("Invalid message"));
    }

    #[tokio::test]
    async fn test_protected_actions_need_login() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (mut session, conn) = session();

        for action in Action::ALL.into_iter().filter(|a| a.requires_auth()) {
            let flow = send(
                &router,
                &mut session,
                json!({"action": action.name(), "receiver": "bob", "message": "hi"}),
            )
            .await;
            assert_eq!(flow, Flow::Continue);
            assert_eq!(
                only(conn.take_json())["message"],
                "Authentication required. Please log in first."
            );
        }

        // Nothing was stored by the rejected send_message.
        assert!(router.store.unread_messages("bob", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auth_checked_before_field_validation() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();

        send(&router, &mut session, json!({"action": "send_message"})).await;
        assert_eq!(
            only(conn.take_json())["message"],
            "Authentication required. Please log in first."
        );
    }

    // =====================================================================
    // Register / login
    // =====================================================================

    #[tokio::test]
    async fn test_register_then_duplicate() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();

        let register = json!({"action": "register", "username": "carol", "password": "pw"});
        send(&router, &mut session, register.clone()).await;
        let reply = only(conn.take_json());
        assert_eq!(reply["action"], "confirm_register");
        assert_eq!(reply["status"], "success");

        send(&router, &mut session, register).await;
        assert_eq!(only(conn.take_json())["message"], "Username already exists.");
    }

    #[tokio::test]
    async fn test_login_registers_presence() {
        let router = router_with_users(&["alice"]).await;
        let (mut session, conn) = session();

        send(&router, &mut session, json!({"action": "login", "username": "alice", "password": "pw"})).await;
        let reply = only(conn.take_json());
        assert_eq!(reply["action"], "confirm_login");
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["username"], "alice");

        assert_eq!(session.identity(), Some("alice"));
        assert_eq!(router.presence().lookup("alice").unwrap().id(), conn.id());
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let router = router_with_users(&["alice"]).await;
        let (mut session, conn) = session();

        send(&router, &mut session, json!({"action": "login", "username": "alice", "password": "nope"})).await;
        assert_eq!(only(conn.take_json())["message"], "Invalid username or password.");
        assert!(!session.is_authenticated());
        assert!(router.presence().is_empty());
    }

    #[tokio::test]
    async fn test_relogin_as_other_user_frees_old_slot() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (mut session, _conn) = logged_in(&router, "alice").await;

        send(&router, &mut session, json!({"action": "login", "username": "bob", "password": "pw"})).await;
        assert!(!router.presence().is_online("alice"));
        assert!(router.presence().is_online("bob"));
    }

    // =====================================================================
    // Messaging
    // =====================================================================

    #[tokio::test]
    async fn test_send_message_delivers_to_online_receiver() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (_alice, alice_conn) = logged_in(&router, "alice").await;
        let (mut bob, bob_conn) = logged_in(&router, "bob").await;

        send(&router, &mut bob, json!({"action": "send_message", "receiver": "alice", "message": "hi"})).await;

        let pushed = only(alice_conn.take_json());
        assert_eq!(pushed["action"], "received_message");
        assert_eq!(pushed["from"], "bob");
        assert_eq!(pushed["message"], "hi");

        let confirm = only(bob_conn.take_json());
        assert_eq!(confirm["action"], "confirm_send_message");
        assert_eq!(confirm["id"], pushed["id"]);
    }

    #[tokio::test]
    async fn test_send_message_to_offline_receiver_is_stored() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (mut bob, bob_conn) = logged_in(&router, "bob").await;

        send(&router, &mut bob, json!({"action": "send_message", "receiver": "alice", "message": "later"})).await;
        assert_eq!(only(bob_conn.take_json())["action"], "confirm_send_message");

        let (mut alice, alice_conn) = logged_in(&router, "alice").await;
        send(&router, &mut alice, json!({"action": "get_unread_messages"})).await;
        let reply = only(alice_conn.take_json());
        assert_eq!(reply["action"], "unread_messages");
        assert_eq!(reply["messages"][0]["message"], "later");
        assert_eq!(reply["messages"][0]["from"], "bob");
    }

    #[tokio::test]
    async fn test_push_failure_reported_to_sender() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (_alice, alice_conn) = logged_in(&router, "alice").await;
        let (mut bob, bob_conn) = logged_in(&router, "bob").await;
        alice_conn.break_writes();

        let flow = send(&router, &mut bob, json!({"action": "send_message", "receiver": "alice", "message": "hi"})).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(only(bob_conn.take_json())["message"], "Failed to send message to 'alice'.");
    }

    #[tokio::test]
    async fn test_send_message_validation() {
        let router = router_with_users(&["bob"]).await;
        let (mut bob, conn) = logged_in(&router, "bob").await;

        send(&router, &mut bob, json!({"action": "send_message", "message": "hi"})).await;
        assert_eq!(only(conn.take_json())["message"], "Receiver username is required.");

        send(&router, &mut bob, json!({"action": "send_message", "receiver": "alice"})).await;
        assert_eq!(only(conn.take_json())["message"], "Empty message cannot be sent.");
    }

    #[tokio::test]
    async fn test_read_flow_and_history_limit() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (mut bob, bob_conn) = logged_in(&router, "bob").await;
        for text in ["one", "two", "three"] {
            send(&router, &mut bob, json!({"action": "send_message", "receiver": "alice", "message": text})).await;
        }
        bob_conn.take_json();

        let (mut alice, conn) = logged_in(&router, "alice").await;
        send(&router, &mut alice, json!({"action": "set_n_unread_messages", "n_unread_messages": 2})).await;
        assert_eq!(only(conn.take_json())["action"], "confirm_set_n_unread_messages");

        send(&router, &mut alice, json!({"action": "get_unread_messages"})).await;
        let unread = only(conn.take_json());
        let ids: Vec<i64> = unread["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids.len(), 2);

        send(&router, &mut alice, json!({"action": "mark_as_read", "message_ids": ids})).await;
        assert_eq!(only(conn.take_json())["action"], "confirm_mark_as_read");

        send(&router, &mut alice, json!({"action": "get_recent_messages"})).await;
        let recent = only(conn.take_json());
        assert_eq!(recent["action"], "recent_messages");
        assert_eq!(recent["messages"][0]["message"], "one");
        assert_eq!(recent["messages"][1]["message"], "two");
    }

    #[tokio::test]
    async fn test_mark_as_read_rejects_bad_ids() {
        let router = router_with_users(&["alice"]).await;
        let (mut alice, conn) = logged_in(&router, "alice").await;

        send(&router, &mut alice, json!({"action": "mark_as_read", "message_ids": "1,2"})).await;
        assert_eq!(only(conn.take_json())["message"], "'message_ids' should be a list.");

        send(&router, &mut alice, json!({"action": "mark_as_read", "message_ids": [1, "x"]})).await;
        assert_eq!(only(conn.take_json())["message"], "All 'message_ids' should be integers.");
    }

    #[tokio::test]
    async fn test_delete_message() {
        let router = router_with_users(&["alice", "bob"]).await;
        let (mut bob, conn) = logged_in(&router, "bob").await;
        send(&router, &mut bob, json!({"action": "send_message", "receiver": "alice", "message": "oops"})).await;
        let id = only(conn.take_json())["id"].clone();

        send(&router, &mut bob, json!({"action": "delete_message", "id": id})).await;
        let reply = only(conn.take_json());
        assert_eq!(reply["action"], "delete_message_success");
        assert_eq!(reply["id"], id);

        send(&router, &mut bob, json!({"action": "delete_message", "id": id})).await;
        assert_eq!(only(conn.take_json())["message"], "Failed to delete message.");

        send(&router, &mut bob, json!({"action": "delete_message", "id": "abc"})).await;
        assert_eq!(only(conn.take_json())["message"], "Invalid message ID format.");
    }

    #[tokio::test]
    async fn test_get_users_excludes_self() {
        let router = router_with_users(&["alice", "bob", "carol"]).await;
        let (mut bob, conn) = logged_in(&router, "bob").await;

        send(&router, &mut bob, json!({"action": "get_users"})).await;
        let reply = only(conn.take_json());
        assert_eq!(reply["action"], "user_list");
        assert_eq!(reply["users"], json!(["alice", "carol"]));
    }

    #[tokio::test]
    async fn test_echo_without_login() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();

        send(&router, &mut session, json!({"action": "echo", "message": "ping"})).await;
        let reply = only(conn.take_json());
        assert_eq!(reply["action"], "confirm_echo");
        assert_eq!(reply["message"], "ping");
    }

    // =====================================================================
    // Account deletion
    // =====================================================================

    #[tokio::test]
    async fn test_delete_account_closes_session() {
        let router = router_with_users(&["alice"]).await;
        let (mut alice, conn) = logged_in(&router, "alice").await;

        let flow = send(&router, &mut alice, json!({"action": "delete_account"})).await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(only(conn.take_json())["action"], "confirm_delete_account");
        assert!(!alice.is_authenticated());
        assert!(!router.presence().is_online("alice"));
        assert!(!router.store.verify_credentials("alice", "pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_history_limit_after_account_deleted_elsewhere() {
        let router = router_with_users(&["alice"]).await;
        let (mut first, first_conn) = logged_in(&router, "alice").await;
        let (mut second, _second_conn) = logged_in(&router, "alice").await;

        send(&router, &mut second, json!({"action": "delete_account"})).await;

        let flow = send(
            &router,
            &mut first,
            json!({"action": "set_n_unread_messages", "n_unread_messages": 3}),
        )
        .await;
        assert_eq!(flow, Flow::Continue);
        let reply = only(first_conn.take_json());
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["message"], "Failed to set number of unread messages.");
    }

    // =====================================================================
    // Storage failures
    // =====================================================================

    /// A store whose backend is down.
    struct DownStore;

    fn down() -> StoreError {
        StoreError::Unavailable("connection refused".into())
    }

    impl Store for DownStore {
        async fn register(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(down())
        }
        async fn verify_credentials(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn delete_account(&self, _: &str) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn insert_message(&self, _: &str, _: &str, _: &str) -> Result<StoredMessage, StoreError> {
            Err(down())
        }
        async fn recent_messages(&self, _: &str, _: usize) -> Result<Vec<StoredMessage>, StoreError> {
            Err(down())
        }
        async fn unread_messages(&self, _: &str, _: usize) -> Result<Vec<StoredMessage>, StoreError> {
            Err(down())
        }
        async fn mark_as_read(&self, _: &[i64]) -> Result<(), StoreError> {
            Err(down())
        }
        async fn history_limit(&self, _: &str) -> Result<Option<u32>, StoreError> {
            Err(down())
        }
        async fn set_history_limit(&self, _: &str, _: u32) -> Result<(), StoreError> {
            Err(down())
        }
        async fn delete_message(&self, _: i64) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn users_except(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Err(down())
        }
    }

    #[tokio::test]
    async fn test_store_failure_keeps_session_open() {
        let schema = Arc::new(Schema::builtin().unwrap());
        let router = ActionRouter::new(
            Arc::new(DownStore),
            Arc::new(PresenceRegistry::new()),
            WireCodec::new(WireMode::Json, schema),
            50,
        );
        let (mut session, conn) = session();

        let login = br#"{"action":"login","username":"alice","password":"pw"}"#;
        let flow = router.handle_payload(&mut session, login).await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(only(conn.take_json())["message"], "Internal storage error.");
        assert!(!session.is_authenticated());

        session.login("alice");
        for action in ["get_users", "get_unread_messages", "set_n_unread_messages", "delete_account"] {
            let payload = json!({"action": action, "n_unread_messages": 3}).to_string();
            let flow = router.handle_payload(&mut session, payload.as_bytes()).await.unwrap();
            assert_eq!(flow, Flow::Continue, "{action}");
            let reply = only(conn.take_json());
            assert_eq!(reply["status"], "error");
            assert_eq!(reply["message"], "Internal storage error.", "{action}");
        }

        let echo = br#"{"action":"echo","message":"still here"}"#;
        router.handle_payload(&mut session, echo).await.unwrap();
        assert_eq!(only(conn.take_json())["message"], "still here");
    }

    // =====================================================================
    // Output
    // =====================================================================

    #[tokio::test]
    async fn test_unencodable_reply_falls_back_to_error() {
        let store = MemoryStore::new();
        let schema = Arc::new(Schema::builtin().unwrap());
        let router: TestRouter = ActionRouter::new(
            Arc::new(store),
            Arc::new(PresenceRegistry::new()),
            WireCodec::new(WireMode::Binary, Arc::clone(&schema)),
            50,
        );
        let (mut session, conn) = session();

        // 70000 bytes of echo cannot fit a u16 string length.
        let mut envelope = Envelope::new("echo");
        envelope.insert("message", "x".repeat(70_000));
        router.route(&mut session, envelope).await.unwrap();

        let sent = conn.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let reply = wirechat_protocol::BinaryCodec::new(schema).decode(&sent[0]).unwrap();
        assert_eq!(reply.action(), Some("error"));
        assert_eq!(reply.str_field("message"), Some("Failed to encode reply."));
    }

    #[tokio::test]
    async fn test_own_write_failure_is_an_error() {
        let router = router_with_users(&[]).await;
        let (mut session, conn) = session();
        conn.break_writes();

        let result = router
            .handle_payload(&mut session, br#"{"action":"echo","message":"x"}"#)
            .await;
        assert!(result.is_err());
    }
}
