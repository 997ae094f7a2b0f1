//! Closed sets of request and reply variants.
//!
//! Routing happens on these enums, not on action strings: an envelope is
//! turned into a [`Request`] at the boundary and every handler produces a
//! [`Reply`], which is the only way reply envelopes get built.

use std::fmt;

use serde_json::Value;

use crate::{Envelope, RequestError};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Every action a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Register,
    Login,
    SendMessage,
    GetRecentMessages,
    GetUnreadMessages,
    MarkAsRead,
    SetNUnreadMessages,
    DeleteMessage,
    DeleteAccount,
    GetUsers,
    Echo,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Register,
        Action::Login,
        Action::SendMessage,
        Action::GetRecentMessages,
        Action::GetUnreadMessages,
        Action::MarkAsRead,
        Action::SetNUnreadMessages,
        Action::DeleteMessage,
        Action::DeleteAccount,
        Action::GetUsers,
        Action::Echo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Register => "register",
            Action::Login => "login",
            Action::SendMessage => "send_message",
            Action::GetRecentMessages => "get_recent_messages",
            Action::GetUnreadMessages => "get_unread_messages",
            Action::MarkAsRead => "mark_as_read",
            Action::SetNUnreadMessages => "set_n_unread_messages",
            Action::DeleteMessage => "delete_message",
            Action::DeleteAccount => "delete_account",
            Action::GetUsers => "get_users",
            Action::Echo => "echo",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }

    /// Whether the session must be logged in before this action runs.
    pub fn requires_auth(self) -> bool {
        !matches!(self, Action::Register | Action::Login | Action::Echo)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { username: String, password: String },
    Login { username: String, password: String },
    SendMessage { receiver: String, message: String },
    GetRecentMessages,
    GetUnreadMessages,
    MarkAsRead { ids: Vec<i64> },
    SetNUnreadMessages { count: u32 },
    DeleteMessage { id: i64 },
    DeleteAccount,
    GetUsers,
    Echo { message: String },
}

impl Request {
    /// Pulls and validates the fields `action` needs out of `envelope`.
    pub fn parse(action: Action, envelope: &Envelope) -> Result<Self, RequestError> {
        let text = |key: &str| envelope.str_field(key).unwrap_or_default().to_string();

        let request = match action {
            Action::Register | Action::Login => {
                let username = text("username");
                let password = text("password");
                if username.is_empty() || password.is_empty() {
                    let purpose = match action {
                        Action::Register => "registration",
                        _ => "login",
                    };
                    return Err(RequestError::MissingCredentials(purpose));
                }
                match action {
                    Action::Register => Request::Register { username, password },
                    _ => Request::Login { username, password },
                }
            }
            Action::SendMessage => {
                let receiver = text("receiver");
                if receiver.is_empty() {
                    return Err(RequestError::MissingReceiver);
                }
                let message = text("message");
                if message.is_empty() {
                    return Err(RequestError::EmptyMessage);
                }
                Request::SendMessage { receiver, message }
            }
            Action::GetRecentMessages => Request::GetRecentMessages,
            Action::GetUnreadMessages => Request::GetUnreadMessages,
            Action::MarkAsRead => {
                let ids = match envelope.get("message_ids") {
                    None => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(Value::as_i64)
                        .collect::<Option<Vec<_>>>()
                        .ok_or(RequestError::IdsNotIntegers)?,
                    Some(_) => return Err(RequestError::IdsNotList),
                };
                Request::MarkAsRead { ids }
            }
            Action::SetNUnreadMessages => {
                let value = envelope
                    .get("n_unread_messages")
                    .ok_or(RequestError::MissingUnreadCount)?;
                let count = value
                    .as_i64()
                    .filter(|&n| n > 0)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or(RequestError::InvalidUnreadCount)?;
                Request::SetNUnreadMessages { count }
            }
            Action::DeleteMessage => {
                let id = envelope
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or(RequestError::InvalidMessageId)?;
                Request::DeleteMessage { id }
            }
            Action::DeleteAccount => Request::DeleteAccount,
            Action::GetUsers => Request::GetUsers,
            Action::Echo => Request::Echo {
                message: text("message"),
            },
        };
        Ok(request)
    }

    pub fn action(&self) -> Action {
        match self {
            Request::Register { .. } => Action::Register,
            Request::Login { .. } => Action::Login,
            Request::SendMessage { .. } => Action::SendMessage,
            Request::GetRecentMessages => Action::GetRecentMessages,
            Request::GetUnreadMessages => Action::GetUnreadMessages,
            Request::MarkAsRead { .. } => Action::MarkAsRead,
            Request::SetNUnreadMessages { .. } => Action::SetNUnreadMessages,
            Request::DeleteMessage { .. } => Action::DeleteMessage,
            Request::DeleteAccount => Action::DeleteAccount,
            Request::GetUsers => Action::GetUsers,
            Request::Echo { .. } => Action::Echo,
        }
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// One stored chat message as clients see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub from: String,
    pub message: String,
    pub timestamp: String,
}

impl ChatMessage {
    fn into_value(self) -> Value {
        serde_json::json!({
            "id": self.id,
            "from": self.from,
            "message": self.message,
            "timestamp": self.timestamp,
        })
    }

    fn write_into(self, envelope: &mut Envelope) {
        envelope.insert("id", self.id);
        envelope.insert("from", self.from);
        envelope.insert("message", self.message);
        envelope.insert("timestamp", self.timestamp);
    }
}

/// Every envelope the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Error { message: String },
    ConfirmRegister,
    ConfirmLogin { username: String },
    ReceivedMessage(ChatMessage),
    ConfirmSendMessage(ChatMessage),
    RecentMessages(Vec<ChatMessage>),
    UnreadMessages(Vec<ChatMessage>),
    ConfirmMarkAsRead,
    ConfirmSetNUnreadMessages,
    DeleteMessageSuccess { id: i64 },
    ConfirmDeleteAccount,
    UserList(Vec<String>),
    ConfirmEcho { message: String },
}

impl Reply {
    /// Action names of every reply, for checking a schema covers them.
    pub const ACTIONS: [&'static str; 13] = [
        "error",
        "confirm_register",
        "confirm_login",
        "received_message",
        "confirm_send_message",
        "recent_messages",
        "unread_messages",
        "confirm_mark_as_read",
        "confirm_set_n_unread_messages",
        "delete_message_success",
        "confirm_delete_account",
        "user_list",
        "confirm_echo",
    ];

    pub fn error(message: impl fmt::Display) -> Self {
        Reply::Error {
            message: message.to_string(),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Reply::Error { .. } => "error",
            Reply::ConfirmRegister => "confirm_register",
            Reply::ConfirmLogin { .. } => "confirm_login",
            Reply::ReceivedMessage(_) => "received_message",
            Reply::ConfirmSendMessage(_) => "confirm_send_message",
            Reply::RecentMessages(_) => "recent_messages",
            Reply::UnreadMessages(_) => "unread_messages",
            Reply::ConfirmMarkAsRead => "confirm_mark_as_read",
            Reply::ConfirmSetNUnreadMessages => "confirm_set_n_unread_messages",
            Reply::DeleteMessageSuccess { .. } => "delete_message_success",
            Reply::ConfirmDeleteAccount => "confirm_delete_account",
            Reply::UserList(_) => "user_list",
            Reply::ConfirmEcho { .. } => "confirm_echo",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    /// Builds the wire envelope: `action`, `status`, and the reply's fields.
    pub fn into_envelope(self) -> Envelope {
        let status = if self.is_error() { "error" } else { "success" };
        let mut env = Envelope::new(self.action()).with("status", status);

        match self {
            Reply::Error { message } | Reply::ConfirmEcho { message } => {
                env.insert("message", message);
            }
            Reply::ConfirmRegister => {
                env.insert("message", "Registration successful. You can now log in.");
            }
            Reply::ConfirmLogin { username } => {
                env.insert("message", format!("Login successful. Welcome, {username}!"));
                env.insert("username", username);
            }
            Reply::ReceivedMessage(message) | Reply::ConfirmSendMessage(message) => {
                message.write_into(&mut env);
            }
            Reply::RecentMessages(messages) => {
                env.insert("messages", messages_value(messages));
            }
            Reply::UnreadMessages(messages) => {
                let summary = if messages.is_empty() {
                    "No unread messages."
                } else {
                    "Unread messages retrieved."
                };
                env.insert("message", summary);
                env.insert("messages", messages_value(messages));
            }
            Reply::ConfirmMarkAsRead => {
                env.insert("message", "Messages marked as read.");
            }
            Reply::ConfirmSetNUnreadMessages => {
                env.insert("message", "Number of unread messages set successfully.");
            }
            Reply::DeleteMessageSuccess { id } => {
                env.insert("message", "Message deleted successfully.");
                env.insert("id", id);
            }
            Reply::ConfirmDeleteAccount => {
                env.insert("message", "Account deleted successfully.");
            }
            Reply::UserList(users) => {
                env.insert("users", users);
            }
        }
        env
    }
}

fn messages_value(messages: Vec<ChatMessage>) -> Value {
    Value::Array(messages.into_iter().map(ChatMessage::into_value).collect())
}
