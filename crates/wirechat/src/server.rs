//! `ChatServer` builder and accept loop.
//!
//! This is the entry point for running a Wirechat server. It ties together
//! all the layers: transport → protocol → session → router.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use wirechat_protocol::{Action, Reply, Schema, SchemaError, WireCodec, WireMode};
use wirechat_session::{PresenceRegistry, Store};
use wirechat_transport::{
    Transport, TransportConfig, Upgrade, WebSocketConnection, WebSocketTransport,
};

use crate::handler::handle_connection;
use crate::router::ActionRouter;
use crate::{ChatError, ConfigError, ServerConfig};

/// Builder for configuring and starting a Wirechat server.
///
/// # Example
///
/// ```rust,ignore
/// use wirechat::prelude::*;
///
/// let server = ChatServerBuilder::new()
///     .bind("0.0.0.0:8000")
///     .mode(WireMode::Binary)
///     .build(MemoryStore::new())
///     .await?;
/// server.run().await
/// ```
pub struct ChatServerBuilder {
    config: ServerConfig,
    schema: Option<Schema>,
    idle_timeout: Option<Duration>,
}

impl ChatServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            schema: None,
            idle_timeout: None,
        }
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self.idle_timeout = None;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn mode(mut self, mode: WireMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Uses an already-loaded schema instead of reading one from disk.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.schema_path = Some(path.into());
        self
    }

    pub fn history_limit(mut self, limit: u32) -> Self {
        self.config.history_limit = limit;
        self
    }

    /// Drops connections that stay silent for longer than `timeout`.
    ///
    /// Overrides `idle_timeout_secs` from the config and keeps sub-second
    /// precision.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn max_frame_bytes(mut self, max: u64) -> Self {
        self.config.max_frame_bytes = max;
        self
    }

    /// Binds the listener and wires up the router around `store`.
    ///
    /// In binary mode the schema must describe every request and reply
    /// action; startup fails otherwise.
    pub async fn build<S: Store>(self, store: S) -> Result<ChatServer<S>, ChatError> {
        self.config.validate()?;
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Validation("idle_timeout must be > 0".into()).into());
        }
        let transport_config = self.transport_config();
        let config = self.config;

        let schema = match (self.schema, &config.schema_path) {
            (Some(schema), _) => schema,
            (None, Some(path)) => Schema::load(path)?,
            (None, None) => Schema::builtin()?,
        };

        if config.mode == WireMode::Binary {
            let missing = schema.missing(
                Action::ALL
                    .iter()
                    .map(|action| action.name())
                    .chain(Reply::ACTIONS),
            );
            if !missing.is_empty() {
                let missing = missing.into_iter().map(str::to_owned).collect();
                return Err(SchemaError::MissingActions(missing).into());
            }
        }

        let transport = WebSocketTransport::bind(&config.bind_addr, transport_config).await?;
        let codec = WireCodec::new(config.mode, Arc::new(schema));
        tracing::info!(mode = %config.mode, history_limit = config.history_limit, "server configured");

        let router = ActionRouter::new(
            Arc::new(store),
            Arc::new(PresenceRegistry::new()),
            codec,
            config.history_limit,
        );

        Ok(ChatServer {
            transport,
            router: Arc::new(router),
        })
    }

    fn transport_config(&self) -> TransportConfig {
        let mut transport = self.config.transport();
        if let Some(timeout) = self.idle_timeout {
            transport.read_timeout = Some(timeout);
        }
        transport
    }
}

impl Default for ChatServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Wirechat server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ChatServer<S: Store> {
    transport: WebSocketTransport,
    router: Arc<ActionRouter<S, WebSocketConnection>>,
}

impl<S: Store> ChatServer<S> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Who is online right now.
    pub fn presence(&self) -> Arc<PresenceRegistry<WebSocketConnection>> {
        Arc::clone(self.router.presence())
    }

    /// Runs the accept loop.
    ///
    /// Each accepted socket is upgraded and served on its own task. Runs
    /// until the process is terminated.
    pub async fn run(mut self) -> Result<(), ChatError> {
        tracing::info!(addr = ?self.local_addr().ok(), "Wirechat server running");

        loop {
            match self.transport.accept().await {
                Ok(pending) => {
                    let span = tracing::info_span!(
                        "connection",
                        conn_id = %pending.id(),
                        peer = %pending.remote_addr(),
                    );
                    let router = Arc::clone(&self.router);
                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_connection(pending, router).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
