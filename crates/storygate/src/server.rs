//! `StorygateServer` builder and accept loop.
//!
//! This is the entry point for running a Storygate server. It ties the
//! layers together: transport → protocol → session hub → story.

use std::sync::Arc;

use storygate_protocol::{Codec, JsonCodec};
use storygate_session::{HubHandle, SessionConfig, TokenStore, spawn_hub};
use storygate_story::{ScriptEngine, StoryStore};
use storygate_transport::{Transport, WebSocketTransport};

use crate::StorygateError;
use crate::config::ConnectionConfig;
use crate::handler::handle_connection;

/// State shared by every connection task.
pub(crate) struct ServerState<S, T, E, K> {
    pub(crate) hub: HubHandle<S, T>,
    pub(crate) engine: E,
    pub(crate) codec: K,
    pub(crate) connection_config: ConnectionConfig,
}

/// Builder for configuring and starting a Storygate server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use storygate::prelude::*;
///
/// # async fn run() -> Result<(), StorygateError> {
/// let store = Arc::new(MemoryStore::new(PageId(1)));
/// let tokens = Arc::new(MemoryTokenStore::new());
///
/// let server = StorygateServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(store, tokens, LuaScriptEngine::default())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct StorygateServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    connection_config: ConnectionConfig,
}

impl StorygateServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session_config: SessionConfig::default(),
            connection_config: ConnectionConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the per-connection limits.
    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = config;
        self
    }

    /// Binds the listener and starts the session hub.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S, T, E>(
        self,
        store: Arc<S>,
        tokens: Arc<T>,
        engine: E,
    ) -> Result<StorygateServer<S, T, E, JsonCodec>, StorygateError>
    where
        S: StoryStore,
        T: TokenStore,
        E: ScriptEngine,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_max_message_size(self.connection_config.max_message_size);
        let hub = spawn_hub(store, tokens, self.session_config);

        let state = Arc::new(ServerState {
            hub,
            engine,
            codec: JsonCodec,
            connection_config: self.connection_config,
        });

        Ok(StorygateServer { transport, state })
    }
}

impl Default for StorygateServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Storygate server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct StorygateServer<S, T, E, K> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, T, E, K>>,
}

impl StorygateServer<(), (), (), ()> {
    /// Creates a new builder.
    pub fn builder() -> StorygateServerBuilder {
        StorygateServerBuilder::new()
    }
}

impl<S, T, E, K> StorygateServer<S, T, E, K>
where
    S: StoryStore,
    T: TokenStore,
    E: ScriptEngine,
    K: Codec + Clone,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle to the session hub, for issuing counts or saves from outside
    /// a connection.
    pub fn hub(&self) -> HubHandle<S, T> {
        self.state.hub.clone()
    }

    /// Runs the accept loop.
    ///
    /// Accepts incoming connections, performs the WebSocket upgrade, and
    /// spawns a handler task for each one. Runs until the process is
    /// terminated.
    pub async fn run(mut self) -> Result<(), StorygateError> {
        match self.transport.local_addr() {
            Ok(addr) => tracing::info!(%addr, "Storygate server running"),
            Err(_) => tracing::info!("Storygate server running"),
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
