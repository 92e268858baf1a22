//! # Storygate
//!
//! Real-time backend for branching-narrative games.
//!
//! Clients connect over WebSocket, present a session token on the `auth`
//! channel, and then move through a story graph one answer at a time. The
//! server keeps each player's progress in memory while they are connected
//! and saves it when they leave or ask for it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storygate::prelude::*;
//!
//! # async fn run() -> Result<(), StorygateError> {
//! let store = Arc::new(MemoryStore::new(PageId(1)));
//! store.insert_page(Page::linear(PageId(1), "It begins.", None));
//!
//! let server = StorygateServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(store, Arc::new(MemoryTokenStore::new()), LuaScriptEngine::default())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod machine;
mod server;

pub use config::ConnectionConfig;
pub use error::StorygateError;
pub use server::{StorygateServer, StorygateServerBuilder};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `debug` when `verbose` is set and `info` otherwise.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .try_init();
}

/// Everything needed to stand up a server.
pub mod prelude {
    pub use crate::{ConnectionConfig, StorygateError, StorygateServer, StorygateServerBuilder};
    pub use storygate_protocol::{
        AnswerId, ClientMessage, ErrorKind, JsonCodec, PageId, PlayerId, ServerMessage, Stat,
        Stats,
    };
    pub use storygate_session::{
        HubHandle, MemoryTokenStore, SessionConfig, TokenStore, issue_token,
    };
    pub use storygate_story::{
        Answer, LuaScriptEngine, MemoryStore, Page, Player, ScriptCapabilities, ScriptEngine,
        StoreError, StoryStore,
    };
}
