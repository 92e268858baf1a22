//! Session tokens and the live-connection hub for Storygate.
//!
//! This crate turns an opaque token into a live, owned player session:
//!
//! 1. **Tokens** ([`TokenStore`], [`issue_token`]): map a session token to
//!    a player, with expiry
//! 2. **Sessions** ([`Session`]): one connection's binding to a player's
//!    in-memory progress
//! 3. **Hub** ([`HubHandle`]): the single task that owns the set of live
//!    connections and persists a player when their connection goes away
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)        ← one protocol machine per connection, holding a Session
//!     ↕
//! Session Layer (this)  ← tokens, claims, save-on-disconnect
//!     ↕
//! Story Layer (below)   ← Player, StoryStore
//! ```

mod error;
mod hub;
mod session;
mod token;

pub use error::SessionError;
pub use hub::{HubHandle, spawn_hub};
pub use session::{Session, SessionConfig};
pub use token::{MemoryTokenStore, TokenStore, issue_token};
