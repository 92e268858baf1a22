//! Session types: a connection's binding to a player.

use std::time::Duration;

use storygate_protocol::{PageId, PlayerId};
use storygate_story::Player;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for sessions and the hub.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an issued token stays valid.
    ///
    /// Default: 6 hours.
    pub token_ttl: Duration,

    /// Where new and reset players start.
    ///
    /// Default: page 1.
    pub start_page: PageId,

    /// Size of the hub's command queue. Callers wait when it is full.
    ///
    /// Default: 64.
    pub hub_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(6 * 60 * 60),
            start_page: PageId(1),
            hub_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live binding of an authenticated connection to a player.
///
/// The connection that holds a `Session` owns the player's progress until it
/// hands the session back to the hub on disconnect. The hub guarantees no
/// other connection holds a session for the same player in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub player: Player,

    /// The token the session was opened with.
    pub token: String,
}

impl Session {
    pub fn player_id(&self) -> PlayerId {
        self.player.id
    }
}
