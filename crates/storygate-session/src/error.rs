//! Error types for the session layer.

use storygate_protocol::PlayerId;
use storygate_story::StoreError;
use storygate_transport::ConnectionId;

/// Errors that can occur while binding or tracking a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token is missing, unknown, or expired. All three look the same
    /// to the client.
    #[error("invalid or expired session token")]
    InvalidToken,

    /// The token resolved to a player the store doesn't know.
    #[error("player {0} does not exist")]
    UnknownPlayer(PlayerId),

    /// The player is already bound to a live connection, or their last
    /// session is still being saved.
    #[error("player {0} already has an active session")]
    AlreadyConnected(PlayerId),

    /// The connection is not (or no longer) registered with the hub.
    #[error("{0} is not registered")]
    NotRegistered(ConnectionId),

    /// The hub task has stopped.
    #[error("session hub is not running")]
    HubClosed,

    /// The token store or persistence gateway failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
