//! Unified error type for Storygate.

use storygate_protocol::ProtocolError;
use storygate_session::SessionError;
use storygate_story::{StoreError, StoryError};
use storygate_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum StorygateError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication or hub bookkeeping failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The persistence gateway failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A navigation request could not be served.
    #[error(transparent)]
    Story(#[from] StoryError),
}
