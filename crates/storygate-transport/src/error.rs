use std::io;

/// Errors raised by the listener or by either half of a split connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listener could not be bound to its address.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// The listener failed to accept a TCP connection.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    /// The peer connected but the WebSocket upgrade did not complete.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// The peer sent a message over the read limit. The reader refuses it
    /// before it is fully buffered.
    #[error("inbound message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    /// The reader half failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),

    /// The writer half failed to deliver a message, ping or close frame.
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_too_large_names_the_limit() {
        let err = TransportError::MessageTooLarge { limit: 512 };
        assert_eq!(err.to_string(), "inbound message exceeds 512 bytes");
    }

    #[test]
    fn test_io_variants_keep_their_source() {
        use std::error::Error as _;

        let err = TransportError::SendFailed(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "send failed: slow");
    }
}
