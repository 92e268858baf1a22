//! Per-connection timing and buffer limits.

use std::time::Duration;

/// Limits applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Longest a single frame write may take before the connection is
    /// dropped.
    ///
    /// Default: 10 seconds.
    pub write_wait: Duration,

    /// Longest the client may stay silent. Any frame, including a pong,
    /// resets the clock.
    ///
    /// Default: 60 seconds.
    pub pong_wait: Duration,

    /// How often the server pings. Must be shorter than `pong_wait`.
    ///
    /// Default: 54 seconds.
    pub ping_period: Duration,

    /// Largest inbound message, in bytes. Bigger messages close the
    /// connection.
    ///
    /// Default: 512.
    pub max_message_size: usize,

    /// Outbound messages that may wait for the writer. A client that lets
    /// the queue fill up is disconnected.
    ///
    /// Default: 256.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: storygate_transport::DEFAULT_MAX_MESSAGE_SIZE,
            outbound_capacity: 256,
        }
    }
}
