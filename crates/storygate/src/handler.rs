//! Per-connection handler: the read loop and the write loop.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Register with the hub
//!   2. Split the socket and spawn the write loop, which drains the
//!      outbound queue and pings on a timer
//!   3. Run the read loop, feeding each frame to the protocol machine
//!   4. When either loop ends, take the session back from the machine and
//!      hand it to the hub, which saves the player

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use storygate_protocol::{Codec, ServerMessage};
use storygate_session::TokenStore;
use storygate_story::{ScriptEngine, StoryStore};
use storygate_transport::{Connection, Frame, FrameReader, FrameWriter, TransportError};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};

use crate::StorygateError;
use crate::config::ConnectionConfig;
use crate::machine::{Disconnect, Outbox, ProtocolMachine};
use crate::server::ServerState;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C, S, T, E, K>(
    conn: C,
    state: Arc<ServerState<S, T, E, K>>,
) -> Result<(), StorygateError>
where
    C: Connection,
    S: StoryStore,
    T: TokenStore,
    E: ScriptEngine,
    K: Codec + Clone,
{
    let conn_id = conn.id();
    let config = state.connection_config.clone();
    state.hub.register(conn_id).await?;
    tracing::debug!(%conn_id, "handling new connection");

    let (reader, writer) = conn.split();
    let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
    let mut writer_task = tokio::spawn(write_loop(writer, rx, state.codec.clone(), config.clone()));

    let mut machine = ProtocolMachine::new(conn_id, Arc::clone(&state), Outbox::new(tx));
    let (reason, writer_done) = tokio::select! {
        reason = read_loop(reader, &mut machine, &config) => (reason, false),
        result = &mut writer_task => {
            if let Ok(Err(e)) = result {
                tracing::debug!(%conn_id, error = %e, "write loop failed");
            }
            (Disconnect::WriterGone, true)
        }
    };
    tracing::info!(%conn_id, ?reason, "connection closing");

    // Dropping the machine closes the queue, so the writer flushes and
    // sends a close frame.
    let session = machine.into_session();
    if !writer_done {
        if reason.abandons_writer() {
            writer_task.abort();
        } else if timeout(config.write_wait, &mut writer_task).await.is_err() {
            writer_task.abort();
        }
    }

    state.hub.unregister(conn_id, session).await?;
    Ok(())
}

/// Reads frames until the client goes away or misbehaves at the transport
/// level. Malformed messages are answered, not punished.
async fn read_loop<R, S, T, E, K>(
    mut reader: R,
    machine: &mut ProtocolMachine<S, T, E, K>,
    config: &ConnectionConfig,
) -> Disconnect
where
    R: FrameReader,
    S: StoryStore,
    T: TokenStore,
    E: ScriptEngine,
    K: Codec,
{
    loop {
        let data = match timeout(config.pong_wait, reader.recv()).await {
            Ok(Ok(Some(Frame::Data(data)))) => data,
            Ok(Ok(Some(Frame::Pong))) => continue,
            Ok(Ok(None)) => return Disconnect::Closed,
            Ok(Err(TransportError::MessageTooLarge { limit })) => {
                tracing::warn!(limit, "inbound message too large");
                return Disconnect::Oversized;
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "recv error");
                return Disconnect::ReadFailed;
            }
            Err(_) => return Disconnect::TimedOut,
        };

        // Transports without a read limit of their own are checked here.
        if data.len() > config.max_message_size {
            tracing::warn!(
                size = data.len(),
                limit = config.max_message_size,
                "inbound message too large"
            );
            return Disconnect::Oversized;
        }

        if let Err(reason) = machine.handle_frame(&data).await {
            return reason;
        }
    }
}

/// Drains the outbound queue into the socket and keeps the peer alive with
/// pings. Ends when the queue closes or a write fails or stalls.
async fn write_loop<W, K>(
    mut writer: W,
    mut rx: mpsc::Receiver<ServerMessage>,
    codec: K,
    config: ConnectionConfig,
) -> Result<(), StorygateError>
where
    W: FrameWriter,
    K: Codec,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    let _ = timeout(config.write_wait, writer.close()).await;
                    return Ok(());
                };
                let bytes = codec.encode(&msg)?;
                bounded(config.write_wait, writer.send(bytes)).await?;
            }
            _ = ticker.tick() => {
                bounded(config.write_wait, writer.ping()).await?;
            }
        }
    }
}

/// Applies the write deadline to one transport write.
async fn bounded(
    limit: Duration,
    write: impl Future<Output = Result<(), TransportError>>,
) -> Result<(), TransportError> {
    timeout(limit, write).await.unwrap_or_else(|_| {
        Err(TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use storygate_protocol::{JsonCodec, Stats};

    /// Records what the write loop sends.
    #[derive(Clone, Default)]
    struct RecordingWriter {
        sent: Arc<Mutex<VecDeque<String>>>,
    }

    impl FrameWriter for RecordingWriter {
        async fn send(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
            let text = String::from_utf8(data).unwrap_or_default();
            self.sent.lock().unwrap().push_back(text);
            Ok(())
        }

        async fn ping(&mut self) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push_back("<ping>".into());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push_back("<close>".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_write_loop_encodes_then_closes_when_queue_drops() {
        let writer = RecordingWriter::default();
        let sent = Arc::clone(&writer.sent);
        let (tx, rx) = mpsc::channel(4);

        tx.send(ServerMessage::StorySave { response: true }).await.unwrap();
        drop(tx);
        write_loop(writer, rx, JsonCodec, ConnectionConfig::default())
            .await
            .unwrap();

        let sent: Vec<_> = sent.lock().unwrap().iter().cloned().collect();
        assert_eq!(
            sent,
            vec![
                r#"{"channel":"story_save","response":true}"#.to_string(),
                "<close>".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_pings_on_schedule() {
        let writer = RecordingWriter::default();
        let sent = Arc::clone(&writer.sent);
        let (tx, rx) = mpsc::channel(4);
        let config = ConnectionConfig {
            ping_period: Duration::from_secs(5),
            ..ConnectionConfig::default()
        };

        let task = tokio::spawn(write_loop(writer, rx, JsonCodec, config));
        tokio::time::sleep(Duration::from_secs(11)).await;
        tx.send(ServerMessage::Stats {
            stats: Stats::default(),
        })
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap().unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|s| *s == "<ping>").count(), 2);
        assert_eq!(sent.back().map(String::as_str), Some("<close>"));
    }

    #[tokio::test]
    async fn test_outbox_overflow_is_a_disconnect() {
        let (tx, _rx) = mpsc::channel(1);
        let outbox = Outbox::new(tx);
        outbox.push(ServerMessage::StorySave { response: true }).unwrap();
        assert_eq!(
            outbox.push(ServerMessage::StorySave { response: true }),
            Err(Disconnect::Overflow)
        );
    }

    #[tokio::test]
    async fn test_outbox_closed_is_writer_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outbox = Outbox::new(tx);
        assert_eq!(
            outbox.push(ServerMessage::StorySave { response: true }),
            Err(Disconnect::WriterGone)
        );
    }
}
