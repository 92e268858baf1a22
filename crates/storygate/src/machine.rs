//! The per-connection protocol state machine.
//!
//! ```text
//!   Unauthenticated ──(auth ok)──► Authenticated(Session)
//!         │   ▲
//!         └───┘ auth failed / anything else: reply and stay
//! ```
//!
//! The machine interprets one decoded frame at a time and pushes replies
//! into the connection's outbound queue. It owns the player's session while
//! the connection lives; the handler takes it back with
//! [`ProtocolMachine::into_session`] and hands it to the hub on disconnect.
//!
//! Nothing a client sends closes the connection. Only a full outbound queue
//! does, and that is reported as [`Disconnect::Overflow`].

use std::sync::Arc;

use storygate_protocol::{AnswerField, ClientMessage, Codec, ErrorKind, ServerMessage};
use storygate_session::{Session, SessionError, TokenStore};
use storygate_story::{Navigator, Page, Player, ScriptEngine, StoryError, StoryStore};
use storygate_transport::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::ServerState;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disconnect {
    /// The client closed the socket.
    Closed,
    /// Reading failed at the transport level.
    ReadFailed,
    /// Nothing arrived within the pong wait.
    TimedOut,
    /// An inbound message exceeded the size limit.
    Oversized,
    /// The outbound queue was full.
    Overflow,
    /// The writer task has stopped.
    WriterGone,
}

impl Disconnect {
    /// Whether the writer should be abandoned rather than drained.
    pub(crate) fn abandons_writer(self) -> bool {
        matches!(self, Disconnect::Overflow | Disconnect::WriterGone)
    }
}

/// The sending side of a connection's bounded outbound queue.
pub(crate) struct Outbox {
    tx: mpsc::Sender<ServerMessage>,
}

impl Outbox {
    pub(crate) fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }

    /// Queues a message without waiting. A full queue ends the connection.
    pub(crate) fn push(&self, msg: ServerMessage) -> Result<(), Disconnect> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Disconnect::Overflow,
            mpsc::error::TrySendError::Closed(_) => Disconnect::WriterGone,
        })
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Result<(), Disconnect> {
        self.push(ServerMessage::error(kind, message))
    }

    /// Queues the player's stats followed by `page`.
    async fn position<S: StoryStore, E: ScriptEngine>(
        &self,
        nav: &Navigator<'_, S, E>,
        player: &Player,
        page: &Page,
    ) -> Result<(), Disconnect> {
        self.push(ServerMessage::Stats {
            stats: player.stats,
        })?;
        match nav.render(page).await {
            Ok(text) => self.push(text),
            Err(e) => self.story_error(player, e),
        }
    }

    fn story_error(&self, player: &Player, e: StoryError) -> Result<(), Disconnect> {
        if matches!(e, StoryError::Store(_)) {
            error!(player_id = %player.id, error = %e, "story lookup failed");
        } else {
            debug!(player_id = %player.id, error = %e, "navigation rejected");
        }
        self.error(e.kind(), e.to_string())
    }
}

enum State {
    Unauthenticated,
    Authenticated(Session),
}

/// Interprets a connection's messages against its session.
pub(crate) struct ProtocolMachine<S, T, E, K> {
    conn_id: ConnectionId,
    server: Arc<ServerState<S, T, E, K>>,
    outbox: Outbox,
    state: State,
}

impl<S, T, E, K> ProtocolMachine<S, T, E, K>
where
    S: StoryStore,
    T: TokenStore,
    E: ScriptEngine,
    K: Codec,
{
    pub(crate) fn new(
        conn_id: ConnectionId,
        server: Arc<ServerState<S, T, E, K>>,
        outbox: Outbox,
    ) -> Self {
        Self {
            conn_id,
            server,
            outbox,
            state: State::Unauthenticated,
        }
    }

    /// Gives up the session, if any, and drops the outbound queue.
    pub(crate) fn into_session(self) -> Option<Session> {
        match self.state {
            State::Authenticated(session) => Some(session),
            State::Unauthenticated => None,
        }
    }

    /// Handles one inbound message.
    pub(crate) async fn handle_frame(&mut self, data: &[u8]) -> Result<(), Disconnect> {
        let msg: ClientMessage = match self.server.codec.decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn_id = %self.conn_id, error = %e, "undecodable message");
                return self
                    .outbox
                    .error(ErrorKind::Failure, "unrecognized message");
            }
        };

        match msg {
            ClientMessage::Auth { auth_token } => self.authenticate(auth_token).await,
            ClientMessage::StoryMove { answer_id } => self.advance(answer_id).await,
            ClientMessage::StorySave => self.save().await,
            ClientMessage::StoryReset => self.reset().await,
        }
    }

    async fn authenticate(&mut self, token: Option<String>) -> Result<(), Disconnect> {
        let conn_id = self.conn_id;
        if matches!(self.state, State::Authenticated(_)) {
            return self.outbox.error(ErrorKind::Failure, "already authenticated");
        }

        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => {
                debug!(%conn_id, "auth without token");
                return self.outbox.push(ServerMessage::Auth { response: false });
            }
        };

        let session = match self.server.hub.authenticate(conn_id, &token).await {
            Ok(session) => session,
            Err(e) => {
                match &e {
                    SessionError::Store(_) | SessionError::HubClosed => {
                        error!(%conn_id, error = %e, "authentication failed");
                    }
                    _ => {
                        info!(%conn_id, error = %e, "authentication rejected");
                    }
                }
                return self.outbox.push(ServerMessage::Auth { response: false });
            }
        };

        let server = Arc::clone(&self.server);
        let nav = navigator(&*server);
        let page = nav.current(&session.player).await;
        let player = session.player.clone();
        self.state = State::Authenticated(session);
        info!(%conn_id, player_id = %player.id, "player authenticated");

        match page {
            Ok(page) => self.outbox.position(&nav, &player, &page).await,
            Err(e) => {
                self.outbox.push(ServerMessage::Stats {
                    stats: player.stats,
                })?;
                self.outbox.story_error(&player, e)
            }
        }
    }

    async fn advance(&mut self, answer: AnswerField) -> Result<(), Disconnect> {
        let nav = navigator(&*self.server);
        let State::Authenticated(session) = &mut self.state else {
            return self.outbox.error(ErrorKind::Failure, "not authenticated");
        };

        match nav.advance(&mut session.player, answer).await {
            Ok(step) => {
                debug!(
                    conn_id = %self.conn_id,
                    player_id = %session.player.id,
                    page_id = %step.page.id,
                    outcome = ?step.outcome,
                    "advanced"
                );
                self.outbox.position(&nav, &session.player, &step.page).await
            }
            Err(e) => self.outbox.story_error(&session.player, e),
        }
    }

    async fn save(&mut self) -> Result<(), Disconnect> {
        let State::Authenticated(session) = &self.state else {
            return self.outbox.error(ErrorKind::Failure, "not authenticated");
        };

        let response = match self.server.hub.save(&session.player).await {
            Ok(()) => {
                debug!(player_id = %session.player.id, "player saved");
                true
            }
            Err(e) => {
                warn!(player_id = %session.player.id, error = %e, "save failed");
                false
            }
        };
        self.outbox.push(ServerMessage::StorySave { response })
    }

    async fn reset(&mut self) -> Result<(), Disconnect> {
        let nav = navigator(&*self.server);
        let State::Authenticated(session) = &mut self.state else {
            return self.outbox.error(ErrorKind::Failure, "not authenticated");
        };

        match nav.reset(&mut session.player).await {
            Ok(step) => {
                info!(player_id = %session.player.id, "story reset");
                self.outbox.position(&nav, &session.player, &step.page).await
            }
            Err(e) => self.outbox.story_error(&session.player, e),
        }
    }
}

fn navigator<S, T, E, K>(server: &ServerState<S, T, E, K>) -> Navigator<'_, S, E>
where
    S: StoryStore,
    T: TokenStore,
    E: ScriptEngine,
{
    Navigator::new(server.hub.store(), &server.engine, server.hub.config().start_page)
}
