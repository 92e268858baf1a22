//! The session hub: one task that owns every live connection.
//!
//! Connection tasks never touch the registry directly. They hold a
//! [`HubHandle`] and send it commands over an mpsc channel; the hub applies
//! them one at a time, so membership changes are strictly ordered.
//!
//! The hub also enforces one session per player. Authenticating *claims*
//! the player for a connection. The claim is held until the connection
//! unregisters and the player's progress has been saved, so a second login
//! can never load a record that is about to be overwritten.
//!
//! ```text
//! register ──► authenticate (claim) ──► ... ──► unregister(session)
//!                                                   │
//!                                             spawn save task
//!                                                   │
//!                                              Saved ──► claim released
//! ```
//!
//! Store and token calls run in the calling connection's task (or in the
//! spawned save task), never inside the hub loop.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use storygate_protocol::PlayerId;
use storygate_story::{Player, StoreError, StoryStore};
use storygate_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};

use crate::{Session, SessionConfig, SessionError, TokenStore};

/// Commands sent to the hub task.
enum HubCommand {
    Register {
        conn_id: ConnectionId,
    },
    Claim {
        conn_id: ConnectionId,
        player_id: PlayerId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Drops a claim whose session was never handed out.
    Release {
        conn_id: ConnectionId,
        player_id: PlayerId,
    },
    Unregister {
        conn_id: ConnectionId,
        session: Option<Session>,
    },
    /// A disconnect save has finished, successfully or not.
    Saved {
        player_id: PlayerId,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Who currently holds a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Live(ConnectionId),
    Saving,
}

// ---------------------------------------------------------------------------
// HubHandle
// ---------------------------------------------------------------------------

/// Handle to the running hub. Cheap to clone; every connection holds one.
///
/// The hub stops once every handle has been dropped.
pub struct HubHandle<S, T> {
    sender: mpsc::Sender<HubCommand>,
    store: Arc<S>,
    tokens: Arc<T>,
    config: SessionConfig,
}

impl<S, T> Clone for HubHandle<S, T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            store: Arc::clone(&self.store),
            tokens: Arc::clone(&self.tokens),
            config: self.config.clone(),
        }
    }
}

impl<S: StoryStore, T: TokenStore> HubHandle<S, T> {
    /// Adds a connection to the live set. Registering twice is a no-op.
    pub async fn register(&self, conn_id: ConnectionId) -> Result<(), SessionError> {
        self.send(HubCommand::Register { conn_id }).await
    }

    /// Removes a connection from the live set.
    ///
    /// If it carries a session, the player is saved in the background and
    /// stays claimed until the save finishes. Save failures are logged.
    pub async fn unregister(
        &self,
        conn_id: ConnectionId,
        session: Option<Session>,
    ) -> Result<(), SessionError> {
        self.send(HubCommand::Unregister { conn_id, session }).await
    }

    /// Resolves `token` into a session bound to `conn_id`.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: unknown or expired token
    /// - [`SessionError::AlreadyConnected`]: the player is live elsewhere or
    ///   their last session is still being saved
    /// - [`SessionError::UnknownPlayer`]: the token points at a deleted player
    /// - [`SessionError::Store`]: a collaborator failed
    pub async fn authenticate(
        &self,
        conn_id: ConnectionId,
        token: &str,
    ) -> Result<Session, SessionError> {
        let player_id = self
            .tokens
            .get(token)
            .await?
            .ok_or(SessionError::InvalidToken)?;

        self.claim(conn_id, player_id).await?;

        match self.store.find_player_by_id(player_id).await {
            Ok(player) => {
                tracing::info!(%conn_id, %player_id, "session opened");
                Ok(Session {
                    player,
                    token: token.to_owned(),
                })
            }
            Err(e) => {
                self.send(HubCommand::Release { conn_id, player_id }).await?;
                Err(match e {
                    StoreError::NotFound(_) => SessionError::UnknownPlayer(player_id),
                    other => SessionError::Store(other),
                })
            }
        }
    }

    /// Saves the player now.
    pub async fn save(&self, player: &Player) -> Result<(), StoreError> {
        self.store.save_player(player).await
    }

    /// Number of registered connections, authenticated or not.
    pub async fn connection_count(&self) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply }).await?;
        rx.await.map_err(|_| SessionError::HubClosed)
    }

    /// The persistence gateway, for page and answer lookups.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn claim(&self, conn_id: ConnectionId, player_id: PlayerId) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Claim {
            conn_id,
            player_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::HubClosed)?
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), SessionError> {
        self.sender.send(cmd).await.map_err(|_| SessionError::HubClosed)
    }
}

/// Spawns the hub task and returns a handle to it.
pub fn spawn_hub<S: StoryStore, T: TokenStore>(
    store: Arc<S>,
    tokens: Arc<T>,
    config: SessionConfig,
) -> HubHandle<S, T> {
    let (tx, rx) = mpsc::channel(config.hub_capacity.max(1));

    let actor = HubActor {
        connections: HashMap::new(),
        claims: HashMap::new(),
        store: Arc::clone(&store),
        receiver: rx,
        feedback: tx.downgrade(),
    };
    tokio::spawn(actor.run());

    HubHandle {
        sender: tx,
        store,
        tokens,
        config,
    }
}

// ---------------------------------------------------------------------------
// HubActor
// ---------------------------------------------------------------------------

struct HubActor<S> {
    /// Live connections and the player each one has claimed, if any.
    connections: HashMap<ConnectionId, Option<PlayerId>>,
    claims: HashMap<PlayerId, Claim>,
    store: Arc<S>,
    receiver: mpsc::Receiver<HubCommand>,
    /// Lets save tasks report back without keeping the hub alive.
    feedback: mpsc::WeakSender<HubCommand>,
}

impl<S: StoryStore> HubActor<S> {
    async fn run(mut self) {
        tracing::info!("session hub started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                HubCommand::Register { conn_id } => self.handle_register(conn_id),
                HubCommand::Claim {
                    conn_id,
                    player_id,
                    reply,
                } => {
                    let _ = reply.send(self.handle_claim(conn_id, player_id));
                }
                HubCommand::Release { conn_id, player_id } => {
                    self.release(conn_id, player_id);
                }
                HubCommand::Unregister { conn_id, session } => {
                    self.handle_unregister(conn_id, session);
                }
                HubCommand::Saved { player_id } => {
                    if self.claims.get(&player_id) == Some(&Claim::Saving) {
                        self.claims.remove(&player_id);
                    }
                }
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.connections.len());
                }
            }
        }

        tracing::info!("session hub stopped");
    }

    fn handle_register(&mut self, conn_id: ConnectionId) {
        if let Entry::Vacant(slot) = self.connections.entry(conn_id) {
            slot.insert(None);
            tracing::debug!(%conn_id, connections = self.connections.len(), "connection registered");
        }
    }

    fn handle_claim(
        &mut self,
        conn_id: ConnectionId,
        player_id: PlayerId,
    ) -> Result<(), SessionError> {
        let Some(slot) = self.connections.get_mut(&conn_id) else {
            // Unregistered while the token lookup was in flight.
            return Err(SessionError::NotRegistered(conn_id));
        };
        if slot.is_some() || self.claims.contains_key(&player_id) {
            return Err(SessionError::AlreadyConnected(player_id));
        }
        *slot = Some(player_id);
        self.claims.insert(player_id, Claim::Live(conn_id));
        Ok(())
    }

    fn release(&mut self, conn_id: ConnectionId, player_id: PlayerId) {
        if self.claims.get(&player_id) == Some(&Claim::Live(conn_id)) {
            self.claims.remove(&player_id);
        }
        if let Some(slot) = self.connections.get_mut(&conn_id) {
            if *slot == Some(player_id) {
                *slot = None;
            }
        }
    }

    fn handle_unregister(&mut self, conn_id: ConnectionId, session: Option<Session>) {
        let claimed = self.connections.remove(&conn_id).flatten();
        tracing::debug!(%conn_id, connections = self.connections.len(), "connection unregistered");

        let Some(session) = session else {
            if let Some(player_id) = claimed {
                self.release(conn_id, player_id);
            }
            return;
        };

        let player_id = session.player_id();
        if self.claims.get(&player_id) != Some(&Claim::Live(conn_id)) {
            tracing::warn!(%conn_id, %player_id, "session handed back by a connection that does not hold it");
            return;
        }
        self.claims.insert(player_id, Claim::Saving);
        self.spawn_save(session.player);
    }

    fn spawn_save(&self, player: Player) {
        let store = Arc::clone(&self.store);
        let feedback = self.feedback.clone();

        tokio::spawn(async move {
            let player_id = player.id;
            match store.save_player(&player).await {
                Ok(()) => tracing::info!(%player_id, "player saved on disconnect"),
                Err(e) => tracing::error!(%player_id, error = %e, "failed to save player on disconnect"),
            }
            if let Some(hub) = feedback.upgrade() {
                let _ = hub.send(HubCommand::Saved { player_id }).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use storygate_protocol::{PageId, Stat};
    use storygate_story::{MemoryStore, Page};

    use super::*;
    use crate::{MemoryTokenStore, issue_token};

    const HOUR: Duration = Duration::from_secs(3600);

    struct Fixture {
        hub: HubHandle<MemoryStore, MemoryTokenStore>,
        store: Arc<MemoryStore>,
        tokens: Arc<MemoryTokenStore>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new(PageId(1)));
        store.insert_page(Page::linear(PageId(1), "Start", None));
        let tokens = Arc::new(MemoryTokenStore::new());
        let hub = spawn_hub(Arc::clone(&store), Arc::clone(&tokens), SessionConfig::default());
        Fixture { hub, store, tokens }
    }

    async fn player_with_token(f: &Fixture, login: &str) -> (PlayerId, String) {
        let player = f.store.create_player(login, "hash").await.unwrap();
        let token = issue_token(f.tokens.as_ref(), player.id, HOUR).await.unwrap();
        (player.id, token)
    }

    /// Polls until `check` passes or a second has gone by.
    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let f = fixture().await;
        f.hub.register(conn(1)).await.unwrap();
        f.hub.register(conn(1)).await.unwrap();
        f.hub.register(conn(2)).await.unwrap();
        assert_eq!(f.hub.connection_count().await.unwrap(), 2);

        f.hub.unregister(conn(1), None).await.unwrap();
        assert_eq!(f.hub.connection_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_unregistered_connection_is_rejected() {
        let f = fixture().await;
        let (_, token) = player_with_token(&f, "ann").await;

        assert!(matches!(
            f.hub.authenticate(conn(9), &token).await,
            Err(SessionError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_valid_token_loads_player() {
        let f = fixture().await;
        let (player_id, token) = player_with_token(&f, "ann").await;
        f.hub.register(conn(1)).await.unwrap();

        let session = f.hub.authenticate(conn(1), &token).await.unwrap();

        assert_eq!(session.player_id(), player_id);
        assert_eq!(session.token, token);
        assert_eq!(session.player.login, "ann");
    }

    #[tokio::test]
    async fn test_authenticate_unknown_or_expired_token_fails() {
        let f = fixture().await;
        let player = f.store.create_player("ann", "hash").await.unwrap();
        f.tokens.set("stale", player.id, Duration::ZERO).await.unwrap();
        f.hub.register(conn(1)).await.unwrap();

        assert!(matches!(
            f.hub.authenticate(conn(1), "stale").await,
            Err(SessionError::InvalidToken)
        ));
        assert!(matches!(
            f.hub.authenticate(conn(1), "never-issued").await,
            Err(SessionError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_token_for_missing_player_releases_claim() {
        let f = fixture().await;
        f.tokens.set("ghost", PlayerId(42), HOUR).await.unwrap();
        f.hub.register(conn(1)).await.unwrap();

        assert!(matches!(
            f.hub.authenticate(conn(1), "ghost").await,
            Err(SessionError::UnknownPlayer(PlayerId(42)))
        ));

        // The failed attempt must not leave the connection or player claimed.
        f.store.insert_player(Player::new(PlayerId(42), "late", "hash", PageId(1)));
        assert!(f.hub.authenticate(conn(1), "ghost").await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_same_player_twice_is_rejected() {
        let f = fixture().await;
        let (player_id, token) = player_with_token(&f, "ann").await;
        f.hub.register(conn(1)).await.unwrap();
        f.hub.register(conn(2)).await.unwrap();

        f.hub.authenticate(conn(1), &token).await.unwrap();
        let second = f.hub.authenticate(conn(2), &token).await;

        assert!(matches!(second, Err(SessionError::AlreadyConnected(p)) if p == player_id));
    }

    #[tokio::test]
    async fn test_authenticate_twice_on_one_connection_is_rejected() {
        let f = fixture().await;
        let (_, ann) = player_with_token(&f, "ann").await;
        let (_, bob) = player_with_token(&f, "bob").await;
        f.hub.register(conn(1)).await.unwrap();

        f.hub.authenticate(conn(1), &ann).await.unwrap();
        assert!(f.hub.authenticate(conn(1), &bob).await.is_err());
    }

    #[tokio::test]
    async fn test_unregister_with_session_saves_once_and_releases() {
        let f = fixture().await;
        let (player_id, token) = player_with_token(&f, "ann").await;
        f.hub.register(conn(1)).await.unwrap();
        let mut session = f.hub.authenticate(conn(1), &token).await.unwrap();
        session.player.stats.add(Stat::Knowledge, 5);

        f.hub.unregister(conn(1), Some(session)).await.unwrap();
        f.hub.unregister(conn(1), None).await.unwrap();

        let store = Arc::clone(&f.store);
        eventually(|| store.save_count(player_id) == 1).await;
        assert_eq!(f.store.player(player_id).unwrap().stats.knowledge, 5);

        // Once saved, the player can log in again and sees the saved progress.
        f.hub.register(conn(2)).await.unwrap();
        let mut reopened = None;
        for _ in 0..100 {
            match f.hub.authenticate(conn(2), &token).await {
                Ok(session) => {
                    reopened = Some(session);
                    break;
                }
                Err(SessionError::AlreadyConnected(_)) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        let reopened = reopened.expect("claim released after save");
        assert_eq!(reopened.player.stats.knowledge, 5);
        assert_eq!(f.store.save_count(player_id), 1);
    }

    #[tokio::test]
    async fn test_unregister_save_failure_is_logged_and_releases() {
        let f = fixture().await;
        let (player_id, token) = player_with_token(&f, "ann").await;
        f.hub.register(conn(1)).await.unwrap();
        let session = f.hub.authenticate(conn(1), &token).await.unwrap();

        f.store.set_available(false);
        f.hub.unregister(conn(1), Some(session)).await.unwrap();
        assert_eq!(f.hub.connection_count().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.store.set_available(true);
        assert_eq!(f.store.save_count(player_id), 0);

        f.hub.register(conn(2)).await.unwrap();
        assert!(f.hub.authenticate(conn(2), &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_disconnects_save_each_player_exactly_once() {
        let f = fixture().await;
        let mut sessions = Vec::new();
        for i in 0..20u64 {
            let (_, token) = player_with_token(&f, &format!("player-{i}")).await;
            f.hub.register(conn(i)).await.unwrap();
            sessions.push((conn(i), f.hub.authenticate(conn(i), &token).await.unwrap()));
        }

        let mut tasks = Vec::new();
        for (conn_id, session) in sessions {
            let hub = f.hub.clone();
            tasks.push(tokio::spawn(async move {
                let player_id = session.player_id();
                hub.unregister(conn_id, Some(session)).await.unwrap();
                // A racing second unregister carries no session.
                hub.unregister(conn_id, None).await.unwrap();
                player_id
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }

        let store = Arc::clone(&f.store);
        eventually(|| ids.iter().all(|id| store.save_count(*id) == 1)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ids.iter().all(|id| f.store.save_count(*id) == 1));
        assert_eq!(f.hub.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_explicit_save_runs_in_caller() {
        let f = fixture().await;
        let (player_id, token) = player_with_token(&f, "ann").await;
        f.hub.register(conn(1)).await.unwrap();
        let mut session = f.hub.authenticate(conn(1), &token).await.unwrap();
        session.player.set_flag("met_mentor");

        f.hub.save(&session.player).await.unwrap();

        assert_eq!(f.store.save_count(player_id), 1);
        assert!(f.store.player(player_id).unwrap().has_flag("met_mentor"));
    }

    #[tokio::test]
    async fn test_hub_runs_while_any_handle_lives() {
        let f = fixture().await;
        let hub = f.hub.clone();
        drop(f);
        assert_eq!(hub.connection_count().await.unwrap(), 0);
    }
}
