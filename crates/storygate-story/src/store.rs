//! The persistence gateway.
//!
//! Storygate doesn't own a database. It defines [`StoryStore`]: the handful
//! of lookups and upserts the session layer needs, each reporting "not
//! found" separately from "the backend is unreachable". Plug in Postgres,
//! SQLite, or anything else by implementing the trait.
//!
//! [`MemoryStore`] keeps everything in process. The demo serves from it and
//! the tests use it as a fake, which is why it counts saves and can be told
//! to fail.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use storygate_protocol::{AnswerId, PageId, PlayerId};

use crate::{Answer, Page, Player};

/// Errors reported by a [`StoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No record matches the lookup.
    #[error("{0} not found")]
    NotFound(String),

    /// The write would violate a uniqueness rule (e.g. a taken login).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend could not be reached or failed mid-request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fetches and saves players, pages and answers.
///
/// Methods return `impl Future + Send` so the server can await them from
/// spawned connection tasks. Implementations may use `async fn`.
pub trait StoryStore: Send + Sync + 'static {
    fn find_player_by_login(
        &self,
        login: &str,
    ) -> impl Future<Output = Result<Player, StoreError>> + Send;

    fn find_player_by_id(
        &self,
        id: PlayerId,
    ) -> impl Future<Output = Result<Player, StoreError>> + Send;

    /// Overwrites the stored progress of an existing player.
    fn save_player(
        &self,
        player: &Player,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Registers a new player on the start page with zeroed stats.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the login is taken.
    fn create_player(
        &self,
        login: &str,
        password_hash: &str,
    ) -> impl Future<Output = Result<Player, StoreError>> + Send;

    fn find_page(
        &self,
        id: PageId,
    ) -> impl Future<Output = Result<Page, StoreError>> + Send;

    fn find_answer(
        &self,
        id: AnswerId,
    ) -> impl Future<Output = Result<Answer, StoreError>> + Send;

    /// All answers of a question page, ordered by id.
    fn find_answers_for_page(
        &self,
        page: PageId,
    ) -> impl Future<Output = Result<Vec<Answer>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    players: HashMap<PlayerId, Player>,
    pages: HashMap<PageId, Page>,
    answers: HashMap<AnswerId, Answer>,
    saves: HashMap<PlayerId, usize>,
    next_player_id: u64,
}

/// An in-process [`StoryStore`].
pub struct MemoryStore {
    inner: Mutex<Inner>,
    start_page: PageId,
    available: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store. New players start on `start_page`.
    pub fn new(start_page: PageId) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_player_id: 1,
                ..Inner::default()
            }),
            start_page,
            available: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while holding the lock, but don't cascade if it does.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }

    pub fn insert_page(&self, page: Page) {
        self.lock().pages.insert(page.id, page);
    }

    pub fn insert_answer(&self, answer: Answer) {
        self.lock().answers.insert(answer.id, answer);
    }

    /// Inserts or replaces a player record without counting it as a save.
    pub fn insert_player(&self, player: Player) {
        let mut inner = self.lock();
        inner.next_player_id = inner.next_player_id.max(player.id.0 + 1);
        inner.players.insert(player.id, player);
    }

    /// Returns a copy of the stored player record.
    pub fn player(&self, id: PlayerId) -> Option<Player> {
        self.lock().players.get(&id).cloned()
    }

    /// How many successful saves have been made for `id`.
    pub fn save_count(&self, id: PlayerId) -> usize {
        self.lock().saves.get(&id).copied().unwrap_or(0)
    }

    /// Simulates the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl StoryStore for MemoryStore {
    async fn find_player_by_login(&self, login: &str) -> Result<Player, StoreError> {
        self.check_available()?;
        self.lock()
            .players
            .values()
            .find(|p| p.login == login)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("login {login}")))
    }

    async fn find_player_by_id(&self, id: PlayerId) -> Result<Player, StoreError> {
        self.check_available()?;
        self.lock()
            .players
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        self.check_available()?;
        let mut inner = self.lock();
        let slot = inner
            .players
            .get_mut(&player.id)
            .ok_or_else(|| StoreError::NotFound(player.id.to_string()))?;
        *slot = player.clone();
        *inner.saves.entry(player.id).or_insert(0) += 1;
        Ok(())
    }

    async fn create_player(&self, login: &str, password_hash: &str) -> Result<Player, StoreError> {
        self.check_available()?;
        let mut inner = self.lock();
        if inner.players.values().any(|p| p.login == login) {
            return Err(StoreError::Conflict(format!("login {login} is taken")));
        }
        let id = PlayerId(inner.next_player_id);
        inner.next_player_id += 1;
        let player = Player::new(id, login, password_hash, self.start_page);
        inner.players.insert(id, player.clone());
        Ok(player)
    }

    async fn find_page(&self, id: PageId) -> Result<Page, StoreError> {
        self.check_available()?;
        self.lock()
            .pages
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_answer(&self, id: AnswerId) -> Result<Answer, StoreError> {
        self.check_available()?;
        self.lock()
            .answers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_answers_for_page(&self, page: PageId) -> Result<Vec<Answer>, StoreError> {
        self.check_available()?;
        let mut answers: Vec<Answer> = self
            .lock()
            .answers
            .values()
            .filter(|a| a.page_id == page)
            .cloned()
            .collect();
        answers.sort_by_key(|a| a.id);
        Ok(answers)
    }
}
