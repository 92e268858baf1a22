//! Session tokens.
//!
//! A token is handed out by whatever logs the player in and presented on
//! the `auth` channel. The server only needs to look it up, so the store is
//! behind the [`TokenStore`] trait. [`MemoryTokenStore`] keeps tokens in
//! process with their expiry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use storygate_protocol::PlayerId;
use storygate_story::StoreError;

/// Maps session tokens to players.
pub trait TokenStore: Send + Sync + 'static {
    /// Looks up a token. Unknown and expired tokens are both `Ok(None)`.
    fn get(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<PlayerId>, StoreError>> + Send;

    /// Stores `token` for `player`, valid for `ttl`.
    fn set(
        &self,
        token: &str,
        player: PlayerId,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Generates a fresh token for `player` and stores it for `ttl`.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use storygate_protocol::PlayerId;
/// use storygate_session::{MemoryTokenStore, TokenStore, issue_token};
///
/// # #[tokio::main]
/// # async fn main() {
/// let tokens = MemoryTokenStore::new();
/// let token = issue_token(&tokens, PlayerId(7), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(token.len(), 32);
/// assert_eq!(tokens.get(&token).await.unwrap(), Some(PlayerId(7)));
/// # }
/// ```
pub async fn issue_token<T: TokenStore>(
    tokens: &T,
    player: PlayerId,
    ttl: Duration,
) -> Result<String, StoreError> {
    let token = generate_token();
    tokens.set(&token, player, ttl).await?;
    tracing::debug!(player_id = %player, "session token issued");
    Ok(token)
}

/// Generates a random 32-character hex string (128 bits).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// An in-process [`TokenStore`].
///
/// Expired tokens are dropped when looked up, and every `set` sweeps out the
/// rest, so the map never holds more than the tokens issued within one TTL.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, (PlayerId, Instant)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, including any that expired since the last `set`.
    pub fn len(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStore for MemoryTokenStore {
    async fn get(&self, token: &str) -> Result<Option<PlayerId>, StoreError> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get(token) {
            Some(&(player, expires)) if Instant::now() < expires => Ok(Some(player)),
            Some(_) => {
                tokens.remove(token);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, token: &str, player: PlayerId, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, &mut (_, expires)| now < expires);
        tokens.insert(token.to_owned(), (player, now + ttl));
        Ok(())
    }
}
