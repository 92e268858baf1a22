//! Moving a player through the page graph.
//!
//! [`Navigator`] borrows the store and the script engine for one request.
//! Every method takes the player by `&mut`, so the caller's ownership of the
//! player is what guarantees one navigation at a time.
//!
//! A page that can't be advanced leaves the player exactly where they were:
//! errors are returned before anything is written. The one exception is a
//! failing jumper script, whose stat and flag changes stay applied.

use storygate_protocol::{AnswerField, PageId, ServerMessage};
use tracing::{debug, warn};

use crate::{
    Answer, Page, PageKind, Player, ScriptCapabilities, ScriptEngine, StoreError, StoryError,
    StoryStore,
};

/// How an advance or reset changed the player's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The player moved to a new page.
    Moved,
    /// The player passed the end of the story and was reset.
    Restarted,
    /// A jumper script failed or didn't jump; the player is still on it.
    Stayed,
}

/// The result of a navigation: what happened and the page the player is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub outcome: Outcome,
    pub page: Page,
}

/// Resolves answers, scripts and links into the player's next page.
pub struct Navigator<'a, S, E> {
    store: &'a S,
    engine: &'a E,
    start_page: PageId,
}

impl<'a, S: StoryStore, E: ScriptEngine> Navigator<'a, S, E> {
    pub fn new(store: &'a S, engine: &'a E, start_page: PageId) -> Self {
        Self {
            store,
            engine,
            start_page,
        }
    }

    /// The page the player is currently on.
    pub async fn current(&self, player: &Player) -> Result<Page, StoryError> {
        self.page(player.current_page).await
    }

    /// Advances the player past their current page.
    ///
    /// - question pages need a valid `answer` that belongs to the page; its
    ///   deltas and flags are applied before moving on
    /// - jumper pages run their script, which alone picks the next page
    /// - linear pages follow their link
    ///
    /// Following a link to the end of the story resets the player.
    pub async fn advance(
        &self,
        player: &mut Player,
        answer: AnswerField,
    ) -> Result<Step, StoryError> {
        let page = self.current(player).await?;

        match &page.kind {
            PageKind::Question => {
                let answer = self.resolve_answer(&page, answer).await?;
                let next = self.follow(&page).await?;
                player.apply_answer(&answer);
                debug!(player_id = %player.id, answer_id = %answer.id, "answer applied");
                Ok(self.commit(player, next))
            }
            PageKind::Jumper { script } => self.jump(player, page.clone(), script).await,
            PageKind::Linear => {
                let next = self.follow(&page).await?;
                Ok(self.commit(player, next))
            }
        }
    }

    /// Resets the player to the start of the story.
    pub async fn reset(&self, player: &mut Player) -> Result<Step, StoryError> {
        let page = self.page(self.start_page).await?;
        player.reset(self.start_page);
        Ok(Step {
            outcome: Outcome::Restarted,
            page,
        })
    }

    /// Builds the `story_text` envelope for `page`, listing its answers if
    /// it is a question.
    pub async fn render(&self, page: &Page) -> Result<ServerMessage, StoryError> {
        let answers = if page.is_question() {
            let answers = self.store.find_answers_for_page(page.id).await?;
            Some(answers.iter().map(Answer::view).collect())
        } else {
            None
        };
        Ok(ServerMessage::StoryText {
            text: page.text.clone(),
            year: page.year,
            answers,
        })
    }

    async fn page(&self, id: PageId) -> Result<Page, StoryError> {
        match self.store.find_page(id).await {
            Ok(page) => Ok(page),
            Err(StoreError::NotFound(_)) => Err(StoryError::PageNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_answer(&self, page: &Page, field: AnswerField) -> Result<Answer, StoryError> {
        let id = match field {
            AnswerField::Valid(id) => id,
            AnswerField::Absent => return Err(StoryError::MissingAnswer(page.id)),
            AnswerField::Malformed => return Err(StoryError::MalformedAnswer),
        };
        let answer = match self.store.find_answer(id).await {
            Ok(answer) => answer,
            Err(StoreError::NotFound(_)) => return Err(StoryError::AnswerNotFound(id)),
            Err(e) => return Err(e.into()),
        };
        if answer.page_id != page.id {
            return Err(StoryError::AnswerNotOnPage {
                answer: id,
                page: page.id,
            });
        }
        Ok(answer)
    }

    /// Loads the page a link points at. A missing link is the end of the
    /// story and leads back to the start page.
    async fn follow(&self, page: &Page) -> Result<(Outcome, Page), StoryError> {
        match page.next_page {
            Some(id) => Ok((Outcome::Moved, self.page(id).await?)),
            None => Ok((Outcome::Restarted, self.page(self.start_page).await?)),
        }
    }

    fn commit(&self, player: &mut Player, (outcome, page): (Outcome, Page)) -> Step {
        if outcome == Outcome::Restarted {
            debug!(player_id = %player.id, "end of story, restarting");
            player.reset(self.start_page);
        } else {
            player.current_page = page.id;
        }
        Step { outcome, page }
    }

    async fn jump(&self, player: &mut Player, page: Page, script: &str) -> Result<Step, StoryError> {
        let origin = player.current_page;
        let stayed = |page: Page| Step {
            outcome: Outcome::Stayed,
            page,
        };

        if let Err(e) = self.engine.execute(script, ScriptCapabilities::new(player)) {
            warn!(player_id = %player.id, page_id = %origin, error = %e, "jumper script failed");
            player.current_page = origin;
            return Ok(stayed(page));
        }

        let target = player.current_page;
        if target == origin {
            return Ok(stayed(page));
        }

        match self.page(target).await {
            Ok(next) => Ok(Step {
                outcome: Outcome::Moved,
                page: next,
            }),
            Err(StoryError::PageNotFound(_)) => {
                warn!(
                    player_id = %player.id,
                    page_id = %origin,
                    jump_to = %target,
                    "jumper script jumped to a missing page"
                );
                player.current_page = origin;
                Ok(stayed(page))
            }
            Err(e) => {
                player.current_page = origin;
                Err(e)
            }
        }
    }
}
