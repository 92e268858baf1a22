//! Players, pages and answers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use storygate_protocol::{AnswerId, AnswerView, PageId, PlayerId, Stat, Stats};

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A player record and their progress through the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub login: String,
    /// Opaque credential; hashing and verification happen elsewhere.
    pub password_hash: String,
    pub current_page: PageId,
    pub stats: Stats,
    /// Narrative milestones. A flag is never removed except by a reset.
    pub flags: BTreeSet<String>,
}

impl Player {
    /// Creates a fresh player on the start page with zeroed stats.
    pub fn new(
        id: PlayerId,
        login: impl Into<String>,
        password_hash: impl Into<String>,
        start_page: PageId,
    ) -> Self {
        Self {
            id,
            login: login.into(),
            password_hash: password_hash.into(),
            current_page: start_page,
            stats: Stats::default(),
            flags: BTreeSet::new(),
        }
    }

    /// Zeroes every stat, clears all flags and moves back to `start_page`.
    pub fn reset(&mut self, start_page: PageId) {
        self.stats = Stats::default();
        self.flags.clear();
        self.current_page = start_page;
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Sets a flag. Setting it twice is a no-op.
    pub fn set_flag(&mut self, flag: impl Into<String>) {
        self.flags.insert(flag.into());
    }

    /// Adds the answer's deltas and unions its flags into the player's.
    pub fn apply_answer(&mut self, answer: &Answer) {
        self.stats.apply(&answer.deltas);
        self.flags.extend(answer.flags.iter().cloned());
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// How a page picks its successor. Exactly one applies per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageKind {
    /// Follows `next_page`.
    Linear,
    /// Requires one of the page's answers, then follows `next_page`.
    Question,
    /// Runs `script`, which decides where the player goes. `next_page` is
    /// ignored.
    Jumper { script: String },
}

/// A page of the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub text: String,
    /// Academic year the page belongs to, shown alongside the text.
    #[serde(default)]
    pub year: i32,
    pub kind: PageKind,
    /// `None` marks the end of the story: advancing past it restarts.
    pub next_page: Option<PageId>,
}

impl Page {
    /// A plain page that leads to `next_page`.
    pub fn linear(id: PageId, text: impl Into<String>, next_page: Option<PageId>) -> Self {
        Self {
            id,
            text: text.into(),
            year: 0,
            kind: PageKind::Linear,
            next_page,
        }
    }

    /// A question page that leads to `next_page` once answered.
    pub fn question(id: PageId, text: impl Into<String>, next_page: Option<PageId>) -> Self {
        Self {
            kind: PageKind::Question,
            ..Self::linear(id, text, next_page)
        }
    }

    /// A page whose successor is chosen by `script`.
    pub fn jumper(id: PageId, text: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            kind: PageKind::Jumper {
                script: script.into(),
            },
            ..Self::linear(id, text, None)
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    pub fn is_question(&self) -> bool {
        matches!(self.kind, PageKind::Question)
    }

    pub fn is_jumper(&self) -> bool {
        matches!(self.kind, PageKind::Jumper { .. })
    }
}

// ---------------------------------------------------------------------------
// Answer
// ---------------------------------------------------------------------------

/// One choice on a question page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    /// The question page this answer belongs to.
    pub page_id: PageId,
    pub text: String,
    pub deltas: Stats,
    pub flags: BTreeSet<String>,
}

impl Answer {
    pub fn new(id: AnswerId, page_id: PageId, text: impl Into<String>) -> Self {
        Self {
            id,
            page_id,
            text: text.into(),
            deltas: Stats::default(),
            flags: BTreeSet::new(),
        }
    }

    pub fn with_delta(mut self, stat: Stat, delta: i64) -> Self {
        self.deltas.add(stat, delta);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    /// What the client is shown for this answer.
    pub fn view(&self) -> AnswerView {
        AnswerView {
            answer_id: self.id,
            text: self.text.clone(),
            deltas: self.deltas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        Player::new(PlayerId(1), "ann", "hash", PageId(1))
    }

    #[test]
    fn test_player_new_starts_clean() {
        let p = player();
        assert_eq!(p.current_page, PageId(1));
        assert!(p.stats.is_zero());
        assert!(p.flags.is_empty());
    }

    #[test]
    fn test_player_reset_clears_everything() {
        let mut p = player();
        p.current_page = PageId(9);
        p.stats.add(Stat::Prestige, 4);
        p.stats.add(Stat::Soberness, -3);
        p.set_flag("met_mentor");

        p.reset(PageId(1));

        assert_eq!(p.current_page, PageId(1));
        assert_eq!(p.stats, Stats::default());
        assert!(p.flags.is_empty());
    }

    #[test]
    fn test_player_set_flag_is_idempotent() {
        let mut p = player();
        p.set_flag("a");
        p.set_flag("a");
        assert_eq!(p.flags.len(), 1);
        assert!(p.has_flag("a"));
        assert!(!p.has_flag("b"));
    }

    #[test]
    fn test_player_apply_answer_adds_deltas_and_unions_flags() {
        let mut p = player();
        p.set_flag("met_mentor");
        let answer = Answer::new(AnswerId(1), PageId(2), "Go")
            .with_delta(Stat::Knowledge, 5)
            .with_delta(Stat::Connections, -1)
            .with_flag("met_mentor")
            .with_flag("skipped_class");

        p.apply_answer(&answer);

        assert_eq!(p.stats.knowledge, 5);
        assert_eq!(p.stats.connections, -1);
        assert_eq!(p.flags.len(), 2);
        assert!(p.has_flag("skipped_class"));
    }

    #[test]
    fn test_page_constructors_set_kind() {
        assert!(Page::question(PageId(1), "Q", Some(PageId(2))).is_question());
        assert!(Page::jumper(PageId(2), "J", "jump(3)").is_jumper());
        let linear = Page::linear(PageId(3), "L", None).with_year(2);
        assert!(!linear.is_question() && !linear.is_jumper());
        assert_eq!(linear.year, 2);
        assert_eq!(Page::jumper(PageId(2), "J", "").next_page, None);
    }

    #[test]
    fn test_answer_view_hides_flags() {
        let answer = Answer::new(AnswerId(4), PageId(1), "Party")
            .with_delta(Stat::Soberness, -2)
            .with_flag("hungover");
        let view = answer.view();
        assert_eq!(view.answer_id, AnswerId(4));
        assert_eq!(view.deltas.soberness, -2);
    }
}
