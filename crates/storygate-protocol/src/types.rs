//! Core protocol types for Storygate's wire format.
//!
//! Every type here travels "on the wire": it is serialized to JSON, sent
//! over the WebSocket, and parsed on the other side. Inbound messages are a
//! tagged union keyed by the `channel` field, so a frame is fully validated
//! before anything acts on it.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player record.
///
/// `#[serde(transparent)]` keeps it a plain number in JSON.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a story page.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

/// A unique identifier for an answer on a question page.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AnswerId(pub u64);

impl fmt::Display for AnswerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "answer-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// One of the five player stat counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Knowledge,
    Performance,
    Soberness,
    Prestige,
    Connections,
}

impl Stat {
    /// Every stat, in wire order.
    pub const ALL: [Stat; 5] = [
        Stat::Knowledge,
        Stat::Performance,
        Stat::Soberness,
        Stat::Prestige,
        Stat::Connections,
    ];

    /// The lowercase name used on the wire and as the script getter.
    pub fn name(self) -> &'static str {
        match self {
            Stat::Knowledge => "knowledge",
            Stat::Performance => "performance",
            Stat::Soberness => "soberness",
            Stat::Prestige => "prestige",
            Stat::Connections => "connections",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of values for all five stats.
///
/// Used both for a player's counters and for an answer's deltas: applying
/// an answer is a single keyed walk over [`Stat::ALL`] rather than five
/// hand-written additions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub knowledge: i64,
    #[serde(default)]
    pub performance: i64,
    #[serde(default)]
    pub soberness: i64,
    #[serde(default)]
    pub prestige: i64,
    #[serde(default)]
    pub connections: i64,
}

impl Stats {
    /// Returns the value of one stat.
    pub fn get(&self, stat: Stat) -> i64 {
        match stat {
            Stat::Knowledge => self.knowledge,
            Stat::Performance => self.performance,
            Stat::Soberness => self.soberness,
            Stat::Prestige => self.prestige,
            Stat::Connections => self.connections,
        }
    }

    fn slot(&mut self, stat: Stat) -> &mut i64 {
        match stat {
            Stat::Knowledge => &mut self.knowledge,
            Stat::Performance => &mut self.performance,
            Stat::Soberness => &mut self.soberness,
            Stat::Prestige => &mut self.prestige,
            Stat::Connections => &mut self.connections,
        }
    }

    /// Adds a signed delta to one stat. Saturates instead of overflowing.
    pub fn add(&mut self, stat: Stat, delta: i64) {
        let slot = self.slot(stat);
        *slot = slot.saturating_add(delta);
    }

    /// Adds every stat of `deltas` to the matching counter.
    pub fn apply(&mut self, deltas: &Stats) {
        for stat in Stat::ALL {
            self.add(stat, deltas.get(stat));
        }
    }

    /// Returns `true` if every counter is zero.
    pub fn is_zero(&self) -> bool {
        Stat::ALL.iter().all(|stat| self.get(*stat) == 0)
    }
}

// ---------------------------------------------------------------------------
// AnswerField: the optional answer id of a story_move
// ---------------------------------------------------------------------------

/// The `answerId` field of a `story_move` message.
///
/// A missing or malformed id is not a decode failure: the frame still
/// parses, and navigation decides whether an answer was required. That way
/// the client gets an input error rather than a generic one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnswerField {
    /// The field was missing or `null`.
    #[default]
    Absent,
    /// The field was present but not a non-negative integer.
    Malformed,
    /// A well-formed answer id.
    Valid(AnswerId),
}

impl AnswerField {
    /// Returns `true` if no id was sent.
    pub fn is_absent(&self) -> bool {
        matches!(self, AnswerField::Absent)
    }
}

impl From<AnswerId> for AnswerField {
    fn from(id: AnswerId) -> Self {
        AnswerField::Valid(id)
    }
}

impl<'de> Deserialize<'de> for AnswerField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u64),
            Other(IgnoredAny),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => AnswerField::Absent,
            Some(Raw::Id(id)) => AnswerField::Valid(AnswerId(id)),
            Some(Raw::Other(_)) => AnswerField::Malformed,
        })
    }
}

impl Serialize for AnswerField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AnswerField::Valid(id) => id.serialize(serializer),
            AnswerField::Absent | AnswerField::Malformed => serializer.serialize_none(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// A message sent by the client, tagged by its `channel`.
///
/// ```text
/// {"channel":"auth","authToken":"..."}
/// {"channel":"story_move","answerId":12}
/// {"channel":"story_save"}
/// {"channel":"story_reset"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to the player behind a session token.
    Auth {
        /// Anything other than a string counts as no token.
        #[serde(rename = "authToken", default, deserialize_with = "lenient_token")]
        auth_token: Option<String>,
    },

    /// Advance to the next page, answering the current question if any.
    StoryMove {
        #[serde(
            rename = "answerId",
            default,
            skip_serializing_if = "AnswerField::is_absent"
        )]
        answer_id: AnswerField,
    },

    /// Persist the player's progress now.
    StorySave,

    /// Restart the story from the first page.
    StoryReset,
}

fn lenient_token<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Token(String),
        Other(IgnoredAny),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Token(token)) => Some(token),
        Some(Raw::Other(_)) | None => None,
    })
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// An answer as shown to the client: id, text and what it does to stats.
/// The flags an answer grants stay on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerView {
    #[serde(rename = "answerId")]
    pub answer_id: AnswerId,
    pub text: String,
    #[serde(flatten)]
    pub deltas: Stats,
}

/// Category of a failure reported through [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request was missing a field or carried a malformed one.
    Input,
    /// A referenced page or answer does not exist (or does not belong).
    NotFound,
    /// Anything else: unknown message shape, unauthenticated access, or a
    /// storage failure.
    Failure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Input => "input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Failure => "failure",
        })
    }
}

/// A message sent by the server, tagged by its `channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of an authentication attempt. Only failures are sent on this
    /// channel; success is signalled by the stats and story text that follow.
    Auth { response: bool },

    /// The player's current counters.
    Stats { stats: Stats },

    /// The page the player is on.
    StoryText {
        text: String,
        year: i32,
        /// Present only when the page is a question.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answers: Option<Vec<AnswerView>>,
    },

    /// Result of an explicit save.
    StorySave { response: bool },

    /// A request could not be served. `response` is always `false`.
    Error {
        response: bool,
        kind: ErrorKind,
        message: String,
    },
}

impl ServerMessage {
    /// Builds an error envelope.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            response: false,
            kind,
            message: message.into(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
