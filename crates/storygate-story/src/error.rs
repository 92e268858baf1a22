use storygate_protocol::{AnswerId, ErrorKind, PageId};

use crate::StoreError;

/// Why a navigation request could not be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoryError {
    /// A question page was advanced without an answer id.
    #[error("{0} is a question and needs an answerId")]
    MissingAnswer(PageId),

    /// The answer id was present but not a non-negative integer.
    #[error("answerId must be a non-negative integer")]
    MalformedAnswer,

    #[error("{0} does not exist")]
    PageNotFound(PageId),

    #[error("{0} does not exist")]
    AnswerNotFound(AnswerId),

    /// The answer exists but belongs to a different question.
    #[error("{answer} does not belong to {page}")]
    AnswerNotOnPage { answer: AnswerId, page: PageId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StoryError {
    /// Maps the error onto the category reported to the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoryError::MissingAnswer(_) | StoryError::MalformedAnswer => ErrorKind::Input,
            StoryError::PageNotFound(_)
            | StoryError::AnswerNotFound(_)
            | StoryError::AnswerNotOnPage { .. } => ErrorKind::NotFound,
            StoryError::Store(_) => ErrorKind::Failure,
        }
    }
}
