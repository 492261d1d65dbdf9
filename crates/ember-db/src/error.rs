use thiserror::Error;

/// Domain errors surfaced by the store. Everything except `Storage` and
/// `LockPoisoned` is terminal: retrying the same call yields the same answer.
#[derive(Debug, Error)]
pub enum StoreError {
    // -- swipe ledger --
    #[error("cannot swipe on yourself")]
    SelfSwipe,
    #[error("target user not found")]
    TargetNotFound,
    #[error("target user is inactive")]
    TargetInactive,
    #[error("already swiped on this user")]
    DuplicateSwipe,
    #[error("match not found")]
    MatchNotFound,

    // -- conversation gate / message store --
    #[error("users are not matched")]
    NotMatched,
    #[error("cannot send message to yourself")]
    SelfMessage,
    #[error("message content is empty")]
    EmptyContent,
    #[error("message content exceeds {max} characters", max = crate::messages::MAX_CONTENT_LEN)]
    ContentTooLong,
    #[error("invalid reply message")]
    InvalidReplyTarget,
    #[error("message not found")]
    MessageNotFound,
    #[error("message does not belong to requester")]
    NotMessageOwner,

    // -- users --
    #[error("user not found")]
    UserNotFound,
    #[error("photo not found")]
    PhotoNotFound,

    // -- infrastructure --
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("column encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    LockPoisoned,
}
