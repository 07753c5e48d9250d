use thiserror::Error;

/// Core error taxonomy returned by the store and service layers.
/// The HTTP layer maps these onto status codes; nothing below it
/// reports partial success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// A referenced user, conversation, or message does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The acting user is not a member of the target conversation.
    #[error("not a member of this conversation")]
    Unauthorized,

    #[error("{0}")]
    InvalidArgument(&'static str),

    /// A uniqueness constraint was violated and not idempotently absorbed
    /// (duplicate receipts never surface here — they are silent no-ops).
    #[error("{0}")]
    Conflict(&'static str),

    /// The store could not be reached or the operation could not complete.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
