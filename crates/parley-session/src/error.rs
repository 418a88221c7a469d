use thiserror::Error;

use parley_db::StoreError;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed by peer")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("input line longer than {0} bytes")]
    LineTooLong(usize),

    /// Bounded retries ran out, e.g. "reading password failed".
    #[error("{0}")]
    AttemptsExhausted(&'static str),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("server shutting down")]
    Shutdown,

    #[error("no user is signed in")]
    SignedOut,
}

/// Failures of a relationship workflow. Rendered to the user; none of them
/// ends the session.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("You cannot invite yourself.")]
    SelfInvite,

    #[error("That user no longer exists.")]
    UnknownUser,

    #[error("You are already friends.")]
    AlreadyFriends,

    #[error("An invitation between you is already pending.")]
    AlreadyPending,

    #[error(transparent)]
    Store(#[from] StoreError),
}
