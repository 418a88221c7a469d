use thiserror::Error;

use crate::relationships::ListName;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("a user with email {0} already exists")]
    DuplicateEmail(String),

    /// A mutation that should have changed exactly one document changed none.
    #[error("no document updated: {0}")]
    NoDocumentUpdate(String),

    /// A guarded list already holds the peer.
    #[error("peer already in {0}")]
    AlreadyPresent(ListName),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("database error: {0}")]
    Backend(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
