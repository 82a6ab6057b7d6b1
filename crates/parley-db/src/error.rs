use rusqlite::ErrorCode;

/// Error taxonomy of the storage core. Each kind maps to a distinct
/// caller-facing HTTP status in parley-api.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conversation does not exist or you are not a member")]
    Forbidden,

    #[error("{0}")]
    Conflict(&'static str),

    /// Transient lock contention. `Database::with_tx` retries these a
    /// bounded number of times before converting to `Internal`.
    #[error("database busy")]
    Busy,

    #[error("internal storage error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &e {
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                return StoreError::Busy;
            }
        }
        tracing::debug!("database error: {e}");
        StoreError::Internal(e.to_string())
    }
}

/// True for primary-key and unique-index violations. FK failures report a
/// different extended code and fall through to `Internal`.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _)
        if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
}
