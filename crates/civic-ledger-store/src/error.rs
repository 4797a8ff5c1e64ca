//! Error types for ledger storage.

use civic_ledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// Unique-constraint violations that carry domain meaning are mapped to typed
/// variants; everything else is `Database`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No user matches the key.
    #[error("unknown user: {key}")]
    UnknownUser {
        /// The key that failed to resolve.
        key: String,
    },

    /// Ledger entry not found.
    #[error("ledger entry not found: {entry_id}")]
    EntryNotFound {
        /// The entry ID.
        entry_id: String,
    },

    /// The entry already has a reversal.
    #[error("ledger entry already reversed: {entry_id}")]
    AlreadyReversed {
        /// The entry ID.
        entry_id: String,
    },

    /// The entry is itself a reversal.
    #[error("invalid reversal: {0}")]
    InvalidReversal(String),

    /// Challenge not found.
    #[error("challenge not found: {challenge_id}")]
    ChallengeNotFound {
        /// The challenge ID.
        challenge_id: String,
    },

    /// The user already attempted the challenge.
    #[error("challenge {challenge_id} already attempted by user {user}")]
    AlreadyAttempted {
        /// The public key of the user.
        user: String,
        /// The challenge ID.
        challenge_id: String,
    },

    /// A write would violate a uniqueness constraint held by another row.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(error.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UnknownUser { key } => Self::UnknownUser { key },
            StoreError::EntryNotFound { entry_id } => Self::EntryNotFound { entry_id },
            StoreError::AlreadyReversed { entry_id } => Self::AlreadyReversed { entry_id },
            StoreError::InvalidReversal(message) => Self::InvalidReversal(message),
            StoreError::ChallengeNotFound { challenge_id } => {
                Self::ChallengeNotFound { challenge_id }
            }
            StoreError::AlreadyAttempted { user, challenge_id } => {
                Self::AlreadyAttempted { user, challenge_id }
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Whether a database error is a unique-constraint violation.
pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23505")
    )
}

/// Whether a database error is a foreign-key violation.
pub(crate) fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23503")
    )
}
