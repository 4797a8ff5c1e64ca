//! Error types for the civic ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
///
/// Idempotent duplicates (an award whose key was already credited) are not
/// errors and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Neither key space contains the requested user.
    #[error("unknown user: {key}")]
    UnknownUser {
        /// The key that failed to resolve.
        key: String,
    },

    /// The user already submitted an attempt for this challenge.
    #[error("challenge {challenge_id} already attempted by user {user}")]
    AlreadyAttempted {
        /// The public key of the user.
        user: String,
        /// The challenge that was attempted.
        challenge_id: String,
    },

    /// The ledger entry already has a reversal.
    #[error("ledger entry already reversed: {entry_id}")]
    AlreadyReversed {
        /// The entry that was already reversed.
        entry_id: String,
    },

    /// Ledger entry not found.
    #[error("ledger entry not found: {entry_id}")]
    EntryNotFound {
        /// The entry ID that was not found.
        entry_id: String,
    },

    /// Challenge not found.
    #[error("challenge not found: {challenge_id}")]
    ChallengeNotFound {
        /// The challenge ID that was not found.
        challenge_id: String,
    },

    /// The challenge is scheduled for a later day and cannot be attempted yet.
    #[error("challenge {challenge_id} opens on {publish_date}")]
    ChallengeNotOpen {
        /// The challenge ID.
        challenge_id: String,
        /// The day the challenge becomes available.
        publish_date: chrono::NaiveDate,
    },

    /// The entry cannot be reversed (for example, it is itself a reversal).
    #[error("invalid reversal: {0}")]
    InvalidReversal(String),

    /// Invalid XP amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid reference identifier.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Invalid challenge definition.
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid configuration (level curve, point schedule).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}
