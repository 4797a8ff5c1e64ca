//! API handlers.

pub mod admin;
pub mod awards;
pub mod challenges;
pub mod events;
pub mod health;
pub mod leaderboard;
pub mod progress;
pub mod users;

use civic_ledger_core::UserKey;

use crate::error::ApiError;

/// Parse a user key from a path segment or request field.
pub(crate) fn parse_user_key(raw: &str) -> Result<UserKey, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user key: {raw}")))
}
