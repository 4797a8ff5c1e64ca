//! Progress, streak and ledger history handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use civic_ledger_core::{Clock, EntryId, LedgerEntry, PublicUserId, SourceType};

use super::parse_user_key;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::ledger::MAX_HISTORY_LIMIT;
use crate::state::AppState;

/// Progress response.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    /// The user (public key).
    pub user_id: PublicUserId,
    /// Sum of all ledger entries.
    pub total_xp: i64,
    /// Level on the configured curve.
    pub level: u32,
    /// XP still needed for the next level (`None` at the top of the curve).
    pub xp_to_next_level: Option<i64>,
    /// Modules completed.
    pub modules_completed: u32,
    /// Lessons completed.
    pub lessons_completed: u32,
    /// Quizzes passed.
    pub quizzes_passed: u32,
    /// Achievements earned.
    pub achievements_earned: u32,
    /// Curve version the level was computed with.
    pub curve_version: u32,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

/// Get a user's progress.
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let key = parse_user_key(&user)?;
    let ledger = state.ledger();
    let (identity, progress) = ledger.progress(key).await?;

    Ok(Json(ProgressResponse {
        user_id: identity.public,
        total_xp: progress.total_xp,
        level: progress.level,
        xp_to_next_level: ledger.curve().xp_to_next_level(progress.total_xp),
        modules_completed: progress.modules_completed,
        lessons_completed: progress.lessons_completed,
        quizzes_passed: progress.quizzes_passed,
        achievements_earned: progress.achievements_earned,
        curve_version: progress.curve_version,
        updated_at: progress.updated_at,
    }))
}

/// Streak response.
#[derive(Debug, Serialize)]
pub struct StreakResponse {
    /// The user (public key).
    pub user_id: PublicUserId,
    /// Consecutive active days ending at `last_activity_date`.
    pub current_streak: u32,
    /// Best run ever.
    pub longest_streak: u32,
    /// Most recent active day (UTC).
    pub last_activity_date: Option<NaiveDate>,
    /// Whether the streak can still be extended today.
    pub active: bool,
}

/// Get a user's streak.
pub async fn get_streak(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<Json<StreakResponse>, ApiError> {
    let key = parse_user_key(&user)?;
    let (identity, streak) = state.ledger().streak(key).await?;
    let today = state.clock.now().date_naive();

    Ok(Json(StreakResponse {
        user_id: identity.public,
        current_streak: streak.current_streak,
        longest_streak: streak.longest_streak,
        last_activity_date: streak.last_activity_date,
        active: streak.is_active(today),
    }))
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    /// Maximum number of entries to return.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination.
    #[serde(default)]
    pub offset: usize,
}

const fn default_limit() -> usize {
    50
}

/// Ledger entry response.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    /// Entry ID.
    pub id: EntryId,
    /// Source type.
    pub source_type: SourceType,
    /// Reference.
    pub reference_id: String,
    /// Signed XP amount.
    pub amount: i64,
    /// The entry this one reverses, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverses: Option<EntryId>,
    /// Note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for EntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            source_type: entry.source_type,
            reference_id: entry.reference_id,
            amount: entry.amount,
            reverses: entry.reverses,
            reason: entry.reason,
            created_at: entry.created_at,
        }
    }
}

/// Entries list response.
#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    /// The user (public key).
    pub user_id: PublicUserId,
    /// Entries, newest first.
    pub entries: Vec<EntryResponse>,
    /// Whether there may be more entries.
    pub has_more: bool,
}

/// List a user's ledger entries.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, ApiError> {
    let key = parse_user_key(&user)?;
    let (identity, entries) = state.ledger().entries(key, query.limit, query.offset).await?;
    let has_more = entries.len() >= query.limit.clamp(1, MAX_HISTORY_LIMIT);

    Ok(Json(EntriesResponse {
        user_id: identity.public,
        entries: entries.into_iter().map(EntryResponse::from).collect(),
        has_more,
    }))
}
