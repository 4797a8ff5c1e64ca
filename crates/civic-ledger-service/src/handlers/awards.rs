//! Direct award handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use civic_ledger_core::{AwardOutcome, EntryId, NewAward, SourceType};

use super::parse_user_key;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Award request from a collaborator.
#[derive(Debug, Deserialize)]
pub struct AwardRequest {
    /// The user, by either key.
    pub user: String,
    /// What kind of action is credited.
    pub source_type: SourceType,
    /// The credited thing; together with the user and source type this is the
    /// idempotency key.
    pub reference_id: String,
    /// XP to credit. Negative only for `manual_adjustment`.
    pub amount: i64,
    /// Optional note.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Award response.
#[derive(Debug, Serialize)]
pub struct AwardResponse {
    /// `false` when the idempotency key was already credited.
    pub accepted: bool,
    /// The new entry, or the one that already held the key.
    pub entry_id: EntryId,
    /// Total XP after the award (accepted awards only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_xp: Option<i64>,
    /// Level after the award (accepted awards only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Streak after the award (accepted awards only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_streak: Option<u32>,
}

impl From<AwardOutcome> for AwardResponse {
    fn from(outcome: AwardOutcome) -> Self {
        Self {
            accepted: outcome.accepted,
            entry_id: outcome.entry_id,
            total_xp: outcome.progress.as_ref().map(|p| p.total_xp),
            level: outcome.progress.as_ref().map(|p| p.level),
            current_streak: outcome.streak.as_ref().map(|s| s.current_streak),
        }
    }
}

/// Credit XP to a user.
pub async fn create_award(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<AwardRequest>,
) -> Result<Json<AwardResponse>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        user = %body.user,
        source_type = %body.source_type,
        reference_id = %body.reference_id,
        "Processing award"
    );

    let user = parse_user_key(&body.user)?;
    let mut award = NewAward::new(body.source_type, body.reference_id, body.amount);
    if let Some(reason) = body.reason {
        award = award.with_reason(reason);
    }

    let outcome = state.ledger().award(user, &award).await?;
    Ok(Json(outcome.into()))
}
