//! Daily challenge handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use civic_ledger_core::{ChallengeAnswer, ChallengeId, ChallengeInstance, PublicQuestion};

use super::parse_user_key;
use crate::auth::AuthUser;
use crate::challenges::AttemptResult;
use crate::error::ApiError;
use crate::state::AppState;

/// A challenge as shown to users (no answers).
#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    /// Challenge ID.
    pub id: ChallengeId,
    /// The day the challenge is for.
    pub publish_date: NaiveDate,
    /// Questions without their answers.
    pub questions: Vec<PublicQuestion>,
    /// XP for submitting.
    pub xp_reward: i64,
    /// Whether the requesting user already submitted (when a user was given).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted: Option<bool>,
}

impl ChallengeResponse {
    pub(crate) fn new(challenge: &ChallengeInstance, attempted: Option<bool>) -> Self {
        Self {
            id: challenge.id,
            publish_date: challenge.publish_date,
            questions: challenge.public_questions(),
            xp_reward: challenge.xp_reward,
            attempted,
        }
    }
}

/// Today's challenge query parameters.
#[derive(Debug, Deserialize)]
pub struct TodayQuery {
    /// Requesting user, by either key.
    #[serde(default)]
    pub user: Option<String>,
}

/// Get today's challenge.
pub async fn get_today(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TodayQuery>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let gate = state.challenges();
    let challenge = gate
        .current()
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No challenge published for {}", gate.today())))?;

    let attempted = match query.user.as_deref() {
        Some(raw) => Some(gate.has_attempted(parse_user_key(raw)?, challenge.id).await?),
        None => None,
    };

    Ok(Json(ChallengeResponse::new(&challenge, attempted)))
}

/// Attempt submission request.
#[derive(Debug, Deserialize)]
pub struct AttemptRequest {
    /// One answer per question.
    pub answers: Vec<ChallengeAnswer>,
    /// Seconds the user spent.
    #[serde(default)]
    pub time_taken_secs: u32,
}

/// Submit the authenticated user's attempt.
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(challenge_id): Path<String>,
    Json(body): Json<AttemptRequest>,
) -> Result<Json<AttemptResult>, ApiError> {
    let challenge_id = challenge_id
        .parse::<ChallengeId>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid challenge id: {challenge_id}")))?;

    tracing::debug!(
        subject = %auth.subject,
        challenge_id = %challenge_id,
        answers = body.answers.len(),
        "Processing challenge attempt"
    );

    let result = state
        .challenges()
        .submit(auth.user, challenge_id, body.answers, body.time_taken_secs)
        .await?;

    Ok(Json(result))
}
