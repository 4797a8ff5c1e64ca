//! Leaderboard handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use civic_ledger_core::{LeaderboardEntry, LeaderboardWindow};

use super::parse_user_key;
use crate::error::ApiError;
use crate::state::AppState;

/// Leaderboard query parameters.
#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// `all_time` (default), `weekly` or `monthly`.
    #[serde(default)]
    pub window: Option<String>,
    /// Page size, clamped to the configured maximum.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Requesting user, by either key, for `my_rank`.
    #[serde(default)]
    pub user: Option<String>,
}

/// Rank users by XP within a window.
pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardEntry>, ApiError> {
    let window = match query.window.as_deref() {
        Some(raw) => raw
            .parse::<LeaderboardWindow>()
            .map_err(|_| ApiError::BadRequest(format!("Unknown leaderboard window: {raw}")))?,
        None => LeaderboardWindow::default(),
    };
    let user = query.user.as_deref().map(parse_user_key).transpose()?;

    let board = state.ranker().rank(window, query.limit, user).await?;
    Ok(Json(board))
}
