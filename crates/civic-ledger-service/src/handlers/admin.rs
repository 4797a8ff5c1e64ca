//! Admin handlers: challenge publishing, reversals, reconciliation and
//! legacy import.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use civic_ledger_core::{ChallengeQuestion, EntryId, LegacyEntry, ReconcileReport};
use civic_ledger_store::Store;

use super::challenges::ChallengeResponse;
use super::progress::EntryResponse;
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Maximum legacy rows per import request.
pub const MAX_IMPORT_BATCH: usize = 1000;

/// Publish challenge request.
#[derive(Debug, Deserialize)]
pub struct PublishChallengeRequest {
    /// The day the challenge is for.
    pub publish_date: NaiveDate,
    /// Questions with their correct answers.
    pub questions: Vec<ChallengeQuestion>,
    /// XP for submitting.
    pub xp_reward: i64,
}

/// Publish a challenge. Publishing an already covered day returns the
/// existing challenge.
pub async fn publish_challenge(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<PublishChallengeRequest>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    tracing::info!(
        admin_id = %auth.admin_id,
        publish_date = %body.publish_date,
        "Admin publishing challenge"
    );

    let challenge = state
        .challenges()
        .publish(body.publish_date, body.questions, body.xp_reward)
        .await?;

    Ok(Json(ChallengeResponse::new(&challenge, None)))
}

/// Reversal request.
#[derive(Debug, Deserialize)]
pub struct ReverseRequest {
    /// Why the entry is reversed (for audit).
    pub reason: String,
}

/// Reverse a ledger entry.
pub async fn reverse_entry(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(entry_id): Path<String>,
    Json(body): Json<ReverseRequest>,
) -> Result<Json<EntryResponse>, ApiError> {
    let entry_id = entry_id
        .parse::<EntryId>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid entry id: {entry_id}")))?;
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("Reason is required".into()));
    }

    tracing::info!(
        admin_id = %auth.admin_id,
        entry_id = %entry_id,
        reason = %body.reason,
        "Admin reversing entry"
    );

    let reversal = state.ledger().reverse(entry_id, &body.reason).await?;
    Ok(Json(reversal.into()))
}

/// Run the reconciliation sweep.
pub async fn run_reconcile(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<ReconcileReport>, ApiError> {
    tracing::info!(admin_id = %auth.admin_id, "Admin triggered reconciliation");
    let report = state.sweep().run().await?;
    Ok(Json(report))
}

/// Legacy import request.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// Historical rows, each carrying at least one user key.
    pub entries: Vec<LegacyEntry>,
}

/// Import response.
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    /// Results for each row, in request order.
    pub results: Vec<ImportResult>,
    /// Rows written.
    pub imported: usize,
    /// Rows rejected.
    pub failed: usize,
}

/// Result for a single imported row.
#[derive(Debug, Serialize)]
pub struct ImportResult {
    /// Position in the request.
    pub index: usize,
    /// The written entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
    /// Error message if rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Import historical ledger rows as-is. Derived state is left to the sweep.
pub async fn import_legacy(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    if body.entries.len() > MAX_IMPORT_BATCH {
        return Err(ApiError::BadRequest(format!(
            "At most {MAX_IMPORT_BATCH} entries per import"
        )));
    }

    tracing::info!(
        admin_id = %auth.admin_id,
        entries = body.entries.len(),
        "Admin importing legacy entries"
    );

    let mut results = Vec::with_capacity(body.entries.len());
    let mut imported = 0;
    let mut failed = 0;

    for (index, entry) in body.entries.iter().enumerate() {
        match import_one(state.store.as_ref(), entry).await {
            Ok(entry_id) => {
                results.push(ImportResult {
                    index,
                    entry_id: Some(entry_id),
                    error: None,
                });
                imported += 1;
            }
            Err(e) => {
                results.push(ImportResult {
                    index,
                    entry_id: None,
                    error: Some(e),
                });
                failed += 1;
            }
        }
    }

    Ok(Json(ImportResponse {
        results,
        imported,
        failed,
    }))
}

async fn import_one(store: &dyn Store, entry: &LegacyEntry) -> Result<EntryId, String> {
    entry.validate().map_err(|e| e.to_string())?;
    store
        .import_legacy_entry(entry)
        .await
        .map_err(|e| e.to_string())
}
