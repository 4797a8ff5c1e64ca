//! Collaborator event handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::ServiceAuth;
use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::events::{CollaboratorEvent, EventOutcome};
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Batch event request.
#[derive(Debug, Deserialize)]
pub struct BatchEventRequest {
    /// Events, processed in order. Each is parsed on its own so one malformed
    /// event does not reject the batch.
    pub events: Vec<serde_json::Value>,
}

/// Batch event response.
#[derive(Debug, Serialize)]
pub struct BatchEventResponse {
    /// Results for each event, in request order.
    pub results: Vec<BatchEventResult>,
    /// Total events processed.
    pub processed: usize,
    /// Total events failed.
    pub failed: usize,
}

/// Result for a single event in a batch.
#[derive(Debug, Serialize)]
pub struct BatchEventResult {
    /// Position in the request.
    pub index: usize,
    /// Whether the event was applied (including redeliveries).
    pub success: bool,
    /// What the event did, if successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EventOutcome>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report a single event.
pub async fn report_event(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EventOutcome>, ApiError> {
    verify_event_signature(&state, &headers, &body)?;

    let event: CollaboratorEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid event: {e}")))?;

    tracing::debug!(
        service = %auth.service_name,
        event_type = event.kind.as_str(),
        user = %event.user,
        "Processing event"
    );

    let outcome = state.events().process(&event).await?;
    Ok(Json(outcome))
}

/// Report multiple events.
pub async fn report_event_batch(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BatchEventResponse>, ApiError> {
    verify_event_signature(&state, &headers, &body)?;

    let request: BatchEventRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid batch: {e}")))?;

    tracing::debug!(
        service = %auth.service_name,
        events = request.events.len(),
        "Processing event batch"
    );

    let processor = state.events();
    let mut results = Vec::with_capacity(request.events.len());
    let mut processed = 0;
    let mut failed = 0;

    for (index, raw) in request.events.into_iter().enumerate() {
        let result = match serde_json::from_value::<CollaboratorEvent>(raw) {
            Ok(event) => processor.process(&event).await.map_err(|e| e.to_string()),
            Err(e) => Err(format!("invalid event: {e}")),
        };

        match result {
            Ok(outcome) => {
                results.push(BatchEventResult {
                    index,
                    success: true,
                    outcome: Some(outcome),
                    error: None,
                });
                processed += 1;
            }
            Err(error) => {
                tracing::debug!(index, error = %error, "Batch event failed");
                results.push(BatchEventResult {
                    index,
                    success: false,
                    outcome: None,
                    error: Some(error),
                });
                failed += 1;
            }
        }
    }

    Ok(Json(BatchEventResponse {
        results,
        processed,
        failed,
    }))
}

/// Check the body signature when a signing secret is configured.
fn verify_event_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let Some(secret) = state.config.event_signing_secret.as_deref() else {
        return Ok(());
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if verify_signature(secret, body, signature) {
        Ok(())
    } else {
        tracing::warn!("Event signature verification failed");
        Err(ApiError::Unauthorized)
    }
}
