//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use civic_ledger_core::LedgerError;
use civic_ledger_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A ledger rule rejected the request.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Ledger(err) => ledger_error_parts(err),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                internal_parts()
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

type ErrorParts = (StatusCode, &'static str, String, Option<serde_json::Value>);

fn internal_parts() -> ErrorParts {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "An internal error occurred".to_string(),
        None,
    )
}

fn ledger_error_parts(err: &LedgerError) -> ErrorParts {
    let message = err.to_string();
    match err {
        LedgerError::UnknownUser { key } => (
            StatusCode::NOT_FOUND,
            "unknown_user",
            message,
            Some(serde_json::json!({ "user": key })),
        ),
        LedgerError::AlreadyAttempted { challenge_id, .. } => (
            StatusCode::CONFLICT,
            "already_attempted",
            message,
            Some(serde_json::json!({ "challenge_id": challenge_id })),
        ),
        LedgerError::AlreadyReversed { entry_id } => (
            StatusCode::CONFLICT,
            "already_reversed",
            message,
            Some(serde_json::json!({ "entry_id": entry_id })),
        ),
        LedgerError::EntryNotFound { .. } => (StatusCode::NOT_FOUND, "entry_not_found", message, None),
        LedgerError::ChallengeNotFound { .. } => {
            (StatusCode::NOT_FOUND, "challenge_not_found", message, None)
        }
        LedgerError::ChallengeNotOpen { publish_date, .. } => (
            StatusCode::CONFLICT,
            "challenge_not_open",
            message,
            Some(serde_json::json!({ "publish_date": publish_date })),
        ),
        LedgerError::InvalidReversal(_) => {
            (StatusCode::BAD_REQUEST, "invalid_reversal", message, None)
        }
        LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount", message, None),
        LedgerError::InvalidReference(_) => {
            (StatusCode::BAD_REQUEST, "invalid_reference", message, None)
        }
        LedgerError::InvalidChallenge(_) => {
            (StatusCode::BAD_REQUEST, "invalid_challenge", message, None)
        }
        LedgerError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id", message, None),
        LedgerError::Configuration(_) | LedgerError::Storage(_) => {
            tracing::error!(error = %err, "Internal server error");
            internal_parts()
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Ledger(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_stable_codes() {
        let cases = [
            (
                LedgerError::UnknownUser { key: "42".into() },
                StatusCode::NOT_FOUND,
                "unknown_user",
            ),
            (
                LedgerError::AlreadyAttempted {
                    user: "u".into(),
                    challenge_id: "c".into(),
                },
                StatusCode::CONFLICT,
                "already_attempted",
            ),
            (
                LedgerError::AlreadyReversed {
                    entry_id: "e".into(),
                },
                StatusCode::CONFLICT,
                "already_reversed",
            ),
            (
                LedgerError::InvalidAmount("zero".into()),
                StatusCode::BAD_REQUEST,
                "invalid_amount",
            ),
            (
                LedgerError::Storage("connection reset".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        ];

        for (err, status, code) in cases {
            let (got_status, got_code, _, _) = ledger_error_parts(&err);
            assert_eq!(got_status, status);
            assert_eq!(got_code, code);
        }
    }

    #[test]
    fn storage_details_are_hidden() {
        let (_, _, message, details) =
            ledger_error_parts(&LedgerError::Storage("password=hunter2".into()));
        assert!(!message.contains("hunter2"));
        assert!(details.is_none());
    }
}
