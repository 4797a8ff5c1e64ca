//! User registration and identity handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use civic_ledger_core::{Clock, InternalUserId, PublicUserId, UserIdentity};

use super::parse_user_key;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Register user request.
#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    /// The user's public key. A new one is generated when absent.
    #[serde(default)]
    pub public_id: Option<String>,
}

/// A user's key pair.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    /// Internal key.
    pub user_id: InternalUserId,
    /// Public key.
    pub public_id: PublicUserId,
}

impl From<UserIdentity> for UserResponse {
    fn from(identity: UserIdentity) -> Self {
        Self {
            user_id: identity.internal,
            public_id: identity.public,
        }
    }
}

/// Register a user, or return the existing pair for a known public key.
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<RegisterUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let public = match body.public_id.as_deref() {
        Some(raw) => raw
            .parse::<PublicUserId>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid public id: {raw}")))?,
        None => PublicUserId::generate(),
    };

    tracing::debug!(
        service = %auth.service_name,
        public_user_id = %public,
        "Registering user"
    );

    let identity = state
        .resolver()
        .register(public, state.clock.now())
        .await?;

    Ok(Json(identity.into()))
}

/// Resolve either user key to the full pair.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let key = parse_user_key(&user)?;
    let identity = state.resolver().resolve(key).await?;
    Ok(Json(identity.into()))
}
