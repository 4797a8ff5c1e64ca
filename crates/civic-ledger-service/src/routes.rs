//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, awards, challenges, events, health, leaderboard, progress, users};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for event ingestion.
const EVENTS_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Maximum concurrent admin requests. Sweeps and imports are heavy.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/users/:user/progress` - Progress snapshot
/// - `GET /v1/users/:user/streak` - Streak snapshot
/// - `GET /v1/leaderboard` - Ranking (`window`, `limit`, `user`)
/// - `GET /v1/challenges/today` - Today's challenge without answers
///
/// ## Users (JWT auth)
/// - `POST /v1/challenges/:id/attempt` - Submit an attempt
///
/// ## Collaborators (Service API Key auth)
/// - `POST /v1/users` - Register a user
/// - `GET /v1/users/:user` - Resolve a user's key pair
/// - `GET /v1/users/:user/entries` - Ledger history
/// - `POST /v1/awards` - Credit XP
/// - `POST /v1/events` - Report an event
/// - `POST /v1/events/batch` - Report multiple events
///
/// ## Admin (Admin API Key auth)
/// - `POST /v1/admin/challenges` - Publish a challenge
/// - `POST /v1/admin/entries/:id/reverse` - Reverse an entry
/// - `POST /v1/admin/reconcile` - Run the reconciliation sweep
/// - `POST /v1/admin/import` - Import legacy rows
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let event_routes = Router::new()
        .route("/", post(events::report_event))
        .route("/batch", post(events::report_event_batch))
        .layer(ConcurrencyLimitLayer::new(EVENTS_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/challenges", post(admin::publish_challenge))
        .route("/entries/:entry_id/reverse", post(admin::reverse_entry))
        .route("/reconcile", post(admin::run_reconcile))
        .route("/import", post(admin::import_legacy))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Users
        .route("/users", post(users::register_user))
        .route("/users/:user", get(users::get_user))
        .route("/users/:user/progress", get(progress::get_progress))
        .route("/users/:user/streak", get(progress::get_streak))
        .route("/users/:user/entries", get(progress::list_entries))
        // Awards
        .route("/awards", post(awards::create_award))
        // Leaderboard
        .route("/leaderboard", get(leaderboard::get_leaderboard))
        // Challenges
        .route("/challenges/today", get(challenges::get_today))
        .route(
            "/challenges/:challenge_id/attempt",
            post(challenges::submit_attempt),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Events and admin (with their own concurrency limits)
        .nest("/events", event_routes)
        .nest("/admin", admin_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
