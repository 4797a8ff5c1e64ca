//! Civic Ledger HTTP API Service.
//!
//! This crate hosts the ledger's components and the HTTP API in front of them:
//!
//! - Identity resolution between internal and public user keys
//! - The append-only XP ledger (awards, reversals, history)
//! - Progress, level and streak reads
//! - Daily challenges and the one-attempt gate
//! - Leaderboards over rolling windows
//! - The reconciliation sweep and legacy import
//! - Collaborator event ingestion
//!
//! # Authentication
//!
//! The service supports three authentication methods:
//!
//! 1. **User JWT tokens** - For end-user requests (challenge attempts)
//! 2. **Service API keys** - For collaborator services reporting activity
//! 3. **Admin API keys** - For operator endpoints (publish, reverse, reconcile)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Health handler needs async for routing

pub mod auth;
pub mod challenges;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod leaderboard;
pub mod ledger;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use challenges::{AttemptGate, AttemptResult};
pub use config::{ConfigError, GamificationConfig, ServiceConfig};
pub use error::ApiError;
pub use events::{CollaboratorEvent, EventCredit, EventKind, EventOutcome, EventProcessor};
pub use identity::IdentityResolver;
pub use leaderboard::{LeaderboardCache, Ranker};
pub use ledger::Ledger;
pub use reconcile::ReconciliationSweep;
pub use routes::create_router;
pub use state::AppState;
