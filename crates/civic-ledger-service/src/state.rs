//! Application state.

use std::sync::Arc;
use std::time::Duration;

use civic_ledger_core::{Clock, SystemClock};
use civic_ledger_store::Store;

use crate::challenges::AttemptGate;
use crate::config::ServiceConfig;
use crate::events::EventProcessor;
use crate::identity::IdentityResolver;
use crate::leaderboard::{LeaderboardCache, Ranker};
use crate::ledger::Ledger;
use crate::reconcile::ReconciliationSweep;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Time source for entry timestamps and windows.
    pub clock: Arc<dyn Clock>,

    /// Computed leaderboards, keyed by window and limit.
    pub leaderboards: Arc<LeaderboardCache>,
}

impl AppState {
    /// Create a new application state on the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a new application state on the given clock.
    #[must_use]
    pub fn with_clock(store: Arc<dyn Store>, config: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not configured - collaborator endpoints will reject all requests");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not configured - admin endpoints will reject all requests");
        }
        if config.event_signing_secret.is_none() {
            tracing::debug!("Event signing not configured - event signatures will not be checked");
        }

        let leaderboards = Arc::new(LeaderboardCache::new(Duration::from_secs(
            config.leaderboard_cache_ttl_seconds,
        )));

        Self {
            store,
            config,
            clock,
            leaderboards,
        }
    }

    /// The identity resolver.
    #[must_use]
    pub fn resolver(&self) -> IdentityResolver<'_> {
        IdentityResolver::new(self.store.as_ref())
    }

    /// The ledger.
    #[must_use]
    pub fn ledger(&self) -> Ledger<'_> {
        Ledger::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.config.gamification.level_curve,
        )
    }

    /// The challenge attempt gate.
    #[must_use]
    pub fn challenges(&self) -> AttemptGate<'_> {
        AttemptGate::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.config.gamification.level_curve,
        )
    }

    /// The leaderboard ranker.
    #[must_use]
    pub fn ranker(&self) -> Ranker<'_> {
        Ranker::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.leaderboards,
            self.config.leaderboard_max_limit,
        )
    }

    /// The collaborator event processor.
    #[must_use]
    pub fn events(&self) -> EventProcessor<'_> {
        EventProcessor::new(self.ledger(), self.config.gamification.points)
    }

    /// The reconciliation sweep.
    #[must_use]
    pub fn sweep(&self) -> ReconciliationSweep<'_> {
        ReconciliationSweep::new(
            self.store.as_ref(),
            self.clock.as_ref(),
            &self.config.gamification.level_curve,
        )
    }
}
