//! Leaderboards over rolling windows.
//!
//! Rankings are always derived from the ledger. A computed page may be served
//! from [`LeaderboardCache`] for a short TTL; the requesting user's own rank is
//! computed fresh on every call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use civic_ledger_core::{
    assign_ranks, Clock, LeaderboardEntry, LeaderboardWindow, MyRank, RankedEntry, Result,
    UserKey,
};
use civic_ledger_store::Store;

use crate::identity::IdentityResolver;

/// Default page size when the caller gives none.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// A computed page.
#[derive(Debug, Clone)]
struct CachedBoard {
    computed_at: Instant,
    since: Option<DateTime<Utc>>,
    entries: Vec<RankedEntry>,
    generated_at: DateTime<Utc>,
}

/// Computed leaderboard pages keyed by `(window, limit)`.
#[derive(Debug)]
pub struct LeaderboardCache {
    ttl: Duration,
    boards: RwLock<HashMap<(LeaderboardWindow, usize), CachedBoard>>,
}

impl LeaderboardCache {
    /// Create a cache holding pages for `ttl`. A zero TTL disables caching.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            boards: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: (LeaderboardWindow, usize)) -> Option<CachedBoard> {
        if self.ttl.is_zero() {
            return None;
        }
        let boards = self.boards.read().await;
        boards
            .get(&key)
            .filter(|board| board.computed_at.elapsed() < self.ttl)
            .cloned()
    }

    async fn put(&self, key: (LeaderboardWindow, usize), board: CachedBoard) {
        if self.ttl.is_zero() {
            return;
        }
        let mut boards = self.boards.write().await;
        boards.retain(|_, cached| cached.computed_at.elapsed() < self.ttl);
        boards.insert(key, board);
    }
}

/// Ranks users by XP within a window.
#[derive(Clone, Copy)]
pub struct Ranker<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    cache: &'a LeaderboardCache,
    max_limit: usize,
}

impl<'a> Ranker<'a> {
    /// Create a ranker. Requested limits are clamped to `1..=max_limit`.
    #[must_use]
    pub fn new(
        store: &'a dyn Store,
        clock: &'a dyn Clock,
        cache: &'a LeaderboardCache,
        max_limit: usize,
    ) -> Self {
        Self {
            store,
            clock,
            cache,
            max_limit: max_limit.max(1),
        }
    }

    /// The top `limit` users in `window`, plus `requesting_user`'s own rank.
    ///
    /// Users tied on total share a rank and the next rank skips accordingly.
    /// `my_rank` is `None` when the requesting user has no entries in the
    /// window.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if the requesting user cannot be
    /// resolved.
    pub async fn rank(
        &self,
        window: LeaderboardWindow,
        limit: Option<usize>,
        requesting_user: Option<UserKey>,
    ) -> Result<LeaderboardEntry> {
        let limit = limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, self.max_limit);
        let key = (window, limit);

        let board = if let Some(board) = self.cache.get(key).await {
            tracing::debug!(window = %window, limit, "Leaderboard served from cache");
            board
        } else {
            let now = self.clock.now();
            let since = window.since(now);
            let totals = self.store.leaderboard_totals(since, limit).await?;
            let board = CachedBoard {
                computed_at: Instant::now(),
                since,
                entries: assign_ranks(totals),
                generated_at: now,
            };
            self.cache.put(key, board.clone()).await;
            board
        };

        let my_rank = match requesting_user {
            Some(user) => self.my_rank(user, board.since).await?,
            None => None,
        };

        Ok(LeaderboardEntry {
            window,
            since: board.since,
            entries: board.entries,
            my_rank,
            generated_at: board.generated_at,
        })
    }

    /// One user's rank in the window starting at `since`.
    async fn my_rank(&self, user: UserKey, since: Option<DateTime<Utc>>) -> Result<Option<MyRank>> {
        let identity = IdentityResolver::new(self.store).resolve(user).await?;
        let Some(total) = self.store.user_window_total(identity.internal, since).await? else {
            return Ok(None);
        };
        let ahead = self.store.count_users_above(total, since).await?;
        Ok(Some(MyRank {
            rank: ahead + 1,
            total_xp: total,
        }))
    }
}
