//! The XP ledger: awards, reversals and reads.
//!
//! Writes go through [`Store::record_award`] and [`Store::record_reversal`],
//! which append the entry and fold it into the aggregate and streak in one
//! unit of work. This module adds validation, identity resolution and the
//! entry timestamp.

use chrono::{DateTime, Utc};

use civic_ledger_core::{
    AwardOutcome, Clock, EntryId, LedgerEntry, LevelCurve, NewAward, ProgressAggregate, Result,
    SourceType, StreakRecord, UserIdentity, UserKey,
};
use civic_ledger_store::Store;

use crate::identity::IdentityResolver;

/// Maximum entries returned by one history read.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Ledger operations on behalf of one request.
#[derive(Clone, Copy)]
pub struct Ledger<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    curve: &'a LevelCurve,
}

impl<'a> Ledger<'a> {
    /// Create a ledger over `store`, stamping entries with `clock`.
    #[must_use]
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock, curve: &'a LevelCurve) -> Self {
        Self {
            store,
            clock,
            curve,
        }
    }

    /// The level curve aggregates are computed with.
    #[must_use]
    pub fn curve(&self) -> &'a LevelCurve {
        self.curve
    }

    /// The identity resolver over the same store.
    #[must_use]
    pub fn resolver(&self) -> IdentityResolver<'a> {
        IdentityResolver::new(self.store)
    }

    /// Current time on the ledger's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Credit `award` to `user`.
    ///
    /// A repeated `(user, source_type, reference_id)` is not an error: the
    /// outcome has `accepted: false` and the id of the entry that already
    /// holds the key.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` / `InvalidReference` for a malformed award.
    /// - `LedgerError::UnknownUser` if the user cannot be resolved.
    pub async fn award(&self, user: UserKey, award: &NewAward) -> Result<AwardOutcome> {
        award.validate()?;
        let identity = self.resolver().resolve(user).await?;
        self.award_resolved(identity, award).await
    }

    /// Credit `award` to an already resolved user.
    ///
    /// # Errors
    ///
    /// Returns an error if the award is malformed or the write fails.
    pub async fn award_resolved(
        &self,
        identity: UserIdentity,
        award: &NewAward,
    ) -> Result<AwardOutcome> {
        award.validate()?;
        let entry = LedgerEntry::award(identity, award, self.clock.now());
        let outcome = self.store.record_award(&entry, self.curve).await?;

        if outcome.accepted {
            tracing::info!(
                user_id = %identity.internal,
                source_type = %award.source_type,
                reference_id = %award.reference_id,
                amount = award.amount,
                entry_id = %outcome.entry_id,
                "XP awarded"
            );
        } else {
            tracing::debug!(
                user_id = %identity.internal,
                source_type = %award.source_type,
                reference_id = %award.reference_id,
                entry_id = %outcome.entry_id,
                "Award already credited"
            );
        }

        Ok(outcome)
    }

    /// Append the reversal of `entry_id`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::EntryNotFound` for an unknown entry.
    /// - `LedgerError::InvalidReversal` when the entry is itself a reversal.
    /// - `LedgerError::AlreadyReversed` when a reversal already exists.
    pub async fn reverse(&self, entry_id: EntryId, reason: &str) -> Result<LedgerEntry> {
        let reversal = self
            .store
            .record_reversal(entry_id, reason, self.clock.now(), self.curve)
            .await?;

        tracing::info!(
            entry_id = %entry_id,
            reversal_id = %reversal.id,
            user_id = %reversal.user_id,
            amount = reversal.amount,
            reason = %reason,
            "Ledger entry reversed"
        );

        Ok(reversal)
    }

    /// Sum of a user's entries, optionally filtered by source and start time.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if the user cannot be resolved.
    pub async fn sum_for(
        &self,
        user: UserKey,
        source: Option<SourceType>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let identity = self.resolver().resolve(user).await?;
        Ok(self.store.sum_for(identity.internal, source, since).await?)
    }

    /// A user's entries, newest first. `limit` is capped at
    /// [`MAX_HISTORY_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if the user cannot be resolved.
    pub async fn entries(
        &self,
        user: UserKey,
        limit: usize,
        offset: usize,
    ) -> Result<(UserIdentity, Vec<LedgerEntry>)> {
        let identity = self.resolver().resolve(user).await?;
        let entries = self
            .store
            .list_entries_by_user(identity.internal, limit.clamp(1, MAX_HISTORY_LIMIT), offset)
            .await?;
        Ok((identity, entries))
    }

    /// A user's aggregate. Users without activity get an empty one.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if the user cannot be resolved.
    pub async fn progress(&self, user: UserKey) -> Result<(UserIdentity, ProgressAggregate)> {
        let identity = self.resolver().resolve(user).await?;
        let progress = self
            .store
            .get_progress(identity.internal)
            .await?
            .unwrap_or_else(|| ProgressAggregate::new(identity.internal, self.curve, self.now()));
        Ok((identity, progress))
    }

    /// A user's streak. Users without activity get an empty one.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if the user cannot be resolved.
    pub async fn streak(&self, user: UserKey) -> Result<(UserIdentity, StreakRecord)> {
        let identity = self.resolver().resolve(user).await?;
        let streak = self
            .store
            .get_streak(identity.internal)
            .await?
            .unwrap_or_else(|| StreakRecord::new(identity.internal, self.now()));
        Ok((identity, streak))
    }

    /// Record an earned achievement. Returns `false` if it was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn record_achievement(
        &self,
        identity: UserIdentity,
        achievement_id: &str,
    ) -> Result<bool> {
        let recorded = self
            .store
            .record_achievement(identity, achievement_id, self.now(), self.curve)
            .await?;

        if recorded {
            tracing::info!(
                user_id = %identity.internal,
                achievement_id = %achievement_id,
                "Achievement recorded"
            );
        } else {
            tracing::debug!(
                user_id = %identity.internal,
                achievement_id = %achievement_id,
                "Achievement already recorded"
            );
        }

        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use civic_ledger_core::{LedgerError, ManualClock, PublicUserId};
    use civic_ledger_store::MemoryStore;

    use super::*;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn total_tracks_awards_and_reversals() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let ledger = Ledger::new(&store, &clock, &curve);
        let who = ledger
            .resolver()
            .register(PublicUserId::generate(), clock.now())
            .await
            .unwrap();

        let lesson = ledger
            .award(who.public.into(), &NewAward::new(SourceType::Lesson, "l-1", 20))
            .await
            .unwrap();
        ledger
            .award(who.internal.into(), &NewAward::new(SourceType::Quiz, "q-1", 30))
            .await
            .unwrap();
        ledger.reverse(lesson.entry_id, "duplicate content").await.unwrap();

        let (_, progress) = ledger.progress(who.internal.into()).await.unwrap();
        let sum = ledger.sum_for(who.internal.into(), None, None).await.unwrap();
        assert_eq!(progress.total_xp, 30);
        assert_eq!(sum, 30);
        assert_eq!(progress.lessons_completed, 0);
        assert_eq!(progress.quizzes_passed, 1);
    }

    #[tokio::test]
    async fn duplicate_award_returns_first_entry() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let ledger = Ledger::new(&store, &clock, &curve);
        let who = ledger
            .resolver()
            .register(PublicUserId::generate(), clock.now())
            .await
            .unwrap();
        let award = NewAward::new(SourceType::Lesson, "l-1", 20);

        let first = ledger.award(who.internal.into(), &award).await.unwrap();
        let second = ledger.award(who.public.into(), &award).await.unwrap();
        assert!(first.accepted);
        assert!(!second.accepted);
        assert_eq!(first.entry_id, second.entry_id);
    }

    #[tokio::test]
    async fn validation_precedes_resolution() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let ledger = Ledger::new(&store, &clock, &curve);

        let err = ledger
            .award(
                UserKey::Public(PublicUserId::generate()),
                &NewAward::new(SourceType::Lesson, "l-1", -5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn empty_reads_for_inactive_users() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let ledger = Ledger::new(&store, &clock, &curve);
        let who = ledger
            .resolver()
            .register(PublicUserId::generate(), clock.now())
            .await
            .unwrap();

        let (_, progress) = ledger.progress(who.public.into()).await.unwrap();
        let (_, streak) = ledger.streak(who.public.into()).await.unwrap();
        assert_eq!(progress.total_xp, 0);
        assert_eq!(progress.level, 1);
        assert_eq!(streak.current_streak, 0);
        assert!(streak.last_activity_date.is_none());
    }
}
