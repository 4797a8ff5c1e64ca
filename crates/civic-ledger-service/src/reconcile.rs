//! The reconciliation sweep.
//!
//! Runs out-of-band and only ever writes repairs:
//!
//! 1. **Identity**: rows in `ledger_entries` and `challenge_attempts` missing a
//!    user key get it filled from the key they do carry. Rows that cannot be
//!    resolved, whose key pair disagrees, or whose fill would collide with an
//!    existing award are reported and left alone.
//! 2. **Aggregates**: every user's aggregate is rebuilt from the ledger and
//!    overwritten on mismatch.
//! 3. **Streaks**: every user's streak is replayed from their award dates and
//!    overwritten on mismatch.
//!
//! Overwrites are compare-and-swap against the row the sweep read, so an
//! award landing mid-sweep is never clobbered; the next sweep picks the user
//! up again. A second sweep with no intervening writes repairs nothing.

use civic_ledger_core::{
    AggregateDrift, Clock, DriftDetected, IdentityAnomaly, IdentityAnomalyKind, IdentityFinding,
    IdentityRepair, InternalUserId, LevelCurve, ProgressAggregate, ReconcileReport, Result,
    StreakDrift, StreakRecord, UserKey,
};
use civic_ledger_store::{Store, StoreError};

/// One pass over the ledger's derived state.
#[derive(Clone, Copy)]
pub struct ReconciliationSweep<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    curve: &'a LevelCurve,
}

impl<'a> ReconciliationSweep<'a> {
    /// Create a sweep over `store`, rebuilding levels with `curve`.
    #[must_use]
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock, curve: &'a LevelCurve) -> Self {
        Self {
            store,
            clock,
            curve,
        }
    }

    /// Run the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if a read or repair write fails. Repairs already
    /// written stay written; rerunning the sweep continues where it stopped.
    pub async fn run(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new(self.clock.now());
        tracing::info!("Reconciliation sweep started");

        self.repair_identities(&mut report).await?;

        let users = self.store.users_with_state().await?;
        for user_id in users {
            self.reconcile_progress(user_id, &mut report).await?;
            self.reconcile_streak(user_id, &mut report).await?;
            report.users_scanned += 1;
        }

        report.finished_at = self.clock.now();
        tracing::info!(
            identity_repairs = report.identity_repairs.len(),
            identity_anomalies = report.identity_anomalies.len(),
            drifts = report.drifts.len(),
            users_scanned = report.users_scanned,
            "Reconciliation sweep finished"
        );

        Ok(report)
    }

    async fn repair_identities(&self, report: &mut ReconcileReport) -> Result<()> {
        for finding in self.store.identity_findings().await? {
            let key = match (finding.user_id, finding.public_user_id) {
                (Some(internal), _) => Some(UserKey::Internal(internal)),
                (None, Some(public)) => Some(UserKey::Public(public)),
                (None, None) => None,
            };
            let resolved = match key {
                Some(key) => self.store.resolve_user(key).await?,
                None => None,
            };

            let identity = match finding.repair_with(resolved) {
                Ok(identity) => identity,
                Err(kind) => {
                    report_anomaly(report, finding, kind);
                    continue;
                }
            };

            match self.store.repair_identity(&finding, identity).await {
                Ok(true) => {
                    tracing::info!(
                        table = finding.table.as_str(),
                        row_id = %finding.row_id,
                        user_id = %identity.internal,
                        public_user_id = %identity.public,
                        "Identity repaired"
                    );
                    report.identity_repairs.push(IdentityRepair {
                        table: finding.table,
                        row_id: finding.row_id,
                        identity,
                    });
                }
                Ok(false) => {
                    tracing::debug!(
                        table = finding.table.as_str(),
                        row_id = %finding.row_id,
                        "Row changed since scan, skipping"
                    );
                }
                Err(StoreError::Conflict(_)) => {
                    report_anomaly(report, finding, IdentityAnomalyKind::Conflict);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn reconcile_progress(
        &self,
        user_id: InternalUserId,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        // Stored state is read before the ledger so a concurrent award shows
        // up as a failed swap rather than a lost update.
        let stored = self.store.get_progress(user_id).await?;
        let entries = self.store.user_entries(user_id).await?;
        let achievements = self.store.achievement_count(user_id).await?;

        if stored.is_none() && entries.is_empty() && achievements == 0 {
            return Ok(());
        }

        let rebuilt = ProgressAggregate::rebuild(
            user_id,
            &entries,
            achievements,
            self.curve,
            self.clock.now(),
        );
        if stored.as_ref().is_some_and(|s| s.same_state(&rebuilt)) {
            return Ok(());
        }

        if !self.store.replace_progress(stored.as_ref(), &rebuilt).await? {
            tracing::debug!(user_id = %user_id, "Aggregate changed during sweep, skipping");
            return Ok(());
        }

        tracing::warn!(
            user_id = %user_id,
            stored_total_xp = stored.as_ref().map(|s| s.total_xp),
            rebuilt_total_xp = rebuilt.total_xp,
            stored_level = stored.as_ref().map(|s| s.level),
            rebuilt_level = rebuilt.level,
            "DriftDetected: progress aggregate rebuilt from ledger"
        );
        report.drifts.push(DriftDetected::Aggregate(AggregateDrift {
            user_id,
            stored,
            rebuilt,
        }));
        Ok(())
    }

    async fn reconcile_streak(
        &self,
        user_id: InternalUserId,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let stored = self.store.get_streak(user_id).await?;
        let entries = self.store.user_entries(user_id).await?;

        let replayed = StreakRecord::replay(
            user_id,
            entries
                .iter()
                .filter(|entry| !entry.is_reversal())
                .map(civic_ledger_core::LedgerEntry::activity_date),
            self.clock.now(),
        );
        if stored.is_none() && replayed.last_activity_date.is_none() {
            return Ok(());
        }
        if stored.as_ref().is_some_and(|s| s.same_state(&replayed)) {
            return Ok(());
        }

        if !self.store.replace_streak(stored.as_ref(), &replayed).await? {
            tracing::debug!(user_id = %user_id, "Streak changed during sweep, skipping");
            return Ok(());
        }

        tracing::warn!(
            user_id = %user_id,
            stored_current = stored.as_ref().map(|s| s.current_streak),
            replayed_current = replayed.current_streak,
            stored_longest = stored.as_ref().map(|s| s.longest_streak),
            replayed_longest = replayed.longest_streak,
            "DriftDetected: streak replayed from ledger"
        );
        report.drifts.push(DriftDetected::Streak(StreakDrift {
            user_id,
            stored,
            replayed,
        }));
        Ok(())
    }
}

fn report_anomaly(report: &mut ReconcileReport, finding: IdentityFinding, kind: IdentityAnomalyKind) {
    tracing::warn!(
        table = finding.table.as_str(),
        row_id = %finding.row_id,
        user_id = ?finding.user_id,
        public_user_id = ?finding.public_user_id,
        kind = ?kind,
        "Identity anomaly left unrepaired"
    );
    report
        .identity_anomalies
        .push(IdentityAnomaly { finding, kind });
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use civic_ledger_core::{
        LedgerEntry, LegacyEntry, ManualClock, NewAward, PublicUserId, SourceType,
    };
    use civic_ledger_store::MemoryStore;

    use super::*;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn clean_ledger_needs_no_repairs() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let who = store
            .register_user(PublicUserId::generate(), clock.now())
            .await
            .unwrap();
        let entry = LedgerEntry::award(
            who,
            &NewAward::new(SourceType::Lesson, "l-1", 20),
            clock.now(),
        );
        store.record_award(&entry, &curve).await.unwrap();

        let report = ReconciliationSweep::new(&store, &clock, &curve)
            .run()
            .await
            .unwrap();
        assert_eq!(report.repairs_applied(), 0);
        assert_eq!(report.users_scanned, 1);
    }

    #[tokio::test]
    async fn legacy_rows_are_repaired_once() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let who = store
            .register_user(PublicUserId::generate(), clock.now())
            .await
            .unwrap();
        for (day, reference) in [(1, "l-1"), (2, "l-2"), (3, "l-3")] {
            store
                .import_legacy_entry(&LegacyEntry {
                    user_id: None,
                    public_user_id: Some(who.public),
                    source_type: SourceType::Lesson,
                    reference_id: reference.into(),
                    amount: 20,
                    created_at: Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap(),
                })
                .await
                .unwrap();
        }

        let sweep = ReconciliationSweep::new(&store, &clock, &curve);
        let first = sweep.run().await.unwrap();
        assert_eq!(first.identity_repairs.len(), 3);
        assert_eq!(first.drifts.len(), 2);

        let progress = store.get_progress(who.internal).await.unwrap().unwrap();
        let streak = store.get_streak(who.internal).await.unwrap().unwrap();
        assert_eq!(progress.total_xp, 60);
        assert_eq!(progress.lessons_completed, 3);
        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);

        let second = sweep.run().await.unwrap();
        assert_eq!(second.repairs_applied(), 0);
        assert!(second.identity_anomalies.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_rows_are_reported_not_deleted() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        store
            .import_legacy_entry(&LegacyEntry {
                user_id: None,
                public_user_id: Some(PublicUserId::generate()),
                source_type: SourceType::Quiz,
                reference_id: "q-1".into(),
                amount: 30,
                created_at: clock.now() - Duration::days(400),
            })
            .await
            .unwrap();

        let sweep = ReconciliationSweep::new(&store, &clock, &curve);
        let report = sweep.run().await.unwrap();
        assert_eq!(report.identity_anomalies.len(), 1);
        assert_eq!(report.identity_anomalies[0].kind, IdentityAnomalyKind::Orphan);
        assert_eq!(report.repairs_applied(), 0);

        let again = sweep.run().await.unwrap();
        assert_eq!(again.identity_anomalies.len(), 1);
    }

    #[tokio::test]
    async fn colliding_fill_is_reported_as_conflict() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let who = store
            .register_user(PublicUserId::generate(), clock.now())
            .await
            .unwrap();
        store
            .record_award(
                &LedgerEntry::award(who, &NewAward::new(SourceType::Lesson, "l-1", 20), clock.now()),
                &curve,
            )
            .await
            .unwrap();
        store
            .import_legacy_entry(&LegacyEntry {
                user_id: None,
                public_user_id: Some(who.public),
                source_type: SourceType::Lesson,
                reference_id: "l-1".into(),
                amount: 20,
                created_at: clock.now() - Duration::days(3),
            })
            .await
            .unwrap();

        let report = ReconciliationSweep::new(&store, &clock, &curve)
            .run()
            .await
            .unwrap();
        assert_eq!(report.identity_anomalies.len(), 1);
        assert_eq!(report.identity_anomalies[0].kind, IdentityAnomalyKind::Conflict);
        assert_eq!(store.sum_for(who.internal, None, None).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn drifted_aggregate_is_overwritten() {
        let store = MemoryStore::new();
        let clock = clock();
        let curve = LevelCurve::default();
        let who = store
            .register_user(PublicUserId::generate(), clock.now())
            .await
            .unwrap();
        store
            .record_award(
                &LedgerEntry::award(who, &NewAward::new(SourceType::Module, "m-1", 150), clock.now()),
                &curve,
            )
            .await
            .unwrap();

        let stored = store.get_progress(who.internal).await.unwrap().unwrap();
        let mut corrupted = stored.clone();
        corrupted.total_xp = 9_999;
        corrupted.modules_completed = 4;
        assert!(store
            .replace_progress(Some(&stored), &corrupted)
            .await
            .unwrap());

        let report = ReconciliationSweep::new(&store, &clock, &curve)
            .run()
            .await
            .unwrap();
        assert_eq!(report.drifts.len(), 1);
        assert!(matches!(&report.drifts[0], DriftDetected::Aggregate(drift) if drift.rebuilt.total_xp == 150));

        let repaired = store.get_progress(who.internal).await.unwrap().unwrap();
        assert_eq!(repaired.total_xp, 150);
        assert_eq!(repaired.modules_completed, 1);
    }
}
