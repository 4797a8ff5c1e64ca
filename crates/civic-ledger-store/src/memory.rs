//! In-memory storage implementation.
//!
//! All tables live behind one `tokio::sync::Mutex`; every `Store` method takes
//! the lock once, so compound operations are atomic and the unique constraints
//! of the PostgreSQL schema are checked under the same lock that writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use civic_ledger_core::{
    AwardOutcome, ChallengeAnswer, ChallengeAttempt, ChallengeId, ChallengeInstance, EntryId,
    IdentityFinding, InternalUserId, LedgerEntry, LedgerTable, LegacyEntry, LevelCurve,
    NewChallengeAttempt, ProgressAggregate, PublicUserId, SourceType, StreakRecord, UserIdentity,
    UserKey, UserWindowTotal,
};

use crate::error::{Result, StoreError};
use crate::Store;

/// A ledger row as stored. Legacy rows may lack either key.
#[derive(Debug, Clone)]
struct EntryRow {
    id: EntryId,
    user_id: Option<InternalUserId>,
    public_user_id: Option<PublicUserId>,
    source_type: SourceType,
    reference_id: String,
    amount: i64,
    reverses: Option<EntryId>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for EntryRow {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id,
            user_id: Some(entry.user_id),
            public_user_id: Some(entry.public_user_id),
            source_type: entry.source_type,
            reference_id: entry.reference_id.clone(),
            amount: entry.amount,
            reverses: entry.reverses,
            reason: entry.reason.clone(),
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone)]
struct AttemptRow {
    id: i64,
    user_id: Option<InternalUserId>,
    public_user_id: Option<PublicUserId>,
    challenge_id: ChallengeId,
    score: u32,
    max_score: u32,
    time_taken_secs: u32,
    answers: Vec<ChallengeAnswer>,
    completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    next_user_id: i64,
    next_attempt_id: i64,
    users: BTreeMap<InternalUserId, PublicUserId>,
    users_by_public: HashMap<PublicUserId, InternalUserId>,
    entries: BTreeMap<EntryId, EntryRow>,
    progress: HashMap<InternalUserId, ProgressAggregate>,
    streaks: HashMap<InternalUserId, StreakRecord>,
    challenges: HashMap<ChallengeId, ChallengeInstance>,
    attempts: Vec<AttemptRow>,
    achievements: BTreeMap<(InternalUserId, String), DateTime<Utc>>,
}

impl Tables {
    fn identity(&self, user_id: InternalUserId) -> Option<UserIdentity> {
        self.users.get(&user_id).map(|public| UserIdentity {
            internal: user_id,
            public: *public,
        })
    }

    /// Rows missing the internal key are not readable as entries.
    fn to_entry(&self, row: &EntryRow) -> Option<LedgerEntry> {
        let user_id = row.user_id?;
        let public_user_id = row
            .public_user_id
            .or_else(|| self.users.get(&user_id).copied())?;
        Some(LedgerEntry {
            id: row.id,
            user_id,
            public_user_id,
            source_type: row.source_type,
            reference_id: row.reference_id.clone(),
            amount: row.amount,
            reverses: row.reverses,
            reason: row.reason.clone(),
            created_at: row.created_at,
        })
    }

    fn find_award(
        &self,
        user_id: InternalUserId,
        source_type: SourceType,
        reference_id: &str,
    ) -> Option<EntryId> {
        self.entries
            .values()
            .find(|row| {
                row.reverses.is_none()
                    && row.user_id == Some(user_id)
                    && row.source_type == source_type
                    && row.reference_id == reference_id
            })
            .map(|row| row.id)
    }

    fn find_reversal_of(&self, entry_id: EntryId) -> Option<EntryId> {
        self.entries
            .values()
            .find(|row| row.reverses == Some(entry_id))
            .map(|row| row.id)
    }

    /// Entries of a user in creation order.
    fn user_entries(&self, user_id: InternalUserId) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .values()
            .filter(|row| row.user_id == Some(user_id))
            .filter_map(|row| self.to_entry(row))
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    /// Fold an entry into the derived rows, creating them on first use.
    fn apply_entry(
        &mut self,
        entry: &LedgerEntry,
        curve: &LevelCurve,
    ) -> (ProgressAggregate, Option<StreakRecord>) {
        let progress = self
            .progress
            .entry(entry.user_id)
            .or_insert_with(|| ProgressAggregate::new(entry.user_id, curve, entry.created_at));
        progress.apply(entry, curve);
        let progress = progress.clone();

        if entry.is_reversal() {
            return (progress, None);
        }

        let streak = self
            .streaks
            .entry(entry.user_id)
            .or_insert_with(|| StreakRecord::new(entry.user_id, entry.created_at));
        if streak.record_activity(entry.activity_date()) {
            streak.updated_at = entry.created_at;
        }
        (progress, Some(streak.clone()))
    }

    fn award(&mut self, entry: &LedgerEntry, curve: &LevelCurve) -> Result<AwardOutcome> {
        if !self.users.contains_key(&entry.user_id) {
            return Err(StoreError::UnknownUser {
                key: entry.user_id.to_string(),
            });
        }
        if let Some(existing) =
            self.find_award(entry.user_id, entry.source_type, &entry.reference_id)
        {
            return Ok(AwardOutcome::already_credited(existing));
        }

        self.entries.insert(entry.id, EntryRow::from(entry));
        let (progress, streak) = self.apply_entry(entry, curve);
        Ok(AwardOutcome {
            accepted: true,
            entry_id: entry.id,
            progress: Some(progress),
            streak,
        })
    }

    fn window_totals(&self, since: Option<DateTime<Utc>>) -> BTreeMap<InternalUserId, (i64, DateTime<Utc>)> {
        let mut totals: BTreeMap<InternalUserId, (i64, DateTime<Utc>)> = BTreeMap::new();
        for row in self.entries.values() {
            let Some(user_id) = row.user_id else { continue };
            if since.is_some_and(|since| row.created_at < since) {
                continue;
            }
            totals
                .entry(user_id)
                .and_modify(|(total, first)| {
                    *total = total.saturating_add(row.amount);
                    *first = (*first).min(row.created_at);
                })
                .or_insert((row.amount, row.created_at));
        }
        totals
    }
}

/// In-memory storage implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // User Operations
    // =========================================================================

    async fn register_user(
        &self,
        public: PublicUserId,
        _now: DateTime<Utc>,
    ) -> Result<UserIdentity> {
        let mut tables = self.tables.lock().await;
        if let Some(internal) = tables.users_by_public.get(&public) {
            return Ok(UserIdentity {
                internal: *internal,
                public,
            });
        }

        tables.next_user_id += 1;
        let internal = InternalUserId::new(tables.next_user_id);
        tables.users.insert(internal, public);
        tables.users_by_public.insert(public, internal);
        Ok(UserIdentity { internal, public })
    }

    async fn resolve_user(&self, key: UserKey) -> Result<Option<UserIdentity>> {
        let tables = self.tables.lock().await;
        Ok(match key {
            UserKey::Internal(internal) => tables.identity(internal),
            UserKey::Public(public) => tables
                .users_by_public
                .get(&public)
                .map(|internal| UserIdentity {
                    internal: *internal,
                    public,
                }),
        })
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn record_award(&self, entry: &LedgerEntry, curve: &LevelCurve) -> Result<AwardOutcome> {
        self.tables.lock().await.award(entry, curve)
    }

    async fn record_reversal(
        &self,
        entry_id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
        curve: &LevelCurve,
    ) -> Result<LedgerEntry> {
        let mut tables = self.tables.lock().await;
        let original = tables
            .entries
            .get(&entry_id)
            .and_then(|row| tables.to_entry(row))
            .ok_or_else(|| StoreError::EntryNotFound {
                entry_id: entry_id.to_string(),
            })?;

        if tables.find_reversal_of(entry_id).is_some() {
            return Err(StoreError::AlreadyReversed {
                entry_id: entry_id.to_string(),
            });
        }
        let reversal = original
            .reversal(reason.to_string(), now)
            .map_err(|e| StoreError::InvalidReversal(e.to_string()))?;

        tables.entries.insert(reversal.id, EntryRow::from(&reversal));
        tables.apply_entry(&reversal, curve);
        Ok(reversal)
    }

    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .get(&entry_id)
            .and_then(|row| tables.to_entry(row)))
    }

    async fn sum_for(
        &self,
        user_id: InternalUserId,
        source: Option<SourceType>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .values()
            .filter(|row| row.user_id == Some(user_id))
            .filter(|row| source.map_or(true, |source| row.source_type == source))
            .filter(|row| since.map_or(true, |since| row.created_at >= since))
            .fold(0_i64, |sum, row| sum.saturating_add(row.amount)))
    }

    async fn list_entries_by_user(
        &self,
        user_id: InternalUserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.lock().await;
        let mut entries = tables.user_entries(user_id);
        entries.reverse();
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn user_entries(&self, user_id: InternalUserId) -> Result<Vec<LedgerEntry>> {
        Ok(self.tables.lock().await.user_entries(user_id))
    }

    async fn import_legacy_entry(&self, entry: &LegacyEntry) -> Result<EntryId> {
        let mut tables = self.tables.lock().await;
        if let Some(user_id) = entry.user_id {
            if !tables.users.contains_key(&user_id) {
                return Err(StoreError::UnknownUser {
                    key: user_id.to_string(),
                });
            }
            if tables
                .find_award(user_id, entry.source_type, &entry.reference_id)
                .is_some()
            {
                return Err(StoreError::Conflict(format!(
                    "award already recorded for ({user_id}, {}, {})",
                    entry.source_type, entry.reference_id
                )));
            }
        }

        let id = EntryId::generate();
        tables.entries.insert(
            id,
            EntryRow {
                id,
                user_id: entry.user_id,
                public_user_id: entry.public_user_id,
                source_type: entry.source_type,
                reference_id: entry.reference_id.clone(),
                amount: entry.amount,
                reverses: None,
                reason: None,
                created_at: entry.created_at,
            },
        );
        Ok(id)
    }

    // =========================================================================
    // Derived State
    // =========================================================================

    async fn get_progress(&self, user_id: InternalUserId) -> Result<Option<ProgressAggregate>> {
        Ok(self.tables.lock().await.progress.get(&user_id).cloned())
    }

    async fn get_streak(&self, user_id: InternalUserId) -> Result<Option<StreakRecord>> {
        Ok(self.tables.lock().await.streaks.get(&user_id).cloned())
    }

    async fn replace_progress(
        &self,
        expected: Option<&ProgressAggregate>,
        progress: &ProgressAggregate,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let current = tables.progress.get(&progress.user_id);
        let unchanged = match (expected, current) {
            (None, None) => true,
            (Some(expected), Some(current)) => expected.same_state(current),
            _ => false,
        };
        if unchanged {
            tables.progress.insert(progress.user_id, progress.clone());
        }
        Ok(unchanged)
    }

    async fn replace_streak(
        &self,
        expected: Option<&StreakRecord>,
        streak: &StreakRecord,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let current = tables.streaks.get(&streak.user_id);
        let unchanged = match (expected, current) {
            (None, None) => true,
            (Some(expected), Some(current)) => expected.same_state(current),
            _ => false,
        };
        if unchanged {
            tables.streaks.insert(streak.user_id, streak.clone());
        }
        Ok(unchanged)
    }

    // =========================================================================
    // Achievement Operations
    // =========================================================================

    async fn record_achievement(
        &self,
        identity: UserIdentity,
        achievement_id: &str,
        now: DateTime<Utc>,
        curve: &LevelCurve,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&identity.internal) {
            return Err(StoreError::UnknownUser {
                key: identity.internal.to_string(),
            });
        }
        let key = (identity.internal, achievement_id.to_string());
        if tables.achievements.contains_key(&key) {
            return Ok(false);
        }
        tables.achievements.insert(key, now);

        let progress = tables
            .progress
            .entry(identity.internal)
            .or_insert_with(|| ProgressAggregate::new(identity.internal, curve, now));
        progress.achievements_earned += 1;
        progress.updated_at = progress.updated_at.max(now);
        Ok(true)
    }

    async fn achievement_count(&self, user_id: InternalUserId) -> Result<u32> {
        let tables = self.tables.lock().await;
        let count = tables
            .achievements
            .keys()
            .filter(|(user, _)| *user == user_id)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    // =========================================================================
    // Challenge Operations
    // =========================================================================

    async fn publish_challenge(&self, challenge: &ChallengeInstance) -> Result<ChallengeInstance> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables
            .challenges
            .values()
            .find(|c| c.publish_date == challenge.publish_date)
        {
            return Ok(existing.clone());
        }
        tables.challenges.insert(challenge.id, challenge.clone());
        Ok(challenge.clone())
    }

    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<ChallengeInstance>> {
        Ok(self.tables.lock().await.challenges.get(&challenge_id).cloned())
    }

    async fn get_challenge_by_date(&self, date: NaiveDate) -> Result<Option<ChallengeInstance>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .challenges
            .values()
            .find(|c| c.publish_date == date)
            .cloned())
    }

    async fn record_attempt(
        &self,
        attempt: &NewChallengeAttempt,
        award: &LedgerEntry,
        curve: &LevelCurve,
    ) -> Result<AwardOutcome> {
        let mut tables = self.tables.lock().await;
        if !tables.challenges.contains_key(&attempt.challenge_id) {
            return Err(StoreError::ChallengeNotFound {
                challenge_id: attempt.challenge_id.to_string(),
            });
        }
        if tables.attempts.iter().any(|row| {
            row.user_id == Some(attempt.identity.internal) && row.challenge_id == attempt.challenge_id
        }) {
            return Err(StoreError::AlreadyAttempted {
                user: attempt.identity.public.to_string(),
                challenge_id: attempt.challenge_id.to_string(),
            });
        }

        // Validate the award before the attempt row lands so a failure leaves
        // nothing behind.
        if !tables.users.contains_key(&award.user_id) {
            return Err(StoreError::UnknownUser {
                key: award.user_id.to_string(),
            });
        }

        tables.next_attempt_id += 1;
        let id = tables.next_attempt_id;
        tables.attempts.push(AttemptRow {
            id,
            user_id: Some(attempt.identity.internal),
            public_user_id: Some(attempt.identity.public),
            challenge_id: attempt.challenge_id,
            score: attempt.score,
            max_score: attempt.max_score,
            time_taken_secs: attempt.time_taken_secs,
            answers: attempt.answers.clone(),
            completed_at: attempt.completed_at,
        });

        tables.award(award, curve)
    }

    async fn get_attempt(
        &self,
        user_id: InternalUserId,
        challenge_id: ChallengeId,
    ) -> Result<Option<ChallengeAttempt>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .attempts
            .iter()
            .find(|row| row.user_id == Some(user_id) && row.challenge_id == challenge_id)
            .and_then(|row| {
                let public_user_id = row
                    .public_user_id
                    .or_else(|| tables.users.get(&user_id).copied())?;
                Some(ChallengeAttempt {
                    user_id,
                    public_user_id,
                    challenge_id: row.challenge_id,
                    score: row.score,
                    max_score: row.max_score,
                    time_taken_secs: row.time_taken_secs,
                    answers: row.answers.clone(),
                    completed_at: row.completed_at,
                })
            }))
    }

    // =========================================================================
    // Leaderboard Queries
    // =========================================================================

    async fn leaderboard_totals(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<UserWindowTotal>> {
        let tables = self.tables.lock().await;
        let mut totals: Vec<UserWindowTotal> = tables
            .window_totals(since)
            .into_iter()
            .filter_map(|(user_id, (total, first_activity_at))| {
                let public_user_id = *tables.users.get(&user_id)?;
                Some(UserWindowTotal {
                    user_id,
                    public_user_id,
                    total,
                    first_activity_at,
                })
            })
            .collect();
        totals.sort_by(UserWindowTotal::leaderboard_cmp);
        totals.truncate(limit);
        Ok(totals)
    }

    async fn user_window_total(
        &self,
        user_id: InternalUserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<i64>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .window_totals(since)
            .get(&user_id)
            .map(|(total, _)| *total))
    }

    async fn count_users_above(&self, total: i64, since: Option<DateTime<Utc>>) -> Result<u64> {
        let tables = self.tables.lock().await;
        let above = tables
            .window_totals(since)
            .values()
            .filter(|(user_total, _)| *user_total > total)
            .count();
        Ok(above as u64)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    async fn identity_findings(&self) -> Result<Vec<IdentityFinding>> {
        let tables = self.tables.lock().await;
        let needs_repair = |user_id: Option<InternalUserId>, public: Option<PublicUserId>| {
            match (user_id, public) {
                (Some(user_id), Some(public)) => tables.users.get(&user_id) != Some(&public),
                _ => true,
            }
        };

        let mut findings: Vec<IdentityFinding> = tables
            .entries
            .values()
            .filter(|row| needs_repair(row.user_id, row.public_user_id))
            .map(|row| IdentityFinding {
                table: LedgerTable::LedgerEntries,
                row_id: row.id.to_string(),
                user_id: row.user_id,
                public_user_id: row.public_user_id,
            })
            .collect();

        findings.extend(
            tables
                .attempts
                .iter()
                .filter(|row| needs_repair(row.user_id, row.public_user_id))
                .map(|row| IdentityFinding {
                    table: LedgerTable::ChallengeAttempts,
                    row_id: row.id.to_string(),
                    user_id: row.user_id,
                    public_user_id: row.public_user_id,
                }),
        );
        Ok(findings)
    }

    async fn repair_identity(
        &self,
        finding: &IdentityFinding,
        identity: UserIdentity,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match finding.table {
            LedgerTable::LedgerEntries => {
                let Ok(entry_id) = finding.row_id.parse::<EntryId>() else {
                    return Ok(false);
                };
                let Some(row) = tables.entries.get(&entry_id) else {
                    return Ok(false);
                };
                if row.user_id != finding.user_id || row.public_user_id != finding.public_user_id {
                    return Ok(false);
                }
                if row.reverses.is_none() {
                    if let Some(existing) =
                        tables.find_award(identity.internal, row.source_type, &row.reference_id)
                    {
                        if existing != entry_id {
                            return Err(StoreError::Conflict(format!(
                                "entry {entry_id} duplicates award {existing}"
                            )));
                        }
                    }
                }
                if let Some(row) = tables.entries.get_mut(&entry_id) {
                    row.user_id = Some(identity.internal);
                    row.public_user_id = Some(identity.public);
                }
                Ok(true)
            }
            LedgerTable::ChallengeAttempts => {
                let Ok(attempt_id) = finding.row_id.parse::<i64>() else {
                    return Ok(false);
                };
                let Some(position) = tables.attempts.iter().position(|row| {
                    row.id == attempt_id
                        && row.user_id == finding.user_id
                        && row.public_user_id == finding.public_user_id
                }) else {
                    return Ok(false);
                };
                let challenge_id = tables.attempts[position].challenge_id;
                if tables.attempts.iter().any(|row| {
                    row.id != attempt_id
                        && row.user_id == Some(identity.internal)
                        && row.challenge_id == challenge_id
                }) {
                    return Err(StoreError::Conflict(format!(
                        "attempt {attempt_id} duplicates another attempt"
                    )));
                }
                let row = &mut tables.attempts[position];
                row.user_id = Some(identity.internal);
                row.public_user_id = Some(identity.public);
                Ok(true)
            }
        }
    }

    async fn users_with_state(&self) -> Result<Vec<InternalUserId>> {
        let tables = self.tables.lock().await;
        let mut users: BTreeSet<InternalUserId> =
            tables.entries.values().filter_map(|row| row.user_id).collect();
        users.extend(tables.progress.keys().copied());
        users.extend(tables.streaks.keys().copied());
        users.extend(tables.achievements.keys().map(|(user, _)| *user));
        Ok(users.into_iter().collect())
    }
}
