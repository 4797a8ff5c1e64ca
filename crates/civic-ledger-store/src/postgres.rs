//! PostgreSQL storage implementation.
//!
//! Every compound operation runs in one read-committed transaction. The
//! idempotency key is enforced by the partial unique index on
//! `(user_id, source_type, reference_id)`: a concurrent duplicate loses the
//! `INSERT ... ON CONFLICT DO NOTHING` and takes the "already credited" path.
//! Derived rows are locked with `SELECT ... FOR UPDATE` while they are updated.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use civic_ledger_core::{
    AwardOutcome, ChallengeAnswer, ChallengeAttempt, ChallengeId, ChallengeInstance,
    ChallengeQuestion, EntryId, IdentityFinding, InternalUserId, LedgerEntry, LedgerTable,
    LegacyEntry, LevelCurve, NewChallengeAttempt, ProgressAggregate, PublicUserId, SourceType,
    StreakRecord, UserIdentity, UserKey, UserWindowTotal,
};

use crate::error::{is_foreign_key_violation, is_unique_violation, Result, StoreError};
use crate::Store;

/// Ledger entry columns, with the public key filled from `users` for rows
/// that only carry the internal key.
macro_rules! select_entries {
    ($tail:literal) => {
        concat!(
            "SELECT l.id, l.user_id, COALESCE(l.public_user_id, u.public_id) AS public_user_id, ",
            "l.source_type, l.reference_id, l.amount, l.reverses, l.reason, l.created_at ",
            "FROM ledger_entries l JOIN users u ON u.id = l.user_id ",
            $tail
        )
    };
}

const SELECT_PROGRESS: &str = "SELECT user_id, total_xp, level, modules_completed, \
     lessons_completed, quizzes_passed, achievements_earned, curve_version, updated_at \
     FROM progress_aggregates WHERE user_id = $1";

const SELECT_STREAK: &str = "SELECT user_id, current_streak, longest_streak, \
     last_activity_date, updated_at FROM streak_records WHERE user_id = $1";

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Migration` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Insert an award inside `tx` and fold it into derived state.
    async fn award_in(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
        curve: &LevelCurve,
    ) -> Result<AwardOutcome> {
        let inserted: Option<(String,)> = sqlx::query_as(
            "INSERT INTO ledger_entries \
             (id, user_id, public_user_id, source_type, reference_id, amount, reverses, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8) \
             ON CONFLICT DO NOTHING \
             RETURNING id",
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.get())
        .bind(*entry.public_user_id.as_uuid())
        .bind(entry.source_type.as_str())
        .bind(&entry.reference_id)
        .bind(entry.amount)
        .bind(entry.reason.as_deref())
        .bind(entry.created_at)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| unknown_user_on_fk(e, entry.user_id))?;

        if inserted.is_none() {
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM ledger_entries \
                 WHERE user_id = $1 AND source_type = $2 AND reference_id = $3 AND reverses IS NULL",
            )
            .bind(entry.user_id.get())
            .bind(entry.source_type.as_str())
            .bind(&entry.reference_id)
            .fetch_optional(&mut **tx)
            .await?;

            let (existing,) = existing.ok_or_else(|| {
                StoreError::Database(format!("entry {} conflicted without an award", entry.id))
            })?;
            return Ok(AwardOutcome::already_credited(parse_entry_id(&existing)?));
        }

        let (progress, streak) = Self::apply_entry(tx, entry, curve).await?;
        Ok(AwardOutcome {
            accepted: true,
            entry_id: entry.id,
            progress: Some(progress),
            streak,
        })
    }

    /// Lock and update the aggregate (and, for awards, the streak) of the
    /// entry's user.
    async fn apply_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
        curve: &LevelCurve,
    ) -> Result<(ProgressAggregate, Option<StreakRecord>)> {
        let user_id = entry.user_id.get();

        sqlx::query(
            "INSERT INTO progress_aggregates (user_id, level, curve_version, updated_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(i64::from(curve.level_for(0)))
        .bind(i64::from(curve.version))
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;

        let row: ProgressRow = sqlx::query_as(&format!("{SELECT_PROGRESS} FOR UPDATE"))
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;
        let mut progress = row.into_progress()?;
        progress.apply(entry, curve);
        write_progress(&mut **tx, &progress).await?;

        if entry.is_reversal() {
            return Ok((progress, None));
        }

        sqlx::query(
            "INSERT INTO streak_records (user_id, updated_at) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;

        let row: StreakRow = sqlx::query_as(&format!("{SELECT_STREAK} FOR UPDATE"))
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;
        let mut streak = row.into_streak()?;
        if streak.record_activity(entry.activity_date()) {
            streak.updated_at = entry.created_at;
            sqlx::query(
                "UPDATE streak_records SET current_streak = $2, longest_streak = $3, \
                 last_activity_date = $4, updated_at = $5 WHERE user_id = $1",
            )
            .bind(user_id)
            .bind(i64::from(streak.current_streak))
            .bind(i64::from(streak.longest_streak))
            .bind(streak.last_activity_date)
            .bind(streak.updated_at)
            .execute(&mut **tx)
            .await?;
        }

        Ok((progress, Some(streak)))
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // User Operations
    // =========================================================================

    async fn register_user(&self, public: PublicUserId, now: DateTime<Utc>) -> Result<UserIdentity> {
        sqlx::query(
            "INSERT INTO users (public_id, created_at) VALUES ($1, $2) \
             ON CONFLICT (public_id) DO NOTHING",
        )
        .bind(*public.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM users WHERE public_id = $1")
            .bind(*public.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        Ok(UserIdentity {
            internal: InternalUserId::new(id),
            public,
        })
    }

    async fn resolve_user(&self, key: UserKey) -> Result<Option<UserIdentity>> {
        let row: Option<(i64, Uuid)> = match key {
            UserKey::Internal(internal) => {
                sqlx::query_as("SELECT id, public_id FROM users WHERE id = $1")
                    .bind(internal.get())
                    .fetch_optional(&self.pool)
                    .await?
            }
            UserKey::Public(public) => {
                sqlx::query_as("SELECT id, public_id FROM users WHERE public_id = $1")
                    .bind(*public.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(row.map(|(id, public)| UserIdentity {
            internal: InternalUserId::new(id),
            public: PublicUserId::from_uuid(public),
        }))
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn record_award(&self, entry: &LedgerEntry, curve: &LevelCurve) -> Result<AwardOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::award_in(&mut tx, entry, curve).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn record_reversal(
        &self,
        entry_id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
        curve: &LevelCurve,
    ) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        let original: EntryRow = sqlx::query_as(select_entries!("WHERE l.id = $1 FOR UPDATE OF l"))
            .bind(entry_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::EntryNotFound {
                entry_id: entry_id.to_string(),
            })?;
        let original = original.into_entry()?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM ledger_entries WHERE reverses = $1")
                .bind(entry_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(StoreError::AlreadyReversed {
                entry_id: entry_id.to_string(),
            });
        }

        let reversal = original
            .reversal(reason.to_string(), now)
            .map_err(|e| StoreError::InvalidReversal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, user_id, public_user_id, source_type, reference_id, amount, reverses, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(reversal.id.to_string())
        .bind(reversal.user_id.get())
        .bind(*reversal.public_user_id.as_uuid())
        .bind(reversal.source_type.as_str())
        .bind(&reversal.reference_id)
        .bind(reversal.amount)
        .bind(entry_id.to_string())
        .bind(reversal.reason.as_deref())
        .bind(reversal.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyReversed {
                    entry_id: entry_id.to_string(),
                }
            } else {
                e.into()
            }
        })?;

        Self::apply_entry(&mut tx, &reversal, curve).await?;
        tx.commit().await?;
        Ok(reversal)
    }

    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(select_entries!("WHERE l.id = $1"))
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(EntryRow::into_entry).transpose()
    }

    async fn sum_for(
        &self,
        user_id: InternalUserId,
        source: Option<SourceType>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries \
             WHERE user_id = $1 \
               AND ($2::TEXT IS NULL OR source_type = $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)",
        )
        .bind(user_id.get())
        .bind(source.map(|s| s.as_str()))
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn list_entries_by_user(
        &self,
        user_id: InternalUserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(select_entries!(
            "WHERE l.user_id = $1 ORDER BY l.created_at DESC, l.id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.get())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn user_entries(&self, user_id: InternalUserId) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(select_entries!(
            "WHERE l.user_id = $1 ORDER BY l.created_at, l.id"
        ))
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn import_legacy_entry(&self, entry: &LegacyEntry) -> Result<EntryId> {
        let id = EntryId::generate();
        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, user_id, public_user_id, source_type, reference_id, amount, reverses, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL, $7)",
        )
        .bind(id.to_string())
        .bind(entry.user_id.map(InternalUserId::get))
        .bind(entry.public_user_id.map(|p| *p.as_uuid()))
        .bind(entry.source_type.as_str())
        .bind(&entry.reference_id)
        .bind(entry.amount)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "award already recorded for ({}, {})",
                    entry.source_type, entry.reference_id
                ))
            } else if is_foreign_key_violation(&e) {
                StoreError::UnknownUser {
                    key: entry
                        .user_id
                        .map_or_else(String::new, |user_id| user_id.to_string()),
                }
            } else {
                e.into()
            }
        })?;
        Ok(id)
    }

    // =========================================================================
    // Derived State
    // =========================================================================

    async fn get_progress(&self, user_id: InternalUserId) -> Result<Option<ProgressAggregate>> {
        let row: Option<ProgressRow> = sqlx::query_as(SELECT_PROGRESS)
            .bind(user_id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(ProgressRow::into_progress).transpose()
    }

    async fn get_streak(&self, user_id: InternalUserId) -> Result<Option<StreakRecord>> {
        let row: Option<StreakRow> = sqlx::query_as(SELECT_STREAK)
            .bind(user_id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(StreakRow::into_streak).transpose()
    }

    async fn replace_progress(
        &self,
        expected: Option<&ProgressAggregate>,
        progress: &ProgressAggregate,
    ) -> Result<bool> {
        let Some(expected) = expected else {
            let result = sqlx::query(
                "INSERT INTO progress_aggregates (user_id, total_xp, level, modules_completed, \
                 lessons_completed, quizzes_passed, achievements_earned, curve_version, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(progress.user_id.get())
            .bind(progress.total_xp)
            .bind(i64::from(progress.level))
            .bind(i64::from(progress.modules_completed))
            .bind(i64::from(progress.lessons_completed))
            .bind(i64::from(progress.quizzes_passed))
            .bind(i64::from(progress.achievements_earned))
            .bind(i64::from(progress.curve_version))
            .bind(progress.updated_at)
            .execute(&self.pool)
            .await?;
            return Ok(result.rows_affected() == 1);
        };

        let result = sqlx::query(
            "UPDATE progress_aggregates SET total_xp = $2, level = $3, modules_completed = $4, \
             lessons_completed = $5, quizzes_passed = $6, achievements_earned = $7, \
             curve_version = $8, updated_at = $9 \
             WHERE user_id = $1 AND total_xp = $10 AND level = $11 AND modules_completed = $12 \
               AND lessons_completed = $13 AND quizzes_passed = $14 \
               AND achievements_earned = $15 AND curve_version = $16",
        )
        .bind(progress.user_id.get())
        .bind(progress.total_xp)
        .bind(i64::from(progress.level))
        .bind(i64::from(progress.modules_completed))
        .bind(i64::from(progress.lessons_completed))
        .bind(i64::from(progress.quizzes_passed))
        .bind(i64::from(progress.achievements_earned))
        .bind(i64::from(progress.curve_version))
        .bind(progress.updated_at)
        .bind(expected.total_xp)
        .bind(i64::from(expected.level))
        .bind(i64::from(expected.modules_completed))
        .bind(i64::from(expected.lessons_completed))
        .bind(i64::from(expected.quizzes_passed))
        .bind(i64::from(expected.achievements_earned))
        .bind(i64::from(expected.curve_version))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn replace_streak(
        &self,
        expected: Option<&StreakRecord>,
        streak: &StreakRecord,
    ) -> Result<bool> {
        let Some(expected) = expected else {
            let result = sqlx::query(
                "INSERT INTO streak_records \
                 (user_id, current_streak, longest_streak, last_activity_date, updated_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (user_id) DO NOTHING",
            )
            .bind(streak.user_id.get())
            .bind(i64::from(streak.current_streak))
            .bind(i64::from(streak.longest_streak))
            .bind(streak.last_activity_date)
            .bind(streak.updated_at)
            .execute(&self.pool)
            .await?;
            return Ok(result.rows_affected() == 1);
        };

        let result = sqlx::query(
            "UPDATE streak_records SET current_streak = $2, longest_streak = $3, \
             last_activity_date = $4, updated_at = $5 \
             WHERE user_id = $1 AND current_streak = $6 AND longest_streak = $7 \
               AND last_activity_date IS NOT DISTINCT FROM $8",
        )
        .bind(streak.user_id.get())
        .bind(i64::from(streak.current_streak))
        .bind(i64::from(streak.longest_streak))
        .bind(streak.last_activity_date)
        .bind(streak.updated_at)
        .bind(i64::from(expected.current_streak))
        .bind(i64::from(expected.longest_streak))
        .bind(expected.last_activity_date)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
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
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO achievements (user_id, achievement_id, earned_at) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, achievement_id) DO NOTHING",
        )
        .bind(identity.internal.get())
        .bind(achievement_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| unknown_user_on_fk(e, identity.internal))?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO progress_aggregates (user_id, level, curve_version, updated_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(identity.internal.get())
        .bind(i64::from(curve.level_for(0)))
        .bind(i64::from(curve.version))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE progress_aggregates \
             SET achievements_earned = achievements_earned + 1, \
                 updated_at = GREATEST(updated_at, $2) \
             WHERE user_id = $1",
        )
        .bind(identity.internal.get())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn achievement_count(&self, user_id: InternalUserId) -> Result<u32> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM achievements WHERE user_id = $1")
                .bind(user_id.get())
                .fetch_one(&self.pool)
                .await?;
        to_u32(count, "achievement count")
    }

    // =========================================================================
    // Challenge Operations
    // =========================================================================

    async fn publish_challenge(&self, challenge: &ChallengeInstance) -> Result<ChallengeInstance> {
        sqlx::query(
            "INSERT INTO challenge_instances (id, publish_date, question_set, xp_reward, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (publish_date) DO NOTHING",
        )
        .bind(*challenge.id.as_uuid())
        .bind(challenge.publish_date)
        .bind(Json(&challenge.questions))
        .bind(challenge.xp_reward)
        .bind(challenge.created_at)
        .execute(&self.pool)
        .await?;

        self.get_challenge_by_date(challenge.publish_date)
            .await?
            .ok_or_else(|| StoreError::ChallengeNotFound {
                challenge_id: challenge.id.to_string(),
            })
    }

    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<ChallengeInstance>> {
        let row: Option<ChallengeRow> = sqlx::query_as(
            "SELECT id, publish_date, question_set, xp_reward, created_at \
             FROM challenge_instances WHERE id = $1",
        )
        .bind(*challenge_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ChallengeRow::into_challenge))
    }

    async fn get_challenge_by_date(&self, date: NaiveDate) -> Result<Option<ChallengeInstance>> {
        let row: Option<ChallengeRow> = sqlx::query_as(
            "SELECT id, publish_date, question_set, xp_reward, created_at \
             FROM challenge_instances WHERE publish_date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ChallengeRow::into_challenge))
    }

    async fn record_attempt(
        &self,
        attempt: &NewChallengeAttempt,
        award: &LedgerEntry,
        curve: &LevelCurve,
    ) -> Result<AwardOutcome> {
        let mut tx = self.pool.begin().await?;

        let challenge: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM challenge_instances WHERE id = $1")
                .bind(*attempt.challenge_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if challenge.is_none() {
            return Err(StoreError::ChallengeNotFound {
                challenge_id: attempt.challenge_id.to_string(),
            });
        }

        sqlx::query(
            "INSERT INTO challenge_attempts \
             (user_id, public_user_id, challenge_id, score, max_score, time_taken_secs, answers, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(attempt.identity.internal.get())
        .bind(*attempt.identity.public.as_uuid())
        .bind(*attempt.challenge_id.as_uuid())
        .bind(i64::from(attempt.score))
        .bind(i64::from(attempt.max_score))
        .bind(i64::from(attempt.time_taken_secs))
        .bind(Json(&attempt.answers))
        .bind(attempt.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyAttempted {
                    user: attempt.identity.public.to_string(),
                    challenge_id: attempt.challenge_id.to_string(),
                }
            } else {
                unknown_user_on_fk(e, attempt.identity.internal)
            }
        })?;

        let outcome = Self::award_in(&mut tx, award, curve).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_attempt(
        &self,
        user_id: InternalUserId,
        challenge_id: ChallengeId,
    ) -> Result<Option<ChallengeAttempt>> {
        let row: Option<AttemptRow> = sqlx::query_as(
            "SELECT a.user_id, COALESCE(a.public_user_id, u.public_id) AS public_user_id, \
                    a.challenge_id, a.score, a.max_score, a.time_taken_secs, a.answers, a.completed_at \
             FROM challenge_attempts a JOIN users u ON u.id = a.user_id \
             WHERE a.user_id = $1 AND a.challenge_id = $2",
        )
        .bind(user_id.get())
        .bind(*challenge_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttemptRow::into_attempt).transpose()
    }

    // =========================================================================
    // Leaderboard Queries
    // =========================================================================

    async fn leaderboard_totals(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<UserWindowTotal>> {
        let rows: Vec<TotalRow> = sqlx::query_as(
            "SELECT l.user_id, u.public_id AS public_user_id, \
                    SUM(l.amount)::BIGINT AS total, MIN(l.created_at) AS first_activity_at \
             FROM ledger_entries l JOIN users u ON u.id = l.user_id \
             WHERE ($1::TIMESTAMPTZ IS NULL OR l.created_at >= $1) \
             GROUP BY l.user_id, u.public_id \
             ORDER BY total DESC, first_activity_at ASC, l.user_id ASC \
             LIMIT $2",
        )
        .bind(since)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UserWindowTotal {
                user_id: InternalUserId::new(row.user_id),
                public_user_id: PublicUserId::from_uuid(row.public_user_id),
                total: row.total,
                first_activity_at: row.first_activity_at,
            })
            .collect())
    }

    async fn user_window_total(
        &self,
        user_id: InternalUserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<i64>> {
        let (total,): (Option<i64>,) = sqlx::query_as(
            "SELECT SUM(amount)::BIGINT FROM ledger_entries \
             WHERE user_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)",
        )
        .bind(user_id.get())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn count_users_above(&self, total: i64, since: Option<DateTime<Utc>>) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM ( \
                 SELECT user_id FROM ledger_entries \
                 WHERE user_id IS NOT NULL AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2) \
                 GROUP BY user_id HAVING SUM(amount) > $1 \
             ) above",
        )
        .bind(total)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        u64::try_from(count).map_err(|_| StoreError::Serialization(format!("negative count: {count}")))
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    async fn identity_findings(&self) -> Result<Vec<IdentityFinding>> {
        let entries: Vec<FindingRow> = sqlx::query_as(
            "SELECT l.id AS row_id, l.user_id, l.public_user_id \
             FROM ledger_entries l LEFT JOIN users u ON u.id = l.user_id \
             WHERE l.user_id IS NULL OR l.public_user_id IS NULL OR u.public_id <> l.public_user_id \
             ORDER BY l.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let attempts: Vec<FindingRow> = sqlx::query_as(
            "SELECT a.id::TEXT AS row_id, a.user_id, a.public_user_id \
             FROM challenge_attempts a LEFT JOIN users u ON u.id = a.user_id \
             WHERE a.user_id IS NULL OR a.public_user_id IS NULL OR u.public_id <> a.public_user_id \
             ORDER BY a.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(entries
            .into_iter()
            .map(|row| row.into_finding(LedgerTable::LedgerEntries))
            .chain(
                attempts
                    .into_iter()
                    .map(|row| row.into_finding(LedgerTable::ChallengeAttempts)),
            )
            .collect())
    }

    async fn repair_identity(
        &self,
        finding: &IdentityFinding,
        identity: UserIdentity,
    ) -> Result<bool> {
        let result = match finding.table {
            LedgerTable::LedgerEntries => {
                sqlx::query(
                    "UPDATE ledger_entries SET user_id = $2, public_user_id = $3 \
                     WHERE id = $1 AND user_id IS NOT DISTINCT FROM $4 \
                       AND public_user_id IS NOT DISTINCT FROM $5",
                )
                .bind(&finding.row_id)
                .bind(identity.internal.get())
                .bind(*identity.public.as_uuid())
                .bind(finding.user_id.map(InternalUserId::get))
                .bind(finding.public_user_id.map(|p| *p.as_uuid()))
                .execute(&self.pool)
                .await
            }
            LedgerTable::ChallengeAttempts => {
                let Ok(attempt_id) = finding.row_id.parse::<i64>() else {
                    return Ok(false);
                };
                sqlx::query(
                    "UPDATE challenge_attempts SET user_id = $2, public_user_id = $3 \
                     WHERE id = $1 AND user_id IS NOT DISTINCT FROM $4 \
                       AND public_user_id IS NOT DISTINCT FROM $5",
                )
                .bind(attempt_id)
                .bind(identity.internal.get())
                .bind(*identity.public.as_uuid())
                .bind(finding.user_id.map(InternalUserId::get))
                .bind(finding.public_user_id.map(|p| *p.as_uuid()))
                .execute(&self.pool)
                .await
            }
        };

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "{} row {} would duplicate a unique key",
                finding.table.as_str(),
                finding.row_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn users_with_state(&self) -> Result<Vec<InternalUserId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM ledger_entries WHERE user_id IS NOT NULL \
             UNION SELECT user_id FROM progress_aggregates \
             UNION SELECT user_id FROM streak_records \
             UNION SELECT user_id FROM achievements \
             ORDER BY 1",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| InternalUserId::new(id)).collect())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    user_id: i64,
    public_user_id: Uuid,
    source_type: String,
    reference_id: String,
    amount: i64,
    reverses: Option<String>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self) -> Result<LedgerEntry> {
        Ok(LedgerEntry {
            id: parse_entry_id(&self.id)?,
            user_id: InternalUserId::new(self.user_id),
            public_user_id: PublicUserId::from_uuid(self.public_user_id),
            source_type: self
                .source_type
                .parse()
                .map_err(|e: civic_ledger_core::LedgerError| {
                    StoreError::Serialization(e.to_string())
                })?,
            reference_id: self.reference_id,
            amount: self.amount,
            reverses: self.reverses.as_deref().map(parse_entry_id).transpose()?,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    user_id: i64,
    total_xp: i64,
    level: i64,
    modules_completed: i64,
    lessons_completed: i64,
    quizzes_passed: i64,
    achievements_earned: i64,
    curve_version: i64,
    updated_at: DateTime<Utc>,
}

impl ProgressRow {
    fn into_progress(self) -> Result<ProgressAggregate> {
        Ok(ProgressAggregate {
            user_id: InternalUserId::new(self.user_id),
            total_xp: self.total_xp,
            level: to_u32(self.level, "level")?,
            modules_completed: to_u32(self.modules_completed, "modules_completed")?,
            lessons_completed: to_u32(self.lessons_completed, "lessons_completed")?,
            quizzes_passed: to_u32(self.quizzes_passed, "quizzes_passed")?,
            achievements_earned: to_u32(self.achievements_earned, "achievements_earned")?,
            curve_version: to_u32(self.curve_version, "curve_version")?,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StreakRow {
    user_id: i64,
    current_streak: i64,
    longest_streak: i64,
    last_activity_date: Option<NaiveDate>,
    updated_at: DateTime<Utc>,
}

impl StreakRow {
    fn into_streak(self) -> Result<StreakRecord> {
        Ok(StreakRecord {
            user_id: InternalUserId::new(self.user_id),
            current_streak: to_u32(self.current_streak, "current_streak")?,
            longest_streak: to_u32(self.longest_streak, "longest_streak")?,
            last_activity_date: self.last_activity_date,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    publish_date: NaiveDate,
    question_set: Json<Vec<ChallengeQuestion>>,
    xp_reward: i64,
    created_at: DateTime<Utc>,
}

impl ChallengeRow {
    fn into_challenge(self) -> ChallengeInstance {
        ChallengeInstance {
            id: ChallengeId::from_uuid(self.id),
            publish_date: self.publish_date,
            questions: self.question_set.0,
            xp_reward: self.xp_reward,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    user_id: i64,
    public_user_id: Uuid,
    challenge_id: Uuid,
    score: i64,
    max_score: i64,
    time_taken_secs: i64,
    answers: Json<Vec<ChallengeAnswer>>,
    completed_at: DateTime<Utc>,
}

impl AttemptRow {
    fn into_attempt(self) -> Result<ChallengeAttempt> {
        Ok(ChallengeAttempt {
            user_id: InternalUserId::new(self.user_id),
            public_user_id: PublicUserId::from_uuid(self.public_user_id),
            challenge_id: ChallengeId::from_uuid(self.challenge_id),
            score: to_u32(self.score, "score")?,
            max_score: to_u32(self.max_score, "max_score")?,
            time_taken_secs: to_u32(self.time_taken_secs, "time_taken_secs")?,
            answers: self.answers.0,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TotalRow {
    user_id: i64,
    public_user_id: Uuid,
    total: i64,
    first_activity_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct FindingRow {
    row_id: String,
    user_id: Option<i64>,
    public_user_id: Option<Uuid>,
}

impl FindingRow {
    fn into_finding(self, table: LedgerTable) -> IdentityFinding {
        IdentityFinding {
            table,
            row_id: self.row_id,
            user_id: self.user_id.map(InternalUserId::new),
            public_user_id: self.public_user_id.map(PublicUserId::from_uuid),
        }
    }
}

async fn write_progress(conn: &mut sqlx::PgConnection, progress: &ProgressAggregate) -> Result<()> {
    sqlx::query(
        "UPDATE progress_aggregates SET total_xp = $2, level = $3, modules_completed = $4, \
         lessons_completed = $5, quizzes_passed = $6, achievements_earned = $7, \
         curve_version = $8, updated_at = $9 WHERE user_id = $1",
    )
    .bind(progress.user_id.get())
    .bind(progress.total_xp)
    .bind(i64::from(progress.level))
    .bind(i64::from(progress.modules_completed))
    .bind(i64::from(progress.lessons_completed))
    .bind(i64::from(progress.quizzes_passed))
    .bind(i64::from(progress.achievements_earned))
    .bind(i64::from(progress.curve_version))
    .bind(progress.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

fn parse_entry_id(value: &str) -> Result<EntryId> {
    value
        .parse()
        .map_err(|_| StoreError::Serialization(format!("invalid entry id: {value}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn unknown_user_on_fk(error: sqlx::Error, user_id: InternalUserId) -> StoreError {
    if is_foreign_key_violation(&error) {
        StoreError::UnknownUser {
            key: user_id.to_string(),
        }
    } else {
        error.into()
    }
}
