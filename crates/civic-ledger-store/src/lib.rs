//! Storage layer for the civic progress ledger.
//!
//! This crate provides persistence for users, ledger entries, progress
//! aggregates, streaks, daily challenges and achievements behind a single
//! [`Store`] trait with two backends:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, with embedded migrations. Compound
//!   operations run in one transaction and rely on unique indexes for
//!   idempotency.
//! - [`MemoryStore`]: in-process tables behind one async mutex. Every operation
//!   is a single critical section, the in-memory equivalent of a transaction.
//!
//! # Tables
//!
//! - `users`: the internal/public key pair
//! - `ledger_entries`: append-only XP entries, unique on
//!   `(user_id, source_type, reference_id)` for awards and on `reverses`
//! - `progress_aggregates`, `streak_records`: derived per-user state
//! - `challenge_instances`, `challenge_attempts`: one attempt per user and challenge
//! - `achievements`: one row per user and achievement
//!
//! # Example
//!
//! ```no_run
//! use civic_ledger_core::{LedgerEntry, LevelCurve, NewAward, PublicUserId, SourceType};
//! use civic_ledger_store::{MemoryStore, Store};
//!
//! # async fn demo() -> civic_ledger_store::Result<()> {
//! let store = MemoryStore::new();
//! let now = chrono::Utc::now();
//! let user = store.register_user(PublicUserId::generate(), now).await?;
//!
//! let award = NewAward::new(SourceType::Lesson, "lesson-1", 20);
//! let outcome = store
//!     .record_award(&LedgerEntry::award(user, &award, now), &LevelCurve::default())
//!     .await?;
//! assert!(outcome.accepted);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use civic_ledger_core::{
    AwardOutcome, ChallengeAttempt, ChallengeId, ChallengeInstance, EntryId, IdentityFinding,
    InternalUserId, LedgerEntry, LegacyEntry, LevelCurve, NewChallengeAttempt, ProgressAggregate,
    PublicUserId, SourceType, StreakRecord, UserIdentity, UserKey, UserWindowTotal,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL, in-memory for tests and local development).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // User Operations
    // =========================================================================

    /// Register a user by public key, assigning an internal key.
    ///
    /// Idempotent: registering a known public key returns the existing pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn register_user(&self, public: PublicUserId, now: DateTime<Utc>)
        -> Result<UserIdentity>;

    /// Look up a user by either key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn resolve_user(&self, key: UserKey) -> Result<Option<UserIdentity>>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Append an award entry and fold it into the user's aggregate and streak,
    /// atomically.
    ///
    /// If an award with the same `(user, source_type, reference_id)` exists,
    /// nothing is written and the outcome carries the existing entry's id with
    /// `accepted: false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_award(&self, entry: &LedgerEntry, curve: &LevelCurve)
        -> Result<AwardOutcome>;

    /// Append the reversal of `entry_id` and fold it into the aggregate,
    /// atomically. Returns the reversal entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::EntryNotFound` if the entry doesn't exist.
    /// - `StoreError::InvalidReversal` if the entry is itself a reversal.
    /// - `StoreError::AlreadyReversed` if a reversal already exists.
    async fn record_reversal(
        &self,
        entry_id: EntryId,
        reason: &str,
        now: DateTime<Utc>,
        curve: &LevelCurve,
    ) -> Result<LedgerEntry>;

    /// Get an entry by ID.
    ///
    /// Rows still missing their internal key are not visible until repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>>;

    /// Sum a user's entries, optionally filtered by source and lower time bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn sum_for(
        &self,
        user_id: InternalUserId,
        source: Option<SourceType>,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64>;

    /// List entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_entries_by_user(
        &self,
        user_id: InternalUserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Every entry for a user in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn user_entries(&self, user_id: InternalUserId) -> Result<Vec<LedgerEntry>>;

    /// Write a historical entry as-is, without touching derived state.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownUser` if an internal key is given and unknown.
    /// - `StoreError::Conflict` if the entry collides with an existing award.
    async fn import_legacy_entry(&self, entry: &LegacyEntry) -> Result<EntryId>;

    // =========================================================================
    // Derived State
    // =========================================================================

    /// Get a user's progress aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_progress(&self, user_id: InternalUserId) -> Result<Option<ProgressAggregate>>;

    /// Get a user's streak record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_streak(&self, user_id: InternalUserId) -> Result<Option<StreakRecord>>;

    /// Replace a progress aggregate only if the stored row still equals
    /// `expected` (`None` = no row). Returns `false` when a concurrent write
    /// got there first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn replace_progress(
        &self,
        expected: Option<&ProgressAggregate>,
        progress: &ProgressAggregate,
    ) -> Result<bool>;

    /// Replace a streak record only if the stored row still equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn replace_streak(
        &self,
        expected: Option<&StreakRecord>,
        streak: &StreakRecord,
    ) -> Result<bool>;

    // =========================================================================
    // Achievement Operations
    // =========================================================================

    /// Record an earned achievement and bump the aggregate counter,
    /// atomically. Returns `false` if it was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_achievement(
        &self,
        identity: UserIdentity,
        achievement_id: &str,
        now: DateTime<Utc>,
        curve: &LevelCurve,
    ) -> Result<bool>;

    /// Number of achievements a user has earned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn achievement_count(&self, user_id: InternalUserId) -> Result<u32>;

    // =========================================================================
    // Challenge Operations
    // =========================================================================

    /// Publish a challenge. If one exists for the same day, it is returned
    /// unchanged instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn publish_challenge(&self, challenge: &ChallengeInstance)
        -> Result<ChallengeInstance>;

    /// Get a challenge by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<ChallengeInstance>>;

    /// Get the challenge published for a day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_challenge_by_date(&self, date: NaiveDate) -> Result<Option<ChallengeInstance>>;

    /// Insert an attempt and record its award in one unit of work.
    ///
    /// # Errors
    ///
    /// - `StoreError::AlreadyAttempted` if the user already has an attempt.
    /// - `StoreError::ChallengeNotFound` if the challenge doesn't exist.
    async fn record_attempt(
        &self,
        attempt: &NewChallengeAttempt,
        award: &LedgerEntry,
        curve: &LevelCurve,
    ) -> Result<AwardOutcome>;

    /// Get a user's attempt at a challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_attempt(
        &self,
        user_id: InternalUserId,
        challenge_id: ChallengeId,
    ) -> Result<Option<ChallengeAttempt>>;

    // =========================================================================
    // Leaderboard Queries
    // =========================================================================

    /// Per-user totals since `since`, in leaderboard order, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn leaderboard_totals(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<UserWindowTotal>>;

    /// One user's total since `since`, or `None` without entries in range.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn user_window_total(
        &self,
        user_id: InternalUserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<i64>>;

    /// Number of users whose total since `since` is strictly greater than `total`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_users_above(&self, total: i64, since: Option<DateTime<Utc>>) -> Result<u64>;

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Rows in `ledger_entries` and `challenge_attempts` missing a user key or
    /// whose key pair disagrees with `users`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn identity_findings(&self) -> Result<Vec<IdentityFinding>>;

    /// Fill the missing key of a finding. Returns `false` if the row no longer
    /// matches the finding.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the fill would violate a unique index.
    async fn repair_identity(
        &self,
        finding: &IdentityFinding,
        identity: UserIdentity,
    ) -> Result<bool>;

    /// Users with any ledger entry, aggregate, streak or achievement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn users_with_state(&self) -> Result<Vec<InternalUserId>>;
}
