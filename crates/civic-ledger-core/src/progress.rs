//! Per-user progress aggregates.
//!
//! The aggregate is a cached materialization of the ledger. `apply` is the
//! incremental path used inside the award transaction; `rebuild` is the
//! from-scratch path used by reconciliation. Both must always agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::InternalUserId;
use crate::ledger::{LedgerEntry, SourceType};
use crate::level::LevelCurve;

/// A completion counter on the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCounter {
    /// `lessons_completed`.
    Lessons,
    /// `quizzes_passed`.
    Quizzes,
    /// `modules_completed`.
    Modules,
}

impl CompletionCounter {
    /// The counter an award of `source` increments, if any.
    ///
    /// Manual adjustments, community actions and challenges never touch
    /// completion counters.
    #[must_use]
    pub const fn for_source(source: SourceType) -> Option<Self> {
        match source {
            SourceType::Lesson => Some(Self::Lessons),
            SourceType::Quiz => Some(Self::Quizzes),
            SourceType::Module => Some(Self::Modules),
            SourceType::DiscussionPost
            | SourceType::DiscussionReply
            | SourceType::Like
            | SourceType::Challenge
            | SourceType::ManualAdjustment => None,
        }
    }
}

/// Running totals for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressAggregate {
    /// The user (internal key).
    pub user_id: InternalUserId,

    /// Sum of every ledger amount for the user.
    pub total_xp: i64,

    /// Level on the curve identified by `curve_version`.
    pub level: u32,

    /// Completed modules.
    pub modules_completed: u32,

    /// Completed lessons.
    pub lessons_completed: u32,

    /// Passed quizzes.
    pub quizzes_passed: u32,

    /// Achievements earned.
    pub achievements_earned: u32,

    /// Version of the level curve used for `level`.
    pub curve_version: u32,

    /// When the aggregate was last written.
    pub updated_at: DateTime<Utc>,
}

impl ProgressAggregate {
    /// An empty aggregate for a user with no ledger entries.
    #[must_use]
    pub fn new(user_id: InternalUserId, curve: &LevelCurve, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_xp: 0,
            level: curve.level_for(0),
            modules_completed: 0,
            lessons_completed: 0,
            quizzes_passed: 0,
            achievements_earned: 0,
            curve_version: curve.version,
            updated_at: now,
        }
    }

    /// Fold one ledger entry (award or reversal) into the totals.
    pub fn apply(&mut self, entry: &LedgerEntry, curve: &LevelCurve) {
        self.total_xp = self.total_xp.saturating_add(entry.amount);

        if let Some(counter) = CompletionCounter::for_source(entry.source_type) {
            let slot = self.counter_mut(counter);
            *slot = if entry.is_reversal() {
                slot.saturating_sub(1)
            } else {
                slot.saturating_add(1)
            };
        }

        self.level = curve.level_for(self.total_xp);
        self.curve_version = curve.version;
        self.updated_at = entry.created_at.max(self.updated_at);
    }

    /// Rebuild an aggregate from the user's full ledger history.
    #[must_use]
    pub fn rebuild<'a, I>(
        user_id: InternalUserId,
        entries: I,
        achievements_earned: u32,
        curve: &LevelCurve,
        now: DateTime<Utc>,
    ) -> Self
    where
        I: IntoIterator<Item = &'a LedgerEntry>,
    {
        let mut aggregate = Self::new(user_id, curve, now);
        for entry in entries {
            aggregate.apply(entry, curve);
        }
        aggregate.achievements_earned = achievements_earned;
        aggregate.updated_at = now;
        aggregate
    }

    /// Read a completion counter.
    #[must_use]
    pub const fn counter(&self, counter: CompletionCounter) -> u32 {
        match counter {
            CompletionCounter::Lessons => self.lessons_completed,
            CompletionCounter::Quizzes => self.quizzes_passed,
            CompletionCounter::Modules => self.modules_completed,
        }
    }

    fn counter_mut(&mut self, counter: CompletionCounter) -> &mut u32 {
        match counter {
            CompletionCounter::Lessons => &mut self.lessons_completed,
            CompletionCounter::Quizzes => &mut self.quizzes_passed,
            CompletionCounter::Modules => &mut self.modules_completed,
        }
    }

    /// Compare the derived fields, ignoring `updated_at`.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.total_xp == other.total_xp
            && self.level == other.level
            && self.modules_completed == other.modules_completed
            && self.lessons_completed == other.lessons_completed
            && self.quizzes_passed == other.quizzes_passed
            && self.achievements_earned == other.achievements_earned
            && self.curve_version == other.curve_version
    }
}
