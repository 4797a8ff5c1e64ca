//! Daily activity streaks.
//!
//! A streak counts consecutive distinct UTC calendar days with at least one
//! award. The same rule is used incrementally on every award and in a full
//! replay during reconciliation, so both paths agree whenever awards arrive in
//! date order.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::InternalUserId;

/// Per-user streak state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    /// The user (internal key).
    pub user_id: InternalUserId,

    /// Consecutive active days ending at `last_activity_date`.
    pub current_streak: u32,

    /// Best streak ever reached.
    pub longest_streak: u32,

    /// The most recent active day.
    pub last_activity_date: Option<NaiveDate>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StreakRecord {
    /// A record for a user with no activity yet.
    #[must_use]
    pub fn new(user_id: InternalUserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            updated_at: now,
        }
    }

    /// Apply one activity day. Returns `true` if the record changed.
    ///
    /// Activity older than `last_activity_date` never moves the record
    /// backward.
    pub fn record_activity(&mut self, day: NaiveDate) -> bool {
        match self.last_activity_date {
            None => {
                self.current_streak = 1;
                self.longest_streak = self.longest_streak.max(1);
            }
            Some(last) if day <= last => return false,
            Some(last) if last.succ_opt() == Some(day) => {
                self.current_streak += 1;
                self.longest_streak = self.longest_streak.max(self.current_streak);
            }
            Some(_) => {
                self.current_streak = 1;
                self.longest_streak = self.longest_streak.max(1);
            }
        }
        self.last_activity_date = Some(day);
        true
    }

    /// Rebuild a record from scratch by replaying activity days.
    ///
    /// Days may be unsorted and repeated; they are deduplicated and replayed in
    /// calendar order.
    #[must_use]
    pub fn replay<I>(user_id: InternalUserId, days: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let mut days: Vec<NaiveDate> = days.into_iter().collect();
        days.sort_unstable();
        days.dedup();

        let mut record = Self::new(user_id, now);
        for day in days {
            record.record_activity(day);
        }
        record
    }

    /// Whether the streak is still alive on `today` (activity today or yesterday).
    #[must_use]
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.last_activity_date
            .is_some_and(|last| last == today || last.succ_opt() == Some(today))
    }

    /// Compare the derived fields, ignoring `updated_at`.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.current_streak == other.current_streak
            && self.longest_streak == other.longest_streak
            && self.last_activity_date == other.last_activity_date
    }
}
