//! Leaderboard windows and rank assignment.
//!
//! Totals are always computed from ledger entries in the window. Ties share a
//! rank: a user's rank is one plus the number of users with a strictly greater
//! total, so 100/100/50 ranks as 1/1/3.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ids::{InternalUserId, PublicUserId};

/// The time range a leaderboard covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardWindow {
    /// Every entry ever recorded.
    #[default]
    AllTime,
    /// The last 7 days (rolling).
    Weekly,
    /// The last 30 days (rolling).
    Monthly,
}

impl LeaderboardWindow {
    /// Get the window name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AllTime => "all_time",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// The inclusive lower bound of the window at `now` (`None` = unbounded).
    #[must_use]
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::AllTime => None,
            Self::Weekly => Some(now - Duration::days(7)),
            Self::Monthly => Some(now - Duration::days(30)),
        }
    }
}

impl std::fmt::Display for LeaderboardWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeaderboardWindow {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_time" | "all-time" | "alltime" => Ok(Self::AllTime),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            other => Err(LedgerError::Configuration(format!(
                "unknown leaderboard window: {other}"
            ))),
        }
    }
}

/// One user's sum over a window, as read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWindowTotal {
    /// The user (internal key), the final tiebreaker.
    pub user_id: InternalUserId,
    /// The user (public key).
    pub public_user_id: PublicUserId,
    /// Sum of amounts in the window.
    pub total: i64,
    /// Earliest entry in the window.
    pub first_activity_at: DateTime<Utc>,
}

impl UserWindowTotal {
    /// Leaderboard order: total desc, then earliest activity, then internal key.
    #[must_use]
    pub fn leaderboard_cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .cmp(&self.total)
            .then(self.first_activity_at.cmp(&other.first_activity_at))
            .then(self.user_id.cmp(&other.user_id))
    }
}

/// One row of a ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Dense-with-gaps rank, starting at 1.
    pub rank: u64,
    /// The user (public key only).
    pub user_id: PublicUserId,
    /// XP in the window.
    pub total_xp: i64,
}

/// The requesting user's own position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MyRank {
    /// Rank over every user in the window, regardless of `limit`.
    pub rank: u64,
    /// XP in the window.
    pub total_xp: i64,
}

/// A ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// The window ranked.
    pub window: LeaderboardWindow,
    /// Inclusive lower bound used (`None` for all-time).
    pub since: Option<DateTime<Utc>>,
    /// The top users.
    pub entries: Vec<RankedEntry>,
    /// The requesting user's position, if one was requested and has activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_rank: Option<MyRank>,
    /// When the ranking was computed.
    pub generated_at: DateTime<Utc>,
}

/// Assign ranks to totals.
///
/// The input is sorted into leaderboard order first. Because the result is a
/// prefix of the full ordering, each rank also equals one plus the number of
/// users anywhere in the window with a strictly greater total.
#[must_use]
pub fn assign_ranks(mut totals: Vec<UserWindowTotal>) -> Vec<RankedEntry> {
    totals.sort_by(UserWindowTotal::leaderboard_cmp);

    let mut ranked = Vec::with_capacity(totals.len());
    let mut rank = 0_u64;
    let mut previous: Option<i64> = None;
    for (position, total) in totals.into_iter().enumerate() {
        if previous != Some(total.total) {
            rank = position as u64 + 1;
            previous = Some(total.total);
        }
        ranked.push(RankedEntry {
            rank,
            user_id: total.public_user_id,
            total_xp: total.total,
        });
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn total(id: i64, total: i64, minute: u32) -> UserWindowTotal {
        UserWindowTotal {
            user_id: InternalUserId::new(id),
            public_user_id: PublicUserId::generate(),
            total,
            first_activity_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    #[test]
    fn ties_share_rank_and_leave_a_gap() {
        let ranked = assign_ranks(vec![total(3, 50, 0), total(1, 100, 0), total(2, 100, 0)]);
        let ranks: Vec<u64> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);
    }

    #[test]
    fn earlier_activity_wins_the_tiebreak() {
        let late = total(1, 100, 30);
        let early = total(2, 100, 5);
        let early_public = early.public_user_id;
        let ranked = assign_ranks(vec![late, early]);
        assert_eq!(ranked[0].user_id, early_public);
        assert_eq!(ranked[0].rank, ranked[1].rank);
    }

    #[test]
    fn internal_key_breaks_remaining_ties() {
        let a = total(9, 10, 0);
        let b = total(4, 10, 0);
        let b_public = b.public_user_id;
        let ranked = assign_ranks(vec![a, b]);
        assert_eq!(ranked[0].user_id, b_public);
    }

    #[test]
    fn window_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        assert_eq!(LeaderboardWindow::AllTime.since(now), None);
        assert_eq!(
            LeaderboardWindow::Weekly.since(now),
            Some(Utc.with_ymd_and_hms(2024, 6, 23, 12, 0, 0).unwrap())
        );
        assert_eq!(
            LeaderboardWindow::Monthly.since(now),
            Some(Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn window_parsing() {
        assert_eq!("weekly".parse::<LeaderboardWindow>().unwrap(), LeaderboardWindow::Weekly);
        assert_eq!("all_time".parse::<LeaderboardWindow>().unwrap(), LeaderboardWindow::AllTime);
        assert!("daily".parse::<LeaderboardWindow>().is_err());
    }
}
