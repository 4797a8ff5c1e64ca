//! XP amounts for community actions.
//!
//! Learning content carries its own `xp_reward`; community actions (posts,
//! replies, likes) are worth a configured fixed amount.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ledger::{SourceType, MAX_AWARD_AMOUNT};

/// Default XP for creating a discussion post.
pub const DEFAULT_DISCUSSION_POST_XP: i64 = 10;

/// Default XP for posting a reply.
pub const DEFAULT_DISCUSSION_REPLY_XP: i64 = 5;

/// Default XP for giving a like.
pub const DEFAULT_LIKE_XP: i64 = 1;

/// Fixed XP amounts per community action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointSchedule {
    /// XP for a discussion post.
    pub discussion_post: i64,
    /// XP for a discussion reply.
    pub discussion_reply: i64,
    /// XP for a like.
    pub like: i64,
}

impl PointSchedule {
    /// The fixed amount for `source`, if it has one.
    #[must_use]
    pub const fn amount_for(&self, source: SourceType) -> Option<i64> {
        match source {
            SourceType::DiscussionPost => Some(self.discussion_post),
            SourceType::DiscussionReply => Some(self.discussion_reply),
            SourceType::Like => Some(self.like),
            _ => None,
        }
    }

    /// Check that every amount is positive.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` naming the first bad amount.
    pub fn validate(&self) -> Result<()> {
        for (name, amount) in [
            ("discussion_post", self.discussion_post),
            ("discussion_reply", self.discussion_reply),
            ("like", self.like),
        ] {
            if !(1..=MAX_AWARD_AMOUNT).contains(&amount) {
                return Err(LedgerError::Configuration(format!(
                    "point schedule amount for {name} must be 1..={MAX_AWARD_AMOUNT}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for PointSchedule {
    fn default() -> Self {
        Self {
            discussion_post: DEFAULT_DISCUSSION_POST_XP,
            discussion_reply: DEFAULT_DISCUSSION_REPLY_XP,
            like: DEFAULT_LIKE_XP,
        }
    }
}
