//! Core types and rules for the civic progress ledger.
//!
//! This crate provides the foundational types used throughout the ledger:
//!
//! - **Identifiers**: `InternalUserId`, `PublicUserId`, `UserKey`, `EntryId`, `ChallengeId`
//! - **Ledger**: `LedgerEntry`, `SourceType`, `NewAward`, `AwardOutcome`
//! - **Progress**: `ProgressAggregate`, `LevelCurve`, `StreakRecord`
//! - **Challenges**: `ChallengeInstance`, `ChallengeAttempt`, scoring
//! - **Leaderboards**: `LeaderboardWindow`, rank assignment
//! - **Reconciliation**: `ReconcileReport` and its findings
//!
//! # Dual-key identity
//!
//! Every user has two keys: a sequential internal key used for joins and a
//! public opaque key handed to clients. Rows written by the ledger always carry
//! both, resolved once at the write boundary.
//!
//! # XP
//!
//! XP amounts are signed `i64` values. The aggregate's `total_xp` is always the
//! sum of the user's ledger entries and can be rebuilt from them at any time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod challenge;
pub mod clock;
pub mod error;
pub mod ids;
pub mod leaderboard;
pub mod ledger;
pub mod level;
pub mod points;
pub mod progress;
pub mod reconcile;
pub mod streak;

pub use challenge::{
    ChallengeAnswer, ChallengeAttempt, ChallengeInstance, ChallengeQuestion, NewChallengeAttempt,
    PublicQuestion, Score, MAX_CHALLENGE_QUESTIONS,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, Result};
pub use ids::{ChallengeId, EntryId, IdError, InternalUserId, PublicUserId, UserIdentity, UserKey};
pub use leaderboard::{
    assign_ranks, LeaderboardEntry, LeaderboardWindow, MyRank, RankedEntry, UserWindowTotal,
};
pub use ledger::{
    AwardOutcome, LedgerEntry, LegacyEntry, NewAward, SourceType, MAX_AWARD_AMOUNT,
    MAX_REFERENCE_ID_LEN,
};
pub use level::{LevelCurve, DEFAULT_CURVE_MAX_LEVEL, DEFAULT_CURVE_STEP_XP};
pub use points::{
    PointSchedule, DEFAULT_DISCUSSION_POST_XP, DEFAULT_DISCUSSION_REPLY_XP, DEFAULT_LIKE_XP,
};
pub use progress::{CompletionCounter, ProgressAggregate};
pub use reconcile::{
    AggregateDrift, DriftDetected, IdentityAnomaly, IdentityAnomalyKind, IdentityFinding,
    IdentityRepair, LedgerTable, ReconcileReport, StreakDrift,
};
pub use streak::StreakRecord;
