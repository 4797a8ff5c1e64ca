//! Reconciliation report types.
//!
//! The sweep never deletes or guesses. Rows it cannot repair with certainty
//! are reported as anomalies; everything it rewrites is listed as a repair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{InternalUserId, PublicUserId, UserIdentity};
use crate::progress::ProgressAggregate;
use crate::streak::StreakRecord;

/// A table whose rows carry both user keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTable {
    /// `ledger_entries`.
    LedgerEntries,
    /// `challenge_attempts`.
    ChallengeAttempts,
}

impl LedgerTable {
    /// The table name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LedgerEntries => "ledger_entries",
            Self::ChallengeAttempts => "challenge_attempts",
        }
    }
}

/// A row missing a user key, or whose keys disagree with `users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFinding {
    /// Where the row lives.
    pub table: LedgerTable,
    /// The row's primary key, as text.
    pub row_id: String,
    /// The internal key on the row, if any.
    pub user_id: Option<InternalUserId>,
    /// The public key on the row, if any.
    pub public_user_id: Option<PublicUserId>,
}

impl IdentityFinding {
    /// Decide what to do with the row, given the identity resolved from the
    /// key it does carry.
    ///
    /// # Errors
    ///
    /// Returns the anomaly kind when the row must be reported instead of
    /// repaired.
    pub fn repair_with(
        &self,
        resolved: Option<UserIdentity>,
    ) -> Result<UserIdentity, IdentityAnomalyKind> {
        match (self.user_id, self.public_user_id, resolved) {
            (Some(_), Some(_), _) => Err(IdentityAnomalyKind::Mismatch),
            (None, None, _) | (_, _, None) => Err(IdentityAnomalyKind::Orphan),
            (Some(internal), None, Some(identity)) if identity.internal == internal => {
                Ok(identity)
            }
            (None, Some(public), Some(identity)) if identity.public == public => Ok(identity),
            (_, _, Some(_)) => Err(IdentityAnomalyKind::Mismatch),
        }
    }
}

/// A key fill the sweep wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRepair {
    /// Where the row lives.
    pub table: LedgerTable,
    /// The repaired row.
    pub row_id: String,
    /// Both keys as written.
    pub identity: UserIdentity,
}

/// Why a row was reported instead of repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityAnomalyKind {
    /// No user matches the key the row carries.
    Orphan,
    /// The row carries both keys and they belong to different users.
    Mismatch,
    /// Filling the key would collide with another row's unique key.
    Conflict,
}

/// A row the sweep left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAnomaly {
    /// The row as found.
    pub finding: IdentityFinding,
    /// Why it was not repaired.
    pub kind: IdentityAnomalyKind,
}

/// An aggregate that differed from its rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDrift {
    /// The user.
    pub user_id: InternalUserId,
    /// The stored aggregate (`None` if it was missing).
    pub stored: Option<ProgressAggregate>,
    /// The rebuilt aggregate that replaced it.
    pub rebuilt: ProgressAggregate,
}

/// A streak record that differed from its replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakDrift {
    /// The user.
    pub user_id: InternalUserId,
    /// The stored record (`None` if it was missing).
    pub stored: Option<StreakRecord>,
    /// The replayed record that replaced it.
    pub replayed: StreakRecord,
}

/// A derived row that no longer matched the ledger and was overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftDetected {
    /// Progress aggregate drift.
    Aggregate(AggregateDrift),
    /// Streak record drift.
    Streak(StreakDrift),
}

impl DriftDetected {
    /// The affected user.
    #[must_use]
    pub const fn user_id(&self) -> InternalUserId {
        match self {
            Self::Aggregate(drift) => drift.user_id,
            Self::Streak(drift) => drift.user_id,
        }
    }
}

/// The outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Key fills written.
    pub identity_repairs: Vec<IdentityRepair>,
    /// Rows reported but not touched.
    pub identity_anomalies: Vec<IdentityAnomaly>,
    /// Derived rows overwritten.
    pub drifts: Vec<DriftDetected>,
    /// Users whose aggregates and streaks were checked.
    pub users_scanned: u64,
    /// When the sweep started.
    pub started_at: DateTime<Utc>,
    /// When the sweep finished.
    pub finished_at: DateTime<Utc>,
}

impl ReconcileReport {
    /// An empty report starting at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            identity_repairs: Vec::new(),
            identity_anomalies: Vec::new(),
            drifts: Vec::new(),
            users_scanned: 0,
            started_at: now,
            finished_at: now,
        }
    }

    /// Number of writes the sweep performed.
    #[must_use]
    pub fn repairs_applied(&self) -> usize {
        self.identity_repairs.len() + self.drifts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> UserIdentity {
        UserIdentity {
            internal: InternalUserId::new(5),
            public: PublicUserId::generate(),
        }
    }

    fn finding(user_id: Option<InternalUserId>, public: Option<PublicUserId>) -> IdentityFinding {
        IdentityFinding {
            table: LedgerTable::LedgerEntries,
            row_id: "row".into(),
            user_id,
            public_user_id: public,
        }
    }

    #[test]
    fn fills_from_either_key() {
        let who = identity();
        assert_eq!(finding(Some(who.internal), None).repair_with(Some(who)), Ok(who));
        assert_eq!(finding(None, Some(who.public)).repair_with(Some(who)), Ok(who));
    }

    #[test]
    fn unresolvable_rows_are_orphans() {
        let who = identity();
        assert_eq!(
            finding(Some(who.internal), None).repair_with(None),
            Err(IdentityAnomalyKind::Orphan)
        );
        assert_eq!(
            finding(None, None).repair_with(Some(who)),
            Err(IdentityAnomalyKind::Orphan)
        );
    }

    #[test]
    fn disagreeing_pairs_are_never_guessed() {
        let who = identity();
        let other = PublicUserId::generate();
        assert_eq!(
            finding(Some(who.internal), Some(other)).repair_with(Some(who)),
            Err(IdentityAnomalyKind::Mismatch)
        );
    }

    #[test]
    fn repairs_applied_counts_writes() {
        let who = identity();
        let mut report = ReconcileReport::new(Utc::now());
        assert_eq!(report.repairs_applied(), 0);
        report.identity_repairs.push(IdentityRepair {
            table: LedgerTable::ChallengeAttempts,
            row_id: "1".into(),
            identity: who,
        });
        report.drifts.push(DriftDetected::Streak(StreakDrift {
            user_id: who.internal,
            stored: None,
            replayed: StreakRecord::new(who.internal, Utc::now()),
        }));
        assert_eq!(report.repairs_applied(), 2);
    }
}
