//! Ledger entry types.
//!
//! The ledger is append-only. Every XP-granting action becomes one award
//! entry; a moderation reversal becomes a second entry with the negated amount
//! that points back at the original. Nothing is ever updated in place.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ids::{EntryId, InternalUserId, PublicUserId, UserIdentity};
use crate::progress::ProgressAggregate;
use crate::streak::StreakRecord;

/// Maximum length of a `reference_id`.
pub const MAX_REFERENCE_ID_LEN: usize = 128;

/// Largest magnitude a single entry may carry, positive or negative.
pub const MAX_AWARD_AMOUNT: i64 = 1_000_000;

/// The kind of action that produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A lesson was completed.
    Lesson,
    /// A quiz was passed.
    Quiz,
    /// A whole module was completed.
    Module,
    /// A community discussion post was created.
    DiscussionPost,
    /// A reply was posted in a discussion.
    DiscussionReply,
    /// A like was given.
    Like,
    /// A daily challenge was submitted.
    Challenge,
    /// An operator adjustment.
    ManualAdjustment,
}

impl SourceType {
    /// All source types, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Lesson,
        Self::Quiz,
        Self::Module,
        Self::DiscussionPost,
        Self::DiscussionReply,
        Self::Like,
        Self::Challenge,
        Self::ManualAdjustment,
    ];

    /// Get the source name as stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lesson => "lesson",
            Self::Quiz => "quiz",
            Self::Module => "module",
            Self::DiscussionPost => "discussion_post",
            Self::DiscussionReply => "discussion_reply",
            Self::Like => "like",
            Self::Challenge => "challenge",
            Self::ManualAdjustment => "manual_adjustment",
        }
    }

    /// Whether awards of this type may carry a negative amount.
    #[must_use]
    pub const fn allows_negative(&self) -> bool {
        matches!(self, Self::ManualAdjustment)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| LedgerError::Storage(format!("unknown source type: {s}")))
    }
}

/// An immutable record of one XP-granting (or reversing) event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (ULID, time-ordered).
    pub id: EntryId,

    /// The internal key of the credited user.
    pub user_id: InternalUserId,

    /// The public key of the credited user, denormalized for external reads.
    pub public_user_id: PublicUserId,

    /// What kind of action produced the entry.
    pub source_type: SourceType,

    /// The specific lesson/quiz/post/challenge instance.
    pub reference_id: String,

    /// Signed XP amount, never zero.
    pub amount: i64,

    /// The award entry this entry reverses, if it is a reversal.
    pub reverses: Option<EntryId>,

    /// Operator-supplied reason (reversals and manual adjustments).
    pub reason: Option<String>,

    /// When the entry was created. The only clock the aggregate rules trust.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build a new award entry for a resolved user.
    #[must_use]
    pub fn award(identity: UserIdentity, award: &NewAward, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::generate(),
            user_id: identity.internal,
            public_user_id: identity.public,
            source_type: award.source_type,
            reference_id: award.reference_id.clone(),
            amount: award.amount,
            reverses: None,
            reason: award.reason.clone(),
            created_at,
        }
    }

    /// Build the reversal of this entry.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidReversal` if this entry is itself a reversal.
    pub fn reversal(&self, reason: String, created_at: DateTime<Utc>) -> Result<Self> {
        if self.is_reversal() {
            return Err(LedgerError::InvalidReversal(format!(
                "entry {} is a reversal and cannot be reversed",
                self.id
            )));
        }

        Ok(Self {
            id: EntryId::generate(),
            user_id: self.user_id,
            public_user_id: self.public_user_id,
            source_type: self.source_type,
            reference_id: self.reference_id.clone(),
            amount: -self.amount,
            reverses: Some(self.id),
            reason: Some(reason),
            created_at,
        })
    }

    /// Whether this entry reverses another.
    #[must_use]
    pub const fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }

    /// The UTC calendar day of the entry.
    #[must_use]
    pub fn activity_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// What to credit; the user is resolved separately by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAward {
    /// What kind of action is being credited.
    pub source_type: SourceType,
    /// The specific instance being credited.
    pub reference_id: String,
    /// XP amount.
    pub amount: i64,
    /// Optional reason (manual adjustments).
    #[serde(default)]
    pub reason: Option<String>,
}

impl NewAward {
    /// Create an award request.
    #[must_use]
    pub fn new(source_type: SourceType, reference_id: impl Into<String>, amount: i64) -> Self {
        Self {
            source_type,
            reference_id: reference_id.into(),
            amount,
            reason: None,
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Check the request before it reaches storage.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` for a zero or out-of-range amount,
    /// or a negative amount on a source type that only grants XP, and
    /// `LedgerError::InvalidReference` for a blank, oversized or padded
    /// reference.
    pub fn validate(&self) -> Result<()> {
        validate_amount(self.source_type, self.amount)?;
        validate_reference(&self.reference_id)
    }
}

fn validate_amount(source_type: SourceType, amount: i64) -> Result<()> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be non-zero".into()));
    }
    if amount.unsigned_abs() > MAX_AWARD_AMOUNT.unsigned_abs() {
        return Err(LedgerError::InvalidAmount(format!(
            "amount magnitude must not exceed {MAX_AWARD_AMOUNT}"
        )));
    }
    if amount < 0 && !source_type.allows_negative() {
        return Err(LedgerError::InvalidAmount(format!(
            "{source_type} awards must be positive"
        )));
    }
    Ok(())
}

fn validate_reference(reference_id: &str) -> Result<()> {
    if reference_id.trim().is_empty() || reference_id.len() > MAX_REFERENCE_ID_LEN {
        return Err(LedgerError::InvalidReference(format!(
            "reference_id must be 1..={MAX_REFERENCE_ID_LEN} characters"
        )));
    }
    if reference_id.trim() != reference_id {
        return Err(LedgerError::InvalidReference(
            "reference_id must not have leading or trailing whitespace".into(),
        ));
    }
    Ok(())
}

/// The result of an award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardOutcome {
    /// `false` when the idempotency key was already credited.
    pub accepted: bool,

    /// The new entry, or the entry that already held the key.
    pub entry_id: EntryId,

    /// The aggregate after the award (`None` when nothing was written).
    pub progress: Option<ProgressAggregate>,

    /// The streak after the award (`None` when nothing was written).
    pub streak: Option<StreakRecord>,
}

impl AwardOutcome {
    /// An outcome for an idempotency-key hit.
    #[must_use]
    pub const fn already_credited(entry_id: EntryId) -> Self {
        Self {
            accepted: false,
            entry_id,
            progress: None,
            streak: None,
        }
    }
}

/// A historical ledger row imported from a previous system.
///
/// Legacy rows may carry only one of the two user keys. They are written as-is
/// and repaired later by the reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEntry {
    /// The internal key, if the legacy row had one.
    #[serde(default)]
    pub user_id: Option<InternalUserId>,
    /// The public key, if the legacy row had one.
    #[serde(default)]
    pub public_user_id: Option<PublicUserId>,
    /// Source type.
    pub source_type: SourceType,
    /// Reference.
    pub reference_id: String,
    /// Amount.
    pub amount: i64,
    /// Original creation time.
    pub created_at: DateTime<Utc>,
}

impl LegacyEntry {
    /// Apply the award rules to an imported row.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidReference` when the row carries no user
    /// key or a bad reference, and `LedgerError::InvalidAmount` for an amount
    /// an award could not carry.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_none() && self.public_user_id.is_none() {
            return Err(LedgerError::InvalidReference(
                "entry carries no user key".into(),
            ));
        }
        validate_amount(self.source_type, self.amount)?;
        validate_reference(&self.reference_id)
    }
}
