//! Daily challenges and the one-attempt gate.
//!
//! A user's attempt at a challenge moves from not attempted to submitted
//! exactly once. The attempt row and its `challenge` award are written in one
//! unit of work, and the store's unique key on `(user, challenge)` rejects a
//! second submission no matter how many race.

use chrono::NaiveDate;
use serde::Serialize;

use civic_ledger_core::{
    ChallengeAnswer, ChallengeId, ChallengeInstance, ChallengeQuestion, Clock, LedgerEntry,
    LedgerError, LevelCurve, NewAward, NewChallengeAttempt, Result, Score, SourceType, UserKey,
};
use civic_ledger_store::Store;

use crate::identity::IdentityResolver;

/// The result of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptResult {
    /// Correct answers, question count and percentage.
    #[serde(flatten)]
    pub score: Score,
    /// XP credited for this attempt.
    pub xp_earned: i64,
    /// The user's current streak after the attempt.
    pub new_streak: u32,
}

/// Publishes challenges and gates attempts.
#[derive(Clone, Copy)]
pub struct AttemptGate<'a> {
    store: &'a dyn Store,
    clock: &'a dyn Clock,
    curve: &'a LevelCurve,
}

impl<'a> AttemptGate<'a> {
    /// Create a gate over `store`.
    #[must_use]
    pub fn new(store: &'a dyn Store, clock: &'a dyn Clock, curve: &'a LevelCurve) -> Self {
        Self {
            store,
            clock,
            curve,
        }
    }

    /// Today's date on the gate's clock (UTC).
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Publish a challenge for `publish_date`.
    ///
    /// If a challenge already exists for that day it is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidChallenge` for an invalid definition.
    pub async fn publish(
        &self,
        publish_date: NaiveDate,
        questions: Vec<ChallengeQuestion>,
        xp_reward: i64,
    ) -> Result<ChallengeInstance> {
        let challenge = ChallengeInstance::new(publish_date, questions, xp_reward, self.clock.now())?;
        let stored = self.store.publish_challenge(&challenge).await?;

        if stored.id == challenge.id {
            tracing::info!(
                challenge_id = %stored.id,
                publish_date = %stored.publish_date,
                questions = stored.questions.len(),
                xp_reward = stored.xp_reward,
                "Challenge published"
            );
        } else {
            tracing::debug!(
                challenge_id = %stored.id,
                publish_date = %stored.publish_date,
                "Challenge already published for date"
            );
        }

        Ok(stored)
    }

    /// The challenge published for today, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn current(&self) -> Result<Option<ChallengeInstance>> {
        Ok(self.store.get_challenge_by_date(self.today()).await?)
    }

    /// Whether `user` has submitted an attempt at `challenge_id`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if the user cannot be resolved.
    pub async fn has_attempted(&self, user: UserKey, challenge_id: ChallengeId) -> Result<bool> {
        let identity = IdentityResolver::new(self.store).resolve(user).await?;
        Ok(self
            .store
            .get_attempt(identity.internal, challenge_id)
            .await?
            .is_some())
    }

    /// Score and record `user`'s attempt at `challenge_id`, crediting the
    /// challenge's full XP reward.
    ///
    /// # Errors
    ///
    /// - `LedgerError::UnknownUser` if the user cannot be resolved.
    /// - `LedgerError::ChallengeNotFound` for an unknown challenge.
    /// - `LedgerError::ChallengeNotOpen` before the challenge's publish date.
    /// - `LedgerError::AlreadyAttempted` if the user already submitted.
    pub async fn submit(
        &self,
        user: UserKey,
        challenge_id: ChallengeId,
        answers: Vec<ChallengeAnswer>,
        time_taken_secs: u32,
    ) -> Result<AttemptResult> {
        let identity = IdentityResolver::new(self.store).resolve(user).await?;

        let challenge = self
            .store
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| LedgerError::ChallengeNotFound {
                challenge_id: challenge_id.to_string(),
            })?;

        let now = self.clock.now();
        if challenge.publish_date > now.date_naive() {
            return Err(LedgerError::ChallengeNotOpen {
                challenge_id: challenge_id.to_string(),
                publish_date: challenge.publish_date,
            });
        }

        let score = challenge.score(&answers);
        let attempt = NewChallengeAttempt {
            identity,
            challenge_id,
            score: score.score,
            max_score: score.max_score,
            time_taken_secs,
            answers,
            completed_at: now,
        };
        let award = LedgerEntry::award(
            identity,
            &NewAward::new(
                SourceType::Challenge,
                challenge_id.to_string(),
                challenge.xp_reward,
            ),
            now,
        );

        let outcome = self.store.record_attempt(&attempt, &award, self.curve).await?;
        let new_streak = match outcome.streak {
            Some(streak) => streak.current_streak,
            None => self
                .store
                .get_streak(identity.internal)
                .await?
                .map_or(0, |streak| streak.current_streak),
        };
        let xp_earned = if outcome.accepted { challenge.xp_reward } else { 0 };

        tracing::info!(
            user_id = %identity.internal,
            challenge_id = %challenge_id,
            score = score.score,
            max_score = score.max_score,
            xp_earned,
            "Challenge attempt recorded"
        );

        Ok(AttemptResult {
            score,
            xp_earned,
            new_streak,
        })
    }
}
