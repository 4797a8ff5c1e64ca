//! Daily challenge types and scoring.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ids::{ChallengeId, InternalUserId, PublicUserId, UserIdentity};
use crate::ledger::MAX_AWARD_AMOUNT;

/// Maximum number of questions in one challenge.
pub const MAX_CHALLENGE_QUESTIONS: usize = 50;

/// One question of a daily challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeQuestion {
    /// Question identifier, unique within the challenge.
    pub id: String,
    /// The question text.
    pub prompt: String,
    /// Offered choices (empty for free-text questions).
    #[serde(default)]
    pub options: Vec<String>,
    /// The accepted answer.
    pub correct_answer: String,
}

impl ChallengeQuestion {
    /// Whether `answer` is correct (trimmed, case-insensitive).
    #[must_use]
    pub fn accepts(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(self.correct_answer.trim())
    }
}

/// A question as shown to users, without the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicQuestion {
    /// Question identifier.
    pub id: String,
    /// The question text.
    pub prompt: String,
    /// Offered choices.
    pub options: Vec<String>,
}

/// A user's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeAnswer {
    /// The question answered.
    pub question_id: String,
    /// The submitted answer.
    pub answer: String,
}

/// The daily challenge published for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInstance {
    /// Challenge ID.
    pub id: ChallengeId,
    /// The day this challenge belongs to (unique).
    pub publish_date: NaiveDate,
    /// The questions.
    pub questions: Vec<ChallengeQuestion>,
    /// XP awarded for submitting the challenge.
    pub xp_reward: i64,
    /// When the challenge was published.
    pub created_at: DateTime<Utc>,
}

impl ChallengeInstance {
    /// Create a new challenge for `publish_date`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidChallenge` if the definition is invalid.
    pub fn new(
        publish_date: NaiveDate,
        questions: Vec<ChallengeQuestion>,
        xp_reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let challenge = Self {
            id: ChallengeId::generate(),
            publish_date,
            questions,
            xp_reward,
            created_at: now,
        };
        challenge.validate()?;
        Ok(challenge)
    }

    /// Check the challenge definition.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidChallenge` for a reward outside
    /// `1..=MAX_AWARD_AMOUNT`, no or too many questions, or duplicate
    /// question ids.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_AWARD_AMOUNT).contains(&self.xp_reward) {
            return Err(LedgerError::InvalidChallenge(format!(
                "xp_reward must be 1..={MAX_AWARD_AMOUNT}"
            )));
        }
        if self.questions.is_empty() || self.questions.len() > MAX_CHALLENGE_QUESTIONS {
            return Err(LedgerError::InvalidChallenge(format!(
                "a challenge needs 1..={MAX_CHALLENGE_QUESTIONS} questions"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.questions.iter().find(|q| !seen.insert(q.id.as_str())) {
            return Err(LedgerError::InvalidChallenge(format!(
                "duplicate question id: {}",
                dup.id
            )));
        }
        Ok(())
    }

    /// The questions without their answers.
    #[must_use]
    pub fn public_questions(&self) -> Vec<PublicQuestion> {
        self.questions
            .iter()
            .map(|q| PublicQuestion {
                id: q.id.clone(),
                prompt: q.prompt.clone(),
                options: q.options.clone(),
            })
            .collect()
    }

    /// Score a submission.
    ///
    /// Each question counts at most once (the first answer given for it);
    /// answers to unknown questions are ignored.
    #[must_use]
    pub fn score(&self, answers: &[ChallengeAnswer]) -> Score {
        let mut by_question: HashMap<&str, &str> = HashMap::new();
        for answer in answers {
            by_question
                .entry(answer.question_id.as_str())
                .or_insert(answer.answer.as_str());
        }

        let correct = self
            .questions
            .iter()
            .filter(|q| by_question.get(q.id.as_str()).is_some_and(|a| q.accepts(a)))
            .count();

        Score::new(
            u32::try_from(correct).unwrap_or(u32::MAX),
            u32::try_from(self.questions.len()).unwrap_or(u32::MAX),
        )
    }
}

/// A scored submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Number of correct answers.
    pub score: u32,
    /// Number of questions.
    pub max_score: u32,
    /// `score / max_score * 100`, or 0 when there are no questions.
    pub percentage: f64,
}

impl Score {
    /// Build a score and its percentage.
    #[must_use]
    pub fn new(score: u32, max_score: u32) -> Self {
        let percentage = if max_score == 0 {
            0.0
        } else {
            f64::from(score) / f64::from(max_score) * 100.0
        };
        Self {
            score,
            max_score,
            percentage,
        }
    }
}

/// A stored challenge submission. Exactly one may exist per user and challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeAttempt {
    /// The user (internal key).
    pub user_id: InternalUserId,
    /// The user (public key), denormalized.
    pub public_user_id: PublicUserId,
    /// The challenge attempted.
    pub challenge_id: ChallengeId,
    /// Correct answers.
    pub score: u32,
    /// Number of questions.
    pub max_score: u32,
    /// Seconds the user reported spending.
    pub time_taken_secs: u32,
    /// The submitted answers.
    pub answers: Vec<ChallengeAnswer>,
    /// When the attempt was recorded.
    pub completed_at: DateTime<Utc>,
}

/// Everything needed to record a scored attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChallengeAttempt {
    /// The resolved user.
    pub identity: UserIdentity,
    /// The challenge attempted.
    pub challenge_id: ChallengeId,
    /// Correct answers.
    pub score: u32,
    /// Number of questions.
    pub max_score: u32,
    /// Seconds the user reported spending.
    pub time_taken_secs: u32,
    /// The submitted answers.
    pub answers: Vec<ChallengeAnswer>,
    /// When the attempt was made.
    pub completed_at: DateTime<Utc>,
}

impl NewChallengeAttempt {
    /// The row this attempt becomes.
    #[must_use]
    pub fn into_attempt(self) -> ChallengeAttempt {
        ChallengeAttempt {
            user_id: self.identity.internal,
            public_user_id: self.identity.public,
            challenge_id: self.challenge_id,
            score: self.score,
            max_score: self.max_score,
            time_taken_secs: self.time_taken_secs,
            answers: self.answers,
            completed_at: self.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, answer: &str) -> ChallengeQuestion {
        ChallengeQuestion {
            id: id.into(),
            prompt: format!("Question {id}?"),
            options: vec![],
            correct_answer: answer.into(),
        }
    }

    fn answer(id: &str, answer: &str) -> ChallengeAnswer {
        ChallengeAnswer {
            question_id: id.into(),
            answer: answer.into(),
        }
    }

    fn challenge() -> ChallengeInstance {
        ChallengeInstance::new(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            vec![
                question("q1", "Senate"),
                question("q2", "6"),
                question("q3", "B"),
                question("q4", "veto"),
            ],
            25,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn scores_correct_answers() {
        let score = challenge().score(&[
            answer("q1", " senate "),
            answer("q2", "6"),
            answer("q3", "C"),
        ]);
        assert_eq!(score.score, 2);
        assert_eq!(score.max_score, 4);
        assert!((score.percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn repeated_answers_count_once() {
        let score = challenge().score(&[
            answer("q3", "A"),
            answer("q3", "B"),
            answer("q9", "whatever"),
        ]);
        assert_eq!(score.score, 0);
    }

    #[test]
    fn zero_questions_score_zero_percent() {
        assert!(Score::new(0, 0).percentage.abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_invalid_definitions() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(ChallengeInstance::new(date, vec![question("q1", "a")], 0, Utc::now()).is_err());
        assert!(ChallengeInstance::new(
            date,
            vec![question("q1", "a")],
            MAX_AWARD_AMOUNT + 1,
            Utc::now()
        )
        .is_err());
        assert!(ChallengeInstance::new(date, vec![], 10, Utc::now()).is_err());
        assert!(ChallengeInstance::new(
            date,
            vec![question("q1", "a"), question("q1", "b")],
            10,
            Utc::now()
        )
        .is_err());
    }

    #[test]
    fn public_questions_hide_answers() {
        let json = serde_json::to_value(challenge().public_questions()).unwrap();
        assert!(json[0].get("correct_answer").is_none());
        assert_eq!(json[0]["id"], "q1");
    }
}
