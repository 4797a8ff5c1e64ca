//! Request and response types for the civic-ledger client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use civic_ledger_core::{
    ChallengeAnswer, ChallengeId, EntryId, InternalUserId, PublicQuestion, PublicUserId,
    SourceType, UserKey,
};

pub use civic_ledger_core::{LeaderboardEntry, LeaderboardWindow, MyRank, RankedEntry};

/// Register user request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterUserRequest {
    /// Existing public identifier to register (generated when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_id: Option<PublicUserId>,
}

/// A user's key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UserResponse {
    /// Internal key.
    pub user_id: InternalUserId,
    /// Public key.
    pub public_id: PublicUserId,
}

/// Direct award request.
#[derive(Debug, Clone, Serialize)]
pub struct AwardRequest {
    /// The user, by either key.
    pub user: UserKey,
    /// What kind of action is credited.
    pub source_type: SourceType,
    /// The credited thing (idempotency key together with user and source type).
    pub reference_id: String,
    /// XP to credit.
    pub amount: i64,
    /// Optional note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Award response.
#[derive(Debug, Clone, Deserialize)]
pub struct AwardResponse {
    /// `false` when the award was already recorded.
    pub accepted: bool,
    /// The entry holding the award.
    pub entry_id: EntryId,
    /// Total XP after the award (accepted awards only).
    pub total_xp: Option<i64>,
    /// Level after the award (accepted awards only).
    pub level: Option<u32>,
    /// Streak after the award (accepted awards only).
    pub current_streak: Option<u32>,
}

/// A collaborator event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// The acting user, by either key.
    pub user: UserKey,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Create an event for `user`.
    #[must_use]
    pub fn new(user: impl Into<UserKey>, kind: EventKind) -> Self {
        Self {
            user: user.into(),
            kind,
        }
    }
}

/// Event variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A lesson was completed.
    LessonCompleted {
        /// Lesson ID.
        lesson_id: String,
        /// XP the lesson grants.
        xp_reward: i64,
    },
    /// A quiz was passed.
    QuizPassed {
        /// Quiz ID.
        quiz_id: String,
        /// XP the quiz grants.
        xp_reward: i64,
    },
    /// A module was completed.
    ModuleCompleted {
        /// Module ID.
        module_id: String,
        /// XP the module grants.
        xp_reward: i64,
    },
    /// A discussion post was created.
    PostCreated {
        /// Post ID.
        post_id: String,
    },
    /// A reply was posted.
    ReplyPosted {
        /// Reply ID.
        reply_id: String,
    },
    /// A like was given.
    LikeGiven {
        /// Like ID.
        like_id: String,
    },
    /// An achievement was earned.
    AchievementEarned {
        /// Achievement ID.
        achievement_id: String,
    },
}

/// Event response from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct EventOutcome {
    /// Event type as processed.
    pub event_type: String,
    /// `false` for a redelivered event.
    pub accepted: bool,
    /// The award entry, for XP events.
    pub entry_id: Option<EntryId>,
    /// Total XP after the event, when it changed.
    pub total_xp: Option<i64>,
}

/// Batch event request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEventRequest {
    /// List of events.
    pub events: Vec<Event>,
}

/// Batch event response.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEventResponse {
    /// Results for each event.
    pub results: Vec<BatchEventResult>,
    /// Total events processed.
    pub processed: usize,
    /// Total events failed.
    pub failed: usize,
}

/// Result for a single event in batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEventResult {
    /// Position in the request.
    pub index: usize,
    /// Whether successful.
    pub success: bool,
    /// The outcome (if successful).
    pub outcome: Option<EventOutcome>,
    /// Error message if failed.
    pub error: Option<String>,
}

/// A user's progress.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressResponse {
    /// The user (public key).
    pub user_id: PublicUserId,
    /// Total XP.
    pub total_xp: i64,
    /// Current level.
    pub level: u32,
    /// XP still needed for the next level (`None` at the top level).
    pub xp_to_next_level: Option<i64>,
    /// Modules completed.
    pub modules_completed: u32,
    /// Lessons completed.
    pub lessons_completed: u32,
    /// Quizzes passed.
    pub quizzes_passed: u32,
    /// Achievements earned.
    pub achievements_earned: u32,
    /// Level curve version the level was computed with.
    pub curve_version: u32,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

/// A user's streak.
#[derive(Debug, Clone, Deserialize)]
pub struct StreakResponse {
    /// The user (public key).
    pub user_id: PublicUserId,
    /// Consecutive active days.
    pub current_streak: u32,
    /// Best run.
    pub longest_streak: u32,
    /// Most recent active day.
    pub last_activity_date: Option<NaiveDate>,
    /// Whether the streak is still alive today.
    pub active: bool,
}

/// Today's challenge, without answers.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeResponse {
    /// Challenge ID.
    pub id: ChallengeId,
    /// The day the challenge is for.
    pub publish_date: NaiveDate,
    /// Questions.
    pub questions: Vec<PublicQuestion>,
    /// XP for submitting.
    pub xp_reward: i64,
    /// Whether the requesting user already submitted.
    pub attempted: Option<bool>,
}

/// Attempt submission.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRequest {
    /// One answer per question.
    pub answers: Vec<ChallengeAnswer>,
    /// Seconds spent.
    pub time_taken_secs: u32,
}

/// Attempt result.
#[derive(Debug, Clone, Deserialize)]
pub struct AttemptResponse {
    /// Correct answers.
    pub score: u32,
    /// Number of questions.
    pub max_score: u32,
    /// Percentage correct.
    pub percentage: f64,
    /// XP credited.
    pub xp_earned: i64,
    /// Streak after the attempt.
    pub new_streak: u32,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
