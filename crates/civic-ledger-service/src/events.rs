//! Collaborator event translation.
//!
//! Learning and community services report what users did; each event maps to
//! one award (or one achievement) with a natural idempotency key, so
//! redelivered events are harmless.

use serde::{Deserialize, Serialize};

use civic_ledger_core::{
    EntryId, LedgerError, NewAward, PointSchedule, Result, SourceType, UserKey,
};

use crate::ledger::Ledger;

/// An activity reported by a collaborator service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorEvent {
    /// The acting user, by either key.
    pub user: UserKey,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The kinds of activity the ledger credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A lesson was completed.
    LessonCompleted {
        /// The lesson.
        lesson_id: String,
        /// XP the lesson grants.
        xp_reward: i64,
    },
    /// A quiz was passed.
    QuizPassed {
        /// The quiz.
        quiz_id: String,
        /// XP the quiz grants.
        xp_reward: i64,
    },
    /// A module was completed.
    ModuleCompleted {
        /// The module.
        module_id: String,
        /// XP the module grants.
        xp_reward: i64,
    },
    /// A discussion post was created.
    PostCreated {
        /// The post.
        post_id: String,
    },
    /// A reply was posted.
    ReplyPosted {
        /// The reply.
        reply_id: String,
    },
    /// A like was given.
    LikeGiven {
        /// The like.
        like_id: String,
    },
    /// An achievement was earned.
    AchievementEarned {
        /// The achievement.
        achievement_id: String,
    },
}

impl EventKind {
    /// The event's wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LessonCompleted { .. } => "lesson_completed",
            Self::QuizPassed { .. } => "quiz_passed",
            Self::ModuleCompleted { .. } => "module_completed",
            Self::PostCreated { .. } => "post_created",
            Self::ReplyPosted { .. } => "reply_posted",
            Self::LikeGiven { .. } => "like_given",
            Self::AchievementEarned { .. } => "achievement_earned",
        }
    }

    /// What this event credits.
    #[must_use]
    pub fn credit(&self, points: &PointSchedule) -> EventCredit {
        let (source, reference, amount) = match self {
            Self::LessonCompleted {
                lesson_id,
                xp_reward,
            } => (SourceType::Lesson, lesson_id, *xp_reward),
            Self::QuizPassed { quiz_id, xp_reward } => (SourceType::Quiz, quiz_id, *xp_reward),
            Self::ModuleCompleted {
                module_id,
                xp_reward,
            } => (SourceType::Module, module_id, *xp_reward),
            Self::PostCreated { post_id } => {
                (SourceType::DiscussionPost, post_id, points.discussion_post)
            }
            Self::ReplyPosted { reply_id } => {
                (SourceType::DiscussionReply, reply_id, points.discussion_reply)
            }
            Self::LikeGiven { like_id } => (SourceType::Like, like_id, points.like),
            Self::AchievementEarned { achievement_id } => {
                return EventCredit::Achievement(achievement_id.clone())
            }
        };
        EventCredit::Award(NewAward::new(source, reference.clone(), amount))
    }
}

/// What an event credits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCredit {
    /// An XP award.
    Award(NewAward),
    /// An achievement, by id.
    Achievement(String),
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    /// The event's wire name.
    pub event_type: &'static str,
    /// `false` for a redelivered event.
    pub accepted: bool,
    /// The award entry, for award events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
    /// The user's total after the event, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_xp: Option<i64>,
}

/// Applies collaborator events to the ledger.
#[derive(Clone, Copy)]
pub struct EventProcessor<'a> {
    ledger: Ledger<'a>,
    points: PointSchedule,
}

impl<'a> EventProcessor<'a> {
    /// Create a processor crediting discussion activity per `points`.
    #[must_use]
    pub fn new(ledger: Ledger<'a>, points: PointSchedule) -> Self {
        Self { ledger, points }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// - `LedgerError::UnknownUser` if the user cannot be resolved.
    /// - `LedgerError::InvalidAmount` / `InvalidReference` for a malformed event.
    pub async fn process(&self, event: &CollaboratorEvent) -> Result<EventOutcome> {
        let event_type = event.kind.as_str();

        match event.kind.credit(&self.points) {
            EventCredit::Award(award) => {
                let outcome = self.ledger.award(event.user, &award).await?;
                Ok(EventOutcome {
                    event_type,
                    accepted: outcome.accepted,
                    entry_id: Some(outcome.entry_id),
                    total_xp: outcome.progress.map(|progress| progress.total_xp),
                })
            }
            EventCredit::Achievement(achievement_id) => {
                if achievement_id.trim().is_empty() {
                    return Err(LedgerError::InvalidReference(
                        "achievement_id must not be empty".into(),
                    ));
                }
                let identity = self.ledger.resolver().resolve(event.user).await?;
                let accepted = self
                    .ledger
                    .record_achievement(identity, &achievement_id)
                    .await?;
                Ok(EventOutcome {
                    event_type,
                    accepted,
                    entry_id: None,
                    total_xp: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use civic_ledger_core::{LevelCurve, ManualClock, PublicUserId};
    use civic_ledger_store::{MemoryStore, Store};

    use super::*;

    #[test]
    fn parses_wire_events() {
        let user = PublicUserId::generate();
        let event: CollaboratorEvent = serde_json::from_value(serde_json::json!({
            "type": "lesson_completed",
            "user": user.to_string(),
            "lesson_id": "civics-101",
            "xp_reward": 20
        }))
        .unwrap();

        assert_eq!(event.user, UserKey::Public(user));
        assert_eq!(
            event.kind,
            EventKind::LessonCompleted {
                lesson_id: "civics-101".into(),
                xp_reward: 20
            }
        );

        let by_internal: CollaboratorEvent = serde_json::from_value(serde_json::json!({
            "type": "like_given",
            "user": "17",
            "like_id": "like-9"
        }))
        .unwrap();
        assert!(matches!(by_internal.user, UserKey::Internal(id) if id.get() == 17));
    }

    #[test]
    fn discussion_events_use_the_schedule() {
        let points = PointSchedule {
            discussion_post: 12,
            discussion_reply: 6,
            like: 2,
        };

        let EventCredit::Award(post) = EventKind::PostCreated {
            post_id: "p-1".into(),
        }
        .credit(&points) else {
            panic!("posts credit XP");
        };
        assert_eq!(post.source_type, SourceType::DiscussionPost);
        assert_eq!(post.reference_id, "p-1");
        assert_eq!(post.amount, 12);

        let like = EventKind::LikeGiven {
            like_id: "k-1".into(),
        }
        .credit(&points);
        assert!(matches!(like, EventCredit::Award(award) if award.amount == 2));

        assert_eq!(
            EventKind::AchievementEarned {
                achievement_id: "first-post".into()
            }
            .credit(&points),
            EventCredit::Achievement("first-post".into())
        );
    }

    #[tokio::test]
    async fn redelivered_events_are_not_credited_twice() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 4, 10, 0, 0).unwrap());
        let curve = LevelCurve::default();
        let processor = EventProcessor::new(Ledger::new(&store, &clock, &curve), PointSchedule::default());
        let who = store
            .register_user(PublicUserId::generate(), Utc::now())
            .await
            .unwrap();
        let event = CollaboratorEvent {
            user: who.public.into(),
            kind: EventKind::QuizPassed {
                quiz_id: "q-7".into(),
                xp_reward: 30,
            },
        };

        let first = processor.process(&event).await.unwrap();
        let second = processor.process(&event).await.unwrap();
        assert!(first.accepted);
        assert_eq!(first.total_xp, Some(30));
        assert!(!second.accepted);
        assert_eq!(first.entry_id, second.entry_id);

        let achievement = CollaboratorEvent {
            user: who.internal.into(),
            kind: EventKind::AchievementEarned {
                achievement_id: "quiz-master".into(),
            },
        };
        assert!(processor.process(&achievement).await.unwrap().accepted);
        assert!(!processor.process(&achievement).await.unwrap().accepted);
        let progress = store.get_progress(who.internal).await.unwrap().unwrap();
        assert_eq!(progress.achievements_earned, 1);
        assert_eq!(progress.total_xp, 30);
    }
}
