//! Integration tests for daily streaks.

mod common;

use chrono::Duration;
use common::TestHarness;

/// Award one lesson on each given day offset from the harness start.
async fn active_on(harness: &TestHarness, user: &civic_ledger_core::UserIdentity, days: &[i64]) {
    let start = common::start_time();
    for day in days {
        harness.clock.set(start + Duration::days(*day));
        harness
            .award(user.public, "lesson", &format!("lesson-day-{day}"), 10)
            .await;
    }
}

#[tokio::test]
async fn test_consecutive_days_extend_streak() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    active_on(&harness, &user, &[0, 1, 2]).await;

    let streak = harness.streak(user.public).await;
    assert_eq!(streak["current_streak"], 3);
    assert_eq!(streak["longest_streak"], 3);
    assert_eq!(streak["last_activity_date"], "2024-05-03");
    assert_eq!(streak["active"], true);
}

#[tokio::test]
async fn test_gap_resets_streak_but_keeps_longest() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    active_on(&harness, &user, &[0, 1, 2, 5]).await;

    let streak = harness.streak(user.public).await;
    assert_eq!(streak["current_streak"], 1);
    assert_eq!(streak["longest_streak"], 3);
}

#[tokio::test]
async fn test_single_missed_day_breaks_streak() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    active_on(&harness, &user, &[0, 2]).await;

    let streak = harness.streak(user.public).await;
    assert_eq!(streak["current_streak"], 1);
    assert_eq!(streak["longest_streak"], 1);
}

#[tokio::test]
async fn test_same_day_activity_counts_once() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    harness.award(user.public, "lesson", "morning", 10).await;
    harness.clock.advance(Duration::hours(6));
    harness.award(user.public, "quiz", "afternoon", 10).await;

    let streak = harness.streak(user.public).await;
    assert_eq!(streak["current_streak"], 1);
}

#[tokio::test]
async fn test_streak_lapses_without_activity() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    active_on(&harness, &user, &[0, 1]).await;

    harness.advance_days(1);
    let yesterday = harness.streak(user.public).await;
    assert_eq!(yesterday["active"], true);

    harness.advance_days(1);
    let lapsed = harness.streak(user.public).await;
    assert_eq!(lapsed["active"], false);
    assert_eq!(lapsed["current_streak"], 2);
}

#[tokio::test]
async fn test_duplicate_award_does_not_touch_streak() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    harness.award(user.public, "lesson", "l-1", 10).await;

    harness.advance_days(1);
    let duplicate = harness.award(user.public, "lesson", "l-1", 10).await;

    assert_eq!(duplicate["accepted"], false);
    let streak = harness.streak(user.public).await;
    assert_eq!(streak["current_streak"], 1);
    assert_eq!(streak["last_activity_date"], "2024-05-01");
}

#[tokio::test]
async fn test_user_without_activity_has_no_streak() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    let streak = harness.streak(user.internal).await;

    assert_eq!(streak["current_streak"], 0);
    assert_eq!(streak["longest_streak"], 0);
    assert!(streak["last_activity_date"].is_null());
    assert_eq!(streak["active"], false);
}
