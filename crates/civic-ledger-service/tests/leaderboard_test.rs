//! Integration tests for leaderboards.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::Value;

async fn leaderboard(harness: &TestHarness, params: &[(&str, String)]) -> Value {
    let mut request = harness.server.get("/v1/leaderboard");
    for (key, value) in params {
        request = request.add_query_param(key, value);
    }
    let response = request.await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn test_ties_share_a_rank() {
    let harness = TestHarness::new();
    let alice = harness.register_user().await;
    let bob = harness.register_user().await;
    let carol = harness.register_user().await;
    harness.award(alice.public, "lesson", "l-1", 100).await;
    harness.award(bob.public, "quiz", "q-1", 100).await;
    harness.award(carol.public, "module", "m-1", 50).await;

    let board = leaderboard(&harness, &[]).await;

    assert_eq!(board["window"], "all_time");
    assert!(board["since"].is_null());
    let ranks: Vec<(u64, i64)> = board["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| (e["rank"].as_u64().unwrap(), e["total_xp"].as_i64().unwrap()))
        .collect();
    assert_eq!(ranks, vec![(1, 100), (1, 100), (3, 50)]);
    assert_eq!(board["entries"][2]["user_id"], carol.public.to_string());
}

#[tokio::test]
async fn test_entries_expose_only_public_ids() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    harness.award(user.internal, "lesson", "l-1", 10).await;

    let board = leaderboard(&harness, &[]).await;

    let entry = &board["entries"][0];
    assert_eq!(entry["user_id"], user.public.to_string());
    assert_eq!(entry.as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn test_my_rank_beyond_limit() {
    let harness = TestHarness::new();
    let mut users = Vec::new();
    for amount in [300, 200, 100] {
        let user = harness.register_user().await;
        harness.award(user.public, "lesson", "l-1", amount).await;
        users.push(user);
    }

    let board = leaderboard(
        &harness,
        &[("limit", "1".into()), ("user", users[2].public.to_string())],
    )
    .await;

    assert_eq!(board["entries"].as_array().unwrap().len(), 1);
    assert_eq!(board["my_rank"]["rank"], 3);
    assert_eq!(board["my_rank"]["total_xp"], 100);
}

#[tokio::test]
async fn test_reversals_count_against_the_window() {
    let harness = TestHarness::new();
    let alice = harness.register_user().await;
    let bob = harness.register_user().await;
    let award = harness.award(alice.public, "lesson", "l-1", 100).await;
    harness.award(bob.public, "lesson", "l-1", 60).await;

    harness
        .server
        .post(&format!(
            "/v1/admin/entries/{}/reverse",
            award["entry_id"].as_str().unwrap()
        ))
        .add_header("x-admin-key", harness.admin_api_key.as_str())
        .json(&serde_json::json!({ "reason": "plagiarism" }))
        .await
        .assert_status_ok();

    let board = leaderboard(&harness, &[("user", alice.internal.to_string())]).await;
    assert_eq!(board["entries"][0]["user_id"], bob.public.to_string());
    assert_eq!(board["my_rank"]["rank"], 2);
    assert_eq!(board["my_rank"]["total_xp"], 0);
}

#[tokio::test]
async fn test_weekly_window_is_rolling() {
    let harness = TestHarness::new();
    let veteran = harness.register_user().await;
    let newcomer = harness.register_user().await;
    harness.award(veteran.public, "module", "m-1", 500).await;

    harness.advance_days(10);
    harness.award(newcomer.public, "lesson", "l-1", 20).await;

    let weekly = leaderboard(
        &harness,
        &[("window", "weekly".into()), ("user", veteran.public.to_string())],
    )
    .await;
    let entries = weekly["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["user_id"], newcomer.public.to_string());
    assert!(weekly.get("my_rank").is_none());
    assert!(weekly["since"].is_string());

    let monthly = leaderboard(&harness, &[("window", "monthly".into())]).await;
    assert_eq!(monthly["entries"][0]["user_id"], veteran.public.to_string());
    assert_eq!(monthly["entries"][1]["rank"], 2);
}

#[tokio::test]
async fn test_unknown_window_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/leaderboard")
        .add_query_param("window", "yearly")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let harness = TestHarness::with_config(|config| config.leaderboard_max_limit = 2);
    for amount in [30, 20, 10] {
        let user = harness.register_user().await;
        harness.award(user.public, "lesson", "l-1", amount).await;
    }

    let board = leaderboard(&harness, &[("limit", "50".into())]).await;

    assert_eq!(board["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cached_board_still_reports_fresh_my_rank() {
    let harness = TestHarness::with_config(|config| config.leaderboard_cache_ttl_seconds = 300);
    let alice = harness.register_user().await;
    let bob = harness.register_user().await;
    harness.award(alice.public, "lesson", "l-1", 50).await;
    harness.award(bob.public, "lesson", "l-1", 40).await;
    let first = leaderboard(&harness, &[("user", bob.public.to_string())]).await;
    assert_eq!(first["my_rank"]["rank"], 2);

    harness.award(bob.public, "quiz", "q-1", 40).await;
    let second = leaderboard(&harness, &[("user", bob.public.to_string())]).await;

    assert_eq!(second["generated_at"], first["generated_at"]);
    assert_eq!(second["my_rank"]["rank"], 1);
    assert_eq!(second["my_rank"]["total_xp"], 80);
}
