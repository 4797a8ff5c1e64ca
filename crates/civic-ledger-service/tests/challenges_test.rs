//! Integration tests for daily challenges.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::TestHarness;
use serde_json::{json, Value};

fn questions() -> Value {
    json!([
        {
            "id": "q1",
            "prompt": "How many senators does each state elect?",
            "options": ["1", "2", "4"],
            "correct_answer": "2"
        },
        {
            "id": "q2",
            "prompt": "Which body confirms federal judges?",
            "options": ["House", "Senate"],
            "correct_answer": "Senate"
        },
        {
            "id": "q3",
            "prompt": "How long is a representative's term, in years?",
            "correct_answer": "2"
        },
        {
            "id": "q4",
            "prompt": "Who presides over the Senate?",
            "correct_answer": "Vice President"
        }
    ])
}

async fn publish(harness: &TestHarness, date: &str, xp_reward: i64) -> axum_test::TestResponse {
    harness
        .server
        .post("/v1/admin/challenges")
        .add_header("x-admin-key", harness.admin_api_key.as_str())
        .json(&json!({
            "publish_date": date,
            "questions": questions(),
            "xp_reward": xp_reward
        }))
        .await
}

async fn submit(
    harness: &TestHarness,
    user: &civic_ledger_core::UserIdentity,
    challenge_id: &str,
    answers: Value,
) -> axum_test::TestResponse {
    harness
        .server
        .post(&format!("/v1/challenges/{challenge_id}/attempt"))
        .add_header("authorization", harness.user_auth_header(user))
        .json(&json!({ "answers": answers, "time_taken_secs": 42 }))
        .await
}

fn three_of_four() -> Value {
    json!([
        { "question_id": "q1", "answer": "2" },
        { "question_id": "q2", "answer": "senate" },
        { "question_id": "q3", "answer": "2" },
        { "question_id": "q4", "answer": "Speaker" }
    ])
}

#[tokio::test]
async fn test_today_hides_answers() {
    let harness = TestHarness::new();
    publish(&harness, "2024-05-01", 50).await.assert_status_ok();

    let response = harness.server.get("/v1/challenges/today").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["publish_date"], "2024-05-01");
    assert_eq!(body["xp_reward"], 50);
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 4);
    assert!(questions.iter().all(|q| q.get("correct_answer").is_none()));
    assert!(body.get("attempted").is_none());
}

#[tokio::test]
async fn test_no_challenge_today_is_not_found() {
    let harness = TestHarness::new();
    publish(&harness, "2024-05-02", 50).await.assert_status_ok();

    let response = harness.server.get("/v1/challenges/today").await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_publishing_a_day_twice_keeps_the_first() {
    let harness = TestHarness::new();
    let first: Value = publish(&harness, "2024-05-01", 50).await.json();
    let second: Value = publish(&harness, "2024-05-01", 80).await.json();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["xp_reward"], 50);
}

#[tokio::test]
async fn test_invalid_challenge_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/admin/challenges")
        .add_header("x-admin-key", harness.admin_api_key.as_str())
        .json(&json!({ "publish_date": "2024-05-01", "questions": [], "xp_reward": 50 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_challenge");
}

#[tokio::test]
async fn test_attempt_scores_and_awards_xp() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    let challenge: Value = publish(&harness, "2024-05-01", 50).await.json();

    let response = submit(&harness, &user, challenge["id"].as_str().unwrap(), three_of_four()).await;

    response.assert_status_ok();
    let result: Value = response.json();
    assert_eq!(result["score"], 3);
    assert_eq!(result["max_score"], 4);
    assert_eq!(result["percentage"], 75.0);
    assert_eq!(result["xp_earned"], 50);
    assert_eq!(result["new_streak"], 1);

    let progress = harness.progress(user.public).await;
    assert_eq!(progress["total_xp"], 50);

    let today: Value = harness
        .server
        .get("/v1/challenges/today")
        .add_query_param("user", user.internal.to_string())
        .await
        .json();
    assert_eq!(today["attempted"], true);
}

#[tokio::test]
async fn test_second_attempt_is_rejected() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    let challenge: Value = publish(&harness, "2024-05-01", 50).await.json();
    let challenge_id = challenge["id"].as_str().unwrap();

    submit(&harness, &user, challenge_id, three_of_four())
        .await
        .assert_status_ok();
    let again = submit(&harness, &user, challenge_id, json!([])).await;

    again.assert_status(StatusCode::CONFLICT);
    let body: Value = again.json();
    assert_eq!(body["error"]["code"], "already_attempted");

    let progress = harness.progress(user.public).await;
    assert_eq!(progress["total_xp"], 50);
}

#[tokio::test]
async fn test_concurrent_attempts_record_one() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    let challenge: Value = publish(&harness, "2024-05-01", 50).await.json();
    let challenge_id = challenge["id"].as_str().unwrap();

    let (a, b) = tokio::join!(
        submit(&harness, &user, challenge_id, three_of_four()),
        submit(&harness, &user, challenge_id, three_of_four()),
    );

    let mut statuses = [a.status_code(), b.status_code()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    let progress = harness.progress(user.public).await;
    assert_eq!(progress["total_xp"], 50);
}

#[tokio::test]
async fn test_future_challenge_is_not_open() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    let challenge: Value = publish(&harness, "2024-05-03", 50).await.json();

    let response = submit(&harness, &user, challenge["id"].as_str().unwrap(), three_of_four()).await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "challenge_not_open");

    harness.clock.advance(Duration::days(2));
    submit(&harness, &user, challenge["id"].as_str().unwrap(), three_of_four())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_unknown_challenge_is_not_found() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    let response = submit(
        &harness,
        &user,
        "6f1c2a7e-3b4d-4e5f-8a9b-0c1d2e3f4a5b",
        three_of_four(),
    )
    .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "challenge_not_found");
}

#[tokio::test]
async fn test_attempt_requires_valid_token() {
    let harness = TestHarness::new();
    let challenge: Value = publish(&harness, "2024-05-01", 50).await.json();
    let path = format!("/v1/challenges/{}/attempt", challenge["id"].as_str().unwrap());
    let body = json!({ "answers": [] });

    let missing = harness.server.post(&path).json(&body).await;
    missing.assert_status(StatusCode::UNAUTHORIZED);

    let forged = harness
        .server
        .post(&path)
        .add_header("authorization", "Bearer not.a.token")
        .json(&body)
        .await;
    forged.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_attempt_by_unregistered_subject_is_unknown_user() {
    let harness = TestHarness::new();
    let challenge: Value = publish(&harness, "2024-05-01", 50).await.json();

    let response = harness
        .server
        .post(&format!("/v1/challenges/{}/attempt", challenge["id"].as_str().unwrap()))
        .add_header(
            "authorization",
            harness.auth_header_for("0b7e5a8c-1d2f-4a3b-9c8d-7e6f5a4b3c2d"),
        )
        .json(&json!({ "answers": [] }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unknown_user");
}
