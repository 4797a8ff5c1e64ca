//! Integration tests for collaborator event ingestion.

mod common;

use axum::body::Bytes;
use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

use civic_ledger_service::crypto::hmac_sha256_hex;

const SIGNING_SECRET: &str = "whsec_test";

async fn post_event(harness: &TestHarness, event: &Value) -> axum_test::TestResponse {
    harness
        .server
        .post("/v1/events")
        .add_header("x-api-key", harness.service_api_key.as_str())
        .add_header("x-service-name", "learning")
        .json(event)
        .await
}

#[tokio::test]
async fn test_learning_events_credit_their_reward() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    let events = [
        json!({ "type": "lesson_completed", "user": user.public.to_string(), "lesson_id": "l-1", "xp_reward": 20 }),
        json!({ "type": "quiz_passed", "user": user.public.to_string(), "quiz_id": "q-1", "xp_reward": 30 }),
        json!({ "type": "module_completed", "user": user.internal.to_string(), "module_id": "m-1", "xp_reward": 100 }),
    ];
    for event in &events {
        let response = post_event(&harness, event).await;
        response.assert_status_ok();
        let outcome: Value = response.json();
        assert_eq!(outcome["accepted"], true);
        assert_eq!(outcome["event_type"], event["type"]);
    }

    let progress = harness.progress(user.public).await;
    assert_eq!(progress["total_xp"], 150);
    assert_eq!(progress["lessons_completed"], 1);
    assert_eq!(progress["quizzes_passed"], 1);
    assert_eq!(progress["modules_completed"], 1);
}

#[tokio::test]
async fn test_community_events_use_point_schedule() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    for event in [
        json!({ "type": "post_created", "user": user.public.to_string(), "post_id": "p-1" }),
        json!({ "type": "reply_posted", "user": user.public.to_string(), "reply_id": "r-1" }),
        json!({ "type": "like_given", "user": user.public.to_string(), "like_id": "k-1" }),
    ] {
        post_event(&harness, &event).await.assert_status_ok();
    }

    let progress = harness.progress(user.public).await;
    assert_eq!(progress["total_xp"], 16);
}

#[tokio::test]
async fn test_redelivered_event_is_not_credited() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    let event = json!({ "type": "lesson_completed", "user": user.public.to_string(), "lesson_id": "l-1", "xp_reward": 20 });

    let first: Value = post_event(&harness, &event).await.json();
    let second: Value = post_event(&harness, &event).await.json();

    assert_eq!(first["accepted"], true);
    assert_eq!(first["total_xp"], 20);
    assert_eq!(second["accepted"], false);
    assert_eq!(second["entry_id"], first["entry_id"]);
}

#[tokio::test]
async fn test_achievement_event_counts_once() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;
    let event = json!({ "type": "achievement_earned", "user": user.public.to_string(), "achievement_id": "first-lesson" });

    let first: Value = post_event(&harness, &event).await.json();
    let second: Value = post_event(&harness, &event).await.json();

    assert_eq!(first["accepted"], true);
    assert_eq!(second["accepted"], false);
    assert!(first.get("entry_id").is_none());
    let progress = harness.progress(user.public).await;
    assert_eq!(progress["achievements_earned"], 1);
    assert_eq!(progress["total_xp"], 0);
}

#[tokio::test]
async fn test_malformed_event_is_bad_request() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    let unknown_type = post_event(
        &harness,
        &json!({ "type": "video_watched", "user": user.public.to_string() }),
    )
    .await;
    unknown_type.assert_status(StatusCode::BAD_REQUEST);

    let bad_reward = post_event(
        &harness,
        &json!({ "type": "quiz_passed", "user": user.public.to_string(), "quiz_id": "q-1", "xp_reward": 0 }),
    )
    .await;
    bad_reward.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = bad_reward.json();
    assert_eq!(body["error"]["code"], "invalid_amount");
}

#[tokio::test]
async fn test_batch_reports_each_event() {
    let harness = TestHarness::new();
    let user = harness.register_user().await;

    let response = harness
        .server
        .post("/v1/events/batch")
        .add_header("x-api-key", harness.service_api_key.as_str())
        .json(&json!({
            "events": [
                { "type": "lesson_completed", "user": user.public.to_string(), "lesson_id": "l-1", "xp_reward": 20 },
                { "type": "lesson_completed", "user": "4242", "lesson_id": "l-1", "xp_reward": 20 },
                { "type": "nonsense" },
                { "type": "lesson_completed", "user": user.public.to_string(), "lesson_id": "l-1", "xp_reward": 20 }
            ]
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], 2);
    assert_eq!(body["failed"], 2);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[2]["success"], false);
    assert_eq!(results[3]["outcome"]["accepted"], false);

    let progress = harness.progress(user.public).await;
    assert_eq!(progress["total_xp"], 20);
}

#[tokio::test]
async fn test_events_require_service_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/events")
        .json(&json!({ "type": "like_given", "user": "1", "like_id": "k-1" }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_events() {
    let harness = TestHarness::with_config(|config| {
        config.event_signing_secret = Some(SIGNING_SECRET.into());
    });
    let user = harness.register_user().await;
    let body = json!({ "type": "like_given", "user": user.public.to_string(), "like_id": "k-1" }).to_string();
    let signature = hmac_sha256_hex(SIGNING_SECRET, body.as_bytes()).unwrap();

    let unsigned = harness
        .server
        .post("/v1/events")
        .add_header("x-api-key", harness.service_api_key.as_str())
        .bytes(Bytes::from(body.clone()))
        .await;
    unsigned.assert_status(StatusCode::UNAUTHORIZED);

    let tampered = harness
        .server
        .post("/v1/events")
        .add_header("x-api-key", harness.service_api_key.as_str())
        .add_header("x-signature", signature.clone())
        .bytes(Bytes::from(body.replace("k-1", "k-2")))
        .await;
    tampered.assert_status(StatusCode::UNAUTHORIZED);

    let signed = harness
        .server
        .post("/v1/events")
        .add_header("x-api-key", harness.service_api_key.as_str())
        .add_header("x-signature", signature.to_uppercase())
        .bytes(Bytes::from(body))
        .await;
    signed.assert_status_ok();
    let outcome: Value = signed.json();
    assert_eq!(outcome["accepted"], true);
}
