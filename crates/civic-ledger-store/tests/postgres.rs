//! PostgreSQL backend tests.
//!
//! These need a live database and are ignored by default:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/civic_ledger_test cargo test -p civic-ledger-store -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use civic_ledger_core::{LedgerEntry, LevelCurve, NewAward, PublicUserId, SourceType, UserKey};
use civic_ledger_store::{PgStore, Store, StoreError};

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&url, 10).await.unwrap();
    store.migrate().await.unwrap();
    store
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn register_and_resolve() {
    let store = store().await;
    let public = PublicUserId::generate();
    let identity = store.register_user(public, Utc::now()).await.unwrap();
    let again = store.register_user(public, Utc::now()).await.unwrap();
    assert_eq!(identity, again);

    let resolved = store
        .resolve_user(UserKey::Internal(identity.internal))
        .await
        .unwrap();
    assert_eq!(resolved, Some(identity));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_duplicate_awards_credit_once() {
    let store = Arc::new(store().await);
    let who = store
        .register_user(PublicUserId::generate(), Utc::now())
        .await
        .unwrap();

    let tasks = (0..8).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let entry = LedgerEntry::award(
                who,
                &NewAward::new(SourceType::Lesson, "lesson-concurrent", 20),
                Utc::now(),
            );
            store.record_award(&entry, &LevelCurve::default()).await
        })
    });
    let outcomes = futures::future::join_all(tasks).await;
    let accepted = outcomes
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|outcome| outcome.accepted)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(store.sum_for(who.internal, None, None).await.unwrap(), 20);
    let progress = store.get_progress(who.internal).await.unwrap().unwrap();
    assert_eq!(progress.total_xp, 20);
    assert_eq!(progress.lessons_completed, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn reversal_is_single_use() {
    let store = store().await;
    let curve = LevelCurve::default();
    let who = store
        .register_user(PublicUserId::generate(), Utc::now())
        .await
        .unwrap();
    let entry = LedgerEntry::award(who, &NewAward::new(SourceType::Quiz, "quiz-1", 30), Utc::now());
    store.record_award(&entry, &curve).await.unwrap();

    store
        .record_reversal(entry.id, "moderation", Utc::now(), &curve)
        .await
        .unwrap();
    let again = store
        .record_reversal(entry.id, "moderation", Utc::now(), &curve)
        .await;
    assert!(matches!(again, Err(StoreError::AlreadyReversed { .. })));
    assert_eq!(store.sum_for(who.internal, None, None).await.unwrap(), 0);
}
