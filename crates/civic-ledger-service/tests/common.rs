//! Common test utilities for civic-ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use civic_ledger_core::{Clock, InternalUserId, ManualClock, PublicUserId, UserIdentity};
use civic_ledger_service::auth::JwtClaims;
use civic_ledger_service::{create_router, AppState, ServiceConfig};
use civic_ledger_store::MemoryStore;

/// Issuer and audience the test tokens carry.
pub const TEST_ISSUER: &str = "http://auth.test";
pub const TEST_AUDIENCE: &str = "civic-ledger";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for assertions that bypass the API.
    pub store: Arc<MemoryStore>,
    /// The service clock.
    pub clock: Arc<ManualClock>,
    /// The service API key for collaborator requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
    /// Secret user tokens are signed with.
    pub jwt_secret: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();
        let jwt_secret = "test-jwt-secret".to_string();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_base_url: TEST_ISSUER.into(),
            auth_audience: TEST_AUDIENCE.into(),
            auth_jwt_secret: Some(jwt_secret.clone()),
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            leaderboard_cache_ttl_seconds: 0,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let state = AppState::with_clock(store.clone(), config, clock.clone());
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            clock,
            service_api_key,
            admin_api_key,
            jwt_secret,
        }
    }

    /// Current service time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Move the service clock forward by whole days.
    pub fn advance_days(&self, days: i64) {
        self.clock.advance(Duration::days(days));
    }

    /// Register a new user through the API.
    pub async fn register_user(&self) -> UserIdentity {
        let response = self
            .server
            .post("/v1/users")
            .add_header("x-api-key", self.service_api_key.as_str())
            .json(&json!({}))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        UserIdentity {
            internal: InternalUserId::new(body["user_id"].as_i64().unwrap()),
            public: body["public_id"].as_str().unwrap().parse::<PublicUserId>().unwrap(),
        }
    }

    /// Credit XP through the award endpoint and return the response body.
    pub async fn award(&self, user: impl ToString, source_type: &str, reference_id: &str, amount: i64) -> Value {
        let response = self
            .server
            .post("/v1/awards")
            .add_header("x-api-key", self.service_api_key.as_str())
            .json(&json!({
                "user": user.to_string(),
                "source_type": source_type,
                "reference_id": reference_id,
                "amount": amount
            }))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// A user's progress body.
    pub async fn progress(&self, user: impl ToString) -> Value {
        let response = self
            .server
            .get(&format!("/v1/users/{}/progress", user.to_string()))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// A user's streak body.
    pub async fn streak(&self, user: impl ToString) -> Value {
        let response = self
            .server
            .get(&format!("/v1/users/{}/streak", user.to_string()))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Authorization header carrying a signed token for `user`.
    pub fn user_auth_header(&self, user: &UserIdentity) -> String {
        self.auth_header_for(&user.public.to_string())
    }

    /// Authorization header for an arbitrary subject.
    pub fn auth_header_for(&self, subject: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            sub: subject.to_string(),
            aud: Some(json!(TEST_AUDIENCE)),
            iss: TEST_ISSUER.to_string(),
            exp: now + 3600,
            iat: now,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .expect("Failed to sign test token");
        format!("Bearer {token}")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Mid-morning UTC, so a few hours either way stay on the same day.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}
