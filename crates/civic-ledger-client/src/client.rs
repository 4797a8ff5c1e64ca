//! Civic ledger HTTP client implementation.

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use sha2::Sha256;

use civic_ledger_core::{ChallengeAnswer, ChallengeId, LeaderboardEntry, LeaderboardWindow, UserKey};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, AttemptRequest, AttemptResponse, AwardRequest, AwardResponse,
    BatchEventRequest, BatchEventResponse, ChallengeResponse, Event, EventOutcome,
    ProgressResponse, RegisterUserRequest, StreakResponse, UserResponse,
};

/// Header carrying the hex HMAC-SHA256 of a signed event body.
const SIGNATURE_HEADER: &str = "x-signature";

/// Civic ledger API client.
///
/// Collaborator services use it to register users, credit XP and report
/// events; user-facing services use it to read progress, streaks,
/// leaderboards and challenges.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
    signing_secret: Option<String>,
}

impl LedgerClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the ledger service (e.g., `"http://civic-ledger:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
            signing_secret: options.signing_secret,
        })
    }

    /// Register a user, or look up the existing registration of `public_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn register_user(
        &self,
        request: RegisterUserRequest,
    ) -> Result<UserResponse, ClientError> {
        let url = format!("{}/v1/users", self.base_url);
        let response = self.service(self.client.post(&url)).json(&request).send().await?;
        self.handle_response(response).await
    }

    /// Resolve a user's key pair from either key.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnknownUser` if no user matches.
    pub async fn get_user(&self, user: impl Into<UserKey>) -> Result<UserResponse, ClientError> {
        let url = format!("{}/v1/users/{}", self.base_url, user.into());
        let response = self.service(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Credit XP directly.
    ///
    /// A repeated `(user, source_type, reference_id)` returns `accepted: false`
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn award(&self, request: AwardRequest) -> Result<AwardResponse, ClientError> {
        let url = format!("{}/v1/awards", self.base_url);
        let response = self.service(self.client.post(&url)).json(&request).send().await?;
        self.handle_response(response).await
    }

    /// Report one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn report_event(&self, event: &Event) -> Result<EventOutcome, ClientError> {
        let url = format!("{}/v1/events", self.base_url);
        let request = self.signed(self.service(self.client.post(&url)), event)?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Report multiple events in a batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn report_events(&self, events: Vec<Event>) -> Result<BatchEventResponse, ClientError> {
        let url = format!("{}/v1/events/batch", self.base_url);
        let body = BatchEventRequest { events };
        let request = self.signed(self.service(self.client.post(&url)), &body)?;
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Get a user's progress.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnknownUser` if no user matches.
    pub async fn get_progress(
        &self,
        user: impl Into<UserKey>,
    ) -> Result<ProgressResponse, ClientError> {
        let url = format!("{}/v1/users/{}/progress", self.base_url, user.into());
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Get a user's streak.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnknownUser` if no user matches.
    pub async fn get_streak(&self, user: impl Into<UserKey>) -> Result<StreakResponse, ClientError> {
        let url = format!("{}/v1/users/{}/streak", self.base_url, user.into());
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Get a leaderboard, optionally with the requesting user's own rank.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn leaderboard(
        &self,
        window: LeaderboardWindow,
        limit: Option<usize>,
        user: Option<UserKey>,
    ) -> Result<LeaderboardEntry, ClientError> {
        let url = format!("{}/v1/leaderboard", self.base_url);
        let mut query = vec![("window", window.to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(user) = user {
            query.push(("user", user.to_string()));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        self.handle_response(response).await
    }

    /// Get today's challenge. Returns `None` when none is published.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn today_challenge(
        &self,
        user: Option<UserKey>,
    ) -> Result<Option<ChallengeResponse>, ClientError> {
        let url = format!("{}/v1/challenges/today", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(user) = user {
            request = request.query(&[("user", user.to_string())]);
        }

        match self.handle_response(request.send().await?).await {
            Ok(challenge) => Ok(Some(challenge)),
            Err(ClientError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Submit a challenge attempt on behalf of a user (requires the user's JWT).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AlreadyAttempted` on a second submission.
    pub async fn submit_attempt(
        &self,
        user_jwt: &str,
        challenge_id: ChallengeId,
        answers: Vec<ChallengeAnswer>,
        time_taken_secs: u32,
    ) -> Result<AttemptResponse, ClientError> {
        let url = format!("{}/v1/challenges/{challenge_id}/attempt", self.base_url);
        let request = AttemptRequest {
            answers,
            time_taken_secs,
        };

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {user_jwt}"))
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Attach service credentials.
    fn service(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    /// Serialize `body` and sign it when a signing secret is configured.
    fn signed<T: Serialize>(
        &self,
        request: RequestBuilder,
        body: &T,
    ) -> Result<RequestBuilder, ClientError> {
        let bytes = serde_json::to_vec(body)?;
        let request = request.header("content-type", "application/json");

        let request = match &self.signing_secret {
            Some(secret) => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                    .map_err(|e| ClientError::Configuration(format!("invalid signing secret: {e}")))?;
                mac.update(&bytes);
                request.header(SIGNATURE_HEADER, hex::encode(mac.finalize().into_bytes()))
            }
            None => request,
        };

        Ok(request.body(bytes))
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message;

                tracing::debug!(status = %status, code, "Ledger API returned an error");

                match code {
                    "unknown_user" => {
                        let user = api_error
                            .error
                            .details
                            .as_ref()
                            .and_then(|d| d.get("user"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        Err(ClientError::UnknownUser { user })
                    }
                    "already_attempted" => Err(ClientError::AlreadyAttempted { message }),
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
    /// Shared secret for signing event bodies.
    pub signing_secret: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
            signing_secret: None,
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Sign event bodies with `secret`.
    #[must_use]
    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = LedgerClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("learning").signing_secret("s3cret");
        let client = LedgerClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "learning");
        assert_eq!(client.signing_secret.as_deref(), Some("s3cret"));
    }
}
