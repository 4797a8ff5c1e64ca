//! Client error types.

/// Errors that can occur when using the civic-ledger client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// No user matches the key.
    #[error("unknown user: {user}")]
    UnknownUser {
        /// The key as sent.
        user: String,
    },

    /// The user already submitted this challenge.
    #[error("challenge already attempted: {message}")]
    AlreadyAttempted {
        /// Server message.
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
