//! Civic Ledger Client SDK.
//!
//! This crate provides a client library for services to interact with the civic-ledger API.
//!
//! # Example
//!
//! ```no_run
//! use civic_ledger_client::{ClientOptions, Event, EventKind, LedgerClient, RegisterUserRequest};
//!
//! # async fn example() -> Result<(), civic_ledger_client::ClientError> {
//! let client = LedgerClient::with_options(
//!     "http://civic-ledger.platform.svc:8080",
//!     "your-service-api-key",
//!     ClientOptions::with_service_name("learning"),
//! )?;
//!
//! let user = client.register_user(RegisterUserRequest::default()).await?;
//!
//! // Report a completed lesson
//! let outcome = client
//!     .report_event(&Event::new(
//!         user.public_id,
//!         EventKind::LessonCompleted {
//!             lesson_id: "civics-101".to_string(),
//!             xp_reward: 20,
//!         },
//!     ))
//!     .await?;
//!
//! println!("Total XP: {:?}", outcome.total_xp);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, LedgerClient};
pub use error::ClientError;
pub use types::*;
