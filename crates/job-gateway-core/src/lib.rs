//! # Job Gateway Core
//!
//! Core logic for the webhook-triggered job gateway.
//!
//! This crate contains the webhook authentication rules, the allow-listed job
//! registry and dispatcher, the tabular data model the job functions work on,
//! and the adapter seams (spreadsheets, relational databases, Slack) together
//! with their production and in-memory implementations.
//!
//! ## Architecture
//!
//! - Gateway logic depends only on trait abstractions
//!   ([`dispatch::JobFunction`], [`dispatch::FailureNotifier`])
//! - Adapters ([`database::Database`], [`sheets::SheetClient`],
//!   [`notify::Notifier`]) are injected at startup
//! - Configuration is passed in explicitly; nothing is read from globals
//!
//! ## Usage
//!
//! ```rust
//! use job_gateway_core::auth::{AuthHeaders, WebhookAuthenticator};
//! use job_gateway_core::SecretString;
//!
//! let authenticator = WebhookAuthenticator::new(
//!     Some(SecretString::new("signing-secret")),
//!     Some(SecretString::new("legacy-token")),
//! );
//! let headers = AuthHeaders {
//!     token: Some("legacy-token".to_string()),
//!     ..AuthHeaders::default()
//! };
//! assert!(authenticator.authenticate(&headers, b"{}").is_ok());
//! ```

use serde::{Deserialize, Serialize};

pub mod adapters;
pub mod auth;
pub mod database;
pub mod dispatch;
pub mod notify;
pub mod secret;
pub mod sheets;
pub mod table;

pub use auth::{AuthError, AuthHeaders, AuthMode, WebhookAuthenticator};
pub use dispatch::{
    AllowList, DispatchError, DispatchRequest, FailureNotifier, JobDispatcher, JobFunction,
    JobRegistry, JobRegistryBuilder, RegistryError,
};
pub use secret::SecretString;
pub use table::{Table, TableError};

// ============================================================================
// Error classification
// ============================================================================

/// Error categories used to translate failures into caller-facing outcomes.
///
/// The HTTP layer maps each category to exactly one status code, so every
/// error type in the gateway path exposes a `category()` accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Deployment misconfiguration (missing secret or token)
    Configuration,
    /// Malformed request that the caller can fix
    Validation,
    /// Missing, expired or mismatched credentials
    Authentication,
    /// Failure inside a dispatched job function
    Execution,
}

impl ErrorCategory {
    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation | Self::Authentication)
    }
}
