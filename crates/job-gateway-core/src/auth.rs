//! Webhook request authentication.
//!
//! Two mutually exclusive modes are supported, selected by the headers a
//! caller sends:
//!
//! | Mode | Headers | Check |
//! |------|---------|-------|
//! | [`AuthMode::Signed`] | `X-Webhook-Signature` + `X-Webhook-Timestamp` | HMAC-SHA256 over `"{timestamp}.{body}"`, 300 s replay window |
//! | [`AuthMode::LegacyToken`] | `X-Webhook-Token` | exact match against the static token |
//!
//! The signed mode wins whenever both of its headers are present, even if a
//! legacy token is sent as well. Callers migrate from the token to signatures
//! without a flag day.

use crate::{ErrorCategory, SecretString};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the `sha256=<hex>` request signature
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Header carrying the unix-seconds timestamp the signature covers
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Header carrying the legacy static token
pub const TOKEN_HEADER: &str = "x-webhook-token";

/// Maximum accepted clock distance between caller and gateway
pub const DEFAULT_TOLERANCE_SECONDS: u64 = 300;

const SIGNATURE_PREFIX: &str = "sha256=";

// ============================================================================
// Headers
// ============================================================================

/// Authentication headers extracted from an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub token: Option<String>,
}

impl AuthHeaders {
    /// Extract authentication headers from a lowercase-keyed header map
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Self {
        Self {
            signature: headers.get(SIGNATURE_HEADER).cloned(),
            timestamp: headers.get(TIMESTAMP_HEADER).cloned(),
            token: headers.get(TOKEN_HEADER).cloned(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Authentication failures.
///
/// Display strings are returned to callers verbatim, so they stay terse and
/// never describe how a comparison failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Webhook secret not configured")]
    SecretNotConfigured,

    #[error("Webhook token not configured")]
    TokenNotConfigured,

    #[error("Invalid timestamp")]
    InvalidTimestamp,

    #[error("Invalid request body encoding")]
    InvalidBodyEncoding,

    #[error("Request expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid webhook token")]
    InvalidToken,

    #[error("Authentication required")]
    MissingCredentials,
}

impl AuthError {
    /// Get error category for response mapping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SecretNotConfigured | Self::TokenNotConfigured => ErrorCategory::Configuration,
            Self::InvalidTimestamp | Self::InvalidBodyEncoding => ErrorCategory::Validation,
            Self::Expired
            | Self::InvalidSignature
            | Self::InvalidToken
            | Self::MissingCredentials => ErrorCategory::Authentication,
        }
    }
}

/// Which authentication mode accepted the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Signed,
    LegacyToken,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signed => f.write_str("signed"),
            Self::LegacyToken => f.write_str("legacy-token"),
        }
    }
}

// ============================================================================
// Authenticator
// ============================================================================

/// Verifies inbound webhook requests against the configured credential set.
///
/// Holds no mutable state; one instance is shared by all concurrent requests.
#[derive(Clone)]
pub struct WebhookAuthenticator {
    secret: Option<SecretString>,
    token: Option<SecretString>,
    tolerance_seconds: u64,
}

impl WebhookAuthenticator {
    /// Create an authenticator with the default 300 second replay window.
    ///
    /// Empty strings are treated as "not configured".
    pub fn new(secret: Option<SecretString>, token: Option<SecretString>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            token: token.filter(|t| !t.is_empty()),
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    /// Override the replay window
    pub fn with_tolerance_seconds(mut self, tolerance_seconds: u64) -> Self {
        self.tolerance_seconds = tolerance_seconds;
        self
    }

    /// Replay window in seconds
    pub fn tolerance_seconds(&self) -> u64 {
        self.tolerance_seconds
    }

    /// Authenticate a request against the current wall clock
    pub fn authenticate(&self, headers: &AuthHeaders, body: &[u8]) -> Result<AuthMode, AuthError> {
        self.authenticate_at(headers, body, chrono::Utc::now().timestamp())
    }

    /// Authenticate a request as if received at `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// See [`AuthError`]; configuration errors are only reported for the mode
    /// the caller actually selected.
    #[instrument(skip_all, fields(mode))]
    pub fn authenticate_at(
        &self,
        headers: &AuthHeaders,
        body: &[u8],
        now: i64,
    ) -> Result<AuthMode, AuthError> {
        if let (Some(signature), Some(timestamp)) = (&headers.signature, &headers.timestamp) {
            tracing::Span::current().record("mode", "signed");
            self.verify_signed(signature, timestamp, body, now)?;
            return Ok(AuthMode::Signed);
        }

        if let Some(token) = &headers.token {
            tracing::Span::current().record("mode", "legacy-token");
            self.verify_token(token)?;
            return Ok(AuthMode::LegacyToken);
        }

        debug!("Request carried no authentication headers");
        Err(AuthError::MissingCredentials)
    }

    fn verify_signed(
        &self,
        signature: &str,
        timestamp: &str,
        body: &[u8],
        now: i64,
    ) -> Result<(), AuthError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            warn!("Signed webhook received but no webhook secret is configured");
            AuthError::SecretNotConfigured
        })?;

        let sent_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::InvalidTimestamp)?;

        if !within_window(now, sent_at, self.tolerance_seconds) {
            debug!(sent_at, now, "Signed webhook outside replay window");
            return Err(AuthError::Expired);
        }

        // The raw body is signed; a re-serialized payload would not match.
        let body = std::str::from_utf8(body).map_err(|_| AuthError::InvalidBodyEncoding)?;
        let expected = compute_signature(secret.expose(), timestamp, body);
        let received = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);

        if constant_time_compare(expected.as_bytes(), received.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidSignature)
        }
    }

    fn verify_token(&self, token: &str) -> Result<(), AuthError> {
        let configured = self.token.as_ref().ok_or_else(|| {
            warn!("Legacy webhook token received but no token is configured");
            AuthError::TokenNotConfigured
        })?;

        if configured.matches(token) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

impl std::fmt::Debug for WebhookAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAuthenticator")
            .field("secret_configured", &self.secret.is_some())
            .field("token_configured", &self.token.is_some())
            .field("tolerance_seconds", &self.tolerance_seconds)
            .finish()
    }
}

// ============================================================================
// Signing helpers
// ============================================================================

/// Hex-encoded HMAC-SHA256 of `"{timestamp}.{body}"` keyed by `secret`.
pub fn compute_signature(secret: &str, timestamp: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `sha256=<hex>` header value for a request body signed at `timestamp`.
///
/// This is what callers put in `X-Webhook-Signature`.
pub fn signature_header_value(secret: &str, timestamp: i64, body: &str) -> String {
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        compute_signature(secret, &timestamp.to_string(), body)
    )
}

fn within_window(now: i64, sent_at: i64, tolerance_seconds: u64) -> bool {
    let distance = (i128::from(now) - i128::from(sent_at)).abs();
    distance <= i128::from(tolerance_seconds)
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    // Length is not secret: the expected value is always 64 hex characters.
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
