//! # Google Sheets Client
//!
//! [`SheetClient`] over the Sheets REST API v4, authorised with an OAuth
//! access token obtained from a service-account key.
//!
//! The service account signs an RS256 assertion which the token endpoint
//! exchanges for a bearer token. Tokens are cached and refreshed a minute
//! before they expire.

use crate::sheets::{SheetClient, SheetError};
use crate::SecretString;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
const REFRESH_MARGIN_SECONDS: i64 = 60;

// ============================================================================
// Credentials
// ============================================================================

/// The fields of a service-account key file this client needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, SheetError> {
        serde_json::from_str(json)
            .map_err(|e| SheetError::Authorization(format!("Invalid service account key: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, SheetError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SheetError::Authorization(format!(
                "Cannot read service account key {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&contents)
    }
}

/// Source of bearer tokens for the Sheets API
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, SheetError>;
}

/// Fixed bearer token, for tests and pre-issued credentials
pub struct StaticTokenProvider(SecretString);

impl StaticTokenProvider {
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<SecretString, SheetError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECONDS
}

struct CachedToken {
    token: SecretString,
    refresh_after: DateTime<Utc>,
}

/// Exchanges signed service-account assertions for access tokens.
pub struct ServiceAccountTokenProvider {
    http: reqwest::Client,
    key: ServiceAccountKey,
    token_uri: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    /// Use the key's own token endpoint unless `token_uri` overrides it
    pub fn new(http: reqwest::Client, key: ServiceAccountKey, token_uri: Option<String>) -> Self {
        let token_uri = token_uri
            .or_else(|| key.token_uri.clone())
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
        Self {
            http,
            key,
            token_uri,
            cached: Mutex::new(None),
        }
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, SheetError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECONDS,
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.expose().as_bytes())
            .map_err(|e| SheetError::Authorization(format!("Invalid private key: {e}")))?;

        encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| SheetError::Authorization(format!("Failed to sign assertion: {e}")))
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> Result<CachedToken, SheetError> {
        let assertion = self.sign_assertion(now)?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SheetError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Authorization(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetError::Decode(e.to_string()))?;

        debug!(expires_in = token.expires_in, "Obtained Google access token");
        Ok(CachedToken {
            token: SecretString::new(token.access_token),
            refresh_after: now + Duration::seconds(token.expires_in - REFRESH_MARGIN_SECONDS),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<SecretString, SheetError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(current) = cached.as_ref() {
            if now < current.refresh_after {
                return Ok(current.token.clone());
            }
        }

        let fresh = self.fetch_token(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetMetadata>,
}

#[derive(Debug, Deserialize)]
struct SheetMetadata {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Sheets API v4 client
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl GoogleSheetsClient {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
        api_base: Option<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.into()),
            tokens,
        }
    }

    /// `{base}/spreadsheets/{id}/{segments...}` with each segment escaped
    fn endpoint(&self, spreadsheet_id: &str, segments: &[&str]) -> Result<Url, SheetError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| SheetError::InvalidUrl(format!("{}: {e}", self.api_base)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SheetError::InvalidUrl(self.api_base.clone()))?;
            path.pop_if_empty().push("spreadsheets").push(spreadsheet_id);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, SheetError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| SheetError::Transport(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| SheetError::Decode(format!("status {status}: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        Err(SheetError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SheetClient for GoogleSheetsClient {
    #[instrument(skip(self))]
    async fn read_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<Value>>, SheetError> {
        let mut url = self.endpoint(spreadsheet_id, &["values", range])?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");

        let body = self.execute(self.http.get(url)).await?;
        let range: ValueRange =
            serde_json::from_value(body).map_err(|e| SheetError::Decode(e.to_string()))?;
        Ok(range.values)
    }

    async fn worksheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>, SheetError> {
        let mut url = self.endpoint(spreadsheet_id, &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let body = self.execute(self.http.get(url)).await?;
        let metadata: SpreadsheetMetadata =
            serde_json::from_value(body).map_err(|e| SheetError::Decode(e.to_string()))?;
        Ok(metadata
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn write_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: &[Vec<Value>],
    ) -> Result<(), SheetError> {
        let mut url = self.endpoint(spreadsheet_id, &["values", range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");

        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Value::Null => Value::String(String::new()),
                        other => other.clone(),
                    })
                    .collect()
            })
            .collect();
        let payload = json!({ "range": range, "majorDimension": "ROWS", "values": values });

        self.execute(self.http.put(url).json(&payload)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), SheetError> {
        let clear = format!("{range}:clear");
        let url = self.endpoint(spreadsheet_id, &["values", clear.as_str()])?;

        self.execute(self.http.post(url).json(&json!({}))).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "google_sheets_tests.rs"]
mod tests;
