//! Common test utilities for job-gateway-api integration tests
//!
//! This module provides:
//! - A gateway wired to the real job registry over in-memory adapters
//! - Request builders for token and signed webhooks
//! - Shared test data for the cash-management job

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use job_gateway_api::{create_router, AppState, ServiceConfig};
use job_gateway_core::adapters::{MemoryDatabase, MemoryNotifier, MemorySheetClient};
use job_gateway_core::auth::signature_header_value;
use job_gateway_core::dispatch::{JobDispatcher, JobRegistry};
use job_gateway_core::notify::{Notifier, SlackFailureNotifier};
use job_gateway_core::sheets::Spreadsheets;
use job_gateway_core::SecretString;
use job_gateway_jobs::{cash_mgmt, default_allow_list, register_all, JobContext};
use serde_json::{json, Value};
use std::sync::Arc;

pub const TOKEN: &str = "test-webhook-token-12345";
pub const SECRET: &str = "test-webhook-secret";
pub const ERROR_CHANNEL: &str = "C04FQ47F231";

pub const CASH_UPLOAD: &str = r#"{"job":"cash_mgmt","function":"banktransactionUpload"}"#;

/// A router plus the fakes behind it
#[allow(dead_code)]
pub struct TestGateway {
    pub router: Router,
    pub sheets: MemorySheetClient,
    pub database: MemoryDatabase,
    pub notifier: MemoryNotifier,
}

fn text_row(cells: &[&str]) -> Vec<Value> {
    cells.iter().map(|cell| json!(cell)).collect()
}

/// The cash-management spreadsheet with one transaction and one account
pub fn cash_sheets() -> MemorySheetClient {
    MemorySheetClient::new()
        .with_sheet(
            cash_mgmt::SPREADSHEET_URL,
            cash_mgmt::TRANSACTION_SHEET,
            vec![
                text_row(&[
                    "sheet_id",
                    "acc_no",
                    "deposit",
                    "withdrawal",
                    "end_balance",
                    "start_balance",
                    "start_balance_KRW",
                    "deposit_KRW",
                    "withdrawal_KRW",
                    "end_balance_KRW",
                    "fx_rate",
                ]),
                text_row(&["1", "110-1", "1,000", "-", "1,000", "0", "0", "0", "0", "0", "1"]),
            ],
        )
        .with_sheet(
            cash_mgmt::SPREADSHEET_URL,
            cash_mgmt::ACCOUNT_SHEET,
            vec![
                text_row(&["sheet_id", "acc_no", "acc_name"]),
                text_row(&["1", "110-1", "Operating"]),
            ],
        )
}

/// Configuration with both credentials set
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.webhook.token = Some(SecretString::new(TOKEN));
    config.webhook.secret = Some(SecretString::new(SECRET));
    config
}

/// Gateway over the given fakes; `failure_notifier` receives job failure
/// reports
pub fn gateway_with(
    config: ServiceConfig,
    sheets: MemorySheetClient,
    database: MemoryDatabase,
    notifier: MemoryNotifier,
    failure_notifier: MemoryNotifier,
) -> TestGateway {
    let context = JobContext::new(
        Spreadsheets::new(Arc::new(sheets.clone())),
        Arc::new(database.clone()),
        Arc::new(notifier.clone()),
    );
    let mut builder = JobRegistry::builder();
    register_all(&mut builder, &context);
    let registry = builder
        .build(default_allow_list())
        .expect("every built-in function is registered");

    let failure_channel: Arc<dyn Notifier> = Arc::new(failure_notifier);
    let dispatcher = JobDispatcher::new(
        Arc::new(registry),
        Arc::new(SlackFailureNotifier::new(failure_channel, ERROR_CHANNEL)),
    );

    TestGateway {
        router: create_router(AppState::new(config, dispatcher)),
        sheets,
        database,
        notifier,
    }
}

/// Gateway with credentials configured and the cash spreadsheet seeded
pub fn gateway() -> TestGateway {
    let notifier = MemoryNotifier::new();
    gateway_with(
        test_config(),
        cash_sheets(),
        MemoryDatabase::new(),
        notifier.clone(),
        notifier,
    )
}

fn post() -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
}

/// Webhook carrying a legacy token
pub fn token_request(body: &str, token: &str) -> Request<Body> {
    post()
        .header("x-webhook-token", token)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Webhook signed with `secret` at `timestamp`, carrying `body` unchanged
pub fn signed_request(body: &str, timestamp: i64, secret: &str) -> Request<Body> {
    signed_request_with(body, timestamp, &signature_header_value(secret, timestamp, body))
}

/// Webhook with explicit signature and timestamp header values
pub fn signed_request_with(body: &str, timestamp: i64, signature: &str) -> Request<Body> {
    post()
        .header("x-webhook-timestamp", timestamp.to_string())
        .header("x-webhook-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Webhook without any credentials
#[allow(dead_code)]
pub fn anonymous_request(body: &str) -> Request<Body> {
    post()
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
