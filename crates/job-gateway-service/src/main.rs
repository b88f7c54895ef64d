//! # Job Gateway Service
//!
//! Binary entry point for the job gateway HTTP service.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes logging
//! - Connects the Google Sheets, MySQL and Slack adapters
//! - Builds the job registry behind the allow-list
//! - Starts the HTTP server from job-gateway-api
//!
//! Exit codes: 1 when the listener cannot bind, 2 when the server fails,
//! 3 for any configuration error.

use job_gateway_api::{start_server, LoggingConfig, ServiceConfig};
use job_gateway_core::adapters::{
    GoogleSheetsClient, MySqlDatabase, ServiceAccountKey, ServiceAccountTokenProvider,
    SlackNotifier,
};
use job_gateway_core::dispatch::{JobDispatcher, JobRegistry};
use job_gateway_core::notify::{Notifier, SlackFailureNotifier};
use job_gateway_core::sheets::Spreadsheets;
use job_gateway_jobs::{default_allow_list, register_all, JobContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIGURATION_EXIT_CODE: i32 = 3;

/// Upper bound on any single Google or Slack HTTP call
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!(error = %e, "Failed to load configuration; aborting");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
    };

    init_tracing(&config.logging);
    info!("Starting job gateway");

    if let Err(e) = config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(CONFIGURATION_EXIT_CODE);
    }

    let dispatcher = match build_dispatcher(&config) {
        Ok(dispatcher) => dispatcher,
        Err(message) => {
            error!(error = %message, "Could not assemble the job registry; aborting");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
    };

    info!(
        host = %config.server.host,
        port = config.server.port,
        endpoint = %config.webhook.endpoint_path,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(config, dispatcher).await {
        error!("Failed to start server: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// `RUST_LOG` wins over `logging.level`; `logging.json_format` selects JSON
/// output.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| "info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wire the production adapters into the job registry and dispatcher
fn build_dispatcher(config: &ServiceConfig) -> Result<JobDispatcher, String> {
    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("job-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

    let key = ServiceAccountKey::from_file(&config.google.key_path).map_err(|e| {
        format!(
            "Google service-account key {}: {}",
            config.google.key_path.display(),
            e
        )
    })?;
    info!(account = %key.client_email, "Loaded Google service account");
    let tokens = ServiceAccountTokenProvider::new(http.clone(), key, config.google.token_uri.clone());
    let sheets = Spreadsheets::new(Arc::new(GoogleSheetsClient::new(
        http.clone(),
        Arc::new(tokens),
        config.google.api_base.clone(),
    )));

    if config.databases.is_empty() {
        warn!("No database targets configured; database-backed jobs will fail");
    }
    let database = Arc::new(MySqlDatabase::new(config.databases.clone()));

    if config.slack.tokens.is_empty() {
        warn!("No Slack bot tokens configured; notifications will fail");
    }
    let notifier: Arc<dyn Notifier> = Arc::new(SlackNotifier::new(
        http,
        config.slack.tokens.clone(),
        config.slack.api_base.clone(),
    ));

    let context = JobContext::new(sheets, database, notifier.clone());
    let mut builder = JobRegistry::builder();
    register_all(&mut builder, &context);

    let allow_list = config
        .effective_allow_list(&default_allow_list())
        .map_err(|e| e.to_string())?;
    let registry = builder.build(allow_list).map_err(|e| e.to_string())?;
    for job in registry.allow_list().jobs() {
        info!(job = %job, "Serving job");
    }

    let failure_notifier = SlackFailureNotifier::new(notifier, config.slack.error_channel.clone());
    Ok(JobDispatcher::new(Arc::new(registry), Arc::new(failure_notifier)))
}
