//! Allow-listed job dispatch.
//!
//! Job functions are looked up in a static [`JobRegistry`] keyed by
//! `(job, function)`. The registry is built once at startup and refuses to
//! build when an allow-listed pair has no implementation, so dispatch can never
//! fail with "function not found" at runtime.
//!
//! [`JobDispatcher`] applies the allow-list, runs the function and turns any
//! failure into a [`DispatchError::Execution`] after logging it and making one
//! best-effort attempt to notify the monitoring channel.

use crate::notify::NotifyError;
use crate::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

// ============================================================================
// Allow-list
// ============================================================================

/// Static mapping from job name to the function names that may be invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(BTreeMap<String, BTreeSet<String>>);

impl AllowList {
    /// Create an empty allow-list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job and its permitted functions
    pub fn with_job<I, S>(mut self, job: impl Into<String>, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(job.into())
            .or_default()
            .extend(functions.into_iter().map(Into::into));
        self
    }

    /// Functions permitted for `job`, or `None` for an unknown job
    pub fn allowed_functions(&self, job: &str) -> Option<&BTreeSet<String>> {
        self.0.get(job)
    }

    /// Whether `job.function` may be dispatched
    pub fn contains(&self, job: &str, function: &str) -> bool {
        self.allowed_functions(job)
            .is_some_and(|functions| functions.contains(function))
    }

    /// All `(job, function)` pairs in name order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(job, functions)| {
            functions
                .iter()
                .map(move |function| (job.as_str(), function.as_str()))
        })
    }

    /// Job names in name order
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

// ============================================================================
// Job functions
// ============================================================================

/// A named transformation routine invoked with the full webhook payload.
///
/// Implementations return any JSON value as their result. Errors are
/// unclassified: the dispatcher reports them as server-side failures.
#[async_trait]
pub trait JobFunction: Send + Sync {
    async fn run(&self, payload: Value) -> anyhow::Result<Value>;
}

/// [`JobFunction`] backed by an async closure.
pub struct FnJob<F> {
    func: F,
}

impl<F, Fut> FnJob<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> JobFunction for FnJob<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, payload: Value) -> anyhow::Result<Value> {
        (self.func)(payload).await
    }
}

/// Wrap an async closure as a shareable job function
pub fn job_fn<F, Fut>(func: F) -> Arc<dyn JobFunction>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnJob::new(func))
}

// ============================================================================
// Registry
// ============================================================================

/// Errors raised while building the registry at startup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Allow-listed function {job}.{function} has no registered implementation")]
    Unresolved { job: String, function: String },

    #[error("Allow-list is empty; no job could ever be dispatched")]
    EmptyAllowList,
}

/// Collects job function implementations before the allow-list is applied.
#[derive(Default)]
pub struct JobRegistryBuilder {
    functions: HashMap<(String, String), Arc<dyn JobFunction>>,
}

impl JobRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation for `job.function`.
    ///
    /// A second registration for the same pair replaces the first.
    pub fn register(
        &mut self,
        job: impl Into<String>,
        function: impl Into<String>,
        implementation: Arc<dyn JobFunction>,
    ) -> &mut Self {
        self.functions
            .insert((job.into(), function.into()), implementation);
        self
    }

    /// Allow-list containing exactly the registered pairs
    pub fn registered(&self) -> AllowList {
        self.functions
            .keys()
            .fold(AllowList::new(), |list, (job, function)| {
                list.with_job(job.clone(), [function.clone()])
            })
    }

    /// Freeze the registry behind `allow_list`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unresolved`] for the first allow-listed pair
    /// without an implementation, and [`RegistryError::EmptyAllowList`] when
    /// nothing is allow-listed.
    pub fn build(mut self, allow_list: AllowList) -> Result<JobRegistry, RegistryError> {
        if allow_list.is_empty() {
            return Err(RegistryError::EmptyAllowList);
        }

        let mut functions = HashMap::new();
        for (job, function) in allow_list.pairs() {
            let key = (job.to_string(), function.to_string());
            let implementation =
                self.functions
                    .remove(&key)
                    .ok_or_else(|| RegistryError::Unresolved {
                        job: job.to_string(),
                        function: function.to_string(),
                    })?;
            functions.insert(key, implementation);
        }

        for (job, function) in self.functions.keys() {
            debug!(job = %job, function = %function, "Registered function is not allow-listed; it cannot be dispatched");
        }

        Ok(JobRegistry {
            allow_list,
            functions,
        })
    }
}

/// Immutable `(job, function)` → implementation table.
#[derive(Clone)]
pub struct JobRegistry {
    allow_list: AllowList,
    functions: HashMap<(String, String), Arc<dyn JobFunction>>,
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::new()
    }

    /// The allow-list this registry enforces
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Functions permitted for `job`
    pub fn allowed_functions(&self, job: &str) -> Option<&BTreeSet<String>> {
        self.allow_list.allowed_functions(job)
    }

    /// Resolve an allow-listed pair to its implementation.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownJob`] or [`DispatchError::UnknownFunction`]
    /// when the pair is not allow-listed.
    pub fn resolve(&self, job: &str, function: &str) -> Result<Arc<dyn JobFunction>, DispatchError> {
        let allowed = self
            .allowed_functions(job)
            .ok_or_else(|| DispatchError::UnknownJob {
                job: job.to_string(),
            })?;

        if !allowed.contains(function) {
            return Err(DispatchError::UnknownFunction {
                job: job.to_string(),
                function: function.to_string(),
            });
        }

        // build() guarantees every allow-listed pair has an implementation.
        self.functions
            .get(&(job.to_string(), function.to_string()))
            .cloned()
            .ok_or_else(|| DispatchError::UnknownFunction {
                job: job.to_string(),
                function: function.to_string(),
            })
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("allow_list", &self.allow_list)
            .finish()
    }
}

// ============================================================================
// Requests and errors
// ============================================================================

/// Dispatch failures, split by whether the caller or the job is at fault
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid JSON payload: {message}")]
    InvalidPayload { message: String },

    #[error("'job' and 'function' are required")]
    MissingFields,

    #[error("Unknown job: {job}")]
    UnknownJob { job: String },

    #[error("Unknown function: {job}.{function}")]
    UnknownFunction { job: String, function: String },

    /// Only the job's error message is kept; the full chain stays in the logs.
    #[error("{message}")]
    Execution {
        job: String,
        function: String,
        message: String,
    },
}

impl DispatchError {
    /// Get error category for response mapping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPayload { .. }
            | Self::MissingFields
            | Self::UnknownJob { .. }
            | Self::UnknownFunction { .. } => ErrorCategory::Validation,
            Self::Execution { .. } => ErrorCategory::Execution,
        }
    }
}

/// A parsed webhook payload naming the function to run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub job: String,
    pub function: String,
    /// The complete JSON object, including `job` and `function`
    pub payload: Value,
}

impl DispatchRequest {
    /// Parse a raw request body.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidPayload`] when the body is not a JSON object;
    /// [`DispatchError::MissingFields`] when `job` or `function` is absent,
    /// empty, or not a string.
    pub fn from_body(body: &[u8]) -> Result<Self, DispatchError> {
        let payload: Value =
            serde_json::from_slice(body).map_err(|e| DispatchError::InvalidPayload {
                message: e.to_string(),
            })?;
        Self::from_payload(payload)
    }

    /// Validate an already-parsed payload
    pub fn from_payload(payload: Value) -> Result<Self, DispatchError> {
        let object = payload
            .as_object()
            .ok_or_else(|| DispatchError::InvalidPayload {
                message: "payload must be a JSON object".to_string(),
            })?;

        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match (field("job"), field("function")) {
            (Some(job), Some(function)) => Ok(Self {
                job,
                function,
                payload,
            }),
            _ => Err(DispatchError::MissingFields),
        }
    }
}

// ============================================================================
// Failure notification
// ============================================================================

/// Receives a report whenever a dispatched job function fails.
///
/// Implementations may fail; the dispatcher logs and discards such errors so a
/// broken alerting channel never replaces the original error response.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify_failure(&self, job: &str, function: &str, error: &str)
        -> Result<(), NotifyError>;
}

/// Failure notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyFailureNotifier;

#[async_trait]
impl FailureNotifier for LogOnlyFailureNotifier {
    async fn notify_failure(
        &self,
        job: &str,
        function: &str,
        _error: &str,
    ) -> Result<(), NotifyError> {
        info!(job = %job, function = %function, "Failure notification channel disabled");
        Ok(())
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Default bound on a single failure notification attempt
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Caller-facing message for a job task that panicked or was cancelled
pub const JOB_ABORTED_MESSAGE: &str = "Job execution aborted";

/// Applies the allow-list and runs job functions.
#[derive(Clone)]
pub struct JobDispatcher {
    registry: Arc<JobRegistry>,
    notifier: Arc<dyn FailureNotifier>,
    notify_timeout: Duration,
}

impl JobDispatcher {
    pub fn new(registry: Arc<JobRegistry>, notifier: Arc<dyn FailureNotifier>) -> Self {
        Self {
            registry,
            notifier,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    /// Bound on how long a failure notification may hold up the error response
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run `job.function` with the full payload.
    ///
    /// The function runs on its own task, so a panic inside it is reported as
    /// an execution failure instead of tearing down the connection.
    ///
    /// ```rust
    /// use job_gateway_core::dispatch::{job_fn, AllowList, JobDispatcher, JobRegistry, LogOnlyFailureNotifier};
    /// use serde_json::json;
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let mut builder = JobRegistry::builder();
    /// builder.register("echo", "run", job_fn(|payload| async move { Ok(payload) }));
    /// let registry = builder
    ///     .build(AllowList::new().with_job("echo", ["run"]))
    ///     .unwrap();
    ///
    /// let dispatcher = JobDispatcher::new(Arc::new(registry), Arc::new(LogOnlyFailureNotifier));
    /// let result = dispatcher.dispatch("echo", "run", json!({ "n": 1 })).await.unwrap();
    /// assert_eq!(result["n"], 1);
    /// # });
    /// ```
    #[instrument(skip_all, fields(job = %job, function = %function))]
    pub async fn dispatch(
        &self,
        job: &str,
        function: &str,
        payload: Value,
    ) -> Result<Value, DispatchError> {
        let implementation = self.registry.resolve(job, function)?;

        info!("Executing {}.{}", job, function);
        let outcome = tokio::spawn(async move { implementation.run(payload).await }).await;

        // The caller sees the outermost message; the chain goes to logs and Slack.
        let (message, report) = match outcome {
            Ok(Ok(result)) => {
                info!("Completed {}.{}", job, function);
                return Ok(result);
            }
            Ok(Err(error)) => {
                error!(error = ?error, "Error in {}.{}", job, function);
                (error.to_string(), format!("{:#}", error))
            }
            Err(join_error) => {
                error!(error = %join_error, "Job task for {}.{} did not complete", job, function);
                (
                    JOB_ABORTED_MESSAGE.to_string(),
                    format!("job task did not complete: {}", join_error),
                )
            }
        };

        self.notify_best_effort(job, function, &report).await;

        Err(DispatchError::Execution {
            job: job.to_string(),
            function: function.to_string(),
            message,
        })
    }

    async fn notify_best_effort(&self, job: &str, function: &str, error: &str) {
        let attempt = self.notifier.notify_failure(job, function, error);
        match tokio::time::timeout(self.notify_timeout, attempt).await {
            Ok(Ok(())) => {}
            Ok(Err(notify_error)) => {
                error!(
                    error = %notify_error,
                    "Failed to send failure notification for {}.{}", job, function
                );
            }
            Err(_) => {
                error!(
                    timeout_ms = self.notify_timeout.as_millis() as u64,
                    "Failure notification for {}.{} timed out", job, function
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
