//! Tests for the allow-list, registry and dispatcher.

use super::*;
use serde_json::json;
use std::sync::Mutex;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn notify_failure(
        &self,
        job: &str,
        function: &str,
        error: &str,
    ) -> Result<(), NotifyError> {
        self.calls
            .lock()
            .unwrap()
            .push((job.to_string(), function.to_string(), error.to_string()));
        if self.fail {
            return Err(NotifyError::Api {
                method: "chat.postMessage".to_string(),
                error: "channel_not_found".to_string(),
            });
        }
        Ok(())
    }
}

fn allow_list() -> AllowList {
    AllowList::new()
        .with_job("cash_mgmt", ["banktransactionUpload"])
        .with_job("reports", ["ok", "fails", "panics"])
}

fn echo_job() -> Arc<dyn JobFunction> {
    job_fn(|payload: Value| async move { Ok(json!({ "echo": payload })) })
}

fn dispatcher_with(notifier: Arc<RecordingNotifier>) -> JobDispatcher {
    let mut builder = JobRegistry::builder();
    builder
        .register("cash_mgmt", "banktransactionUpload", echo_job())
        .register(
            "reports",
            "ok",
            job_fn(|_| async { Ok(json!("1 records upserted into report")) }),
        )
        .register(
            "reports",
            "fails",
            job_fn(|_| async {
                Err(anyhow::anyhow!("Connection refused").context("DB write failed"))
            }),
        )
        .register(
            "reports",
            "panics",
            job_fn(|payload: Value| async move {
                if payload.get("job").is_some() {
                    panic!("index out of bounds");
                }
                Ok(Value::Null)
            }),
        );

    let registry = builder.build(allow_list()).unwrap();
    JobDispatcher::new(Arc::new(registry), notifier)
}

// ============================================================================
// Allow-list
// ============================================================================

mod allow_list_tests {
    use super::*;

    #[test]
    fn test_contains_requires_both_names() {
        let list = allow_list();

        assert!(list.contains("cash_mgmt", "banktransactionUpload"));
        assert!(!list.contains("cash_mgmt", "ok"));
        assert!(!list.contains("unknown", "banktransactionUpload"));
    }

    #[test]
    fn test_pairs_are_sorted() {
        let list = allow_list();
        let pairs: Vec<_> = list.pairs().collect();

        assert_eq!(
            pairs,
            vec![
                ("cash_mgmt", "banktransactionUpload"),
                ("reports", "fails"),
                ("reports", "ok"),
                ("reports", "panics"),
            ]
        );
    }

    #[test]
    fn test_deserializes_from_plain_map() {
        let list: AllowList =
            serde_json::from_value(json!({ "cash_mgmt": ["banktransactionUpload"] })).unwrap();

        assert!(list.contains("cash_mgmt", "banktransactionUpload"));
        assert_eq!(list.jobs().collect::<Vec<_>>(), vec!["cash_mgmt"]);
    }

    #[test]
    fn test_job_without_functions_counts_as_empty() {
        let list = AllowList::new().with_job("cash_mgmt", Vec::<String>::new());

        assert!(list.is_empty());
    }
}

// ============================================================================
// Registry
// ============================================================================

mod registry_tests {
    use super::*;

    #[test]
    fn test_build_fails_for_unresolved_entry() {
        let mut builder = JobRegistry::builder();
        builder.register("cash_mgmt", "banktransactionUpload", echo_job());

        let result = builder.build(allow_list());

        assert_eq!(
            result.err(),
            Some(RegistryError::Unresolved {
                job: "reports".to_string(),
                function: "fails".to_string(),
            })
        );
    }

    #[test]
    fn test_build_rejects_empty_allow_list() {
        let result = JobRegistry::builder().build(AllowList::new());

        assert_eq!(result.err(), Some(RegistryError::EmptyAllowList));
    }

    #[test]
    fn test_registered_functions_outside_allow_list_are_not_resolvable() {
        let mut builder = JobRegistry::builder();
        builder
            .register("cash_mgmt", "banktransactionUpload", echo_job())
            .register("cash_mgmt", "hidden", echo_job());

        let registry = builder
            .build(AllowList::new().with_job("cash_mgmt", ["banktransactionUpload"]))
            .unwrap();

        assert!(registry.resolve("cash_mgmt", "banktransactionUpload").is_ok());
        assert_eq!(
            registry.resolve("cash_mgmt", "hidden").err(),
            Some(DispatchError::UnknownFunction {
                job: "cash_mgmt".to_string(),
                function: "hidden".to_string(),
            })
        );
    }

    #[test]
    fn test_registered_reports_every_pair() {
        let mut builder = JobRegistry::builder();
        builder
            .register("a", "x", echo_job())
            .register("a", "y", echo_job())
            .register("b", "z", echo_job());

        let registered = builder.registered();

        assert!(registered.contains("a", "x"));
        assert!(registered.contains("a", "y"));
        assert!(registered.contains("b", "z"));
        assert_eq!(registered.pairs().count(), 3);
    }
}

// ============================================================================
// Request parsing
// ============================================================================

mod request_tests {
    use super::*;

    #[test]
    fn test_valid_body_keeps_full_payload() {
        let body = br#"{"job": "cash_mgmt", "function": "banktransactionUpload", "service": "x"}"#;

        let request = DispatchRequest::from_body(body).unwrap();

        assert_eq!(request.job, "cash_mgmt");
        assert_eq!(request.function, "banktransactionUpload");
        assert_eq!(request.payload["service"], "x");
        assert_eq!(request.payload["job"], "cash_mgmt");
    }

    #[test]
    fn test_missing_fields_rejected() {
        for body in [
            r#"{}"#,
            r#"{"job": "cash_mgmt"}"#,
            r#"{"function": "banktransactionUpload"}"#,
            r#"{"job": "", "function": "banktransactionUpload"}"#,
            r#"{"job": "cash_mgmt", "function": ""}"#,
            r#"{"job": 7, "function": "banktransactionUpload"}"#,
            r#"{"job": null, "function": null}"#,
        ] {
            let result = DispatchRequest::from_body(body.as_bytes());
            assert_eq!(result, Err(DispatchError::MissingFields), "body {body}");
        }
    }

    #[test]
    fn test_missing_fields_message() {
        assert_eq!(
            DispatchError::MissingFields.to_string(),
            "'job' and 'function' are required"
        );
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = DispatchRequest::from_body(b"{not json");

        assert!(matches!(result, Err(DispatchError::InvalidPayload { .. })));
        assert_eq!(result.unwrap_err().category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let result = DispatchRequest::from_body(br#"["cash_mgmt", "banktransactionUpload"]"#);

        assert!(matches!(result, Err(DispatchError::InvalidPayload { .. })));
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

mod dispatcher_tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_pair_receives_full_payload() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(notifier.clone());
        let payload = json!({ "job": "cash_mgmt", "function": "banktransactionUpload", "n": 1 });

        let result = dispatcher
            .dispatch("cash_mgmt", "banktransactionUpload", payload.clone())
            .await;

        assert_eq!(result, Ok(json!({ "echo": payload })));
        assert!(notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_rejected_without_notification() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(notifier.clone());

        let result = dispatcher.dispatch("nonexistent", "x", json!({})).await;

        let error = result.unwrap_err();
        assert_eq!(error.to_string(), "Unknown job: nonexistent");
        assert_eq!(error.category(), ErrorCategory::Validation);
        assert!(notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_function_rejected() {
        let dispatcher = dispatcher_with(Arc::new(RecordingNotifier::default()));

        let result = dispatcher.dispatch("cash_mgmt", "nonexistent", json!({})).await;

        assert_eq!(
            result.unwrap_err().to_string(),
            "Unknown function: cash_mgmt.nonexistent"
        );
    }

    #[tokio::test]
    async fn test_failure_reports_message_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(notifier.clone());

        let error = dispatcher
            .dispatch("reports", "fails", json!({}))
            .await
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::Execution);
        assert_eq!(error.to_string(), "DB write failed");

        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "reports");
        assert_eq!(calls[0].1, "fails");
        assert_eq!(calls[0].2, "DB write failed: Connection refused");
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_mask_original_error() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let dispatcher = dispatcher_with(notifier.clone());

        let error = dispatcher
            .dispatch("reports", "fails", json!({}))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "DB write failed");
        assert_eq!(notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_error() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(notifier.clone());

        let error = dispatcher
            .dispatch("reports", "panics", json!({ "job": "reports" }))
            .await
            .unwrap_err();

        assert_eq!(error.category(), ErrorCategory::Execution);
        assert_eq!(error.to_string(), JOB_ABORTED_MESSAGE);
        assert!(!error.to_string().contains("index out of bounds"));

        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].2.starts_with("job task did not complete"));
    }

    #[tokio::test]
    async fn test_unresponsive_slack_does_not_hold_the_error() {
        use crate::adapters::SlackNotifier;
        use crate::notify::SlackFailureNotifier;
        use crate::SecretString;
        use std::collections::BTreeMap;
        use std::time::Duration;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true }))
                    .set_delay(Duration::from_secs(3600)),
            )
            .mount(&server)
            .await;

        let tokens = BTreeMap::from([("BOOSTA".to_string(), SecretString::new("xoxb-boosta"))]);
        let slack = SlackNotifier::new(reqwest::Client::new(), tokens, Some(server.uri()));
        let failures = SlackFailureNotifier::new(Arc::new(slack), "C04FQ47F231");

        let mut builder = JobRegistry::builder();
        builder.register(
            "reports",
            "fails",
            job_fn(|_| async { Err(anyhow::anyhow!("DB write failed")) }),
        );
        let registry = builder
            .build(AllowList::new().with_job("reports", ["fails"]))
            .unwrap();
        let dispatcher = JobDispatcher::new(Arc::new(registry), Arc::new(failures))
            .with_notify_timeout(Duration::from_millis(200));

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            dispatcher.dispatch("reports", "fails", json!({})),
        )
        .await
        .expect("error response must not wait for Slack");

        assert_eq!(outcome.unwrap_err().to_string(), "DB write failed");
    }

    #[tokio::test]
    async fn test_log_only_notifier_never_fails() {
        let result = LogOnlyFailureNotifier
            .notify_failure("reports", "fails", "boom")
            .await;

        assert!(result.is_ok());
    }
}
