//! Tests for [`SlackNotifier`] against a mock Slack API.

use super::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notifier(server: &MockServer) -> SlackNotifier {
    let tokens = BTreeMap::from([
        ("boosta".to_string(), SecretString::new("xoxb-boosta")),
        ("META".to_string(), SecretString::new("xoxb-meta")),
    ]);
    SlackNotifier::new(reqwest::Client::new(), tokens, Some(server.uri()))
}

#[tokio::test]
async fn test_channel_message_posts_blocks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .and(header("authorization", "Bearer xoxb-boosta"))
        .and(body_partial_json(json!({ "channel": "C04FQ47F231", "text": "Webhook Error" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "ts": "1.2" })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = notifier(&server)
        .send(
            "BOOSTA",
            &SlackTarget::Channel("C04FQ47F231".into()),
            &SlackMessage::new("Webhook Error", "*[Webhook Error]*"),
        )
        .await
        .unwrap();

    assert_eq!(reply["ts"], "1.2");
}

#[tokio::test]
async fn test_user_message_opens_dm_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/conversations.open"))
        .and(header("authorization", "Bearer xoxb-meta"))
        .and(body_partial_json(json!({ "users": "U042" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "channel": { "id": "D042" } })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .and(body_partial_json(json!({ "channel": "D042" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let result = notifier(&server)
        .send("meta", &SlackTarget::User("U042".into()), &SlackMessage::new("t", "h"))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_ok_false_becomes_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "ok": false, "error": "channel_not_found" })),
        )
        .mount(&server)
        .await;

    let result = notifier(&server)
        .send("BOOSTA", &SlackTarget::Channel("C0".into()), &SlackMessage::new("t", "h"))
        .await;

    assert_eq!(
        result,
        Err(NotifyError::Api {
            method: "chat.postMessage".into(),
            error: "channel_not_found".into(),
        })
    );
}

#[tokio::test]
async fn test_unknown_bot_fails_without_request() {
    let server = MockServer::start().await;

    let result = notifier(&server)
        .send("OTHER", &SlackTarget::Channel("C0".into()), &SlackMessage::new("t", "h"))
        .await;

    assert_eq!(result, Err(NotifyError::MissingBotToken("OTHER".into())));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_non_json_reply_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let result = notifier(&server)
        .send("BOOSTA", &SlackTarget::Channel("C0".into()), &SlackMessage::new("t", "h"))
        .await;

    assert!(matches!(result, Err(NotifyError::Decode(_))));
}
