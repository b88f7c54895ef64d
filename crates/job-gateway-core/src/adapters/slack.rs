//! # Slack Web API Notifier
//!
//! Posts messages through `chat.postMessage`, opening a direct-message
//! channel with `conversations.open` first when the target is a user.

use crate::notify::{Notifier, NotifyError, SlackMessage, SlackTarget};
use crate::SecretString;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, instrument};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Slack client holding one bot token per bot name.
pub struct SlackNotifier {
    http: reqwest::Client,
    api_base: String,
    tokens: BTreeMap<String, SecretString>,
}

impl SlackNotifier {
    pub fn new(
        http: reqwest::Client,
        tokens: BTreeMap<String, SecretString>,
        api_base: Option<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.into()),
            tokens,
        }
    }

    // Bot names are matched case-insensitively; env-sourced config is lowercased.
    fn token(&self, bot: &str) -> Result<&SecretString, NotifyError> {
        self.tokens
            .iter()
            .find(|(name, token)| name.eq_ignore_ascii_case(bot) && !token.is_empty())
            .map(|(_, token)| token)
            .ok_or_else(|| NotifyError::MissingBotToken(bot.to_string()))
    }

    fn build_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), method)
    }

    /// Call a Web API method and return its reply, failing on `ok: false`
    async fn call(&self, token: &SecretString, method: &str, payload: &Value) -> Result<Value, NotifyError> {
        let response = self
            .http
            .post(self.build_url(method))
            .bearer_auth(token.expose())
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| NotifyError::Decode(format!("{method} returned {status}: {e}")))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }

        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        Err(NotifyError::Api {
            method: method.to_string(),
            error,
        })
    }

    async fn open_dm(&self, token: &SecretString, user: &str) -> Result<String, NotifyError> {
        let reply = self
            .call(token, "conversations.open", &json!({ "users": user }))
            .await?;
        reply
            .pointer("/channel/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NotifyError::Decode("conversations.open reply has no channel id".into()))
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    #[instrument(skip(self, message), fields(bot = %bot))]
    async fn send(
        &self,
        bot: &str,
        target: &SlackTarget,
        message: &SlackMessage,
    ) -> Result<Value, NotifyError> {
        let token = self.token(bot)?;

        let result = async {
            let channel = match target {
                SlackTarget::Channel(channel) => channel.clone(),
                SlackTarget::User(user) => self.open_dm(token, user).await?,
            };
            debug!(channel = %channel, "Posting Slack message");

            let payload = json!({
                "channel": channel,
                "text": message.text,
                "blocks": message.blocks(),
            });
            self.call(token, "chat.postMessage", &payload).await
        }
        .await;

        if let Err(e) = &result {
            error!(error = %e, target = ?target, "Slack API error");
        }
        result
    }
}

#[cfg(test)]
#[path = "slack_tests.rs"]
mod tests;
