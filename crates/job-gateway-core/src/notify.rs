//! Chat notifications.
//!
//! [`SlackMessage`] builds Block Kit payloads, [`Notifier`] delivers them to
//! a channel or a user's direct-message channel, and [`SlackFailureNotifier`]
//! adapts a notifier to the dispatcher's [`FailureNotifier`] contract.

use crate::database::Database;
use crate::dispatch::FailureNotifier;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Bot used when none is named
pub const DEFAULT_BOT: &str = "BOOSTA";

/// Database target holding the user directory
pub const USER_DIRECTORY_TARGET: &str = "BOOSTA";

const SLACK_ID_LOOKUP_SQL: &str = "SELECT slack_id FROM admin.flex_users \
     WHERE slack_id IS NOT NULL AND slack_id != '' \
     AND email = ?";

/// Notification delivery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("No token configured for bot '{0}'")]
    MissingBotToken(String),

    #[error("Slack API {method} failed: {error}")]
    Api { method: String, error: String },

    #[error("Slack request failed: {0}")]
    Transport(String),

    #[error("Unexpected Slack response: {0}")]
    Decode(String),
}

// ============================================================================
// Message model
// ============================================================================

/// Link button rendered below a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub text: String,
    pub url: String,
    pub emoji: bool,
}

impl UrlButton {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
            emoji: true,
        }
    }
}

/// A header section with optional body, footer and link button.
///
/// `text` is the plain fallback shown in notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackMessage {
    pub text: String,
    pub header: String,
    pub body: Option<String>,
    pub footer: Option<String>,
    pub button: Option<UrlButton>,
}

impl SlackMessage {
    pub fn new(text: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            header: header.into(),
            body: None,
            footer: None,
            button: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn with_button(mut self, button: UrlButton) -> Self {
        self.button = Some(button);
        self
    }

    /// Block Kit representation.
    ///
    /// Empty body and footer strings are skipped along with their divider.
    pub fn blocks(&self) -> Vec<Value> {
        let section = |text: &str| json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } });
        let divider = json!({ "type": "divider" });

        let mut blocks = vec![section(self.header.as_str())];
        for part in [&self.body, &self.footer].into_iter().flatten() {
            if !part.is_empty() {
                blocks.push(divider.clone());
                blocks.push(section(part.as_str()));
            }
        }

        if let Some(button) = &self.button {
            blocks.push(json!({
                "type": "actions",
                "elements": [{
                    "type": "button",
                    "text": { "type": "plain_text", "text": button.text, "emoji": button.emoji },
                    "value": "click_to_link",
                    "url": button.url,
                }]
            }));
        }

        blocks
    }
}

/// Where a message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackTarget {
    Channel(String),
    /// Delivered through the user's direct-message channel
    User(String),
}

impl SlackTarget {
    /// Pick a target; a user wins over a channel.
    pub fn choose(user: Option<&str>, channel: Option<&str>) -> Option<Self> {
        match (user, channel) {
            (Some(user), _) => Some(Self::User(user.to_string())),
            (None, Some(channel)) => Some(Self::Channel(channel.to_string())),
            (None, None) => None,
        }
    }
}

// ============================================================================
// Delivery
// ============================================================================

/// Delivers messages through a named bot.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post `message` and return the chat API's reply
    async fn send(
        &self,
        bot: &str,
        target: &SlackTarget,
        message: &SlackMessage,
    ) -> Result<Value, NotifyError>;
}

/// Send to the user if given, else the channel.
///
/// Without either, nothing is sent and a `{"text": ...}` placeholder reply is
/// returned so callers can report it.
pub async fn notify(
    notifier: &dyn Notifier,
    bot: &str,
    user: Option<&str>,
    channel: Option<&str>,
    message: &SlackMessage,
) -> Result<Value, NotifyError> {
    match SlackTarget::choose(user, channel) {
        Some(target) => notifier.send(bot, &target, message).await,
        None => Ok(json!({ "text": "No channel or user specified" })),
    }
}

/// Look up a user's chat id by e-mail in the user directory.
///
/// Lookup failures are logged and reported as "not found".
#[instrument(skip(db))]
pub async fn find_slack_id(db: &dyn Database, email: &str) -> Option<String> {
    let result = match db
        .read(USER_DIRECTORY_TARGET, SLACK_ID_LOOKUP_SQL, &[Value::from(email)])
        .await
    {
        Ok(table) => table,
        Err(e) => {
            error!(error = %e, "Failed to look up Slack ID");
            return None;
        }
    };

    let slack_id = result
        .column("slack_id")
        .ok()
        .and_then(|cells| cells.first().and_then(|cell| cell.as_str().map(str::to_string)))
        .filter(|id| !id.is_empty());

    if slack_id.is_none() {
        debug!("No Slack ID found");
    }
    slack_id
}

// ============================================================================
// Failure notifier
// ============================================================================

/// Reports failed job functions to the monitoring channel.
pub struct SlackFailureNotifier {
    notifier: Arc<dyn Notifier>,
    bot: String,
    channel: String,
}

impl SlackFailureNotifier {
    pub fn new(notifier: Arc<dyn Notifier>, channel: impl Into<String>) -> Self {
        Self {
            notifier,
            bot: DEFAULT_BOT.to_string(),
            channel: channel.into(),
        }
    }

    pub fn with_bot(mut self, bot: impl Into<String>) -> Self {
        self.bot = bot.into();
        self
    }

    /// The message posted for a failed `job.function`
    pub fn failure_message(job: &str, function: &str, error: &str) -> SlackMessage {
        SlackMessage::new(
            "Webhook Error",
            format!("*[Webhook Error]* `{}.{}` 실행 중 에러 발생", job, function),
        )
        .with_body(format!("```{}```", error))
    }
}

#[async_trait]
impl FailureNotifier for SlackFailureNotifier {
    async fn notify_failure(
        &self,
        job: &str,
        function: &str,
        error: &str,
    ) -> Result<(), NotifyError> {
        let message = Self::failure_message(job, function, error);
        self.notifier
            .send(&self.bot, &SlackTarget::Channel(self.channel.clone()), &message)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
