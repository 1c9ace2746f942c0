//! Notification channels
//!
//! A [`NotificationChannel`] surfaces alerts and approval requests to a human.
//! Delivery is fire-and-forget from the caller's point of view: [`deliver`]
//! bounds every send with a timeout and swallows failures after logging them,
//! so a broken chat integration never stalls monitoring.

use crate::approval::Decision;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A message for a human, optionally carrying decision buttons
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub text: String,
    /// Approval action the decision options refer to
    pub action_id: Option<String>,
    pub options: Vec<Decision>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action_id: None,
            options: Vec::new(),
        }
    }

    /// Attach decision options for `action_id`
    pub fn with_decisions(mut self, action_id: impl Into<String>, options: &[Decision]) -> Self {
        self.action_id = Some(action_id.into());
        self.options = options.to_vec();
        self
    }

    /// Callback payload a chat button for `decision` should carry,
    /// e.g. `approve:hitl-1700000000000-1`
    pub fn callback_data(&self, decision: Decision) -> Option<String> {
        self.action_id
            .as_ref()
            .map(|id| format!("{}:{}", decision.as_str(), id))
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name used in logs
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Send through `channel`, bounded by `timeout`. Never fails; returns whether
/// the message was delivered.
pub async fn deliver(
    channel: &dyn NotificationChannel,
    notification: &Notification,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, channel.send(notification)).await {
        Ok(Ok(())) => {
            debug!(channel = channel.name(), "Notification delivered");
            true
        }
        Ok(Err(e)) => {
            warn!(channel = channel.name(), error = %e, "⚠️  Notification delivery failed");
            false
        }
        Err(_) => {
            warn!(
                channel = channel.name(),
                timeout_ms = timeout.as_millis() as u64,
                "⚠️  Notification delivery timed out"
            );
            false
        }
    }
}

/// Writes notifications to the tracing log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            action_id = notification.action_id.as_deref().unwrap_or("-"),
            options = notification.options.len(),
            "📣 {}",
            notification.text
        );
        Ok(())
    }
}

/// Delivers to every inner channel; individual failures are logged
pub struct FanoutChannel {
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl FanoutChannel {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl NotificationChannel for FanoutChannel {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let sends = self
            .channels
            .iter()
            .map(|channel| deliver(channel.as_ref(), notification, self.timeout));
        let delivered = join_all(sends).await;
        debug!(
            delivered = delivered.iter().filter(|ok| **ok).count(),
            total = delivered.len(),
            "Fanout delivery finished"
        );
        Ok(())
    }
}

#[cfg(feature = "http")]
pub use telegram::TelegramChannel;

#[cfg(feature = "http")]
mod telegram {
    use super::{Notification, NotificationChannel};
    use crate::approval::Decision;
    use crate::error::{Result, SentinelError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    const DEFAULT_API_BASE: &str = "https://api.telegram.org";

    /// Telegram Bot API channel: Markdown text plus an inline keyboard
    pub struct TelegramChannel {
        client: reqwest::Client,
        bot_token: String,
        chat_id: String,
        api_base: String,
    }

    impl TelegramChannel {
        pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?;
            Ok(Self {
                client,
                bot_token: bot_token.into(),
                chat_id: chat_id.into(),
                api_base: DEFAULT_API_BASE.to_string(),
            })
        }

        /// Point at a different Bot API host (self-hosted or test server)
        pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
            self.api_base = api_base.into().trim_end_matches('/').to_string();
            self
        }

        /// `sendMessage` request body for `notification`
        pub fn payload(&self, notification: &Notification) -> Value {
            let mut body = json!({
                "chat_id": self.chat_id,
                "text": notification.text,
                "parse_mode": "Markdown",
            });

            if !notification.options.is_empty() {
                let button = |decision: Decision| {
                    json!({
                        "text": decision.button_label(),
                        "callback_data": notification.callback_data(decision),
                    })
                };
                let (primary, secondary): (Vec<&Decision>, Vec<&Decision>) = notification
                    .options
                    .iter()
                    .partition(|d| !matches!(d, Decision::Postpone));
                let mut rows = Vec::new();
                if !primary.is_empty() {
                    rows.push(primary.into_iter().map(|d| button(*d)).collect::<Vec<_>>());
                }
                if !secondary.is_empty() {
                    rows.push(secondary.into_iter().map(|d| button(*d)).collect::<Vec<_>>());
                }
                body["reply_markup"] = json!({ "inline_keyboard": rows });
            }

            body
        }
    }

    #[async_trait]
    impl NotificationChannel for TelegramChannel {
        fn name(&self) -> &str {
            "telegram"
        }

        async fn send(&self, notification: &Notification) -> Result<()> {
            let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
            let response = self
                .client
                .post(&url)
                .json(&self.payload(notification))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SentinelError::Notification {
                    channel: "telegram".to_string(),
                    message: format!("HTTP {status}: {body}"),
                });
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_payload_with_keyboard() {
            let channel = TelegramChannel::new("token", "42").unwrap();
            let notification = Notification::text("Enable maintenance?").with_decisions(
                "hitl-1",
                &[Decision::Approve, Decision::Reject, Decision::Postpone],
            );

            let body = channel.payload(&notification);

            assert_eq!(body["chat_id"], "42");
            assert_eq!(body["parse_mode"], "Markdown");
            let rows = body["reply_markup"]["inline_keyboard"].as_array().unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0][0]["callback_data"], "approve:hitl-1");
            assert_eq!(rows[0][1]["callback_data"], "reject:hitl-1");
            assert_eq!(rows[1][0]["callback_data"], "postpone:hitl-1");
        }

        #[test]
        fn test_plain_payload_has_no_keyboard() {
            let channel = TelegramChannel::new("token", "42")
                .unwrap()
                .with_api_base("http://localhost:8081/");
            let body = channel.payload(&Notification::text("hello"));

            assert!(body.get("reply_markup").is_none());
            assert_eq!(channel.api_base, "http://localhost:8081");
        }
    }
}
