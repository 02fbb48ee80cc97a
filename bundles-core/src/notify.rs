//! Notification sink.
//!
//! Best-effort delivery of bundle lifecycle messages to a chat webhook.
//! Delivery never fails the caller: errors are logged and swallowed, and a
//! missing webhook URL disables the sink entirely. Nothing here may sit on
//! the critical path of a transition or a publish.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::types::Bundle;

/// Outbound notification channel for bundle state changes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn status_changed(&self, bundle: &Bundle, old_status: &str, actor: Option<&str>);
    async fn publish_started(&self, bundle: &Bundle, pages: usize);
    async fn publish_finished(&self, bundle: &Bundle, pages: usize, elapsed: Duration);
}

/// Build the sink from configuration. No webhook URL means notifications
/// are intentionally disabled, not an error. `link_base` is the admin URL
/// prefix for deep links in delivered messages.
pub fn from_webhook(
    webhook_url: Option<String>,
    link_base: Option<String>,
) -> Arc<dyn Notifier> {
    match webhook_url {
        Some(url) if !url.is_empty() => {
            let mut sink = SlackNotifier::new(url);
            if let Some(base) = link_base {
                sink = sink.with_link_base(base);
            }
            Arc::new(sink)
        }
        _ => Arc::new(NoopNotifier),
    }
}

/// Silent sink used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn status_changed(&self, _bundle: &Bundle, _old_status: &str, _actor: Option<&str>) {}
    async fn publish_started(&self, _bundle: &Bundle, _pages: usize) {}
    async fn publish_finished(&self, _bundle: &Bundle, _pages: usize, _elapsed: Duration) {}
}

/// Posts the fixed Slack message shape: a text line plus short fields.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
    /// Base admin URL for deep links, e.g. `https://cms.example.org/admin`.
    link_base: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            link_base: None,
        }
    }

    pub fn with_link_base(mut self, base: String) -> Self {
        self.link_base = Some(base);
        self
    }

    fn field(title: &str, value: String) -> serde_json::Value {
        json!({ "title": title, "value": value, "short": true })
    }

    async fn send(&self, text: &str, mut fields: Vec<serde_json::Value>, bundle: &Bundle) {
        if let Some(base) = &self.link_base {
            fields.push(json!({
                "title": "Link",
                "value": format!("{}/bundles/{}/", base.trim_end_matches('/'), bundle.id),
                "short": false,
            }));
        }

        let payload = json!({
            "text": text,
            "attachments": [{ "color": "good", "fields": fields }],
            "unfurl_links": false,
            "unfurl_media": false,
        });

        match self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(bundle = %bundle.name, text, "notification delivered");
            }
            Ok(response) => {
                // Non-2xx is logged, not retried.
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(bundle = %bundle.name, %status, body, "unable to deliver notification");
            }
            Err(e) => {
                error!(bundle = %bundle.name, error = %e, "unable to deliver notification");
            }
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn status_changed(&self, bundle: &Bundle, old_status: &str, actor: Option<&str>) {
        let fields = vec![
            Self::field("Title", bundle.name.clone()),
            Self::field("Changed by", actor.unwrap_or("System").to_string()),
            Self::field("Old status", old_status.to_string()),
            Self::field("New status", bundle.status.label().to_string()),
        ];
        self.send("Bundle status changed", fields, bundle).await;
    }

    async fn publish_started(&self, bundle: &Bundle, pages: usize) {
        let fields = vec![
            Self::field("Title", bundle.name.clone()),
            Self::field("User", "System".to_string()),
            Self::field("Pages", pages.to_string()),
            Self::field("Datasets", bundle.datasets.len().to_string()),
        ];
        self.send("Starting bundle publication", fields, bundle).await;
    }

    async fn publish_finished(&self, bundle: &Bundle, pages: usize, elapsed: Duration) {
        let fields = vec![
            Self::field("Title", bundle.name.clone()),
            Self::field("User", "System".to_string()),
            Self::field("Pages", pages.to_string()),
            Self::field("Datasets", bundle.datasets.len().to_string()),
            Self::field("Total time", format!("{:.3} seconds", elapsed.as_secs_f64())),
        ];
        self.send("Finished bundle publication", fields, bundle).await;
    }
}

/// One captured notification, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    StatusChanged { bundle: String, old_status: String },
    PublishStarted { bundle: String, pages: usize },
    PublishFinished { bundle: String, pages: usize },
}

/// Records every notification instead of delivering it. Test aid.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn status_changed(&self, bundle: &Bundle, old_status: &str, _actor: Option<&str>) {
        self.sent.lock().await.push(SentNotification::StatusChanged {
            bundle: bundle.name.clone(),
            old_status: old_status.to_string(),
        });
    }

    async fn publish_started(&self, bundle: &Bundle, pages: usize) {
        self.sent.lock().await.push(SentNotification::PublishStarted {
            bundle: bundle.name.clone(),
            pages,
        });
    }

    async fn publish_finished(&self, bundle: &Bundle, pages: usize, _elapsed: Duration) {
        self.sent
            .lock()
            .await
            .push(SentNotification::PublishFinished {
                bundle: bundle.name.clone(),
                pages,
            });
    }
}
