use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

/// What the owner is told at the end of a run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NotificationSummary {
    pub workflow_id: String,
    pub owner_id: String,
    pub candidates_found: usize,
    pub applications_submitted: usize,
    pub failures: usize,
    pub message: String,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, owner_id: &str, summary: &NotificationSummary) -> Result<()>;
}

/// Writes the summary to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, owner_id: &str, summary: &NotificationSummary) -> Result<()> {
        info!(
            owner_id,
            workflow_id = %summary.workflow_id,
            submitted = summary.applications_submitted,
            found = summary.candidates_found,
            "{}",
            summary.message
        );
        Ok(())
    }
}

/// POSTs the summary as JSON.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, owner_id: &str, summary: &NotificationSummary) -> Result<()> {
        let body = serde_json::json!({
            "owner_id": owner_id,
            "summary": summary,
        });
        let res = self.client.post(&self.url).json(&body).send().await?;
        if !res.status().is_success() {
            return Err(anyhow!("webhook returned {}", res.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> NotificationSummary {
        NotificationSummary {
            workflow_id: "wf-1".into(),
            owner_id: "o1".into(),
            candidates_found: 2,
            applications_submitted: 1,
            failures: 1,
            message: "1 of 2 submitted".into(),
        }
    }

    #[tokio::test]
    async fn log_notifier_always_delivers() {
        assert!(LogNotifier.send("o1", &summary()).await.is_ok());
    }

    #[tokio::test]
    async fn webhook_to_closed_port_fails() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        assert!(notifier.send("o1", &summary()).await.is_err());
    }
}
