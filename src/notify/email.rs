//! HTML mail through an HTTP relay

use super::{NotificationChannel, NotificationReport};
use crate::config::EmailConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: String,
}

pub struct EmailRelay {
    http: Client,
    config: EmailConfig,
}

impl EmailRelay {
    pub fn new(http: Client, config: EmailConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl NotificationChannel for EmailRelay {
    fn name(&self) -> String {
        "email".to_string()
    }

    async fn deliver(&self, report: &NotificationReport) -> Result<()> {
        if self.config.recipients.is_empty() {
            return Err(PipelineError::Config(
                "notify.email.recipients is empty".into(),
            ));
        }
        let request = MailRequest {
            from: &self.config.sender,
            to: &self.config.recipients,
            subject: &self.config.subject,
            html: report.to_html(),
        };
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::ExternalService(format!(
                "mail relay returned {}: {}",
                status, body
            )));
        }
        tracing::info!(
            "✉️ Mailed report to {} recipient(s)",
            self.config.recipients.len()
        );
        Ok(())
    }
}
