//! Telegram bot messages

use super::{NotificationChannel, NotificationReport};
use crate::config::TelegramConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
    parse_mode: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramChannel {
    http: Client,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(http: Client, config: TelegramConfig) -> Self {
        Self { http, config }
    }

    async fn send_message(&self, text: String) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token
        );
        let request = SendMessageRequest {
            chat_id: self.config.chat_id.clone(),
            text,
            parse_mode: "HTML".to_string(),
        };
        let response: SendMessageResponse =
            self.http.post(&url).json(&request).send().await?.json().await?;
        if !response.ok {
            return Err(PipelineError::ExternalService(format!(
                "telegram sendMessage failed: {}",
                response.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> String {
        "telegram".to_string()
    }

    async fn deliver(&self, report: &NotificationReport) -> Result<()> {
        for message in report.to_chat_messages() {
            self.send_message(message).await?;
        }
        Ok(())
    }
}
