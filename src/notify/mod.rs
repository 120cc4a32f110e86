//! Notification of new models and predictions
//!
//! Pending rows go to the spreadsheet sink (when configured) and then to every
//! message channel. Rows are flagged as notified only when all of those
//! deliveries succeed and at least one message channel exists, so a failed run
//! is retried in full next time and a successful run is never repeated.

mod email;
mod report;
mod sheet;
mod telegram;
#[cfg(test)]
mod tests;

pub use email::EmailRelay;
pub use report::{NotificationReport, MODEL_HEADER, PREDICTION_HEADER};
pub use sheet::SheetSink;
pub use telegram::TelegramChannel;

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::storage::Database;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info, warn};

/// A destination for the pending report
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> String;

    async fn deliver(&self, report: &NotificationReport) -> Result<()>;
}

/// What a notification run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    NothingPending,
    Flagged { models: usize, predictions: usize },
    /// Flags left untouched; the rows stay pending
    Withheld { reason: String },
}

pub struct NotificationService {
    sink: Option<Box<dyn NotificationChannel>>,
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationService {
    pub fn new(
        sink: Option<Box<dyn NotificationChannel>>,
        channels: Vec<Box<dyn NotificationChannel>>,
    ) -> Self {
        Self { sink, channels }
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let sink = config
            .sheet
            .clone()
            .map(|c| Box::new(SheetSink::new(http.clone(), c)) as Box<dyn NotificationChannel>);
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
        if let Some(email) = &config.email {
            channels.push(Box::new(EmailRelay::new(http.clone(), email.clone())));
        }
        if let Some(tg) = &config.telegram {
            channels.push(Box::new(TelegramChannel::new(http.clone(), tg.clone())));
        }
        Ok(Self::new(sink, channels))
    }

    pub async fn send_pending(&self, db: &Database) -> Result<NotifyOutcome> {
        let report = NotificationReport {
            models: db.pending_models().await?,
            predictions: db.pending_predictions().await?,
        };
        info!(
            "🔔 Pending: {} models, {} predictions",
            report.models.len(),
            report.predictions.len()
        );
        if report.is_empty() {
            return Ok(NotifyOutcome::NothingPending);
        }
        if self.channels.is_empty() {
            warn!("No message channel configured; leaving rows pending");
            return Ok(NotifyOutcome::Withheld {
                reason: "no message channel configured".to_string(),
            });
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.deliver(&report).await {
                error!("❌ {} delivery failed: {}", sink.name(), e);
                return Ok(NotifyOutcome::Withheld {
                    reason: format!("{}: {}", sink.name(), e),
                });
            }
        }

        let mut failures = Vec::new();
        for channel in &self.channels {
            match channel.deliver(&report).await {
                Ok(()) => info!("✅ Delivered via {}", channel.name()),
                Err(e) => {
                    error!("❌ {} delivery failed: {}", channel.name(), e);
                    failures.push(format!("{}: {}", channel.name(), e));
                }
            }
        }
        if !failures.is_empty() {
            return Ok(NotifyOutcome::Withheld {
                reason: failures.join("; "),
            });
        }

        db.mark_notified(&report.model_ids(), &report.prediction_ids())
            .await?;
        Ok(NotifyOutcome::Flagged {
            models: report.models.len(),
            predictions: report.predictions.len(),
        })
    }
}
