//! Spreadsheet append via a web-app webhook

use super::{NotificationChannel, NotificationReport, MODEL_HEADER, PREDICTION_HEADER};
use crate::config::SheetConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    sheet: &'a str,
    header: &'a [&'a str],
    rows: Vec<Vec<String>>,
}

pub struct SheetSink {
    http: Client,
    config: SheetConfig,
}

impl SheetSink {
    pub fn new(http: Client, config: SheetConfig) -> Self {
        Self { http, config }
    }

    async fn append(&self, sheet: &str, header: &[&str], rows: Vec<Vec<String>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let count = rows.len();
        let request = AppendRequest { sheet, header, rows };
        let response = self
            .http
            .post(&self.config.webhook_url)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::ExternalService(format!(
                "sheet append to '{}' failed with status {}",
                sheet,
                response.status()
            )));
        }
        info!("📄 Appended {} rows to sheet '{}'", count, sheet);
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for SheetSink {
    fn name(&self) -> String {
        "sheet".to_string()
    }

    async fn deliver(&self, report: &NotificationReport) -> Result<()> {
        self.append(&self.config.models_sheet, &MODEL_HEADER, report.model_rows())
            .await?;
        self.append(
            &self.config.predictions_sheet,
            &PREDICTION_HEADER,
            report.prediction_rows(),
        )
        .await
    }
}
