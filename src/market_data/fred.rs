//! Economic series from the FRED observations API

use super::MacroFeed;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: String,
    value: String,
}

#[derive(Clone)]
pub struct FredClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl FredClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Config("macro_data.api_key is not set".into()))?;
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl MacroFeed for FredClient {
    async fn fetch_series(&self, series_id: &str, start: NaiveDate) -> Result<Vec<(NaiveDate, f64)>> {
        let url = format!("{}/fred/series/observations", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", &start.format("%Y-%m-%d").to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::ExternalService(format!(
                "{}: FRED returned {}",
                series_id,
                response.status()
            )));
        }
        let body = response.text().await?;
        parse_observations(&body)
    }
}

/// Missing observations (".") are skipped
pub(crate) fn parse_observations(body: &str) -> Result<Vec<(NaiveDate, f64)>> {
    let response: ObservationsResponse = serde_json::from_str(body)?;
    let mut out = Vec::with_capacity(response.observations.len());
    for obs in response.observations {
        let value = match obs.value.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => continue,
        };
        let date = NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d").map_err(|e| {
            PipelineError::ExternalService(format!("bad observation date '{}': {}", obs.date, e))
        })?;
        out.push((date, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_missing_values() {
        let body = r#"{"observations":[
            {"date":"2024-01-01","value":"308.4"},
            {"date":"2024-02-01","value":"."},
            {"date":"2024-03-01","value":"310.3"}]}"#;
        let obs = parse_observations(body).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1].0, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = FredClient::new("https://api.stlouisfed.org", None).err().unwrap();
        assert!(err.is_config());
    }
}
