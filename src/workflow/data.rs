//! Loading stored series and turning them into labelled datasets

use crate::config::Config;
use crate::error::Result;
use crate::features::{build_features, build_target};
use crate::frame::Frame;
use crate::ml::Dataset;
use crate::storage::Database;
use crate::types::{Direction, MacroPanel, PriceSeries};
use tracing::{info, warn};

/// Everything the feature builder needs for one ticker
#[derive(Debug, Clone)]
pub struct MarketData {
    pub target: PriceSeries,
    pub auxiliaries: Vec<PriceSeries>,
    pub macro_panel: MacroPanel,
}

impl MarketData {
    pub fn build_features(&self, config: &Config) -> Result<Frame> {
        build_features(
            &self.target,
            &self.auxiliaries,
            &self.macro_panel,
            &config.features,
        )
    }
}

pub async fn load_market_data(
    db: &Database,
    ticker: &str,
    feature_tickers: &[String],
) -> Result<MarketData> {
    let target = db.load_prices(ticker).await?;
    let mut auxiliaries = Vec::with_capacity(feature_tickers.len());
    for aux in feature_tickers {
        let series = db.load_prices(aux).await?;
        if series.is_empty() {
            warn!("⚠️ {}: no stored prices for feature ticker {}", ticker, aux);
        }
        auxiliaries.push(series);
    }
    let macro_panel = db.load_macro_panel().await?;
    Ok(MarketData {
        target,
        auxiliaries,
        macro_panel,
    })
}

/// Auxiliary tickers registered for `ticker`; none when it is not registered
pub async fn feature_tickers_for(db: &Database, ticker: &str) -> Result<Vec<String>> {
    match db.get_target_ticker(ticker).await? {
        Some(t) => {
            let features = t.feature_tickers();
            info!("{}: feature tickers {:?}", ticker, features);
            Ok(features)
        }
        None => {
            warn!(
                "⚠️ {} is not a registered target ticker; continuing without auxiliary series",
                ticker
            );
            Ok(Vec::new())
        }
    }
}

/// Label the feature matrix and split it chronologically.
///
/// Returns the dataset and the label column name.
pub fn labelled_dataset(
    features: &Frame,
    config: &Config,
    direction: Direction,
) -> Result<(Dataset, String)> {
    let (labelled, label) = build_target(
        features,
        config.target.horizon,
        config.target.threshold,
        direction.as_str(),
    )?;
    let names = features.column_names().to_vec();
    let dataset = Dataset::chronological(
        &labelled,
        &names,
        &label,
        config.training.training_years,
        config.training.test_size,
    )?;
    Ok((dataset, label))
}
