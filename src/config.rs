//! Configuration loading
//!
//! Settings are layered: `config.toml` (optional), then `TREND__SECTION__KEY`
//! environment overrides, with `.env` loaded first for secrets. The resulting
//! [`Config`] is built once and passed explicitly to every component.

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub macro_data: MacroDataConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/trend.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Feature engineering windows and indicator periods
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    /// Lag windows (days) for return features
    #[serde(default = "default_lag_days")]
    pub lag_days: Vec<usize>,
    /// Simple moving average windows
    #[serde(default = "default_ma_periods")]
    pub ma_periods: Vec<usize>,
    /// Auxiliary tickers treated as volatility levels rather than returns
    #[serde(default = "default_volatility_tickers")]
    pub volatility_tickers: Vec<String>,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
}

fn default_lag_days() -> Vec<usize> {
    vec![1, 5, 10, 20]
}

fn default_ma_periods() -> Vec<usize> {
    vec![5, 25, 75]
}

fn default_volatility_tickers() -> Vec<String> {
    vec!["^VIX".to_string()]
}

fn default_rsi_period() -> usize {
    14
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_std() -> f64 {
    2.0
}

fn default_atr_period() -> usize {
    14
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lag_days: default_lag_days(),
            ma_periods: default_ma_periods(),
            volatility_tickers: default_volatility_tickers(),
            rsi_period: default_rsi_period(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            bollinger_period: default_bollinger_period(),
            bollinger_std: default_bollinger_std(),
            atr_period: default_atr_period(),
        }
    }
}

/// Classification target: horizon in trading rows and return threshold
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_horizon() -> usize {
    10
}

fn default_threshold() -> f64 {
    0.03
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Years of history (counted back from the newest row) used for training
    #[serde(default = "default_training_years")]
    pub training_years: u32,
    /// Fraction of the window held out for the chronological test split
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    /// Default search method: none | grid | random | broad
    #[serde(default = "default_search_method")]
    pub search_method: String,
    #[serde(default = "default_cv_splits")]
    pub cv_splits: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_training_years() -> u32 {
    5
}

fn default_test_size() -> f64 {
    0.2
}

fn default_search_method() -> String {
    "random".to_string()
}

fn default_cv_splits() -> usize {
    3
}

fn default_seed() -> u64 {
    42
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            training_years: default_training_years(),
            test_size: default_test_size(),
            search_method: default_search_method(),
            cv_splits: default_cv_splits(),
            seed: default_seed(),
            search: SearchConfig::default(),
        }
    }
}

/// Hyperparameter search budgets, with reduced variants for test mode
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_random_iter")]
    pub random_iter: usize,
    #[serde(default = "default_random_iter_test")]
    pub random_iter_test: usize,
    #[serde(default = "default_broad_trials")]
    pub broad_trials: usize,
    #[serde(default = "default_broad_trials_test")]
    pub broad_trials_test: usize,
    #[serde(default = "default_grid")]
    pub grid: GridConfig,
    #[serde(default = "default_grid_test")]
    pub grid_test: GridConfig,
}

fn default_random_iter() -> usize {
    50
}

fn default_random_iter_test() -> usize {
    5
}

fn default_broad_trials() -> usize {
    100
}

fn default_broad_trials_test() -> usize {
    5
}

fn default_grid() -> GridConfig {
    GridConfig {
        n_estimators: vec![100, 200, 500],
        learning_rate: vec![0.01, 0.05, 0.1],
        num_leaves: vec![20, 31, 40, 60],
    }
}

fn default_grid_test() -> GridConfig {
    GridConfig {
        n_estimators: vec![50],
        learning_rate: vec![0.1],
        num_leaves: vec![15, 31],
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            random_iter: default_random_iter(),
            random_iter_test: default_random_iter_test(),
            broad_trials: default_broad_trials(),
            broad_trials_test: default_broad_trials_test(),
            grid: default_grid(),
            grid_test: default_grid_test(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    pub n_estimators: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub num_leaves: Vec<usize>,
}

/// Bulk evaluation pool and skip rules
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Deadline for one (ticker, direction) training unit
    #[serde(default = "default_unit_deadline_secs")]
    pub unit_deadline_secs: u64,
    /// Auxiliary tickers used for every evaluated ticker
    #[serde(default = "default_common_features")]
    pub common_features: Vec<String>,
    #[serde(default = "default_min_history_rows")]
    pub min_history_rows: usize,
    #[serde(default = "default_min_training_rows")]
    pub min_training_rows: usize,
}

fn default_workers() -> usize {
    4
}

fn default_unit_deadline_secs() -> u64 {
    900
}

fn default_common_features() -> Vec<String> {
    ["^N225", "^TPX", "^GSPC", "JPY=X", "CL=F"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_history_rows() -> usize {
    200
}

fn default_min_training_rows() -> usize {
    100
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            unit_deadline_secs: default_unit_deadline_secs(),
            common_features: default_common_features(),
            min_history_rows: default_min_history_rows(),
            min_training_rows: default_min_training_rows(),
        }
    }
}

/// Daily price source
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_market_url")]
    pub base_url: String,
    /// Days re-fetched before the newest stored bar
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Years fetched for a ticker with no stored bars
    #[serde(default = "default_history_years")]
    pub history_years: i32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Absolute daily adjusted return above which a bar is flagged
    #[serde(default = "default_max_daily_move")]
    pub max_daily_move: f64,
}

fn default_market_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_lookback_days() -> i64 {
    7
}

fn default_history_years() -> i32 {
    10
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_max_daily_move() -> f64 {
    0.5
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_url(),
            lookback_days: default_lookback_days(),
            history_years: default_history_years(),
            request_delay_ms: default_request_delay_ms(),
            max_daily_move: default_max_daily_move(),
        }
    }
}

/// Macroeconomic series source
#[derive(Debug, Clone, Deserialize)]
pub struct MacroDataConfig {
    #[serde(default = "default_macro_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Source series id -> stored indicator name
    #[serde(default = "default_macro_series")]
    pub series: BTreeMap<String, String>,
    #[serde(default = "default_macro_start")]
    pub start_date: String,
}

fn default_macro_url() -> String {
    "https://api.stlouisfed.org".to_string()
}

fn default_macro_series() -> BTreeMap<String, String> {
    [
        ("CPIAUCSL", "cpi"),
        ("UNRATE", "unemployment_rate"),
        ("FEDFUNDS", "fed_funds_rate"),
        ("DGS10", "10y_treasury_yield"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_macro_start() -> String {
    "2000-01-01".to_string()
}

impl Default for MacroDataConfig {
    fn default() -> Self {
        Self {
            base_url: default_macro_url(),
            api_key: None,
            series: default_macro_series(),
            start_date: default_macro_start(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub sheet: Option<SheetConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Spreadsheet append endpoint (web-app style webhook)
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    pub webhook_url: String,
    #[serde(default = "default_models_sheet")]
    pub models_sheet: String,
    #[serde(default = "default_predictions_sheet")]
    pub predictions_sheet: String,
}

fn default_models_sheet() -> String {
    "Models".to_string()
}

fn default_predictions_sheet() -> String {
    "Predictions".to_string()
}

/// HTTP mail relay
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_subject() -> String {
    "Trend prediction report".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Load from a TOML file (missing file falls back to defaults) plus environment
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TREND")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("features.lag_days")
                    .with_list_parse_key("features.ma_periods")
                    .with_list_parse_key("features.volatility_tickers")
                    .with_list_parse_key("batch.common_features")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.database.path = shellexpand::tilde(&config.database.path).into_owned();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the builders or trainer misbehave
    pub fn validate(&self) -> Result<()> {
        if self.target.horizon == 0 {
            return Err(PipelineError::Config("target.horizon must be > 0".into()));
        }
        if !(self.target.threshold.is_finite() && self.target.threshold > 0.0) {
            return Err(PipelineError::Config(format!(
                "target.threshold must be > 0, got {}",
                self.target.threshold
            )));
        }
        let f = &self.features;
        if f.lag_days.iter().chain(&f.ma_periods).any(|&w| w == 0) {
            return Err(PipelineError::Config(
                "feature windows must be positive".into(),
            ));
        }
        let periods = [
            f.rsi_period,
            f.macd_fast,
            f.macd_slow,
            f.macd_signal,
            f.bollinger_period,
            f.atr_period,
        ];
        if periods.iter().any(|&p| p == 0) {
            return Err(PipelineError::Config(
                "indicator periods must be positive".into(),
            ));
        }
        if f.macd_fast >= f.macd_slow {
            return Err(PipelineError::Config(format!(
                "features.macd_fast ({}) must be below macd_slow ({})",
                f.macd_fast, f.macd_slow
            )));
        }
        let t = &self.training;
        if !(t.test_size > 0.0 && t.test_size < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.test_size must be in (0, 1), got {}",
                t.test_size
            )));
        }
        if t.training_years == 0 {
            return Err(PipelineError::Config(
                "training.training_years must be > 0".into(),
            ));
        }
        if t.cv_splits < 2 {
            return Err(PipelineError::Config(
                "training.cv_splits must be at least 2".into(),
            ));
        }
        t.search_method.parse::<crate::ml::SearchMethod>()?;
        if self.batch.workers == 0 {
            return Err(PipelineError::Config("batch.workers must be > 0".into()));
        }
        Ok(())
    }
}
