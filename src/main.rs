//! Stock Trend Predictor
//!
//! Command-line entry point for data updates, training, prediction and
//! bulk evaluation.

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trend_predictor::{
    config::Config,
    market_data::{self, FredClient, MacroFeed, YahooClient},
    ml::{GradientBoostedClassifier, SearchMethod},
    notify::{NotificationService, NotifyOutcome},
    storage::{migrations, Database},
    types::{model_name, Direction},
    workflow::{self, BacktestRequest, BulkOptions, DataSources, TrainOptions},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "trend-predictor")]
#[command(about = "Stock trend prediction with gradient-boosted trees")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Verify the schema and show table sizes
    CheckDb,
    /// Manage registered target tickers
    Tickers {
        #[command(subcommand)]
        action: TickerAction,
    },
    /// Manage the bulk evaluation universe
    MarketList {
        #[command(subcommand)]
        action: MarketListAction,
    },
    /// Fetch daily prices (defaults to every target and feature ticker)
    UpdatePrices {
        tickers: Vec<String>,
    },
    /// Fetch configured macroeconomic series
    UpdateMacro,
    /// Train and save a model
    Train {
        ticker: String,
        /// up or down; both when omitted
        #[arg(short, long)]
        direction: Option<Direction>,
        /// none, grid, random or broad (defaults to training.search_method)
        #[arg(short, long)]
        search: Option<String>,
        /// Reduced search budgets
        #[arg(long)]
        test_mode: bool,
        /// Evaluate without saving
        #[arg(long)]
        no_save: bool,
    },
    /// Predict with the latest (or a given) model version
    Predict {
        ticker: String,
        #[arg(short, long, default_value = "up")]
        direction: Direction,
        #[arg(long)]
        version: Option<i64>,
    },
    /// Predict every target ticker in both directions
    PredictAll {
        /// Directory for the CSV export
        #[arg(short, long, default_value = "predictions")]
        output_dir: PathBuf,
    },
    /// Re-score a stored model on recent data
    Evaluate {
        ticker: String,
        #[arg(short, long, default_value = "up")]
        direction: Direction,
        #[arg(long)]
        version: Option<i64>,
    },
    /// Evaluate every ticker in the market list
    BulkEvaluate {
        /// Clear previous results first
        #[arg(long)]
        fresh: bool,
        #[arg(long)]
        test_mode: bool,
        #[arg(short, long)]
        search: Option<String>,
        /// Use stored data only
        #[arg(long)]
        no_fetch: bool,
    },
    /// Train up to one date and test from another
    Backtest {
        ticker: String,
        #[arg(long)]
        train_end: NaiveDate,
        #[arg(long)]
        test_start: NaiveDate,
        #[arg(short, long, default_value = "up")]
        direction: Direction,
        /// Random search instead of defaults
        #[arg(long)]
        tune: bool,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        horizon: Option<usize>,
        /// Feature tickers overriding the registered ones
        #[arg(long, value_delimiter = ',')]
        features: Option<Vec<String>>,
    },
    /// Inspect stored models
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Send pending models and predictions to the configured channels
    Notify,
}

#[derive(Subcommand)]
enum TickerAction {
    List,
    Add {
        ticker: String,
        /// Comma-separated auxiliary tickers
        #[arg(short, long, value_delimiter = ',')]
        features: Vec<String>,
    },
    Remove {
        ticker: String,
    },
}

#[derive(Subcommand)]
enum MarketListAction {
    /// Replace the list from the exchange listing CSV
    Load {
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    List {
        ticker: Option<String>,
    },
    Info {
        ticker: String,
        #[arg(short, long, default_value = "up")]
        direction: Direction,
        #[arg(long)]
        version: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Migrate => migrate(&config).await,
        Commands::CheckDb => check_db(&config).await,
        Commands::Tickers { action } => tickers(&config, action).await,
        Commands::MarketList {
            action: MarketListAction::Load { path },
        } => {
            let db = Database::open(&config.database.path).await?;
            let n = workflow::load_market_list(&db, &path, Local::now().date_naive()).await?;
            println!("Loaded {} tickers", n);
            Ok(())
        }
        Commands::UpdatePrices { tickers } => update_prices(&config, tickers).await,
        Commands::UpdateMacro => update_macro(&config).await,
        Commands::Train {
            ticker,
            direction,
            search,
            test_mode,
            no_save,
        } => {
            let mut options = TrainOptions::from_config(&config)?;
            if let Some(s) = search {
                options.search_method = s.parse()?;
            }
            options.test_mode = test_mode;
            options.save = !no_save;
            train(&config, &ticker, direction, &options).await
        }
        Commands::Predict {
            ticker,
            direction,
            version,
        } => {
            let db = Database::open(&config.database.path).await?;
            let r = workflow::predict_ticker(&db, &config, &ticker, direction, version).await?;
            println!(
                "{} {}: {:.2}% chance by {} (model {} v{}, data to {})",
                r.ticker,
                r.direction,
                r.probability * 100.0,
                r.target_date,
                r.model_name,
                r.model_version,
                r.base_date
            );
            Ok(())
        }
        Commands::PredictAll { output_dir } => {
            let db = Database::open(&config.database.path).await?;
            let summary = workflow::predict_all(&db, &config, &output_dir).await?;
            for r in &summary.results {
                println!(
                    "{:<10} {:<5} {:>6.2}%  {}",
                    r.ticker,
                    r.direction,
                    r.probability * 100.0,
                    r.target_date
                );
            }
            for (ticker, direction, reason) in &summary.failures {
                println!("{:<10} {:<5} failed: {}", ticker, direction, reason);
            }
            if let Some(path) = summary.csv_path {
                println!("Saved to {}", path.display());
            }
            Ok(())
        }
        Commands::Evaluate {
            ticker,
            direction,
            version,
        } => evaluate(&config, &ticker, direction, version).await,
        Commands::BulkEvaluate {
            fresh,
            test_mode,
            search,
            no_fetch,
        } => {
            let search_method: SearchMethod = match search {
                Some(s) => s.parse()?,
                None => config.training.search_method.parse()?,
            };
            let options = BulkOptions {
                fresh,
                test_mode,
                search_method,
            };
            bulk_evaluate(&config, &options, no_fetch).await
        }
        Commands::Backtest {
            ticker,
            train_end,
            test_start,
            direction,
            tune,
            threshold,
            horizon,
            features,
        } => {
            let request = BacktestRequest {
                ticker,
                feature_tickers: features,
                train_end,
                test_start,
                tune,
                direction,
                threshold: threshold.unwrap_or(config.target.threshold),
                horizon: horizon.unwrap_or(config.target.horizon),
            };
            let db = Database::open(&config.database.path).await?;
            let report = workflow::backtest(&db, &config, &request).await?;
            let m = &report.outcome.metrics;
            println!(
                "Train rows {}, test rows {} ({} to {})",
                report.train_rows, report.test_rows, report.test_period.0, report.test_period.1
            );
            println!(
                "Accuracy {:.4}  Precision {:.4}  Recall {:.4}  F1 {:.4}  AUC {}",
                m.accuracy,
                m.precision,
                m.recall,
                m.f1_score,
                fmt_auc(m.roc_auc)
            );
            println!("{}", report.outcome.confusion);
            Ok(())
        }
        Commands::Models { action } => models(&config, action).await,
        Commands::Notify => {
            let db = Database::open(&config.database.path).await?;
            let service = NotificationService::from_config(&config.notify)?;
            match service.send_pending(&db).await? {
                NotifyOutcome::NothingPending => println!("Nothing to notify"),
                NotifyOutcome::Flagged {
                    models,
                    predictions,
                } => println!("Notified {} models and {} predictions", models, predictions),
                NotifyOutcome::Withheld { reason } => println!("Not sent: {}", reason),
            }
            Ok(())
        }
    }
}

fn fmt_auc(auc: Option<f64>) -> String {
    auc.map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

async fn migrate(config: &Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let applied = db.migrate().await?;
    if applied.is_empty() {
        println!("Schema is current (version {})", migrations::latest_version());
    } else {
        println!("Applied migrations {:?}", applied);
    }
    Ok(())
}

async fn check_db(config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)
        .await
        .context("schema check failed; run `trend-predictor migrate`")?;
    println!("Schema version {}", db.schema_version().await?);
    for table in migrations::TABLES {
        println!("{:<20} {:>10}", table, db.table_count(table).await?);
    }
    Ok(())
}

async fn tickers(config: &Config, action: TickerAction) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    match action {
        TickerAction::List => {
            for t in db.list_target_tickers().await? {
                println!("{:<10} {}", t.ticker_symbol, t.features);
            }
        }
        TickerAction::Add { ticker, features } => {
            db.upsert_target_ticker(&ticker, &features).await?;
            println!("Registered {} with features {:?}", ticker, features);
        }
        TickerAction::Remove { ticker } => {
            if db.remove_target_ticker(&ticker).await? {
                println!("Removed {}", ticker);
            } else {
                println!("{} was not registered", ticker);
            }
        }
    }
    Ok(())
}

async fn update_prices(config: &Config, tickers: Vec<String>) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let tickers = if tickers.is_empty() {
        let mut all = Vec::new();
        for t in db.list_target_tickers().await? {
            for name in std::iter::once(t.ticker_symbol.clone()).chain(t.feature_tickers()) {
                if !all.contains(&name) {
                    all.push(name);
                }
            }
        }
        all
    } else {
        tickers
    };
    if tickers.is_empty() {
        println!("No tickers to update; register one with `tickers add`");
        return Ok(());
    }
    let feed = YahooClient::new(&config.market_data.base_url)?;
    let summary = market_data::update_prices(
        &db,
        &feed,
        &config.market_data,
        &tickers,
        Local::now().date_naive(),
    )
    .await?;
    println!(
        "Updated {} tickers ({} rows), {} empty, {} failed",
        summary.updated.len(),
        summary.rows,
        summary.empty.len(),
        summary.failed.len()
    );
    Ok(())
}

async fn update_macro(config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let feed = FredClient::new(
        &config.macro_data.base_url,
        config.macro_data.api_key.as_deref(),
    )?;
    let summary = market_data::update_macro(&db, &feed, &config.macro_data).await?;
    println!(
        "Updated {} series ({} rows), {} failed",
        summary.updated.len(),
        summary.rows,
        summary.failed.len()
    );
    Ok(())
}

async fn train(
    config: &Config,
    ticker: &str,
    direction: Option<Direction>,
    options: &TrainOptions,
) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let directions = match direction {
        Some(d) => vec![d],
        None => Direction::ALL.to_vec(),
    };
    for direction in directions {
        let report = workflow::train_ticker(&db, config, ticker, direction, options).await?;
        let m = &report.outcome.metrics;
        println!(
            "{} {}: {} rows, F1 {:.4}, AUC {}{}",
            ticker,
            report.model_name,
            report.rows,
            m.f1_score,
            fmt_auc(m.roc_auc),
            report
                .version
                .map(|v| format!(", saved as version {}", v))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn evaluate(
    config: &Config,
    ticker: &str,
    direction: Direction,
    version: Option<i64>,
) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    let e = workflow::evaluate_model(&db, config, ticker, direction, version).await?;
    println!("{} v{} on {} recent rows", e.model_name, e.version, e.test_rows);
    println!(
        "{:<10} {:>8} {:>8}",
        "metric", "stored", "current"
    );
    let rows = [
        ("accuracy", e.stored_metrics.accuracy, e.metrics.accuracy),
        ("precision", e.stored_metrics.precision, e.metrics.precision),
        ("recall", e.stored_metrics.recall, e.metrics.recall),
        ("f1", e.stored_metrics.f1_score, e.metrics.f1_score),
    ];
    for (name, stored, current) in rows {
        println!("{:<10} {:>8.4} {:>8.4}", name, stored, current);
    }
    println!(
        "{:<10} {:>8} {:>8}",
        "roc_auc",
        fmt_auc(e.stored_metrics.roc_auc),
        fmt_auc(e.metrics.roc_auc)
    );
    println!("{}", e.confusion);
    println!("Top features:");
    for (name, importance) in e.importances.iter().take(10) {
        println!("  {:<28} {:.4}", name, importance);
    }
    Ok(())
}

async fn bulk_evaluate(config: &Config, options: &BulkOptions, no_fetch: bool) -> anyhow::Result<()> {
    let summary = if no_fetch {
        workflow::bulk_evaluate(config, options, None).await?
    } else {
        let prices = YahooClient::new(&config.market_data.base_url)?;
        let fred = match FredClient::new(
            &config.macro_data.base_url,
            config.macro_data.api_key.as_deref(),
        ) {
            Ok(feed) => Some(feed),
            Err(e) => {
                tracing::warn!("Macro source unavailable: {}", e);
                None
            }
        };
        let sources = DataSources {
            prices: &prices,
            macro_series: fred.as_ref().map(|f| f as &dyn MacroFeed),
        };
        workflow::bulk_evaluate(config, options, Some(sources)).await?
    };
    println!(
        "Run {}: {} listed, {} already done, {} evaluated",
        summary.run_id, summary.listed, summary.already_completed, summary.evaluated
    );
    println!(
        "success {}  skipped {}  failed {}  ({:.1} min)",
        summary.counts.success,
        summary.counts.skipped,
        summary.counts.failed,
        summary.elapsed.as_secs_f64() / 60.0
    );
    Ok(())
}

async fn models(config: &Config, action: ModelAction) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path).await?;
    match action {
        ModelAction::List { ticker } => {
            for m in db.list_models(ticker.as_deref()).await? {
                println!(
                    "{:<10} {:<22} v{:<3} F1 {:.4} AUC {:<6} {}",
                    m.ticker,
                    m.model_name,
                    m.version,
                    m.performance_metrics.f1_score,
                    fmt_auc(m.performance_metrics.roc_auc),
                    m.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ModelAction::Info {
            ticker,
            direction,
            version,
        } => {
            let name = model_name(config.target.horizon, direction, config.target.threshold);
            let record = db
                .load_model(&ticker, &name, version)
                .await?
                .with_context(|| format!("no model {} for {}", name, ticker))?;
            println!("{} {} v{} ({})", record.ticker, record.model_name, record.version, record.created_at);
            println!("Metrics: {}", serde_json::to_string_pretty(&record.performance_metrics)?);
            println!("Hyperparameters: {}", serde_json::to_string_pretty(&record.hyperparameters)?);
            println!("Features ({}): {}", record.feature_list.len(), record.feature_list.join(", "));
            let model = GradientBoostedClassifier::from_bytes(&record.model_blob)?;
            println!("Top features by importance:");
            for (feature, importance) in model.ranked_importances(&record.feature_list).iter().take(20) {
                println!("  {:<28} {:.4}", feature, importance);
            }
            if let Some(notes) = record.notes {
                println!("Notes: {}", notes);
            }
        }
    }
    Ok(())
}
