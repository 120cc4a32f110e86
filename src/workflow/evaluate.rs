//! Bulk evaluation over the market list
//!
//! Every listed ticker is trained and scored in both directions without
//! persisting models; each outcome lands in `performance_log` under one run id.
//! Tickers already evaluated successfully in both directions are skipped
//! unless the run is fresh.
//!
//! Work is spread over `batch.workers` workers, each with its own database
//! handle, pulling tickers from a shared queue. Training runs on the blocking
//! pool under a per-unit deadline.

use super::data::{labelled_dataset, load_market_data};
use super::train::search_plan;
use crate::config::Config;
use crate::error::Result;
use crate::frame::Frame;
use crate::market_data::{self, MacroFeed, PriceFeed};
use crate::ml::{train_and_evaluate, SearchMethod, SearchPlan, TrainingOutcome};
use crate::storage::{Database, EvaluationRecord, EvaluationStatus, StatusCounts};
use crate::types::Direction;
use chrono::{Local, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Direction recorded for outcomes decided before any direction was trained
const NO_DIRECTION: &str = "n/a";

#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Clear the performance log before starting
    pub fresh: bool,
    pub test_mode: bool,
    pub search_method: SearchMethod,
}

/// Fetch sources used to prepare data before the run
pub struct DataSources<'a> {
    pub prices: &'a dyn PriceFeed,
    pub macro_series: Option<&'a dyn MacroFeed>,
}

#[derive(Debug, Clone)]
pub struct BulkSummary {
    pub run_id: String,
    pub counts: StatusCounts,
    pub listed: usize,
    pub already_completed: usize,
    pub evaluated: usize,
    /// Tickers whose prices were fetched only for this run and then removed
    pub cleaned_up: Vec<String>,
    pub elapsed: Duration,
}

struct Unit {
    config: Arc<Config>,
    plan: SearchPlan,
    run_id: String,
    deadline: Duration,
}

pub async fn bulk_evaluate(
    config: &Config,
    options: &BulkOptions,
    sources: Option<DataSources<'_>>,
) -> Result<BulkSummary> {
    let started = Instant::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    let db = Database::open(&config.database.path).await?;
    info!("🚀 Bulk evaluation run {}", run_id);

    if options.fresh {
        let cleared = db.clear_evaluations().await?;
        info!("Fresh run: cleared {} performance log rows", cleared);
    }

    let listed: Vec<String> = db
        .market_list()
        .await?
        .into_iter()
        .map(|e| e.ticker_symbol)
        .collect();
    if listed.is_empty() {
        warn!("market_list is empty; load it with `market-list load`");
    }

    let fetched_for_run = match sources {
        Some(sources) => prepare_data(&db, config, &listed, sources).await?,
        None => Vec::new(),
    };

    let completed = db.completed_tickers().await?;
    let queue: VecDeque<String> = listed
        .iter()
        .filter(|t| !completed.contains(*t))
        .cloned()
        .collect();
    let evaluated = queue.len();
    info!(
        "Listed {}, already completed {}, remaining {}",
        listed.len(),
        listed.len() - evaluated,
        evaluated
    );
    if options.test_mode {
        info!("Test mode: reduced search budgets");
    }

    let unit = Arc::new(Unit {
        config: Arc::new(config.clone()),
        plan: search_plan(config, options.search_method, options.test_mode),
        run_id: run_id.clone(),
        deadline: Duration::from_secs(config.batch.unit_deadline_secs),
    });
    let queue = Arc::new(Mutex::new(queue));
    let workers = config.batch.workers.max(1);

    let results: Vec<Result<StatusCounts>> = stream::iter(0..workers)
        .map(|worker_id| run_worker(worker_id, Arc::clone(&unit), Arc::clone(&queue)))
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut counts = StatusCounts::default();
    for result in results {
        match result {
            Ok(c) => counts.merge(c),
            Err(e) => error!("❌ Worker stopped: {}", e),
        }
    }

    if !fetched_for_run.is_empty() {
        let deleted = db.delete_prices(&fetched_for_run).await?;
        info!(
            "🧹 Removed {} price rows for {} tickers fetched for this run",
            deleted,
            fetched_for_run.len()
        );
    }

    let summary = BulkSummary {
        run_id,
        counts,
        listed: listed.len(),
        already_completed: listed.len() - evaluated,
        evaluated,
        cleaned_up: fetched_for_run,
        elapsed: started.elapsed(),
    };
    info!(
        "🏁 Run {} finished in {:.1} min: {} success, {} skipped, {} failed",
        summary.run_id,
        summary.elapsed.as_secs_f64() / 60.0,
        counts.success,
        counts.skipped,
        counts.failed
    );
    db.close().await;
    Ok(summary)
}

/// Fetch prices for listed tickers without stored data plus the common
/// feature tickers, then refresh macro series. Returns the listed tickers that
/// had no data beforehand.
async fn prepare_data(
    db: &Database,
    config: &Config,
    listed: &[String],
    sources: DataSources<'_>,
) -> Result<Vec<String>> {
    let existing: HashSet<String> = db.tickers_with_prices().await?.into_iter().collect();
    let missing: Vec<String> = listed
        .iter()
        .filter(|t| !existing.contains(*t))
        .cloned()
        .collect();

    let mut to_fetch = missing.clone();
    for t in &config.batch.common_features {
        if !to_fetch.contains(t) {
            to_fetch.push(t.clone());
        }
    }
    info!("📥 Preparing data for {} tickers", to_fetch.len());
    let today = Local::now().date_naive();
    market_data::update_prices(db, sources.prices, &config.market_data, &to_fetch, today).await?;

    match sources.macro_series {
        Some(feed) => {
            market_data::update_macro(db, feed, &config.macro_data).await?;
        }
        None => warn!("No macro source configured; using stored macro series"),
    }
    Ok(missing)
}

async fn run_worker(
    worker_id: usize,
    unit: Arc<Unit>,
    queue: Arc<Mutex<VecDeque<String>>>,
) -> Result<StatusCounts> {
    let db = Database::connect_with(&unit.config.database.path, 1).await?;
    let mut counts = StatusCounts::default();
    loop {
        let next = queue.lock().await.pop_front();
        let Some(ticker) = next else { break };
        info!("[worker {}] evaluating {}", worker_id, ticker);
        for record in evaluate_ticker(&db, &unit, &ticker).await {
            counts.record(record.status);
            if let Err(e) = db.log_evaluation(&record).await {
                error!("❌ {}: could not write performance log: {}", ticker, e);
            }
        }
    }
    db.close().await;
    Ok(counts)
}

/// All log records for one ticker; never fails, failures become records
async fn evaluate_ticker(db: &Database, unit: &Unit, ticker: &str) -> Vec<EvaluationRecord> {
    let config = &unit.config;
    let common = &config.batch.common_features;
    let record = |direction: &str, status: EvaluationStatus| {
        let mut r = EvaluationRecord::new(&unit.run_id, ticker, direction, status);
        r.features = common.clone();
        r
    };

    let data = match load_market_data(db, ticker, common).await {
        Ok(d) => d,
        Err(e) => {
            error!("❌ {}: {}", ticker, e);
            return vec![record(NO_DIRECTION, EvaluationStatus::Failed).with_error(e.to_string())];
        }
    };
    if data.target.len() < config.batch.min_history_rows {
        info!(
            "⏭️ {}: {} rows of history, need {}",
            ticker,
            data.target.len(),
            config.batch.min_history_rows
        );
        return vec![record(NO_DIRECTION, EvaluationStatus::Skipped).with_error("insufficient data")];
    }

    let cfg = Arc::clone(config);
    let task = tokio::task::spawn_blocking(move || data.build_features(&cfg));
    let features = match run_with_deadline(unit.deadline, task).await {
        Ok(f) => Arc::new(f),
        Err(message) => {
            error!("❌ {}: feature build failed: {}", ticker, message);
            return vec![record(NO_DIRECTION, EvaluationStatus::Failed).with_error(message)];
        }
    };

    let mut records = Vec::with_capacity(Direction::ALL.len());
    for direction in Direction::ALL {
        let base = record(direction.as_str(), EvaluationStatus::Success);
        records.push(evaluate_direction(unit, ticker, direction, Arc::clone(&features), base).await);
    }
    records
}

/// Await a blocking task under `deadline`, flattening every failure to a message.
///
/// A timed-out task keeps running on the blocking pool; its result is dropped.
async fn run_with_deadline<T>(
    deadline: Duration,
    task: tokio::task::JoinHandle<Result<T>>,
) -> std::result::Result<T, String> {
    match tokio::time::timeout(deadline, task).await {
        Err(_) => Err("deadline exceeded".to_string()),
        Ok(Err(join)) => Err(join.to_string()),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

enum UnitOutcome {
    Trained {
        outcome: TrainingOutcome,
        period: Option<(NaiveDate, NaiveDate)>,
        rows: usize,
    },
    Skipped {
        reason: String,
        period: Option<(NaiveDate, NaiveDate)>,
    },
}

async fn evaluate_direction(
    unit: &Unit,
    ticker: &str,
    direction: Direction,
    features: Arc<Frame>,
    mut record: EvaluationRecord,
) -> EvaluationRecord {
    let config = Arc::clone(&unit.config);
    let min_rows = config.batch.min_training_rows;
    let plan = unit.plan.clone();

    let task = tokio::task::spawn_blocking(move || -> Result<UnitOutcome> {
        if features.is_empty() {
            return Ok(UnitOutcome::Skipped {
                reason: "no data after feature creation".to_string(),
                period: None,
            });
        }
        let (dataset, _label) = labelled_dataset(&features, &config, direction)?;
        let period = match (dataset.train_dates.first(), dataset.test_dates.last()) {
            (Some(s), Some(e)) => Some((*s, *e)),
            _ => None,
        };
        if dataset.len() < min_rows || !dataset.has_both_classes() {
            return Ok(UnitOutcome::Skipped {
                reason: format!(
                    "insufficient training data or single class ({} rows)",
                    dataset.len()
                ),
                period,
            });
        }
        let outcome = train_and_evaluate(&dataset, &plan)?;
        Ok(UnitOutcome::Trained {
            outcome,
            period,
            rows: dataset.len(),
        })
    });

    match run_with_deadline(unit.deadline, task).await {
        Err(message) => {
            error!("❌ {} {}: {}", ticker, direction, message);
            record.status = EvaluationStatus::Failed;
            record.with_error(message)
        }
        Ok(UnitOutcome::Skipped { reason, period }) => {
            info!("⏭️ {} {}: {}", ticker, direction, reason);
            record.status = EvaluationStatus::Skipped;
            record.training_period = period;
            record.with_error(reason)
        }
        Ok(UnitOutcome::Trained {
            outcome,
            period,
            rows,
        }) => {
            info!(
                "✅ {} {}: AUC {} F1 {:.4}",
                ticker,
                direction,
                outcome
                    .metrics
                    .roc_auc
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "n/a".into()),
                outcome.metrics.f1_score
            );
            record.evaluated_at = Utc::now();
            record.metrics = Some(outcome.metrics);
            record.cv_score = outcome.cv_score;
            record.training_rows = Some(rows as i64);
            record.training_period = period;
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn test_slow_task_misses_deadline() {
        let task = tokio::task::spawn_blocking(|| -> Result<u32> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(1)
        });
        let err = run_with_deadline(Duration::from_millis(10), task)
            .await
            .unwrap_err();
        assert_eq!(err, "deadline exceeded");
    }

    #[tokio::test]
    async fn test_task_result_and_error_pass_through() {
        let ok = tokio::task::spawn_blocking(|| -> Result<u32> { Ok(7) });
        assert_eq!(run_with_deadline(Duration::from_secs(5), ok).await, Ok(7));

        let failing = tokio::task::spawn_blocking(|| -> Result<u32> {
            Err(PipelineError::Data("no rows".into()))
        });
        let err = run_with_deadline(Duration::from_secs(5), failing)
            .await
            .unwrap_err();
        assert!(err.contains("no rows"));
    }
}
