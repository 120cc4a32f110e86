//! Evaluation universe loaded from the exchange listing CSV

use crate::error::{PipelineError, Result};
use crate::storage::{Database, MarketListEntry, StockInfo};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Domestic equity segments kept from the listing
pub const DOMESTIC_SEGMENTS: [&str; 3] = [
    "プライム（内国株式）",
    "スタンダード（内国株式）",
    "グロース（内国株式）",
];

#[derive(Debug, Deserialize)]
struct ListingRow {
    #[serde(rename = "コード")]
    code: String,
    #[serde(rename = "銘柄名", default)]
    name: Option<String>,
    #[serde(rename = "市場・商品区分")]
    segment: String,
    #[serde(rename = "33業種区分", default)]
    industry: Option<String>,
}

/// Parse listing rows, keeping domestic equities as `<code>.T` tickers
pub fn parse_market_list<R: Read>(reader: R, load_date: NaiveDate) -> Result<Vec<MarketListEntry>> {
    let mut csv = csv::Reader::from_reader(reader);
    let mut entries = Vec::new();
    for row in csv.deserialize::<ListingRow>() {
        let row = row?;
        if !DOMESTIC_SEGMENTS.contains(&row.segment.as_str()) {
            continue;
        }
        let code = row.code.trim();
        if code.is_empty() {
            return Err(PipelineError::Data("listing row without a code".into()));
        }
        entries.push(MarketListEntry {
            ticker_symbol: format!("{}.T", code),
            company_name: row.name.filter(|s| !s.is_empty()),
            market_segment: Some(row.segment),
            industry: row.industry.filter(|s| !s.is_empty() && s != "-"),
            load_date,
        });
    }
    Ok(entries)
}

/// Replace `market_list` with the file's domestic equities and record their names
pub async fn load_market_list(db: &Database, path: &Path, load_date: NaiveDate) -> Result<usize> {
    let file = std::fs::File::open(path)?;
    let entries = parse_market_list(file, load_date)?;
    db.replace_market_list(&entries).await?;
    for e in &entries {
        db.upsert_stock_info(&StockInfo {
            ticker_symbol: e.ticker_symbol.clone(),
            company_name: e.company_name.clone(),
            market_segment: e.market_segment.clone(),
            industry: e.industry.clone(),
        })
        .await?;
    }
    info!(
        "📋 Loaded {} tickers from {}",
        entries.len(),
        path.display()
    );
    Ok(entries.len())
}
