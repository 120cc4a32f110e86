//! Rendering of pending models and predictions for each channel

use crate::storage::{PendingModel, PendingPrediction};

/// Telegram rejects messages above 4096 characters
const TELEGRAM_LIMIT: usize = 4000;

pub const MODEL_HEADER: [&str; 12] = [
    "created_at",
    "ticker_symbol",
    "company_name",
    "model_name",
    "model_version",
    "direction",
    "roc_auc",
    "precision",
    "recall",
    "f1_score",
    "accuracy",
    "hyperparameters",
];

pub const PREDICTION_HEADER: [&str; 7] = [
    "created_at",
    "ticker_symbol",
    "company_name",
    "target_date",
    "direction",
    "probability",
    "model_version",
];

/// Everything awaiting notification, loaded in one pass
#[derive(Debug, Clone, Default)]
pub struct NotificationReport {
    pub models: Vec<PendingModel>,
    pub predictions: Vec<PendingPrediction>,
}

impl NotificationReport {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.predictions.is_empty()
    }

    pub fn model_ids(&self) -> Vec<i64> {
        self.models.iter().map(|m| m.id).collect()
    }

    pub fn prediction_ids(&self) -> Vec<i64> {
        self.predictions.iter().map(|p| p.id).collect()
    }

    pub fn model_rows(&self) -> Vec<Vec<String>> {
        self.models
            .iter()
            .map(|m| {
                vec![
                    m.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    m.ticker.clone(),
                    m.company_name.clone().unwrap_or_default(),
                    m.model_name.clone(),
                    m.version.to_string(),
                    model_direction(&m.model_name).to_string(),
                    m.metrics.roc_auc.map(fmt4).unwrap_or_default(),
                    fmt4(m.metrics.precision),
                    fmt4(m.metrics.recall),
                    fmt4(m.metrics.f1_score),
                    fmt4(m.metrics.accuracy),
                    m.hyperparameters.to_string(),
                ]
            })
            .collect()
    }

    pub fn prediction_rows(&self) -> Vec<Vec<String>> {
        self.predictions
            .iter()
            .map(|p| {
                vec![
                    p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    p.ticker.clone(),
                    p.company_name.clone().unwrap_or_default(),
                    p.target_date.format("%Y-%m-%d").to_string(),
                    p.direction.clone(),
                    fmt4(p.probability),
                    p.model_version.to_string(),
                ]
            })
            .collect()
    }

    /// HTML document with one table per record kind
    pub fn to_html(&self) -> String {
        let mut body = String::from("<html><body><h2>New models</h2>");
        body.push_str(&html_table(&MODEL_HEADER, &self.model_rows()));
        body.push_str("<h2>New predictions</h2>");
        body.push_str(&html_table(&PREDICTION_HEADER, &self.prediction_rows()));
        body.push_str("</body></html>");
        body
    }

    /// Short HTML-formatted chat messages, split to fit Telegram's size limit
    pub fn to_chat_messages(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.models.is_empty() {
            lines.push(format!("🧠 <b>New models ({})</b>", self.models.len()));
            for m in &self.models {
                lines.push(format!(
                    "{} {} v{} AUC {} F1 {}",
                    escape(&display_name(&m.ticker, m.company_name.as_deref())),
                    escape(&m.model_name),
                    m.version,
                    m.metrics.roc_auc.map(fmt4).unwrap_or_else(|| "-".into()),
                    fmt4(m.metrics.f1_score),
                ));
            }
        }
        if !self.predictions.is_empty() {
            lines.push(format!(
                "📈 <b>New predictions ({})</b>",
                self.predictions.len()
            ));
            for p in &self.predictions {
                let arrow = if p.direction == "up" { "⬆️" } else { "⬇️" };
                lines.push(format!(
                    "{} {} {:.1}% by {}",
                    arrow,
                    escape(&display_name(&p.ticker, p.company_name.as_deref())),
                    p.probability * 100.0,
                    p.target_date
                ));
            }
        }

        let mut messages = Vec::new();
        let mut current = String::new();
        for line in lines {
            if !current.is_empty() && current.len() + line.len() + 1 > TELEGRAM_LIMIT {
                messages.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&line);
        }
        if !current.is_empty() {
            messages.push(current);
        }
        messages
    }
}

fn model_direction(model_name: &str) -> &'static str {
    if model_name.contains("_up_") {
        "up"
    } else {
        "down"
    }
}

fn display_name(ticker: &str, company: Option<&str>) -> String {
    match company {
        Some(name) => format!("{} ({})", ticker, name),
        None => ticker.to_string(),
    }
}

fn fmt4(v: f64) -> String {
    format!("{:.4}", v)
}

pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_table(header: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "<p>None</p>".to_string();
    }
    let mut html = String::from("<table border=\"1\"><tr>");
    for h in header {
        html.push_str(&format!("<th>{}</th>", h));
    }
    html.push_str("</tr>");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape(cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}
