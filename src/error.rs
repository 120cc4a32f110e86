//! Error types for the prediction pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or invalid input series
    #[error("Data error: {0}")]
    Data(String),

    /// Invalid parameters (direction, horizon, threshold, settings)
    #[error("Config error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Fetch source or notification channel failure
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking training task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Configuration-class errors (bad parameters, unreadable settings)
    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::Settings(_))
    }

    /// Errors caused by something outside the process (HTTP, channels)
    pub fn is_external(&self) -> bool {
        matches!(self, PipelineError::ExternalService(_) | PipelineError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
