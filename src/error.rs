//! Error types for ABM Outreach.

use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Lead store errors (spreadsheet backend).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Fetch of pending leads failed: {0}")]
    FetchFailed(String),

    #[error("Write failed for lead {id}: {reason}")]
    WriteFailed { id: String, reason: String },

    #[error("Lead {0} not found in backing store")]
    RowNotFound(String),

    #[error("Malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model {model} call timed out after {timeout:?}")]
    Timeout { model: String, timeout: Duration },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry of the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::RequestFailed { .. }
        )
    }
}

/// Pipeline stage errors. Each variant maps a lead to `Failed` with the
/// message recorded in its notes trail.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Value proposition generation failed: {0}")]
    Generation(String),

    #[error("Personalization failed: {0}")]
    Personalization(String),
}

impl StageError {
    /// Short label for logging and notes.
    pub fn stage(&self) -> &'static str {
        match self {
            StageError::Analysis(_) => "analysis",
            StageError::Generation(_) => "generation",
            StageError::Personalization(_) => "personalization",
        }
    }
}

/// Per-channel delivery errors. Caught by the dispatcher and folded into a
/// `DeliveryOutcome::Failed` — one channel's outage never reaches a sibling
/// channel or the batch.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Send on {channel} failed: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Invalid {channel} target {target}: {reason}")]
    InvalidTarget {
        channel: String,
        target: String,
        reason: String,
    },

    #[error("{channel} send timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
