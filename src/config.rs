//! Configuration types.
//!
//! Built once from the environment in `main` and passed into constructors as
//! an immutable value — the pipeline never reads ambient process state, so
//! tests inject fakes freely.

use std::time::Duration;

use secrecy::SecretString;

use crate::delivery::{SmsApiConfig, SmtpConfig};
use crate::error::ConfigError;
use crate::llm::{LlmBackend, ModelTiers};
use crate::store::SheetsConfig;

/// Independent timeouts for each class of external call.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Per-attempt inference call timeout.
    pub inference: Duration,
    /// Store read/write timeout.
    pub store: Duration,
    /// Per-channel delivery timeout.
    pub delivery: Duration,
    /// Website content fetch timeout.
    pub fetch: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            inference: Duration::from_secs(30),
            store: Duration::from_secs(15),
            delivery: Duration::from_secs(15),
            fetch: Duration::from_secs(10),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// LLM backend all stage tiers run against.
    pub backend: LlmBackend,
    /// API key for the backend.
    pub llm_api_key: SecretString,
    /// Model identifier per stage.
    pub models: ModelTiers,
    /// Lead store; `None` means no store configured (dry runs only).
    pub sheets: Option<SheetsConfig>,
    /// Email transport; `None` disables the channel.
    pub smtp: Option<SmtpConfig>,
    /// SMS transport; `None` disables the channel.
    pub sms: Option<SmsApiConfig>,
    /// Hard cap on generated SMS bodies.
    pub sms_max_length: usize,
    pub timeouts: Timeouts,
    /// Maximum leads processed per batch.
    pub batch_size: usize,
    /// Operator surface port.
    pub surface_port: u16,
}

impl AppConfig {
    /// Build configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_name =
            std::env::var("OUTREACH_LLM_BACKEND").unwrap_or_else(|_| "anthropic".to_string());
        let backend =
            LlmBackend::parse(&backend_name).ok_or_else(|| ConfigError::InvalidValue {
                key: "OUTREACH_LLM_BACKEND".into(),
                message: format!("unknown backend '{backend_name}'"),
            })?;

        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let llm_api_key = std::env::var(key_var)
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.into()))?;

        let generation = std::env::var("OUTREACH_MODEL_GENERATION")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
        let models = ModelTiers {
            analysis: std::env::var("OUTREACH_MODEL_ANALYSIS")
                .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
            personalization: std::env::var("OUTREACH_MODEL_PERSONALIZATION")
                .unwrap_or_else(|_| generation.clone()),
            generation,
        };

        Ok(Self {
            backend,
            llm_api_key,
            models,
            sheets: SheetsConfig::from_env(),
            smtp: SmtpConfig::from_env(),
            sms: SmsApiConfig::from_env(),
            sms_max_length: parse_env("OUTREACH_SMS_MAX_LENGTH", 160)?,
            timeouts: Timeouts {
                inference: Duration::from_secs(parse_env("OUTREACH_TIMEOUT_INFERENCE_SECS", 30)?),
                store: Duration::from_secs(parse_env("OUTREACH_TIMEOUT_STORE_SECS", 15)?),
                delivery: Duration::from_secs(parse_env("OUTREACH_TIMEOUT_DELIVERY_SECS", 15)?),
                fetch: Duration::from_secs(parse_env("OUTREACH_TIMEOUT_FETCH_SECS", 10)?),
            },
            batch_size: parse_env("OUTREACH_BATCH_SIZE", 10)?,
            surface_port: parse_env("OUTREACH_PORT", 8080)?,
        })
    }
}

/// Parse an optional env var, falling back to a default. A present-but-bad
/// value is a configuration error, not a silent default.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("cannot parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
