//! Email delivery — SMTP via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::delivery::EmailTransport;
use crate::error::DeliveryError;

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OUTREACH_SMTP_HOST` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("OUTREACH_SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("OUTREACH_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("OUTREACH_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("OUTREACH_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("OUTREACH_FROM_EMAIL").unwrap_or_else(|_| username.clone());

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}

/// SMTP email transport.
///
/// lettre's blocking `SmtpTransport` runs inside `spawn_blocking` so a slow
/// relay never stalls the pipeline's executor.
pub struct SmtpEmailTransport {
    config: SmtpConfig,
}

impl SmtpEmailTransport {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let config = self.config.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();

        tokio::task::spawn_blocking(move || send_blocking(&config, &to, &subject, &body))
            .await
            .map_err(|e| DeliveryError::SendFailed {
                channel: "email".into(),
                reason: format!("send task failed: {e}"),
            })?
    }
}

fn send_blocking(
    config: &SmtpConfig,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<(), DeliveryError> {
    let from = config
        .from_address
        .parse()
        .map_err(|e| DeliveryError::InvalidTarget {
            channel: "email".into(),
            target: config.from_address.clone(),
            reason: format!("invalid from address: {e}"),
        })?;

    let to_mailbox = to.parse().map_err(|e| DeliveryError::InvalidTarget {
        channel: "email".into(),
        target: to.to_string(),
        reason: format!("invalid to address: {e}"),
    })?;

    let email = Message::builder()
        .from(from)
        .to(to_mailbox)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| DeliveryError::SendFailed {
            channel: "email".into(),
            reason: format!("failed to build email: {e}"),
        })?;

    let creds = Credentials::new(config.username.clone(), config.password.clone());

    let transport = SmtpTransport::relay(&config.smtp_host)
        .map_err(|e| DeliveryError::SendFailed {
            channel: "email".into(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport
        .send(&email)
        .map(|_| ())
        .map_err(|e| DeliveryError::SendFailed {
            channel: "email".into(),
            reason: format!("SMTP send error: {e}"),
        })
}
