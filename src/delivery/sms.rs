//! SMS delivery — Textfully HTTP API via reqwest.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::delivery::SmsTransport;
use crate::error::DeliveryError;

const TEXTFULLY_API_URL: &str = "https://api.textfully.com/v1/messages";

/// SMS API configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SmsApiConfig {
    pub api_key: SecretString,
    pub sender_id: String,
}

impl SmsApiConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OUTREACH_SMS_API_KEY` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OUTREACH_SMS_API_KEY").ok()?;
        let sender_id =
            std::env::var("OUTREACH_SMS_SENDER_ID").unwrap_or_else(|_| "ABM Outreach".to_string());
        Some(Self {
            api_key: SecretString::from(api_key),
            sender_id,
        })
    }
}

/// Textfully SMS transport.
pub struct TextfullySmsTransport {
    config: SmsApiConfig,
    client: reqwest::Client,
}

impl TextfullySmsTransport {
    pub fn new(config: SmsApiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SmsTransport for TextfullySmsTransport {
    async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError> {
        let number = normalize_phone(to)?;

        let payload = serde_json::json!({
            "to": number,
            "message": body,
            "from": self.config.sender_id,
        });

        let response = self
            .client
            .post(TEXTFULLY_API_URL)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::SendFailed {
                channel: "sms".into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::SendFailed {
                channel: "sms".into(),
                reason: format!("API returned {status}: {error_body}"),
            });
        }

        Ok(())
    }
}

/// Normalize a phone number: strip separators, require a leading `+` and a
/// plausible digit count.
fn normalize_phone(raw: &str) -> Result<String, DeliveryError> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let digits = stripped.strip_prefix('+').unwrap_or(&stripped);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DeliveryError::InvalidTarget {
            channel: "sms".into(),
            target: raw.to_string(),
            reason: "not a phone number".into(),
        });
    }
    if !(7..=15).contains(&digits.len()) {
        return Err(DeliveryError::InvalidTarget {
            channel: "sms".into(),
            target: raw.to_string(),
            reason: format!("implausible digit count ({})", digits.len()),
        });
    }

    Ok(format!("+{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_adds_plus() {
        assert_eq!(normalize_phone("555 123-4567").unwrap(), "+5551234567");
        assert_eq!(normalize_phone("(555) 123.4567").unwrap(), "+5551234567");
    }

    #[test]
    fn keeps_existing_plus() {
        assert_eq!(normalize_phone("+44 20 7946 0958").unwrap(), "+442079460958");
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(matches!(
            normalize_phone("call me maybe"),
            Err(DeliveryError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn rejects_implausible_lengths() {
        assert!(normalize_phone("+123").is_err());
        assert!(normalize_phone("+1234567890123456789").is_err());
    }
}
