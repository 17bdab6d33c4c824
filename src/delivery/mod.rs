//! Message delivery over channel-specific transports.
//!
//! Channels are independent: one call per channel per lead, and a transport
//! failure on one channel is folded into that channel's outcome without
//! touching its sibling or the batch.

pub mod email;
pub mod sms;

pub use email::{SmtpConfig, SmtpEmailTransport};
pub use sms::{SmsApiConfig, TextfullySmsTransport};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DeliveryError;
use crate::lead::LeadRecord;
use crate::stages::MessageDrafts;

/// An outreach medium with its own contact target and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Per-channel result of a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: Channel,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

/// Outbound email transport — pure I/O, no message logic.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Outbound SMS transport — pure I/O, no message logic.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Delivery dispatcher — routes drafts to transports and captures outcomes.
pub struct Dispatcher {
    email: Option<Arc<dyn EmailTransport>>,
    sms: Option<Arc<dyn SmsTransport>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        email: Option<Arc<dyn EmailTransport>>,
        sms: Option<Arc<dyn SmsTransport>>,
        timeout: Duration,
    ) -> Self {
        Self {
            email,
            sms,
            timeout,
        }
    }

    /// Deliver one channel's draft to one lead.
    ///
    /// Transport-level errors (auth, rate limit, invalid target, timeout) are
    /// mapped to `Failed(reason)` — never propagated.
    pub async fn deliver(
        &self,
        channel: Channel,
        lead: &LeadRecord,
        drafts: &MessageDrafts,
    ) -> ChannelResult {
        let outcome = match self.try_deliver(channel, lead, drafts).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::Failed {
                reason: e.to_string(),
            },
        };

        match &outcome {
            DeliveryOutcome::Delivered => {
                info!(lead = %lead.id, %channel, "Message delivered");
            }
            DeliveryOutcome::Failed { reason } => {
                warn!(lead = %lead.id, %channel, reason, "Delivery failed");
            }
        }

        ChannelResult { channel, outcome }
    }

    async fn try_deliver(
        &self,
        channel: Channel,
        lead: &LeadRecord,
        drafts: &MessageDrafts,
    ) -> Result<(), DeliveryError> {
        let send = async {
            match channel {
                Channel::Email => {
                    let transport = self.email.as_ref().ok_or_else(|| not_configured(channel))?;
                    let to = lead.email.as_deref().ok_or_else(|| no_target(channel))?;
                    let draft = drafts.email.as_ref().ok_or_else(|| no_draft(channel))?;
                    transport.send(to, &draft.subject, &draft.body).await
                }
                Channel::Sms => {
                    let transport = self.sms.as_ref().ok_or_else(|| not_configured(channel))?;
                    let to = lead.phone.as_deref().ok_or_else(|| no_target(channel))?;
                    let body = drafts.sms.as_deref().ok_or_else(|| no_draft(channel))?;
                    transport.send(to, body).await
                }
            }
        };

        match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DeliveryError::Timeout {
                channel: channel.as_str().into(),
                timeout: self.timeout,
            }),
        }
    }
}

fn not_configured(channel: Channel) -> DeliveryError {
    DeliveryError::SendFailed {
        channel: channel.as_str().into(),
        reason: "transport not configured".into(),
    }
}

fn no_target(channel: Channel) -> DeliveryError {
    DeliveryError::SendFailed {
        channel: channel.as_str().into(),
        reason: "no contact target on lead".into(),
    }
}

fn no_draft(channel: Channel) -> DeliveryError {
    DeliveryError::SendFailed {
        channel: channel.as_str().into(),
        reason: "no message body generated for this channel".into(),
    }
}
