//! Lead records and the per-lead status state machine.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::delivery::Channel;

/// Opaque reference to a row in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(String);

impl LeadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Processing status of a lead.
///
/// Transitions are monotonic within one processing attempt:
/// `Pending → Analyzing → Generating → Personalizing → Sending → {Sent, Failed}`.
/// `Skipped` is reachable only from `Pending`. `Sent`, `Failed`, and `Skipped`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Analyzing,
    Generating,
    Personalizing,
    Sending,
    Sent,
    Failed,
    Skipped,
}

impl LeadStatus {
    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(self, next: LeadStatus) -> bool {
        use LeadStatus::*;
        match (self, next) {
            (Pending, Analyzing) | (Pending, Skipped) => true,
            (Analyzing, Generating) => true,
            (Generating, Personalizing) => true,
            (Personalizing, Sending) => true,
            (Sending, Sent) => true,
            // Any working state may fail.
            (Pending | Analyzing | Generating | Personalizing | Sending, Failed) => true,
            _ => false,
        }
    }

    /// Terminal statuses are never re-fetched as pending.
    pub fn is_terminal(self) -> bool {
        matches!(self, LeadStatus::Sent | LeadStatus::Failed | LeadStatus::Skipped)
    }

    /// Canonical string written to the STATUS column.
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Pending => "Pending",
            LeadStatus::Analyzing => "Analyzing",
            LeadStatus::Generating => "Generating",
            LeadStatus::Personalizing => "Personalizing",
            LeadStatus::Sending => "Sending",
            LeadStatus::Sent => "Sent",
            LeadStatus::Failed => "Failed",
            LeadStatus::Skipped => "Skipped",
        }
    }

    /// Parse a STATUS cell. An empty cell means the lead was never touched.
    pub fn parse(s: &str) -> LeadStatus {
        match s.trim() {
            "" | "Pending" => LeadStatus::Pending,
            "Analyzing" => LeadStatus::Analyzing,
            "Generating" => LeadStatus::Generating,
            "Personalizing" => LeadStatus::Personalizing,
            "Sending" => LeadStatus::Sending,
            "Sent" => LeadStatus::Sent,
            "Skipped" => LeadStatus::Skipped,
            _ => LeadStatus::Failed,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only diagnostic trail for one processing attempt.
///
/// Stages append entries; nothing is ever overwritten. Rendered into the
/// single NOTES cell with ` | ` separators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notes(Vec<String>);

impl Notes {
    pub fn from_cell(cell: &str) -> Self {
        let entries = cell
            .split(" | ")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self(entries)
    }

    pub fn append(&mut self, entry: impl Into<String>) {
        self.0.push(entry.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn render(&self) -> String {
        self.0.join(" | ")
    }
}

/// One prospect row from the backing store.
///
/// Created by the store adapter; the orchestrator only ever writes status and
/// notes back. `created_at` and `source` are immutable provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: LeadId,
    pub contact_person: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: String,
    pub status: LeadStatus,
    pub notes: Notes,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub source: String,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap())
}

impl LeadRecord {
    /// Channels this lead can be reached on.
    ///
    /// An email that fails the format check counts as absent; the caller is
    /// expected to note why. Phone only needs to be non-empty — normalization
    /// happens in the SMS transport.
    pub fn deliverable_channels(&self) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(2);
        if self.has_valid_email() {
            channels.push(Channel::Email);
        }
        if self.phone.as_deref().is_some_and(|p| !p.trim().is_empty()) {
            channels.push(Channel::Sms);
        }
        channels
    }

    /// Whether the email field is present and plausibly formatted.
    pub fn has_valid_email(&self) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| email_regex().is_match(e.trim()))
    }

    /// Whether an email field is present but unusable (bad format).
    pub fn has_malformed_email(&self) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty() && !email_regex().is_match(e.trim()))
    }

    /// Sort a batch into processing order: descending priority, then
    /// ascending creation time. The sort is stable, so equal-priority leads
    /// with equal timestamps keep their fetch order.
    pub fn order_batch(leads: &mut [LeadRecord]) {
        leads.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
    }
}
