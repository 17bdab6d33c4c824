//! Shared types for the lead processing pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::lead::{LeadId, LeadStatus};

/// Terminal result of one lead's processing attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LeadOutcome {
    pub lead_id: LeadId,
    pub company: String,
    pub status: LeadStatus,
    /// Human-readable one-liner for the display surface.
    pub summary: String,
}

/// Aggregate counts per terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchCounts {
    pub fn record(&mut self, status: LeadStatus) {
        match status {
            LeadStatus::Sent => self.sent += 1,
            LeadStatus::Failed => self.failed += 1,
            LeadStatus::Skipped => self.skipped += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> usize {
        self.sent + self.failed + self.skipped
    }
}

/// Result of one batch run, returned to the display surface.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub outcomes: Vec<LeadOutcome>,
    pub counts: BatchCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Whether the run was cut short by a cancellation request.
    pub cancelled: bool,
}

/// Live event stream of stage transitions for the display surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    BatchStarted {
        batch_id: Uuid,
        total: usize,
    },
    StatusChanged {
        lead_id: LeadId,
        company: String,
        status: LeadStatus,
    },
    LeadFinished {
        lead_id: LeadId,
        status: LeadStatus,
        summary: String,
    },
    BatchCancelled {
        batch_id: Uuid,
        remaining: usize,
    },
    BatchFinished {
        batch_id: Uuid,
        counts: BatchCounts,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_record_terminal_statuses() {
        let mut counts = BatchCounts::default();
        counts.record(LeadStatus::Sent);
        counts.record(LeadStatus::Sent);
        counts.record(LeadStatus::Failed);
        counts.record(LeadStatus::Skipped);
        // Non-terminal statuses are ignored.
        counts.record(LeadStatus::Analyzing);

        assert_eq!(counts.sent, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn events_serialize_tagged() {
        let event = PipelineEvent::StatusChanged {
            lead_id: LeadId::new("row:2"),
            company: "Acme".into(),
            status: LeadStatus::Analyzing,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["status"], "analyzing");
        assert_eq!(json["company"], "Acme");
    }
}
