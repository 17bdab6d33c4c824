//! Lead store — fetch-pending / update-status against the backing spreadsheet.

pub mod memory;
pub mod sheets;

pub use memory::MemoryLeadStore;
pub use sheets::{SheetsConfig, SheetsLeadStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::lead::{LeadId, LeadRecord, LeadStatus};

/// Backend-agnostic lead store.
///
/// The store creates `LeadRecord`s from backing rows; the orchestrator only
/// ever writes status, notes, and the last-updated timestamp back. Leads are
/// never deleted by this subsystem.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Fetch all leads still in `Pending`, ordered by descending priority
    /// then ascending creation time.
    async fn fetch_pending(&self) -> Result<Vec<LeadRecord>, StoreError>;

    /// Persist a lead's status, rendered notes, and last-updated timestamp.
    async fn update(
        &self,
        id: &LeadId,
        status: LeadStatus,
        notes: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
