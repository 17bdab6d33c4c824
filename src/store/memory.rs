//! In-memory lead store for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::lead::{LeadId, LeadRecord, LeadStatus};
use crate::store::LeadStore;

/// In-memory `LeadStore`.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: Mutex<Vec<LeadRecord>>,
}

impl MemoryLeadStore {
    pub fn new(leads: Vec<LeadRecord>) -> Self {
        Self {
            leads: Mutex::new(leads),
        }
    }

    /// Snapshot of all records (assertions in tests).
    pub async fn records(&self) -> Vec<LeadRecord> {
        self.leads.lock().await.clone()
    }

    /// Look up one record by id.
    pub async fn get(&self, id: &LeadId) -> Option<LeadRecord> {
        self.leads.lock().await.iter().find(|l| &l.id == id).cloned()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn fetch_pending(&self) -> Result<Vec<LeadRecord>, StoreError> {
        let leads = self.leads.lock().await;
        let mut pending: Vec<LeadRecord> = leads
            .iter()
            .filter(|l| l.status == LeadStatus::Pending)
            .cloned()
            .collect();
        LeadRecord::order_batch(&mut pending);
        Ok(pending)
    }

    async fn update(
        &self,
        id: &LeadId,
        status: LeadStatus,
        notes: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut leads = self.leads.lock().await;
        let lead = leads
            .iter_mut()
            .find(|l| &l.id == id)
            .ok_or_else(|| StoreError::RowNotFound(id.to_string()))?;
        lead.status = status;
        lead.notes = crate::lead::Notes::from_cell(notes);
        lead.last_updated = last_updated;
        Ok(())
    }
}
