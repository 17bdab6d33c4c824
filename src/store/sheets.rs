//! Google Sheets adapter — values REST API over reqwest.
//!
//! Backing columns, in order (A through J):
//! CONTACT_PERSON, CONTACT_EMAIL, CONTACT_PHONE, COMPANY, STATUS, NOTES,
//! TIMESTAMP, LAST_UPDATED, SOURCE, PRIORITY.
//!
//! Row identity is the worksheet row number, wrapped as an opaque
//! `LeadId("row:<n>")`. Updates write STATUS/NOTES and LAST_UPDATED in one
//! batch call without touching the immutable TIMESTAMP column.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::lead::{LeadId, LeadRecord, LeadStatus, Notes};
use crate::store::LeadStore;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// First data row (row 1 holds the headers).
const FIRST_DATA_ROW: usize = 2;

/// Sheets store configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub sheet_id: String,
    pub worksheet: String,
    pub access_token: SecretString,
}

impl SheetsConfig {
    /// Build config from environment variables.
    /// Returns `None` if `OUTREACH_SHEET_ID` is not set.
    pub fn from_env() -> Option<Self> {
        let sheet_id = std::env::var("OUTREACH_SHEET_ID").ok()?;
        let worksheet =
            std::env::var("OUTREACH_WORKSHEET").unwrap_or_else(|_| "Leads".to_string());
        let access_token = std::env::var("OUTREACH_SHEETS_TOKEN").unwrap_or_default();
        Some(Self {
            sheet_id,
            worksheet,
            access_token: SecretString::from(access_token),
        })
    }
}

/// Google Sheets lead store.
pub struct SheetsLeadStore {
    config: SheetsConfig,
    client: reqwest::Client,
    timeout: Duration,
    batch_size: usize,
}

impl SheetsLeadStore {
    pub fn new(config: SheetsConfig, timeout: Duration, batch_size: usize) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            timeout,
            batch_size,
        }
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{SHEETS_API_BASE}/{}/values/{}!{range}",
            self.config.sheet_id, self.config.worksheet
        )
    }
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[async_trait]
impl LeadStore for SheetsLeadStore {
    async fn fetch_pending(&self) -> Result<Vec<LeadRecord>, StoreError> {
        let url = format!("{}?majorDimension=ROWS", self.values_url("A2:J"));

        let request = self
            .client
            .get(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::FetchFailed(format!(
                "values API returned {}",
                response.status()
            )));
        }

        let body: ValuesResponse = response
            .json()
            .await
            .map_err(|e| StoreError::FetchFailed(format!("invalid values payload: {e}")))?;

        let mut leads = Vec::new();
        for (offset, row) in body.values.iter().enumerate() {
            let row_number = FIRST_DATA_ROW + offset;
            match parse_row(row_number, row) {
                Ok(Some(lead)) if lead.status == LeadStatus::Pending => leads.push(lead),
                Ok(_) => {}
                Err(e) => {
                    // One malformed row must not abort the run.
                    warn!(row = row_number, error = %e, "Skipping malformed lead row");
                }
            }
        }

        LeadRecord::order_batch(&mut leads);

        if leads.len() > self.batch_size {
            debug!(
                pending = leads.len(),
                batch_size = self.batch_size,
                "Truncating batch to configured size"
            );
            leads.truncate(self.batch_size);
        }

        Ok(leads)
    }

    async fn update(
        &self,
        id: &LeadId,
        status: LeadStatus,
        notes: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let row = row_number(id)?;
        let url = format!(
            "{SHEETS_API_BASE}/{}/values:batchUpdate",
            self.config.sheet_id
        );

        // STATUS (E) + NOTES (F) together, LAST_UPDATED (H) separately, so
        // the immutable TIMESTAMP column (G) is never written.
        let payload = serde_json::json!({
            "valueInputOption": "RAW",
            "data": [
                {
                    "range": format!("{}!E{row}:F{row}", self.config.worksheet),
                    "values": [[status.as_str(), notes]],
                },
                {
                    "range": format!("{}!H{row}", self.config.worksheet),
                    "values": [[format_datetime(last_updated)]],
                },
            ],
        });

        let request = self
            .client
            .post(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&payload)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::WriteFailed {
                id: id.to_string(),
                reason: format!("batchUpdate returned {}", response.status()),
            });
        }

        Ok(())
    }
}

// ── Row parsing ─────────────────────────────────────────────────────

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("").trim()
}

fn optional_cell(row: &[String], index: usize) -> Option<String> {
    let value = cell(row, index);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse one worksheet row into a lead. Returns `Ok(None)` for blank rows.
fn parse_row(row_number: usize, row: &[String]) -> Result<Option<LeadRecord>, StoreError> {
    if row.iter().all(|c| c.trim().is_empty()) {
        return Ok(None);
    }

    let company = cell(row, 3);
    if company.is_empty() {
        return Err(StoreError::MalformedRow {
            row: row_number,
            reason: "missing COMPANY".into(),
        });
    }

    let created_at = parse_datetime(cell(row, 6));
    let last_updated = optional_cell(row, 7)
        .map(|s| parse_datetime(&s))
        .unwrap_or(created_at);

    let priority = cell(row, 9).parse::<i32>().unwrap_or(0);

    Ok(Some(LeadRecord {
        id: LeadId::new(format!("row:{row_number}")),
        contact_person: cell(row, 0).to_string(),
        email: optional_cell(row, 1),
        phone: optional_cell(row, 2),
        company: company.to_string(),
        status: LeadStatus::parse(cell(row, 4)),
        notes: Notes::from_cell(cell(row, 5)),
        priority,
        created_at,
        last_updated,
        source: cell(row, 8).to_string(),
    }))
}

fn row_number(id: &LeadId) -> Result<usize, StoreError> {
    id.as_str()
        .strip_prefix("row:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| StoreError::RowNotFound(id.to_string()))
}

/// Canonical cell format for timestamps.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a worksheet datetime cell. Unparseable cells fall back to the epoch
/// so the row still sorts deterministically (and last).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}
