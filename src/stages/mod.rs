//! The three AI stages of the lead pipeline.
//!
//! Each stage owns a provider handle for its model tier, builds a fixed
//! prompt template, makes one completion call, and parses the structured
//! response. Stage output is handed forward by the orchestrator; stages never
//! talk to each other or to the store.

pub mod analysis;
pub mod personalize;
pub mod value_prop;

pub use analysis::{AnalysisStage, CompanyFindings, ContentFetcher, HttpContentFetcher};
pub use personalize::{EmailDraft, MessageDrafts, PersonalizationStage};
pub use value_prop::{ValueProposition, ValuePropositionStage};

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
