//! Value proposition stage — maps detected pain points to ranked propositions.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::StageError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{self, RetryPolicy};
use crate::stages::analysis::CompanyFindings;
use crate::stages::extract_json_object;

const GENERATION_TEMPERATURE: f32 = 0.7;
const GENERATION_MAX_TOKENS: u32 = 1024;

/// One generated value proposition, tied to the pain point it addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueProposition {
    pub proposition: String,
    #[serde(default)]
    pub pain_point: String,
}

/// Value proposition stage — one generation-tier completion per lead,
/// covering all pain points in a single prompt to bound latency and cost.
pub struct ValuePropositionStage {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl ValuePropositionStage {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self {
            llm,
            retry: RetryPolicy::with_timeout(timeout),
        }
    }

    /// Generate a ranked proposition list from analysis findings.
    ///
    /// The model's ordering is kept as-is — there is no ground truth to
    /// re-rank against locally. An empty pain-point list yields an empty list
    /// without a model call.
    pub async fn generate(
        &self,
        findings: &CompanyFindings,
    ) -> Result<Vec<ValueProposition>, StageError> {
        if findings.business_description.trim().is_empty() {
            return Err(StageError::Generation("empty analysis findings".into()));
        }
        if findings.pain_points.is_empty() {
            debug!("No pain points detected, skipping proposition generation");
            return Ok(Vec::new());
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_generation_system_prompt()),
            ChatMessage::user(build_generation_user_prompt(findings)),
        ])
        .with_temperature(GENERATION_TEMPERATURE)
        .with_max_tokens(GENERATION_MAX_TOKENS);

        let response = retry::complete_with_retry(self.llm.as_ref(), request, &self.retry)
            .await
            .map_err(|e| StageError::Generation(format!("model call failed: {e}")))?;

        parse_propositions(&response.content)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_generation_system_prompt() -> String {
    "You are a value proposition expert for a supply-chain technology vendor.\n\
     Map each pain point to one or more concrete value propositions.\n\
     Respond with ONLY a JSON object:\n\
     {\"propositions\": [{\"proposition\": \"...\", \"pain_point\": \"...\"}]}\n\n\
     Rules:\n\
     - Order propositions by relevance, strongest first\n\
     - Each proposition is one specific, persuasive sentence\n\
     - pain_point names the detected pain point the proposition addresses"
        .to_string()
}

fn build_generation_user_prompt(findings: &CompanyFindings) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("Business: {}\n", findings.business_description));
    prompt.push_str(&format!("Exports goods: {}\n", findings.exports_goods));
    prompt.push_str("Detected pain points:\n");
    for (i, pain_point) in findings.pain_points.iter().enumerate() {
        prompt.push_str(&format!("  {}. {}\n", i + 1, pain_point));
    }
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    propositions: Vec<ValueProposition>,
}

fn parse_propositions(raw: &str) -> Result<Vec<ValueProposition>, StageError> {
    let json_str = extract_json_object(raw);
    let response: GenerationResponse = serde_json::from_str(&json_str)
        .map_err(|e| StageError::Generation(format!("unparseable proposition response: {e}")))?;

    // Keep the model's ranking; drop only entries with no proposition text.
    Ok(response
        .propositions
        .into_iter()
        .filter(|p| !p.proposition.trim().is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    struct MockLlm {
        response: String,
        calls: AtomicUsize,
    }

    impl MockLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-generation"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 100,
                output_tokens: 80,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn findings(pain_points: &[&str]) -> CompanyFindings {
        CompanyFindings {
            business_description: "Exports machined parts".into(),
            exports_goods: true,
            pain_points: pain_points.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn generates_ranked_propositions() {
        let llm = Arc::new(MockLlm::new(
            r#"{"propositions": [
                {"proposition": "Cut customs clearance time in half", "pain_point": "customs paperwork"},
                {"proposition": "Live container tracking", "pain_point": "freight visibility"}
            ]}"#,
        ));
        let stage = ValuePropositionStage::new(llm.clone(), Duration::from_secs(5));
        let propositions = stage
            .generate(&findings(&["customs paperwork", "freight visibility"]))
            .await
            .unwrap();
        assert_eq!(propositions.len(), 2);
        // Model ranking preserved as-is.
        assert_eq!(propositions[0].proposition, "Cut customs clearance time in half");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_pain_points_yield_empty_list_without_model_call() {
        let llm = Arc::new(MockLlm::new("unused"));
        let stage = ValuePropositionStage::new(llm.clone(), Duration::from_secs(5));
        let propositions = stage.generate(&findings(&[])).await.unwrap();
        assert!(propositions.is_empty());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_findings_are_an_error() {
        let llm = Arc::new(MockLlm::new("unused"));
        let stage = ValuePropositionStage::new(llm.clone(), Duration::from_secs(5));
        let empty = CompanyFindings {
            business_description: "  ".into(),
            exports_goods: false,
            pain_points: vec!["x".into()],
        };
        let result = stage.generate(&empty).await;
        assert!(matches!(result, Err(StageError::Generation(_))));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unparseable_response_is_an_error() {
        let llm = Arc::new(MockLlm::new("here are some thoughts, no JSON"));
        let stage = ValuePropositionStage::new(llm, Duration::from_secs(5));
        let result = stage.generate(&findings(&["delays"])).await;
        assert!(matches!(result, Err(StageError::Generation(_))));
    }

    #[tokio::test]
    async fn blank_propositions_are_dropped() {
        let llm = Arc::new(MockLlm::new(
            r#"{"propositions": [
                {"proposition": "  ", "pain_point": "a"},
                {"proposition": "Real one", "pain_point": "b"}
            ]}"#,
        ));
        let stage = ValuePropositionStage::new(llm, Duration::from_secs(5));
        let propositions = stage.generate(&findings(&["a", "b"])).await.unwrap();
        assert_eq!(propositions.len(), 1);
        assert_eq!(propositions[0].proposition, "Real one");
    }
}
