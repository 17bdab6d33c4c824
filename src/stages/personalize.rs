//! Personalization stage — turns the top proposition into channel bodies.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::delivery::Channel;
use crate::error::StageError;
use crate::lead::LeadRecord;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{self, RetryPolicy};
use crate::stages::extract_json_object;
use crate::stages::value_prop::ValueProposition;

const PERSONALIZATION_TEMPERATURE: f32 = 0.7;
const PERSONALIZATION_MAX_TOKENS: u32 = 1024;

/// A generated email message.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

/// Channel-specific message bodies for one lead.
///
/// A body is only present for a channel whose contact field is present on the
/// lead.
#[derive(Debug, Clone, Default)]
pub struct MessageDrafts {
    pub email: Option<EmailDraft>,
    pub sms: Option<String>,
}

/// Personalization stage — one completion covering every requested channel.
pub struct PersonalizationStage {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    sms_max_length: usize,
}

impl PersonalizationStage {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration, sms_max_length: usize) -> Self {
        Self {
            llm,
            retry: RetryPolicy::with_timeout(timeout),
            sms_max_length,
        }
    }

    /// Generate channel bodies for the lead's present channels.
    ///
    /// An SMS body over the configured cap is an error — a broken message
    /// must not be sent, and silent truncation would send one.
    pub async fn personalize(
        &self,
        proposition: &ValueProposition,
        lead: &LeadRecord,
    ) -> Result<MessageDrafts, StageError> {
        if proposition.proposition.trim().is_empty() {
            return Err(StageError::Personalization(
                "no value proposition to personalize".into(),
            ));
        }

        let channels = lead.deliverable_channels();
        if channels.is_empty() {
            return Err(StageError::Personalization(
                "lead has no deliverable channel".into(),
            ));
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_personalization_system_prompt(
                &channels,
                self.sms_max_length,
            )),
            ChatMessage::user(build_personalization_user_prompt(proposition, lead)),
        ])
        .with_temperature(PERSONALIZATION_TEMPERATURE)
        .with_max_tokens(PERSONALIZATION_MAX_TOKENS);

        let response = retry::complete_with_retry(self.llm.as_ref(), request, &self.retry)
            .await
            .map_err(|e| StageError::Personalization(format!("model call failed: {e}")))?;

        self.parse_drafts(&response.content, &channels)
    }

    fn parse_drafts(
        &self,
        raw: &str,
        channels: &[Channel],
    ) -> Result<MessageDrafts, StageError> {
        let json_str = extract_json_object(raw);
        let response: PersonalizationResponse = serde_json::from_str(&json_str).map_err(|e| {
            StageError::Personalization(format!("unparseable personalization response: {e}"))
        })?;

        let mut drafts = MessageDrafts::default();

        if channels.contains(&Channel::Email) {
            drafts.email = response.email.filter(|d| {
                let usable = !d.subject.trim().is_empty() && !d.body.trim().is_empty();
                if !usable {
                    warn!("Model returned an empty email draft");
                }
                usable
            });
        }

        if channels.contains(&Channel::Sms) {
            if let Some(sms) = response.sms.filter(|s| !s.trim().is_empty()) {
                let len = sms.chars().count();
                if len > self.sms_max_length {
                    return Err(StageError::Personalization(format!(
                        "sms body is {len} characters, over the {} cap",
                        self.sms_max_length
                    )));
                }
                drafts.sms = Some(sms);
            }
        }

        if drafts.email.is_none() && drafts.sms.is_none() {
            return Err(StageError::Personalization(
                "no channel body could be generated".into(),
            ));
        }

        Ok(drafts)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_personalization_system_prompt(channels: &[Channel], sms_max_length: usize) -> String {
    let mut prompt = String::from(
        "You are a B2B outreach copywriter. Write personalized, professional, \
         action-oriented first-touch messages.\n\
         Respond with ONLY a JSON object containing the requested channels:\n",
    );
    if channels.contains(&Channel::Email) {
        prompt.push_str("- \"email\": {\"subject\": \"...\", \"body\": \"...\"}\n");
    }
    if channels.contains(&Channel::Sms) {
        prompt.push_str(&format!(
            "- \"sms\": \"...\" (HARD LIMIT {sms_max_length} characters, include an opt-out)\n"
        ));
    }
    prompt.push_str(
        "\nRules:\n\
         - Lead with the value proposition, not the product\n\
         - Address the contact by name; one clear call to action\n\
         - No placeholders or bracketed template fields",
    );
    prompt
}

fn build_personalization_user_prompt(proposition: &ValueProposition, lead: &LeadRecord) -> String {
    let mut prompt = String::with_capacity(256);
    prompt.push_str(&format!("Contact: {}\n", lead.contact_person));
    prompt.push_str(&format!("Company: {}\n", lead.company));
    prompt.push_str(&format!("Value proposition: {}\n", proposition.proposition));
    if !proposition.pain_point.trim().is_empty() {
        prompt.push_str(&format!("Addresses pain point: {}\n", proposition.pain_point));
    }
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PersonalizationResponse {
    #[serde(default)]
    email: Option<EmailDraft>,
    #[serde(default)]
    sms: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::LlmError;
    use crate::lead::{LeadId, LeadStatus, Notes};
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
            "mock-personalization"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 100,
                output_tokens: 90,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn lead(email: Option<&str>, phone: Option<&str>) -> LeadRecord {
        LeadRecord {
            id: LeadId::new("row:2"),
            contact_person: "Alice".into(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            company: "Acme".into(),
            status: LeadStatus::Pending,
            notes: Notes::default(),
            priority: 0,
            created_at: Utc::now(),
            last_updated: Utc::now(),
            source: "import".into(),
        }
    }

    fn proposition() -> ValueProposition {
        ValueProposition {
            proposition: "Cut customs clearance time in half".into(),
            pain_point: "customs paperwork".into(),
        }
    }

    fn stage(llm: Arc<MockLlm>, cap: usize) -> PersonalizationStage {
        PersonalizationStage::new(llm, Duration::from_secs(5), cap)
    }

    #[tokio::test]
    async fn email_only_lead_gets_email_draft() {
        let llm = Arc::new(MockLlm::new(
            r#"{"email": {"subject": "Quick question", "body": "Hi Alice, ..."}}"#,
        ));
        let drafts = stage(llm.clone(), 160)
            .personalize(&proposition(), &lead(Some("alice@acme.com"), None))
            .await
            .unwrap();
        assert!(drafts.email.is_some());
        assert!(drafts.sms.is_none());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sms_over_cap_is_a_hard_failure() {
        let long_sms = "x".repeat(200);
        let llm = Arc::new(MockLlm::new(&format!(r#"{{"sms": "{long_sms}"}}"#)));
        let result = stage(llm, 160)
            .personalize(&proposition(), &lead(None, Some("+15551234567")))
            .await;
        match result {
            Err(StageError::Personalization(msg)) => assert!(msg.contains("over the 160 cap")),
            other => panic!("expected personalization error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sms_at_cap_is_accepted() {
        let sms = "y".repeat(160);
        let llm = Arc::new(MockLlm::new(&format!(r#"{{"sms": "{sms}"}}"#)));
        let drafts = stage(llm, 160)
            .personalize(&proposition(), &lead(None, Some("+15551234567")))
            .await
            .unwrap();
        assert_eq!(drafts.sms.unwrap().chars().count(), 160);
    }

    #[tokio::test]
    async fn body_for_absent_channel_is_dropped() {
        // Model over-produces an SMS body for an email-only lead.
        let llm = Arc::new(MockLlm::new(
            r#"{"email": {"subject": "Hi", "body": "Hi Alice"}, "sms": "Hi Alice, quick chat?"}"#,
        ));
        let drafts = stage(llm, 160)
            .personalize(&proposition(), &lead(Some("alice@acme.com"), None))
            .await
            .unwrap();
        assert!(drafts.email.is_some());
        assert!(drafts.sms.is_none());
    }

    #[tokio::test]
    async fn empty_proposition_is_an_error() {
        let llm = Arc::new(MockLlm::new("unused"));
        let empty = ValueProposition {
            proposition: "  ".into(),
            pain_point: String::new(),
        };
        let result = stage(llm.clone(), 160)
            .personalize(&empty, &lead(Some("alice@acme.com"), None))
            .await;
        assert!(matches!(result, Err(StageError::Personalization(_))));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_bodies_missing_is_an_error() {
        let llm = Arc::new(MockLlm::new(r#"{"email": {"subject": "", "body": ""}}"#));
        let result = stage(llm, 160)
            .personalize(&proposition(), &lead(Some("alice@acme.com"), None))
            .await;
        assert!(matches!(result, Err(StageError::Personalization(_))));
    }
}
