//! Pipeline orchestrator — drives each pending lead through the stages.
//!
//! Leads are processed strictly sequentially: the spreadsheet backend has no
//! transactional isolation, so serializing writes avoids lost updates
//! outright. Each lead's terminal status is persisted as the last action of
//! its iteration; the store never observes a transient state between leads.
//!
//! Failure policy: a stage error fails the lead, not the batch. A store write
//! error on one row is logged and the batch proceeds. Only the initial
//! fetch of pending leads is batch-fatal. Failed leads are left `Failed` for
//! the operator to re-queue — nothing is ever re-sent automatically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::delivery::{DeliveryOutcome, Dispatcher};
use crate::error::{Error, StageError};
use crate::lead::{LeadRecord, LeadStatus};
use crate::pipeline::types::{BatchCounts, BatchReport, LeadOutcome, PipelineEvent};
use crate::stages::{AnalysisStage, PersonalizationStage, ValuePropositionStage};
use crate::store::LeadStore;

/// Buffered events before slow subscribers start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Requests cooperative cancellation of a running batch.
///
/// Takes effect at the next lead boundary: the in-flight lead completes and
/// persists, remaining leads stay `Pending`.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn request_cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline orchestrator.
pub struct Orchestrator {
    store: Arc<dyn LeadStore>,
    analysis: AnalysisStage,
    value_props: ValuePropositionStage,
    personalization: PersonalizationStage,
    dispatcher: Dispatcher,
    events: broadcast::Sender<PipelineEvent>,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn LeadStore>,
        analysis: AnalysisStage,
        value_props: ValuePropositionStage,
        personalization: PersonalizationStage,
        dispatcher: Dispatcher,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            analysis,
            value_props,
            personalization,
            dispatcher,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the live event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Handle for cancelling a running batch at the next lead boundary.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Fetch pending leads and process them as one batch.
    ///
    /// A fetch failure is the only batch-fatal error.
    pub async fn run_batch(&self) -> Result<BatchReport, Error> {
        let leads = self.store.fetch_pending().await.map_err(Error::Store)?;
        Ok(self.process_batch(leads).await)
    }

    /// Process an already-fetched batch of pending leads.
    pub async fn process_batch(&self, mut leads: Vec<LeadRecord>) -> BatchReport {
        // Re-assert the ordering contract locally so run logs stay
        // reproducible regardless of the store adapter.
        LeadRecord::order_batch(&mut leads);
        self.cancel.store(false, Ordering::SeqCst);

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = leads.len();
        info!(%batch_id, total, "Batch started");
        self.emit(PipelineEvent::BatchStarted { batch_id, total });

        let mut outcomes = Vec::with_capacity(total);
        let mut counts = BatchCounts::default();
        let mut cancelled = false;

        for (index, lead) in leads.into_iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                let remaining = total - index;
                warn!(%batch_id, remaining, "Batch cancelled at lead boundary");
                self.emit(PipelineEvent::BatchCancelled {
                    batch_id,
                    remaining,
                });
                cancelled = true;
                break;
            }

            let outcome = self.process_lead(lead).await;
            counts.record(outcome.status);
            self.emit(PipelineEvent::LeadFinished {
                lead_id: outcome.lead_id.clone(),
                status: outcome.status,
                summary: outcome.summary.clone(),
            });
            outcomes.push(outcome);
        }

        info!(
            %batch_id,
            sent = counts.sent,
            failed = counts.failed,
            skipped = counts.skipped,
            "Batch finished"
        );
        self.emit(PipelineEvent::BatchFinished { batch_id, counts });

        BatchReport {
            batch_id,
            outcomes,
            counts,
            started_at,
            finished_at: Utc::now(),
            cancelled,
        }
    }

    /// Run one lead through the state machine.
    async fn process_lead(&self, mut lead: LeadRecord) -> LeadOutcome {
        info!(lead = %lead.id, company = %lead.company, "Processing lead");

        // 1. Contact validation — no stage runs without a channel.
        let channels = lead.deliverable_channels();
        if channels.is_empty() {
            let reason = if lead.has_malformed_email() {
                "email address is unusable and no phone on record"
            } else {
                "no email or phone on record"
            };
            lead.notes.append(format!("skipped: {reason}"));
            self.set_status(&mut lead, LeadStatus::Skipped);
            return self.finish(lead, format!("skipped — {reason}")).await;
        }

        // 2. Analysis
        self.set_status(&mut lead, LeadStatus::Analyzing);
        let findings = match self.analysis.analyze(&lead.company).await {
            Ok(findings) => findings,
            Err(e) => return self.fail(lead, e).await,
        };
        lead.notes.append(format!(
            "analysis: {} pain point(s) detected",
            findings.pain_points.len()
        ));

        // 3. Value propositions
        self.set_status(&mut lead, LeadStatus::Generating);
        let propositions = match self.value_props.generate(&findings).await {
            Ok(propositions) => propositions,
            Err(e) => return self.fail(lead, e).await,
        };
        let Some(top) = propositions.first().cloned() else {
            // Nothing to personalize — personalization is not invoked.
            lead.notes.append("no value proposition available");
            self.set_status(&mut lead, LeadStatus::Failed);
            return self
                .finish(lead, "failed — no value proposition available".into())
                .await;
        };
        lead.notes.append(format!("proposition: {}", top.proposition));

        // 4. Personalization
        self.set_status(&mut lead, LeadStatus::Personalizing);
        let drafts = match self.personalization.personalize(&top, &lead).await {
            Ok(drafts) => drafts,
            Err(e) => return self.fail(lead, e).await,
        };

        // 5. Delivery — every channel with a present contact field, outcomes
        // recorded independently.
        self.set_status(&mut lead, LeadStatus::Sending);
        let mut delivered = Vec::new();
        for channel in &channels {
            let result = self.dispatcher.deliver(*channel, &lead, &drafts).await;
            match result.outcome {
                DeliveryOutcome::Delivered => {
                    delivered.push(channel.as_str());
                    lead.notes.append(format!("{channel}: delivered"));
                }
                DeliveryOutcome::Failed { reason } => {
                    lead.notes.append(format!("{channel}: failed ({reason})"));
                }
            }
        }

        // 6. Fold channel outcomes: any success means the lead was reached.
        if delivered.is_empty() {
            self.set_status(&mut lead, LeadStatus::Failed);
            self.finish(lead, "failed — all channel deliveries failed".into())
                .await
        } else {
            let summary = format!("sent via {}", delivered.join(", "));
            self.set_status(&mut lead, LeadStatus::Sent);
            self.finish(lead, summary).await
        }
    }

    /// Record a stage failure and terminate the lead.
    async fn fail(&self, mut lead: LeadRecord, error: StageError) -> LeadOutcome {
        warn!(lead = %lead.id, stage = error.stage(), error = %error, "Stage failed");
        lead.notes.append(error.to_string());
        self.set_status(&mut lead, LeadStatus::Failed);
        self.finish(lead, format!("failed at {}", error.stage())).await
    }

    /// Persist the terminal state — the last action of every iteration — and
    /// produce the outcome for the batch report.
    async fn finish(&self, lead: LeadRecord, summary: String) -> LeadOutcome {
        if let Err(e) = self
            .store
            .update(&lead.id, lead.status, &lead.notes.render(), lead.last_updated)
            .await
        {
            // A failed write on one row must not abort the run.
            error!(lead = %lead.id, error = %e, "Store write failed");
        }

        LeadOutcome {
            lead_id: lead.id.clone(),
            company: lead.company.clone(),
            status: lead.status,
            summary,
        }
    }

    /// Apply a status transition, refreshing the timestamp the store will
    /// persist and emitting a live event.
    fn set_status(&self, lead: &mut LeadRecord, next: LeadStatus) {
        if !lead.status.can_transition_to(next) {
            error!(
                lead = %lead.id,
                from = %lead.status,
                to = %next,
                "Illegal status transition refused"
            );
            return;
        }
        lead.status = next;
        lead.last_updated = Utc::now();
        info!(lead = %lead.id, status = %next, "Stage transition");
        self.emit(PipelineEvent::StatusChanged {
            lead_id: lead.id.clone(),
            company: lead.company.clone(),
            status: next,
        });
    }

    fn emit(&self, event: PipelineEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::delivery::{EmailTransport, SmsTransport};
    use crate::error::{DeliveryError, LlmError, StoreError};
    use crate::lead::{LeadId, Notes};
    use crate::llm::provider::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
    };
    use crate::stages::analysis::ContentFetcher;
    use crate::store::MemoryLeadStore;

    const ANALYSIS_OK: &str = r#"{"business_description": "Exports machined parts", "exports_goods": true, "pain_points": ["customs paperwork"]}"#;
    const ANALYSIS_NO_PAINS: &str = r#"{"business_description": "Exports machined parts", "exports_goods": true, "pain_points": []}"#;
    const PROPOSITIONS_OK: &str = r#"{"propositions": [{"proposition": "Cut customs clearance time in half", "pain_point": "customs paperwork"}]}"#;
    const DRAFTS_OK: &str = r#"{"email": {"subject": "Quick question", "body": "Hi Alice"}, "sms": "Hi Alice, quick chat? Reply STOP to opt out."}"#;

    // ── Fakes ───────────────────────────────────────────────────────

    /// Mock LLM: fixed response (or failure), counts calls, can trip a
    /// cancel handle on first call.
    struct MockLlm {
        response: String,
        fail: bool,
        calls: AtomicUsize,
        cancel_on_call: std::sync::Mutex<Option<CancelHandle>>,
    }

    impl MockLlm {
        fn ok(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.into(),
                fail: false,
                calls: AtomicUsize::new(0),
                cancel_on_call: std::sync::Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: String::new(),
                fail: true,
                calls: AtomicUsize::new(0),
                cancel_on_call: std::sync::Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn cancel_on_next_call(&self, handle: CancelHandle) {
            *self.cancel_on_call.lock().unwrap() = Some(handle);
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = self.cancel_on_call.lock().unwrap().take() {
                handle.request_cancel();
            }
            if self.fail {
                return Err(LlmError::AuthFailed {
                    provider: "mock".into(),
                });
            }
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    struct StaticFetcher;

    #[async_trait]
    impl ContentFetcher for StaticFetcher {
        async fn fetch(&self, _company: &str) -> Result<String, StageError> {
            Ok("Acme exports machined parts worldwide".into())
        }
    }

    struct FakeEmail {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmailTransport for FakeEmail {
        async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DeliveryError::SendFailed {
                    channel: "email".into(),
                    reason: "relay refused".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct FakeSms {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SmsTransport for FakeSms {
        async fn send(&self, _to: &str, _body: &str) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DeliveryError::SendFailed {
                    channel: "sms".into(),
                    reason: "invalid number".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Store whose fetch always fails.
    struct BrokenFetchStore;

    #[async_trait]
    impl crate::store::LeadStore for BrokenFetchStore {
        async fn fetch_pending(&self) -> Result<Vec<LeadRecord>, StoreError> {
            Err(StoreError::FetchFailed("backend unreachable".into()))
        }

        async fn update(
            &self,
            _id: &LeadId,
            _status: LeadStatus,
            _notes: &str,
            _last_updated: chrono::DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Store that fails every update but serves fetches from an inner store.
    struct BrokenWriteStore(MemoryLeadStore);

    #[async_trait]
    impl crate::store::LeadStore for BrokenWriteStore {
        async fn fetch_pending(&self) -> Result<Vec<LeadRecord>, StoreError> {
            self.0.fetch_pending().await
        }

        async fn update(
            &self,
            id: &LeadId,
            _status: LeadStatus,
            _notes: &str,
            _last_updated: chrono::DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::WriteFailed {
                id: id.to_string(),
                reason: "quota exceeded".into(),
            })
        }
    }

    // ── Test rig ────────────────────────────────────────────────────

    struct Rig {
        analysis_llm: Arc<MockLlm>,
        generation_llm: Arc<MockLlm>,
        personalization_llm: Arc<MockLlm>,
        email: Arc<FakeEmail>,
        sms: Arc<FakeSms>,
    }

    impl Rig {
        fn good() -> Self {
            Self {
                analysis_llm: MockLlm::ok(ANALYSIS_OK),
                generation_llm: MockLlm::ok(PROPOSITIONS_OK),
                personalization_llm: MockLlm::ok(DRAFTS_OK),
                email: Arc::new(FakeEmail {
                    calls: AtomicUsize::new(0),
                    fail: false,
                }),
                sms: Arc::new(FakeSms {
                    calls: AtomicUsize::new(0),
                    fail: false,
                }),
            }
        }

        fn orchestrator(&self, store: Arc<dyn crate::store::LeadStore>) -> Orchestrator {
            let timeout = Duration::from_secs(5);
            Orchestrator::new(
                store,
                AnalysisStage::new(self.analysis_llm.clone(), Arc::new(StaticFetcher), timeout),
                ValuePropositionStage::new(self.generation_llm.clone(), timeout),
                PersonalizationStage::new(self.personalization_llm.clone(), timeout, 160),
                Dispatcher::new(Some(self.email.clone()), Some(self.sms.clone()), timeout),
            )
        }

        fn llm_calls(&self) -> usize {
            self.analysis_llm.calls() + self.generation_llm.calls() + self.personalization_llm.calls()
        }
    }

    fn lead(id: &str, email: Option<&str>, phone: Option<&str>) -> LeadRecord {
        LeadRecord {
            id: LeadId::new(id),
            contact_person: "Alice".into(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            company: "Acme".into(),
            status: LeadStatus::Pending,
            notes: Notes::default(),
            priority: 0,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            last_updated: Utc.timestamp_opt(0, 0).unwrap(),
            source: "test".into(),
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn lead_without_contact_is_skipped_with_zero_external_calls() {
        let rig = Rig::good();
        let store = Arc::new(MemoryLeadStore::new(vec![lead("row:2", None, None)]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.counts, BatchCounts { sent: 0, failed: 0, skipped: 1 });
        assert_eq!(report.outcomes[0].status, LeadStatus::Skipped);
        assert_eq!(rig.llm_calls(), 0);
        assert_eq!(rig.email.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rig.sms.calls.load(Ordering::SeqCst), 0);

        let stored = store.get(&LeadId::new("row:2")).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Skipped);
        assert!(stored.notes.render().contains("no email or phone"));
    }

    #[tokio::test]
    async fn analysis_failure_short_circuits_later_stages() {
        let mut rig = Rig::good();
        rig.analysis_llm = MockLlm::failing();
        let store = Arc::new(MemoryLeadStore::new(vec![lead(
            "row:2",
            Some("alice@acme.com"),
            None,
        )]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.outcomes[0].status, LeadStatus::Failed);
        assert_eq!(rig.generation_llm.calls(), 0);
        assert_eq!(rig.personalization_llm.calls(), 0);
        assert_eq!(rig.email.calls.load(Ordering::SeqCst), 0);

        let stored = store.get(&LeadId::new("row:2")).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Failed);
        assert!(stored.notes.render().contains("Analysis failed"));
    }

    #[tokio::test]
    async fn email_only_lead_sends_exactly_one_email() {
        let rig = Rig::good();
        let store = Arc::new(MemoryLeadStore::new(vec![lead(
            "row:2",
            Some("a@b.com"),
            None,
        )]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.outcomes[0].status, LeadStatus::Sent);
        assert_eq!(report.counts.sent, 1);
        assert_eq!(rig.email.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.sms.calls.load(Ordering::SeqCst), 0);
        assert!(report.outcomes[0].summary.contains("email"));
    }

    #[tokio::test]
    async fn one_failed_channel_with_one_success_is_sent() {
        let mut rig = Rig::good();
        rig.email = Arc::new(FakeEmail {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let store = Arc::new(MemoryLeadStore::new(vec![lead(
            "row:2",
            Some("alice@acme.com"),
            Some("+15551234567"),
        )]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.outcomes[0].status, LeadStatus::Sent);
        let stored = store.get(&LeadId::new("row:2")).await.unwrap();
        let notes = stored.notes.render();
        // Both outcomes recorded independently.
        assert!(notes.contains("email: failed"));
        assert!(notes.contains("sms: delivered"));
    }

    #[tokio::test]
    async fn all_channels_failing_fails_the_lead() {
        let mut rig = Rig::good();
        rig.email = Arc::new(FakeEmail {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        rig.sms = Arc::new(FakeSms {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let store = Arc::new(MemoryLeadStore::new(vec![lead(
            "row:2",
            Some("alice@acme.com"),
            Some("+15551234567"),
        )]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.outcomes[0].status, LeadStatus::Failed);
        assert_eq!(report.counts, BatchCounts { sent: 0, failed: 1, skipped: 0 });
        // Both channels were attempted despite the first failing.
        assert_eq!(rig.email.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rig.sms.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_proposition_list_fails_without_personalization() {
        let mut rig = Rig::good();
        rig.analysis_llm = MockLlm::ok(ANALYSIS_NO_PAINS);
        let store = Arc::new(MemoryLeadStore::new(vec![lead(
            "row:2",
            Some("alice@acme.com"),
            None,
        )]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.outcomes[0].status, LeadStatus::Failed);
        assert_eq!(rig.personalization_llm.calls(), 0);
        assert_eq!(rig.email.calls.load(Ordering::SeqCst), 0);

        let stored = store.get(&LeadId::new("row:2")).await.unwrap();
        assert!(stored.notes.render().contains("no value proposition available"));
    }

    #[tokio::test]
    async fn batch_order_is_priority_then_creation() {
        let rig = Rig::good();
        let mut low = lead("row:2", Some("a@b.com"), None);
        low.priority = 1;
        low.created_at = Utc.timestamp_opt(100, 0).unwrap();
        let mut high = lead("row:3", Some("c@d.com"), None);
        high.priority = 5;
        high.created_at = Utc.timestamp_opt(200, 0).unwrap();
        let mut high_earlier = lead("row:4", Some("e@f.com"), None);
        high_earlier.priority = 5;
        high_earlier.created_at = Utc.timestamp_opt(50, 0).unwrap();

        let store = Arc::new(MemoryLeadStore::new(vec![low, high, high_earlier]));
        let orchestrator = rig.orchestrator(store);

        let report = orchestrator.run_batch().await.unwrap();
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.lead_id.as_str()).collect();
        assert_eq!(ids, vec!["row:4", "row:3", "row:2"]);
    }

    #[tokio::test]
    async fn terminal_leads_are_not_reprocessed() {
        let rig = Rig::good();
        let mut sent = lead("row:2", Some("a@b.com"), None);
        sent.status = LeadStatus::Sent;
        let mut failed = lead("row:3", Some("c@d.com"), None);
        failed.status = LeadStatus::Failed;
        let mut skipped = lead("row:4", None, None);
        skipped.status = LeadStatus::Skipped;

        let store = Arc::new(MemoryLeadStore::new(vec![sent, failed, skipped]));
        let orchestrator = rig.orchestrator(store);

        let report = orchestrator.run_batch().await.unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(rig.llm_calls(), 0);
        assert_eq!(rig.email.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rig.sms.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_takes_effect_at_the_next_lead_boundary() {
        let rig = Rig::good();
        let mut first = lead("row:2", Some("a@b.com"), None);
        first.priority = 9;
        let second = lead("row:3", Some("c@d.com"), None);

        let store = Arc::new(MemoryLeadStore::new(vec![first, second]));
        let orchestrator = rig.orchestrator(store.clone());

        // Cancel mid-way through the first lead's analysis call.
        rig.analysis_llm.cancel_on_next_call(orchestrator.cancel_handle());

        let report = orchestrator.run_batch().await.unwrap();

        assert!(report.cancelled);
        // The in-flight lead ran to completion and was persisted.
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].lead_id.as_str(), "row:2");
        assert_eq!(
            store.get(&LeadId::new("row:2")).await.unwrap().status,
            LeadStatus::Sent
        );
        // The remaining lead was never touched.
        assert_eq!(
            store.get(&LeadId::new("row:3")).await.unwrap().status,
            LeadStatus::Pending
        );
    }

    #[tokio::test]
    async fn store_write_failure_does_not_abort_the_batch() {
        let rig = Rig::good();
        let inner = MemoryLeadStore::new(vec![
            lead("row:2", Some("a@b.com"), None),
            lead("row:3", Some("c@d.com"), None),
        ]);
        let orchestrator = rig.orchestrator(Arc::new(BrokenWriteStore(inner)));

        let report = orchestrator.run_batch().await.unwrap();

        // Both leads still produced outcomes.
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.counts.sent, 2);
    }

    #[tokio::test]
    async fn fetch_failure_is_batch_fatal() {
        let rig = Rig::good();
        let orchestrator = rig.orchestrator(Arc::new(BrokenFetchStore));

        let result = orchestrator.run_batch().await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(rig.llm_calls(), 0);
    }

    #[tokio::test]
    async fn event_stream_reports_stage_transitions() {
        let rig = Rig::good();
        let store = Arc::new(MemoryLeadStore::new(vec![lead(
            "row:2",
            Some("a@b.com"),
            None,
        )]));
        let orchestrator = rig.orchestrator(store);
        let mut events = orchestrator.subscribe();

        let _report = orchestrator.run_batch().await.unwrap();

        let mut statuses = Vec::new();
        let mut finished = false;
        while let Ok(event) = events.try_recv() {
            match event {
                PipelineEvent::StatusChanged { status, .. } => statuses.push(status),
                PipelineEvent::BatchFinished { counts, .. } => {
                    finished = true;
                    assert_eq!(counts.sent, 1);
                }
                _ => {}
            }
        }

        assert!(finished);
        assert_eq!(
            statuses,
            vec![
                LeadStatus::Analyzing,
                LeadStatus::Generating,
                LeadStatus::Personalizing,
                LeadStatus::Sending,
                LeadStatus::Sent,
            ]
        );
    }

    #[tokio::test]
    async fn malformed_email_skip_reason_is_specific() {
        let rig = Rig::good();
        let mut bad = lead("row:2", Some("not-an-address"), None);
        bad.phone = None;
        let store = Arc::new(MemoryLeadStore::new(vec![bad]));
        let orchestrator = rig.orchestrator(store.clone());

        let report = orchestrator.run_batch().await.unwrap();

        assert_eq!(report.outcomes[0].status, LeadStatus::Skipped);
        let stored = store.get(&LeadId::new("row:2")).await.unwrap();
        assert!(stored.notes.render().contains("unusable"));
    }
}
