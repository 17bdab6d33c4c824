//! Analysis stage — derives structured findings from a company's web presence.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{self, RetryPolicy};
use crate::stages::extract_json_object;

/// Temperature for extraction (deterministic-ish).
const ANALYSIS_TEMPERATURE: f32 = 0.2;

/// Max tokens for the analysis call.
const ANALYSIS_MAX_TOKENS: u32 = 1024;

/// Cap on fetched content included in the prompt.
const CONTENT_PROMPT_CAP: usize = 6000;

/// Structured findings about one company.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyFindings {
    /// What the company does, in the model's words.
    #[serde(default)]
    pub business_description: String,
    /// Whether the web presence indicates export operations.
    #[serde(default)]
    pub exports_goods: bool,
    /// Detected pain points, highest confidence first.
    #[serde(default)]
    pub pain_points: Vec<String>,
}

/// Fetches a textual representation of a company's public web presence.
///
/// Pure I/O — URL discovery and HTML handling live behind this trait so the
/// stage can be tested with canned content.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, company: &str) -> Result<String, StageError>;
}

/// Analysis stage — one extraction-tier completion per lead.
pub struct AnalysisStage {
    llm: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn ContentFetcher>,
    retry: RetryPolicy,
}

impl AnalysisStage {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        fetcher: Arc<dyn ContentFetcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            fetcher,
            retry: RetryPolicy::with_timeout(timeout),
        }
    }

    /// Analyze a company's web presence into structured findings.
    pub async fn analyze(&self, company: &str) -> Result<CompanyFindings, StageError> {
        let content = self.fetcher.fetch(company).await?;
        if content.trim().is_empty() {
            return Err(StageError::Analysis(format!(
                "no website content found for {company}"
            )));
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_analysis_system_prompt()),
            ChatMessage::user(build_analysis_user_prompt(company, &content)),
        ])
        .with_temperature(ANALYSIS_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        let response = retry::complete_with_retry(self.llm.as_ref(), request, &self.retry)
            .await
            .map_err(|e| StageError::Analysis(format!("model call failed: {e}")))?;

        parse_findings(&response.content)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_analysis_system_prompt() -> String {
    "You are an expert B2B sales development analyst specializing in export/import \
     and supply chain operations.\n\
     Analyze the provided website content and respond with ONLY a JSON object:\n\
     {\"business_description\": \"...\", \"exports_goods\": true, \"pain_points\": [\"...\"]}\n\n\
     Rules:\n\
     - business_description: 1-2 sentences on what the company does\n\
     - exports_goods: true only when the content shows concrete export operations\n\
     - pain_points: operational pain points inferable from the content, most significant first\n\
     - Be precise and data-driven; do not invent facts absent from the content"
        .to_string()
}

fn build_analysis_user_prompt(company: &str, content: &str) -> String {
    let content_preview: String = content.chars().take(CONTENT_PROMPT_CAP).collect();
    format!("Company: {company}\n\nWebsite content:\n{content_preview}")
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the model response into findings.
///
/// Malformed-but-present responses degrade to a partial result as long as the
/// business description is recoverable; anything less is an analysis failure.
fn parse_findings(raw: &str) -> Result<CompanyFindings, StageError> {
    let json_str = extract_json_object(raw);

    match serde_json::from_str::<CompanyFindings>(&json_str) {
        Ok(findings) if !findings.business_description.trim().is_empty() => Ok(findings),
        Ok(_) => Err(StageError::Analysis(
            "response missing business description".into(),
        )),
        Err(parse_err) => {
            // Salvage the description from a loosely-shaped response.
            let salvaged = serde_json::from_str::<serde_json::Value>(&json_str)
                .ok()
                .and_then(|v| {
                    v.get("business_description")
                        .and_then(|d| d.as_str())
                        .map(String::from)
                })
                .filter(|d| !d.trim().is_empty());

            match salvaged {
                Some(business_description) => {
                    warn!(error = %parse_err, "Analysis response malformed, degrading to partial findings");
                    Ok(CompanyFindings {
                        business_description,
                        exports_goods: false,
                        pain_points: Vec::new(),
                    })
                }
                None => Err(StageError::Analysis(format!(
                    "unparseable analysis response: {parse_err}"
                ))),
            }
        }
    }
}

// ── HTTP content fetcher ────────────────────────────────────────────

/// Fetches homepage plus common subpages and strips markup.
pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("abm-outreach/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_page(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(url, status = %r.status(), "Page fetch returned non-success");
                return None;
            }
            Err(e) => {
                debug!(url, error = %e, "Page fetch failed");
                return None;
            }
        };
        response.text().await.ok().map(|html| strip_html(&html))
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, company: &str) -> Result<String, StageError> {
        let base = company_base_url(company);

        let mut sections = Vec::with_capacity(3);
        for path in ["", "/about", "/products"] {
            if let Some(text) = self.fetch_page(&format!("{base}{path}")).await
                && !text.trim().is_empty()
            {
                sections.push(text);
            }
        }

        Ok(sections.join("\n"))
    }
}

/// Derive a base URL from a company field: bare domains are used as-is,
/// otherwise the name is slugified into `<name>.com`.
fn company_base_url(company: &str) -> String {
    let cleaned = company
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if cleaned.contains('.') && !cleaned.contains(' ') {
        format!("https://{cleaned}")
    } else {
        let slug: String = cleaned
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("https://{slug}.com")
    }
}

fn script_style_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").unwrap())
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Strip tags and collapse whitespace into a single line of text.
fn strip_html(html: &str) -> String {
    let no_scripts = script_style_regex().replace_all(html, " ");
    let no_tags = tag_regex().replace_all(&no_scripts, " ");
    whitespace_regex()
        .replace_all(&no_tags, " ")
        .trim()
        .to_string()
}
