use std::sync::Arc;

use abm_outreach::config::AppConfig;
use abm_outreach::delivery::{
    Dispatcher, EmailTransport, SmsTransport, SmtpEmailTransport, TextfullySmsTransport,
};
use abm_outreach::llm::create_stage_providers;
use abm_outreach::pipeline::Orchestrator;
use abm_outreach::stages::{
    AnalysisStage, HttpContentFetcher, PersonalizationStage, ValuePropositionStage,
};
use abm_outreach::store::{LeadStore, SheetsLeadStore};
use abm_outreach::surface;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("📤 ABM Outreach v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Models: analysis={} generation={} personalization={}",
        config.models.analysis, config.models.generation, config.models.personalization
    );

    // ── LLM providers + stages ──────────────────────────────────────────
    let providers = create_stage_providers(config.backend, &config.llm_api_key, &config.models)?;

    let fetcher = Arc::new(HttpContentFetcher::new(config.timeouts.fetch));
    let analysis = AnalysisStage::new(providers.analysis, fetcher, config.timeouts.inference);
    let value_props = ValuePropositionStage::new(providers.generation, config.timeouts.inference);
    let personalization = PersonalizationStage::new(
        providers.personalization,
        config.timeouts.inference,
        config.sms_max_length,
    );

    // ── Delivery transports ─────────────────────────────────────────────
    let email: Option<Arc<dyn EmailTransport>> = config
        .smtp
        .clone()
        .map(|smtp| Arc::new(SmtpEmailTransport::new(smtp)) as Arc<dyn EmailTransport>);
    let sms: Option<Arc<dyn SmsTransport>> = config
        .sms
        .clone()
        .map(|api| Arc::new(TextfullySmsTransport::new(api)) as Arc<dyn SmsTransport>);

    let mut active_channels = Vec::new();
    if email.is_some() {
        active_channels.push("email");
    }
    if sms.is_some() {
        active_channels.push("sms");
    }
    eprintln!(
        "   Channels: {}",
        if active_channels.is_empty() {
            "none (delivery disabled)".to_string()
        } else {
            active_channels.join(", ")
        }
    );

    let dispatcher = Dispatcher::new(email, sms, config.timeouts.delivery);

    // ── Lead store ──────────────────────────────────────────────────────
    let Some(sheets) = config.sheets.clone() else {
        anyhow::bail!("OUTREACH_SHEET_ID not set — no lead store configured");
    };
    eprintln!(
        "   Store: sheet {} / worksheet {} (batch size {})",
        sheets.sheet_id, sheets.worksheet, config.batch_size
    );
    let store: Arc<dyn LeadStore> = Arc::new(SheetsLeadStore::new(
        sheets,
        config.timeouts.store,
        config.batch_size,
    ));

    // ── Orchestrator ────────────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        analysis,
        value_props,
        personalization,
        dispatcher,
    ));

    // One foreground batch, report on stdout, exit.
    if std::env::args().any(|arg| arg == "--once") {
        let report = orchestrator.run_batch().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // ── Operator surface ────────────────────────────────────────────────
    let app = surface::routes(orchestrator);
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.surface_port)).await?;
    eprintln!("   Surface: http://0.0.0.0:{}", config.surface_port);
    eprintln!("   Events:  ws://0.0.0.0:{}/ws\n", config.surface_port);
    tracing::info!(port = config.surface_port, "Operator surface started");
    axum::serve(listener, app).await?;

    Ok(())
}
