use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use workflow_ctl::config::AppConfig;
use workflow_ctl::crypto::CredentialCodec;
use workflow_ctl::llm::OpenAiCompatBackend;
use workflow_ctl::pipeline::ChatPipeline;
use workflow_ctl::server::{router, AppState};
use workflow_ctl::store::{ConfigStore, Snapshot};
use workflow_ctl::usage::UsageLogger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();

    let store = Arc::new(ConfigStore::new());
    if let Some(path) = &config.seed_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {path}"))?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).with_context(|| format!("parsing seed file {path}"))?;
        store.load_snapshot(snapshot);
        info!(path = %path, "config store seeded");
    }

    // One pooled keep-alive client shared by model calls and log delivery.
    // No global timeout: streaming responses are open-ended, and the blocking
    // stage sets its own per-request deadline. The read timeout bounds the
    // gap between chunks, catching a silently dead upstream.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(Duration::from_secs(300))
        .build()
        .context("building HTTP client")?;

    let usage = match &config.usage_log_url {
        Some(url) => UsageLogger::new(client.clone(), url.clone()),
        None => {
            warn!("CHAT_LOG_URL unset; usage logging disabled");
            UsageLogger::disabled()
        }
    };

    let pipeline = Arc::new(ChatPipeline::new(
        store.clone(),
        Arc::new(CredentialCodec::new(&config.encryption_secret)),
        Arc::new(OpenAiCompatBackend::new()),
        client,
        usage,
        Duration::from_secs(config.stage_timeout_secs),
    ));

    let app = router(AppState { store, pipeline });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "workflow-ctl listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
