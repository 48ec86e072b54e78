use std::sync::Arc;

use anyhow::Context as _;
use queue_tabber::bridge::{self, BridgeHost};
use queue_tabber::config::OrchestrationConfig;
use queue_tabber::context::OrchestrationContext;
use queue_tabber::orchestrator::Orchestrator;
use queue_tabber::remote::HttpRemote;
use secrecy::SecretString;
use tokio::sync::mpsc;

/// Buffer size of the orchestrator's event channel.
const EVENT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the native-messaging protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = OrchestrationConfig::from_env();
    config.validate().context("invalid configuration")?;

    let session_cookie = std::env::var("QT_SESSION_COOKIE")
        .ok()
        .filter(|c| !c.trim().is_empty())
        .map(SecretString::from);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.base_url,
        max_workers = config.max_workers,
        max_queue = config.max_queue,
        "Queue Tabber starting"
    );

    let remote = Arc::new(
        HttpRemote::new(config.base_url.clone(), session_cookie)
            .context("failed to build HTTP client")?,
    );

    // ── Bridge ───────────────────────────────────────────────────────────
    let (outbound_tx, outbound_rx) = mpsc::channel(bridge::OUTBOUND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let host = BridgeHost::new(outbound_tx.clone());

    let ctx = OrchestrationContext::new(
        config,
        remote,
        Arc::clone(&host) as _,
        Arc::clone(&host) as _,
    );
    let _forwarder = bridge::spawn_settings_forwarder(&ctx, outbound_tx);

    let writer = tokio::spawn(bridge::run_writer(tokio::io::stdout(), outbound_rx));
    let reader = tokio::spawn(bridge::run_reader(
        tokio::io::stdin(),
        Arc::clone(&host),
        event_tx,
    ));

    // ── Orchestrator ─────────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(ctx);
    orchestrator.initialize().await;
    orchestrator.run(event_rx).await;

    match reader.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Bridge reader failed"),
        Err(e) => tracing::error!(error = %e, "Bridge reader panicked"),
        Ok(Ok(())) => {}
    }
    writer.abort();

    Ok(())
}
