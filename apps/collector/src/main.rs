//! Pagewatch collector - periodic web vitals audit runner
//!
//! Runs one batch pass over every active measurement target and exits.
//! Scheduling (cron, systemd timer) lives outside the binary.

use anyhow::{Context, Result};

use audit_harness::{AuditRunner, CollectorConfig};
use metrics_store::MetricStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("collector=info".parse()?)
                .add_directive("audit_harness=info".parse()?)
                .add_directive("metrics_store=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("COLLECTOR_CONFIG").ok())
        .unwrap_or_else(|| "collector.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = CollectorConfig::from_file(&config_path)?;

    let store = MetricStore::connect(&config.store.database_url)
        .await
        .context("Failed to open metrics database")?;

    let runner = AuditRunner::new(config, store).context("Failed to build audit runner")?;
    let summary = runner.run_batch().await.context("Batch pass failed")?;

    info!(
        targets = summary.targets_attempted,
        skipped = summary.targets_skipped,
        recorded = summary.samples_recorded,
        failed = summary.attempts_failed,
        "Collector run complete"
    );
    Ok(())
}
