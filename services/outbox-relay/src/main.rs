use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use sea_orm::Database;
use tracing::{info, warn};

use clinic_core::shutdown::ShutdownSignal;
use clinic_core::tracing::init_tracing;
use clinic_outbox_relay::config::{ModuleConfig, RelayConfig};
use clinic_outbox_relay::domain::repository::OutboxReader;
use clinic_outbox_relay::domain::types::TickReport;
use clinic_outbox_relay::infra::broker::RedisStreamPublisher;
use clinic_outbox_relay::infra::db::DbOutboxReader;
use clinic_outbox_relay::infra::memory::InMemoryOutboxStore;
use clinic_outbox_relay::scheduler::Scheduler;
use clinic_outbox_relay::usecase::publish_outbox::OutboxPublishingJob;

/// Relays committed outbox messages from every module to Redis Streams.
#[derive(Debug, Parser)]
#[command(name = "outbox-relay", version)]
struct Args {
    /// Run a single tick and exit instead of scheduling.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();
    init_tracing();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;

    let redis = deadpool_redis::Config::from_url(&config.redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("failed to create Redis pool")?;
    let publisher =
        RedisStreamPublisher::new(redis, config.stream_prefix.clone(), config.stream_max_len);

    let mut job = OutboxPublishingJob::new(Arc::new(publisher))
        .with_max_batch_size(config.max_batch_size)
        .with_max_attempts(config.max_attempts);
    for module in &config.modules {
        job = job.with_reader(connect_reader(module).await?);
    }

    let shutdown = ShutdownSignal::with_timeout(config.shutdown_timeout);

    if args.once {
        let report = job.execute(&shutdown).await;
        info!(
            published = report.published(),
            quarantined = report.quarantined(),
            failed_modules = report.failed_modules().count(),
            "single outbox tick finished"
        );
        return ensure_all_modules_ok(&report);
    }

    let scheduler = Scheduler::new(Arc::new(job), config.tick_interval, shutdown.clone());
    let handle = scheduler.start();

    shutdown
        .wait_for_os_signal()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(
        timeout_secs = shutdown.timeout().as_secs(),
        "shutdown requested, waiting for in-flight tick"
    );

    match tokio::time::timeout(shutdown.timeout(), handle.join()).await {
        Ok(joined) => joined.context("outbox scheduler task panicked")?,
        Err(_) => warn!("in-flight tick did not finish before shutdown timeout"),
    }

    info!("outbox relay stopped");
    Ok(())
}

async fn connect_reader(module: &ModuleConfig) -> anyhow::Result<Arc<dyn OutboxReader>> {
    if module.is_in_memory() {
        warn!(
            module = %module.name,
            "using in-memory outbox store; messages do not survive restarts"
        );
        return Ok(Arc::new(InMemoryOutboxStore::new(module.name.clone())));
    }

    let db = Database::connect(&module.database_url)
        .await
        .with_context(|| format!("failed to connect to {} database", module.name))?;
    info!(module = %module.name, "connected to module database");
    Ok(Arc::new(DbOutboxReader::new(module.name.clone(), db)))
}

/// Exit status of a `--once` run: any failed module makes it non-zero.
fn ensure_all_modules_ok(report: &TickReport) -> anyhow::Result<()> {
    let failed: Vec<String> = report
        .failed_modules()
        .map(|m| match &m.failure {
            Some(failure) => format!("{} ({}: {failure})", m.module, failure.stage()),
            None => m.module.clone(),
        })
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("outbox tick failed for {}", failed.join(", "));
    }
    Ok(())
}
