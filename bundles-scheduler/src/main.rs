//! Scheduler host for bundle publication.
//!
//! Long-lived process with no HTTP surface: on a fixed period it runs the
//! bundle publish runner, then the standalone scheduled-content runner.
//! Per-bundle failures are logged and retried on the next tick; they never
//! affect the exit code.
//!
//! Usage:
//!   cargo run --bin bundles-scheduler                  # run every 60s
//!   cargo run --bin bundles-scheduler -- --interval 10 # custom period
//!   cargo run --bin bundles-scheduler -- --once        # single live tick
//!   cargo run --bin bundles-scheduler -- --dry-run     # preview, no changes

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bundles_core::{
    from_webhook, BundleStore, ContentStore, MemoryContent, MemoryStore, PublishRunner,
    ScheduledContentRunner,
};

#[derive(Parser)]
#[command(name = "bundles-scheduler")]
#[command(about = "Publish due bundles and scheduled content on a fixed period")]
struct Args {
    /// Dry run -- report what would be published without changing anything.
    #[arg(long)]
    dry_run: bool,

    /// Run a single live tick and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Seconds between ticks.
    #[arg(long, default_value = "60")]
    interval: u64,

    /// Webhook URL for bundle notifications. Unset disables them.
    #[arg(long, env = "BUNDLE_SLACK_WEBHOOK_URL")]
    slack_webhook_url: Option<String>,

    /// Admin base URL used for deep links in notifications.
    #[arg(long, env = "BUNDLE_ADMIN_BASE_URL")]
    admin_base_url: Option<String>,

    /// Postgres connection string (requires the `database` feature).
    #[cfg(feature = "database")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store = build_store(&args).await?;
    // The external CMS is out of scope for this host; content operations go
    // through the in-memory backend unless embedded by a larger system.
    let content: Arc<dyn ContentStore> = Arc::new(MemoryContent::new());
    let notifier = from_webhook(args.slack_webhook_url.clone(), args.admin_base_url.clone());

    let runner = PublishRunner::new(store.clone(), content.clone(), notifier);
    let standalone = ScheduledContentRunner::new(store, content);

    if args.dry_run {
        println!("Will do a dry run.");
        print!("{}", runner.dry_run(Utc::now()).await?);
        print!("{}", standalone.dry_run(Utc::now()).await?);
        return Ok(());
    }

    if args.once {
        tick(&runner, &standalone).await;
        return Ok(());
    }

    let mut shutdown = shutdown_signal();
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(interval_secs = args.interval, "scheduler started");
    loop {
        tokio::select! {
            _ = ticker.tick() => tick(&runner, &standalone).await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// One scheduler tick. Errors are logged, never raised: the scheduler must
/// stay alive across transient failures.
async fn tick(runner: &PublishRunner, standalone: &ScheduledContentRunner) {
    let now = Utc::now();

    match runner.run(now).await {
        Ok(report) => {
            if report.published > 0 || report.failed > 0 {
                info!(
                    published = report.published,
                    failed = report.failed,
                    "bundle tick complete"
                );
            }
        }
        Err(e) => error!(error = %e, "bundle tick failed"),
    }

    match standalone.run(now).await {
        Ok(report) => {
            if report.published > 0 || report.unpublished > 0 || report.failed > 0 {
                info!(
                    published = report.published,
                    unpublished = report.unpublished,
                    failed = report.failed,
                    "scheduled content tick complete"
                );
            }
        }
        Err(e) => error!(error = %e, "scheduled content tick failed"),
    }
}

/// Resolves true when SIGINT or SIGTERM arrives. The loop is cancelled
/// between ticks; an in-flight tick runs to completion.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        let _ = tx.send(true);
    });
    rx
}

#[cfg(feature = "database")]
async fn build_store(args: &Args) -> anyhow::Result<Arc<dyn BundleStore>> {
    match &args.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url).await?;
            bundles_core::postgres::ensure_schema(&pool).await?;
            info!("using postgres bundle store");
            Ok(Arc::new(bundles_core::postgres::PgBundleStore::new(pool)))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "database"))]
async fn build_store(_args: &Args) -> anyhow::Result<Arc<dyn BundleStore>> {
    Ok(Arc::new(MemoryStore::new()))
}
