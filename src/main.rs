//! relais - cron-driven job scheduling over a stream queue.
//!
//! Usage:
//!   relais serve -c <config>     Run the service (scheduler, workers, API)
//!   relais validate -c <config>  Validate a configuration file without running

use clap::{Parser, Subcommand, ValueEnum};
use relais::config::{NotifierConfig, NotifierMode, QueueBackend, QueueConfig};
use relais::{
    CommandStrategy, Executor, InMemoryQueue, InMemoryStorage, LogNotifier, Notifier,
    QuotaLimiter, RequestLimiter, RetryLoop, Scheduler, ServiceConfig, Storage, StrategyRegistry,
    TaskQueue, TaskRunner, WebhookNotifier, WebhookStrategy,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long a service task gets to wind down after the shutdown signal.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// relais - cron-driven job scheduling over a stream queue
#[derive(Parser)]
#[command(name = "relais")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service with the given configuration
    Serve {
        /// Path to the configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Which role(s) this process runs
        #[arg(long, value_enum, default_value = "all")]
        service: Service,
    },

    /// Validate a configuration file without running
    Validate {
        /// Path to the configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,
    },
}

/// Role selection for a `serve` process.
///
/// Splitting roles across processes only makes sense with a shared queue
/// backend; with the in-memory queue each process sees its own stream.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Service {
    /// Scheduler, workers, and API in one process
    All,
    /// Scheduler loop only
    Scheduler,
    /// Executor workers and the retry loop only
    Worker,
    /// HTTP API (runs a scheduler for trigger and pause commands)
    Api,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, service } => {
            serve(config, service).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
    }

    Ok(())
}

/// Run the selected services until Ctrl+C.
async fn serve(config_path: PathBuf, service: Service) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", config_path.display());

    let config = ServiceConfig::load(&config_path)?;

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let queue = build_queue(&config.queue).await?;
    queue
        .ensure_group(&config.queue.stream, &config.queue.group)
        .await?;

    seed_storage(&config, storage.as_ref()).await?;

    let notifier = build_notifier(&config.notifier)?;

    let run_scheduler = matches!(service, Service::All | Service::Scheduler | Service::Api);
    let run_workers = matches!(service, Service::All | Service::Worker);
    let run_api = matches!(service, Service::All | Service::Api);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let handle = if run_scheduler {
        info!(
            "Starting scheduler (tick interval: {}s)...",
            config.scheduler.tick_secs
        );
        let scheduler = Scheduler::new(
            storage.clone(),
            queue.clone(),
            notifier.clone(),
            &config.queue.stream,
        )
        .with_tick_interval(config.scheduler.tick_interval())
        .with_sweep_interval(config.scheduler.sweep_interval())
        .with_stuck_threshold(config.scheduler.stuck_threshold());

        let (handle, task) = scheduler.start(shutdown_rx.clone());
        tasks.push(("scheduler", task));
        Some(handle)
    } else {
        None
    };

    if run_workers {
        info!("Starting {} worker(s)...", config.executor.workers);
        let registry = build_registry(&config)?;
        let runner = Arc::new(TaskRunner::new(
            queue.clone(),
            storage.clone(),
            registry,
            &config.queue.stream,
            &config.queue.group,
        ));

        for index in 0..config.executor.workers {
            let executor = Executor::new(runner.clone(), config.executor.consumer_name(index))
                .with_block(config.executor.block());
            tasks.push(("worker", tokio::spawn(executor.run(shutdown_rx.clone()))));
        }

        let retry_loop = RetryLoop::new(
            runner,
            notifier.clone(),
            config.executor.reclaim_consumer_name(),
        )
        .with_interval(config.retry.interval())
        .with_min_idle(config.retry.min_idle())
        .with_max_retries(config.retry.max_retries);
        tasks.push(("retry", tokio::spawn(retry_loop.run(shutdown_rx.clone()))));
    }

    if run_api {
        if let Some(handle) = handle {
            let state = relais::api::create_api_state(handle, storage.clone());
            let task = relais::api::start_server(config.api.clone(), state, shutdown_rx.clone())
                .await?;
            tasks.push(("api", task));
        }
    }

    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("\nShutting down...");

    // Receivers may already be gone if every task stopped on its own.
    let _ = shutdown_tx.send(true);

    for (name, task) in tasks {
        match tokio::time::timeout(SHUTDOWN_DEADLINE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} task ended abnormally: {}", name, e),
            Err(_) => warn!("{} task did not stop within {:?}", name, SHUTDOWN_DEADLINE),
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Build the task queue for the configured backend.
async fn build_queue(
    config: &QueueConfig,
) -> Result<Arc<dyn TaskQueue>, Box<dyn std::error::Error>> {
    match config.backend {
        QueueBackend::Memory => Ok(Arc::new(InMemoryQueue::new())),
        #[cfg(feature = "redis")]
        QueueBackend::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or("queue.url is required for the redis backend")?;
            let queue = relais::queue::RedisQueue::connect(url, config.max_len).await?;
            info!("Connected to redis queue at {}", url);
            Ok(Arc::new(queue))
        }
        #[cfg(not(feature = "redis"))]
        QueueBackend::Redis => {
            Err("this build does not include the redis backend (enable the `redis` feature)".into())
        }
    }
}

/// Build the notifier for the configured mode.
fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, Box<dyn std::error::Error>> {
    match config.mode {
        NotifierMode::Log => Ok(Arc::new(LogNotifier::new())),
        NotifierMode::Webhook => {
            let url = config
                .url
                .clone()
                .ok_or("notifier.url is required for the webhook mode")?;
            Ok(Arc::new(WebhookNotifier::new(url)))
        }
    }
}

/// Build the strategy registry with the built-in strategies.
fn build_registry(
    config: &ServiceConfig,
) -> Result<Arc<StrategyRegistry>, Box<dyn std::error::Error>> {
    let requests = Arc::new(RequestLimiter::per_minute(
        config.limiter.requests_per_minute,
    )?);
    let quota = Arc::new(QuotaLimiter::per_minute(config.limiter.units_per_minute)?);

    let mut registry = StrategyRegistry::new();
    registry.register(Arc::new(CommandStrategy::new()));
    registry.register(Arc::new(WebhookStrategy::new(requests, quota)));
    Ok(Arc::new(registry))
}

/// Seed configured jobs and schedules into storage.
async fn seed_storage(
    config: &ServiceConfig,
    storage: &dyn Storage,
) -> Result<(), Box<dyn std::error::Error>> {
    for job in &config.jobs {
        storage.create_job(job.clone()).await?;
        info!("Seeded job '{}' ({})", job.id(), job.kind());
    }
    for schedule in &config.schedules {
        storage.create_schedule(schedule.clone()).await?;
        info!(
            "Seeded schedule '{}' for job '{}' ({})",
            schedule.id(),
            schedule.job_id(),
            schedule.expression()
        );
    }
    Ok(())
}

/// Validate a configuration file without running.
fn validate_config(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", config_path.display());

    match ServiceConfig::load(&config_path) {
        Ok(config) => {
            info!(
                "Configuration is valid: {} job(s), {} schedule(s)",
                config.jobs.len(),
                config.schedules.len()
            );
            for job in &config.jobs {
                info!("  - job {} ({}): OK", job.id(), job.kind());
            }
            for schedule in &config.schedules {
                info!(
                    "  - schedule {} ({} -> {}): OK",
                    schedule.id(),
                    schedule.expression(),
                    schedule.job_id()
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}
