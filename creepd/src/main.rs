use anyhow::Context;
use clap::{Parser, Subcommand};
use creep_core::adapter::AdapterFactory;
use creep_core::redis_queue::RedisQueue;
use creep_core::Queue;
use creep_engine::dispenser::Dispenser;
use creep_engine::janitor::Janitor;
use creep_engine::loader::Loader;
use creep_engine::worker::Worker;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod migrate;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "creepd")]
#[command(about = "CREEP resource-lease scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run schema migrations.
    Migrate,

    /// Run the loader loop: claim pending task orders and publish payloads.
    Loader,

    /// Run the janitor loop: lock-timeout and cooling-expiry sweeps.
    Janitor,

    /// Run a worker: consume payloads, execute via the adapter, settle.
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env().context("load config")?;

    match cli.command {
        Command::Migrate => migrate::run(&cfg).await,
        Command::Loader => run_loader(&cfg).await,
        Command::Janitor => run_janitor(&cfg).await,
        Command::Worker => run_worker(&cfg).await,
    }
}

async fn connect_pool(cfg: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await
        .context("connect postgres")
}

async fn connect_queue(cfg: &Config) -> anyhow::Result<Arc<dyn Queue>> {
    let queue = RedisQueue::connect(&cfg.redis_url)
        .await
        .context("connect redis")?;
    Ok(Arc::new(queue))
}

async fn run_loader(cfg: &Config) -> anyhow::Result<()> {
    let pool = connect_pool(cfg).await?;
    let queue = connect_queue(cfg).await?;
    let loader = Loader::new(pool, queue, cfg.task_queue_name.clone());
    let tick = Duration::from_secs_f64(cfg.loader_poll_interval);
    let passes_per_tick = cfg.loader_batch_size.max(1);

    tracing::info!(
        event = "creep.loader.started",
        queue = %cfg.task_queue_name,
        "loader started"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "creep.loader.shutdown", "loader shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(tick) => {
                for _ in 0..passes_per_tick {
                    match loader.sync().await {
                        Ok(Some(payload)) => {
                            tracing::info!(
                                event = "creep.loader.dispatched",
                                task_id = %payload.task_id,
                                leases = payload.lease_ids.len(),
                                "task dispatched"
                            );
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::error!(
                                event = "creep.loader.pass_failed",
                                error = %format!("{err:#}"),
                                "loader pass failed; retrying next tick"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn run_janitor(cfg: &Config) -> anyhow::Result<()> {
    let pool = connect_pool(cfg).await?;
    let janitor = Janitor::new(pool, cfg.janitor_batch_size, cfg.janitor_max_process_limit);
    let tick = Duration::from_secs_f64(cfg.janitor_sweep_interval);

    tracing::info!(event = "creep.janitor.started", "janitor started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(event = "creep.janitor.shutdown", "janitor shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(tick) => {
                match janitor.run_once().await {
                    Ok(pass) => {
                        if !pass.recovered.is_empty() || !pass.cooled.is_empty() {
                            tracing::info!(
                                event = "creep.janitor.pass",
                                recovered = pass.recovered.len(),
                                cooled = pass.cooled.len(),
                                "janitor pass complete"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            event = "creep.janitor.pass_failed",
                            error = %format!("{err:#}"),
                            "janitor pass failed; retrying next tick"
                        );
                    }
                }
            }
        }
    }
}

async fn run_worker(cfg: &Config) -> anyhow::Result<()> {
    let pool = connect_pool(cfg).await?;
    let queue = connect_queue(cfg).await?;

    // The success-rate knob only means something to the mock adapter; real
    // adapters ignore unknown config keys.
    let mut overrides = HashMap::new();
    overrides.insert(
        "success_rate".to_string(),
        cfg.worker_mock_success_rate.to_string(),
    );
    let adapter = AdapterFactory::create(&cfg.adapter_name, &overrides)
        .with_context(|| format!("create adapter {}", cfg.adapter_name))?;

    let dispenser = Dispenser::new(
        queue,
        cfg.task_queue_name.clone(),
        Duration::from_secs_f64(cfg.dispenser_pop_timeout),
    );
    let worker = Worker::new(
        pool,
        dispenser,
        adapter,
        Duration::from_secs_f64(cfg.worker_poll_interval),
        cfg.asset_cool_down_secs,
    );

    worker.run_forever().await
}
