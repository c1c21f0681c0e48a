use clap::Parser;

/// Scheduler configuration.
///
/// Parsed once at startup from the environment and passed by reference to
/// every component; there is no global settings object.
#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Redis connection string for the worker queue.
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379/0")]
    pub redis_url: String,

    /// Name of the worker queue.
    #[arg(long, env = "TASK_QUEUE_NAME", default_value = "creep:tasks")]
    pub task_queue_name: String,

    /// Tasks dispatched per loader tick. The loader claims one task per pass
    /// for isolation; values above 1 run that many passes back to back.
    #[arg(long, env = "LOADER_BATCH_SIZE", default_value_t = 1)]
    pub loader_batch_size: u32,

    /// Seconds between loader ticks.
    #[arg(long, env = "LOADER_POLL_INTERVAL", default_value_t = 1.0)]
    pub loader_poll_interval: f64,

    /// Assets claimed per janitor batch.
    #[arg(long, env = "JANITOR_BATCH_SIZE", default_value_t = 100)]
    pub janitor_batch_size: i64,

    /// Ceiling on rows a single janitor sweep may process.
    #[arg(long, env = "JANITOR_MAX_PROCESS_LIMIT", default_value_t = 1000)]
    pub janitor_max_process_limit: i64,

    /// Seconds between janitor passes.
    #[arg(long, env = "JANITOR_SWEEP_INTERVAL", default_value_t = 5.0)]
    pub janitor_sweep_interval: f64,

    /// Seconds a worker sleeps after an empty poll.
    #[arg(long, env = "WORKER_POLL_INTERVAL", default_value_t = 1.0)]
    pub worker_poll_interval: f64,

    /// Seconds a blocking queue pop waits before yielding.
    #[arg(long, env = "DISPENSER_POP_TIMEOUT", default_value_t = 5.0)]
    pub dispenser_pop_timeout: f64,

    /// Success probability of the mock vendor adapter (0..1).
    #[arg(long, env = "WORKER_MOCK_SUCCESS_RATE", default_value_t = 0.8)]
    pub worker_mock_success_rate: f64,

    /// Vendor adapter executing tasks.
    #[arg(long, env = "ADAPTER_NAME", default_value = "mock")]
    pub adapter_name: String,

    /// Seconds a successful asset cools before re-entering the pool.
    #[arg(long, env = "ASSET_COOL_DOWN_SECS", default_value_t = 10)]
    pub asset_cool_down_secs: i64,
}

impl Config {
    /// Parse config from environment only (no CLI parsing).
    ///
    /// We intentionally parse from a single fake argv element so clap doesn't
    /// try to interpret the creepd subcommand flags here.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::parse_from(["creepd"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = Config::parse_from(["creepd", "--database-url", "postgres://localhost/creep"]);
        assert_eq!("redis://localhost:6379/0", cfg.redis_url);
        assert_eq!("creep:tasks", cfg.task_queue_name);
        assert_eq!(1, cfg.loader_batch_size);
        assert_eq!(100, cfg.janitor_batch_size);
        assert_eq!(1000, cfg.janitor_max_process_limit);
        assert_eq!(1.0, cfg.worker_poll_interval);
        assert_eq!(5.0, cfg.dispenser_pop_timeout);
        assert_eq!(0.8, cfg.worker_mock_success_rate);
        assert_eq!("mock", cfg.adapter_name);
        assert_eq!(10, cfg.asset_cool_down_secs);
    }
}
