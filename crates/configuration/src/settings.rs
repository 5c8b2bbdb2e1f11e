use core_types::Stage;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
///
/// Every section has defaults, so an empty `config.toml` is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub gates: GateConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub backtest: BacktestSettings,
    pub training: TrainingSettings,
    pub capital: CapitalLimits,
    pub logging: LoggingConfig,
}

/// Retry and polling policy of the lifecycle orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Transient failures a stage may accumulate before the strategy is FAILED.
    pub default_max_attempts: u32,
    /// Per-stage overrides of `default_max_attempts`.
    pub max_attempts: HashMap<Stage, u32>,
    /// How many times `advance` re-reads after losing an optimistic-concurrency race.
    pub max_conflict_retries: u32,
    /// Delay before the first retry of a transiently failed stage. Doubles per attempt.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_retry_backoff: Duration,
    /// Delay between polls of a pending long-running job.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on a single adapter `run` or `poll`. Expiry counts as a transient failure.
    #[serde(with = "humantime_serde")]
    pub stage_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn max_attempts_for(&self, stage: Stage) -> u32 {
        self.max_attempts
            .get(&stage)
            .copied()
            .unwrap_or(self.default_max_attempts)
    }

    /// Exponential backoff after the `attempt`-th transient failure, capped at `max_retry_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_retry_backoff)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            max_attempts: HashMap::new(),
            max_conflict_retries: 5,
            retry_backoff: Duration::from_secs(30),
            max_retry_backoff: Duration::from_secs(15 * 60),
            poll_interval: Duration::from_secs(60),
            stage_timeout: Duration::from_secs(60),
        }
    }
}

/// Thresholds a stage's metrics must clear for the strategy to proceed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum backtest Sharpe ratio.
    pub min_sharpe: Decimal,
    /// Optional ceiling on backtest max drawdown (fraction of equity).
    pub max_drawdown: Option<Decimal>,
    /// Minimum RL evaluation reward.
    pub min_eval_reward: Decimal,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_sharpe: dec!(1.0),
            max_drawdown: None,
            min_eval_reward: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running `advance` calls in one scheduler.
    pub max_concurrency: usize,
    pub page_size: u32,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
    pub worker_id: String,
    /// Also collect live performance of deployed strategies on each tick.
    pub monitor_deployed: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            page_size: 50,
            tick_interval: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(10 * 60),
            worker_id: format!("aatr-{}", std::process::id()),
            monitor_deployed: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Persistence backend selection and its unavailability retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Inputs handed to the backtesting engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Length of the historical data window.
    pub lookback_days: u32,
    pub initial_capital: Decimal,
    /// 0.0004 corresponds to 0.04%.
    pub commission_pct: Decimal,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            initial_capital: dec!(10000),
            commission_pct: dec!(0.0004),
        }
    }
}

/// Inputs handed to the RL training engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub timesteps: u64,
    pub learning_rate: Decimal,
    pub batch_size: u32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            timesteps: 100_000,
            learning_rate: dec!(0.0003),
            batch_size: 64,
        }
    }
}

/// Limits applied when a strategy goes live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapitalLimits {
    pub max_capital_per_strategy: Decimal,
    pub venue: String,
}

impl Default for CapitalLimits {
    fn default() -> Self {
        Self {
            max_capital_per_strategy: dec!(1000),
            venue: "paper".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive. `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
            file_prefix: "aatr.log".to_string(),
            ansi: true,
        }
    }
}
