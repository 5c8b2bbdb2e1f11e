use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    BacktestSettings, CapitalLimits, Config, GateConfig, LoggingConfig, OrchestratorConfig,
    SchedulerConfig, StoreBackend, StoreConfig, TrainingSettings,
};

/// Loads the application configuration.
///
/// Reads the TOML file at `path` (a missing file is not an error, every section
/// has defaults), then layers `AATR__SECTION__KEY` environment variables on top,
/// deserializes into our strongly-typed `Config` struct and validates it.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).required(false))
        .add_source(
            config::Environment::with_prefix("AATR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;

    Ok(config)
}

/// Rejects configurations the orchestrator and scheduler cannot run with.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.orchestrator.default_max_attempts == 0
        || config.orchestrator.max_attempts.values().any(|&n| n == 0)
    {
        return fail("orchestrator max attempts must be at least 1");
    }
    if config.scheduler.max_concurrency == 0 {
        return fail("scheduler.max_concurrency must be at least 1");
    }
    if config.scheduler.page_size == 0 {
        return fail("scheduler.page_size must be at least 1");
    }
    if config.scheduler.lease_ttl.is_zero() {
        return fail("scheduler.lease_ttl must be positive");
    }
    if config.orchestrator.stage_timeout.is_zero() {
        return fail("orchestrator.stage_timeout must be positive");
    }
    if config.orchestrator.stage_timeout >= config.scheduler.lease_ttl {
        return fail("orchestrator.stage_timeout must be shorter than scheduler.lease_ttl");
    }
    if config.scheduler.worker_id.trim().is_empty() {
        return fail("scheduler.worker_id must not be empty");
    }
    if config.store.max_attempts == 0 {
        return fail("store.max_attempts must be at least 1");
    }
    if let Some(max_drawdown) = config.gates.max_drawdown {
        if max_drawdown.is_sign_negative() || max_drawdown > rust_decimal::Decimal::ONE {
            return fail("gates.max_drawdown must be a fraction between 0 and 1");
        }
    }
    if config.training.timesteps == 0 {
        return fail("training.timesteps must be positive");
    }
    Ok(())
}
