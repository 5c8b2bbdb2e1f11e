use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use configuration::{init_tracing, load_config, Config, StoreBackend};
use core_types::{
    EntryOutcome, GenerationRequest, RiskConstraints, StrategyId, StrategyRecord, StrategyStatus,
};
use database::{
    connect, run_migrations, InMemoryStore, PageToken, PgStateStore, RetryPolicy, RetryingStore,
    StateStore, StatusFilter,
};
use orchestrator::Orchestrator;
use rust_decimal::Decimal;
use scheduler::Scheduler;
use stages::StageAdapters;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// The main entry point for the AATR orchestrator.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if there is one.
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let _log_guard = init_tracing(&config.logging)?;

    // Construct the store once and hand it to everything that needs it.
    let store = build_store(&config, cli.in_memory).await?;
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        StageAdapters::simulated(&config),
        config.orchestrator.clone(),
        config.gates.clone(),
    ));
    let scheduler = Scheduler::new(orchestrator.clone(), config.scheduler.clone());

    // Execute the appropriate command
    match cli.command {
        Commands::Run(args) => handle_run(&scheduler, args).await,
        Commands::Once(args) => {
            handle_once(&scheduler, args, config.scheduler.monitor_deployed).await
        }
        Commands::Submit(args) => {
            let id = scheduler.submit(args.into_request()).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Show { id } => handle_show(store.as_ref(), id).await,
        Commands::List(args) => handle_list(store.as_ref(), args).await,
        Commands::Cancel { id, reason } => {
            if orchestrator.cancel(id, &reason).await? {
                println!("Cancelled {id}");
            } else {
                println!("{id} is already terminal; nothing to cancel");
            }
            Ok(())
        }
        Commands::Requeue(args) => {
            let requested_by = args
                .requested_by
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "cli".to_string());
            let child = orchestrator
                .requeue(args.id, &args.reason, &requested_by, args.regenerate)
                .await?;
            println!("{child}");
            Ok(())
        }
        Commands::Archive { id } => {
            if orchestrator.archive(id).await? {
                println!("Archived {id}");
            } else {
                println!("{id} was already archived");
            }
            Ok(())
        }
        Commands::Performance(args) => handle_performance(&orchestrator, store.as_ref(), args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Drives candidate trading strategies from hypothesis to deployment.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. A missing file means all defaults.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Keep state in process memory instead of PostgreSQL.
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted with Ctrl-C.
    Run(RunArgs),
    /// Run a single scheduler pass and print its summary.
    Once(RunArgs),
    /// Submit a new strategy generation request.
    Submit(SubmitArgs),
    /// Show one strategy and its stage results.
    Show { id: StrategyId },
    /// List strategies, oldest first.
    List(ListArgs),
    /// Cancel a strategy that has not reached a terminal state.
    Cancel {
        id: StrategyId,
        #[arg(long)]
        reason: String,
    },
    /// Start a new lifecycle from a terminal strategy.
    Requeue(RequeueArgs),
    /// Hide a terminal strategy from default listings.
    Archive { id: StrategyId },
    /// Show recorded live performance of a deployed strategy.
    Performance(PerformanceArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Submit this many sample strategies before starting, handy with --in-memory.
    #[arg(long, default_value_t = 0)]
    demo: u32,
}

#[derive(Args)]
struct SubmitArgs {
    /// Comma-separated symbols, e.g. BTCUSDT,ETHUSDT.
    #[arg(long, value_delimiter = ',', required = true)]
    universe: Vec<String>,

    #[arg(long, default_value = "2")]
    max_leverage: Decimal,

    /// Maximum fraction of capital in one position.
    #[arg(long, default_value = "0.25")]
    max_position_pct: Decimal,

    /// Maximum tolerated drawdown as a fraction of equity.
    #[arg(long, default_value = "0.2")]
    max_drawdown: Decimal,

    /// Generator seed. Derived from the clock when omitted.
    #[arg(long)]
    seed: Option<u64>,
}

impl SubmitArgs {
    fn into_request(self) -> GenerationRequest {
        GenerationRequest {
            universe: self.universe,
            risk: RiskConstraints {
                max_leverage: self.max_leverage,
                max_position_pct: self.max_position_pct,
                max_drawdown: self.max_drawdown,
            },
            seed: self
                .seed
                .unwrap_or_else(|| Utc::now().timestamp_micros() as u64),
        }
    }
}

#[derive(Args)]
struct ListArgs {
    /// Only these statuses (comma-separated). Defaults to every status.
    #[arg(long, value_delimiter = ',')]
    status: Vec<StrategyStatus>,

    /// Include archived strategies.
    #[arg(long)]
    archived: bool,

    #[arg(long, default_value_t = 50)]
    limit: u32,

    /// Continue from the token printed by a previous page.
    #[arg(long)]
    page_token: Option<PageToken>,
}

#[derive(Args)]
struct RequeueArgs {
    id: StrategyId,

    #[arg(long)]
    reason: String,

    /// Recorded in the lineage and audit log. Defaults to $USER.
    #[arg(long)]
    requested_by: Option<String>,

    /// Generate a fresh definition (new seed) instead of reproducing the old one.
    #[arg(long)]
    regenerate: bool,
}

#[derive(Args)]
struct PerformanceArgs {
    id: StrategyId,

    /// Take a fresh reading from the venue before printing.
    #[arg(long)]
    collect: bool,

    #[arg(long, default_value_t = 10)]
    limit: u32,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn build_store(config: &Config, in_memory: bool) -> anyhow::Result<Arc<dyn StateStore>> {
    let backend = if in_memory {
        StoreBackend::Memory
    } else {
        config.store.backend
    };

    match backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory state store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = connect(config.scheduler.max_concurrency as u32 + 2)
                .await
                .context("Failed to connect to the database")?;
            run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Ok(Arc::new(RetryingStore::new(
                PgStateStore::new(pool),
                RetryPolicy::from(&config.store),
            )))
        }
    }
}

async fn submit_demo(scheduler: &Scheduler, count: u32) -> anyhow::Result<()> {
    let universes = [
        vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        vec!["SOLUSDT".to_string()],
        vec!["BTCUSDT".to_string(), "BNBUSDT".to_string(), "XRPUSDT".to_string()],
    ];
    for seed in 0..count {
        let request = GenerationRequest {
            universe: universes[seed as usize % universes.len()].clone(),
            risk: RiskConstraints {
                max_leverage: Decimal::from(2),
                max_position_pct: Decimal::new(25, 2),
                max_drawdown: Decimal::new(20, 2),
            },
            seed: u64::from(seed),
        };
        let id = scheduler.submit(request).await?;
        println!("Submitted {id}");
    }
    Ok(())
}

async fn handle_run(scheduler: &Scheduler, args: RunArgs) -> anyhow::Result<()> {
    submit_demo(scheduler, args.demo).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, finishing the current pass");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await?;
    Ok(())
}

async fn handle_once(scheduler: &Scheduler, args: RunArgs, monitor: bool) -> anyhow::Result<()> {
    submit_demo(scheduler, args.demo).await?;
    let summary = scheduler.run_pass().await?;
    println!("{summary}");
    if monitor {
        let sweep = scheduler.monitor_deployed().await?;
        println!("performance: collected={} errors={}", sweep.collected, sweep.errors);
    }
    Ok(())
}

async fn handle_show(store: &dyn StateStore, id: StrategyId) -> anyhow::Result<()> {
    let record = store.read(id).await?;

    println!("strategy   {}", record.strategy_id);
    println!("status     {}{}", record.status, if record.archived { " (archived)" } else { "" });
    println!("version    {}", record.version);
    println!("universe   {}", record.request.universe.join(","));
    println!("seed       {}", record.request.seed);
    if let Some(reason) = &record.terminal_reason {
        println!("reason     {}: {}", reason.code, reason.detail);
    }
    if let Some(job) = &record.pending {
        println!("pending    {} {} (polled {} times)", job.stage, job.handle, job.polls);
    }
    if let Some(at) = record.next_attempt_at {
        println!("next try   {at}");
    }
    if let Some(lineage) = &record.lineage {
        println!(
            "lineage    parent {} root {} generation {} ({} by {})",
            lineage.parent_id, lineage.root_id, lineage.generation, lineage.reason, lineage.requested_by
        );
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Stage", "Outcome", "Attempt", "Metrics", "Recorded"]);
    for entry in record.stage_results.values() {
        let (outcome, metrics) = match &entry.outcome {
            EntryOutcome::Completed { result } => ("completed".to_string(), format_metrics(result)),
            EntryOutcome::Rejected { result, gate } => (format!("rejected: {}", gate.code), format_metrics(result)),
            EntryOutcome::Failed { failure } => (format!("failed ({})", failure.kind), failure.detail.clone()),
        };
        table.add_row(vec![
            entry.stage.to_string(),
            outcome,
            entry.attempt.to_string(),
            metrics,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    println!("{table}");

    if let Some(definition) = &record.definition {
        println!("definition v{}:", definition.version);
        println!("{}", serde_json::to_string_pretty(&definition.payload)?);
    }
    Ok(())
}

fn format_metrics(result: &core_types::StageResult) -> String {
    result
        .metrics()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn handle_list(store: &dyn StateStore, args: ListArgs) -> anyhow::Result<()> {
    let filter = StatusFilter {
        statuses: args.status,
        include_archived: args.archived,
    };
    let page = store.list(&filter, args.page_token.as_ref(), args.limit).await?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Strategy", "Status", "Universe", "Created", "Updated", "Version"]);
    for record in &page.records {
        table.add_row(list_row(record));
    }
    println!("{table}");
    if let Some(token) = page.next_page_token {
        println!("next page: --page-token {token}");
    }
    Ok(())
}

fn list_row(record: &StrategyRecord) -> Vec<String> {
    let status = if record.archived {
        format!("{} (archived)", record.status)
    } else {
        record.status.to_string()
    };
    vec![
        record.strategy_id.to_string(),
        status,
        record.request.universe.join(","),
        record.created_at.format("%Y-%m-%d %H:%M").to_string(),
        record.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        record.version.to_string(),
    ]
}

async fn handle_performance(
    orchestrator: &Orchestrator,
    store: &dyn StateStore,
    args: PerformanceArgs,
) -> anyhow::Result<()> {
    if args.collect {
        orchestrator.collect_performance(args.id).await?;
    }
    let readings = store.performance(args.id, args.limit).await?;
    if readings.is_empty() {
        println!("No performance recorded for {}", args.id);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Observed", "PnL", "Sharpe", "Drawdown", "Open positions"]);
    for reading in readings {
        table.add_row(vec![
            reading.observed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            reading.pnl.to_string(),
            reading.sharpe.map_or_else(|| "-".to_string(), |s| s.to_string()),
            reading.drawdown.to_string(),
            reading.open_positions.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
