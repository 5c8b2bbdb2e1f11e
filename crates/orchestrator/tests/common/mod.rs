#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use configuration::{CapitalLimits, GateConfig, OrchestratorConfig};
use core_types::{
    ArtifactRef, BacktestMetrics, BacktestResult, DeploymentResult, GenerationRequest,
    HypothesisResult, JobHandle, PerformanceSnapshot, RiskConstraints,
    Stage, StageResult, StrategyDefinition, StrategyId, StrategyRecord, TrainingMetrics,
    TrainingResult,
};
use database::{DbError, InMemoryStore, Page, PageToken, StateStore, StatusFilter};
use orchestrator::Orchestrator;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use stages::{
    CollaboratorError, CollaboratorErrorKind, DeploymentStatus, DeploymentTarget, LiveMetrics,
    PerformanceFeed, StageAdapter, StageAdapters, StageContext, StageError, StageOutput,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn request(seed: u64) -> GenerationRequest {
    GenerationRequest {
        universe: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        risk: RiskConstraints {
            max_leverage: dec!(2),
            max_position_pct: dec!(0.25),
            max_drawdown: dec!(0.2),
        },
        seed,
    }
}

pub fn hypothesis() -> StageResult {
    StageResult::Hypothesis(HypothesisResult {
        definition: StrategyDefinition {
            version: 1,
            seed: 7,
            payload: json!({"family": "momentum", "lookback": 20}),
            generated_at: Utc::now(),
        },
        rationale: Some("trend follower".to_string()),
    })
}

pub fn backtest(sharpe: Decimal) -> StageResult {
    StageResult::Backtest(BacktestResult {
        metrics: BacktestMetrics {
            total_return: dec!(0.18),
            sharpe,
            max_drawdown: dec!(0.09),
            trades: 120,
        },
        report: ArtifactRef("reports/bt.json".to_string()),
    })
}

pub fn training(eval_reward: Decimal) -> StageResult {
    StageResult::Training(TrainingResult {
        metrics: TrainingMetrics {
            eval_reward,
            timesteps: 50_000,
        },
        model: ArtifactRef("models/ppo.zip".to_string()),
    })
}

pub fn deployment() -> StageResult {
    StageResult::Deployment(DeploymentResult {
        deployment: JobHandle("dep-1".to_string()),
        venue: "paper".to_string(),
        deployed_at: Utc::now(),
    })
}

/// One scripted response of a `ScriptedAdapter`.
#[derive(Debug, Clone)]
pub enum Scripted {
    Complete(StageResult),
    Pending(&'static str),
    Transient(&'static str),
    Permanent(&'static str),
}

/// Replays a fixed script of responses and counts how it was called.
pub struct ScriptedAdapter {
    stage: Stage,
    script: Mutex<VecDeque<Scripted>>,
    delay: Duration,
    pub runs: AtomicUsize,
    pub polls: AtomicUsize,
    pub polled_handles: Mutex<Vec<JobHandle>>,
    pub keys: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(stage: Stage, script: Vec<Scripted>) -> Arc<Self> {
        Self::with_delay(stage, script, Duration::ZERO)
    }

    /// Sleeps before every response, so concurrent callers overlap.
    pub fn with_delay(stage: Stage, script: Vec<Scripted>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            stage,
            script: Mutex::new(script.into()),
            delay,
            runs: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            polled_handles: Mutex::new(Vec::new()),
            keys: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.runs.load(Ordering::SeqCst) + self.polls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<StageOutput, StageError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Complete(result)) => Ok(StageOutput::Complete(result)),
            Some(Scripted::Pending(handle)) => Ok(StageOutput::Pending(JobHandle(handle.to_string()))),
            Some(Scripted::Transient(detail)) => Err(StageError::transient(detail)),
            Some(Scripted::Permanent(detail)) => Err(StageError::permanent(detail)),
            None => Err(StageError::permanent(format!("{} script exhausted", self.stage))),
        }
    }
}

#[async_trait]
impl StageAdapter for ScriptedAdapter {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn run(&self, context: &StageContext) -> Result<StageOutput, StageError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(context.idempotency_key());
        self.respond().await
    }

    async fn poll(&self, _context: &StageContext, handle: &JobHandle) -> Result<StageOutput, StageError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.polled_handles.lock().unwrap().push(handle.clone());
        self.respond().await
    }
}

pub struct StaticFeed;

#[async_trait]
impl PerformanceFeed for StaticFeed {
    async fn snapshot(
        &self,
        strategy_id: StrategyId,
        _deployment: &JobHandle,
    ) -> Result<PerformanceSnapshot, StageError> {
        Ok(PerformanceSnapshot {
            strategy_id,
            observed_at: Utc::now(),
            pnl: dec!(42.5),
            sharpe: Some(dec!(1.3)),
            drawdown: dec!(0.03),
            open_positions: 2,
        })
    }
}

/// The four scripted adapters of one test.
pub struct Script {
    pub hypothesis: Arc<ScriptedAdapter>,
    pub backtest: Arc<ScriptedAdapter>,
    pub training: Arc<ScriptedAdapter>,
    pub deployment: Arc<ScriptedAdapter>,
}

impl Script {
    pub fn new(
        hypothesis: Vec<Scripted>,
        backtest: Vec<Scripted>,
        training: Vec<Scripted>,
        deployment: Vec<Scripted>,
    ) -> Self {
        Self {
            hypothesis: ScriptedAdapter::new(Stage::Hypothesis, hypothesis),
            backtest: ScriptedAdapter::new(Stage::Backtest, backtest),
            training: ScriptedAdapter::new(Stage::Training, training),
            deployment: ScriptedAdapter::new(Stage::Deployment, deployment),
        }
    }

    /// The S1 path: every stage succeeds, training goes through one pending poll.
    pub fn happy() -> Self {
        Self::new(
            vec![Scripted::Complete(hypothesis())],
            vec![Scripted::Complete(backtest(dec!(1.4)))],
            vec![Scripted::Pending("H1"), Scripted::Complete(training(dec!(0.8)))],
            vec![Scripted::Complete(deployment())],
        )
    }

    pub fn adapters(&self) -> StageAdapters {
        self.adapters_with_deployment(self.deployment.clone())
    }

    /// The scripted first three stages in front of a real deployment adapter.
    pub fn adapters_with_deployment(&self, deployment: Arc<dyn StageAdapter>) -> StageAdapters {
        StageAdapters::new(
            self.hypothesis.clone(),
            self.backtest.clone(),
            self.training.clone(),
            deployment,
            Arc::new(StaticFeed),
        )
    }
}

/// A venue whose first few status checks fail with a connectivity error.
pub struct FlakyVenue {
    failing_status_checks: AtomicUsize,
    pub deploy_keys: Mutex<Vec<String>>,
}

impl FlakyVenue {
    pub fn new(failing_status_checks: usize) -> Arc<Self> {
        Arc::new(Self {
            failing_status_checks: AtomicUsize::new(failing_status_checks),
            deploy_keys: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DeploymentTarget for FlakyVenue {
    async fn deploy(
        &self,
        _definition: &StrategyDefinition,
        _model: &ArtifactRef,
        _limits: &CapitalLimits,
        idempotency_key: &str,
    ) -> Result<JobHandle, CollaboratorError> {
        self.deploy_keys.lock().unwrap().push(idempotency_key.to_string());
        Ok(JobHandle(format!("venue-{idempotency_key}")))
    }

    async fn status(&self, _deployment: &JobHandle) -> Result<DeploymentStatus, CollaboratorError> {
        let failing = self
            .failing_status_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::new(
                CollaboratorErrorKind::Connectivity,
                "venue unreachable",
            ));
        }
        Ok(DeploymentStatus::Live {
            venue: "paper".to_string(),
        })
    }

    async fn performance(&self, _deployment: &JobHandle) -> Result<LiveMetrics, CollaboratorError> {
        Ok(LiveMetrics {
            pnl: Decimal::ZERO,
            sharpe: None,
            drawdown: Decimal::ZERO,
            open_positions: 0,
        })
    }
}

/// Retries and polls become due immediately.
pub fn eager_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_backoff: Duration::ZERO,
        poll_interval: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(
    store: Arc<dyn StateStore>,
    script: &Script,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(store, script.adapters(), config, GateConfig::default())
}

pub async fn seeded_store(seed: u64) -> (Arc<InMemoryStore>, StrategyId) {
    let store = Arc::new(InMemoryStore::new());
    let record = store
        .create(&StrategyRecord::new(request(seed), Utc::now()))
        .await
        .expect("create");
    (store, record.strategy_id)
}

type Interference = Box<dyn Fn(&mut StrategyRecord) + Send + Sync>;

/// Lets another "writer" sneak in between an orchestrator's read and its write.
///
/// While armed, every `conditional_write` first applies the interference to the
/// stored record, so the caller's write then conflicts.
pub struct RacingStore {
    pub inner: InMemoryStore,
    interference: Mutex<Option<(usize, Interference)>>,
    pub interferences: AtomicUsize,
}

impl RacingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            interference: Mutex::new(None),
            interferences: AtomicUsize::new(0),
        }
    }

    pub fn interfere(&self, times: usize, change: impl Fn(&mut StrategyRecord) + Send + Sync + 'static) {
        *self.interference.lock().unwrap() = Some((times, Box::new(change)));
    }

    fn take_change(&self, record: &mut StrategyRecord) -> bool {
        let mut guard = self.interference.lock().unwrap();
        let Some((remaining, change)) = guard.as_mut() else {
            return false;
        };
        change(record);
        *remaining -= 1;
        if *remaining == 0 {
            *guard = None;
        }
        true
    }
}

#[async_trait]
impl StateStore for RacingStore {
    async fn create(&self, record: &StrategyRecord) -> Result<StrategyRecord, DbError> {
        self.inner.create(record).await
    }

    async fn read(&self, strategy_id: StrategyId) -> Result<StrategyRecord, DbError> {
        self.inner.read(strategy_id).await
    }

    async fn conditional_write(
        &self,
        strategy_id: StrategyId,
        expected_version: u64,
        record: &StrategyRecord,
    ) -> Result<u64, DbError> {
        let mut current = self.inner.read(strategy_id).await?;
        if self.take_change(&mut current) {
            self.interferences.fetch_add(1, Ordering::SeqCst);
            self.inner
                .conditional_write(strategy_id, current.version, &current)
                .await?;
        }
        self.inner
            .conditional_write(strategy_id, expected_version, record)
            .await
    }

    async fn list(
        &self,
        filter: &StatusFilter,
        page_token: Option<&PageToken>,
        limit: u32,
    ) -> Result<Page, DbError> {
        self.inner.list(filter, page_token, limit).await
    }

    async fn record_performance(&self, snapshot: &PerformanceSnapshot) -> Result<(), DbError> {
        self.inner.record_performance(snapshot).await
    }

    async fn performance(
        &self,
        strategy_id: StrategyId,
        limit: u32,
    ) -> Result<Vec<PerformanceSnapshot>, DbError> {
        self.inner.performance(strategy_id, limit).await
    }
}

/// The stored version; unchanged versions prove that nothing was written.
pub async fn version_of(store: &dyn StateStore, id: StrategyId) -> u64 {
    store.read(id).await.expect("read").version
}

pub fn per_stage_ceiling(stage: Stage, ceiling: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        max_attempts: HashMap::from([(stage, ceiling)]),
        ..eager_config()
    }
}
