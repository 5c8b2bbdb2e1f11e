mod common;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use core_types::{
    EntryOutcome, JobHandle, Lease, Stage, StageResult, StrategyStatus,
};
use configuration::{CapitalLimits, GateConfig, OrchestratorConfig};
use database::StateStore;
use orchestrator::{AdvanceOutcome, Orchestrator, OrchestratorError};
use rust_decimal_macros::dec;
use stages::DeploymentAdapter;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn happy_path_walks_every_edge_one_advance_at_a_time() -> Result<()> {
    let (store, id) = seeded_store(7).await;
    let script = Script::happy();
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    let expected = [
        (StrategyStatus::PendingHypothesis, StrategyStatus::Hypothesized),
        (StrategyStatus::Hypothesized, StrategyStatus::Backtesting),
        (StrategyStatus::Backtesting, StrategyStatus::Backtested),
        (StrategyStatus::Backtested, StrategyStatus::Training),
    ];
    for (from, to) in expected {
        assert_eq!(
            orchestrator.advance(id).await?,
            AdvanceOutcome::Advanced { from, to }
        );
        assert_eq!(store.read(id).await?.status, to);
    }

    // Training hands back a resumable handle first; the status does not move.
    assert_eq!(
        orchestrator.advance(id).await?,
        AdvanceOutcome::Waiting {
            handle: JobHandle("H1".to_string())
        }
    );
    let waiting = store.read(id).await?;
    assert_eq!(waiting.status, StrategyStatus::Training);
    assert_eq!(waiting.pending.as_ref().map(|p| p.handle.0.as_str()), Some("H1"));

    for (from, to) in [
        (StrategyStatus::Training, StrategyStatus::Trained),
        (StrategyStatus::Trained, StrategyStatus::Deploying),
        (StrategyStatus::Deploying, StrategyStatus::Deployed),
    ] {
        assert_eq!(
            orchestrator.advance(id).await?,
            AdvanceOutcome::Advanced { from, to }
        );
    }

    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Deployed);
    assert!(record.definition.is_some());
    assert!(record.pending.is_none());
    assert_eq!(
        record.stage_results.keys().copied().collect::<Vec<_>>(),
        Stage::ALL.to_vec()
    );
    assert_eq!(
        record.completed_result(Stage::Backtest).unwrap().metrics()["sharpe"],
        dec!(1.4)
    );
    // One write per edge plus the waiting write, on top of the initial create.
    assert_eq!(record.version, 1 + 8);

    // The poll used the stored handle, and no stage ran twice.
    assert_eq!(
        *script.training.polled_handles.lock().unwrap(),
        vec![JobHandle("H1".to_string())]
    );
    assert_eq!(script.training.runs.load(Ordering::SeqCst), 1);
    assert_eq!(script.hypothesis.calls(), 1);
    assert_eq!(script.deployment.calls(), 1);

    assert_eq!(orchestrator.advance(id).await?, AdvanceOutcome::Noop);
    assert_eq!(version_of(store.as_ref(), id).await, record.version);
    Ok(())
}

#[tokio::test]
async fn low_sharpe_is_rejected_and_training_never_starts() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(
        vec![Scripted::Complete(hypothesis())],
        vec![Scripted::Complete(backtest(dec!(0.7)))],
        vec![],
        vec![],
    );
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    orchestrator.advance(id).await?;
    orchestrator.advance(id).await?;
    match orchestrator.advance(id).await? {
        AdvanceOutcome::Rejected { gate } => {
            assert_eq!(gate.code, "sharpe_below_threshold");
            assert_eq!(gate.observed, dec!(0.7));
            assert_eq!(gate.threshold, dec!(1.0));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Rejected);
    assert_eq!(
        record.terminal_reason.as_ref().map(|r| r.code.as_str()),
        Some("sharpe_below_threshold")
    );
    assert!(matches!(
        record.stage_results[&Stage::Backtest].outcome,
        EntryOutcome::Rejected { .. }
    ));

    assert_eq!(orchestrator.advance(id).await?, AdvanceOutcome::Noop);
    assert_eq!(script.training.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn low_reward_rejects_from_training() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(
        vec![Scripted::Complete(hypothesis())],
        vec![Scripted::Complete(backtest(dec!(2.0)))],
        vec![Scripted::Complete(training(dec!(0.2)))],
        vec![],
    );
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    for _ in 0..4 {
        orchestrator.advance(id).await?;
    }
    let outcome = orchestrator.advance(id).await?;
    assert!(matches!(outcome, AdvanceOutcome::Rejected { ref gate } if gate.code == "reward_below_threshold"));
    assert_eq!(store.read(id).await?.status, StrategyStatus::Rejected);
    assert_eq!(script.deployment.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn transient_failures_retry_until_the_ceiling() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(
        vec![Scripted::Complete(hypothesis())],
        vec![
            Scripted::Transient("engine timeout"),
            Scripted::Transient("engine timeout"),
            Scripted::Transient("engine timeout"),
        ],
        vec![],
        vec![],
    );
    let orchestrator = orchestrator(store.clone(), &script, eager_config());
    orchestrator.advance(id).await?;
    orchestrator.advance(id).await?;

    for expected_attempt in 1..=2 {
        let outcome = orchestrator.advance(id).await?;
        assert!(
            matches!(outcome, AdvanceOutcome::Retrying { attempt, .. } if attempt == expected_attempt),
            "{outcome:?}"
        );
        let record = store.read(id).await?;
        assert_eq!(record.status, StrategyStatus::Backtesting);
        assert_eq!(record.attempts_for(Stage::Backtest), expected_attempt);
        assert!(record.last_error.is_some());
    }

    // The third failure reaches the default ceiling of 3.
    let outcome = orchestrator.advance(id).await?;
    assert!(matches!(outcome, AdvanceOutcome::Failed { ref reason } if reason.code == "retries_exhausted"));
    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Failed);
    assert!(matches!(
        record.stage_results[&Stage::Backtest].outcome,
        EntryOutcome::Failed { .. }
    ));
    assert_eq!(script.backtest.calls(), 3);

    // Retries reuse one key, so the collaborator can collapse them.
    let keys = script.backtest.keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys[0], format!("{id}:backtest"));
    assert!(keys.iter().all(|key| *key == keys[0]));
    Ok(())
}

#[tokio::test]
async fn per_stage_ceiling_overrides_the_default() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(vec![Scripted::Transient("busy")], vec![], vec![], vec![]);
    let orchestrator = orchestrator(store.clone(), &script, per_stage_ceiling(Stage::Hypothesis, 1));

    let outcome = orchestrator.advance(id).await?;
    assert!(matches!(outcome, AdvanceOutcome::Failed { .. }));
    assert_eq!(store.read(id).await?.status, StrategyStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn permanent_failure_fails_without_retry() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(
        vec![Scripted::Permanent("universe is empty")],
        vec![],
        vec![],
        vec![],
    );
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    let outcome = orchestrator.advance(id).await?;
    assert!(matches!(outcome, AdvanceOutcome::Failed { ref reason } if reason.code == "permanent_error"));

    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Failed);
    assert_eq!(record.attempts_for(Stage::Hypothesis), 0);
    assert!(record.terminal_reason.unwrap().detail.contains("universe is empty"));
    assert_eq!(script.hypothesis.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn result_for_the_wrong_stage_is_a_permanent_failure() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(
        vec![Scripted::Complete(backtest(dec!(2.0)))],
        vec![],
        vec![],
        vec![],
    );
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    let outcome = orchestrator.advance(id).await?;
    assert!(matches!(outcome, AdvanceOutcome::Failed { ref reason } if reason.code == "invalid_result"));
    assert!(store.read(id).await?.definition.is_none());
    Ok(())
}

#[tokio::test]
async fn terminal_strategy_is_never_written() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(vec![Scripted::Permanent("bad")], vec![], vec![], vec![]);
    let orchestrator = orchestrator(store.clone(), &script, eager_config());
    orchestrator.advance(id).await?;
    let version = version_of(store.as_ref(), id).await;

    for _ in 0..3 {
        assert_eq!(orchestrator.advance(id).await?, AdvanceOutcome::Noop);
    }
    assert_eq!(version_of(store.as_ref(), id).await, version);
    assert_eq!(script.hypothesis.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn backoff_defers_the_next_attempt() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(
        vec![Scripted::Transient("rate limited"), Scripted::Complete(hypothesis())],
        vec![],
        vec![],
        vec![],
    );
    // Default backoff is 30s.
    let orchestrator = orchestrator(store.clone(), &script, configuration::OrchestratorConfig::default());

    assert!(matches!(orchestrator.advance(id).await?, AdvanceOutcome::Retrying { .. }));
    let version = version_of(store.as_ref(), id).await;

    assert!(matches!(orchestrator.advance(id).await?, AdvanceOutcome::NotDue { .. }));
    assert_eq!(version_of(store.as_ref(), id).await, version);
    assert_eq!(script.hypothesis.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn foreign_lease_blocks_advance_until_it_expires() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::new(vec![Scripted::Complete(hypothesis())], vec![], vec![], vec![]);
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    let mut record = store.read(id).await?;
    let lease = Lease::new("worker-b", Utc::now(), ChronoDuration::minutes(5));
    record.lease = Some(lease.clone());
    store.conditional_write(id, record.version, &record).await?;

    assert_eq!(orchestrator.advance(id).await?, AdvanceOutcome::Leased);
    assert_eq!(script.hypothesis.calls(), 0);

    // The lease holder may advance, and its write releases the lease.
    let outcome = orchestrator.advance_leased(id, &lease).await?;
    assert!(matches!(outcome, AdvanceOutcome::Advanced { .. }));
    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Hypothesized);
    assert!(record.lease.is_none());
    Ok(())
}

#[tokio::test]
async fn two_concurrent_advances_write_the_transition_once() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let slow = ScriptedAdapter::with_delay(
        Stage::Hypothesis,
        vec![Scripted::Complete(hypothesis()), Scripted::Complete(hypothesis())],
        std::time::Duration::from_millis(50),
    );
    let script = Script {
        hypothesis: slow,
        ..Script::happy()
    };
    let orchestrator = Arc::new(orchestrator(store.clone(), &script, eager_config()));

    let calls = (0..2).map(|_| {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.advance(id).await })
    });
    let outcomes: Vec<AdvanceOutcome> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("advance failed"))
        .collect();

    let advanced = outcomes
        .iter()
        .filter(|o| matches!(o, AdvanceOutcome::Advanced { .. }))
        .count();
    let superseded = outcomes
        .iter()
        .filter(|o| matches!(o, AdvanceOutcome::Superseded { .. }))
        .count();
    assert_eq!((advanced, superseded), (1, 1), "{outcomes:?}");

    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Hypothesized);
    assert_eq!(record.version, 2);
    assert_eq!(record.stage_results.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_discards_an_in_flight_result() -> Result<()> {
    let store = Arc::new(RacingStore::new());
    let id = store
        .create(&core_types::StrategyRecord::new(request(1), Utc::now()))
        .await?
        .strategy_id;
    let script = Script::happy();
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    // An operator cancels while the hypothesis adapter is running.
    store.interfere(1, |record| {
        record
            .transition(StrategyStatus::Cancelled, Utc::now())
            .expect("cancel edge");
    });

    let outcome = orchestrator.advance(id).await?;
    assert_eq!(
        outcome,
        AdvanceOutcome::Superseded {
            observed: StrategyStatus::PendingHypothesis,
            current: StrategyStatus::Cancelled,
        }
    );
    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Cancelled);
    assert!(record.stage_results.is_empty());
    assert!(record.definition.is_none());
    Ok(())
}

#[tokio::test]
async fn same_status_conflict_is_recomputed() -> Result<()> {
    let store = Arc::new(RacingStore::new());
    let id = store
        .create(&core_types::StrategyRecord::new(request(1), Utc::now()))
        .await?
        .strategy_id;
    let script = Script::new(
        vec![Scripted::Complete(hypothesis()), Scripted::Complete(hypothesis())],
        vec![],
        vec![],
        vec![],
    );
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    // Someone touches the record without moving it.
    store.interfere(1, |record| record.updated_at = Utc::now());

    let outcome = orchestrator.advance(id).await?;
    assert!(matches!(outcome, AdvanceOutcome::Advanced { .. }));
    assert_eq!(script.hypothesis.calls(), 2);
    assert_eq!(store.read(id).await?.version, 3);
    Ok(())
}

#[tokio::test]
async fn endless_conflicts_are_bounded() -> Result<()> {
    let store = Arc::new(RacingStore::new());
    let id = store
        .create(&core_types::StrategyRecord::new(request(1), Utc::now()))
        .await?
        .strategy_id;
    let script = Script::new(
        (0..10).map(|_| Scripted::Complete(hypothesis())).collect(),
        vec![],
        vec![],
        vec![],
    );
    let config = configuration::OrchestratorConfig {
        max_conflict_retries: 2,
        ..eager_config()
    };
    let orchestrator = orchestrator(store.clone(), &script, config);
    store.interfere(100, |record| record.updated_at = Utc::now());

    let result = orchestrator.advance(id).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::ConflictRetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(store.read(id).await?.status, StrategyStatus::PendingHypothesis);
    Ok(())
}

#[tokio::test]
async fn cancel_is_terminal_and_idempotent() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::happy();
    let orchestrator = orchestrator(store.clone(), &script, eager_config());
    orchestrator.advance(id).await?;

    assert!(orchestrator.cancel(id, "operator request").await?);
    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Cancelled);
    assert_eq!(record.terminal_reason.as_ref().unwrap().detail, "operator request");
    let version = record.version;

    assert!(!orchestrator.cancel(id, "again").await?);
    assert_eq!(orchestrator.advance(id).await?, AdvanceOutcome::Noop);
    assert_eq!(version_of(store.as_ref(), id).await, version);
    Ok(())
}

#[tokio::test]
async fn requeue_starts_a_new_lineage_and_leaves_the_parent_alone() -> Result<()> {
    let (store, id) = seeded_store(7).await;
    let script = Script::new(vec![Scripted::Permanent("bad universe")], vec![], vec![], vec![]);
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    assert!(matches!(
        orchestrator.requeue(id, "retry", "ops", false).await,
        Err(OrchestratorError::NotTerminal { .. })
    ));

    orchestrator.advance(id).await?;
    let parent_before = store.read(id).await?;

    let child_id = orchestrator.requeue(id, "new data", "ops", false).await?;
    assert_ne!(child_id, id);
    let child = store.read(child_id).await?;
    assert_eq!(child.status, StrategyStatus::PendingHypothesis);
    assert_eq!(child.request, parent_before.request);
    let lineage = child.lineage.clone().unwrap();
    assert_eq!(lineage.parent_id, id);
    assert_eq!(lineage.root_id, id);
    assert_eq!(lineage.generation, 1);
    assert_eq!(lineage.definition_version, 1);
    assert_eq!(lineage.requested_by, "ops");
    assert_eq!(store.read(id).await?, parent_before);

    // Cancel the child, regenerate from it: the root is kept, the seed and version move.
    orchestrator.cancel(child_id, "superseded").await?;
    let grandchild_id = orchestrator.requeue(child_id, "regenerate", "ops", true).await?;
    let grandchild = store.read(grandchild_id).await?;
    let lineage = grandchild.lineage.unwrap();
    assert_eq!(lineage.parent_id, child_id);
    assert_eq!(lineage.root_id, id);
    assert_eq!(lineage.generation, 2);
    assert_eq!(lineage.definition_version, 2);
    assert_eq!(grandchild.request.seed, 8);
    Ok(())
}

#[tokio::test]
async fn archive_only_applies_to_terminal_strategies() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::happy();
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    assert!(matches!(
        orchestrator.archive(id).await,
        Err(OrchestratorError::NotTerminal { .. })
    ));
    orchestrator.cancel(id, "done").await?;
    assert!(orchestrator.archive(id).await?);
    assert!(!orchestrator.archive(id).await?);

    let record = store.read(id).await?;
    assert!(record.archived);
    assert_eq!(record.status, StrategyStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn performance_is_collected_for_deployed_strategies_only() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::happy();
    let orchestrator = orchestrator(store.clone(), &script, eager_config());

    assert!(matches!(
        orchestrator.collect_performance(id).await,
        Err(OrchestratorError::NotDeployed { .. })
    ));

    while !store.read(id).await?.is_terminal() {
        orchestrator.advance(id).await?;
    }
    assert_eq!(store.read(id).await?.status, StrategyStatus::Deployed);
    assert!(matches!(
        store.read(id).await?.completed_result(Stage::Deployment),
        Some(StageResult::Deployment(_))
    ));

    let snapshot = orchestrator.collect_performance(id).await?;
    assert_eq!(snapshot.pnl, dec!(42.5));
    let stored = store.performance(id, 10).await?;
    assert_eq!(stored, vec![snapshot]);
    Ok(())
}

#[tokio::test]
async fn failed_status_check_resumes_the_accepted_deployment() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::happy();
    let venue = FlakyVenue::new(1);
    let deployment = Arc::new(DeploymentAdapter::new(venue.clone(), CapitalLimits::default()));
    let orchestrator = Orchestrator::new(
        store.clone(),
        script.adapters_with_deployment(deployment),
        eager_config(),
        GateConfig::default(),
    );

    let mut outcomes = Vec::new();
    for _ in 0..20 {
        if store.read(id).await?.is_terminal() {
            break;
        }
        outcomes.push(orchestrator.advance(id).await?);
    }

    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::Deployed, "{outcomes:?}");
    assert!(
        outcomes
            .iter()
            .any(|outcome| matches!(outcome, AdvanceOutcome::Retrying { attempt: 1, .. })),
        "the status check should have failed once: {outcomes:?}"
    );

    // The venue saw exactly one deployment, and the record points at it.
    let keys = venue.deploy_keys.lock().unwrap().clone();
    assert_eq!(keys, vec![format!("{id}:deployment")]);
    match record.completed_result(Stage::Deployment) {
        Some(StageResult::Deployment(deployed)) => {
            assert_eq!(deployed.deployment, JobHandle(format!("venue-{id}:deployment")))
        }
        other => panic!("expected a deployment result, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn hung_stage_times_out_as_a_transient_failure() -> Result<()> {
    let (store, id) = seeded_store(1).await;
    let script = Script::happy();
    let hung = ScriptedAdapter::with_delay(
        Stage::Hypothesis,
        vec![Scripted::Complete(hypothesis())],
        Duration::from_secs(3600),
    );
    let adapters = stages::StageAdapters::new(
        hung.clone(),
        script.backtest.clone(),
        script.training.clone(),
        script.deployment.clone(),
        Arc::new(StaticFeed),
    );
    let config = OrchestratorConfig {
        stage_timeout: Duration::from_millis(20),
        ..eager_config()
    };
    let orchestrator = Orchestrator::new(store.clone(), adapters, config, GateConfig::default());

    let outcome = tokio::time::timeout(Duration::from_secs(5), orchestrator.advance(id)).await??;
    assert!(
        matches!(outcome, AdvanceOutcome::Retrying { attempt: 1, .. }),
        "{outcome:?}"
    );

    let record = store.read(id).await?;
    assert_eq!(record.status, StrategyStatus::PendingHypothesis);
    assert_eq!(record.attempts_for(Stage::Hypothesis), 1);
    let error = record.last_error.expect("timeout is recorded");
    assert_eq!(error.kind, core_types::FailureKind::Transient);
    assert!(error.detail.contains("timed out"), "{}", error.detail);
    assert_eq!(hung.runs.load(Ordering::SeqCst), 1);
    Ok(())
}
