use configuration::GateConfig;
use core_types::{GateFailure, StageResult};
use rust_decimal::Decimal;

fn failure(code: &str, metric: &str, observed: Decimal, threshold: Decimal) -> GateFailure {
    GateFailure {
        code: code.to_string(),
        metric: metric.to_string(),
        observed,
        threshold,
    }
}

/// Applies the quality gate of the result's stage. `None` means the result passes.
///
/// Only backtest and training results are gated.
pub fn evaluate(gates: &GateConfig, result: &StageResult) -> Option<GateFailure> {
    match result {
        StageResult::Backtest(backtest) => {
            let metrics = &backtest.metrics;
            if metrics.sharpe < gates.min_sharpe {
                return Some(failure(
                    "sharpe_below_threshold",
                    "sharpe",
                    metrics.sharpe,
                    gates.min_sharpe,
                ));
            }
            match gates.max_drawdown {
                Some(limit) if metrics.max_drawdown > limit => Some(failure(
                    "drawdown_above_threshold",
                    "max_drawdown",
                    metrics.max_drawdown,
                    limit,
                )),
                _ => None,
            }
        }
        StageResult::Training(training) => {
            let reward = training.metrics.eval_reward;
            (reward < gates.min_eval_reward).then(|| {
                failure(
                    "reward_below_threshold",
                    "eval_reward",
                    reward,
                    gates.min_eval_reward,
                )
            })
        }
        StageResult::Hypothesis(_) | StageResult::Deployment(_) => None,
    }
}
