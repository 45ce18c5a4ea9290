// src/engine/budget.rs

//! Token/cost budget accounting and breach detection.

use serde_json::json;
use tracing::warn;

use crate::config::model::{BudgetMode, BudgetSection};
use crate::engine::StopReason;
use crate::ports::events::EventSink;
use crate::state::model::RunState;

/// One detected budget breach.
#[derive(Debug, Clone, PartialEq)]
pub enum Breach {
    TaskTokens {
        task_id: String,
        used: u64,
        limit: u64,
    },
    RunTokens {
        used: u64,
        limit: u64,
    },
    RunCost {
        used: f64,
        limit: f64,
    },
}

/// Detect breaches against the configured limits. Zero limits disable the
/// corresponding check.
pub fn detect_breaches(state: &RunState, budget: &BudgetSection) -> Vec<Breach> {
    let mut breaches = Vec::new();

    if budget.max_tokens_per_task > 0 {
        for (task_id, task) in state.tasks.iter() {
            if task.tokens_used > budget.max_tokens_per_task {
                breaches.push(Breach::TaskTokens {
                    task_id: task_id.clone(),
                    used: task.tokens_used,
                    limit: budget.max_tokens_per_task,
                });
            }
        }
    }

    if budget.max_tokens_per_run > 0 && state.tokens_used > budget.max_tokens_per_run {
        breaches.push(Breach::RunTokens {
            used: state.tokens_used,
            limit: budget.max_tokens_per_run,
        });
    }

    if budget.max_cost_per_run > 0.0 && state.estimated_cost > budget.max_cost_per_run {
        breaches.push(Breach::RunCost {
            used: state.estimated_cost,
            limit: budget.max_cost_per_run,
        });
    }

    breaches
}

/// Emit events for breaches and decide whether the run must stop.
///
/// `warn` mode emits `budget.warn` per breach; `block` mode emits
/// `budget.block` and returns [`StopReason::BudgetBlock`].
pub fn handle_breaches(
    breaches: &[Breach],
    budget: &BudgetSection,
    events: &dyn EventSink,
) -> Option<StopReason> {
    if breaches.is_empty() {
        return None;
    }

    for breach in breaches {
        let (task_id, payload) = match breach {
            Breach::TaskTokens {
                task_id,
                used,
                limit,
            } => (
                Some(task_id.as_str()),
                json!({"kind": "task_tokens", "used": used, "limit": limit}),
            ),
            Breach::RunTokens { used, limit } => {
                (None, json!({"kind": "run_tokens", "used": used, "limit": limit}))
            }
            Breach::RunCost { used, limit } => {
                (None, json!({"kind": "run_cost", "used": used, "limit": limit}))
            }
        };

        match budget.mode {
            BudgetMode::Warn => {
                warn!(?breach, "budget breach (warn mode)");
                events.log("budget.warn", task_id, payload);
            }
            BudgetMode::Block => {
                warn!(?breach, "budget breach (block mode)");
                events.log("budget.block", task_id, payload);
            }
        }
    }

    match budget.mode {
        BudgetMode::Warn => None,
        BudgetMode::Block => Some(StopReason::BudgetBlock),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn state_with_usage(task_tokens: u64, run_tokens: u64, cost: f64) -> RunState {
        let mut state = RunState::new(
            "run-1",
            "demo",
            PathBuf::from("/repo"),
            "main",
            ["a".to_string()],
        );
        state.tasks.get_mut("a").unwrap().tokens_used = task_tokens;
        state.tokens_used = run_tokens;
        state.estimated_cost = cost;
        state
    }

    #[test]
    fn zero_limits_disable_checks() {
        let state = state_with_usage(1_000_000, 1_000_000, 100.0);
        let budget = BudgetSection::default();
        assert!(detect_breaches(&state, &budget).is_empty());
    }

    #[test]
    fn per_task_and_per_run_limits_are_independent() {
        let state = state_with_usage(150, 150, 0.0);
        let budget = BudgetSection {
            max_tokens_per_task: 100,
            max_tokens_per_run: 1000,
            ..Default::default()
        };
        let breaches = detect_breaches(&state, &budget);
        assert_eq!(breaches.len(), 1);
        assert!(matches!(breaches[0], Breach::TaskTokens { .. }));
    }

    #[test]
    fn cost_limit_breach_is_detected() {
        let state = state_with_usage(0, 0, 12.5);
        let budget = BudgetSection {
            max_cost_per_run: 10.0,
            ..Default::default()
        };
        let breaches = detect_breaches(&state, &budget);
        assert!(matches!(breaches[0], Breach::RunCost { .. }));
    }
}
