//! Cycle-driving orchestration loop and its final report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::context::{LoopContext, PROMOTION_THRESHOLD};
use crate::envelope::ModuleResult;
use crate::module::ModuleError;
use crate::step::PipelineStep;

/// What the loop does when a step fails fatally (module or parameter builder
/// returned `Err`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Convert the error into a failed envelope tagged with its kind and keep going.
    #[default]
    Contain,
    /// Stop the run and return the error to the caller.
    Abort,
}

/// Reason why `run` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LoopStop {
    /// `best_score` reached the threshold at the end of `cycle`.
    ThresholdReached { cycle: u32 },
    /// All `max_cycles` ran without reaching the threshold.
    BudgetExhausted { max_cycles: u32 },
}

/// Immutable summary produced once when the loop stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousReport {
    pub cycles_executed: u32,
    pub best_score: f64,
    /// Threshold in effect during the final cycle.
    pub threshold: f64,
    pub stop: LoopStop,
    pub logs: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub artefacts: BTreeMap<String, Value>,
}

impl AutonomousReport {
    pub fn threshold_reached(&self) -> bool {
        matches!(self.stop, LoopStop::ThresholdReached { .. })
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("max_cycles must be >= 1")]
    InvalidBudget,
    #[error("stability threshold must be finite, got {0}")]
    InvalidThreshold(f64),
    #[error("step '{step}' failed in cycle {cycle}: {source}")]
    StepFailed {
        cycle: u32,
        step: String,
        #[source]
        source: ModuleError,
    },
}

/// Runs pipeline steps cycle after cycle until the best score reaches the
/// stability threshold or the cycle budget is spent.
///
/// The loop keeps no state between `run` calls besides its configuration.
pub struct AutonomousLoop<'a> {
    stability_threshold: f64,
    failure_policy: FailurePolicy,
    steps: Vec<PipelineStep<'a>>,
}

impl<'a> AutonomousLoop<'a> {
    pub fn new(config: &LoopConfig, steps: Vec<PipelineStep<'a>>) -> Self {
        Self {
            stability_threshold: config.stability_threshold,
            failure_policy: config.failure_policy,
            steps,
        }
    }

    pub fn with_threshold(stability_threshold: f64, steps: Vec<PipelineStep<'a>>) -> Self {
        Self {
            stability_threshold,
            failure_policy: FailurePolicy::default(),
            steps,
        }
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(PipelineStep::name).collect()
    }

    /// Drive up to `max_cycles` cycles against `ctx` and report the outcome.
    ///
    /// The threshold is re-read from the `promotion_threshold` metric at the
    /// start of every cycle, falling back to the configured value. A failed
    /// envelope never stops the run; fatal errors follow the failure policy.
    pub fn run(&mut self, ctx: &mut LoopContext, max_cycles: u32) -> Result<AutonomousReport, LoopError> {
        if max_cycles == 0 {
            return Err(LoopError::InvalidBudget);
        }
        if !self.stability_threshold.is_finite() {
            return Err(LoopError::InvalidThreshold(self.stability_threshold));
        }

        let mut best_score = 0.0_f64;
        let mut threshold = self.stability_threshold;
        let mut cycles_executed = 0;
        let mut stop = LoopStop::BudgetExhausted { max_cycles };

        for cycle in 1..=max_cycles {
            threshold = ctx.metric_or(PROMOTION_THRESHOLD, self.stability_threshold);
            cycles_executed = cycle;
            debug!(cycle, threshold, "cycle starting");
            ctx.add_log(format!("cycle {cycle}: starting"));

            for step in &mut self.steps {
                let name = step.name().to_string();
                let result = match step.execute(ctx) {
                    Ok(result) => result,
                    Err(err) => match self.failure_policy {
                        FailurePolicy::Contain => {
                            warn!(cycle, step = %name, kind = err.kind().as_str(), error = %err, "step failed; contained");
                            ModuleResult::from_error(&err)
                        }
                        FailurePolicy::Abort => {
                            warn!(cycle, step = %name, error = %err, "step failed; aborting run");
                            ctx.add_log(format!("{name}: aborted: {err}"));
                            return Err(LoopError::StepFailed {
                                cycle,
                                step: name,
                                source: err,
                            });
                        }
                    },
                };
                record_result(ctx, &name, &result, &mut best_score);
            }

            ctx.add_log(format!(
                "cycle {cycle}: completed with best_score={best_score:.2}"
            ));
            if best_score >= threshold {
                info!(cycle, best_score, threshold, "stability threshold reached");
                ctx.add_log("stability threshold reached; stopping loop");
                stop = LoopStop::ThresholdReached { cycle };
                break;
            }
        }

        if let LoopStop::BudgetExhausted { .. } = stop {
            info!(cycles_executed, best_score, threshold, "cycle budget exhausted");
        }

        Ok(AutonomousReport {
            cycles_executed,
            best_score,
            threshold,
            stop,
            logs: ctx.logs().to_vec(),
            metrics: ctx.metrics().clone(),
            artefacts: ctx.artefacts().clone(),
        })
    }
}

fn record_result(ctx: &mut LoopContext, name: &str, result: &ModuleResult, best_score: &mut f64) {
    if !result.success {
        debug!(step = name, "step reported failure");
    }
    for message in &result.messages {
        ctx.add_log(format!("{name}: {message}"));
    }
    if let Some(score) = result.score {
        ctx.update_metric(format!("score.{name}"), score);
        // NaN never raises the best score.
        if score > *best_score {
            *best_score = score;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ErrorKind;
    use crate::test_support::{FailingModule, ScriptedModule};

    #[test]
    fn stops_early_once_threshold_reached() {
        let mut module = ScriptedModule::with_scores("scripted", [0.5, 0.95, 0.99]);
        let mut ctx = LoopContext::new(["converge"]);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(0.9, vec![PipelineStep::new(&mut module)]);
            lp.run(&mut ctx, 3).expect("run")
        };

        assert_eq!(report.cycles_executed, 2);
        assert_eq!(report.best_score, 0.95);
        assert_eq!(report.stop, LoopStop::ThresholdReached { cycle: 2 });
        assert_eq!(module.calls(), 2);
        assert_eq!(report.metrics["score.scripted"], 0.95);
    }

    #[test]
    fn runs_whole_budget_below_threshold() {
        let mut module = ScriptedModule::with_scores("flat", [0.5]);
        let mut ctx = LoopContext::new(["converge"]);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(0.99, vec![PipelineStep::new(&mut module)]);
            lp.run(&mut ctx, 2).expect("run")
        };

        assert_eq!(report.cycles_executed, 2);
        assert_eq!(report.best_score, 0.5);
        assert_eq!(report.stop, LoopStop::BudgetExhausted { max_cycles: 2 });
        assert!(!report.threshold_reached());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut module = ScriptedModule::with_scores("s", [1.0]);
        let mut ctx = LoopContext::new(["g"]);
        let mut lp = AutonomousLoop::with_threshold(0.9, vec![PipelineStep::new(&mut module)]);
        assert!(matches!(lp.run(&mut ctx, 0), Err(LoopError::InvalidBudget)));
    }

    #[test]
    fn non_finite_threshold_is_rejected() {
        let mut ctx = LoopContext::new(["g"]);
        let mut lp = AutonomousLoop::with_threshold(f64::NAN, Vec::new());
        assert!(matches!(lp.run(&mut ctx, 1), Err(LoopError::InvalidThreshold(_))));
    }

    #[test]
    fn context_metric_overrides_configured_threshold() {
        let mut module = ScriptedModule::with_scores("s", [0.6]);
        let mut ctx = LoopContext::new(["g"]);
        ctx.update_metric(PROMOTION_THRESHOLD, 0.5);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(0.99, vec![PipelineStep::new(&mut module)]);
            lp.run(&mut ctx, 5).expect("run")
        };
        assert_eq!(report.cycles_executed, 1);
        assert_eq!(report.threshold, 0.5);
    }

    #[test]
    fn threshold_is_resolved_again_each_cycle() {
        // The first step lowers the bar mid-cycle; it only applies from the next cycle.
        let mut lowering = ScriptedModule::with_scores("lower", [0.7])
            .writing_metric(PROMOTION_THRESHOLD, 0.6);
        let mut ctx = LoopContext::new(["g"]);
        let report = {
            let mut lp =
                AutonomousLoop::with_threshold(0.9, vec![PipelineStep::new(&mut lowering)]);
            lp.run(&mut ctx, 3).expect("run")
        };
        assert_eq!(report.cycles_executed, 2);
        assert_eq!(report.threshold, 0.6);
        assert_eq!(report.stop, LoopStop::ThresholdReached { cycle: 2 });
    }

    #[test]
    fn logs_follow_step_order_and_format() {
        let mut first = ScriptedModule::with_scores("first", [0.1]).with_messages(["one", "two"]);
        let mut second = ScriptedModule::with_scores("second", [0.2]).with_messages(["three"]);
        let mut ctx = LoopContext::new(["g"]);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(
                0.9,
                vec![
                    PipelineStep::new(&mut first).named("alpha"),
                    PipelineStep::new(&mut second),
                ],
            );
            lp.run(&mut ctx, 1).expect("run")
        };

        assert_eq!(
            report.logs,
            vec![
                "cycle 1: starting",
                "alpha: one",
                "alpha: two",
                "second: three",
                "cycle 1: completed with best_score=0.20",
            ]
        );
        assert_eq!(report.metrics["score.alpha"], 0.1);
        assert_eq!(report.metrics["score.second"], 0.2);
    }

    #[test]
    fn failed_envelope_does_not_stop_run() {
        let mut failing = ScriptedModule::failing("flaky", "upstream unavailable");
        let mut ctx = LoopContext::new(["g"]);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(0.9, vec![PipelineStep::new(&mut failing)]);
            lp.run(&mut ctx, 3).expect("run")
        };
        assert_eq!(report.cycles_executed, 3);
        assert_eq!(report.best_score, 0.0);
        assert_eq!(
            report.logs.iter().filter(|l| *l == "flaky: upstream unavailable").count(),
            3
        );
    }

    #[test]
    fn contain_policy_turns_errors_into_tagged_failures() {
        let mut broken = FailingModule::missing_resource("broken", "index file");
        let mut after = ScriptedModule::with_scores("after", [0.4]);
        let mut ctx = LoopContext::new(["g"]);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(
                0.9,
                vec![PipelineStep::new(&mut broken), PipelineStep::new(&mut after)],
            );
            lp.run(&mut ctx, 2).expect("contained run")
        };

        assert_eq!(report.cycles_executed, 2);
        assert!(
            report
                .logs
                .contains(&"broken: error[missing_resource]: missing resource: index file".to_string())
        );
        assert_eq!(after.calls(), 2, "later steps still run");
        assert_eq!(report.best_score, 0.4);
        assert_eq!(broken.last_kind(), Some(ErrorKind::MissingResource));
    }

    #[test]
    fn abort_policy_returns_step_error() {
        let mut broken = FailingModule::missing_resource("broken", "index file");
        let mut after = ScriptedModule::with_scores("after", [0.4]);
        let mut ctx = LoopContext::new(["g"]);
        let err = {
            let mut lp = AutonomousLoop::with_threshold(
                0.9,
                vec![PipelineStep::new(&mut broken), PipelineStep::new(&mut after)],
            )
            .failure_policy(FailurePolicy::Abort);
            lp.run(&mut ctx, 2).expect_err("aborted run")
        };

        match err {
            LoopError::StepFailed { cycle, step, source } => {
                assert_eq!(cycle, 1);
                assert_eq!(step, "broken");
                assert_eq!(source.kind(), ErrorKind::MissingResource);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(after.calls(), 0);
        assert_eq!(
            ctx.logs().last().map(String::as_str),
            Some("broken: aborted: missing resource: index file")
        );
    }

    #[test]
    fn param_builder_failure_follows_failure_policy() {
        let mut module = ScriptedModule::with_scores("s", [0.5]);
        let mut ctx = LoopContext::new(["g"]);
        let report = {
            let step = PipelineStep::new(&mut module)
                .with_params(|_: &LoopContext| Err(anyhow::anyhow!("no parameters today")));
            let mut lp = AutonomousLoop::with_threshold(0.9, vec![step]);
            lp.run(&mut ctx, 1).expect("contained run")
        };
        assert_eq!(module.calls(), 0);
        assert!(report.logs.iter().any(|l| {
            l == "s: error[param_builder]: parameter builder failed: no parameters today"
        }));
    }

    #[test]
    fn report_is_detached_from_context() {
        let mut module = ScriptedModule::with_scores("s", [1.0]);
        let mut ctx = LoopContext::new(["g"]);
        let report = {
            let mut lp = AutonomousLoop::with_threshold(0.9, vec![PipelineStep::new(&mut module)]);
            lp.run(&mut ctx, 1).expect("run")
        };
        let logged = report.logs.len();
        ctx.add_log("later");
        ctx.update_metric("later", 1.0);
        assert_eq!(report.logs.len(), logged);
        assert!(!report.metrics.contains_key("later"));
        assert_eq!(
            report.logs.last().map(String::as_str),
            Some("stability threshold reached; stopping loop")
        );
    }
}
