//! End-to-end loop behavior across cycles.
//!
//! Drives `AutonomousLoop` with scripted modules and with the standard
//! pipeline, checking stop conditions, log shape and report stability.

use autoloop::config::LoopConfig;
use autoloop::context::{LoopContext, PROMOTION_THRESHOLD};
use autoloop::looping::{AutonomousLoop, AutonomousReport, FailurePolicy, LoopError, LoopStop};
use autoloop::module::Module;
use autoloop::standard::{DEFAULT_GOALS, StandardModules, standard_context};
use autoloop::step::PipelineStep;
use autoloop::test_support::{FailingModule, ScriptedModule};
use serde_json::json;

fn run_scripted(scores: &[f64], threshold: f64, max_cycles: u32) -> (AutonomousReport, usize) {
    let mut module = ScriptedModule::with_scores("probe", scores.iter().copied());
    let mut ctx = LoopContext::new(["converge"]);
    let report = AutonomousLoop::with_threshold(threshold, vec![PipelineStep::new(&mut module)])
        .run(&mut ctx, max_cycles)
        .expect("run");
    (report, module.calls())
}

fn cycle_best_scores(report: &AutonomousReport) -> Vec<f64> {
    report
        .logs
        .iter()
        .filter_map(|line| line.split_once("completed with best_score="))
        .map(|(_, score)| score.parse::<f64>().expect("score"))
        .collect()
}

#[test]
fn stops_once_best_score_reaches_threshold() {
    let (report, calls) = run_scripted(&[0.5, 0.95, 0.99], 0.9, 5);

    assert_eq!(report.stop, LoopStop::ThresholdReached { cycle: 2 });
    assert_eq!(report.cycles_executed, 2);
    assert_eq!(report.best_score, 0.95);
    assert_eq!(calls, 2);
    assert_eq!(
        report.logs.last().map(String::as_str),
        Some("stability threshold reached; stopping loop")
    );
}

#[test]
fn flat_scores_exhaust_the_budget() {
    let (report, calls) = run_scripted(&[0.5], 0.99, 2);

    assert_eq!(report.stop, LoopStop::BudgetExhausted { max_cycles: 2 });
    assert_eq!(report.cycles_executed, 2);
    assert_eq!(report.best_score, 0.5);
    assert_eq!(calls, 2);
    assert!(!report.threshold_reached());
}

#[test]
fn best_score_never_decreases_between_cycles() {
    let (report, _) = run_scripted(&[0.3, 0.9, 0.1, 0.2], 0.95, 4);

    let bests = cycle_best_scores(&report);
    assert_eq!(bests, vec![0.3, 0.9, 0.9, 0.9]);
    assert!(bests.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(report.best_score, 0.9);
}

#[test]
fn logs_follow_cycle_then_step_order() {
    let mut first = ScriptedModule::with_scores("first", [0.2]).with_messages(["warming up"]);
    let mut second = ScriptedModule::failing("second", "not yet");
    let mut ctx = LoopContext::new(["g"]);

    let report = AutonomousLoop::with_threshold(
        0.9,
        vec![
            PipelineStep::new(&mut first).named("a"),
            PipelineStep::new(&mut second),
        ],
    )
    .run(&mut ctx, 2)
    .expect("run");

    assert_eq!(
        report.logs,
        vec![
            "cycle 1: starting",
            "a: warming up",
            "second: not yet",
            "cycle 1: completed with best_score=0.20",
            "cycle 2: starting",
            "a: warming up",
            "second: not yet",
            "cycle 2: completed with best_score=0.20",
        ]
    );
    assert_eq!(report.metrics.get("score.a"), Some(&0.2));
    assert!(!report.metrics.contains_key("score.second"));
}

#[test]
fn rerunning_with_fresh_state_gives_identical_reports() {
    let first = run_scripted(&[0.1, 0.4, 0.7], 0.8, 5).0;
    let second = run_scripted(&[0.1, 0.4, 0.7], 0.8, 5).0;
    assert_eq!(first, second);

    let standard = || {
        let config = LoopConfig {
            stability_threshold: 2.0,
            ..LoopConfig::default()
        };
        let mut modules = StandardModules::new(&config);
        let mut ctx = standard_context(DEFAULT_GOALS, config.stability_threshold);
        AutonomousLoop::new(&config, modules.steps())
            .run(&mut ctx, 3)
            .expect("run")
    };
    assert_eq!(standard(), standard());
}

#[test]
fn context_threshold_is_reread_each_cycle() {
    let mut scorer = ScriptedModule::with_scores("scorer", [0.6]);
    let mut lowering = ScriptedModule::with_scores("lower", Vec::new()).writing_metric(PROMOTION_THRESHOLD, 0.5);
    let mut ctx = LoopContext::new(["g"]);

    // The override is written during cycle 1, so cycle 1 still uses 0.9.
    let report = AutonomousLoop::with_threshold(
        0.9,
        vec![PipelineStep::new(&mut scorer), PipelineStep::new(&mut lowering)],
    )
    .run(&mut ctx, 5)
    .expect("run");

    assert_eq!(report.stop, LoopStop::ThresholdReached { cycle: 2 });
    assert_eq!(report.threshold, 0.5);
}

#[test]
fn contained_failures_keep_the_loop_running() {
    let mut broken = FailingModule::missing_resource("broken", "model weights");
    let mut scorer = ScriptedModule::with_scores("scorer", [0.4, 1.0]);
    let mut ctx = LoopContext::new(["g"]);

    let report = AutonomousLoop::with_threshold(
        0.95,
        vec![PipelineStep::new(&mut broken), PipelineStep::new(&mut scorer)],
    )
    .run(&mut ctx, 5)
    .expect("run");

    assert_eq!(report.stop, LoopStop::ThresholdReached { cycle: 2 });
    assert!(report.logs.contains(&"broken: error[missing_resource]: missing resource: model weights".to_string()));
    assert_eq!(broken.calls(), 2);
}

#[test]
fn abort_policy_surfaces_the_step_error() {
    let mut broken = FailingModule::missing_resource("broken", "model weights");
    let mut ctx = LoopContext::new(["g"]);

    let err = AutonomousLoop::with_threshold(0.95, vec![PipelineStep::new(&mut broken)])
        .failure_policy(FailurePolicy::Abort)
        .run(&mut ctx, 5)
        .expect_err("abort");

    match err {
        LoopError::StepFailed { cycle, step, .. } => {
            assert_eq!(cycle, 1);
            assert_eq!(step, "broken");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        ctx.logs().last().map(String::as_str),
        Some("broken: aborted: missing resource: model weights")
    );
}

#[test]
fn standard_pipeline_accumulates_state_across_cycles() {
    let config = LoopConfig {
        stability_threshold: 2.0,
        ..LoopConfig::default()
    };
    let mut modules = StandardModules::new(&config);
    let mut ctx = standard_context(["stay curious"], config.stability_threshold);

    let report = AutonomousLoop::new(&config, modules.steps())
        .run(&mut ctx, 3)
        .expect("run");

    assert_eq!(report.stop, LoopStop::BudgetExhausted { max_cycles: 3 });
    assert_eq!(report.best_score, 1.0);
    assert_eq!(report.artefacts["evolution.version"], json!("0.0.3"));
    assert!(report.metrics.contains_key("trainer.avg_outcome"));
    assert!(report.metrics.contains_key("feedback.weights"));
    assert_eq!(report.metrics.get("score.selfaudit"), Some(&1.0));
    assert_eq!(report.metrics.get(PROMOTION_THRESHOLD), Some(&2.0));
    assert_eq!(
        report
            .logs
            .iter()
            .filter(|line| line.as_str() == "synthesizer: generated 1 artefacts")
            .count(),
        3
    );

    // Modules outlive the loop and keep their private state.
    assert_eq!(modules.trainer.history().len(), 6);
    assert_eq!(modules.evolution.history().len(), 3);
    assert!(modules.feedback.weight() <= 1.0);
    assert_eq!(modules.synthesizer.name(), "synthesizer");
}
