//! The default self-improvement pipeline: synthesize, train, collect
//! feedback, audit, evolve.

use serde_json::json;

use crate::config::LoopConfig;
use crate::context::{LoopContext, PROMOTION_THRESHOLD};
use crate::module::{Params, to_params};
use crate::modules::evolution::EvolutionEngine;
use crate::modules::feedback::{FeedbackEvent, FeedbackLoop, WEIGHT_METRIC};
use crate::modules::self_audit::{AuditRule, RuleCheck, SelfAuditEngine};
use crate::modules::synthesizer::{Pattern, PatternSynthesizer};
use crate::modules::trainer::{AVG_OUTCOME_METRIC, Trainer, TrainingSample};
use crate::step::PipelineStep;

pub const DEFAULT_GOALS: [&str; 2] = ["Keep evolving steadily", "Produce useful artefacts"];

pub const STATUS_REPORT: &str = "status_report";

const STATUS_TEMPLATE: &str = "The loop keeps moving. Activity: {{ activity }}\n\
Goals: {{ goals }}\n\
Accumulated confidence: {{ confidence|round(2) }}";

/// Owns the five standard modules so their private state survives the loop
/// and can be inspected afterwards.
pub struct StandardModules {
    pub synthesizer: PatternSynthesizer,
    pub trainer: Trainer,
    pub feedback: FeedbackLoop,
    pub audit: SelfAuditEngine,
    pub evolution: EvolutionEngine,
}

impl StandardModules {
    pub fn new(config: &LoopConfig) -> Self {
        let history = &config.history;
        Self {
            synthesizer: PatternSynthesizer::new([Pattern::new(
                STATUS_REPORT,
                "Progress report for the running loop",
                STATUS_TEMPLATE,
            )]),
            trainer: Trainer::new(history.trainer_window),
            feedback: FeedbackLoop::new(config.feedback_learning_rate, history.feedback_window),
            audit: SelfAuditEngine::new(vec![
                AuditRule::new(
                    "confidence_floor",
                    "Confidence must stay at or above 0.4",
                    RuleCheck::MetricAtLeast {
                        metric: AVG_OUTCOME_METRIC.to_string(),
                        min: 0.4,
                        default: Some(0.0),
                    },
                ),
                AuditRule::new(
                    "status_report_present",
                    "A status report was synthesized",
                    RuleCheck::ArtefactPresent {
                        name: STATUS_REPORT.to_string(),
                    },
                ),
            ]),
            evolution: EvolutionEngine::new(history.evolution_window)
                .with_threshold(config.stability_threshold),
        }
    }

    /// Borrow the modules into the five standard steps, in pipeline order.
    pub fn steps(&mut self) -> Vec<PipelineStep<'_>> {
        let Self {
            synthesizer,
            trainer,
            feedback,
            audit,
            evolution,
        } = self;
        vec![
            PipelineStep::new(synthesizer).named("synth").with_params(synth_params),
            PipelineStep::new(trainer).named("trainer").with_params(trainer_params),
            PipelineStep::new(feedback).named("feedback").with_params(feedback_params),
            PipelineStep::new(audit).named("selfaudit").with_params(audit_params),
            PipelineStep::new(evolution).named("evolution").with_params(evolution_params),
        ]
    }
}

/// Fresh context for the standard pipeline with `promotion_threshold` seeded.
pub fn standard_context<I, S>(goals: I, threshold: f64) -> LoopContext
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ctx = LoopContext::new(goals);
    ctx.update_metric(PROMOTION_THRESHOLD, threshold);
    ctx
}

fn synth_params(ctx: &LoopContext) -> anyhow::Result<Params> {
    to_params(json!({
        "variables": {
            "activity": ctx.logs().len() + 1,
            "goals": ctx.goals().join(", "),
            "confidence": ctx.metric_or(AVG_OUTCOME_METRIC, 0.5),
        }
    }))
}

fn trainer_params(ctx: &LoopContext) -> anyhow::Result<Params> {
    let base = ctx.metric_or(WEIGHT_METRIC, 0.5);
    let samples = [
        TrainingSample::new([("base".to_string(), base)], (base + 0.1).min(1.0)),
        TrainingSample::new([("base".to_string(), base + 0.1)], (base + 0.15).min(1.0)),
    ];
    to_params(json!({ "samples": samples }))
}

fn feedback_params(_ctx: &LoopContext) -> anyhow::Result<Params> {
    let events = [
        FeedbackEvent::new(0.3, "self reinforcement"),
        FeedbackEvent::new(0.2, "positive external review"),
    ];
    to_params(json!({ "events": events }))
}

fn audit_params(ctx: &LoopContext) -> anyhow::Result<Params> {
    to_params(json!({ "artefacts": ctx.artefacts() }))
}

fn evolution_params(ctx: &LoopContext) -> anyhow::Result<Params> {
    let candidate = ctx
        .metric_or("score.selfaudit", 0.0)
        .max(ctx.metric_or(WEIGHT_METRIC, 0.0));
    to_params(json!({
        "candidate_score": candidate,
        "notes": "automatic cycle completed",
    }))
}
