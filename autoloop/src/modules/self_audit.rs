//! Rule-based self audit over the context and its artefacts.
//!
//! Every check is a [`RuleCheck`] variant evaluated against the context and
//! an artefact map.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::context::LoopContext;
use crate::envelope::ModuleResult;
use crate::module::{Module, ModuleError, Params, param};

/// Why a rule could not be evaluated. Counts as a failed rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("metric '{0}' is not set")]
    MissingMetric(String),
    #[error("artefact '{0}' is missing")]
    MissingArtefact(String),
    #[error("artefact '{0}' is not text")]
    NotText(String),
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// `metric >= min`; a missing metric uses `default` or errors.
    MetricAtLeast {
        metric: String,
        min: f64,
        #[serde(default)]
        default: Option<f64>,
    },
    /// `metric <= max`; a missing metric uses `default` or errors.
    MetricAtMost {
        metric: String,
        max: f64,
        #[serde(default)]
        default: Option<f64>,
    },
    ArtefactPresent { name: String },
    /// Text artefact matches the regex.
    ArtefactMatches { name: String, pattern: String },
    /// Text artefact does not match the regex. A missing artefact passes.
    ArtefactForbids { name: String, pattern: String },
    /// At least one goal is defined.
    GoalsDefined,
}

impl RuleCheck {
    pub fn evaluate(
        &self,
        ctx: &LoopContext,
        artefacts: &BTreeMap<String, Value>,
    ) -> Result<bool, RuleError> {
        match self {
            RuleCheck::MetricAtLeast { metric, min, default } => {
                Ok(metric_value(ctx, metric, *default)? >= *min)
            }
            RuleCheck::MetricAtMost { metric, max, default } => {
                Ok(metric_value(ctx, metric, *default)? <= *max)
            }
            RuleCheck::ArtefactPresent { name } => Ok(artefacts.contains_key(name)),
            RuleCheck::ArtefactMatches { name, pattern } => {
                let text = artefact_text(artefacts, name)?
                    .ok_or_else(|| RuleError::MissingArtefact(name.clone()))?;
                Ok(compile(pattern)?.is_match(text))
            }
            RuleCheck::ArtefactForbids { name, pattern } => {
                let regex = compile(pattern)?;
                Ok(artefact_text(artefacts, name)?.is_none_or(|text| !regex.is_match(text)))
            }
            RuleCheck::GoalsDefined => Ok(!ctx.goals().is_empty()),
        }
    }
}

fn metric_value(ctx: &LoopContext, metric: &str, default: Option<f64>) -> Result<f64, RuleError> {
    ctx.metric(metric)
        .or(default)
        .ok_or_else(|| RuleError::MissingMetric(metric.to_string()))
}

fn artefact_text<'a>(
    artefacts: &'a BTreeMap<String, Value>,
    name: &str,
) -> Result<Option<&'a str>, RuleError> {
    match artefacts.get(name) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(RuleError::NotText(name.to_string())),
    }
}

fn compile(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(pattern).map_err(|err| RuleError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub check: RuleCheck,
}

impl AuditRule {
    pub fn new(name: &str, description: &str, check: RuleCheck) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            check,
        }
    }
}

/// Evaluates every rule and scores the run 1.0 when all pass, 0.0 otherwise.
///
/// Artefacts come from the `artefacts` parameter when given, otherwise from
/// the context.
#[derive(Debug, Clone, Default)]
pub struct SelfAuditEngine {
    rules: Vec<AuditRule>,
}

impl SelfAuditEngine {
    pub fn new(rules: Vec<AuditRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AuditRule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: AuditRule) {
        self.rules.push(rule);
    }
}

impl Module for SelfAuditEngine {
    fn name(&self) -> &str {
        "selfaudit"
    }

    fn run(&mut self, ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError> {
        let supplied: Option<BTreeMap<String, Value>> = param(params, "artefacts")?;
        let artefacts = match &supplied {
            Some(artefacts) => artefacts,
            None => ctx.artefacts(),
        };

        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut messages = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            match rule.check.evaluate(ctx, artefacts) {
                Ok(true) => {
                    messages.push(format!("passed: {}", rule.name));
                    passed.push(rule.name.clone());
                }
                Ok(false) => {
                    messages.push(format!("failed: {}", rule.name));
                    failed.push(rule.name.clone());
                }
                Err(err) => {
                    messages.push(format!("failed: {} ({err})", rule.name));
                    failed.push(rule.name.clone());
                }
            }
        }

        let success = failed.is_empty();
        let mut result = ModuleResult::new(success)
            .with_score(if success { 1.0 } else { 0.0 })
            .with_data("passed", json!(passed))
            .with_data("failed", json!(failed));
        result.messages = messages;
        Ok(result)
    }
}
