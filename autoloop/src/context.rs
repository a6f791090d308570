//! Shared context mutated by every step across cycles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Metric key that overrides the loop's configured stability threshold.
pub const PROMOTION_THRESHOLD: &str = "promotion_threshold";

/// Cycle-spanning state shared by all steps of a run.
///
/// Goals are fixed at construction. Metrics and artefacts are last-write-wins
/// and the log is append-only; every mutation refreshes `last_updated`.
#[derive(Debug, Clone)]
pub struct LoopContext {
    goals: Vec<String>,
    artefacts: BTreeMap<String, Value>,
    metrics: BTreeMap<String, f64>,
    logs: Vec<String>,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl LoopContext {
    pub fn new<I, S>(goals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            goals: goals.into_iter().map(Into::into).collect(),
            artefacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            logs: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    pub fn artefacts(&self) -> &BTreeMap<String, Value> {
        &self.artefacts
    }

    pub fn artefact(&self, name: &str) -> Option<&Value> {
        self.artefacts.get(name)
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metric_or(&self, name: &str, default: f64) -> f64 {
        self.metric(name).unwrap_or(default)
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn add_log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
        self.touch();
    }

    pub fn update_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), value);
        self.touch();
    }

    pub fn add_artefact(&mut self, name: impl Into<String>, value: Value) {
        self.artefacts.insert(name.into(), value);
        self.touch();
    }

    /// Clear artefacts, metrics and logs so the context can back a new run.
    ///
    /// Goals and `created_at` are kept. The loop never calls this.
    pub fn reset(&mut self) {
        self.artefacts.clear();
        self.metrics.clear();
        self.logs.clear();
        self.touch();
    }

    fn touch(&mut self) {
        // Clock skew must not move the timestamp backwards.
        self.last_updated = Utc::now().max(self.last_updated);
    }
}
