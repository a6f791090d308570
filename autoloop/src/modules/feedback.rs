//! Feedback loop that nudges a confidence weight with incoming signals.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::LoopContext;
use crate::envelope::ModuleResult;
use crate::history::BoundedHistory;
use crate::module::{Module, ModuleError, Params, param};

pub const WEIGHT_METRIC: &str = "feedback.weights";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub signal: f64,
    #[serde(default)]
    pub note: String,
}

impl FeedbackEvent {
    pub fn new(signal: f64, note: &str) -> Self {
        Self {
            signal,
            note: note.to_string(),
        }
    }
}

/// An applied event and the weight it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub event: FeedbackEvent,
    pub weight_after: f64,
}

/// Keeps a weight in `[0, 1]` and applies `weight += learning_rate * signal`
/// for each event of the `events` parameter, clamping after every event.
///
/// Because of the clamp, events are not commutative: order of application is
/// part of the result.
#[derive(Debug, Clone)]
pub struct FeedbackLoop {
    learning_rate: f64,
    initial_weight: f64,
    weight: f64,
    history: BoundedHistory<FeedbackRecord>,
}

impl FeedbackLoop {
    pub fn new(learning_rate: f64, window: usize) -> Self {
        Self {
            learning_rate,
            initial_weight: 0.5,
            weight: 0.5,
            history: BoundedHistory::new(window),
        }
    }

    pub fn with_initial_weight(mut self, weight: f64) -> Self {
        self.initial_weight = weight.clamp(0.0, 1.0);
        self.weight = self.initial_weight;
        self
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn history(&self) -> &BoundedHistory<FeedbackRecord> {
        &self.history
    }

    /// Apply one event and return the updated weight.
    pub fn apply(&mut self, event: FeedbackEvent) -> f64 {
        self.weight = (self.weight + self.learning_rate * event.signal).clamp(0.0, 1.0);
        self.history.push(FeedbackRecord {
            event,
            weight_after: self.weight,
        });
        self.weight
    }
}

impl Module for FeedbackLoop {
    fn name(&self) -> &str {
        "feedback"
    }

    fn run(&mut self, ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError> {
        let events: Vec<FeedbackEvent> = param(params, "events")?.unwrap_or_default();

        let mut messages = Vec::with_capacity(events.len());
        for event in events {
            let line = if event.note.is_empty() {
                format!("signal {:+.2}", event.signal)
            } else {
                format!("signal {:+.2} ({})", event.signal, event.note)
            };
            let weight = self.apply(event);
            messages.push(format!("{line} -> weight {weight:.2}"));
        }
        if messages.is_empty() {
            messages.push(format!("no events; weight stays {:.2}", self.weight));
        }

        ctx.update_metric(WEIGHT_METRIC, self.weight);
        let mut result = ModuleResult::success().with_data("weight", json!(self.weight));
        result.messages = messages;
        Ok(result)
    }

    fn reset(&mut self) {
        self.weight = self.initial_weight;
        self.history.clear();
    }
}
