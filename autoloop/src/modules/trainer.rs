//! Trainer that tracks observed outcomes and reports their mean.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::LoopContext;
use crate::envelope::ModuleResult;
use crate::history::BoundedHistory;
use crate::module::{Module, ModuleError, Params, param};

pub const AVG_OUTCOME_METRIC: &str = "trainer.avg_outcome";
pub const SAMPLES_METRIC: &str = "trainer.samples";

/// One observation: a feature vector and its scalar outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    pub outcome: f64,
}

impl TrainingSample {
    pub fn new(features: impl IntoIterator<Item = (String, f64)>, outcome: f64) -> Self {
        Self {
            features: features.into_iter().collect(),
            outcome,
        }
    }
}

/// Accumulates samples from the `samples` parameter in a bounded window and
/// scores each call with the mean outcome of the retained samples.
#[derive(Debug, Clone)]
pub struct Trainer {
    history: BoundedHistory<TrainingSample>,
}

impl Trainer {
    pub fn new(window: usize) -> Self {
        Self {
            history: BoundedHistory::new(window),
        }
    }

    pub fn history(&self) -> &BoundedHistory<TrainingSample> {
        &self.history
    }

    pub fn record(&mut self, sample: TrainingSample) {
        self.history.push(sample);
    }

    /// Mean outcome over every retained sample.
    pub fn mean_outcome(&self) -> Option<f64> {
        self.moving_average(self.history.len())
    }

    /// Mean outcome over the `window` most recent samples.
    pub fn moving_average(&self, window: usize) -> Option<f64> {
        let recent: Vec<f64> = self.history.recent(window).map(|s| s.outcome).collect();
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    pub fn best_sample(&self) -> Option<&TrainingSample> {
        self.history
            .iter()
            .max_by(|a, b| a.outcome.total_cmp(&b.outcome))
    }

    /// True once at least `window` samples exist and their moving average
    /// reaches `threshold`.
    pub fn should_promote(&self, threshold: f64, window: usize) -> bool {
        self.history.len() >= window
            && self
                .moving_average(window)
                .is_some_and(|average| average >= threshold)
    }
}

impl Module for Trainer {
    fn name(&self) -> &str {
        "trainer"
    }

    fn run(&mut self, ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError> {
        let samples: Vec<TrainingSample> = param(params, "samples")?.unwrap_or_default();
        let received = samples.len();
        for sample in samples {
            self.record(sample);
        }

        let Some(mean) = self.mean_outcome() else {
            return Ok(ModuleResult::failure("no samples recorded yet"));
        };

        ctx.update_metric(AVG_OUTCOME_METRIC, mean);
        ctx.update_metric(SAMPLES_METRIC, self.history.len() as f64);

        Ok(ModuleResult::success()
            .with_score(mean)
            .with_data("avg_outcome", json!(mean))
            .with_data("samples", json!(self.history.len()))
            .with_message(format!(
                "recorded {received} samples; mean outcome {mean:.2} over {}",
                self.history.len()
            )))
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}
