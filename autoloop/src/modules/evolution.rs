//! Evolution engine that versions each candidate and decides on promotion.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::{LoopContext, PROMOTION_THRESHOLD};
use crate::envelope::ModuleResult;
use crate::history::BoundedHistory;
use crate::module::{Module, ModuleError, Params, param, required_param};

pub const VERSION_ARTEFACT: &str = "evolution.version";
pub const CANDIDATE_METRIC: &str = "evolution.candidate_score";

pub const DEFAULT_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionLevel {
    Major,
    Minor,
    #[default]
    Patch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn bump(self, level: VersionLevel) -> Self {
        match level {
            VersionLevel::Major => Self {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
            VersionLevel::Minor => Self {
                minor: self.minor + 1,
                patch: 0,
                ..self
            },
            VersionLevel::Patch => Self {
                patch: self.patch + 1,
                ..self
            },
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Promote,
    Hold,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Promote => "promote",
            Decision::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub version: Version,
    pub decision: Decision,
    pub candidate_score: f64,
    pub threshold: f64,
    #[serde(default)]
    pub notes: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

/// Bumps a version on every call and records whether the candidate met the
/// threshold.
///
/// Parameters:
/// - `candidate_score` (required)
/// - `level`: `major`, `minor` or `patch` (default)
/// - `threshold`: overrides the context's `promotion_threshold`, which in turn
///   overrides the engine default
/// - `notes`
#[derive(Debug, Clone)]
pub struct EvolutionEngine {
    threshold: f64,
    latest: Version,
    history: BoundedHistory<EvolutionRecord>,
}

impl EvolutionEngine {
    pub fn new(window: usize) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            latest: Version::default(),
            history: BoundedHistory::new(window),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Most recent version, `0.0.0` before the first call. Kept outside the
    /// history so eviction never rewinds it.
    pub fn latest_version(&self) -> Version {
        self.latest
    }

    pub fn history(&self) -> &BoundedHistory<EvolutionRecord> {
        &self.history
    }

    pub fn register(
        &mut self,
        candidate_score: f64,
        threshold: f64,
        level: VersionLevel,
        notes: String,
    ) -> EvolutionRecord {
        self.latest = self.latest.bump(level);
        let decision = if candidate_score >= threshold {
            Decision::Promote
        } else {
            Decision::Hold
        };
        let record = EvolutionRecord {
            version: self.latest,
            decision,
            candidate_score,
            threshold,
            notes,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.history.push(record.clone());
        record
    }
}

impl Module for EvolutionEngine {
    fn name(&self) -> &str {
        "evolution"
    }

    fn run(&mut self, ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError> {
        let candidate_score: f64 = required_param(params, "candidate_score")?;
        let level: VersionLevel = param(params, "level")?.unwrap_or_default();
        let notes: String = param(params, "notes")?.unwrap_or_default();
        let threshold = match param::<f64>(params, "threshold")? {
            Some(threshold) => threshold,
            None => ctx.metric_or(PROMOTION_THRESHOLD, self.threshold),
        };

        let record = self.register(candidate_score, threshold, level, notes);

        ctx.add_artefact(VERSION_ARTEFACT, Value::String(record.version.to_string()));
        ctx.update_metric(CANDIDATE_METRIC, candidate_score);

        Ok(ModuleResult::success()
            .with_data("version", json!(record.version.to_string()))
            .with_data("decision", json!(record.decision))
            .with_data("threshold", json!(threshold))
            .with_message(format!(
                "version {} -> {} (candidate {candidate_score:.2}, threshold {threshold:.2})",
                record.version,
                record.decision.as_str()
            )))
    }

    fn reset(&mut self) {
        self.latest = Version::default();
        self.history.clear();
    }
}
