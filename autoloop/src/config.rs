//! Loop configuration stored as TOML, with `AUTOLOOP_*` environment overrides.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::looping::FailurePolicy;

pub const ENV_STABILITY_THRESHOLD: &str = "AUTOLOOP_STABILITY_THRESHOLD";
pub const ENV_MAX_CYCLES: &str = "AUTOLOOP_MAX_CYCLES";
pub const ENV_ENVIRONMENT: &str = "AUTOLOOP_ENV";
pub const ENV_FAILURE_POLICY: &str = "AUTOLOOP_FAILURE_POLICY";

/// Loop configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Best score at which the loop stops. Overridden per cycle by the
    /// context metric `promotion_threshold`.
    pub stability_threshold: f64,

    /// Cycle budget for a run.
    pub max_cycles: u32,

    pub failure_policy: FailurePolicy,

    /// Free-form deployment label, reported but not interpreted.
    pub environment: String,

    pub feedback_learning_rate: f64,

    pub history: HistoryConfig,
}

/// Capacities of the modules' private histories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub trainer_window: usize,
    pub feedback_window: usize,
    pub evolution_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            trainer_window: 100,
            feedback_window: 100,
            evolution_window: 50,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 0.95,
            max_cycles: 3,
            failure_policy: FailurePolicy::Contain,
            environment: "dev".to_string(),
            feedback_learning_rate: 0.2,
            history: HistoryConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.stability_threshold.is_finite() {
            return Err(anyhow!("stability_threshold must be a finite number"));
        }
        if self.max_cycles == 0 {
            return Err(anyhow!("max_cycles must be > 0"));
        }
        if !self.feedback_learning_rate.is_finite() || self.feedback_learning_rate < 0.0 {
            return Err(anyhow!("feedback_learning_rate must be a non-negative number"));
        }
        if self.environment.trim().is_empty() {
            return Err(anyhow!("environment must be non-empty"));
        }
        let history = &self.history;
        if history.trainer_window == 0 || history.feedback_window == 0 || history.evolution_window == 0 {
            return Err(anyhow!("history windows must be > 0"));
        }
        Ok(())
    }

    /// Apply `AUTOLOOP_*` overrides read through `lookup`, then validate.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_STABILITY_THRESHOLD) {
            self.stability_threshold = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_STABILITY_THRESHOLD}={raw}"))?;
            debug!(threshold = self.stability_threshold, "env override");
        }
        if let Some(raw) = lookup(ENV_MAX_CYCLES) {
            self.max_cycles = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_MAX_CYCLES}={raw}"))?;
            debug!(max_cycles = self.max_cycles, "env override");
        }
        if let Some(raw) = lookup(ENV_ENVIRONMENT) {
            self.environment = raw.trim().to_string();
            debug!(environment = %self.environment, "env override");
        }
        if let Some(raw) = lookup(ENV_FAILURE_POLICY) {
            self.failure_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "contain" => FailurePolicy::Contain,
                "abort" => FailurePolicy::Abort,
                other => bail!("{ENV_FAILURE_POLICY} must be 'contain' or 'abort', got '{other}'"),
            };
            debug!(policy = ?self.failure_policy, "env override");
        }
        self.validate()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing; using defaults");
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let buf = render_config(cfg)?;
    write_atomic(path, &buf)
}

/// Serialize config as pretty TOML with a trailing newline.
pub fn render_config(cfg: &LoopConfig) -> Result<String> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    Ok(buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
