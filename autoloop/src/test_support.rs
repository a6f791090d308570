//! Test-only modules with scripted behavior.

use crate::context::LoopContext;
use crate::envelope::ModuleResult;
use crate::module::{ErrorKind, Module, ModuleError, Params};

/// Module that replays a fixed sequence of scores, repeating the last one
/// once the script runs out.
#[derive(Debug, Clone)]
pub struct ScriptedModule {
    name: String,
    scores: Vec<f64>,
    success: bool,
    messages: Vec<String>,
    metric: Option<(String, f64)>,
    calls: usize,
}

impl ScriptedModule {
    pub fn with_scores(name: &str, scores: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name: name.to_string(),
            scores: scores.into_iter().collect(),
            success: true,
            messages: Vec::new(),
            metric: None,
            calls: 0,
        }
    }

    /// Always returns `success = false` with `message` and no score.
    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            success: false,
            messages: vec![message.to_string()],
            ..Self::with_scores(name, Vec::new())
        }
    }

    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = messages.into_iter().map(Into::into).collect();
        self
    }

    /// Write `key = value` into the context metrics on every call.
    pub fn writing_metric(mut self, key: &str, value: f64) -> Self {
        self.metric = Some((key.to_string(), value));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Module for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut LoopContext, _params: &Params) -> Result<ModuleResult, ModuleError> {
        let score = self
            .scores
            .get(self.calls)
            .or_else(|| self.scores.last())
            .copied();
        self.calls += 1;

        if let Some((key, value)) = &self.metric {
            ctx.update_metric(key.clone(), *value);
        }

        let mut result = ModuleResult::new(self.success);
        result.messages = self.messages.clone();
        result.score = score;
        Ok(result)
    }

    fn reset(&mut self) {
        self.calls = 0;
    }
}

/// Module that always fails fatally.
#[derive(Debug, Clone)]
pub struct FailingModule {
    name: String,
    resource: String,
    calls: usize,
}

impl FailingModule {
    pub fn missing_resource(name: &str, resource: &str) -> Self {
        Self {
            name: name.to_string(),
            resource: resource.to_string(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Kind of the error returned by the latest call, if any.
    pub fn last_kind(&self) -> Option<ErrorKind> {
        (self.calls > 0).then_some(ErrorKind::MissingResource)
    }
}

impl Module for FailingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, _ctx: &mut LoopContext, _params: &Params) -> Result<ModuleResult, ModuleError> {
        self.calls += 1;
        Err(ModuleError::MissingResource(self.resource.clone()))
    }
}

/// Module that records the parameters of every call and succeeds without a score.
#[derive(Debug, Clone, Default)]
pub struct RecordingModule {
    name: String,
    calls: Vec<Params>,
}

impl RecordingModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[Params] {
        &self.calls
    }
}

impl Module for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, _ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError> {
        self.calls.push(params.clone());
        Ok(ModuleResult::success())
    }
}
