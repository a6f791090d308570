//! Module capability contract.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::LoopContext;
use crate::envelope::ModuleResult;

/// Parameters handed to a module for one invocation.
pub type Params = Map<String, Value>;

/// Fatal module failure, raised outside the result envelope.
///
/// Recoverable problems are reported with `ModuleResult { success: false, .. }`
/// instead.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("missing resource: {0}")]
    MissingResource(String),
    #[error("parameter builder failed: {0:#}")]
    ParamBuilder(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Stable classification of a [`ModuleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParams,
    MissingResource,
    ParamBuilder,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::MissingResource => "missing_resource",
            ErrorKind::ParamBuilder => "param_builder",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ModuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::InvalidParams(_) => ErrorKind::InvalidParams,
            ModuleError::MissingResource(_) => ErrorKind::MissingResource,
            ModuleError::ParamBuilder(_) => ErrorKind::ParamBuilder,
            ModuleError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A capability unit driven by the orchestration loop.
///
/// Modules may keep private state across calls (histories, weights). They
/// communicate with later steps only through the context, and may append to
/// its log but never rewrite it.
pub trait Module {
    /// Intrinsic name used in logs and metric keys unless the step overrides it.
    fn name(&self) -> &str;

    /// Execute once against the live context with freshly built parameters.
    fn run(&mut self, ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError>;

    /// Drop any private state accumulated across calls.
    fn reset(&mut self) {}
}

/// Read an optional typed parameter.
///
/// Returns `Ok(None)` when the key is absent or null, and
/// `ModuleError::InvalidParams` when the value has the wrong shape.
pub fn param<T: DeserializeOwned>(params: &Params, key: &str) -> Result<Option<T>, ModuleError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| ModuleError::InvalidParams(format!("{key}: {err}"))),
    }
}

/// Read a parameter that must be present.
pub fn required_param<T: DeserializeOwned>(params: &Params, key: &str) -> Result<T, ModuleError> {
    param(params, key)?.ok_or_else(|| ModuleError::InvalidParams(format!("{key}: missing")))
}

/// Convert a JSON value into a parameter map.
pub fn to_params(value: Value) -> anyhow::Result<Params> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => anyhow::bail!("parameters must be a JSON object, got {other}"),
    }
}
