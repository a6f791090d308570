//! Result envelope returned by every module invocation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::module::{ErrorKind, ModuleError};

/// Outcome of one module execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Whether the attempt is considered acceptable.
    pub success: bool,
    /// Arbitrary output payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Human-readable notes in emission order.
    #[serde(default)]
    pub messages: Vec<String>,
    /// Single scalar quality signal, absent when not applicable.
    #[serde(default)]
    pub score: Option<f64>,
    /// Set only when the envelope stands in for a fatal module error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ModuleResult {
    pub fn new(success: bool) -> Self {
        Self {
            success,
            data: Map::new(),
            messages: Vec::new(),
            score: None,
            error_kind: None,
        }
    }

    pub fn success() -> Self {
        Self::new(true)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(false).with_message(message)
    }

    /// Convert a fatal module error into a tagged failed envelope.
    pub fn from_error(err: &ModuleError) -> Self {
        let kind = err.kind();
        let mut result = Self::failure(format!("error[{}]: {err}", kind.as_str()));
        result.data.insert(
            "error".to_string(),
            json!({ "kind": kind.as_str(), "message": err.to_string() }),
        );
        result.error_kind = Some(kind);
        result
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Merge `other` into a new envelope.
    ///
    /// `success` is the conjunction, `data` a right-biased union, `messages`
    /// are concatenated in `(self, other)` order and `score`/`error_kind` take
    /// `other`'s value when present.
    pub fn merge(&self, other: &ModuleResult) -> ModuleResult {
        let mut data = self.data.clone();
        for (key, value) in &other.data {
            data.insert(key.clone(), value.clone());
        }
        ModuleResult {
            success: self.success && other.success,
            data,
            messages: self
                .messages
                .iter()
                .chain(other.messages.iter())
                .cloned()
                .collect(),
            score: other.score.or(self.score),
            error_kind: other.error_kind.or(self.error_kind),
        }
    }
}
