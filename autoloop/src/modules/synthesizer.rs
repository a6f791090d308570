//! Template synthesizer that turns named patterns into artefacts.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::LoopContext;
use crate::envelope::ModuleResult;
use crate::module::{Module, ModuleError, Params, param};

/// A named template. Templates use minijinja syntax (`{{ goals }}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub description: String,
    pub template: String,
}

impl Pattern {
    pub fn new(name: &str, description: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            template: template.to_string(),
        }
    }
}

/// Renders registered patterns against the `variables` parameter.
///
/// Parameters:
/// - `use`: optional list of pattern names (defaults to every pattern, by name).
/// - `variables`: object exposed to the templates.
///
/// Undefined variables are render errors, so a pattern either renders fully or
/// is skipped with a message.
pub struct PatternSynthesizer {
    patterns: BTreeMap<String, Pattern>,
    env: Environment<'static>,
}

impl PatternSynthesizer {
    pub fn new(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            patterns: patterns
                .into_iter()
                .map(|pattern| (pattern.name.clone(), pattern))
                .collect(),
            env,
        }
    }

    /// Add a pattern, replacing any pattern with the same name.
    pub fn register(&mut self, pattern: Pattern) {
        self.patterns.insert(pattern.name.clone(), pattern);
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }
}

impl Module for PatternSynthesizer {
    fn name(&self) -> &str {
        "synthesizer"
    }

    fn run(&mut self, ctx: &mut LoopContext, params: &Params) -> Result<ModuleResult, ModuleError> {
        let selected: Vec<String> = match param::<Vec<String>>(params, "use")? {
            Some(names) => names,
            None => self.patterns.keys().cloned().collect(),
        };
        let variables: Map<String, Value> = param(params, "variables")?.unwrap_or_default();

        let mut rendered = Map::new();
        let mut messages = Vec::new();
        for name in selected {
            let Some(pattern) = self.patterns.get(&name) else {
                messages.push(format!("skipped {name}: unknown pattern"));
                continue;
            };
            match self.env.render_str(&pattern.template, &variables) {
                Ok(text) => {
                    ctx.add_artefact(name.clone(), Value::String(text.clone()));
                    rendered.insert(name.clone(), Value::String(text));
                    messages.push(name);
                }
                Err(err) => messages.push(format!("skipped {name}: {err}")),
            }
        }

        ctx.add_log(format!("synthesizer: generated {} artefacts", rendered.len()));
        let mut result = ModuleResult::new(!rendered.is_empty())
            .with_data("artefacts", Value::Object(rendered));
        result.messages = messages;
        Ok(result)
    }
}
