//! Pipeline steps: a borrowed module plus its per-cycle parameter source.

use std::fmt;

use crate::context::LoopContext;
use crate::envelope::ModuleResult;
use crate::module::{Module, ModuleError, Params};

/// Builds a module's parameters from the context as it stands when the step
/// executes.
pub type ParamBuilder<'a> = Box<dyn Fn(&LoopContext) -> anyhow::Result<Params> + 'a>;

/// A module bound to a parameter builder and an optional display name.
///
/// The step owns no state of its own; the caller owns the module and can
/// inspect it once the loop is dropped.
pub struct PipelineStep<'a> {
    module: &'a mut dyn Module,
    params: Option<ParamBuilder<'a>>,
    display_name: Option<String>,
}

impl<'a> PipelineStep<'a> {
    pub fn new(module: &'a mut dyn Module) -> Self {
        Self {
            module,
            params: None,
            display_name: None,
        }
    }

    pub fn with_params<F>(mut self, builder: F) -> Self
    where
        F: Fn(&LoopContext) -> anyhow::Result<Params> + 'a,
    {
        self.params = Some(Box::new(builder));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Display name if set, otherwise the module's own name.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.module.name())
    }

    /// Build fresh parameters and run the module once.
    ///
    /// A failing parameter builder is reported as `ModuleError::ParamBuilder`
    /// and the module is not called.
    pub fn execute(&mut self, ctx: &mut LoopContext) -> Result<ModuleResult, ModuleError> {
        let params = match &self.params {
            Some(build) => build(ctx).map_err(ModuleError::ParamBuilder)?,
            None => Params::new(),
        };
        self.module.run(ctx, &params)
    }
}

impl fmt::Debug for PipelineStep<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name())
            .field("has_params", &self.params.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ErrorKind, to_params};
    use crate::test_support::RecordingModule;
    use serde_json::json;

    #[test]
    fn name_prefers_display_name() {
        let mut module = RecordingModule::new("recorder");
        let step = PipelineStep::new(&mut module);
        assert_eq!(step.name(), "recorder");

        let mut module = RecordingModule::new("recorder");
        let step = PipelineStep::new(&mut module).named("custom");
        assert_eq!(step.name(), "custom");
    }

    #[test]
    fn missing_builder_passes_empty_params() {
        let mut module = RecordingModule::new("recorder");
        let mut ctx = LoopContext::new(["g"]);
        {
            let mut step = PipelineStep::new(&mut module);
            step.execute(&mut ctx).expect("execute");
        }
        assert_eq!(module.calls(), [Params::new()]);
    }

    #[test]
    fn builder_sees_current_context_on_every_call() {
        let mut module = RecordingModule::new("recorder");
        let mut ctx = LoopContext::new(["g"]);
        {
            let mut step = PipelineStep::new(&mut module).with_params(|ctx: &LoopContext| {
                to_params(json!({ "seen": ctx.metric_or("progress", 0.0) }))
            });
            step.execute(&mut ctx).expect("first");
            ctx.update_metric("progress", 0.75);
            step.execute(&mut ctx).expect("second");
        }
        let seen: Vec<_> = module.calls().iter().map(|p| p["seen"].clone()).collect();
        assert_eq!(seen, vec![json!(0.0), json!(0.75)]);
    }

    #[test]
    fn builder_error_skips_module() {
        let mut module = RecordingModule::new("recorder");
        let mut ctx = LoopContext::new(["g"]);
        let err = {
            let mut step = PipelineStep::new(&mut module)
                .with_params(|_: &LoopContext| Err(anyhow::anyhow!("metric store offline")));
            step.execute(&mut ctx).expect_err("builder fails")
        };
        assert_eq!(err.kind(), ErrorKind::ParamBuilder);
        assert!(err.to_string().contains("metric store offline"));
        assert!(module.calls().is_empty());
    }
}
