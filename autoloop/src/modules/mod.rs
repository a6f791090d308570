//! Example modules implementing the [`crate::module::Module`] contract.

pub mod evolution;
pub mod feedback;
pub mod self_audit;
pub mod synthesizer;
pub mod trainer;

pub use evolution::{Decision, EvolutionEngine, EvolutionRecord, Version, VersionLevel};
pub use feedback::{FeedbackEvent, FeedbackLoop, FeedbackRecord};
pub use self_audit::{AuditRule, RuleCheck, RuleError, SelfAuditEngine};
pub use synthesizer::{Pattern, PatternSynthesizer};
pub use trainer::{Trainer, TrainingSample};
