//! Cycle-based module orchestration loop.
//!
//! An [`looping::AutonomousLoop`] runs an ordered list of pipeline steps
//! against a shared [`context::LoopContext`] until the best observed score
//! reaches the stability threshold or the cycle budget runs out.
//!
//! - **Contract**: [`envelope`] (result envelope) and [`module`] (the
//!   capability trait every module implements).
//! - **Engine**: [`step`] binds a module to a per-cycle parameter builder and
//!   [`looping`] drives the cycles and builds the final report.
//! - **Modules**: [`modules`] holds the example modules; [`standard`] wires
//!   them into the default self-improvement pipeline.
//!
//! The CLI in `main.rs` is a thin caller over this library.

pub mod config;
pub mod context;
pub mod envelope;
pub mod exit_codes;
pub mod history;
pub mod logging;
pub mod looping;
pub mod module;
pub mod modules;
pub mod standard;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
