//! The generation pipeline built on the checkpoint engine.
//!
//! - `state` — run state machine, orchestrator snapshot, typed stage results
//! - `generator` — the stages themselves and the per-item quality gate

pub mod generator;
pub mod state;

pub use generator::{Generator, GeneratorSettings, RunSummary};
pub use state::{GenerateOptions, RunArgs, RunSnapshot, RunState, RunStateSaver};
