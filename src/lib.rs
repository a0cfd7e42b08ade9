//! Turns a web-novel segment into a manju (motion comic) adaptation package:
//! genre analysis, episode plan and one script per episode.

pub mod core;
pub mod services;

pub use crate::core::config::Config;
pub use crate::core::error::{Capability, PipelineError, PipelineResult};
pub use crate::core::state::{
    AnalysisResult, Character, EpisodePlanEntry, Genre, PipelineState, ScriptArtifact, Stage,
};
pub use crate::services::controller::{ScriptOutcome, StageController};
