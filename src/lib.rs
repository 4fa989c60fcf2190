#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
//! Cutting-plane-constrained statistical shape modeling workflows.
//!
//! A run acquires a cohort, grooms it into distance transforms, optimizes a
//! particle correspondence model and hands the result to a viewer. Heavy
//! image and optimizer work is delegated to external tools through the
//! traits in [`pipeline::collaborators`]; this crate owns the cutting-plane
//! handling, the optimizer configuration and the stage sequencing.

pub mod cohort;
pub mod external;
pub mod geom;
pub mod interact;
pub mod manifest;
pub mod params;
pub mod pipeline;
pub mod plane;

pub use manifest::{FileManifest, Sampler, SeededSampler};
pub use params::{ParameterDefaults, ParameterSet, ParameterSetBuilder, RunMode};
pub use pipeline::{Collaborators, Orchestrator, PipelineError, PipelineOutcome, RunConfig, Stage, UseCase};
pub use plane::store::{CuttingPlaneStore, RunState};
pub use plane::{CuttingPlane, CuttingPlaneAssignment};
