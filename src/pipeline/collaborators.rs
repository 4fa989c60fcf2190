//! Interfaces of the external tools the pipeline drives.
//!
//! Every grooming primitive maps a manifest to an index-aligned manifest;
//! primitives that move a segmentation also move its paired raw images.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::geom::Point3;
use crate::interact::{Prompt, PromptError, ask_point};
use crate::manifest::{FileManifest, ManifestError};
use crate::params::ParameterSet;
use crate::plane::CuttingPlane;
use crate::plane::selector::Side;

/// Failure reported by a collaborator.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{step} produced no usable output: {detail}")]
    BadOutput { step: &'static str, detail: String },
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Segmentations plus the raw images that follow the same transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paired {
    pub primary: FileManifest,
    pub companions: Option<FileManifest>,
}

impl Paired {
    #[must_use]
    pub fn new(primary: FileManifest, companions: Option<FileManifest>) -> Self {
        Self { primary, companions }
    }
}

/// How meshes are turned into binary volumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rasterization<'a> {
    /// Use each subject's raw image as the voxel grid.
    UsingImages(&'a FileManifest),
    /// Fixed voxel spacing.
    Spacing([f64; 3]),
}

pub trait DatasetSource {
    fn download_and_unzip(&self, dataset: &str, dest: &Path) -> ToolResult<()>;
    fn download_subset(&self, use_case: &str, dataset: &str, dest: &Path) -> ToolResult<()>;
}

pub trait GroomingToolkit {
    /// Mirrors subjects that are not on `reference_side`.
    fn reflect(
        &self,
        out_dir: &Path,
        files: &FileManifest,
        companions: Option<&FileManifest>,
        reference_side: Side,
    ) -> ToolResult<Paired>;
    fn meshes_to_volumes(
        &self,
        out_dir: &Path,
        meshes: &FileManifest,
        rasterization: Rasterization<'_>,
    ) -> ToolResult<FileManifest>;
    fn isotropic_resample(&self, out_dir: &Path, files: &FileManifest, binary: bool) -> ToolResult<FileManifest>;
    fn pad(&self, out_dir: &Path, files: &FileManifest, padding: u32) -> ToolResult<FileManifest>;
    fn center_of_mass_align(
        &self,
        out_dir: &Path,
        segmentations: &FileManifest,
        companions: Option<&FileManifest>,
    ) -> ToolResult<Paired>;
    fn center(&self, out_dir: &Path, files: &FileManifest) -> ToolResult<FileManifest>;
    /// Median subject of the cohort; must be one of `files`.
    fn find_reference(&self, files: &FileManifest) -> ToolResult<PathBuf>;
    fn rigid_align(
        &self,
        out_dir: &Path,
        reference: &Path,
        segmentations: &FileManifest,
        companions: Option<&FileManifest>,
    ) -> ToolResult<Paired>;
    fn clip(&self, out_dir: &Path, files: &FileManifest, planes: &[CuttingPlane]) -> ToolResult<FileManifest>;
    /// Crops `files` to the largest bounding box over `bounds_from`.
    fn crop(&self, out_dir: &Path, files: &FileManifest, bounds_from: &FileManifest) -> ToolResult<FileManifest>;
}

pub trait DistanceTransformer {
    fn apply_distance_transforms(&self, out_dir: &Path, files: &FileManifest) -> ToolResult<FileManifest>;
}

/// Local and world correspondence files, one pair per subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correspondences {
    pub local: FileManifest,
    pub world: FileManifest,
}

pub trait Optimizer {
    fn optimize(&self, out_dir: &Path, dt_files: &FileManifest, params: &ParameterSet) -> ToolResult<Correspondences>;
    fn optimize_fixed_domains(
        &self,
        out_dir: &Path,
        dt_files: &FileManifest,
        params: &ParameterSet,
    ) -> ToolResult<Correspondences>;
    /// Writes the mean shape of an existing model and returns its path.
    fn find_mean_shape(&self, model_dir: &Path) -> ToolResult<PathBuf>;
}

/// Fire-and-forget viewer for a finished model.
pub trait AnalysisLauncher {
    fn launch(
        &self,
        out_dir: &Path,
        dt_files: &FileManifest,
        local: &FileManifest,
        world: &FileManifest,
    ) -> ToolResult<()>;
}

/// Blocks until a plane has been picked on `reference`.
pub trait PlanePicker {
    fn pick(&mut self, reference: &Path) -> ToolResult<CuttingPlane>;
}

/// Picks a plane by reading three points from a prompt.
pub struct PromptPlanePicker<P> {
    prompt: P,
}

impl<P> PromptPlanePicker<P> {
    pub fn new(prompt: P) -> Self {
        Self { prompt }
    }
}

impl<P: Prompt> PlanePicker for PromptPlanePicker<P> {
    fn pick(&mut self, reference: &Path) -> ToolResult<CuttingPlane> {
        log::info!(
            "Define the cutting plane on {} by entering three points.",
            reference.display()
        );
        let mut points = [Point3::ORIGIN; 3];
        for (index, slot) in points.iter_mut().enumerate() {
            *slot = ask_point(&mut self.prompt, &format!("Point {} (x y z):", index + 1))?;
        }
        Ok(CuttingPlane::new(points))
    }
}
