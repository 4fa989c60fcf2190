//! Staged shape-modeling workflow: acquire, groom, optimize, analyze.
//!
//! The orchestrator owns the cohort manifest for one invocation and threads
//! each stage's output into the next. All external work goes through the
//! traits in [`collaborators`].

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::interact::{Prompt, PromptError, ask_spacing};
use crate::manifest::{FileManifest, ManifestError, Sampler, subject_id};
use crate::params::{FixedDomains, ParameterError, ParameterSet, ParameterSetBuilder, RunMode};
use crate::plane::selector::{CuttingPlaneSelector, SelectionError, SelectionMode};
use crate::plane::store::{CuttingPlaneStore, GroomedSubject, RunState, StoreError};
use crate::plane::{CuttingPlane, CuttingPlaneAssignment};

pub mod collaborators;
pub mod groom;
pub mod use_case;

pub use collaborators::{
    AnalysisLauncher, Correspondences, DatasetSource, DistanceTransformer, GroomingToolkit, Optimizer,
    Paired, PlanePicker, PromptPlanePicker, Rasterization, ToolError, ToolResult,
};
pub use groom::{AnatomyRequest, GroomError, GroomOutput, Groomer};
pub use use_case::{DatasetLayout, FileSet, GroomProfile, UseCase};

const PAUSE_MESSAGE: &str = "Press Enter to continue";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Groom(#[from] GroomError),
    #[error(transparent)]
    Parameters(#[from] ParameterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot skip grooming: no run state at {}", path.display())]
    MissingRunState {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error("cannot skip grooming: subject `{id}` was not groomed in the saved run")]
    MissingGroomedSubject { id: String },
    #[error("no files matching `{pattern}` in {}", dir.display())]
    EmptyCohort { dir: PathBuf, pattern: &'static str },
    #[error("{primary} shape(s) but {companions} paired image(s)")]
    CompanionMismatch { primary: usize, companions: usize },
    #[error("optimizer returned {local} local and {world} world file(s) for {expected} subject(s)")]
    CorrespondenceMismatch {
        expected: usize,
        local: usize,
        world: usize,
    },
    #[error("{stage} stage needs the {needs}, which no earlier stage produced")]
    MissingStageOutput { stage: Stage, needs: &'static str },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Run options, fixed once the run starts.
///
/// Tiny tests are always single scale and never interactive; the accessors
/// apply that rule instead of rewriting the stored flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    use_case: UseCase,
    output_dir: PathBuf,
    interactive: bool,
    tiny_test: bool,
    single_scale: bool,
    subsample: Option<usize>,
    skip_grooming: bool,
    groom_images: bool,
    spacing: Option<[f64; 3]>,
    seed: u64,
}

impl RunConfig {
    #[must_use]
    pub fn new(use_case: UseCase, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            use_case,
            output_dir: output_dir.into(),
            interactive: false,
            tiny_test: false,
            single_scale: false,
            subsample: None,
            skip_grooming: false,
            groom_images: false,
            spacing: None,
            seed: 0,
        }
    }

    /// `Output/<use case>`.
    #[must_use]
    pub fn default_output_dir(use_case: UseCase) -> PathBuf {
        Path::new("Output").join(use_case.name())
    }

    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    #[must_use]
    pub fn with_tiny_test(mut self, tiny_test: bool) -> Self {
        self.tiny_test = tiny_test;
        self
    }

    #[must_use]
    pub fn with_single_scale(mut self, single_scale: bool) -> Self {
        self.single_scale = single_scale;
        self
    }

    #[must_use]
    pub fn with_subsample(mut self, count: Option<usize>) -> Self {
        self.subsample = count;
        self
    }

    #[must_use]
    pub fn with_skip_grooming(mut self, skip: bool) -> Self {
        self.skip_grooming = skip;
        self
    }

    #[must_use]
    pub fn with_groom_images(mut self, groom_images: bool) -> Self {
        self.groom_images = groom_images;
        self
    }

    #[must_use]
    pub fn with_spacing(mut self, spacing: Option<[f64; 3]>) -> Self {
        self.spacing = spacing;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn use_case(&self) -> UseCase {
        self.use_case
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory the dataset is extracted into.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.output_dir.join(self.use_case.dataset())
    }

    #[must_use]
    pub fn groom_dir(&self) -> PathBuf {
        self.output_dir.join("groomed")
    }

    #[must_use]
    pub fn shape_model_dir(&self) -> PathBuf {
        self.output_dir.join("shape_models")
    }

    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.interactive && !self.tiny_test
    }

    #[must_use]
    pub fn is_tiny_test(&self) -> bool {
        self.tiny_test
    }

    #[must_use]
    pub fn run_mode(&self) -> RunMode {
        if self.tiny_test {
            RunMode::TinyTest
        } else if self.single_scale {
            RunMode::SingleScale
        } else {
            RunMode::MultiScale
        }
    }

    #[must_use]
    pub fn subsample(&self) -> Option<usize> {
        self.subsample
    }

    #[must_use]
    pub fn skip_grooming(&self) -> bool {
        self.skip_grooming
    }

    #[must_use]
    pub fn groom_images(&self) -> bool {
        self.groom_images
    }

    #[must_use]
    pub fn spacing(&self) -> Option<[f64; 3]> {
        self.spacing
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    Groom,
    Optimize,
    Analyze,
}

impl Stage {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Groom => "groom",
            Stage::Optimize => "optimize",
            Stage::Analyze => "analyze",
        }
    }

    const fn banner(self) -> &'static str {
        match self {
            Stage::Acquire => "Step 1. Get Data",
            Stage::Groom => "Step 2. Groom - Data Pre-processing",
            Stage::Optimize => "Step 3. Optimize - Particle Based Optimization",
            Stage::Analyze => "Step 4. Analysis - Launch the shape model viewer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stages a run will execute, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    order: Vec<Stage>,
}

impl StagePlan {
    /// Skipping grooming drops the groom stage; a tiny test stops after
    /// optimization.
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        let mut order = vec![Stage::Acquire];
        if !config.skip_grooming() {
            order.push(Stage::Groom);
        }
        order.push(Stage::Optimize);
        if !config.is_tiny_test() {
            order.push(Stage::Analyze);
        }
        Self { order }
    }

    #[must_use]
    pub fn order(&self) -> &[Stage] {
        &self.order
    }

    #[must_use]
    pub fn contains(&self, stage: Stage) -> bool {
        self.order.contains(&stage)
    }
}

/// External services one run talks to.
pub struct Collaborators<'a> {
    pub dataset: &'a dyn DatasetSource,
    pub toolkit: &'a dyn GroomingToolkit,
    pub transformer: &'a dyn DistanceTransformer,
    pub optimizer: &'a dyn Optimizer,
    pub launcher: &'a dyn AnalysisLauncher,
    pub sampler: &'a dyn Sampler,
    pub picker: &'a mut dyn PlanePicker,
    pub prompt: &'a mut dyn Prompt,
}

/// Files acquired for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cohort {
    /// Shapes to groom.
    pub primary: FileManifest,
    /// Raw images paired with `primary`, when they take part in grooming.
    pub companions: Option<FileManifest>,
    /// Already groomed shapes of an existing model.
    pub existing: FileManifest,
    /// Voxel spacing for mesh-only rasterization.
    pub spacing: [f64; 3],
}

impl Cohort {
    /// Every subject the optimizer sees: existing ones first.
    #[must_use]
    pub fn all_subjects(&self) -> FileManifest {
        self.existing.chain(&self.primary)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutcome {
    pub stages_run: Vec<Stage>,
    pub cohort: Cohort,
    pub distance_transforms: FileManifest,
    pub planes: Vec<CuttingPlane>,
    pub parameters: Option<ParameterSet>,
    pub correspondences: Option<Correspondences>,
    pub analyzed: bool,
}

#[derive(Debug, Default)]
struct Progress {
    cohort: Option<Cohort>,
    groomed: Option<(FileManifest, Vec<CuttingPlane>)>,
    parameters: Option<ParameterSet>,
    correspondences: Option<Correspondences>,
    analyzed: bool,
    stages_run: Vec<Stage>,
}

impl Progress {
    fn cohort(&self, stage: Stage) -> Result<&Cohort, PipelineError> {
        self.cohort
            .as_ref()
            .ok_or(PipelineError::MissingStageOutput { stage, needs: "cohort" })
    }

    fn groomed(&self, stage: Stage) -> Result<&(FileManifest, Vec<CuttingPlane>), PipelineError> {
        self.groomed.as_ref().ok_or(PipelineError::MissingStageOutput {
            stage,
            needs: "distance transforms",
        })
    }

    fn into_outcome(self) -> PipelineOutcome {
        let (distance_transforms, planes) = self.groomed.unwrap_or_default();
        PipelineOutcome {
            stages_run: self.stages_run,
            cohort: self.cohort.unwrap_or_default(),
            distance_transforms,
            planes,
            parameters: self.parameters,
            correspondences: self.correspondences,
            analyzed: self.analyzed,
        }
    }
}

pub struct Orchestrator<'c> {
    config: &'c RunConfig,
}

impl<'c> Orchestrator<'c> {
    #[must_use]
    pub fn new(config: &'c RunConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn plan(&self) -> StagePlan {
        StagePlan::new(self.config)
    }

    /// Runs every planned stage in order; the first failure aborts the run.
    pub fn run(&self, c: &mut Collaborators<'_>) -> Result<PipelineOutcome, PipelineError> {
        let plan = self.plan();
        let mut progress = Progress::default();
        log::info!(
            "running {} in {} ({:?})",
            self.config.use_case().name(),
            self.config.output_dir().display(),
            self.config.run_mode()
        );

        for &stage in plan.order() {
            log::info!("{}", stage.banner());
            if self.config.is_interactive() {
                c.prompt.pause(PAUSE_MESSAGE)?;
            }
            match stage {
                Stage::Acquire => self.acquire(c, &mut progress)?,
                Stage::Groom => self.groom(c, &mut progress)?,
                Stage::Optimize => self.optimize(c, &mut progress)?,
                Stage::Analyze => self.analyze(c, &mut progress)?,
            }
            progress.stages_run.push(stage);
        }

        if self.config.is_tiny_test() {
            log::info!("Done with tiny test");
        }
        Ok(progress.into_outcome())
    }

    fn acquire(&self, c: &mut Collaborators<'_>, progress: &mut Progress) -> Result<(), PipelineError> {
        let config = self.config;
        let use_case = config.use_case();
        let layout = use_case.layout();
        let output_dir = config.output_dir();
        create_dir(output_dir)?;

        if config.is_tiny_test() {
            c.dataset
                .download_subset(use_case.name(), use_case.dataset(), output_dir)?;
        } else {
            c.dataset.download_and_unzip(use_case.dataset(), output_dir)?;
        }

        let data_dir = config.data_dir();
        let limit = config.is_tiny_test().then(|| use_case.tiny_subset_size());
        let mut primary = discover(&data_dir, layout.primary, limit)?;

        let mut companions = match layout.companions {
            Some(set) if config.groom_images() && data_dir.join(set.dir).is_dir() => {
                Some(discover(&data_dir, set, limit)?).filter(|images| !images.is_empty())
            }
            _ => None,
        };
        if let Some(images) = &companions {
            if images.len() != primary.len() {
                return Err(PipelineError::CompanionMismatch {
                    primary: primary.len(),
                    companions: images.len(),
                });
            }
        }

        let existing = match layout.existing {
            Some(set) => discover(&data_dir, set, None)?,
            None => FileManifest::default(),
        };

        if let Some(count) = config.subsample() {
            let indices = c.sampler.sample(primary.len(), count)?;
            primary = primary.select(&indices)?;
            companions = companions.map(|images| images.select(&indices)).transpose()?;
            log::info!("subsampled {} subject(s): {indices:?}", primary.len());
        }
        // Checked after subsampling so that a sample of zero is refused too.
        if primary.is_empty() {
            return Err(PipelineError::EmptyCohort {
                dir: data_dir.join(layout.primary.dir),
                pattern: layout.primary.pattern,
            });
        }

        let needs_spacing = matches!(use_case.groom_profile(), GroomProfile::Anatomy { .. })
            && companions.is_none()
            && !config.skip_grooming();
        let spacing = match config.spacing() {
            Some(spacing) => spacing,
            None if needs_spacing && config.is_interactive() => ask_spacing(&mut *c.prompt)?,
            None => [1.0, 1.0, 1.0],
        };

        let cohort = Cohort {
            primary,
            companions,
            existing,
            spacing,
        };
        log::info!(
            "acquired {} subject(s){}",
            cohort.primary.len(),
            if cohort.existing.is_empty() {
                String::new()
            } else {
                format!(" and {} existing shape(s)", cohort.existing.len())
            }
        );

        if config.skip_grooming() {
            progress.groomed = Some(self.restore(&cohort)?);
        }
        progress.cohort = Some(cohort);
        Ok(())
    }

    /// Reloads the groomed distance transforms and planes of an earlier run.
    fn restore(&self, cohort: &Cohort) -> Result<(FileManifest, Vec<CuttingPlane>), PipelineError> {
        log::info!("Skipping grooming.");
        let run_dir = self.config.output_dir();
        let state = CuttingPlaneStore::load_state(run_dir).map_err(|source| match source {
            StoreError::NotFound { path } => PipelineError::MissingRunState {
                source: StoreError::NotFound { path: path.clone() },
                path,
            },
            other => PipelineError::Store(other),
        })?;

        let distance_transforms = cohort
            .all_subjects()
            .iter()
            .map(|path| {
                let id = subject_id(path);
                state
                    .distance_transform_for(&id)
                    .map(Path::to_path_buf)
                    .ok_or(PipelineError::MissingGroomedSubject { id })
            })
            .collect::<Result<FileManifest, _>>()?;

        log::info!(
            "restored {} distance transform(s) and {} cutting plane(s) from {}",
            distance_transforms.len(),
            state.planes.len(),
            state.groomed_dir.display()
        );
        Ok((distance_transforms, state.planes))
    }

    fn groom(&self, c: &mut Collaborators<'_>, progress: &mut Progress) -> Result<(), PipelineError> {
        let config = self.config;
        let use_case = config.use_case();
        let cohort = progress.cohort(Stage::Groom)?;
        let groom_dir = config.groom_dir();
        create_dir(&groom_dir)?;
        let groomer = Groomer::new(c.toolkit, c.transformer, &groom_dir);

        let (distance_transforms, planes) = match use_case.groom_profile() {
            GroomProfile::DistanceTransformOnly => {
                let groomed = groomer.distance_transforms(&cohort.primary)?;
                (cohort.existing.chain(&groomed), use_case.static_planes())
            }
            GroomProfile::Anatomy { clip } => {
                let selector = if use_case.allows_plane_picking() && config.is_interactive() {
                    CuttingPlaneSelector::resolve(true, use_case.static_planes(), &mut *c.prompt)?
                } else {
                    CuttingPlaneSelector::new(SelectionMode::Static, use_case.static_planes())
                }
                .with_axis(use_case.orientation_axis())
                .with_default_side(use_case.reference_side());

                let choice = selector.choose_reference(&cohort.primary, &mut *c.prompt)?;
                let reference_side = choice
                    .as_ref()
                    .map_or(selector.default_side(), |choice| choice.reference_side);
                let request = AnatomyRequest {
                    meshes: &cohort.primary,
                    images: cohort.companions.as_ref(),
                    spacing: cohort.spacing,
                    reference_side,
                    clip,
                    selector: &selector,
                    choice: choice.as_ref(),
                };
                let output = groomer.anatomy(&request, &mut *c.picker)?;
                (cohort.existing.chain(&output.distance_transforms), output.planes)
            }
        };

        let subjects = cohort
            .all_subjects()
            .iter()
            .zip(distance_transforms.iter())
            .map(|(source, dt)| GroomedSubject {
                id: subject_id(source),
                distance_transform: dt.to_path_buf(),
            })
            .collect();
        let state = RunState::new(planes.clone(), groom_dir, subjects);
        CuttingPlaneStore::save_state(config.output_dir(), &state)?;

        progress.groomed = Some((distance_transforms, planes));
        Ok(())
    }

    fn optimize(&self, c: &mut Collaborators<'_>, progress: &mut Progress) -> Result<(), PipelineError> {
        let config = self.config;
        let use_case = config.use_case();
        let cohort = progress.cohort(Stage::Optimize)?;
        let (distance_transforms, planes) = progress.groomed(Stage::Optimize)?;

        let point_dir = config.shape_model_dir();
        create_dir(&point_dir)?;

        let assignment = if planes.is_empty() {
            CuttingPlaneAssignment::new()
        } else {
            CuttingPlaneAssignment::uniform(distance_transforms.len(), planes)
        };

        let mut builder = ParameterSetBuilder::new(use_case.defaults());
        let fixed_model = use_case.layout().model_dir.map(|dir| config.data_dir().join(dir));
        if let Some(model_dir) = &fixed_model {
            let mean_shape_path = c.optimizer.find_mean_shape(model_dir)?;
            builder = builder.fixed_domains(FixedDomains {
                count: cohort.existing.len(),
                model_dir: model_dir.clone(),
                mean_shape_path,
            });
        }
        let parameters = builder.build(config.run_mode(), distance_transforms.len(), &assignment)?;

        let correspondences = if fixed_model.is_some() {
            c.optimizer
                .optimize_fixed_domains(&point_dir, distance_transforms, &parameters)?
        } else {
            c.optimizer.optimize(&point_dir, distance_transforms, &parameters)?
        };
        if correspondences.local.len() != distance_transforms.len()
            || correspondences.world.len() != distance_transforms.len()
        {
            return Err(PipelineError::CorrespondenceMismatch {
                expected: distance_transforms.len(),
                local: correspondences.local.len(),
                world: correspondences.world.len(),
            });
        }

        log::info!(
            "optimized {} subject(s) with {} particle(s)",
            distance_transforms.len(),
            parameters.number_of_particles().unwrap_or_default()
        );
        progress.parameters = Some(parameters);
        progress.correspondences = Some(correspondences);
        Ok(())
    }

    fn analyze(&self, c: &mut Collaborators<'_>, progress: &mut Progress) -> Result<(), PipelineError> {
        let (distance_transforms, _) = progress.groomed(Stage::Analyze)?;
        let correspondences = progress
            .correspondences
            .as_ref()
            .ok_or(PipelineError::MissingStageOutput {
                stage: Stage::Analyze,
                needs: "correspondences",
            })?;
        c.launcher.launch(
            &self.config.shape_model_dir(),
            distance_transforms,
            &correspondences.local,
            &correspondences.world,
        )?;
        progress.analyzed = true;
        Ok(())
    }
}

fn discover(data_dir: &Path, set: FileSet, limit: Option<usize>) -> Result<FileManifest, ManifestError> {
    let files = FileManifest::discover(&data_dir.join(set.dir), set.pattern)?;
    Ok(match limit {
        Some(count) => files.take(count),
        None => files,
    })
}

fn create_dir(path: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}
