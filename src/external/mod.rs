//! Collaborators backed by the local filesystem and an external tool.
//!
//! [`ToolBackend`] runs one process per subject and step:
//! `<program> <step> --input <in> --output <out> [--key value ...]`.
//! Output files keep the subject id of their input, so manifests stay
//! index-aligned whatever order the processes finish in.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cohort::{CohortBackend, ImageOptions, SegmentationOptions, ShapeFamily};
use crate::interact::ConsolePrompt;
use crate::manifest::{FileManifest, subject_prefix};
use crate::params::ParameterSet;
use crate::params::xml::write_parameter_file;
use crate::pipeline::collaborators::{
    Correspondences, DatasetSource, DistanceTransformer, GroomingToolkit, Optimizer, Paired,
    PromptPlanePicker, Rasterization, ToolError, ToolResult,
};
use crate::plane::CuttingPlane;
use crate::plane::selector::Side;

pub mod project;

pub use project::StudioLauncher;

/// Plane picker that reads the three points from the terminal.
pub type ConsolePlanePicker = PromptPlanePicker<ConsolePrompt>;

#[must_use]
pub fn console_plane_picker() -> ConsolePlanePicker {
    PromptPlanePicker::new(ConsolePrompt)
}

/// Datasets kept as extracted directories under a local root.
#[derive(Debug, Clone)]
pub struct LocalDataset {
    root: PathBuf,
}

impl LocalDataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn copy_dataset(&self, dataset: &str, dest: &Path) -> ToolResult<()> {
        let source = self.root.join(dataset);
        let target = dest.join(dataset);
        copy_tree(&source, &target).map_err(|source_err| ToolError::Io {
            path: source.clone(),
            source: source_err,
        })?;
        log::info!("copied {} to {}", source.display(), target.display());
        Ok(())
    }
}

impl DatasetSource for LocalDataset {
    fn download_and_unzip(&self, dataset: &str, dest: &Path) -> ToolResult<()> {
        self.copy_dataset(dataset, dest)
    }

    fn download_subset(&self, use_case: &str, dataset: &str, dest: &Path) -> ToolResult<()> {
        log::debug!("{use_case}: using a local copy of {dataset} for the subset");
        self.copy_dataset(dataset, dest)
    }
}

fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&path, &dest)?;
        } else {
            fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}

/// One invocation of the external tool.
#[derive(Debug, Clone)]
struct Step {
    name: &'static str,
    args: Vec<OsString>,
}

impl Step {
    fn new(name: &'static str) -> Self {
        Self { name, args: Vec::new() }
    }

    fn opt(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.args.push(OsString::from(key));
        self.args.push(value.as_ref().to_os_string());
        self
    }

    fn io(self, input: &Path, output: &Path) -> Self {
        self.opt("--input", input).opt("--output", output)
    }
}

/// Drives an external shape-processing program.
#[derive(Debug, Clone)]
pub struct ToolBackend {
    program: PathBuf,
}

impl ToolBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `step` and returns its stdout.
    fn run(&self, step: &Step) -> ToolResult<String> {
        let output = Command::new(&self.program)
            .arg(step.name)
            .args(&step.args)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                command: format!("{} {}", self.program.display(), step.name),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Applies `build` to every subject; outputs keep the input order.
    fn per_subject<F>(&self, out_dir: &Path, files: &FileManifest, build: F) -> ToolResult<FileManifest>
    where
        F: Fn(usize, &Path) -> (Step, PathBuf) + Sync,
    {
        ensure_dir(out_dir)?;
        let outputs = map_ordered(files.files(), |(index, input)| {
            let (step, output) = build(index, input.as_path());
            self.run(&step)?;
            Ok(output)
        })?;
        Ok(FileManifest::new(outputs))
    }

    /// Runs `step` on primary and companion files with shared per-subject
    /// options.
    fn paired_step<F>(
        &self,
        name: &'static str,
        tag: &str,
        out_dir: &Path,
        files: &FileManifest,
        companions: Option<&FileManifest>,
        extra: F,
    ) -> ToolResult<Paired>
    where
        F: Fn(usize, Step) -> Step + Sync,
    {
        let primary = self.per_subject(out_dir, files, |index, input| {
            let output = derived(out_dir, input, tag, None);
            (extra(index, Step::new(name).io(input, &output)), output)
        })?;
        let companions = match companions {
            Some(images) => {
                let image_dir = out_dir.join("images");
                Some(self.per_subject(&image_dir, images, |index, input| {
                    let output = derived(&image_dir, input, tag, None);
                    (extra(index, Step::new(name).io(input, &output)), output)
                })?)
            }
            None => None,
        };
        Ok(Paired::new(primary, companions))
    }

    fn simple_step(
        &self,
        name: &'static str,
        tag: &str,
        out_dir: &Path,
        files: &FileManifest,
        options: &[(&str, String)],
    ) -> ToolResult<FileManifest> {
        self.per_subject(out_dir, files, |_, input| {
            let output = derived(out_dir, input, tag, Some("nrrd"));
            let step = options
                .iter()
                .fold(Step::new(name).io(input, &output), |step, (key, value)| step.opt(key, value));
            (step, output)
        })
    }

    /// Runs an optimizer step and collects `<stem>_local.particles` and
    /// `<stem>_world.particles` for every distance transform.
    fn correspondences(
        &self,
        step_name: &'static str,
        out_dir: &Path,
        dt_files: &FileManifest,
        params: &ParameterSet,
    ) -> ToolResult<Correspondences> {
        ensure_dir(out_dir)?;
        let parameters = write_parameter_file(&out_dir.join(format!("{step_name}.xml")), params, dt_files)
            .map_err(|err| ToolError::BadOutput {
                step: step_name,
                detail: err.to_string(),
            })?;
        self.run(&Step::new(step_name).opt("--parameters", &parameters).opt("--output", out_dir))?;

        let mut local = Vec::with_capacity(dt_files.len());
        let mut world = Vec::with_capacity(dt_files.len());
        for dt in dt_files {
            let stem = dt.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            for (suffix, list) in [("local", &mut local), ("world", &mut world)] {
                let path = out_dir.join(format!("{stem}_{suffix}.particles"));
                if !path.is_file() {
                    return Err(ToolError::BadOutput {
                        step: step_name,
                        detail: format!("missing {}", path.display()),
                    });
                }
                list.push(path);
            }
        }
        Ok(Correspondences {
            local: FileManifest::new(local),
            world: FileManifest::new(world),
        })
    }
}

/// `<out_dir>/<name without extension>.<tag>.<ext>`; `ext` defaults to the
/// input's own extension.
fn derived(out_dir: &Path, input: &Path, tag: &str, ext: Option<&str>) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = ext
        .map(str::to_owned)
        .or_else(|| input.extension().map(|e| e.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "nrrd".to_owned());
    out_dir.join(format!("{stem}.{tag}.{ext}"))
}

cfg_if::cfg_if! {
    if #[cfg(feature = "parallel")] {
        use rayon::prelude::*;

        fn map_ordered<F>(files: &[PathBuf], run: F) -> ToolResult<Vec<PathBuf>>
        where
            F: Fn((usize, &PathBuf)) -> ToolResult<PathBuf> + Sync + Send,
        {
            files.par_iter().enumerate().map(run).collect()
        }
    } else {
        fn map_ordered<F>(files: &[PathBuf], run: F) -> ToolResult<Vec<PathBuf>>
        where
            F: Fn((usize, &PathBuf)) -> ToolResult<PathBuf>,
        {
            files.iter().enumerate().map(run).collect()
        }
    }
}

fn ensure_dir(dir: &Path) -> ToolResult<()> {
    fs::create_dir_all(dir).map_err(|source| ToolError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn is_on_side(path: &Path, side: Side) -> bool {
    subject_prefix(path).ends_with(side.marker())
}

fn format_triple(values: [f64; 3]) -> String {
    format!("{},{},{}", values[0], values[1], values[2])
}

impl GroomingToolkit for ToolBackend {
    fn reflect(
        &self,
        out_dir: &Path,
        files: &FileManifest,
        companions: Option<&FileManifest>,
        reference_side: Side,
    ) -> ToolResult<Paired> {
        let flip: Vec<bool> = files
            .iter()
            .map(|path| is_on_side(path, reference_side.opposite()))
            .collect();
        // `--axis none` writes the subject through unchanged.
        self.paired_step("reflect", "reflect", out_dir, files, companions, |index, step| {
            let axis = if flip.get(index).copied().unwrap_or(false) { "x" } else { "none" };
            step.opt("--axis", axis)
        })
    }

    fn meshes_to_volumes(
        &self,
        out_dir: &Path,
        meshes: &FileManifest,
        rasterization: Rasterization<'_>,
    ) -> ToolResult<FileManifest> {
        self.per_subject(out_dir, meshes, |index, input| {
            let output = derived(out_dir, input, "vol", Some("nrrd"));
            let step = Step::new("mesh-to-volume").io(input, &output);
            let step = match rasterization {
                Rasterization::UsingImages(images) => match images.get(index) {
                    Some(image) => step.opt("--image", image),
                    None => step,
                },
                Rasterization::Spacing(spacing) => step.opt("--spacing", format_triple(spacing)),
            };
            (step, output)
        })
    }

    fn isotropic_resample(&self, out_dir: &Path, files: &FileManifest, binary: bool) -> ToolResult<FileManifest> {
        let binary = if binary { "1" } else { "0" };
        self.simple_step("resample", "isores", out_dir, files, &[("--binary", binary.to_owned())])
    }

    fn pad(&self, out_dir: &Path, files: &FileManifest, padding: u32) -> ToolResult<FileManifest> {
        self.simple_step("pad", "pad", out_dir, files, &[("--padding", padding.to_string())])
    }

    fn center_of_mass_align(
        &self,
        out_dir: &Path,
        segmentations: &FileManifest,
        companions: Option<&FileManifest>,
    ) -> ToolResult<Paired> {
        self.paired_step("com-align", "com", out_dir, segmentations, companions, |_, step| step)
    }

    fn center(&self, out_dir: &Path, files: &FileManifest) -> ToolResult<FileManifest> {
        self.simple_step("center", "center", out_dir, files, &[])
    }

    fn find_reference(&self, files: &FileManifest) -> ToolResult<PathBuf> {
        let step = files
            .iter()
            .fold(Step::new("find-reference"), |step, path| step.opt("--input", path));
        let stdout = self.run(&step)?;
        let chosen = PathBuf::from(stdout.trim());
        if files.position(&chosen).is_none() {
            return Err(ToolError::BadOutput {
                step: "find-reference",
                detail: format!("`{}` is not one of the inputs", chosen.display()),
            });
        }
        Ok(chosen)
    }

    fn rigid_align(
        &self,
        out_dir: &Path,
        reference: &Path,
        segmentations: &FileManifest,
        companions: Option<&FileManifest>,
    ) -> ToolResult<Paired> {
        self.paired_step("rigid-align", "aligned", out_dir, segmentations, companions, |_, step| {
            step.opt("--reference", reference)
        })
    }

    fn clip(&self, out_dir: &Path, files: &FileManifest, planes: &[CuttingPlane]) -> ToolResult<FileManifest> {
        let numbers = planes
            .iter()
            .flat_map(CuttingPlane::flatten)
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.simple_step("clip", "clipped", out_dir, files, &[("--planes", numbers)])
    }

    fn crop(&self, out_dir: &Path, files: &FileManifest, bounds_from: &FileManifest) -> ToolResult<FileManifest> {
        ensure_dir(out_dir)?;
        let list = out_dir.join("bounds.txt");
        let listing = bounds_from
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&list, listing).map_err(|source| ToolError::Io {
            path: list.clone(),
            source,
        })?;
        self.simple_step(
            "crop",
            "cropped",
            out_dir,
            files,
            &[("--bounds-list", list.to_string_lossy().into_owned())],
        )
    }
}

impl DistanceTransformer for ToolBackend {
    fn apply_distance_transforms(&self, out_dir: &Path, files: &FileManifest) -> ToolResult<FileManifest> {
        self.simple_step("distance-transform", "DT", out_dir, files, &[])
    }
}

impl Optimizer for ToolBackend {
    fn optimize(&self, out_dir: &Path, dt_files: &FileManifest, params: &ParameterSet) -> ToolResult<Correspondences> {
        self.correspondences("optimize", out_dir, dt_files, params)
    }

    fn optimize_fixed_domains(
        &self,
        out_dir: &Path,
        dt_files: &FileManifest,
        params: &ParameterSet,
    ) -> ToolResult<Correspondences> {
        self.correspondences("optimize-fixed-domains", out_dir, dt_files, params)
    }

    fn find_mean_shape(&self, model_dir: &Path) -> ToolResult<PathBuf> {
        let mean = model_dir.join("meanshape_local.particles");
        self.run(&Step::new("find-mean-shape").io(model_dir, &mean))?;
        Ok(mean)
    }
}

impl CohortBackend for ToolBackend {
    fn generate_meshes(&self, out_dir: &Path, family: &ShapeFamily) -> ToolResult<FileManifest> {
        ensure_dir(out_dir)?;
        let step = Step::new("generate").opt("--output", out_dir).opt("--family", family.name());
        let step = match family {
            ShapeFamily::Ellipsoid(o) => step
                .opt("--samples", o.samples.to_string())
                .opt("--randomize-center", flag(o.randomize_center))
                .opt("--randomize-rotation", flag(o.randomize_rotation))
                .opt("--randomize-x-radius", flag(o.randomize_x_radius))
                .opt("--randomize-y-radius", flag(o.randomize_y_radius))
                .opt("--randomize-z-radius", flag(o.randomize_z_radius)),
            ShapeFamily::Supershape(o) => step
                .opt("--samples", o.samples.to_string())
                .opt("--randomize-center", flag(o.randomize_center))
                .opt("--randomize-rotation", flag(o.randomize_rotation))
                .opt("--m", o.m.to_string())
                .opt("--start-id", o.start_id.to_string())
                .opt("--size", o.size.to_string()),
        };
        self.run(&step)?;
        Ok(FileManifest::discover(out_dir, "*.vtk")?)
    }

    fn rasterize_meshes(
        &self,
        out_dir: &Path,
        meshes: &FileManifest,
        options: &SegmentationOptions,
    ) -> ToolResult<FileManifest> {
        self.simple_step(
            "mesh-to-segmentation",
            "seg",
            out_dir,
            meshes,
            &[
                ("--randomize-size", flag(options.randomize_size).to_owned()),
                ("--spacing", format_triple(options.spacing)),
                ("--allow-on-boundary", flag(options.allow_on_boundary).to_owned()),
            ],
        )
    }

    fn synthesize_images(
        &self,
        out_dir: &Path,
        segmentations: &FileManifest,
        options: &ImageOptions,
    ) -> ToolResult<FileManifest> {
        self.simple_step(
            "segmentation-to-image",
            "image",
            out_dir,
            segmentations,
            &[
                ("--blur-factor", options.blur_factor.to_string()),
                ("--foreground-mean", options.foreground_mean.to_string()),
                ("--foreground-var", options.foreground_var.to_string()),
                ("--background-mean", options.background_mean.to_string()),
                ("--background-var", options.background_var.to_string()),
            ],
        )
    }
}

const fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}
