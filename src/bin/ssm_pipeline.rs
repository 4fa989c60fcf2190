//! Command-line driver for the shape modeling workflows.
//!
//! Subcommands:
//! - `list`: show the supported use cases
//! - `run`: execute a use case end to end
//! - `show-state`: print the saved cutting planes and groomed subjects of a run
//! - `generate`: synthesize an ellipsoid or supershape cohort

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use ssm_pipeline::cohort::{self, ImageOptions, SegmentationOptions, ShapeFamily};
use ssm_pipeline::external::{LocalDataset, StudioLauncher, ToolBackend, console_plane_picker};
use ssm_pipeline::interact::{ConsolePrompt, parse_triple};
use ssm_pipeline::{Collaborators, CuttingPlaneStore, Orchestrator, RunConfig, SeededSampler, UseCase};

#[derive(Parser, Debug)]
#[command(name = "ssm_pipeline")]
#[command(about = "Run cutting-plane shape modeling workflows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the supported use cases
    List,
    /// Run a use case: acquire, groom, optimize, analyze
    Run(RunArgs),
    /// Print the saved run state of a run directory
    #[command(name = "show-state")]
    ShowState {
        /// Run directory, e.g. Output/femur_cut
        run_dir: PathBuf,
    },
    /// Generate a synthetic cohort
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Use case name (see `list`)
    #[arg(value_parser = parse_use_case)]
    use_case: UseCase,

    /// Pause between stages and pick the cutting plane by hand
    #[arg(long)]
    interactive: bool,

    /// Small, fast run on three subjects; skips analysis
    #[arg(long)]
    tiny_test: bool,

    /// Optimize with a fixed particle count instead of multi-scale
    #[arg(long)]
    single_scale: bool,

    /// Keep only this many randomly chosen subjects
    #[arg(long)]
    subsample: Option<usize>,

    /// Reuse the groomed output of an earlier run
    #[arg(long)]
    skip_grooming: bool,

    /// Groom raw images alongside the shapes
    #[arg(long)]
    groom_images: bool,

    /// Mesh rasterization spacing as x,y,z
    #[arg(long, value_parser = parse_spacing)]
    spacing: Option<[f64; 3]>,

    /// Run directory (default: Output/<use case>)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory holding the extracted datasets
    #[arg(long, default_value = "Data")]
    data_root: PathBuf,

    /// External shape-processing tool
    #[arg(long, default_value = "shapeworks")]
    tool: PathBuf,

    /// Viewer started on the finished model
    #[arg(long, default_value = "ShapeWorksStudio")]
    viewer: PathBuf,

    /// Seed for subsampling
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Shape family: ellipsoid or supershape
    family: String,

    /// Output directory
    #[arg(long, default_value = "Output/generated")]
    out_dir: PathBuf,

    /// Number of shapes
    #[arg(long, default_value = "3")]
    samples: usize,

    /// External shape-processing tool
    #[arg(long, default_value = "shapeworks")]
    tool: PathBuf,

    /// Also rasterize the meshes to segmentations
    #[arg(long)]
    segmentations: bool,

    /// Also synthesize images from the segmentations (implies --segmentations)
    #[arg(long)]
    images: bool,
}

fn parse_use_case(name: &str) -> Result<UseCase, String> {
    UseCase::from_str(name).ok_or_else(|| {
        let names = UseCase::ALL.iter().map(|u| u.name()).collect::<Vec<_>>();
        format!("unknown use case `{name}`; expected one of: {}", names.join(", "))
    })
}

fn parse_spacing(text: &str) -> Result<[f64; 3], String> {
    match parse_triple(text) {
        Some(spacing) if spacing.iter().all(|v| *v > 0.0) => Ok(spacing),
        _ => Err(format!("`{text}` is not three positive numbers")),
    }
}

fn run_list() {
    for use_case in UseCase::ALL {
        println!("{:<14} {}", use_case.name(), use_case.description());
    }
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| RunConfig::default_output_dir(args.use_case));
    let config = RunConfig::new(args.use_case, output_dir)
        .with_interactive(args.interactive)
        .with_tiny_test(args.tiny_test)
        .with_single_scale(args.single_scale)
        .with_subsample(args.subsample)
        .with_skip_grooming(args.skip_grooming)
        .with_groom_images(args.groom_images)
        .with_spacing(args.spacing)
        .with_seed(args.seed);

    let dataset = LocalDataset::new(&args.data_root);
    let backend = ToolBackend::new(&args.tool);
    let launcher = StudioLauncher::new(&args.viewer);
    let sampler = SeededSampler::new(config.seed());
    let mut picker = console_plane_picker();
    let mut prompt = ConsolePrompt;

    let mut collaborators = Collaborators {
        dataset: &dataset,
        toolkit: &backend,
        transformer: &backend,
        optimizer: &backend,
        launcher: &launcher,
        sampler: &sampler,
        picker: &mut picker,
        prompt: &mut prompt,
    };

    let outcome = Orchestrator::new(&config)
        .run(&mut collaborators)
        .with_context(|| format!("{} failed", config.use_case().name()))?;

    let stages = outcome.stages_run.iter().map(|s| s.name()).collect::<Vec<_>>();
    log::info!(
        "finished {} ({}): {} subject(s)",
        config.use_case().name(),
        stages.join(" -> "),
        outcome.distance_transforms.len()
    );
    Ok(())
}

fn run_show_state(run_dir: &Path) -> Result<()> {
    let state = CuttingPlaneStore::load_state(run_dir)
        .with_context(|| format!("cannot read run state in {}", run_dir.display()))?;

    println!("groomed dir: {}", state.groomed_dir.display());
    println!("created:     {}", state.created_unix);
    println!("planes ({}):", state.planes.len());
    for plane in &state.planes {
        println!("  {plane}");
    }
    println!("subjects ({}):", state.subjects.len());
    for subject in &state.subjects {
        println!("  {:<24} {}", subject.id, subject.distance_transform.display());
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let family = ShapeFamily::from_name(&args.family, args.samples).ok_or_else(|| {
        anyhow!(
            "unknown shape family `{}`; expected one of: {}",
            args.family,
            ShapeFamily::NAMES.join(", ")
        )
    })?;
    let backend = ToolBackend::new(&args.tool);
    let out = args.out_dir.join(family.name());

    let Some(meshes) = cohort::generate_meshes(&backend, &out, &family).context("mesh generation failed")? else {
        return Ok(());
    };
    if !(args.segmentations || args.images) {
        return Ok(());
    }
    let segmentations = cohort::generate_segmentations(&backend, &out, &meshes, &SegmentationOptions::default())
        .context("segmentation failed")?;
    if args.images {
        let segmentations = segmentations.unwrap_or_default();
        cohort::generate_images(&backend, &out, &segmentations, &ImageOptions::default())
            .context("image synthesis failed")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            run_list();
            Ok(())
        }
        Commands::Run(args) => run_pipeline(args),
        Commands::ShowState { run_dir } => run_show_state(&run_dir),
        Commands::Generate(args) => run_generate(args),
    }
}
