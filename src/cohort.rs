//! Synthetic cohort generation.
//!
//! Meshes, segmentations and images are produced by three functions that
//! each take the previous step's output. A step given nothing to work on
//! reports it and returns `Ok(None)`.

use std::path::Path;

use crate::manifest::FileManifest;
use crate::pipeline::collaborators::ToolResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct EllipsoidOptions {
    pub samples: usize,
    pub randomize_center: bool,
    pub randomize_rotation: bool,
    pub randomize_x_radius: bool,
    pub randomize_y_radius: bool,
    pub randomize_z_radius: bool,
}

impl Default for EllipsoidOptions {
    fn default() -> Self {
        Self {
            samples: 3,
            randomize_center: true,
            randomize_rotation: true,
            randomize_x_radius: true,
            randomize_y_radius: true,
            randomize_z_radius: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupershapeOptions {
    pub samples: usize,
    pub randomize_center: bool,
    pub randomize_rotation: bool,
    /// Rotational symmetry of the shape.
    pub m: u32,
    /// Index of the first generated sample.
    pub start_id: usize,
    pub size: u32,
}

impl Default for SupershapeOptions {
    fn default() -> Self {
        Self {
            samples: 3,
            randomize_center: true,
            randomize_rotation: true,
            m: 3,
            start_id: 0,
            size: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeFamily {
    Ellipsoid(EllipsoidOptions),
    Supershape(SupershapeOptions),
}

impl ShapeFamily {
    pub const NAMES: &'static [&'static str] = &["ellipsoid", "supershape"];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ShapeFamily::Ellipsoid(_) => "ellipsoid",
            ShapeFamily::Supershape(_) => "supershape",
        }
    }

    /// Family with default options and `samples` shapes.
    #[must_use]
    pub fn from_name(name: &str, samples: usize) -> Option<Self> {
        match name {
            "ellipsoid" => Some(ShapeFamily::Ellipsoid(EllipsoidOptions {
                samples,
                ..EllipsoidOptions::default()
            })),
            "supershape" => Some(ShapeFamily::Supershape(SupershapeOptions {
                samples,
                ..SupershapeOptions::default()
            })),
            _ => None,
        }
    }

    #[must_use]
    pub const fn samples(&self) -> usize {
        match self {
            ShapeFamily::Ellipsoid(options) => options.samples,
            ShapeFamily::Supershape(options) => options.samples,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationOptions {
    pub randomize_size: bool,
    pub spacing: [f64; 3],
    pub allow_on_boundary: bool,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            randomize_size: true,
            spacing: [1.0, 1.0, 1.0],
            allow_on_boundary: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageOptions {
    pub blur_factor: f64,
    pub foreground_mean: f64,
    pub foreground_var: f64,
    pub background_mean: f64,
    pub background_var: f64,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            blur_factor: 1.0,
            foreground_mean: 180.0,
            foreground_var: 30.0,
            background_mean: 80.0,
            background_var: 30.0,
        }
    }
}

/// Tool that synthesizes shapes and their volumetric representations.
pub trait CohortBackend {
    fn generate_meshes(&self, out_dir: &Path, family: &ShapeFamily) -> ToolResult<FileManifest>;
    fn rasterize_meshes(
        &self,
        out_dir: &Path,
        meshes: &FileManifest,
        options: &SegmentationOptions,
    ) -> ToolResult<FileManifest>;
    fn synthesize_images(
        &self,
        out_dir: &Path,
        segmentations: &FileManifest,
        options: &ImageOptions,
    ) -> ToolResult<FileManifest>;
}

pub fn generate_meshes(
    backend: &dyn CohortBackend,
    out_dir: &Path,
    family: &ShapeFamily,
) -> ToolResult<Option<FileManifest>> {
    if family.samples() == 0 {
        log::warn!("No {} samples requested; nothing to generate.", family.name());
        return Ok(None);
    }
    let meshes = backend.generate_meshes(&out_dir.join("meshes"), family)?;
    log::info!("generated {} {} mesh(es)", meshes.len(), family.name());
    Ok(Some(meshes))
}

pub fn generate_segmentations(
    backend: &dyn CohortBackend,
    out_dir: &Path,
    meshes: &FileManifest,
    options: &SegmentationOptions,
) -> ToolResult<Option<FileManifest>> {
    if meshes.is_empty() {
        log::warn!("No meshes have been generated to get segmentations from. Generate meshes first.");
        return Ok(None);
    }
    let segmentations = backend.rasterize_meshes(&out_dir.join("segmentations"), meshes, options)?;
    log::info!("generated {} segmentation(s)", segmentations.len());
    Ok(Some(segmentations))
}

pub fn generate_images(
    backend: &dyn CohortBackend,
    out_dir: &Path,
    segmentations: &FileManifest,
    options: &ImageOptions,
) -> ToolResult<Option<FileManifest>> {
    if segmentations.is_empty() {
        log::warn!(
            "No segmentations have been generated to get images from. Generate segmentations first."
        );
        return Ok(None);
    }
    let images = backend.synthesize_images(&out_dir.join("images"), segmentations, options)?;
    log::info!("generated {} image(s)", images.len());
    Ok(Some(images))
}
