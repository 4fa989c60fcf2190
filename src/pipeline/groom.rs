//! Grooming sequences.
//!
//! Every step is checked against its input: same length, same subject at
//! every index. Companion images are checked against their own input.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::collaborators::{
    DistanceTransformer, GroomingToolkit, Paired, PlanePicker, Rasterization, ToolError,
};
use crate::manifest::{FileManifest, subject_id};
use crate::plane::CuttingPlane;
use crate::plane::selector::{CuttingPlaneSelector, ReferenceChoice, SelectionError, Side};

/// Padding in voxels around image-backed segmentations.
pub const IMAGE_PADDING: u32 = 10;
/// Padding in voxels around segmentations rasterized from meshes alone.
pub const MESH_PADDING: u32 = 30;

#[derive(Debug, Error)]
pub enum GroomError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("{step} returned {found} file(s) for {expected} input(s)")]
    LengthMismatch {
        step: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{step} reordered subjects: index {index} holds `{found}`, expected `{expected}`")]
    Misaligned {
        step: &'static str,
        index: usize,
        expected: String,
        found: String,
    },
    #[error("{step} dropped the paired images")]
    MissingCompanions { step: &'static str },
    #[error("reference {} is not part of the cohort", path.display())]
    UnknownReference { path: PathBuf },
}

/// Groomed cohort handed to the optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct GroomOutput {
    pub distance_transforms: FileManifest,
    pub planes: Vec<CuttingPlane>,
    /// Median subject used for rigid alignment, if one was computed.
    pub reference: Option<PathBuf>,
}

/// Tools and output root shared by all grooming steps.
pub struct Groomer<'a> {
    toolkit: &'a dyn GroomingToolkit,
    transformer: &'a dyn DistanceTransformer,
    groom_dir: PathBuf,
}

/// Inputs of the anatomy sequence besides the shapes themselves.
pub struct AnatomyRequest<'a> {
    pub meshes: &'a FileManifest,
    /// Raw images; selects the image-backed sequence when present.
    pub images: Option<&'a FileManifest>,
    pub spacing: [f64; 3],
    pub reference_side: Side,
    pub clip: bool,
    pub selector: &'a CuttingPlaneSelector,
    pub choice: Option<&'a ReferenceChoice>,
}

impl<'a> Groomer<'a> {
    pub fn new(
        toolkit: &'a dyn GroomingToolkit,
        transformer: &'a dyn DistanceTransformer,
        groom_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            toolkit,
            transformer,
            groom_dir: groom_dir.into(),
        }
    }

    #[must_use]
    pub fn groom_dir(&self) -> &Path {
        &self.groom_dir
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.groom_dir.join(name)
    }

    /// Converts segmentations to distance transforms in the groom directory.
    pub fn distance_transforms(&self, segmentations: &FileManifest) -> Result<FileManifest, GroomError> {
        let output = self
            .transformer
            .apply_distance_transforms(&self.groom_dir, segmentations)?;
        checked("distance transform", segmentations, output)
    }

    /// Full alignment sequence from meshes (and optionally raw images) to
    /// distance transforms, resolving the cutting planes on the aligned cohort.
    pub fn anatomy(
        &self,
        request: &AnatomyRequest<'_>,
        picker: &mut dyn PlanePicker,
    ) -> Result<GroomOutput, GroomError> {
        match request.images {
            Some(images) => self.anatomy_with_images(request, images, picker),
            None => self.anatomy_from_meshes(request, picker),
        }
    }

    fn anatomy_with_images(
        &self,
        request: &AnatomyRequest<'_>,
        images: &FileManifest,
        picker: &mut dyn PlanePicker,
    ) -> Result<GroomOutput, GroomError> {
        let tk = self.toolkit;
        log::info!("grooming {} subject(s) with raw images", request.meshes.len());

        let reflected = tk.reflect(
            &self.dir("reflected"),
            request.meshes,
            Some(images),
            request.reference_side,
        )?;
        let (meshes, images) = checked_pair("reflect", request.meshes, images, reflected)?;

        let volumes = tk.meshes_to_volumes(&self.dir("volumes"), &meshes, Rasterization::UsingImages(&images))?;
        let segs = checked("meshes to volumes", &meshes, volumes)?;

        let resampled = tk.isotropic_resample(&self.dir("resampled/segmentations"), &segs, true)?;
        let segs = checked("isotropic resample", &segs, resampled)?;
        let resampled = tk.isotropic_resample(&self.dir("resampled/images"), &images, false)?;
        let images = checked("isotropic resample", &images, resampled)?;

        let padded = tk.pad(&self.dir("padded/segmentations"), &segs, IMAGE_PADDING)?;
        let segs = checked("pad", &segs, padded)?;
        let padded = tk.pad(&self.dir("padded/images"), &images, IMAGE_PADDING)?;
        let images = checked("pad", &images, padded)?;

        let com = tk.center_of_mass_align(&self.dir("com_aligned"), &segs, Some(&images))?;
        let (segs, images) = checked_pair("center of mass", &segs, &images, com)?;

        let centered = tk.center(&self.dir("centered/segmentations"), &segs)?;
        let segs = checked("center", &segs, centered)?;
        let centered = tk.center(&self.dir("centered/images"), &images)?;
        let images = checked("center", &images, centered)?;

        let (median, median_index) = self.find_reference(&segs)?;
        let aligned = tk.rigid_align(&self.dir("aligned"), &median, &segs, Some(&images))?;
        let (segs, images) = checked_pair("rigid alignment", &segs, &images, aligned)?;

        let planes = request
            .selector
            .resolve_planes(picker, &segs, request.choice, median_index)?;
        let segs = self.maybe_clip(request.clip, &segs, &planes)?;

        let cropped = tk.crop(&self.dir("cropped/segmentations"), &segs, &segs)?;
        let cropped_segs = checked("crop", &segs, cropped)?;
        let cropped = tk.crop(&self.dir("cropped/images"), &images, &segs)?;
        checked("crop", &images, cropped)?;

        Ok(GroomOutput {
            distance_transforms: self.distance_transforms(&cropped_segs)?,
            planes,
            reference: Some(median),
        })
    }

    fn anatomy_from_meshes(
        &self,
        request: &AnatomyRequest<'_>,
        picker: &mut dyn PlanePicker,
    ) -> Result<GroomOutput, GroomError> {
        let tk = self.toolkit;
        log::info!("grooming {} subject(s) from meshes", request.meshes.len());

        let reflected = tk.reflect(&self.dir("reflected"), request.meshes, None, request.reference_side)?;
        let meshes = checked("reflect", request.meshes, reflected.primary)?;

        let volumes = tk.meshes_to_volumes(&self.dir("volumes"), &meshes, Rasterization::Spacing(request.spacing))?;
        let segs = checked("meshes to volumes", &meshes, volumes)?;

        let resampled = tk.isotropic_resample(&self.dir("resampled/segmentations"), &segs, true)?;
        let segs = checked("isotropic resample", &segs, resampled)?;

        let padded = tk.pad(&self.dir("padded/segmentations"), &segs, MESH_PADDING)?;
        let segs = checked("pad", &segs, padded)?;

        let com = tk.center_of_mass_align(&self.dir("com_aligned"), &segs, None)?;
        let segs = checked("center of mass", &segs, com.primary)?;

        let centered = tk.center(&self.dir("centered/segmentations"), &segs)?;
        let segs = checked("center", &segs, centered)?;

        let (median, median_index) = self.find_reference(&segs)?;
        let aligned = tk.rigid_align(&self.dir("aligned"), &median, &segs, None)?;
        let segs = checked("rigid alignment", &segs, aligned.primary)?;

        let planes = request
            .selector
            .resolve_planes(picker, &segs, request.choice, median_index)?;
        let segs = self.maybe_clip(request.clip, &segs, &planes)?;

        let cropped = tk.crop(&self.dir("cropped/segmentations"), &segs, &segs)?;
        let segs = checked("crop", &segs, cropped)?;

        Ok(GroomOutput {
            distance_transforms: self.distance_transforms(&segs)?,
            planes,
            reference: Some(median),
        })
    }

    fn find_reference(&self, segs: &FileManifest) -> Result<(PathBuf, usize), GroomError> {
        let median = self.toolkit.find_reference(segs)?;
        let index = segs
            .position(&median)
            .ok_or_else(|| GroomError::UnknownReference { path: median.clone() })?;
        log::info!("median reference: {}", median.display());
        Ok((median, index))
    }

    fn maybe_clip(
        &self,
        clip: bool,
        segs: &FileManifest,
        planes: &[CuttingPlane],
    ) -> Result<FileManifest, GroomError> {
        if !clip || planes.is_empty() {
            return Ok(segs.clone());
        }
        let clipped = self.toolkit.clip(&self.dir("clipped"), segs, planes)?;
        checked("clip", segs, clipped)
    }
}

/// Verifies that `output` holds the subjects of `input` in the same order.
pub fn checked(step: &'static str, input: &FileManifest, output: FileManifest) -> Result<FileManifest, GroomError> {
    if input.len() != output.len() {
        return Err(GroomError::LengthMismatch {
            step,
            expected: input.len(),
            found: output.len(),
        });
    }
    for (index, (before, after)) in input.iter().zip(output.iter()).enumerate() {
        let expected = subject_id(before);
        let found = subject_id(after);
        if expected != found {
            return Err(GroomError::Misaligned {
                step,
                index,
                expected,
                found,
            });
        }
    }
    log::debug!("{step}: {} file(s)", output.len());
    Ok(output)
}

fn checked_pair(
    step: &'static str,
    primary: &FileManifest,
    companions: &FileManifest,
    output: Paired,
) -> Result<(FileManifest, FileManifest), GroomError> {
    let out_companions = output.companions.ok_or(GroomError::MissingCompanions { step })?;
    Ok((
        checked(step, primary, output.primary)?,
        checked(step, companions, out_companions)?,
    ))
}
