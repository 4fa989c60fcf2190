//! Supported workflows and their fixed configuration tables.

use crate::geom::Axis;
use crate::params::ParameterDefaults;
use crate::plane::CuttingPlane;
use crate::plane::selector::Side;

/// Directory inside the dataset plus a file-name pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSet {
    pub dir: &'static str,
    pub pattern: &'static str,
}

impl FileSet {
    const fn new(dir: &'static str, pattern: &'static str) -> Self {
        Self { dir, pattern }
    }
}

/// Where a dataset keeps its files after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetLayout {
    /// Shapes to groom: meshes or segmentations.
    pub primary: FileSet,
    /// Raw images paired with `primary`, if the dataset ships them.
    pub companions: Option<FileSet>,
    /// Already groomed shapes of an existing model (fixed-domain runs).
    pub existing: Option<FileSet>,
    /// Existing correspondence model (fixed-domain runs).
    pub model_dir: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroomProfile {
    /// Segmentations go straight to distance transforms.
    DistanceTransformOnly,
    /// Full alignment sequence on meshes, optionally with raw images.
    /// `clip` applies the cutting planes to the segmentations as well.
    Anatomy { clip: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseCase {
    FemurCut,
    EllipsoidCut,
    EllipsoidFixedDomains,
}

impl UseCase {
    pub const ALL: &'static [UseCase] = &[
        UseCase::FemurCut,
        UseCase::EllipsoidCut,
        UseCase::EllipsoidFixedDomains,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            UseCase::FemurCut => "femur_cut",
            UseCase::EllipsoidCut => "ellipsoid_cut",
            UseCase::EllipsoidFixedDomains => "ellipsoid_fd",
        }
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "femur_cut" => Some(UseCase::FemurCut),
            "ellipsoid_cut" => Some(UseCase::EllipsoidCut),
            "ellipsoid_fd" => Some(UseCase::EllipsoidFixedDomains),
            _ => None,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            UseCase::FemurCut => "left/right femurs from meshes and hip CT, one cutting plane",
            UseCase::EllipsoidCut => "aligned ellipsoid segmentations, two cutting planes",
            UseCase::EllipsoidFixedDomains => "new ellipsoids placed into an existing 128-particle model",
        }
    }

    #[must_use]
    pub const fn dataset(self) -> &'static str {
        match self {
            UseCase::FemurCut => "femur-v0",
            UseCase::EllipsoidCut => "ellipsoid_1mode_aligned",
            UseCase::EllipsoidFixedDomains => "ellipsoid_1mode",
        }
    }

    #[must_use]
    pub const fn layout(self) -> DatasetLayout {
        match self {
            UseCase::FemurCut => DatasetLayout {
                primary: FileSet::new("meshes", "*.ply"),
                companions: Some(FileSet::new("images", "*.nrrd")),
                existing: None,
                model_dir: None,
            },
            UseCase::EllipsoidCut => DatasetLayout {
                primary: FileSet::new("segmentations", "*.nrrd"),
                companions: None,
                existing: None,
                model_dir: None,
            },
            UseCase::EllipsoidFixedDomains => DatasetLayout {
                primary: FileSet::new("fd_segmentations", "*.nrrd"),
                companions: None,
                existing: Some(FileSet::new("groomed/distance_transforms", "*.nrrd")),
                model_dir: Some("shape_models/ellipsoid/128"),
            },
        }
    }

    #[must_use]
    pub const fn groom_profile(self) -> GroomProfile {
        match self {
            // The femur planes are handed to the optimizer, not clipped here.
            UseCase::FemurCut => GroomProfile::Anatomy { clip: false },
            UseCase::EllipsoidCut | UseCase::EllipsoidFixedDomains => GroomProfile::DistanceTransformOnly,
        }
    }

    /// Planes used when none are picked interactively.
    #[must_use]
    pub fn static_planes(self) -> Vec<CuttingPlane> {
        match self {
            UseCase::FemurCut => vec![CuttingPlane::from_arrays([
                [-1.0, -1.0, -40.5],
                [1.0, -1.0, -40.5],
                [-1.0, 1.0, -40.5],
            ])],
            UseCase::EllipsoidCut => vec![
                CuttingPlane::from_arrays([[10.0, 10.0, 0.0], [-10.0, -10.0, 0.0], [10.0, -10.0, 0.0]]),
                CuttingPlane::from_arrays([[10.0, -3.0, 10.0], [-10.0, -3.0, 10.0], [10.0, -3.0, -10.0]]),
            ],
            UseCase::EllipsoidFixedDomains => Vec::new(),
        }
    }

    #[must_use]
    pub fn defaults(self) -> ParameterDefaults {
        match self {
            UseCase::FemurCut => ParameterDefaults::femur(),
            UseCase::EllipsoidCut => ParameterDefaults::ellipsoid_cut(),
            UseCase::EllipsoidFixedDomains => ParameterDefaults::ellipsoid_fixed_domains(),
        }
    }

    /// Side every subject is mirrored to before alignment.
    #[must_use]
    pub const fn reference_side(self) -> Side {
        Side::Left
    }

    #[must_use]
    pub const fn orientation_axis(self) -> Axis {
        Axis::Y
    }

    /// Whether the user may pick the cutting plane instead of using the
    /// static one.
    #[must_use]
    pub const fn allows_plane_picking(self) -> bool {
        matches!(self, UseCase::FemurCut)
    }

    #[must_use]
    pub const fn is_fixed_domain(self) -> bool {
        self.layout().existing.is_some()
    }

    /// Subjects kept by a tiny test.
    #[must_use]
    pub const fn tiny_subset_size(self) -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Tolerance;

    #[test]
    fn names_round_trip() {
        for use_case in UseCase::ALL {
            assert_eq!(UseCase::from_str(use_case.name()), Some(*use_case));
        }
        assert_eq!(UseCase::from_str("femur"), None);
    }

    #[test]
    fn static_planes_are_valid() {
        for use_case in UseCase::ALL {
            for plane in use_case.static_planes() {
                plane.validate(Tolerance::default_geom()).unwrap();
            }
        }
        assert_eq!(UseCase::EllipsoidCut.static_planes().len(), 2);
    }

    #[test]
    fn only_fixed_domain_case_has_a_model() {
        for use_case in UseCase::ALL {
            assert_eq!(use_case.is_fixed_domain(), use_case.layout().model_dir.is_some());
        }
        assert!(UseCase::EllipsoidFixedDomains.is_fixed_domain());
    }
}
