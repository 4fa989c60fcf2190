//! Resolves where a run's cutting planes come from.
//!
//! The mode is fixed once per run. Static planes need no interaction; the two
//! interactive modes pick a plane on a groomed volume, either of a subject the
//! user names up front or of the cohort's median subject.

use std::path::Path;

use thiserror::Error;

use super::{CuttingPlane, PlaneError};
use crate::geom::{Axis, Tolerance};
use crate::interact::{Prompt, PromptError, ask_choice};
use crate::manifest::FileManifest;
use crate::pipeline::collaborators::{PlanePicker, ToolError};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("plane picker failed: {0}")]
    Picker(#[from] ToolError),
    #[error("picked cutting plane is unusable: {0}")]
    DegeneratePlane(#[from] PlaneError),
    #[error("the cohort is empty; there is no subject to choose from")]
    EmptyManifest,
    #[error("reference subject {index} is outside the groomed cohort of {len}")]
    ReferenceOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Planes are fixed by the use case; no interaction.
    Static,
    /// The user names a subject by prefix before grooming starts.
    ChosenSample,
    /// The plane is picked on the median subject once grooming has found it.
    MedianSample,
}

/// Anatomical side of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Marker that ends a subject prefix of this side, e.g. `m03_L`.
    #[must_use]
    pub const fn marker(self) -> char {
        match self {
            Self::Left => 'L',
            Self::Right => 'R',
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Subject chosen for interactive picking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceChoice {
    pub index: usize,
    pub prefix: String,
    /// Side all subjects are mirrored to.
    pub reference_side: Side,
}

const MODE_QUESTION: &str = "\nOption 1: Define cutting plane now on a sample of your choice.\n\
Option 2: Define cutting plane on median sample once it has been selected.\n\
Please input 1 or 2 and press enter: ";

#[derive(Debug, Clone)]
pub struct CuttingPlaneSelector {
    mode: SelectionMode,
    static_planes: Vec<CuttingPlane>,
    axis: Axis,
    default_side: Side,
    tol: Tolerance,
}

impl CuttingPlaneSelector {
    #[must_use]
    pub fn new(mode: SelectionMode, static_planes: Vec<CuttingPlane>) -> Self {
        Self {
            mode,
            static_planes,
            axis: Axis::Y,
            default_side: Side::Left,
            tol: Tolerance::default_geom(),
        }
    }

    /// Resolves the mode: static without interaction, otherwise one menu prompt.
    pub fn resolve(
        interactive: bool,
        static_planes: Vec<CuttingPlane>,
        prompt: &mut dyn Prompt,
    ) -> Result<Self, SelectionError> {
        let mode = if interactive {
            match ask_choice(prompt, MODE_QUESTION, &[1, 2])? {
                1 => SelectionMode::ChosenSample,
                _ => SelectionMode::MedianSample,
            }
        } else {
            SelectionMode::Static
        };
        log::debug!("cutting plane selection mode: {mode:?}");
        Ok(Self::new(mode, static_planes))
    }

    #[must_use]
    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.axis = axis;
        self
    }

    #[must_use]
    pub fn with_default_side(mut self, side: Side) -> Self {
        self.default_side = side;
        self
    }

    #[must_use]
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    #[must_use]
    pub fn default_side(&self) -> Side {
        self.default_side
    }

    /// Lets the user name the reference subject; only asked in
    /// [`SelectionMode::ChosenSample`].
    ///
    /// Unknown or ambiguous prefixes are reported and asked again.
    pub fn choose_reference(
        &self,
        manifest: &FileManifest,
        prompt: &mut dyn Prompt,
    ) -> Result<Option<ReferenceChoice>, SelectionError> {
        if self.mode != SelectionMode::ChosenSample {
            return Ok(None);
        }
        if manifest.is_empty() {
            return Err(SelectionError::EmptyManifest);
        }

        let options = manifest.subject_prefixes();
        let question = format!(
            "\n\nType the prefix of the sample you wish to use to select the cutting plane \
             from listed options and press enter.\nOptions: {}\n",
            options.join(", ")
        );

        loop {
            let prefix = prompt.ask(&question)?.trim().to_owned();
            let matches = if prefix.is_empty() {
                Vec::new()
            } else {
                manifest.match_prefix(&prefix)
            };

            match matches.as_slice() {
                [index] => {
                    let reference_side = if prefix.ends_with(self.default_side.opposite().marker()) {
                        self.default_side.opposite()
                    } else {
                        self.default_side
                    };
                    log::info!(
                        "cutting plane reference: {prefix} (mirroring to the {} side)",
                        reference_side.name()
                    );
                    return Ok(Some(ReferenceChoice {
                        index: *index,
                        prefix,
                        reference_side,
                    }));
                }
                [] => match closest_option(&prefix, &options) {
                    Some(hint) => log::warn!("Invalid prefix. Did you mean `{hint}`?"),
                    None => log::warn!("Invalid prefix."),
                },
                many => log::warn!(
                    "Invalid prefix. `{prefix}` matches {} samples; type a longer prefix.",
                    many.len()
                ),
            }
        }
    }

    /// Planes for this run.
    ///
    /// `aligned` is the rigidly aligned cohort and `median_index` the position
    /// of the median subject in it. Picked planes are orientation-normalised
    /// and validated; static planes are returned as configured.
    pub fn resolve_planes(
        &self,
        picker: &mut dyn PlanePicker,
        aligned: &FileManifest,
        choice: Option<&ReferenceChoice>,
        median_index: usize,
    ) -> Result<Vec<CuttingPlane>, SelectionError> {
        let index = match (self.mode, choice) {
            (SelectionMode::Static, _) => return Ok(self.static_planes.clone()),
            (SelectionMode::ChosenSample, Some(choice)) => choice.index,
            (SelectionMode::ChosenSample | SelectionMode::MedianSample, _) => median_index,
        };

        let reference = aligned
            .get(index)
            .ok_or(SelectionError::ReferenceOutOfRange {
                index,
                len: aligned.len(),
            })?;
        let plane = self.pick(picker, reference)?;
        log::info!("Cutting plane points: {plane}");
        Ok(vec![plane])
    }

    /// Picks one plane on `reference`, then normalises and validates it.
    pub fn pick(
        &self,
        picker: &mut dyn PlanePicker,
        reference: &Path,
    ) -> Result<CuttingPlane, SelectionError> {
        let plane = picker.pick(reference)?.normalize_orientation(self.axis);
        plane.validate(self.tol)?;
        Ok(plane)
    }
}

fn closest_option<'a>(typed: &str, options: &'a [String]) -> Option<&'a str> {
    if typed.is_empty() {
        return None;
    }
    options
        .iter()
        .min_by_key(|option| levenshtein::levenshtein(typed, option))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::interact::ScriptedPrompt;

    struct FixedPicker {
        plane: CuttingPlane,
        picked_on: Vec<PathBuf>,
    }

    impl PlanePicker for FixedPicker {
        fn pick(&mut self, reference: &Path) -> Result<CuttingPlane, ToolError> {
            self.picked_on.push(reference.to_path_buf());
            Ok(self.plane)
        }
    }

    fn femur_manifest() -> FileManifest {
        ["m03_L_femur.ply", "m04_R_femur.ply", "m07_L_femur.ply"]
            .iter()
            .map(|name| PathBuf::from("meshes").join(name))
            .collect()
    }

    fn aligned_manifest() -> FileManifest {
        ["m03_L_femur.aligned.nrrd", "m04_R_femur.aligned.nrrd", "m07_L_femur.aligned.nrrd"]
            .iter()
            .map(|name| PathBuf::from("aligned").join(name))
            .collect()
    }

    fn negative_plane() -> CuttingPlane {
        CuttingPlane::from_arrays([[-1.0, -1.0, -40.5], [1.0, -1.0, -40.5], [-1.0, -3.0, -40.5]])
    }

    #[test]
    fn non_interactive_is_static_without_prompting() {
        let mut prompt = ScriptedPrompt::default();
        let selector = CuttingPlaneSelector::resolve(false, vec![negative_plane()], &mut prompt).unwrap();
        assert_eq!(selector.mode(), SelectionMode::Static);
        assert!(prompt.asked().is_empty());

        let mut picker = FixedPicker {
            plane: negative_plane(),
            picked_on: Vec::new(),
        };
        let planes = selector
            .resolve_planes(&mut picker, &aligned_manifest(), None, 1)
            .unwrap();
        // statische planes worden niet genormaliseerd
        assert_eq!(planes, vec![negative_plane()]);
        assert!(picker.picked_on.is_empty());
    }

    #[test]
    fn mode_menu_reprompts_on_invalid_choice() {
        let mut prompt = ScriptedPrompt::new(["0", "2"]);
        let selector = CuttingPlaneSelector::resolve(true, Vec::new(), &mut prompt).unwrap();
        assert_eq!(selector.mode(), SelectionMode::MedianSample);
        assert_eq!(prompt.asked().len(), 2);
    }

    #[test]
    fn unmatched_prefix_reprompts_once() {
        let selector = CuttingPlaneSelector::new(SelectionMode::ChosenSample, Vec::new());
        let mut prompt = ScriptedPrompt::new(["m99_X", "m07_L"]);
        let choice = selector
            .choose_reference(&femur_manifest(), &mut prompt)
            .unwrap()
            .unwrap();

        assert_eq!(prompt.asked().len(), 2);
        assert_eq!(choice.index, 2);
        assert_eq!(choice.reference_side, Side::Left);
        assert!(prompt.asked()[0].contains("m03_L, m04_R, m07_L"));
    }

    #[test]
    fn ambiguous_and_empty_prefixes_are_rejected() {
        let selector = CuttingPlaneSelector::new(SelectionMode::ChosenSample, Vec::new());
        let mut prompt = ScriptedPrompt::new(["", "m0", "m04_R"]);
        let choice = selector
            .choose_reference(&femur_manifest(), &mut prompt)
            .unwrap()
            .unwrap();
        assert_eq!(prompt.asked().len(), 3);
        assert_eq!(choice.index, 1);
    }

    #[test]
    fn listed_option_is_selectable_when_another_name_extends_it() {
        let manifest: FileManifest = ["ell_1.nrrd", "ell_10.nrrd", "ell_2.nrrd"]
            .iter()
            .map(|name| PathBuf::from("segs").join(name))
            .collect();
        let selector = CuttingPlaneSelector::new(SelectionMode::ChosenSample, Vec::new());
        let mut prompt = ScriptedPrompt::new(["ell_1"]);
        let choice = selector
            .choose_reference(&manifest, &mut prompt)
            .unwrap()
            .unwrap();
        assert_eq!(prompt.asked().len(), 1);
        assert_eq!(choice.index, 0);
        assert_eq!(choice.prefix, "ell_1");
    }

    #[test]
    fn right_marker_flips_reference_side() {
        let selector = CuttingPlaneSelector::new(SelectionMode::ChosenSample, Vec::new());
        let mut prompt = ScriptedPrompt::new(["m04_R"]);
        let choice = selector
            .choose_reference(&femur_manifest(), &mut prompt)
            .unwrap()
            .unwrap();
        assert_eq!(choice.reference_side, Side::Right);
    }

    #[test]
    fn median_mode_does_not_ask_for_prefix() {
        let selector = CuttingPlaneSelector::new(SelectionMode::MedianSample, Vec::new());
        let mut prompt = ScriptedPrompt::default();
        assert_eq!(selector.choose_reference(&femur_manifest(), &mut prompt).unwrap(), None);
        assert!(prompt.asked().is_empty());
    }

    #[test]
    fn chosen_sample_picks_on_its_aligned_volume_and_normalizes() {
        let selector = CuttingPlaneSelector::new(SelectionMode::ChosenSample, Vec::new());
        let choice = ReferenceChoice {
            index: 1,
            prefix: "m04_R".to_owned(),
            reference_side: Side::Right,
        };
        let mut picker = FixedPicker {
            plane: negative_plane(),
            picked_on: Vec::new(),
        };

        let planes = selector
            .resolve_planes(&mut picker, &aligned_manifest(), Some(&choice), 2)
            .unwrap();
        assert_eq!(picker.picked_on, vec![aligned_manifest().files()[1].clone()]);
        assert_eq!(planes.len(), 1);
        assert!(planes[0].points().iter().all(|p| p.y > 0.0));
    }

    #[test]
    fn median_sample_picks_on_median() {
        let selector = CuttingPlaneSelector::new(SelectionMode::MedianSample, Vec::new());
        let mut picker = FixedPicker {
            plane: negative_plane(),
            picked_on: Vec::new(),
        };
        selector
            .resolve_planes(&mut picker, &aligned_manifest(), None, 2)
            .unwrap();
        assert_eq!(picker.picked_on, vec![aligned_manifest().files()[2].clone()]);

        let err = selector
            .resolve_planes(&mut picker, &aligned_manifest(), None, 7)
            .unwrap_err();
        assert!(matches!(err, SelectionError::ReferenceOutOfRange { index: 7, len: 3 }));
    }

    #[test]
    fn degenerate_pick_is_fatal() {
        let selector = CuttingPlaneSelector::new(SelectionMode::MedianSample, Vec::new());
        let mut picker = FixedPicker {
            plane: CuttingPlane::from_arrays([[0.0, 1.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]]),
            picked_on: Vec::new(),
        };
        let err = selector
            .resolve_planes(&mut picker, &aligned_manifest(), None, 0)
            .unwrap_err();
        assert!(matches!(err, SelectionError::DegeneratePlane(PlaneError::Degenerate(_))));
    }

    #[test]
    fn closest_option_suggests_nearest_prefix() {
        let options = vec!["m03_L".to_owned(), "m04_R".to_owned()];
        assert_eq!(closest_option("m03", &options), Some("m03_L"));
        assert_eq!(closest_option("m4_R", &options), Some("m04_R"));
        assert_eq!(closest_option("", &options), None);
    }
}
