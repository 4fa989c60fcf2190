//! Optimizer configuration.
//!
//! A [`ParameterSet`] is built once per run from a use case's reference
//! table, the run mode and the cutting-plane assignment, and is read-only
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::geom::Tolerance;
use crate::plane::{CuttingPlane, CuttingPlaneAssignment, PlaneError};

pub mod xml;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("cutting planes are assigned to {assigned} domain(s) but the cohort has {expected}")]
    DomainCountMismatch { assigned: usize, expected: usize },
    #[error("cutting plane assignment is inconsistent with its count record")]
    InconsistentAssignment,
    #[error("domain {domain}: {source}")]
    DegeneratePlane {
        domain: usize,
        #[source]
        source: PlaneError,
    },
}

/// Scale of the optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    SingleScale,
    /// Shape statistics drive initialization past a particle threshold.
    MultiScale,
    /// Reduced smoke-test run; always single scale.
    TinyTest,
}

/// Representation the optimizer samples particles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainType {
    Image,
    Mesh,
}

impl DomainType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Mesh => "mesh",
        }
    }
}

/// Single optimizer option.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    IntList(Vec<i64>),
    Planes(Vec<CuttingPlane>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => f.write_str(if *value { "1" } else { "0" }),
            Self::Text(value) => f.write_str(value),
            Self::IntList(values) => {
                let text = values.iter().map(ToString::to_string).collect::<Vec<_>>();
                f.write_str(&text.join(" "))
            }
            Self::Planes(planes) => {
                let lines = planes
                    .iter()
                    .flat_map(|plane| plane.points().iter())
                    .map(|p| format!("{} {} {}", p.x, p.y, p.z))
                    .collect::<Vec<_>>();
                f.write_str(&lines.join("\n"))
            }
        }
    }
}

/// Tiny-test overrides; always below the reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TinyOverrides {
    pub number_of_particles: u32,
    pub iterations: u32,
}

impl Default for TinyOverrides {
    fn default() -> Self {
        Self {
            number_of_particles: 16,
            iterations: 25,
        }
    }
}

/// Reference table of optimizer defaults for one use case.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefaults {
    pub number_of_particles: u32,
    pub use_normals: bool,
    pub normal_weight: f64,
    pub checkpointing_interval: u32,
    pub keep_checkpoints: bool,
    pub iterations_per_split: u32,
    pub optimization_iterations: u32,
    pub starting_regularization: f64,
    pub ending_regularization: f64,
    pub recompute_regularization_interval: u32,
    pub domains_per_shape: u32,
    pub domain_type: DomainType,
    pub relative_weighting: f64,
    pub initial_relative_weighting: f64,
    pub procrustes_interval: u32,
    pub procrustes_scaling: bool,
    pub save_init_splits: bool,
    pub debug_projection: Option<bool>,
    pub verbosity: u32,
    pub use_statistics_in_init: Option<bool>,
    pub adaptivity_mode: Option<u32>,
    /// Particle count after which multi-scale runs switch to shape statistics.
    pub shape_statistics_after: u32,
    pub tiny: TinyOverrides,
}

impl ParameterDefaults {
    /// Femur with optimizer-side cutting plane.
    #[must_use]
    pub fn femur() -> Self {
        Self {
            number_of_particles: 1024,
            use_normals: false,
            normal_weight: 10.0,
            checkpointing_interval: 200,
            keep_checkpoints: true,
            iterations_per_split: 4000,
            optimization_iterations: 4000,
            starting_regularization: 100.0,
            ending_regularization: 0.1,
            recompute_regularization_interval: 2,
            domains_per_shape: 1,
            domain_type: DomainType::Image,
            relative_weighting: 10.0,
            initial_relative_weighting: 1.0,
            procrustes_interval: 1,
            procrustes_scaling: true,
            save_init_splits: true,
            debug_projection: Some(false),
            verbosity: 2,
            use_statistics_in_init: Some(false),
            adaptivity_mode: Some(0),
            shape_statistics_after: 64,
            tiny: TinyOverrides {
                number_of_particles: 32,
                iterations: 25,
            },
        }
    }

    /// Aligned ellipsoids clipped by two planes.
    #[must_use]
    pub fn ellipsoid_cut() -> Self {
        Self {
            number_of_particles: 32,
            use_normals: true,
            normal_weight: 15.0,
            checkpointing_interval: 200,
            keep_checkpoints: false,
            iterations_per_split: 3000,
            optimization_iterations: 3000,
            starting_regularization: 100.0,
            ending_regularization: 10.0,
            recompute_regularization_interval: 2,
            domains_per_shape: 1,
            domain_type: DomainType::Image,
            relative_weighting: 15.0,
            initial_relative_weighting: 0.05,
            procrustes_interval: 0,
            procrustes_scaling: false,
            save_init_splits: false,
            debug_projection: None,
            verbosity: 2,
            use_statistics_in_init: None,
            adaptivity_mode: Some(0),
            shape_statistics_after: 16,
            tiny: TinyOverrides::default(),
        }
    }

    /// New ellipsoids placed into an existing 128-particle model.
    #[must_use]
    pub fn ellipsoid_fixed_domains() -> Self {
        Self {
            number_of_particles: 128,
            use_normals: false,
            normal_weight: 15.0,
            checkpointing_interval: 200,
            keep_checkpoints: false,
            iterations_per_split: 100,
            optimization_iterations: 2000,
            starting_regularization: 100.0,
            ending_regularization: 0.1,
            recompute_regularization_interval: 2,
            domains_per_shape: 1,
            domain_type: DomainType::Image,
            relative_weighting: 15.0,
            initial_relative_weighting: 0.05,
            procrustes_interval: 0,
            procrustes_scaling: false,
            save_init_splits: false,
            debug_projection: None,
            verbosity: 2,
            use_statistics_in_init: None,
            adaptivity_mode: None,
            shape_statistics_after: 32,
            tiny: TinyOverrides::default(),
        }
    }
}

/// Inputs of a run that extends an existing correspondence model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDomains {
    pub count: usize,
    pub model_dir: PathBuf,
    pub mean_shape_path: PathBuf,
}

/// Read-only optimizer configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn number_of_particles(&self) -> Option<i64> {
        self.get_int("number_of_particles")
    }

    #[must_use]
    pub fn optimization_iterations(&self) -> Option<i64> {
        self.get_int("optimization_iterations")
    }

    #[must_use]
    pub fn iterations_per_split(&self) -> Option<i64> {
        self.get_int("iterations_per_split")
    }

    /// Per-domain plane counts, in domain order.
    #[must_use]
    pub fn cutting_plane_counts(&self) -> Option<&[i64]> {
        match self.values.get("cutting_plane_counts") {
            Some(ParamValue::IntList(counts)) => Some(counts),
            _ => None,
        }
    }

    /// All cutting planes, concatenated in domain order.
    #[must_use]
    pub fn cutting_planes(&self) -> Option<&[CuttingPlane]> {
        match self.values.get("cutting_planes") {
            Some(ParamValue::Planes(planes)) => Some(planes),
            _ => None,
        }
    }

    fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_owned(), value);
    }

    fn set_int(&mut self, name: &str, value: u32) {
        self.set(name, ParamValue::Int(i64::from(value)));
    }
}

#[derive(Debug, Clone)]
pub struct ParameterSetBuilder {
    defaults: ParameterDefaults,
    fixed_domains: Option<FixedDomains>,
    tol: Tolerance,
}

impl ParameterSetBuilder {
    #[must_use]
    pub fn new(defaults: ParameterDefaults) -> Self {
        Self {
            defaults,
            fixed_domains: None,
            tol: Tolerance::default_geom(),
        }
    }

    #[must_use]
    pub fn fixed_domains(mut self, fixed: FixedDomains) -> Self {
        self.fixed_domains = Some(fixed);
        self
    }

    #[must_use]
    pub fn defaults(&self) -> &ParameterDefaults {
        &self.defaults
    }

    /// Assembles the optimizer configuration.
    ///
    /// An empty `assignment` leaves the cutting-plane fields out; otherwise it
    /// must cover exactly `domain_count` domains. Tiny-test overrides are
    /// applied last; a fixed-domain run keeps the particle count of its model.
    pub fn build(
        &self,
        mode: RunMode,
        domain_count: usize,
        assignment: &CuttingPlaneAssignment,
    ) -> Result<ParameterSet, ParameterError> {
        let d = &self.defaults;
        let mut params = ParameterSet::default();

        params.set_int("number_of_particles", d.number_of_particles);
        params.set("use_normals", ParamValue::Bool(d.use_normals));
        params.set("normal_weight", ParamValue::Float(d.normal_weight));
        params.set_int("checkpointing_interval", d.checkpointing_interval);
        params.set("keep_checkpoints", ParamValue::Bool(d.keep_checkpoints));
        params.set_int("iterations_per_split", d.iterations_per_split);
        params.set_int("optimization_iterations", d.optimization_iterations);
        params.set("starting_regularization", ParamValue::Float(d.starting_regularization));
        params.set("ending_regularization", ParamValue::Float(d.ending_regularization));
        params.set_int(
            "recompute_regularization_interval",
            d.recompute_regularization_interval,
        );
        params.set_int("domains_per_shape", d.domains_per_shape);
        params.set("domain_type", ParamValue::Text(d.domain_type.name().to_owned()));
        params.set("relative_weighting", ParamValue::Float(d.relative_weighting));
        params.set(
            "initial_relative_weighting",
            ParamValue::Float(d.initial_relative_weighting),
        );
        params.set_int("procrustes_interval", d.procrustes_interval);
        params.set("procrustes_scaling", ParamValue::Bool(d.procrustes_scaling));
        params.set("save_init_splits", ParamValue::Bool(d.save_init_splits));
        params.set_int("verbosity", d.verbosity);
        if let Some(debug_projection) = d.debug_projection {
            params.set("debug_projection", ParamValue::Bool(debug_projection));
        }
        if let Some(use_statistics) = d.use_statistics_in_init {
            params.set("use_statistics_in_init", ParamValue::Bool(use_statistics));
        }
        if let Some(adaptivity) = d.adaptivity_mode {
            params.set_int("adaptivity_mode", adaptivity);
        }

        self.embed_assignment(&mut params, domain_count, assignment)?;

        if let Some(fixed) = &self.fixed_domains {
            params.set(
                "number_fixed_domains",
                ParamValue::Int(i64::try_from(fixed.count).unwrap_or(i64::MAX)),
            );
            params.set(
                "fixed_domain_model_dir",
                ParamValue::Text(fixed.model_dir.to_string_lossy().into_owned()),
            );
            params.set(
                "mean_shape_path",
                ParamValue::Text(fixed.mean_shape_path.to_string_lossy().into_owned()),
            );
        }

        // A fixed-domain run must keep the particle count of the model it
        // extends, so neither multi-scale splitting nor the tiny count apply.
        let fixed = self.fixed_domains.is_some();
        if mode == RunMode::MultiScale && !fixed {
            params.set_int("use_shape_statistics_after", d.shape_statistics_after);
        }

        if mode == RunMode::TinyTest {
            if !fixed {
                params.set_int("number_of_particles", d.tiny.number_of_particles);
            }
            params.set_int("optimization_iterations", d.tiny.iterations);
            params.set_int("iterations_per_split", d.tiny.iterations);
        }

        log::debug!("built {mode:?} parameter set with {} option(s)", params.len());
        Ok(params)
    }

    fn embed_assignment(
        &self,
        params: &mut ParameterSet,
        domain_count: usize,
        assignment: &CuttingPlaneAssignment,
    ) -> Result<(), ParameterError> {
        if assignment.is_empty() {
            return Ok(());
        }
        if !assignment.is_consistent() {
            return Err(ParameterError::InconsistentAssignment);
        }
        if assignment.domain_count() != domain_count {
            return Err(ParameterError::DomainCountMismatch {
                assigned: assignment.domain_count(),
                expected: domain_count,
            });
        }
        for domain in 0..assignment.domain_count() {
            for plane in assignment.planes(domain).unwrap_or_default() {
                plane
                    .validate(self.tol)
                    .map_err(|source| ParameterError::DegeneratePlane { domain, source })?;
            }
        }

        let counts = assignment
            .counts()
            .iter()
            .map(|&count| i64::try_from(count).unwrap_or(i64::MAX))
            .collect();
        params.set("cutting_plane_counts", ParamValue::IntList(counts));
        params.set(
            "cutting_planes",
            ParamValue::Planes(assignment.iter_flat().copied().collect()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn femur_plane() -> CuttingPlane {
        CuttingPlane::from_arrays([[-1.0, -1.0, -40.5], [1.0, -1.0, -40.5], [-1.0, 1.0, -40.5]])
    }

    fn all_defaults() -> [ParameterDefaults; 3] {
        [
            ParameterDefaults::femur(),
            ParameterDefaults::ellipsoid_cut(),
            ParameterDefaults::ellipsoid_fixed_domains(),
        ]
    }

    #[test]
    fn single_scale_has_no_statistics_threshold() {
        let builder = ParameterSetBuilder::new(ParameterDefaults::femur());
        let params = builder
            .build(RunMode::SingleScale, 2, &CuttingPlaneAssignment::uniform(2, &[femur_plane()]))
            .unwrap();
        assert_eq!(params.number_of_particles(), Some(1024));
        assert!(!params.contains("use_shape_statistics_after"));
        assert_eq!(params.get("domain_type"), Some(&ParamValue::Text("image".to_owned())));
        assert_eq!(params.get("keep_checkpoints"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn multi_scale_sets_statistics_threshold() {
        let builder = ParameterSetBuilder::new(ParameterDefaults::femur());
        let params = builder
            .build(RunMode::MultiScale, 0, &CuttingPlaneAssignment::new())
            .unwrap();
        assert_eq!(params.get_int("use_shape_statistics_after"), Some(64));
    }

    #[test]
    fn tiny_test_is_always_below_baseline() {
        for defaults in all_defaults() {
            let builder = ParameterSetBuilder::new(defaults);
            for domains in [1, 3, 10] {
                let assignment = CuttingPlaneAssignment::uniform(domains, &[femur_plane()]);
                let tiny = builder.build(RunMode::TinyTest, domains, &assignment).unwrap();
                for baseline_mode in [RunMode::SingleScale, RunMode::MultiScale] {
                    let baseline = builder.build(baseline_mode, domains, &assignment).unwrap();
                    assert!(tiny.number_of_particles() < baseline.number_of_particles());
                    assert!(tiny.optimization_iterations() < baseline.optimization_iterations());
                    assert!(tiny.iterations_per_split() < baseline.iterations_per_split());
                }
                assert!(!tiny.contains("use_shape_statistics_after"));
            }
        }
    }

    #[test]
    fn tiny_constants_match_use_cases() {
        let femur = ParameterSetBuilder::new(ParameterDefaults::femur())
            .build(RunMode::TinyTest, 0, &CuttingPlaneAssignment::new())
            .unwrap();
        assert_eq!(femur.number_of_particles(), Some(32));
        assert_eq!(femur.optimization_iterations(), Some(25));

        let ellipsoid = ParameterSetBuilder::new(ParameterDefaults::ellipsoid_cut())
            .build(RunMode::TinyTest, 0, &CuttingPlaneAssignment::new())
            .unwrap();
        assert_eq!(ellipsoid.number_of_particles(), Some(16));
    }

    #[test]
    fn assignment_is_embedded_as_parallel_fields() {
        let second = CuttingPlane::from_arrays([
            [10.0, -3.0, 10.0],
            [-10.0, -3.0, 10.0],
            [10.0, -3.0, -10.0],
        ]);
        let assignment = CuttingPlaneAssignment::uniform(3, &[femur_plane(), second]);
        let params = ParameterSetBuilder::new(ParameterDefaults::ellipsoid_cut())
            .build(RunMode::SingleScale, 3, &assignment)
            .unwrap();

        let counts = params.cutting_plane_counts().unwrap();
        let planes = params.cutting_planes().unwrap();
        assert_eq!(counts, &[2, 2, 2]);
        assert_eq!(planes.len(), 6);
        let mut offset = 0;
        for (domain, &count) in counts.iter().enumerate() {
            let count = usize::try_from(count).unwrap();
            assert_eq!(&planes[offset..offset + count], assignment.planes(domain).unwrap());
            offset += count;
        }
    }

    #[test]
    fn empty_assignment_omits_plane_fields() {
        let params = ParameterSetBuilder::new(ParameterDefaults::ellipsoid_cut())
            .build(RunMode::SingleScale, 5, &CuttingPlaneAssignment::new())
            .unwrap();
        assert!(params.cutting_planes().is_none());
        assert!(params.cutting_plane_counts().is_none());
    }

    #[test]
    fn domain_count_must_match() {
        let err = ParameterSetBuilder::new(ParameterDefaults::femur())
            .build(RunMode::SingleScale, 4, &CuttingPlaneAssignment::uniform(3, &[femur_plane()]))
            .unwrap_err();
        assert_eq!(
            err,
            ParameterError::DomainCountMismatch {
                assigned: 3,
                expected: 4
            }
        );
    }

    #[test]
    fn degenerate_planes_are_refused() {
        let flat = CuttingPlane::from_arrays([[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let mut assignment = CuttingPlaneAssignment::new();
        assignment.push_domain(vec![femur_plane()]);
        assignment.push_domain(vec![flat]);
        let err = ParameterSetBuilder::new(ParameterDefaults::femur())
            .build(RunMode::SingleScale, 2, &assignment)
            .unwrap_err();
        assert!(matches!(err, ParameterError::DegeneratePlane { domain: 1, .. }));
    }

    #[test]
    fn fixed_domains_add_model_fields() {
        let params = ParameterSetBuilder::new(ParameterDefaults::ellipsoid_fixed_domains())
            .fixed_domains(FixedDomains {
                count: 10,
                model_dir: PathBuf::from("model"),
                mean_shape_path: PathBuf::from("model/meanshape_local.particles"),
            })
            .build(RunMode::SingleScale, 12, &CuttingPlaneAssignment::new())
            .unwrap();
        assert_eq!(params.get_int("number_fixed_domains"), Some(10));
        assert_eq!(
            params.get("mean_shape_path"),
            Some(&ParamValue::Text("model/meanshape_local.particles".to_owned()))
        );
        assert!(!params.contains("adaptivity_mode"));
    }

    #[test]
    fn fixed_domains_keep_the_model_particle_count() {
        let builder = ParameterSetBuilder::new(ParameterDefaults::ellipsoid_fixed_domains()).fixed_domains(
            FixedDomains {
                count: 3,
                model_dir: PathBuf::from("model"),
                mean_shape_path: PathBuf::from("model/meanshape_local.particles"),
            },
        );

        let tiny = builder
            .build(RunMode::TinyTest, 5, &CuttingPlaneAssignment::new())
            .unwrap();
        assert_eq!(tiny.number_of_particles(), Some(128));
        assert_eq!(tiny.optimization_iterations(), Some(25));
        assert_eq!(tiny.iterations_per_split(), Some(25));

        let multi = builder
            .build(RunMode::MultiScale, 5, &CuttingPlaneAssignment::new())
            .unwrap();
        assert_eq!(multi.number_of_particles(), Some(128));
        assert!(!multi.contains("use_shape_statistics_after"));
    }

    #[test]
    fn values_render_for_the_optimizer() {
        assert_eq!(ParamValue::Bool(true).to_string(), "1");
        assert_eq!(ParamValue::Float(0.1).to_string(), "0.1");
        assert_eq!(ParamValue::IntList(vec![1, 2]).to_string(), "1 2");
        assert_eq!(
            ParamValue::Planes(vec![femur_plane()]).to_string(),
            "-1 -1 -40.5\n1 -1 -40.5\n-1 1 -40.5"
        );
    }
}
