//! Cutting planes and their assignment to shape domains.

use std::fmt;

use thiserror::Error;

use crate::geom::{Axis, Point3, Tolerance, Vec3};

pub mod selector;
pub mod store;

/// Fouten rond cutting-plane definities.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaneError {
    #[error("cutting plane expects exactly 3 points, got {0}")]
    PointCount(usize),
    #[error("cutting plane contains a non-finite coordinate")]
    NonFinite,
    #[error("cutting plane {0} is degenerate (coincident or collinear points)")]
    Degenerate(CuttingPlane),
}

/// A plane defined by an ordered triplet of points.
///
/// The winding of the triplet determines the side that is kept, so the
/// orientation of the implied normal is significant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CuttingPlane {
    points: [Point3; 3],
}

impl CuttingPlane {
    #[must_use]
    pub const fn new(points: [Point3; 3]) -> Self {
        Self { points }
    }

    #[must_use]
    pub const fn from_arrays(points: [[f64; 3]; 3]) -> Self {
        Self::new([
            Point3::from_array(points[0]),
            Point3::from_array(points[1]),
            Point3::from_array(points[2]),
        ])
    }

    /// Builds a plane from a slice that must hold exactly three points.
    pub fn from_slice(points: &[Point3]) -> Result<Self, PlaneError> {
        match points {
            [a, b, c] => Ok(Self::new([*a, *b, *c])),
            other => Err(PlaneError::PointCount(other.len())),
        }
    }

    #[must_use]
    pub const fn points(&self) -> &[Point3; 3] {
        &self.points
    }

    /// Unnormalised normal `(p1 - p0) x (p2 - p0)`.
    #[must_use]
    pub fn normal(&self) -> Vec3 {
        let [p0, p1, p2] = self.points;
        (p1 - p0).cross(p2 - p0)
    }

    #[must_use]
    pub fn is_degenerate(&self, tol: Tolerance) -> bool {
        tol.is_zero_vec3(self.normal())
    }

    /// Rejects planes with non-finite coordinates or no defined normal.
    pub fn validate(&self, tol: Tolerance) -> Result<(), PlaneError> {
        if !self.points.iter().all(|p| p.is_finite()) {
            return Err(PlaneError::NonFinite);
        }
        if self.is_degenerate(tol) {
            return Err(PlaneError::Degenerate(*self));
        }
        Ok(())
    }

    /// Flips the plane when all three points lie on the negative side of `axis`.
    ///
    /// Only the coordinate along `axis` is negated. The result never has all
    /// three coordinates negative, so applying this twice is the same as once.
    #[must_use]
    pub fn normalize_orientation(self, axis: Axis) -> Self {
        if self.points.iter().all(|p| p.coordinate(axis) < 0.0) {
            Self::new(self.points.map(|p| p.with_axis_negated(axis)))
        } else {
            self
        }
    }

    /// Coordinates in optimizer order: nine numbers, point by point.
    #[must_use]
    pub fn flatten(&self) -> [f64; 9] {
        let [a, b, c] = self.points;
        [a.x, a.y, a.z, b.x, b.y, b.z, c.x, c.y, c.z]
    }
}

impl fmt::Display for CuttingPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.points;
        write!(f, "[{a}, {b}, {c}]")
    }
}

/// Cutting planes per shape domain, with the parallel count record the
/// optimizer expects.
///
/// Both sequences are only ever extended together, so
/// `planes(d).len() == counts()[d]` holds for every domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CuttingPlaneAssignment {
    planes: Vec<Vec<CuttingPlane>>,
    counts: Vec<usize>,
}

impl CuttingPlaneAssignment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the same plane list to each of `domain_count` domains.
    #[must_use]
    pub fn uniform(domain_count: usize, planes: &[CuttingPlane]) -> Self {
        let mut assignment = Self::new();
        for _ in 0..domain_count {
            assignment.push_domain(planes.to_vec());
        }
        assignment
    }

    pub fn push_domain(&mut self, planes: Vec<CuttingPlane>) {
        self.counts.push(planes.len());
        self.planes.push(planes);
    }

    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.planes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    #[must_use]
    pub fn planes(&self, domain: usize) -> Option<&[CuttingPlane]> {
        self.planes.get(domain).map(Vec::as_slice)
    }

    #[must_use]
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// All planes in domain order, as the optimizer reads them.
    pub fn iter_flat(&self) -> impl Iterator<Item = &CuttingPlane> {
        self.planes.iter().flatten()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.planes.len() == self.counts.len()
            && self
                .planes
                .iter()
                .zip(&self.counts)
                .all(|(planes, count)| planes.len() == *count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(points: [[f64; 3]; 3]) -> CuttingPlane {
        CuttingPlane::from_arrays(points)
    }

    #[test]
    fn normalization_flips_all_negative_axis() {
        let p = plane([[-1.0, -1.0, -40.5], [1.0, -2.0, -40.5], [-1.0, -3.0, -40.5]]);
        let n = p.normalize_orientation(Axis::Y);
        let ys: Vec<f64> = n.points().iter().map(|p| p.y).collect();
        assert_eq!(ys, vec![1.0, 2.0, 3.0]);
        // x en z blijven onaangeroerd
        assert_eq!(n.points()[1].x, 1.0);
        assert_eq!(n.points()[2].z, -40.5);
        assert_eq!(n.normalize_orientation(Axis::Y), n);
    }

    #[test]
    fn normalization_ignores_mixed_signs() {
        let p = plane([[-1.0, -1.0, -40.5], [1.0, -1.0, -40.5], [-1.0, 1.0, -40.5]]);
        assert_eq!(p.normalize_orientation(Axis::Y), p);
    }

    #[test]
    fn normalization_with_zero_coordinate_is_noop() {
        let p = plane([[0.0, 0.0, 1.0], [1.0, -1.0, 0.0], [0.0, -1.0, 1.0]]);
        assert_eq!(p.normalize_orientation(Axis::Y), p);
    }

    #[test]
    fn degenerate_planes_are_rejected() {
        let collinear = plane([[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]);
        assert!(collinear.is_degenerate(Tolerance::default_geom()));
        assert!(matches!(
            collinear.validate(Tolerance::default_geom()),
            Err(PlaneError::Degenerate(_))
        ));

        let coincident = plane([[1.0, 2.0, 3.0], [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]);
        assert!(coincident.validate(Tolerance::default_geom()).is_err());

        let good = plane([[10.0, 10.0, 0.0], [-10.0, -10.0, 0.0], [10.0, -10.0, 0.0]]);
        assert!(good.validate(Tolerance::default_geom()).is_ok());
        assert_eq!(good.normal(), Vec3::new(0.0, 0.0, 400.0));
    }

    #[test]
    fn non_finite_planes_are_rejected() {
        let p = plane([[f64::NAN, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert_eq!(p.validate(Tolerance::default_geom()), Err(PlaneError::NonFinite));
    }

    #[test]
    fn from_slice_requires_three_points() {
        let points = [Point3::ORIGIN; 2];
        assert_eq!(CuttingPlane::from_slice(&points), Err(PlaneError::PointCount(2)));
    }

    #[test]
    fn uniform_assignment_keeps_counts_in_lockstep() {
        let a = plane([[10.0, 10.0, 0.0], [-10.0, -10.0, 0.0], [10.0, -10.0, 0.0]]);
        let b = plane([[10.0, -3.0, 10.0], [-10.0, -3.0, 10.0], [10.0, -3.0, -10.0]]);
        let assignment = CuttingPlaneAssignment::uniform(4, &[a, b]);

        assert_eq!(assignment.domain_count(), 4);
        assert_eq!(assignment.counts(), &[2, 2, 2, 2]);
        assert!(assignment.is_consistent());
        assert_eq!(assignment.iter_flat().count(), 8);
        assert_eq!(assignment.planes(3), Some(&[a, b][..]));
        assert_eq!(assignment.planes(4), None);
    }

    #[test]
    fn flatten_is_point_major() {
        let p = plane([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        assert_eq!(p.flatten(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }
}
