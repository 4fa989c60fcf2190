//! Minimal 3D value types used by cutting planes.

mod core;

pub use core::{Axis, Point3, Tolerance, Vec3};
