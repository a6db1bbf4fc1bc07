use crate::mapping::scalar::{MappingScalar, Vec3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Coordinate system of a subdomain, determining the integration weight factor `coord`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// `coord = 1`.
    #[default]
    Cartesian,
    /// Axisymmetric about the axis orthogonal to `radial_axis`: `coord = 2 pi r`.
    Rz { radial_axis: usize },
    /// Spherically symmetric with radius along the first axis: `coord = 4 pi r^2`.
    RSpherical,
}

impl CoordinateSystem {
    /// The weight factor at the physical point `x`.
    #[replace_float_literals(S::from(literal))]
    pub fn factor<S: MappingScalar>(&self, x: &Vec3<S>) -> S {
        match self {
            Self::Cartesian => 1.0,
            Self::Rz { radial_axis } => 2.0 * PI * x[*radial_axis].clone(),
            Self::RSpherical => 4.0 * PI * x[0].clone() * x[0].clone(),
        }
    }
}
