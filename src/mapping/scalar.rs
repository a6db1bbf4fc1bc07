//! Geometry kernels shared by the plain and the AD mapping.
//!
//! Every function here is generic over [`MappingScalar`] and is instantiated with `f64` for the
//! plain path and [`DualReal`] for the AD path. Both instantiations execute the same sequence of
//! floating point operations on the values, so the value of every AD quantity equals the plain
//! quantity exactly.

use crate::mapping::dual::DualReal;
use num::{One, Zero};
use numeric_literals::replace_float_literals;
use std::ops::{Add, Div, Mul, Neg, Sub};

pub trait MappingScalar:
    Clone
    + Zero
    + One
    + From<f64>
    + Neg<Output = Self>
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Mul<f64, Output = Self>
{
    fn value(&self) -> f64;

    fn sqrt(&self) -> Self;
}

impl MappingScalar for f64 {
    fn value(&self) -> f64 {
        *self
    }

    fn sqrt(&self) -> Self {
        f64::sqrt(*self)
    }
}

impl MappingScalar for DualReal {
    fn value(&self) -> f64 {
        DualReal::value(self)
    }

    fn sqrt(&self) -> Self {
        DualReal::sqrt(self)
    }
}

pub type Vec3<S> = [S; 3];

pub fn dot<S: MappingScalar>(a: &Vec3<S>, b: &Vec3<S>) -> S {
    a[0].clone() * b[0].clone() + a[1].clone() * b[1].clone() + a[2].clone() * b[2].clone()
}

pub fn cross<S: MappingScalar>(a: &Vec3<S>, b: &Vec3<S>) -> Vec3<S> {
    [
        a[1].clone() * b[2].clone() - a[2].clone() * b[1].clone(),
        a[2].clone() * b[0].clone() - a[0].clone() * b[2].clone(),
        a[0].clone() * b[1].clone() - a[1].clone() * b[0].clone(),
    ]
}

pub fn scale<S: MappingScalar>(a: &Vec3<S>, s: &S) -> Vec3<S> {
    [a[0].clone() * s.clone(), a[1].clone() * s.clone(), a[2].clone() * s.clone()]
}

#[replace_float_literals(S::from(literal))]
pub fn normalized<S: MappingScalar>(a: &Vec3<S>) -> Vec3<S> {
    let inv_norm = 1.0 / dot(a, a).sqrt();
    scale(a, &inv_norm)
}

/// Computes `sum_k c_k x_k` over the nodes, with coefficients given by `coefficient(k)`.
pub fn combine_nodes<S: MappingScalar>(nodes: &[Vec3<S>], coefficient: impl Fn(usize) -> f64) -> Vec3<S> {
    let mut result = [S::zero(), S::zero(), S::zero()];
    for (k, node) in nodes.iter().enumerate() {
        let c = coefficient(k);
        for d in 0..3 {
            result[d] = result[d].clone() + node[d].clone() * c;
        }
    }
    result
}

/// Measure of the mapping with the given Jacobian columns (tangent vectors).
///
/// With `signed`, the columns must span the full embedding space of the mesh (element dimension
/// equals mesh dimension) and the signed determinant of the leading block is returned. Otherwise the
/// area element `sqrt(det(J^T J))` of a manifold mapping is returned.
#[replace_float_literals(S::from(literal))]
pub fn jacobian_measure<S: MappingScalar>(columns: &[Vec3<S>], signed: bool) -> S {
    match (columns, signed) {
        ([], _) => 1.0,
        ([c0], true) => c0[0].clone(),
        ([c0], false) => dot(c0, c0).sqrt(),
        ([c0, c1], true) => c0[0].clone() * c1[1].clone() - c1[0].clone() * c0[1].clone(),
        ([c0, c1], false) => {
            let n = cross(c0, c1);
            dot(&n, &n).sqrt()
        }
        ([c0, c1, c2, ..], _) => dot(c0, &cross(c1, c2)),
    }
}

/// Outward unit normal of a side.
///
/// For sides of one-dimensional elements the normal is the element tangent `parent_column`, with
/// `sign` selecting the end. For two- and three-dimensional elements the side parametrization
/// (`side_columns`) is ordered such that the right-hand rule yields the outward direction.
#[replace_float_literals(S::from(literal))]
pub fn outward_normal<S: MappingScalar>(side_columns: &[Vec3<S>], parent_column: &Vec3<S>, sign: f64) -> Vec3<S> {
    match side_columns {
        [] => scale(&normalized(parent_column), &S::from(sign)),
        [t] => normalized(&[t[1].clone(), -t[0].clone(), 0.0]),
        [s, t, ..] => normalized(&cross(s, t)),
    }
}
