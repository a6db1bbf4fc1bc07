//! Monomial bases of total degree at most two, in reference coordinates.
//!
//! Functions are ordered by degree, and within a degree as x^2, xy, y^2, xz, yz, z^2.

use crate::element::ElemType;
use crate::error::AssemblyError;
use crate::fe::FeType;
use nalgebra::{Matrix3, Point3, Vector3};

const MAX_ORDER: u8 = 2;

/// Exponent triples in basis order, for dimension 3 and order 2.
const EXPONENTS: [[i32; 3]; 10] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [2, 0, 0],
    [1, 1, 0],
    [0, 2, 0],
    [1, 0, 1],
    [0, 1, 1],
    [0, 0, 2],
];

fn exponents(dim: usize, order: u8) -> impl Iterator<Item = &'static [i32; 3]> {
    EXPONENTS.iter().filter(move |alpha| {
        let degree: i32 = alpha.iter().sum();
        degree <= order as i32 && alpha[dim..].iter().all(|&a| a == 0)
    })
}

pub(super) fn n_monomials(fe_type: FeType, elem_type: ElemType) -> Result<usize, AssemblyError> {
    if fe_type.order > MAX_ORDER {
        return Err(AssemblyError::UnsupportedFeType { fe_type, elem_type });
    }
    Ok(exponents(elem_type.dim(), fe_type.order).count())
}

/// Value, first and second derivative of x^a.
fn power(x: f64, a: i32) -> [f64; 3] {
    match a {
        0 => [1.0, 0.0, 0.0],
        1 => [x, 1.0, 0.0],
        _ => [x * x, 2.0 * x, 2.0],
    }
}

pub(super) fn evaluate(
    fe_type: FeType,
    elem_type: ElemType,
    xi: &Point3<f64>,
    values: &mut [f64],
    gradients: &mut [Vector3<f64>],
    mut hessians: Option<&mut [Matrix3<f64>]>,
) -> Result<(), AssemblyError> {
    n_monomials(fe_type, elem_type)?;
    for (i, alpha) in exponents(elem_type.dim(), fe_type.order).enumerate() {
        let p = [power(xi.x, alpha[0]), power(xi.y, alpha[1]), power(xi.z, alpha[2])];
        // Product of the factors, with the derivative orders given per direction
        let term = |orders: [usize; 3]| (0..3).map(|d| p[d][orders[d]]).product::<f64>();
        values[i] = term([0, 0, 0]);
        gradients[i] = Vector3::new(term([1, 0, 0]), term([0, 1, 0]), term([0, 0, 1]));
        if let Some(hessians) = hessians.as_deref_mut() {
            let (xy, xz, yz) = (term([1, 1, 0]), term([1, 0, 1]), term([0, 1, 1]));
            hessians[i] = Matrix3::new(term([2, 0, 0]), xy, xz, xy, term([0, 2, 0]), yz, xz, yz, term([0, 0, 2]));
        }
    }
    Ok(())
}
