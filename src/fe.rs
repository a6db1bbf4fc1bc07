//! Finite element types and evaluation of their reference shape functions.

use crate::element::ElemType;
use crate::error::AssemblyError;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

mod lagrange;
mod monomial;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeFamily {
    /// Continuous nodal Lagrange interpolation.
    Lagrange,
    /// Lagrange shape functions with element-local (discontinuous) degrees of freedom.
    L2Lagrange,
    /// Total-degree monomials in reference coordinates, element-local.
    Monomial,
    /// Global scalar unknowns without spatial shape functions.
    Scalar,
}

/// An interpolation family together with a polynomial order.
///
/// Shape data is keyed by this type rather than by variable, so variables sharing a type share
/// their tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeType {
    pub family: FeFamily,
    pub order: u8,
}

impl FeType {
    pub const fn new(family: FeFamily, order: u8) -> Self {
        Self { family, order }
    }

    pub const fn lagrange(order: u8) -> Self {
        Self::new(FeFamily::Lagrange, order)
    }

    pub const fn l2_lagrange(order: u8) -> Self {
        Self::new(FeFamily::L2Lagrange, order)
    }

    pub const fn monomial(order: u8) -> Self {
        Self::new(FeFamily::Monomial, order)
    }

    /// A scalar variable with `order` global unknowns.
    pub const fn scalar(order: u8) -> Self {
        Self::new(FeFamily::Scalar, order)
    }

    /// Whether the type has spatial shape functions that are evaluated at quadrature points.
    pub fn has_shape_functions(&self) -> bool {
        self.family != FeFamily::Scalar
    }

    /// Whether the degrees of freedom are attached to mesh nodes.
    pub fn is_nodal(&self) -> bool {
        self.family == FeFamily::Lagrange
    }
}

impl fmt::Display for FeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.family, self.order)
    }
}

/// Reference-space shape data of all shape functions of one FE type at a single point.
#[derive(Debug, Clone, Default)]
pub struct ReferenceShapeEval {
    pub values: Vec<f64>,
    pub gradients: Vec<Vector3<f64>>,
    /// Empty unless second derivatives were requested.
    pub hessians: Vec<Matrix3<f64>>,
}

impl ReferenceShapeEval {
    fn resize(&mut self, n: usize, with_hessians: bool) {
        self.values.resize(n, 0.0);
        self.gradients.resize(n, Vector3::zeros());
        self.hessians.resize(if with_hessians { n } else { 0 }, Matrix3::zeros());
    }
}

/// The element type whose Lagrange shape functions realize `fe_type` on `elem_type`.
fn lagrange_basis_type(fe_type: FeType, elem_type: ElemType) -> Result<ElemType, AssemblyError> {
    let unsupported = || AssemblyError::UnsupportedFeType { fe_type, elem_type };
    if elem_type == ElemType::Point1 {
        return Ok(ElemType::Point1);
    }
    match (fe_type.family, fe_type.order) {
        (_, 1) => Ok(elem_type.linear_type()),
        // Nodal second-order interpolation needs the mid-side nodes
        (FeFamily::Lagrange, 2) if elem_type.geometric_order() == 2 => Ok(elem_type),
        (FeFamily::L2Lagrange, 2) => elem_type.quadratic_type().ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

/// Number of local shape functions (local degrees of freedom) of the FE type on the element type.
pub fn n_shape_functions(fe_type: FeType, elem_type: ElemType) -> Result<usize, AssemblyError> {
    match fe_type.family {
        FeFamily::Lagrange | FeFamily::L2Lagrange => Ok(lagrange_basis_type(fe_type, elem_type)?.n_nodes()),
        FeFamily::Monomial => monomial::n_monomials(fe_type, elem_type),
        FeFamily::Scalar => Ok(fe_type.order as usize),
    }
}

/// Evaluates all reference shape functions of `fe_type` at the reference point `xi`.
///
/// Gradients and Hessians are taken with respect to the reference coordinates. Components beyond
/// the element dimension are zero.
pub fn evaluate_reference(
    fe_type: FeType,
    elem_type: ElemType,
    xi: &Point3<f64>,
    with_hessians: bool,
    out: &mut ReferenceShapeEval,
) -> Result<(), AssemblyError> {
    let n = n_shape_functions(fe_type, elem_type)?;
    out.resize(n, with_hessians);
    let hessians = with_hessians.then_some(out.hessians.as_mut_slice());
    match fe_type.family {
        FeFamily::Lagrange | FeFamily::L2Lagrange => {
            let basis_type = lagrange_basis_type(fe_type, elem_type)?;
            lagrange::evaluate(basis_type, xi, &mut out.values, &mut out.gradients, hessians);
        }
        FeFamily::Monomial => {
            monomial::evaluate(fe_type, elem_type, xi, &mut out.values, &mut out.gradients, hessians)?;
        }
        FeFamily::Scalar => {
            return Err(AssemblyError::UnsupportedShapeQuantity {
                fe_type,
                quantity: "spatial evaluation",
                dim: elem_type.dim(),
            })
        }
    }
    Ok(())
}
