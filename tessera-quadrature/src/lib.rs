//! Quadrature rules for finite element reference domains.
//!
//! Reference domains follow the usual Lagrange element conventions:
//!
//! - lines, quadrilaterals and hexahedra live on `[-1, 1]^d`,
//! - triangles and tetrahedra are the unit simplices spanned by the origin and the unit vectors.
//!
//! Every rule is a pair `(weights, points)`. The [`rule_for_shape`] entry point returns rules with
//! points padded to three components, which is the representation used by the assembly core.

use std::fmt;
use std::fmt::{Display, Formatter};

pub mod simplex;
pub mod tensor;
pub mod univariate;

/// The largest polynomial order for which rules are generated on request.
pub const MAX_ORDER: usize = 60;

/// Library-wide error type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates that a rule satisfying the given requirements is not available.
    NoRuleAvailable { shape: ReferenceShape, order: usize },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRuleAvailable { shape, order } => {
                write!(
                    f,
                    "no quadrature rule of order {order} is available for the reference {shape:?}"
                )
            }
        }
    }
}

impl std::error::Error for Error {}

/// A D-dimensional point.
pub type Point<const D: usize> = [f64; D];

/// A D-dimensional rule.
pub type Rule<const D: usize> = (Vec<f64>, Vec<Point<D>>);

/// The reference domains for which rules are available.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceShape {
    Point,
    Line,
    Triangle,
    Quadrilateral,
    Tetrahedron,
    Hexahedron,
}

impl ReferenceShape {
    pub fn dim(&self) -> usize {
        match self {
            Self::Point => 0,
            Self::Line => 1,
            Self::Triangle | Self::Quadrilateral => 2,
            Self::Tetrahedron | Self::Hexahedron => 3,
        }
    }

    /// The measure (length, area or volume) of the reference domain.
    pub fn measure(&self) -> f64 {
        match self {
            Self::Point => 1.0,
            Self::Line => 2.0,
            Self::Triangle => 0.5,
            Self::Quadrilateral => 4.0,
            Self::Tetrahedron => 1.0 / 6.0,
            Self::Hexahedron => 8.0,
        }
    }
}

/// Number of Gauss points per direction needed to integrate polynomials of the given order.
pub fn gauss_points_for_order(order: usize) -> usize {
    order / 2 + 1
}

/// Returns a Gauss-type rule exact for polynomials up to the given order on the reference shape.
///
/// Points are padded with zeros to three components.
pub fn rule_for_shape(shape: ReferenceShape, order: usize) -> Result<Rule<3>, Error> {
    if order > MAX_ORDER {
        return Err(Error::NoRuleAvailable { shape, order });
    }

    let (weights, points) = match shape {
        ReferenceShape::Point => (vec![1.0], vec![[0.0; 3]]),
        ReferenceShape::Line => {
            let (w, p) = univariate::gauss(gauss_points_for_order(order));
            (w, p.into_iter().map(|[x]| [x, 0.0, 0.0]).collect())
        }
        ReferenceShape::Quadrilateral => {
            let (w, p) = tensor::quadrilateral_gauss(gauss_points_for_order(order));
            (w, p.into_iter().map(|[x, y]| [x, y, 0.0]).collect())
        }
        ReferenceShape::Hexahedron => tensor::hexahedron_gauss(gauss_points_for_order(order)),
        ReferenceShape::Triangle => {
            let (w, p) = simplex::triangle_collapsed_gauss(order);
            (w, p.into_iter().map(|[x, y]| [x, y, 0.0]).collect())
        }
        ReferenceShape::Tetrahedron => simplex::tetrahedron_collapsed_gauss(order),
    };
    Ok((weights, points))
}

/// Approximates the integral of `f` with the given rule.
pub fn integrate<const D: usize>(rule: &Rule<D>, f: impl Fn(&Point<D>) -> f64) -> f64 {
    let (weights, points) = rule;
    weights
        .iter()
        .zip(points)
        .map(|(w, x)| w * f(x))
        .sum()
}
