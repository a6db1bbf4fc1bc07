//! Collapsed Gauss rules for the unit triangle and the unit tetrahedron.
//!
//! The rules map the unit square (cube) onto the simplex with the Duffy transformation
//! and apply a tensor Gauss rule on the square. The Jacobian of the collapse raises the
//! polynomial degree of the integrand, which is accounted for in the point count.

use crate::univariate::gauss_unit_interval;
use crate::Rule;

/// A rule on the triangle `(0, 0), (1, 0), (0, 1)` exact for polynomials of total degree `order`.
pub fn triangle_collapsed_gauss(order: usize) -> Rule<2> {
    // The collapse contributes a factor (1 - u), so the u-direction sees degree order + 1
    let n = (order + 3) / 2;
    let (w1d, p1d) = gauss_unit_interval(n);
    let mut weights = Vec::with_capacity(n * n);
    let mut points = Vec::with_capacity(n * n);

    for (wu, [u]) in w1d.iter().zip(&p1d) {
        for (wv, [v]) in w1d.iter().zip(&p1d) {
            weights.push(wu * wv * (1.0 - u));
            points.push([*u, (1.0 - u) * v]);
        }
    }

    (weights, points)
}

/// A rule on the tetrahedron spanned by the origin and the unit vectors, exact for polynomials of
/// total degree `order`.
pub fn tetrahedron_collapsed_gauss(order: usize) -> Rule<3> {
    // Jacobian (1 - u)^2 (1 - v) adds two degrees in u
    let n = (order + 4) / 2;
    let (w1d, p1d) = gauss_unit_interval(n);
    let mut weights = Vec::with_capacity(n * n * n);
    let mut points = Vec::with_capacity(n * n * n);

    for (wu, [u]) in w1d.iter().zip(&p1d) {
        for (wv, [v]) in w1d.iter().zip(&p1d) {
            for (ww, [w]) in w1d.iter().zip(&p1d) {
                let jacobian = (1.0 - u) * (1.0 - u) * (1.0 - v);
                weights.push(wu * wv * ww * jacobian);
                points.push([*u, (1.0 - u) * v, (1.0 - u) * (1.0 - v) * w]);
            }
        }
    }

    (weights, points)
}
