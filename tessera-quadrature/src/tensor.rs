//! Tensor-product Gauss rules for the reference quadrilateral and hexahedron.

use crate::univariate::gauss;
use crate::Rule;

/// Gauss rule on `[-1, 1]^2` with `n` points per direction.
///
/// Points are ordered with the first coordinate varying slowest.
pub fn quadrilateral_gauss(num_points_per_dim: usize) -> Rule<2> {
    let (w1d, p1d) = gauss(num_points_per_dim);
    let mut weights = Vec::with_capacity(w1d.len().pow(2));
    let mut points = Vec::with_capacity(w1d.len().pow(2));

    for (wx, [x]) in w1d.iter().zip(&p1d) {
        for (wy, [y]) in w1d.iter().zip(&p1d) {
            weights.push(wx * wy);
            points.push([*x, *y]);
        }
    }

    (weights, points)
}

/// Gauss rule on `[-1, 1]^3` with `n` points per direction.
pub fn hexahedron_gauss(num_points_per_dim: usize) -> Rule<3> {
    let (w2d, p2d) = quadrilateral_gauss(num_points_per_dim);
    let (w1d, p1d) = gauss(num_points_per_dim);
    let mut weights = Vec::with_capacity(w2d.len() * w1d.len());
    let mut points = Vec::with_capacity(w2d.len() * w1d.len());

    for (wxy, [x, y]) in w2d.iter().zip(&p2d) {
        for (wz, [z]) in w1d.iter().zip(&p1d) {
            weights.push(wxy * wz);
            points.push([*x, *y, *z]);
        }
    }

    (weights, points)
}
