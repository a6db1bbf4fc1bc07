//! Gauss-Legendre rules on the interval `[-1, 1]`.

use crate::Rule;
use std::f64::consts::PI;

const MAX_NEWTON_ITERATIONS: usize = 100;

/// Legendre polynomial `P_n` and its derivative evaluated with the three-term recurrence.
///
/// The derivative formula is singular at `|x| == 1`, so evaluation is restricted to the open
/// interval, which is where the roots live.
#[derive(Debug, Copy, Clone)]
struct Legendre {
    n: usize,
    x: f64,
    p_n: f64,
    p_n_minus_1: f64,
}

impl Legendre {
    fn at(n: usize, x: f64) -> Self {
        // k P_k(x) = (2k - 1) x P_{k-1}(x) - (k - 1) P_{k-2}(x)
        let mut current = 1.0;
        let mut previous = 0.0;
        for k in 1..=n {
            let k = k as f64;
            let next = ((2.0 * k - 1.0) * x * current - (k - 1.0) * previous) / k;
            previous = current;
            current = next;
        }
        Self {
            n,
            x,
            p_n: current,
            p_n_minus_1: previous,
        }
    }

    fn value(&self) -> f64 {
        self.p_n
    }

    fn derivative(&self) -> f64 {
        let n = self.n as f64;
        let x = self.x;
        n * (x * self.p_n - self.p_n_minus_1) / (x * x - 1.0)
    }
}

/// Gauss-Legendre quadrature with the given number of points on `[-1, 1]`.
///
/// A rule with `n` points integrates polynomials of degree `2n - 1` exactly. Points are returned
/// in ascending order.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(num_points: usize) -> Rule<1> {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    let half = (n + 1) / 2;
    let mut points = vec![[0.0]; n];
    let mut weights = vec![0.0; n];

    for i in 0..half {
        // Chebyshev-like initial guess, descending from the right end of the interval
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut poly = Legendre::at(n, x);
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let dx = -poly.value() / poly.derivative();
            x += dx;
            poly = Legendre::at(n, x);
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        let dp = poly.derivative();
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        // Root i counts from the right, its mirror image from the left
        points[n - 1 - i] = [x];
        weights[n - 1 - i] = w;
        points[i] = [-x];
        weights[i] = w;
    }

    if n % 2 == 1 {
        // The middle root is exactly zero for odd n
        points[n / 2] = [0.0];
    }

    (weights, points)
}

/// Gauss-Legendre quadrature with the given number of points, transformed to `[0, 1]`.
pub fn gauss_unit_interval(num_points: usize) -> Rule<1> {
    let (weights, points) = gauss(num_points);
    let weights = weights.into_iter().map(|w| 0.5 * w).collect();
    let points = points.into_iter().map(|[x]| [0.5 * (x + 1.0)]).collect();
    (weights, points)
}
