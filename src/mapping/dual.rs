//! Forward-mode dual numbers with sparse derivative storage.

use num::{One, Zero};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A value together with its partial derivatives with respect to a sparse set of degrees of
/// freedom.
///
/// Derivatives are stored as `(dof, partial)` pairs sorted by dof without duplicates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DualReal {
    value: f64,
    derivatives: Vec<(usize, f64)>,
}

impl DualReal {
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            derivatives: Vec::new(),
        }
    }

    /// An independent variable: unit derivative with respect to `dof`.
    pub fn variable(value: f64, dof: usize) -> Self {
        Self {
            value,
            derivatives: vec![(dof, 1.0)],
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn derivatives(&self) -> &[(usize, f64)] {
        &self.derivatives
    }

    /// Partial derivative with respect to `dof` (zero if not tracked).
    pub fn derivative(&self, dof: usize) -> f64 {
        self.derivatives
            .binary_search_by_key(&dof, |&(d, _)| d)
            .map_or(0.0, |i| self.derivatives[i].1)
    }

    pub fn sqrt(&self) -> Self {
        let value = self.value.sqrt();
        // The derivative of the square root is unbounded at zero; zero-length mappings are
        // rejected or skipped upstream, so we only avoid producing NaNs here.
        let scale = if value > 0.0 { 0.5 / value } else { 0.0 };
        Self {
            value,
            derivatives: scaled(&self.derivatives, scale),
        }
    }

    pub fn abs(&self) -> Self {
        if self.value < 0.0 {
            -self.clone()
        } else {
            self.clone()
        }
    }
}

fn scaled(derivatives: &[(usize, f64)], scale: f64) -> Vec<(usize, f64)> {
    derivatives.iter().map(|&(dof, d)| (dof, scale * d)).collect()
}

/// Computes `sa * a + sb * b` for sorted sparse derivative lists.
fn combine(a: &[(usize, f64)], sa: f64, b: &[(usize, f64)], sb: f64) -> Vec<(usize, f64)> {
    let mut result = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let ((da, va), (db, vb)) = (a[i], b[j]);
        if da == db {
            result.push((da, sa * va + sb * vb));
            i += 1;
            j += 1;
        } else if da < db {
            result.push((da, sa * va));
            i += 1;
        } else {
            result.push((db, sb * vb));
            j += 1;
        }
    }
    result.extend(a[i..].iter().map(|&(d, v)| (d, sa * v)));
    result.extend(b[j..].iter().map(|&(d, v)| (d, sb * v)));
    result
}

impl From<f64> for DualReal {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl Zero for DualReal {
    fn zero() -> Self {
        Self::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.derivatives.iter().all(|&(_, d)| d == 0.0)
    }
}

impl One for DualReal {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Neg for DualReal {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            value: -self.value,
            derivatives: scaled(&self.derivatives, -1.0),
        }
    }
}

impl Add for DualReal {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
            derivatives: combine(&self.derivatives, 1.0, &rhs.derivatives, 1.0),
        }
    }
}

impl Sub for DualReal {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
            derivatives: combine(&self.derivatives, 1.0, &rhs.derivatives, -1.0),
        }
    }
}

impl Mul for DualReal {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self {
            value: self.value * rhs.value,
            derivatives: combine(&self.derivatives, rhs.value, &rhs.derivatives, self.value),
        }
    }
}

impl Div for DualReal {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let inv = 1.0 / rhs.value;
        Self {
            value: self.value / rhs.value,
            derivatives: combine(
                &self.derivatives,
                inv,
                &rhs.derivatives,
                -self.value * inv * inv,
            ),
        }
    }
}

impl Mul<f64> for DualReal {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self {
            value: self.value * rhs,
            derivatives: scaled(&self.derivatives, rhs),
        }
    }
}
