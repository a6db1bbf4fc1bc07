//! Test helpers shared by the test suites of the workspace.

use nalgebra::{DMatrix, DVector, Point3, Vector3};

/// Asserts that two dense matrices (or vectors) agree entry-wise up to an absolute tolerance.
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let x = &$x;
        let y = &$y;
        assert_eq!(x.shape(), y.shape(), "matrix shapes differ");
        let max_absdiff = (x - y).abs().max();
        if max_absdiff > $tol {
            println!("abstol: {:e}", $tol);
            println!("left: {}", x);
            println!("right: {}", y);
            panic!("max absolute difference {:e} exceeds tolerance", max_absdiff);
        }
    }};
}

/// Asserts that two slices of scalars agree entry-wise up to an absolute tolerance.
#[macro_export]
macro_rules! assert_slices_approx_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let x: &[f64] = &$x;
        let y: &[f64] = &$y;
        assert_eq!(x.len(), y.len(), "slice lengths differ");
        for (i, (a, b)) in x.iter().zip(y.iter()).enumerate() {
            if (a - b).abs() > $tol {
                panic!("entry {i} differs: {a} vs {b} (abstol {:e})", $tol);
            }
        }
    }};
}

/// Converts a dense vector into a `Vec` so that bitwise comparisons can use `assert_eq!`.
pub fn to_bits(vector: &DVector<f64>) -> Vec<u64> {
    vector.iter().map(|v| v.to_bits()).collect()
}

/// Bitwise view of a dense matrix in column-major order.
pub fn matrix_to_bits(matrix: &DMatrix<f64>) -> Vec<u64> {
    matrix.iter().map(|v| v.to_bits()).collect()
}

/// Points of a unit right triangle, optionally shifted along the first axis.
pub fn unit_right_triangle(offset_x: f64) -> Vec<Point3<f64>> {
    vec![
        Point3::new(offset_x, 0.0, 0.0),
        Point3::new(offset_x + 1.0, 0.0, 0.0),
        Point3::new(offset_x, 1.0, 0.0),
    ]
}

/// Corner points of an axis-aligned rectangle in counter-clockwise order.
pub fn rectangle_corners(origin: [f64; 2], extents: [f64; 2]) -> Vec<Point3<f64>> {
    let [x0, y0] = origin;
    let [w, h] = extents;
    vec![
        Point3::new(x0, y0, 0.0),
        Point3::new(x0 + w, y0, 0.0),
        Point3::new(x0 + w, y0 + h, 0.0),
        Point3::new(x0, y0 + h, 0.0),
    ]
}

pub fn max_abs_component(v: &Vector3<f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}
