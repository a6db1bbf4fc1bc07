//! Lagrange shape functions of the supported element types.

use crate::element::ElemType;
use nalgebra::{Matrix3, Point3, Vector3};

/// Value, first and second derivative of a one-dimensional basis function.
type Basis1d = [f64; 3];

fn linear_1d(x: f64) -> [Basis1d; 2] {
    [[0.5 * (1.0 - x), -0.5, 0.0], [0.5 * (1.0 + x), 0.5, 0.0]]
}

/// Quadratic basis on the nodes -1, 1, 0 (in that order).
fn quadratic_1d(x: f64) -> [Basis1d; 3] {
    [
        [0.5 * x * (x - 1.0), x - 0.5, 1.0],
        [0.5 * x * (x + 1.0), x + 0.5, 1.0],
        [1.0 - x * x, -2.0 * x, -2.0],
    ]
}

// Tensor indices of the nodes of the tensor-product elements
const QUAD4_INDICES: [[usize; 2]; 4] = [[0, 0], [1, 0], [1, 1], [0, 1]];
const QUAD9_INDICES: [[usize; 2]; 9] = [
    [0, 0],
    [1, 0],
    [1, 1],
    [0, 1],
    [2, 0],
    [1, 2],
    [2, 1],
    [0, 2],
    [2, 2],
];
const HEX8_INDICES: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

pub(super) fn evaluate(
    elem_type: ElemType,
    xi: &Point3<f64>,
    values: &mut [f64],
    gradients: &mut [Vector3<f64>],
    hessians: Option<&mut [Matrix3<f64>]>,
) {
    let mut local_hessians = [Matrix3::zeros(); 9];
    let n = values.len();
    match elem_type {
        ElemType::Point1 => {
            values[0] = 1.0;
            gradients[0] = Vector3::zeros();
        }
        ElemType::Edge2 => {
            for (i, [v, d, dd]) in linear_1d(xi.x).into_iter().enumerate() {
                values[i] = v;
                gradients[i] = Vector3::new(d, 0.0, 0.0);
                local_hessians[i][(0, 0)] = dd;
            }
        }
        ElemType::Edge3 => {
            for (i, [v, d, dd]) in quadratic_1d(xi.x).into_iter().enumerate() {
                values[i] = v;
                gradients[i] = Vector3::new(d, 0.0, 0.0);
                local_hessians[i][(0, 0)] = dd;
            }
        }
        ElemType::Quad4 => {
            let (a, b) = (linear_1d(xi.x), linear_1d(xi.y));
            tensor_2d(&a, &b, &QUAD4_INDICES, values, gradients, &mut local_hessians);
        }
        ElemType::Quad9 => {
            let (a, b) = (quadratic_1d(xi.x), quadratic_1d(xi.y));
            tensor_2d(&a, &b, &QUAD9_INDICES, values, gradients, &mut local_hessians);
        }
        ElemType::Hex8 => {
            let (a, b, c) = (linear_1d(xi.x), linear_1d(xi.y), linear_1d(xi.z));
            for (i, &[p, q, r]) in HEX8_INDICES.iter().enumerate() {
                let ([av, ad, _], [bv, bd, _], [cv, cd, _]) = (a[p], b[q], c[r]);
                values[i] = av * bv * cv;
                gradients[i] = Vector3::new(ad * bv * cv, av * bd * cv, av * bv * cd);
                // Trilinear functions have vanishing pure second derivatives
                local_hessians[i] = Matrix3::new(
                    0.0,
                    ad * bd * cv,
                    ad * bv * cd,
                    ad * bd * cv,
                    0.0,
                    av * bd * cd,
                    ad * bv * cd,
                    av * bd * cd,
                    0.0,
                );
            }
        }
        ElemType::Tri3 => {
            let lambda = barycentric_2d(xi);
            for i in 0..3 {
                values[i] = lambda[i].0;
                gradients[i] = lambda[i].1;
            }
        }
        ElemType::Tri6 => {
            let lambda = barycentric_2d(xi);
            for i in 0..3 {
                let (l, dl) = lambda[i];
                values[i] = l * (2.0 * l - 1.0);
                gradients[i] = dl * (4.0 * l - 1.0);
                local_hessians[i] = dl * dl.transpose() * 4.0;
            }
            for (k, (i, j)) in [(0, 1), (1, 2), (2, 0)].into_iter().enumerate() {
                let ((li, dli), (lj, dlj)) = (lambda[i], lambda[j]);
                values[3 + k] = 4.0 * li * lj;
                gradients[3 + k] = (dli * lj + dlj * li) * 4.0;
                local_hessians[3 + k] = (dli * dlj.transpose() + dlj * dli.transpose()) * 4.0;
            }
        }
        ElemType::Tet4 => {
            values[0] = 1.0 - xi.x - xi.y - xi.z;
            gradients[0] = Vector3::new(-1.0, -1.0, -1.0);
            for d in 0..3 {
                values[d + 1] = xi[d];
                gradients[d + 1] = Vector3::ith(d, 1.0);
            }
        }
    }

    if let Some(hessians) = hessians {
        hessians[..n].copy_from_slice(&local_hessians[..n]);
    }
}

fn tensor_2d<const M: usize>(
    a: &[Basis1d; M],
    b: &[Basis1d; M],
    indices: &[[usize; 2]],
    values: &mut [f64],
    gradients: &mut [Vector3<f64>],
    hessians: &mut [Matrix3<f64>],
) {
    for (i, &[p, q]) in indices.iter().enumerate() {
        let ([av, ad, add], [bv, bd, bdd]) = (a[p], b[q]);
        values[i] = av * bv;
        gradients[i] = Vector3::new(ad * bv, av * bd, 0.0);
        hessians[i] = Matrix3::new(add * bv, ad * bd, 0.0, ad * bd, av * bdd, 0.0, 0.0, 0.0, 0.0);
    }
}

/// Barycentric coordinates of the unit triangle and their (constant) gradients.
fn barycentric_2d(xi: &Point3<f64>) -> [(f64, Vector3<f64>); 3] {
    [
        (1.0 - xi.x - xi.y, Vector3::new(-1.0, -1.0, 0.0)),
        (xi.x, Vector3::new(1.0, 0.0, 0.0)),
        (xi.y, Vector3::new(0.0, 1.0, 0.0)),
    ]
}
