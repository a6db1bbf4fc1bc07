use crate::element::Elem;
use crate::error::AssemblyError;
use crate::fe::{evaluate_reference, ReferenceShapeEval};
use nalgebra::{Matrix3, Point3, Vector3};

const MAX_ITERATIONS: usize = 30;
const TOLERANCE: f64 = 1e-12;

/// Physical coordinates and Jacobian (columns beyond the element dimension are zero) of the
/// element map at `xi`.
pub(crate) fn map_with_jacobian(
    elem: &Elem,
    xi: &Point3<f64>,
    scratch: &mut ReferenceShapeEval,
) -> Result<(Point3<f64>, Matrix3<f64>), AssemblyError> {
    let elem_type = elem.elem_type();
    evaluate_reference(elem_type.geometric_fe_type(), elem_type, xi, false, scratch)?;
    let mut x = Vector3::zeros();
    let mut jacobian = Matrix3::zeros();
    for (k, node) in elem.points().iter().enumerate() {
        x += node.coords * scratch.values[k];
        jacobian += node.coords * scratch.gradients[k].transpose();
    }
    Ok((Point3::from(x), jacobian))
}

/// Finds the reference coordinates of a physical point with Gauss-Newton iterations.
///
/// For elements of lower dimension than the embedding space the result is the reference point
/// whose image is closest to `target`.
pub fn inverse_map(
    elem: &Elem,
    target: &Point3<f64>,
    scratch: &mut ReferenceShapeEval,
) -> Result<Point3<f64>, AssemblyError> {
    let elem_type = elem.elem_type();
    let dim = elem_type.dim();
    let vertices = &elem_type.reference_nodes()[..elem_type.n_vertices()];
    let mut xi = vertices
        .iter()
        .fold(Vector3::zeros(), |acc, v| acc + Vector3::from(*v))
        / vertices.len() as f64;

    if dim == 0 {
        return Ok(Point3::from(xi));
    }

    for _ in 0..MAX_ITERATIONS {
        let (x, jacobian) = map_with_jacobian(elem, &Point3::from(xi), scratch)?;
        let residual = x.coords - target.coords;
        let mut normal_matrix = jacobian.transpose() * jacobian;
        for d in dim..3 {
            normal_matrix[(d, d)] = 1.0;
        }
        let inverse = normal_matrix
            .try_inverse()
            .ok_or(AssemblyError::InverseMapFailed { elem: elem.id() })?;
        let step = inverse * jacobian.transpose() * residual;
        xi -= step;
        if step.norm() <= TOLERANCE {
            return Ok(Point3::from(xi));
        }
    }

    Err(AssemblyError::InverseMapFailed { elem: elem.id() })
}
