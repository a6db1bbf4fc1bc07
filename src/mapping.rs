//! Reference-to-physical mapping of quadrature data.
//!
//! The [`GeometricMapper`] keeps one geometric context per [`FeContext`]. Reinitializing a context
//! replaces all of its data: physical quadrature points, `JxW`, the coordinate system factor
//! `coord` and the product `JxW * coord` (formed once here, integrands use it as is), normals,
//! tangents, curvatures, the context volume and the physical shape function tables of every
//! registered FE type.
//!
//! AD variants of `JxW`, quadrature points, normals and `coord` are computed only for contexts
//! where [`GeometricMapper::enable_ad`] was called. Plain and AD data come out of the same generic
//! geometry kernels (see [`scalar`]), so their values agree bit for bit.

use crate::element::{Elem, ElemType};
use crate::error::AssemblyError;
use crate::fe::FeType;
use crate::quadrature::{QuadratureCache, QuadratureContext, ReferenceShapeTable, ReferenceTableKey, RuleId};
use log::debug;
use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod coord;
pub mod dual;
mod inverse;
pub mod scalar;

pub use coord::CoordinateSystem;
pub use dual::DualReal;
pub use inverse::inverse_map;

use scalar::{combine_nodes, jacobian_measure, normalized, outward_normal, MappingScalar, Vec3};

/// The geometric contexts an assembly evaluates data in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeContext {
    /// Element interior.
    Volume,
    /// A side of the current element.
    Face,
    /// The neighbor element, evaluated at points on its side.
    Neighbor,
    /// A lower-dimensional (interface or trace) element.
    Lower,
    /// A mortar segment; mapping only, no shape functions.
    MortarSegment,
}

impl FeContext {
    pub const ALL: [FeContext; 5] = [
        FeContext::Volume,
        FeContext::Face,
        FeContext::Neighbor,
        FeContext::Lower,
        FeContext::MortarSegment,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn quadrature_context(self) -> QuadratureContext {
        match self {
            Self::Volume => QuadratureContext::Volume,
            Self::Face => QuadratureContext::Face,
            Self::Neighbor => QuadratureContext::Neighbor,
            Self::Lower => QuadratureContext::Lower,
            Self::MortarSegment => QuadratureContext::MortarSegment,
        }
    }

    fn is_side(self) -> bool {
        matches!(self, Self::Face | Self::Neighbor)
    }
}

impl fmt::Display for FeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Volume => "volume",
            Self::Face => "face",
            Self::Neighbor => "neighbor",
            Self::Lower => "lower-dimensional",
            Self::MortarSegment => "mortar segment",
        };
        f.write_str(name)
    }
}

/// Optional shape quantities an FE type must provide.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeNeeds {
    pub second_derivatives: bool,
    pub curl: bool,
}

impl ShapeNeeds {
    pub fn union(self, other: ShapeNeeds) -> ShapeNeeds {
        ShapeNeeds {
            second_derivatives: self.second_derivatives || other.second_derivatives,
            curl: self.curl || other.curl,
        }
    }
}

/// Where the points of a context come from.
#[derive(Debug, Copy, Clone)]
pub enum PointSource<'a> {
    /// The cached Gauss rule of the given order.
    Rule { order: usize },
    /// Caller-provided reference points, with unit weights unless given.
    Custom {
        points: &'a [Point3<f64>],
        weights: Option<&'a [f64]>,
    },
}

/// Physical shape function data `[local shape index][qp]` of one FE type in one context.
#[derive(Debug, Clone)]
pub struct ShapeFunctionTable {
    fe_type: FeType,
    n_functions: usize,
    n_points: usize,
    values: Vec<f64>,
    gradients: Vec<Vector3<f64>>,
    second: Vec<Matrix3<f64>>,
    curl: Vec<Vector3<f64>>,
    reference_build_id: u64,
    status: Result<(), AssemblyError>,
}

impl ShapeFunctionTable {
    fn new(fe_type: FeType) -> Self {
        Self {
            fe_type,
            n_functions: 0,
            n_points: 0,
            values: Vec::new(),
            gradients: Vec::new(),
            second: Vec::new(),
            curl: Vec::new(),
            reference_build_id: 0,
            status: Ok(()),
        }
    }

    fn fill(
        &mut self,
        reference: &ReferenceShapeTable,
        inverse_jacobians: &[Matrix3<f64>],
        geometric_hessians: &[[Matrix3<f64>; 3]],
        needs: ShapeNeeds,
    ) {
        let n = reference.n_functions();
        let n_qp = reference.n_points();
        self.n_functions = n;
        self.n_points = n_qp;
        self.reference_build_id = reference.build_id();
        self.status = Ok(());
        self.values.resize(n * n_qp, 0.0);
        self.gradients.resize(n * n_qp, Vector3::zeros());
        self.second
            .resize(if needs.second_derivatives { n * n_qp } else { 0 }, Matrix3::zeros());
        self.curl
            .resize(if needs.curl { n * n_qp } else { 0 }, Vector3::zeros());

        for i in 0..n {
            for qp in 0..n_qp {
                let idx = i * n_qp + qp;
                let k = &inverse_jacobians[qp];
                let gradient = k * reference.gradient(i, qp);
                self.values[idx] = reference.value(i, qp);
                self.gradients[idx] = gradient;
                if needs.second_derivatives {
                    let g = &geometric_hessians[qp];
                    let corrected =
                        reference.hessian(i, qp) - g[0] * gradient.x - g[1] * gradient.y - g[2] * gradient.z;
                    self.second[idx] = k * corrected * k.transpose();
                }
                if needs.curl {
                    self.curl[idx] = Vector3::new(gradient.y, -gradient.x, 0.0);
                }
            }
        }
    }

    fn mark_unsupported(&mut self, err: AssemblyError) {
        self.n_functions = 0;
        self.n_points = 0;
        self.status = Err(err);
    }

    pub fn fe_type(&self) -> FeType {
        self.fe_type
    }

    /// Number of local shape functions (rows).
    pub fn n_functions(&self) -> usize {
        self.n_functions
    }

    /// Number of quadrature points (columns).
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    pub fn phi(&self, i: usize, qp: usize) -> f64 {
        self.values[i * self.n_points + qp]
    }

    pub fn grad_phi(&self, i: usize, qp: usize) -> &Vector3<f64> {
        &self.gradients[i * self.n_points + qp]
    }

    /// Physical second derivatives, if they were requested for the FE type.
    pub fn second_phi(&self, i: usize, qp: usize) -> Option<&Matrix3<f64>> {
        self.second.get(i * self.n_points + qp)
    }

    /// Scalar curl `(d/dy, -d/dx)` in 2D, if it was requested for the FE type.
    pub fn curl_phi(&self, i: usize, qp: usize) -> Option<&Vector3<f64>> {
        self.curl.get(i * self.n_points + qp)
    }

    /// Build id of the reference table this table was computed from.
    pub fn reference_build_id(&self) -> u64 {
        self.reference_build_id
    }
}

/// AD shadow arrays of a context.
#[derive(Debug, Clone, Default)]
pub struct AdGeometry {
    pub qpoints: Vec<Vec3<DualReal>>,
    pub jxw: Vec<DualReal>,
    pub coord: Vec<DualReal>,
    pub normals: Vec<Vec3<DualReal>>,
}

impl AdGeometry {
    fn clear(&mut self) {
        self.qpoints.clear();
        self.jxw.clear();
        self.coord.clear();
        self.normals.clear();
    }
}

/// Derivative seeds of the node coordinates: for each node and component, the dof the coordinate
/// depends on.
pub type NodalSeeds = [[Option<usize>; 3]];

/// Geometry of one quadrature point, generic over plain and dual scalars.
struct QpGeometry<S> {
    x: Vec3<S>,
    columns: [Vec3<S>; 3],
    side_columns: [Vec3<S>; 2],
    measure: S,
    jxw: S,
    coord: S,
    normal: Option<Vec3<S>>,
}

fn zero3<S: MappingScalar>() -> Vec3<S> {
    [S::zero(), S::zero(), S::zero()]
}

fn columns<S: MappingScalar>(nodes: &[Vec3<S>], table: &ReferenceShapeTable, qp: usize, dim: usize) -> [Vec3<S>; 3] {
    std::array::from_fn(|d| {
        if d < dim {
            combine_nodes(nodes, |k| table.gradient(k, qp)[d])
        } else {
            zero3()
        }
    })
}

fn interior_qp<S: MappingScalar>(
    nodes: &[Vec3<S>],
    table: &ReferenceShapeTable,
    qp: usize,
    dim: usize,
    weight: f64,
    signed: bool,
    coord_sys: CoordinateSystem,
) -> QpGeometry<S> {
    let x = combine_nodes(nodes, |k| table.value(k, qp));
    let columns = columns(nodes, table, qp, dim);
    let measure = jacobian_measure(&columns[..dim], signed);
    let jxw = measure.clone() * weight;
    let coord = coord_sys.factor(&x);
    QpGeometry {
        x,
        columns,
        side_columns: [zero3(), zero3()],
        measure,
        jxw,
        coord,
        normal: None,
    }
}

#[allow(clippy::too_many_arguments)]
fn side_qp<S: MappingScalar>(
    side_nodes: &[Vec3<S>],
    side_table: &ReferenceShapeTable,
    parent_nodes: &[Vec3<S>],
    parent_table: &ReferenceShapeTable,
    qp: usize,
    parent_dim: usize,
    weight: f64,
    end_sign: f64,
    coord_sys: CoordinateSystem,
) -> QpGeometry<S> {
    let side_dim = parent_dim - 1;
    let x = combine_nodes(side_nodes, |k| side_table.value(k, qp));
    let columns = columns(parent_nodes, parent_table, qp, parent_dim);
    let side_columns: [Vec3<S>; 2] = std::array::from_fn(|d| {
        if d < side_dim {
            combine_nodes(side_nodes, |k| side_table.gradient(k, qp)[d])
        } else {
            zero3()
        }
    });
    let measure = jacobian_measure(&side_columns[..side_dim], false);
    let jxw = measure.clone() * weight;
    let coord = coord_sys.factor(&x);
    let normal = outward_normal(&side_columns[..side_dim], &columns[0], end_sign);
    QpGeometry {
        x,
        columns,
        side_columns,
        measure,
        jxw,
        coord,
        normal: Some(normal),
    }
}

fn to_matrix(columns: &[Vec3<f64>; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| columns[j][i])
}

/// `J (J^T J)^-1` for the Jacobian `J` with `dim` nonzero columns.
fn inverse_transpose_jacobian(jacobian: &Matrix3<f64>, dim: usize) -> Option<Matrix3<f64>> {
    let mut normal_matrix = jacobian.transpose() * jacobian;
    for d in dim..3 {
        normal_matrix[(d, d)] = 1.0;
    }
    normal_matrix.try_inverse().map(|inverse| jacobian * inverse)
}

#[derive(Debug, Default)]
struct ContextData {
    valid: bool,
    elem_id: Option<usize>,
    elem_type: Option<ElemType>,
    rule: Option<RuleId>,
    side: Option<usize>,
    ref_points: Vec<Point3<f64>>,
    parent_points: Vec<Point3<f64>>,
    weights: Vec<f64>,
    qpoints: Vec<Point3<f64>>,
    jxw: Vec<f64>,
    coord: Vec<f64>,
    jxw_coord: Vec<f64>,
    normals: Vec<Vector3<f64>>,
    tangents: Vec<[Vector3<f64>; 2]>,
    n_tangents: usize,
    curvatures: Vec<f64>,
    inverse_jacobians: Vec<Matrix3<f64>>,
    geometric_hessians: Vec<[Matrix3<f64>; 3]>,
    volume: f64,
    tables: Vec<ShapeFunctionTable>,
    ad_enabled: bool,
    ad: AdGeometry,
}

impl ContextData {
    fn begin(&mut self, elem: &Elem, side: Option<usize>) {
        self.valid = false;
        self.elem_id = Some(elem.id());
        self.elem_type = Some(elem.elem_type());
        self.side = side;
        self.qpoints.clear();
        self.jxw.clear();
        self.coord.clear();
        self.jxw_coord.clear();
        self.normals.clear();
        self.tangents.clear();
        self.n_tangents = 0;
        self.curvatures.clear();
        self.inverse_jacobians.clear();
        self.geometric_hessians.clear();
        self.volume = 0.0;
        self.ad.clear();
    }

    fn push_plain(&mut self, geometry: &QpGeometry<f64>) {
        self.qpoints.push(Point3::from(geometry.x));
        self.jxw.push(geometry.jxw);
        self.coord.push(geometry.coord);
        self.jxw_coord.push(geometry.jxw * geometry.coord);
        if let Some(normal) = geometry.normal {
            self.normals.push(Vector3::from(normal));
        }
    }

    fn push_ad(&mut self, geometry: QpGeometry<DualReal>) {
        self.ad.qpoints.push(geometry.x);
        self.ad.jxw.push(geometry.jxw);
        self.ad.coord.push(geometry.coord);
        if let Some(normal) = geometry.normal {
            self.ad.normals.push(normal);
        }
    }

    fn finish(&mut self) {
        self.volume = self.jxw_coord.iter().sum();
        self.valid = true;
    }
}

/// Maps reference quadrature data of the current element(s) to physical space.
#[derive(Debug)]
pub struct GeometricMapper {
    mesh_dim: usize,
    fe_types: Vec<FeType>,
    needs: Vec<ShapeNeeds>,
    contexts: [ContextData; 5],
    curvatures_enabled: bool,
    nodes: Vec<Vec3<f64>>,
    side_nodes: Vec<Vec3<f64>>,
}

impl GeometricMapper {
    pub fn new(mesh_dim: usize) -> Self {
        Self {
            mesh_dim,
            fe_types: Vec::new(),
            needs: Vec::new(),
            contexts: Default::default(),
            curvatures_enabled: false,
            nodes: Vec::new(),
            side_nodes: Vec::new(),
        }
    }

    pub fn mesh_dim(&self) -> usize {
        self.mesh_dim
    }

    /// Registers an FE type so that its shape tables are computed at every reinit.
    ///
    /// Registering an already registered type merges the requested quantities.
    pub fn register_fe_type(&mut self, fe_type: FeType, needs: ShapeNeeds) -> Result<usize, AssemblyError> {
        if needs.curl && self.mesh_dim != 2 {
            return Err(AssemblyError::UnsupportedShapeQuantity {
                fe_type,
                quantity: "curl",
                dim: self.mesh_dim,
            });
        }
        if let Some(index) = self.fe_types.iter().position(|t| *t == fe_type) {
            self.needs[index] = self.needs[index].union(needs);
            return Ok(index);
        }
        self.fe_types.push(fe_type);
        self.needs.push(needs);
        for context in &mut self.contexts {
            context.tables.push(ShapeFunctionTable::new(fe_type));
        }
        Ok(self.fe_types.len() - 1)
    }

    pub fn registered_fe_types(&self) -> &[FeType] {
        &self.fe_types
    }

    pub fn fe_index(&self, fe_type: FeType) -> Result<usize, AssemblyError> {
        self.fe_types
            .iter()
            .position(|t| *t == fe_type)
            .ok_or(AssemblyError::UnregisteredFeType { fe_type })
    }

    /// Turns on curvature computation for face and neighbor contexts.
    pub fn enable_curvatures(&mut self) {
        self.curvatures_enabled = true;
    }

    /// Turns on AD tracking for the context. The flag stays on for the lifetime of the mapper.
    pub fn enable_ad(&mut self, context: FeContext) {
        let data = &mut self.contexts[context.index()];
        if !data.ad_enabled {
            debug!("Enabling AD geometry for the {context} context");
            data.ad_enabled = true;
        }
    }

    pub fn ad_enabled(&self, context: FeContext) -> bool {
        self.contexts[context.index()].ad_enabled
    }

    pub fn invalidate(&mut self, context: FeContext) {
        self.contexts[context.index()].valid = false;
    }

    pub fn is_valid(&self, context: FeContext) -> bool {
        self.contexts[context.index()].valid
    }

    /// Reinitializes an interior context (volume, lower-dimensional or mortar segment) on `elem`.
    ///
    /// Shape tables are only computed when `with_tables` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn reinit_interior(
        &mut self,
        context: FeContext,
        cache: &mut QuadratureCache,
        elem: &Elem,
        source: PointSource,
        coord_sys: CoordinateSystem,
        seeds: Option<&NodalSeeds>,
        with_tables: bool,
    ) -> Result<(), AssemblyError> {
        debug_assert!(!context.is_side());
        let elem_type = elem.elem_type();
        let dim = elem_type.dim();
        let signed = dim == self.mesh_dim;
        let needs_hessians = with_tables && self.needs.iter().any(|n| n.second_derivatives);
        let data = &mut self.contexts[context.index()];
        data.begin(elem, None);

        let rule = match source {
            PointSource::Rule { order } => cache.rule(context.quadrature_context(), elem_type.reference_shape(), order)?,
            PointSource::Custom { points, weights } => {
                cache.set_arbitrary_points(context.quadrature_context(), elem_type.reference_shape(), points, weights)?
            }
        };
        let rule_id = rule.id();
        data.rule = Some(rule_id);
        data.ref_points.clear();
        data.ref_points.extend_from_slice(rule.points());
        data.weights.clear();
        data.weights.extend_from_slice(rule.weights());
        data.parent_points.clone_from(&data.ref_points);

        self.nodes.clear();
        self.nodes
            .extend(elem.points().iter().map(|p| [p.x, p.y, p.z]));

        let geometry_key = ReferenceTableKey {
            fe_type: elem_type.geometric_fe_type(),
            elem_type,
            rule: rule_id,
            side: None,
        };
        let geometry = cache.ensure_reference_table(geometry_key, &data.parent_points, needs_hessians)?;

        for qp in 0..data.parent_points.len() {
            let qp_geometry = interior_qp(&self.nodes, geometry, qp, dim, data.weights[qp], signed, coord_sys);
            if signed && qp_geometry.measure <= 0.0 {
                return Err(AssemblyError::NonPositiveJacobian {
                    elem: elem.id(),
                    qp,
                    determinant: qp_geometry.measure,
                });
            }
            let jacobian = to_matrix(&qp_geometry.columns);
            let inverse = if dim == 0 {
                Matrix3::zeros()
            } else {
                inverse_transpose_jacobian(&jacobian, dim).ok_or(AssemblyError::NonPositiveJacobian {
                    elem: elem.id(),
                    qp,
                    determinant: qp_geometry.measure,
                })?
            };
            data.inverse_jacobians.push(inverse);
            if needs_hessians {
                data.geometric_hessians
                    .push(geometric_hessians(&self.nodes, geometry, qp));
            }
            data.push_plain(&qp_geometry);
        }

        if data.ad_enabled {
            let dual_nodes = dual_nodes(elem.points(), seeds);
            for qp in 0..data.parent_points.len() {
                let weight = data.weights[qp];
                data.push_ad(interior_qp(&dual_nodes, geometry, qp, dim, weight, signed, coord_sys));
            }
        }

        data.finish();
        if with_tables {
            build_tables(data, cache, &self.fe_types, &self.needs, elem_type, rule_id, None)?;
        }
        Ok(())
    }

    /// Reinitializes a side context (face or neighbor) on side `side` of `elem`.
    ///
    /// Points are given in the reference coordinates of the side element.
    #[allow(clippy::too_many_arguments)]
    pub fn reinit_side(
        &mut self,
        context: FeContext,
        cache: &mut QuadratureCache,
        elem: &Elem,
        side: usize,
        source: PointSource,
        coord_sys: CoordinateSystem,
        seeds: Option<&NodalSeeds>,
    ) -> Result<(), AssemblyError> {
        debug_assert!(context.is_side());
        let elem_type = elem.elem_type();
        let invalid_side = AssemblyError::InvalidSide { elem: elem.id(), side };
        let side_type = elem_type.side_type().ok_or_else(|| invalid_side.clone())?;
        let side_local_nodes = elem_type.side_nodes(side).ok_or(invalid_side)?;
        let dim = elem_type.dim();
        let needs_hessians = self.needs.iter().any(|n| n.second_derivatives);
        let curvatures = self.curvatures_enabled && dim >= 2;
        let data = &mut self.contexts[context.index()];
        data.begin(elem, Some(side));

        let rule = match source {
            PointSource::Rule { order } => cache.rule(context.quadrature_context(), side_type.reference_shape(), order)?,
            PointSource::Custom { points, weights } => {
                cache.set_arbitrary_points(context.quadrature_context(), side_type.reference_shape(), points, weights)?
            }
        };
        let rule_id = rule.id();
        data.rule = Some(rule_id);
        data.ref_points.clear();
        data.ref_points.extend_from_slice(rule.points());
        data.weights.clear();
        data.weights.extend_from_slice(rule.weights());

        // Side parametrization and its image in the parent reference element
        let side_key = ReferenceTableKey {
            fe_type: side_type.geometric_fe_type(),
            elem_type: side_type,
            rule: rule_id,
            side: None,
        };
        let side_table = cache.ensure_reference_table(side_key, &data.ref_points, curvatures)?;
        let reference_nodes = elem_type.reference_nodes();
        let side_reference_nodes: Vec<Vec3<f64>> = side_local_nodes.iter().map(|&i| reference_nodes[i]).collect();
        data.parent_points.clear();
        for qp in 0..data.ref_points.len() {
            let xi = combine_nodes(&side_reference_nodes, |k| side_table.value(k, qp));
            data.parent_points.push(Point3::from(xi));
        }

        self.nodes.clear();
        self.nodes
            .extend(elem.points().iter().map(|p| [p.x, p.y, p.z]));
        self.side_nodes.clear();
        self.side_nodes
            .extend(side_local_nodes.iter().map(|&i| self.nodes[i]));

        // The side table must be fetched again: building the parent table borrows the cache
        let parent_key = ReferenceTableKey {
            fe_type: elem_type.geometric_fe_type(),
            elem_type,
            rule: rule_id,
            side: Some(side as u8),
        };
        cache.ensure_reference_table(parent_key, &data.parent_points, needs_hessians)?;
        let side_table = cache
            .reference_table(&side_key)
            .ok_or(AssemblyError::ContextNotReady { context })?;
        let parent_table = cache
            .reference_table(&parent_key)
            .ok_or(AssemblyError::ContextNotReady { context })?;

        let end_sign = if side == 0 { -1.0 } else { 1.0 };
        data.n_tangents = dim.saturating_sub(1);
        for qp in 0..data.ref_points.len() {
            let weight = data.weights[qp];
            let qp_geometry = side_qp(
                &self.side_nodes,
                side_table,
                &self.nodes,
                parent_table,
                qp,
                dim,
                weight,
                end_sign,
                coord_sys,
            );
            let jacobian = to_matrix(&qp_geometry.columns);
            let inverse = inverse_transpose_jacobian(&jacobian, dim).ok_or(AssemblyError::NonPositiveJacobian {
                elem: elem.id(),
                qp,
                determinant: jacobian_measure(&qp_geometry.columns[..dim], false),
            })?;
            data.inverse_jacobians.push(inverse);
            if needs_hessians {
                data.geometric_hessians
                    .push(geometric_hessians(&self.nodes, parent_table, qp));
            }

            let normal = Vector3::from(qp_geometry.normal.unwrap_or([0.0; 3]));
            let tangents = match dim {
                2 => [Vector3::from(normalized(&qp_geometry.side_columns[0])), Vector3::zeros()],
                3 => {
                    let t1 = Vector3::from(normalized(&qp_geometry.side_columns[0]));
                    [t1, normal.cross(&t1)]
                }
                _ => [Vector3::zeros(); 2],
            };
            data.tangents.push(tangents);
            if curvatures {
                data.curvatures
                    .push(side_curvature(&self.side_nodes, side_table, qp, dim - 1, &normal));
            }
            data.push_plain(&qp_geometry);
        }

        if data.ad_enabled {
            let dual_parent = dual_nodes(elem.points(), seeds);
            let dual_side: Vec<Vec3<DualReal>> = side_local_nodes
                .iter()
                .map(|&i| dual_parent[i].clone())
                .collect();
            for qp in 0..data.ref_points.len() {
                let weight = data.weights[qp];
                data.push_ad(side_qp(
                    &dual_side,
                    side_table,
                    &dual_parent,
                    parent_table,
                    qp,
                    dim,
                    weight,
                    end_sign,
                    coord_sys,
                ));
            }
        }

        data.finish();
        build_tables(data, cache, &self.fe_types, &self.needs, elem_type, rule_id, Some(side))
    }

    /// Replaces the neighbor weights by the face weights so that both sides of an internal side
    /// integrate with identical `JxW`.
    pub fn share_face_weights_with_neighbor(&mut self) -> Result<(), AssemblyError> {
        let [_, face, neighbor, _, _] = &mut self.contexts;
        if !face.valid {
            return Err(AssemblyError::ContextNotReady {
                context: FeContext::Face,
            });
        }
        if !neighbor.valid {
            return Err(AssemblyError::ContextNotReady {
                context: FeContext::Neighbor,
            });
        }
        neighbor.jxw.clone_from(&face.jxw);
        neighbor.jxw_coord.clear();
        neighbor
            .jxw_coord
            .extend(neighbor.jxw.iter().zip(&neighbor.coord).map(|(w, c)| w * c));
        if neighbor.ad_enabled && face.ad_enabled {
            neighbor.ad.jxw.clone_from(&face.ad.jxw);
        }
        neighbor.finish();
        Ok(())
    }

    fn context(&self, context: FeContext) -> Result<&ContextData, AssemblyError> {
        let data = &self.contexts[context.index()];
        if data.valid {
            Ok(data)
        } else {
            Err(AssemblyError::ContextNotReady { context })
        }
    }

    pub fn n_qp(&self, context: FeContext) -> Result<usize, AssemblyError> {
        Ok(self.context(context)?.jxw.len())
    }

    /// Physical quadrature points.
    pub fn qpoints(&self, context: FeContext) -> Result<&[Point3<f64>], AssemblyError> {
        Ok(&self.context(context)?.qpoints)
    }

    /// Rule points in the reference coordinates of the context element (side coordinates for face
    /// and neighbor contexts).
    pub fn reference_points(&self, context: FeContext) -> Result<&[Point3<f64>], AssemblyError> {
        Ok(&self.context(context)?.ref_points)
    }

    /// Points in the reference coordinates of the element whose shape functions are evaluated.
    pub fn parent_reference_points(&self, context: FeContext) -> Result<&[Point3<f64>], AssemblyError> {
        Ok(&self.context(context)?.parent_points)
    }

    pub fn weights(&self, context: FeContext) -> Result<&[f64], AssemblyError> {
        Ok(&self.context(context)?.weights)
    }

    pub fn jxw(&self, context: FeContext) -> Result<&[f64], AssemblyError> {
        Ok(&self.context(context)?.jxw)
    }

    pub fn coord(&self, context: FeContext) -> Result<&[f64], AssemblyError> {
        Ok(&self.context(context)?.coord)
    }

    /// `JxW * coord`, the integration weights to use in integrands.
    pub fn jxw_coord(&self, context: FeContext) -> Result<&[f64], AssemblyError> {
        Ok(&self.context(context)?.jxw_coord)
    }

    /// Outward unit normals. Empty for interior contexts.
    pub fn normals(&self, context: FeContext) -> Result<&[Vector3<f64>], AssemblyError> {
        Ok(&self.context(context)?.normals)
    }

    /// Unit tangents of side contexts. Only the first [`Self::n_tangents`] entries per point are
    /// meaningful.
    pub fn tangents(&self, context: FeContext) -> Result<&[[Vector3<f64>; 2]], AssemblyError> {
        Ok(&self.context(context)?.tangents)
    }

    pub fn n_tangents(&self, context: FeContext) -> Result<usize, AssemblyError> {
        Ok(self.context(context)?.n_tangents)
    }

    /// Curvatures of side contexts (positive for convex sides). Empty unless curvatures are
    /// enabled and the element is at least two-dimensional.
    pub fn curvatures(&self, context: FeContext) -> Result<&[f64], AssemblyError> {
        Ok(&self.context(context)?.curvatures)
    }

    /// Sum of `JxW * coord`: the element, side or segment volume.
    pub fn volume(&self, context: FeContext) -> Result<f64, AssemblyError> {
        Ok(self.context(context)?.volume)
    }

    pub fn elem_id(&self, context: FeContext) -> Result<usize, AssemblyError> {
        let data = self.context(context)?;
        data.elem_id.ok_or(AssemblyError::ContextNotReady { context })
    }

    pub fn side(&self, context: FeContext) -> Result<Option<usize>, AssemblyError> {
        Ok(self.context(context)?.side)
    }

    pub fn rule_id(&self, context: FeContext) -> Result<RuleId, AssemblyError> {
        let data = self.context(context)?;
        data.rule.ok_or(AssemblyError::ContextNotReady { context })
    }

    /// The physical shape table of a registered FE type in the context.
    pub fn shape(&self, context: FeContext, fe_type: FeType) -> Result<&ShapeFunctionTable, AssemblyError> {
        let index = self.fe_index(fe_type)?;
        if context == FeContext::MortarSegment {
            return Err(AssemblyError::ContextNotReady { context });
        }
        let table = &self.context(context)?.tables[index];
        table.status.clone()?;
        Ok(table)
    }

    fn ad_context(&self, context: FeContext) -> Result<&AdGeometry, AssemblyError> {
        let data = self.context(context)?;
        if data.ad_enabled {
            Ok(&data.ad)
        } else {
            Err(AssemblyError::AdNotEnabled { context })
        }
    }

    pub fn ad_jxw(&self, context: FeContext) -> Result<&[DualReal], AssemblyError> {
        Ok(&self.ad_context(context)?.jxw)
    }

    pub fn ad_qpoints(&self, context: FeContext) -> Result<&[Vec3<DualReal>], AssemblyError> {
        Ok(&self.ad_context(context)?.qpoints)
    }

    pub fn ad_normals(&self, context: FeContext) -> Result<&[Vec3<DualReal>], AssemblyError> {
        Ok(&self.ad_context(context)?.normals)
    }

    pub fn ad_coord(&self, context: FeContext) -> Result<&[DualReal], AssemblyError> {
        Ok(&self.ad_context(context)?.coord)
    }
}

fn dual_nodes(points: &[Point3<f64>], seeds: Option<&NodalSeeds>) -> Vec<Vec3<DualReal>> {
    points
        .iter()
        .enumerate()
        .map(|(k, p)| {
            std::array::from_fn(|d| {
                match seeds.and_then(|s| s.get(k)).and_then(|node_seeds| node_seeds[d]) {
                    Some(dof) => DualReal::variable(p[d], dof),
                    None => DualReal::constant(p[d]),
                }
            })
        })
        .collect()
}

/// Second derivatives of each physical coordinate with respect to the reference coordinates.
fn geometric_hessians(nodes: &[Vec3<f64>], table: &ReferenceShapeTable, qp: usize) -> [Matrix3<f64>; 3] {
    let mut result = [Matrix3::zeros(); 3];
    for (k, node) in nodes.iter().enumerate() {
        let hessian = table.hessian(k, qp);
        for c in 0..3 {
            result[c] += hessian * node[c];
        }
    }
    result
}

/// Curvature of a side from the second fundamental form of its parametrization.
fn side_curvature(
    side_nodes: &[Vec3<f64>],
    side_table: &ReferenceShapeTable,
    qp: usize,
    side_dim: usize,
    normal: &Vector3<f64>,
) -> f64 {
    let tangent = |d: usize| Vector3::from(combine_nodes(side_nodes, |k| side_table.gradient(k, qp)[d]));
    let second = |a: usize, b: usize| {
        Vector3::from(combine_nodes(side_nodes, |k| side_table.hessian(k, qp)[(a, b)])).dot(normal)
    };
    match side_dim {
        1 => {
            let t = tangent(0);
            -second(0, 0) / t.norm_squared()
        }
        2 => {
            let (xs, xt) = (tangent(0), tangent(1));
            let (e, f, g) = (xs.norm_squared(), xs.dot(&xt), xt.norm_squared());
            let (l, m, n) = (second(0, 0), second(0, 1), second(1, 1));
            -(l * g - 2.0 * m * f + n * e) / (2.0 * (e * g - f * f))
        }
        _ => 0.0,
    }
}

fn build_tables(
    data: &mut ContextData,
    cache: &mut QuadratureCache,
    fe_types: &[FeType],
    needs: &[ShapeNeeds],
    elem_type: ElemType,
    rule: RuleId,
    side: Option<usize>,
) -> Result<(), AssemblyError> {
    for (index, (&fe_type, &fe_needs)) in fe_types.iter().zip(needs).enumerate() {
        if !fe_type.has_shape_functions() {
            continue;
        }
        let key = ReferenceTableKey {
            fe_type,
            elem_type,
            rule,
            side: side.map(|s| s as u8),
        };
        match cache.ensure_reference_table(key, &data.parent_points, fe_needs.second_derivatives) {
            Ok(reference) => data.tables[index].fill(
                reference,
                &data.inverse_jacobians,
                &data.geometric_hessians,
                fe_needs,
            ),
            // Types unsupported on this element type only fail when they are actually requested
            Err(err @ AssemblyError::UnsupportedFeType { .. }) => data.tables[index].mark_unsupported(err),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
