//! Read-only view of the current assembly data handed to physics objects.
use crate::assembly::blocks::LocalKind;
use crate::element::{BoundaryId, Elem, SubdomainId};
use crate::error::AssemblyError;
use crate::mapping::scalar::Vec3;
use crate::mapping::{CoordinateSystem, DualReal, FeContext, GeometricMapper, ShapeFunctionTable};
use crate::system::{System, VariableId, VariableInfo};
use nalgebra::{DVector, Point3, Vector3};

/// Elements, sides and nodes an assembly is currently positioned on.
#[derive(Debug, Clone, Default)]
pub(crate) struct CurrentGeometry {
    pub elem: Option<Elem>,
    pub side: Option<usize>,
    pub neighbor: Option<Elem>,
    pub neighbor_side: Option<usize>,
    pub lower: Option<Elem>,
    pub segment: Option<Elem>,
    pub boundary: Option<BoundaryId>,
    pub node: Option<(usize, Point3<f64>)>,
    pub neighbor_node: Option<(usize, Point3<f64>)>,
}

/// The dof kind whose shape functions a context evaluates.
fn context_kind(context: FeContext) -> Result<LocalKind, AssemblyError> {
    match context {
        FeContext::Volume | FeContext::Face => Ok(LocalKind::Element),
        FeContext::Neighbor => Ok(LocalKind::Neighbor),
        FeContext::Lower => Ok(LocalKind::Lower),
        FeContext::MortarSegment => Err(AssemblyError::ContextNotReady { context }),
    }
}

/// Shape functions, geometry and dofs of the current element(s).
///
/// Obtained from [`Assembly::fe`](crate::assembly::Assembly::fe) or alongside a local block from
/// [`Assembly::local_residual`](crate::assembly::Assembly::local_residual) and
/// [`Assembly::local_jacobian`](crate::assembly::Assembly::local_jacobian).
#[derive(Debug, Clone, Copy)]
pub struct FeView<'a> {
    system: &'a System,
    mapper: &'a GeometricMapper,
    current: &'a CurrentGeometry,
    dofs: &'a [Vec<Vec<usize>>; 3],
}

impl<'a> FeView<'a> {
    pub(crate) fn new(
        system: &'a System,
        mapper: &'a GeometricMapper,
        current: &'a CurrentGeometry,
        dofs: &'a [Vec<Vec<usize>>; 3],
    ) -> Self {
        Self {
            system,
            mapper,
            current,
            dofs,
        }
    }

    pub fn system(&self) -> &'a System {
        self.system
    }

    pub fn variable(&self, var: VariableId) -> Result<&'a VariableInfo, AssemblyError> {
        self.system.variable(var)
    }

    pub fn elem(&self) -> Result<&'a Elem, AssemblyError> {
        self.current
            .elem
            .as_ref()
            .ok_or(AssemblyError::NoCurrentElement { operation: "element access" })
    }

    pub fn neighbor(&self) -> Option<&'a Elem> {
        self.current.neighbor.as_ref()
    }

    pub fn lower(&self) -> Option<&'a Elem> {
        self.current.lower.as_ref()
    }

    pub fn segment(&self) -> Option<&'a Elem> {
        self.current.segment.as_ref()
    }

    pub fn side(&self) -> Option<usize> {
        self.current.side
    }

    pub fn neighbor_side(&self) -> Option<usize> {
        self.current.neighbor_side
    }

    pub fn boundary(&self) -> Option<BoundaryId> {
        self.current.boundary
    }

    pub fn node(&self) -> Option<(usize, Point3<f64>)> {
        self.current.node
    }

    pub fn neighbor_node(&self) -> Option<(usize, Point3<f64>)> {
        self.current.neighbor_node
    }

    pub fn subdomain(&self) -> Result<SubdomainId, AssemblyError> {
        Ok(self.elem()?.subdomain())
    }

    pub fn coordinate_system(&self) -> Result<CoordinateSystem, AssemblyError> {
        Ok(self.system.coordinate_system(self.subdomain()?))
    }

    /// Global dofs of `var` on the element of the given kind, in local shape function order.
    pub fn dof_indices(&self, kind: LocalKind, var: VariableId) -> &'a [usize] {
        self.dofs[kind.index()]
            .get(var.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Dof of a nodal variable at the current node.
    pub fn node_dof(&self, var: VariableId) -> Option<usize> {
        let (node, _) = self.current.node?;
        self.system.dof_map().node_dof(node, var)
    }

    /// The physical shape table of the variable's FE type in the context.
    pub fn shape(&self, context: FeContext, var: VariableId) -> Result<&'a ShapeFunctionTable, AssemblyError> {
        let fe_type = self.variable(var)?.fe_type;
        self.mapper.shape(context, fe_type)
    }

    pub fn n_qp(&self, context: FeContext) -> Result<usize, AssemblyError> {
        self.mapper.n_qp(context)
    }

    pub fn qpoints(&self, context: FeContext) -> Result<&'a [Point3<f64>], AssemblyError> {
        self.mapper.qpoints(context)
    }

    pub fn jxw(&self, context: FeContext) -> Result<&'a [f64], AssemblyError> {
        self.mapper.jxw(context)
    }

    pub fn coord(&self, context: FeContext) -> Result<&'a [f64], AssemblyError> {
        self.mapper.coord(context)
    }

    /// Integration weights including the coordinate system factor.
    pub fn jxw_coord(&self, context: FeContext) -> Result<&'a [f64], AssemblyError> {
        self.mapper.jxw_coord(context)
    }

    pub fn normals(&self, context: FeContext) -> Result<&'a [Vector3<f64>], AssemblyError> {
        self.mapper.normals(context)
    }

    pub fn tangents(&self, context: FeContext) -> Result<&'a [[Vector3<f64>; 2]], AssemblyError> {
        self.mapper.tangents(context)
    }

    pub fn curvatures(&self, context: FeContext) -> Result<&'a [f64], AssemblyError> {
        self.mapper.curvatures(context)
    }

    /// Volume of the element, side or segment of the context.
    pub fn volume(&self, context: FeContext) -> Result<f64, AssemblyError> {
        self.mapper.volume(context)
    }

    pub fn ad_jxw(&self, context: FeContext) -> Result<&'a [DualReal], AssemblyError> {
        self.mapper.ad_jxw(context)
    }

    pub fn ad_qpoints(&self, context: FeContext) -> Result<&'a [Vec3<DualReal>], AssemblyError> {
        self.mapper.ad_qpoints(context)
    }

    pub fn ad_normals(&self, context: FeContext) -> Result<&'a [Vec3<DualReal>], AssemblyError> {
        self.mapper.ad_normals(context)
    }

    pub fn ad_coord(&self, context: FeContext) -> Result<&'a [DualReal], AssemblyError> {
        self.mapper.ad_coord(context)
    }

    fn local_coefficients(&self, context: FeContext, var: VariableId) -> Result<(&'a ShapeFunctionTable, &'a [usize]), AssemblyError> {
        let table = self.shape(context, var)?;
        let dofs = self.dof_indices(context_kind(context)?, var);
        if !dofs.is_empty() && dofs.len() != table.n_functions() {
            return Err(AssemblyError::InvalidParameter {
                object: self.variable(var)?.name.clone(),
                message: format!(
                    "{} dofs on the {context} element, but {} shape functions",
                    dofs.len(),
                    table.n_functions()
                ),
            });
        }
        Ok((table, dofs))
    }

    /// Values of the field `var` of `solution` at the quadrature points of the context.
    ///
    /// Zero where the variable does not live.
    pub fn interpolate(
        &self,
        context: FeContext,
        var: VariableId,
        solution: &DVector<f64>,
        out: &mut Vec<f64>,
    ) -> Result<(), AssemblyError> {
        let (table, dofs) = self.local_coefficients(context, var)?;
        out.clear();
        out.resize(self.n_qp(context)?, 0.0);
        for (i, &dof) in dofs.iter().enumerate() {
            let u_i = solution[dof];
            for (qp, value) in out.iter_mut().enumerate() {
                *value += u_i * table.phi(i, qp);
            }
        }
        Ok(())
    }

    /// Physical gradients of the field `var` of `solution` at the quadrature points.
    pub fn interpolate_gradient(
        &self,
        context: FeContext,
        var: VariableId,
        solution: &DVector<f64>,
        out: &mut Vec<Vector3<f64>>,
    ) -> Result<(), AssemblyError> {
        let (table, dofs) = self.local_coefficients(context, var)?;
        out.clear();
        out.resize(self.n_qp(context)?, Vector3::zeros());
        for (i, &dof) in dofs.iter().enumerate() {
            let u_i = solution[dof];
            for (qp, gradient) in out.iter_mut().enumerate() {
                *gradient += table.grad_phi(i, qp) * u_i;
            }
        }
        Ok(())
    }

    /// Values of a scalar variable (its global dofs) in `solution`.
    pub fn scalar_values(&self, var: VariableId, solution: &DVector<f64>) -> Vec<f64> {
        self.dof_indices(LocalKind::Element, var)
            .iter()
            .map(|&dof| solution[dof])
            .collect()
    }
}
