use crate::assembly::{Assembly, GlobalMatrix, GlobalTargets, GlobalVector, JacobianType, LocalKind};
use crate::element::Elem;
use crate::loops::{accumulate_jacobian, accumulate_residual, has_dofs, has_jacobian_block, Compute};
use crate::mesh::Mesh;
use crate::objects::{IntegratedBc, InterfaceKernel, Kernel, ObjectSet, PhysicsObject};
use crate::system::{SolutionState, System, VariableId};
use eyre::WrapErr;
use std::sync::Arc;

const INTERFACE_JACOBIANS: [JacobianType; 4] = [
    JacobianType::ElementElement,
    JacobianType::ElementNeighbor,
    JacobianType::NeighborElement,
    JacobianType::NeighborNeighbor,
];

/// Residual and/or Jacobian assembly of volume kernels, integrated boundary conditions and
/// interface kernels over a range of volume elements.
///
/// Internal sides are visited once, from the element with the lower id.
#[derive(Debug)]
pub struct ElementLoop<'a> {
    mesh: &'a Mesh,
    objects: &'a ObjectSet,
    solution: &'a SolutionState,
    compute: Compute,
    kernel_jvars: Vec<Vec<VariableId>>,
    bc_jvars: Vec<Vec<VariableId>>,
}

impl<'a> ElementLoop<'a> {
    pub fn new(mesh: &'a Mesh, objects: &'a ObjectSet, solution: &'a SolutionState, compute: Compute) -> Self {
        Self {
            mesh,
            objects,
            solution,
            compute,
            kernel_jvars: objects
                .kernels
                .iter()
                .map(|kernel| kernel.jacobian_variables())
                .collect(),
            bc_jvars: objects
                .integrated_bcs
                .iter()
                .map(|bc| bc.jacobian_variables())
                .collect(),
        }
    }

    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    pub fn compute(&self) -> Compute {
        self.compute
    }

    /// Runs the loop over every volume element of the mesh.
    pub fn run_all<V: GlobalVector, M: GlobalMatrix>(
        &self,
        assembly: &mut Assembly,
        targets: &GlobalTargets<V, M>,
    ) -> eyre::Result<()> {
        self.run(assembly, self.mesh.volume_elems(), targets)
    }

    /// Runs the loop over `elems` and leaves the contribution cache of `assembly` empty.
    pub fn run<'e, V: GlobalVector, M: GlobalMatrix>(
        &self,
        assembly: &mut Assembly,
        elems: impl IntoIterator<Item = &'e Elem>,
        targets: &GlobalTargets<V, M>,
    ) -> eyre::Result<()> {
        let interval = assembly.options().flush_interval();
        for (count, elem) in elems.into_iter().enumerate() {
            self.assemble_element(assembly, elem)
                .wrap_err_with(|| format!("element loop failed on element {}", elem.id()))?;
            if (count + 1) % interval == 0 {
                assembly.add_cached(targets)?;
            }
        }
        assembly.add_cached(targets)?;
        Ok(())
    }

    fn assemble_element(&self, assembly: &mut Assembly, elem: &Elem) -> eyre::Result<()> {
        let system = Arc::clone(assembly.system());
        assembly.reinit(elem)?;
        assembly.prepare()?;

        for (kernel, jvars) in self.objects.kernels.iter().zip(&self.kernel_jvars) {
            if kernel.is_active_on(elem.subdomain()) {
                self.run_kernel(assembly, &system, kernel.as_ref(), jvars)
                    .wrap_err_with(|| format!("kernel `{}` failed", kernel.name()))?;
            }
        }

        for side in 0..elem.n_sides() {
            match self.mesh.neighbor(elem.id(), side) {
                Some((neighbor, neighbor_side)) if elem.id() < neighbor => {
                    let neighbor = self.mesh.elem(neighbor)?;
                    self.assemble_internal_side(assembly, &system, elem, side, neighbor, neighbor_side)?;
                }
                Some(_) => {}
                None => self.assemble_boundary_side(assembly, &system, elem, side)?,
            }
        }

        if self.compute.residual() {
            assembly.cache_residual()?;
        }
        if self.compute.jacobian() {
            assembly.cache_jacobian()?;
        }
        Ok(())
    }

    fn run_kernel(
        &self,
        assembly: &mut Assembly,
        system: &System,
        kernel: &dyn Kernel,
        jvars: &[VariableId],
    ) -> eyre::Result<()> {
        let var = kernel.variable();
        if !has_dofs(assembly, LocalKind::Element, var) {
            return Ok(());
        }
        let tags = kernel.tagging();
        if self.compute.residual() {
            accumulate_residual(assembly, LocalKind::Element, var, tags.vector_tags(), |fe, residual| {
                kernel.compute_residual(fe, self.solution, residual)
            })?;
        }
        if self.compute.jacobian() {
            let jacobian_type = JacobianType::ElementElement;
            for &jvar in jvars {
                if has_jacobian_block(assembly, system, jacobian_type, var, jvar) {
                    accumulate_jacobian(assembly, jacobian_type, (var, jvar), tags.matrix_tags(), false, |fe, jacobian| {
                        kernel.compute_jacobian(fe, self.solution, jvar, jacobian)
                    })?;
                }
            }
        }
        Ok(())
    }

    fn assemble_boundary_side(
        &self,
        assembly: &mut Assembly,
        system: &System,
        elem: &Elem,
        side: usize,
    ) -> eyre::Result<()> {
        let mut face_ready = false;
        for &boundary in self.mesh.side_boundary_ids(elem.id(), side) {
            for (bc, jvars) in self.objects.integrated_bcs.iter().zip(&self.bc_jvars) {
                if !bc.boundaries().contains(&boundary) || !bc.is_active_on(elem.subdomain()) {
                    continue;
                }
                if !face_ready {
                    assembly.reinit_face(side)?;
                    face_ready = true;
                }
                assembly.set_current_boundary(Some(boundary));
                self.run_bc(assembly, system, bc.as_ref(), jvars)
                    .wrap_err_with(|| format!("boundary condition `{}` failed on side {side}", bc.name()))?;
            }
        }
        Ok(())
    }

    fn run_bc(
        &self,
        assembly: &mut Assembly,
        system: &System,
        bc: &dyn IntegratedBc,
        jvars: &[VariableId],
    ) -> eyre::Result<()> {
        let var = bc.variable();
        if !has_dofs(assembly, LocalKind::Element, var) {
            return Ok(());
        }
        let tags = bc.tagging();
        if self.compute.residual() {
            accumulate_residual(assembly, LocalKind::Element, var, tags.vector_tags(), |fe, residual| {
                bc.compute_residual(fe, self.solution, residual)
            })?;
        }
        if self.compute.jacobian() {
            let jacobian_type = JacobianType::ElementElement;
            for &jvar in jvars {
                if has_jacobian_block(assembly, system, jacobian_type, var, jvar) {
                    accumulate_jacobian(assembly, jacobian_type, (var, jvar), tags.matrix_tags(), false, |fe, jacobian| {
                        bc.compute_jacobian(fe, self.solution, jvar, jacobian)
                    })?;
                }
            }
        }
        Ok(())
    }

    fn assemble_internal_side(
        &self,
        assembly: &mut Assembly,
        system: &System,
        elem: &Elem,
        side: usize,
        neighbor: &Elem,
        neighbor_side: usize,
    ) -> eyre::Result<()> {
        let mut active = self
            .objects
            .interface_kernels
            .iter()
            .filter(|kernel| kernel.is_active_on(elem.subdomain()))
            .peekable();
        if active.peek().is_none() {
            return Ok(());
        }
        assembly.reinit_elem_and_neighbor(side, neighbor, neighbor_side)?;
        assembly.prepare_neighbor()?;
        for kernel in active {
            self.run_interface_kernel(assembly, system, kernel.as_ref())
                .wrap_err_with(|| {
                    format!(
                        "interface kernel `{}` failed on side {side} shared with element {}",
                        kernel.name(),
                        neighbor.id()
                    )
                })?;
        }
        if self.compute.residual() {
            assembly.cache_residual_neighbor()?;
        }
        if self.compute.jacobian() {
            assembly.cache_jacobian_neighbor()?;
        }
        Ok(())
    }

    fn run_interface_kernel(
        &self,
        assembly: &mut Assembly,
        system: &System,
        kernel: &dyn InterfaceKernel,
    ) -> eyre::Result<()> {
        let tags = kernel.tagging();
        let variable = |kind: LocalKind| match kind {
            LocalKind::Neighbor => kernel.neighbor_variable(),
            _ => kernel.variable(),
        };
        if self.compute.residual() {
            for kind in [LocalKind::Element, LocalKind::Neighbor] {
                let var = variable(kind);
                if has_dofs(assembly, kind, var) {
                    accumulate_residual(assembly, kind, var, tags.vector_tags(), |fe, residual| {
                        kernel.compute_residual(fe, self.solution, kind, residual)
                    })?;
                }
            }
        }
        if self.compute.jacobian() {
            for jacobian_type in INTERFACE_JACOBIANS {
                let vars = (variable(jacobian_type.row_kind()), variable(jacobian_type.col_kind()));
                if has_jacobian_block(assembly, system, jacobian_type, vars.0, vars.1) {
                    accumulate_jacobian(assembly, jacobian_type, vars, tags.matrix_tags(), false, |fe, jacobian| {
                        kernel.compute_jacobian(fe, self.solution, jacobian_type, jacobian)
                    })?;
                }
            }
        }
        Ok(())
    }
}
