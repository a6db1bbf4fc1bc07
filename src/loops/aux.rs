use crate::assembly::{Assembly, GlobalVector, LocalKind};
use crate::element::Elem;
use crate::mesh::Mesh;
use crate::objects::{AuxKernel, ObjectSet, PhysicsObject};
use crate::system::SolutionState;
use eyre::WrapErr;
use parking_lot::Mutex;

/// Evaluation of auxiliary kernels, one value per element.
///
/// The value is set (not added) at every dof of the auxiliary variable on the element, which is
/// intended for elemental variables such as constant monomials.
#[derive(Debug)]
pub struct AuxLoop<'a> {
    mesh: &'a Mesh,
    objects: &'a ObjectSet,
    solution: &'a SolutionState,
}

impl<'a> AuxLoop<'a> {
    pub fn new(mesh: &'a Mesh, objects: &'a ObjectSet, solution: &'a SolutionState) -> Self {
        Self {
            mesh,
            objects,
            solution,
        }
    }

    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    pub fn run_all<V: GlobalVector>(&self, assembly: &mut Assembly, aux: &Mutex<V>) -> eyre::Result<()> {
        self.run(assembly, self.mesh.volume_elems(), aux)
    }

    pub fn run<'e, V: GlobalVector>(
        &self,
        assembly: &mut Assembly,
        elems: impl IntoIterator<Item = &'e Elem>,
        aux: &Mutex<V>,
    ) -> eyre::Result<()> {
        if self.objects.aux_kernels.is_empty() {
            return Ok(());
        }
        for elem in elems {
            assembly.reinit(elem)?;
            for kernel in &self.objects.aux_kernels {
                if kernel.is_active_on(elem.subdomain()) {
                    self.evaluate(assembly, kernel.as_ref(), aux)
                        .wrap_err_with(|| format!("aux kernel `{}` failed on element {}", kernel.name(), elem.id()))?;
                }
            }
        }
        Ok(())
    }

    fn evaluate<V: GlobalVector>(&self, assembly: &Assembly, kernel: &dyn AuxKernel, aux: &Mutex<V>) -> eyre::Result<()> {
        let fe = assembly.fe();
        let dofs = fe.dof_indices(LocalKind::Element, kernel.variable());
        if dofs.is_empty() {
            return Ok(());
        }
        let value = kernel.compute_value(&fe, self.solution)?;
        let mut aux = aux.lock();
        for &dof in dofs {
            aux.set(dof, value)?;
        }
        Ok(())
    }
}
