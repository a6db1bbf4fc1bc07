use crate::assembly::FeView;
use crate::element::BoundaryId;
use crate::mapping::FeContext;
use crate::objects::{impl_physics_object, IntegratedBc, ObjectBase};
use crate::system::{SolutionState, VariableId};
use nalgebra::{DMatrix, DVector};

/// Prescribed flux `g`: `-∫ g φ_i` over the boundary sides.
#[derive(Debug, Clone)]
pub struct NeumannBc {
    base: ObjectBase,
    variable: VariableId,
    boundaries: Vec<BoundaryId>,
    flux: f64,
}

impl NeumannBc {
    pub fn new(base: ObjectBase, variable: VariableId, boundaries: Vec<BoundaryId>, flux: f64) -> Self {
        Self {
            base,
            variable,
            boundaries,
            flux,
        }
    }
}

impl_physics_object!(NeumannBc);

impl IntegratedBc for NeumannBc {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn boundaries(&self) -> &[BoundaryId] {
        &self.boundaries
    }

    fn jacobian_variables(&self) -> Vec<VariableId> {
        Vec::new()
    }

    fn compute_residual(&self, fe: &FeView, _solution: &SolutionState, residual: &mut DVector<f64>) -> eyre::Result<()> {
        let table = fe.shape(FeContext::Face, self.variable)?;
        let weights = fe.jxw_coord(FeContext::Face)?;
        for (qp, w) in weights.iter().enumerate() {
            for (i, r_i) in residual.iter_mut().enumerate() {
                *r_i -= self.flux * table.phi(i, qp) * w;
            }
        }
        Ok(())
    }

    fn compute_jacobian(&self, _: &FeView, _: &SolutionState, _: VariableId, _: &mut DMatrix<f64>) -> eyre::Result<()> {
        Ok(())
    }
}
