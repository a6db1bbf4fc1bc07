use crate::assembly::{FeView, JacobianType, LocalKind};
use crate::mapping::FeContext;
use crate::objects::{impl_physics_object, InterfaceKernel, ObjectBase};
use crate::system::{SolutionState, VariableId};
use eyre::eyre;
use nalgebra::{DMatrix, DVector};

fn context_of(kind: LocalKind) -> eyre::Result<FeContext> {
    match kind {
        LocalKind::Element => Ok(FeContext::Face),
        LocalKind::Neighbor => Ok(FeContext::Neighbor),
        LocalKind::Lower => Err(eyre!("interface kernels have no lower-dimensional rows")),
    }
}

/// Penalizes the jump across an internal side: `±p ∫ (u - u_n) φ_i`, plus sign on the element
/// side and minus sign on the neighbor side.
#[derive(Debug, Clone)]
pub struct PenaltyInterface {
    base: ObjectBase,
    variable: VariableId,
    neighbor_variable: VariableId,
    penalty: f64,
}

impl PenaltyInterface {
    pub fn new(base: ObjectBase, variable: VariableId, neighbor_variable: VariableId, penalty: f64) -> Self {
        Self {
            base,
            variable,
            neighbor_variable,
            penalty,
        }
    }

    fn sign(kind: LocalKind) -> f64 {
        if kind == LocalKind::Neighbor {
            -1.0
        } else {
            1.0
        }
    }
}

impl_physics_object!(PenaltyInterface);

impl InterfaceKernel for PenaltyInterface {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn neighbor_variable(&self) -> VariableId {
        self.neighbor_variable
    }

    fn compute_residual(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        kind: LocalKind,
        residual: &mut DVector<f64>,
    ) -> eyre::Result<()> {
        let context = context_of(kind)?;
        let row_var = self.variable_of(kind).ok_or_else(|| eyre!("no variable for {kind:?} rows"))?;
        let table = fe.shape(context, row_var)?;
        // The neighbor shares the face weights
        let weights = fe.jxw_coord(FeContext::Face)?;
        let (mut u, mut u_neighbor) = (Vec::new(), Vec::new());
        fe.interpolate(FeContext::Face, self.variable, &solution.current, &mut u)?;
        fe.interpolate(FeContext::Neighbor, self.neighbor_variable, &solution.current, &mut u_neighbor)?;
        let scale = Self::sign(kind) * self.penalty;
        for (qp, w) in weights.iter().enumerate() {
            let jump = u[qp] - u_neighbor[qp];
            for (i, r_i) in residual.iter_mut().enumerate() {
                *r_i += scale * jump * table.phi(i, qp) * w;
            }
        }
        Ok(())
    }

    fn compute_jacobian(
        &self,
        fe: &FeView,
        _solution: &SolutionState,
        jacobian_type: JacobianType,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()> {
        let (row_kind, col_kind) = (jacobian_type.row_kind(), jacobian_type.col_kind());
        let variable = |kind| {
            self.variable_of(kind)
                .ok_or_else(|| eyre!("{jacobian_type:?} is not an interface Jacobian"))
        };
        let rows = fe.shape(context_of(row_kind)?, variable(row_kind)?)?;
        let cols = fe.shape(context_of(col_kind)?, variable(col_kind)?)?;
        let weights = fe.jxw_coord(FeContext::Face)?;
        // d(jump)/d(u_n) = -1
        let scale = Self::sign(row_kind) * Self::sign(col_kind) * self.penalty;
        for (qp, w) in weights.iter().enumerate() {
            for j in 0..jacobian.ncols() {
                for i in 0..jacobian.nrows() {
                    jacobian[(i, j)] += scale * cols.phi(j, qp) * rows.phi(i, qp) * w;
                }
            }
        }
        Ok(())
    }
}
