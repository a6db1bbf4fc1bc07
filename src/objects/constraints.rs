use crate::assembly::{FeView, JacobianType, LocalKind};
use crate::mapping::FeContext;
use crate::objects::{impl_physics_object, MortarConstraint, ObjectBase};
use crate::system::{SolutionState, VariableId};
use eyre::eyre;
use nalgebra::{DMatrix, DVector};

fn context_of(kind: LocalKind) -> FeContext {
    match kind {
        LocalKind::Element => FeContext::Face,
        LocalKind::Neighbor => FeContext::Neighbor,
        LocalKind::Lower => FeContext::Lower,
    }
}

/// Enforces `u_s = u_p` weakly on a mortar interface with a Lagrange multiplier `λ`.
///
/// * lower rows: `∫ (u_s - u_p) ψ_i`
/// * secondary rows: `∫ λ φ_i`
/// * primary rows: `-∫ λ φ_i`
///
/// Integrals are taken with the mortar segment weights. Without a primary element `u_p` is zero.
#[derive(Debug, Clone)]
pub struct EqualValueConstraint {
    base: ObjectBase,
    lagrange: VariableId,
    secondary: VariableId,
    primary: VariableId,
}

impl EqualValueConstraint {
    pub fn new(base: ObjectBase, lagrange: VariableId, secondary: VariableId, primary: VariableId) -> Self {
        Self {
            base,
            lagrange,
            secondary,
            primary,
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

impl_physics_object!(EqualValueConstraint);

impl MortarConstraint for EqualValueConstraint {
    fn lagrange_variable(&self) -> VariableId {
        self.lagrange
    }

    fn secondary_variable(&self) -> VariableId {
        self.secondary
    }

    fn primary_variable(&self) -> VariableId {
        self.primary
    }

    fn symmetric(&self) -> bool {
        true
    }

    fn compute_residual(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        kind: LocalKind,
        residual: &mut DVector<f64>,
    ) -> eyre::Result<()> {
        let weights = fe.jxw_coord(FeContext::MortarSegment)?;
        let table = fe.shape(context_of(kind), self.variable_of(kind))?;
        let mut integrand = Vec::new();
        match kind {
            LocalKind::Lower => {
                fe.interpolate(FeContext::Face, self.secondary, &solution.current, &mut integrand)?;
                if fe.neighbor().is_some() {
                    let mut u_primary = Vec::new();
                    fe.interpolate(FeContext::Neighbor, self.primary, &solution.current, &mut u_primary)?;
                    for (value, u_p) in integrand.iter_mut().zip(&u_primary) {
                        *value -= u_p;
                    }
                }
            }
            LocalKind::Element | LocalKind::Neighbor => {
                fe.interpolate(FeContext::Lower, self.lagrange, &solution.current, &mut integrand)?;
            }
        }
        if integrand.len() != weights.len() {
            return Err(eyre!(
                "{} segment quadrature points but {} points on the {kind:?} element",
                weights.len(),
                integrand.len()
            ));
        }
        let sign = Self::sign(kind);
        for (qp, (w, value)) in weights.iter().zip(&integrand).enumerate() {
            for (i, r_i) in residual.iter_mut().enumerate() {
                *r_i += sign * value * table.phi(i, qp) * w;
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
        // The constraint is linear in λ and u, λ does not couple to itself and u couples only
        // through λ
        let sign = match (row_kind, col_kind) {
            (LocalKind::Lower, LocalKind::Lower) => return Ok(()),
            (LocalKind::Lower, other) | (other, LocalKind::Lower) => Self::sign(other),
            _ => return Ok(()),
        };
        let weights = fe.jxw_coord(FeContext::MortarSegment)?;
        let rows = fe.shape(context_of(row_kind), self.variable_of(row_kind))?;
        let cols = fe.shape(context_of(col_kind), self.variable_of(col_kind))?;
        for (qp, w) in weights.iter().enumerate() {
            for j in 0..jacobian.ncols() {
                for i in 0..jacobian.nrows() {
                    jacobian[(i, j)] += sign * cols.phi(j, qp) * rows.phi(i, qp) * w;
                }
            }
        }
        Ok(())
    }
}
