//! Loops driving an [`Assembly`] over elements, sides and mortar segments.
//!
//! A loop runs the physics objects of an [`ObjectSet`](crate::objects::ObjectSet) on the current
//! geometry, caches the local blocks after each element and drains the cache into the global
//! targets every [`AssemblyOptions::cache_flush_interval`](crate::config::AssemblyOptions) elements
//! and at the end of the range.
use crate::assembly::{Assembly, FeView, JacobianType, LocalKind, MatrixTag, TagSet, VectorTag};
use crate::system::{System, VariableId};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

mod aux;
mod element;
mod mortar;
mod threaded;

pub use aux::AuxLoop;
pub use element::ElementLoop;
pub use mortar::MortarLoop;
pub use threaded::ThreadedAssembler;

/// What a loop computes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compute {
    Residual,
    Jacobian,
    ResidualAndJacobian,
}

impl Compute {
    pub fn residual(self) -> bool {
        matches!(self, Self::Residual | Self::ResidualAndJacobian)
    }

    pub fn jacobian(self) -> bool {
        matches!(self, Self::Jacobian | Self::ResidualAndJacobian)
    }
}

fn has_dofs(assembly: &Assembly, kind: LocalKind, var: VariableId) -> bool {
    !assembly.fe().dof_indices(kind, var).is_empty()
}

/// Whether the `(ivar, jvar)` block of `jacobian_type` exists for the current geometry.
fn has_jacobian_block(
    assembly: &Assembly,
    system: &System,
    jacobian_type: JacobianType,
    ivar: VariableId,
    jvar: VariableId,
) -> bool {
    system.coupling().is_coupled(ivar.0, jvar.0)
        && has_dofs(assembly, jacobian_type.row_kind(), ivar)
        && has_dofs(assembly, jacobian_type.col_kind(), jvar)
}

fn accumulate_residual(
    assembly: &mut Assembly,
    kind: LocalKind,
    var: VariableId,
    tags: &TagSet<VectorTag>,
    compute: impl FnOnce(&FeView<'_>, &mut DVector<f64>) -> eyre::Result<()>,
) -> eyre::Result<()> {
    let (fe, residual) = assembly.local_residual(kind, var)?;
    compute(&fe, residual)?;
    assembly.accumulate_tagged_local_residual(kind, var, tags)?;
    Ok(())
}

fn accumulate_jacobian(
    assembly: &mut Assembly,
    jacobian_type: JacobianType,
    (ivar, jvar): (VariableId, VariableId),
    tags: &TagSet<MatrixTag>,
    symmetric: bool,
    compute: impl FnOnce(&FeView<'_>, &mut DMatrix<f64>) -> eyre::Result<()>,
) -> eyre::Result<()> {
    let (fe, jacobian) = assembly.local_jacobian(jacobian_type, ivar, jvar)?;
    compute(&fe, jacobian)?;
    if symmetric {
        assembly.accumulate_tagged_symmetric(jacobian_type, ivar, jvar, tags)?;
    } else {
        assembly.accumulate_tagged_local_matrix(jacobian_type, ivar, jvar, tags)?;
    }
    Ok(())
}
