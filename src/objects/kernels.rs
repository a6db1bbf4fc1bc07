use crate::assembly::FeView;
use crate::mapping::FeContext;
use crate::objects::{impl_physics_object, Kernel, ObjectBase};
use crate::system::{SolutionState, VariableId};
use nalgebra::{DMatrix, DVector};

/// `∫ k ∇u · ∇φ_i`.
#[derive(Debug, Clone)]
pub struct Diffusion {
    base: ObjectBase,
    variable: VariableId,
    coefficient: f64,
}

impl Diffusion {
    pub fn new(base: ObjectBase, variable: VariableId, coefficient: f64) -> Self {
        Self {
            base,
            variable,
            coefficient,
        }
    }
}

impl_physics_object!(Diffusion);

impl Kernel for Diffusion {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn compute_residual(&self, fe: &FeView, solution: &SolutionState, residual: &mut DVector<f64>) -> eyre::Result<()> {
        let table = fe.shape(FeContext::Volume, self.variable)?;
        let weights = fe.jxw_coord(FeContext::Volume)?;
        let mut grad_u = Vec::new();
        fe.interpolate_gradient(FeContext::Volume, self.variable, &solution.current, &mut grad_u)?;
        for (qp, (w, grad_u)) in weights.iter().zip(&grad_u).enumerate() {
            for (i, r_i) in residual.iter_mut().enumerate() {
                *r_i += self.coefficient * grad_u.dot(table.grad_phi(i, qp)) * w;
            }
        }
        Ok(())
    }

    fn compute_jacobian(
        &self,
        fe: &FeView,
        _solution: &SolutionState,
        jvar: VariableId,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()> {
        if jvar != self.variable {
            return Ok(());
        }
        let table = fe.shape(FeContext::Volume, self.variable)?;
        let weights = fe.jxw_coord(FeContext::Volume)?;
        for (qp, w) in weights.iter().enumerate() {
            for j in 0..jacobian.ncols() {
                let grad_phi_j = table.grad_phi(j, qp);
                for i in 0..jacobian.nrows() {
                    jacobian[(i, j)] += self.coefficient * grad_phi_j.dot(table.grad_phi(i, qp)) * w;
                }
            }
        }
        Ok(())
    }
}

/// `-∫ f φ_i` for a constant source `f`.
#[derive(Debug, Clone)]
pub struct BodyForce {
    base: ObjectBase,
    variable: VariableId,
    value: f64,
}

impl BodyForce {
    pub fn new(base: ObjectBase, variable: VariableId, value: f64) -> Self {
        Self { base, variable, value }
    }
}

impl_physics_object!(BodyForce);

impl Kernel for BodyForce {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn jacobian_variables(&self) -> Vec<VariableId> {
        Vec::new()
    }

    fn compute_residual(&self, fe: &FeView, _solution: &SolutionState, residual: &mut DVector<f64>) -> eyre::Result<()> {
        let table = fe.shape(FeContext::Volume, self.variable)?;
        let weights = fe.jxw_coord(FeContext::Volume)?;
        for (qp, w) in weights.iter().enumerate() {
            for (i, r_i) in residual.iter_mut().enumerate() {
                *r_i -= self.value * table.phi(i, qp) * w;
            }
        }
        Ok(())
    }

    fn compute_jacobian(&self, _: &FeView, _: &SolutionState, _: VariableId, _: &mut DMatrix<f64>) -> eyre::Result<()> {
        Ok(())
    }
}

/// `∫ c u φ_i`, a mass-like term contributing to the time tags by default.
#[derive(Debug, Clone)]
pub struct Reaction {
    base: ObjectBase,
    variable: VariableId,
    rate: f64,
}

impl Reaction {
    pub fn new(base: ObjectBase, variable: VariableId, rate: f64) -> Self {
        Self { base, variable, rate }
    }
}

impl_physics_object!(Reaction);

impl Kernel for Reaction {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn compute_residual(&self, fe: &FeView, solution: &SolutionState, residual: &mut DVector<f64>) -> eyre::Result<()> {
        let table = fe.shape(FeContext::Volume, self.variable)?;
        let weights = fe.jxw_coord(FeContext::Volume)?;
        let mut u = Vec::new();
        fe.interpolate(FeContext::Volume, self.variable, &solution.current, &mut u)?;
        for (qp, (w, u)) in weights.iter().zip(&u).enumerate() {
            for (i, r_i) in residual.iter_mut().enumerate() {
                *r_i += self.rate * u * table.phi(i, qp) * w;
            }
        }
        Ok(())
    }

    fn compute_jacobian(
        &self,
        fe: &FeView,
        _solution: &SolutionState,
        jvar: VariableId,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()> {
        if jvar != self.variable {
            return Ok(());
        }
        let table = fe.shape(FeContext::Volume, self.variable)?;
        let weights = fe.jxw_coord(FeContext::Volume)?;
        for (qp, w) in weights.iter().enumerate() {
            for j in 0..jacobian.ncols() {
                for i in 0..jacobian.nrows() {
                    jacobian[(i, j)] += self.rate * table.phi(j, qp) * table.phi(i, qp) * w;
                }
            }
        }
        Ok(())
    }
}
