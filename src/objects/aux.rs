use crate::assembly::FeView;
use crate::mapping::FeContext;
use crate::objects::{impl_physics_object, AuxKernel, ObjectBase};
use crate::system::{SolutionState, VariableId};

/// Element average `∫ u / ∫ 1` of a coupled field.
#[derive(Debug, Clone)]
pub struct ElementAverageAux {
    base: ObjectBase,
    variable: VariableId,
    coupled: VariableId,
}

impl ElementAverageAux {
    pub fn new(base: ObjectBase, variable: VariableId, coupled: VariableId) -> Self {
        Self {
            base,
            variable,
            coupled,
        }
    }
}

impl_physics_object!(ElementAverageAux);

impl AuxKernel for ElementAverageAux {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn compute_value(&self, fe: &FeView, solution: &SolutionState) -> eyre::Result<f64> {
        let weights = fe.jxw_coord(FeContext::Volume)?;
        let mut u = Vec::new();
        fe.interpolate(FeContext::Volume, self.coupled, &solution.current, &mut u)?;
        let integral: f64 = weights.iter().zip(&u).map(|(w, u)| w * u).sum();
        let measure: f64 = weights.iter().sum();
        Ok(integral / measure)
    }
}

/// Volume (area, length) of the element.
#[derive(Debug, Clone)]
pub struct ElementVolumeAux {
    base: ObjectBase,
    variable: VariableId,
}

impl ElementVolumeAux {
    pub fn new(base: ObjectBase, variable: VariableId) -> Self {
        Self { base, variable }
    }
}

impl_physics_object!(ElementVolumeAux);

impl AuxKernel for ElementVolumeAux {
    fn variable(&self) -> VariableId {
        self.variable
    }

    fn compute_value(&self, fe: &FeView, _solution: &SolutionState) -> eyre::Result<f64> {
        Ok(fe.volume(FeContext::Volume)?)
    }
}
