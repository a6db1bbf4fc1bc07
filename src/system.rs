//! Variables, coupling, tags and coordinate systems of a simulation.
//!
//! A [`System`] is built once with a [`SystemBuilder`] and shared immutably (behind an [`Arc`])
//! by every per-thread assembly.
use crate::assembly::{sparsity_pattern, CouplingMatrix, TagRegistry};
use crate::element::{Elem, SubdomainId};
use crate::error::AssemblyError;
use crate::fe::{FeFamily, FeType};
use crate::mapping::{CoordinateSystem, ShapeNeeds};
use crate::mesh::Mesh;
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

mod dof_map;

pub use dof_map::LagrangeDofMap;

/// Index of a variable in its system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Field variable of the nonlinear system.
    Nonlinear,
    /// Global variable of the nonlinear system without shape functions.
    Scalar,
    /// Auxiliary field, computed by auxiliary kernels rather than solved for.
    Aux,
}

/// The two dof numberings of a system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DofSpace {
    Solution,
    Aux,
}

impl VariableKind {
    pub fn space(self) -> DofSpace {
        match self {
            Self::Nonlinear | Self::Scalar => DofSpace::Solution,
            Self::Aux => DofSpace::Aux,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub fe_type: FeType,
    pub kind: VariableKind,
    /// Factor applied to every residual and Jacobian row of the variable.
    pub scaling: f64,
    /// Subdomains the variable lives on (`None`: everywhere).
    pub subdomains: Option<BTreeSet<SubdomainId>>,
    pub needs: ShapeNeeds,
}

impl VariableInfo {
    pub fn is_active_on(&self, subdomain: SubdomainId) -> bool {
        self.subdomains
            .as_ref()
            .map_or(true, |subdomains| subdomains.contains(&subdomain))
    }

    pub fn is_field(&self) -> bool {
        self.fe_type.has_shape_functions()
    }
}

/// Degree of freedom numbering consumed by the assembly.
pub trait DofMap: Debug + Send + Sync {
    fn n_dofs(&self, space: DofSpace) -> usize;

    /// Replaces the contents of `out` with the dofs of `var` on `elem`, in local shape function
    /// order. Left empty when the variable does not live on the element.
    fn dof_indices(&self, elem: &Elem, var: VariableId, out: &mut Vec<usize>);

    /// The dof of `var` at a mesh node, for nodal variables.
    fn node_dof(&self, node: usize, var: VariableId) -> Option<usize>;

    /// All dofs of `var`, sorted.
    fn variable_dofs(&self, var: VariableId) -> Vec<usize>;
}

#[derive(Debug, Clone)]
enum CouplingSpec {
    Full,
    Diagonal,
    Pairs(Vec<(VariableId, VariableId)>),
}

/// Collects variables, tags and per-subdomain settings before building a [`System`].
#[derive(Debug, Clone)]
pub struct SystemBuilder {
    variables: Vec<VariableInfo>,
    coupling: CouplingSpec,
    tags: TagRegistry,
    coordinate_systems: BTreeMap<SubdomainId, CoordinateSystem>,
    displacements: Vec<VariableId>,
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            coupling: CouplingSpec::Full,
            tags: TagRegistry::new(),
            coordinate_systems: BTreeMap::new(),
            displacements: Vec::new(),
        }
    }
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_variable(&mut self, name: &str, fe_type: FeType, kind: VariableKind) -> Result<VariableId, AssemblyError> {
        if self.variables.iter().any(|v| v.name == name) {
            return Err(AssemblyError::InvalidParameter {
                object: name.to_string(),
                message: "a variable with this name already exists".to_string(),
            });
        }
        self.variables.push(VariableInfo {
            name: name.to_string(),
            fe_type,
            kind,
            scaling: 1.0,
            subdomains: None,
            needs: ShapeNeeds::default(),
        });
        Ok(VariableId(self.variables.len() - 1))
    }

    /// Adds a variable of the nonlinear system. Variables of the `Scalar` family become scalar
    /// variables.
    pub fn add_variable(&mut self, name: &str, fe_type: FeType) -> Result<VariableId, AssemblyError> {
        let kind = match fe_type.family {
            FeFamily::Scalar => VariableKind::Scalar,
            _ => VariableKind::Nonlinear,
        };
        self.push_variable(name, fe_type, kind)
    }

    pub fn add_aux_variable(&mut self, name: &str, fe_type: FeType) -> Result<VariableId, AssemblyError> {
        if fe_type.family == FeFamily::Scalar {
            return Err(AssemblyError::InvalidParameter {
                object: name.to_string(),
                message: "auxiliary variables need shape functions".to_string(),
            });
        }
        self.push_variable(name, fe_type, VariableKind::Aux)
    }

    fn variable_mut(&mut self, var: VariableId) -> Result<&mut VariableInfo, AssemblyError> {
        let len = self.variables.len();
        self.variables
            .get_mut(var.0)
            .ok_or(AssemblyError::IndexOutOfBounds { index: var.0, len })
    }

    pub fn set_scaling(&mut self, var: VariableId, scaling: f64) -> Result<&mut Self, AssemblyError> {
        self.variable_mut(var)?.scaling = scaling;
        Ok(self)
    }

    pub fn restrict_to_subdomains(
        &mut self,
        var: VariableId,
        subdomains: impl IntoIterator<Item = SubdomainId>,
    ) -> Result<&mut Self, AssemblyError> {
        self.variable_mut(var)?.subdomains = Some(subdomains.into_iter().collect());
        Ok(self)
    }

    pub fn require_second_derivatives(&mut self, var: VariableId) -> Result<&mut Self, AssemblyError> {
        self.variable_mut(var)?.needs.second_derivatives = true;
        Ok(self)
    }

    pub fn require_curl(&mut self, var: VariableId) -> Result<&mut Self, AssemblyError> {
        self.variable_mut(var)?.needs.curl = true;
        Ok(self)
    }

    /// Couples only each variable with itself.
    pub fn diagonal_coupling(&mut self) -> &mut Self {
        self.coupling = CouplingSpec::Diagonal;
        self
    }

    /// Couples exactly the given pairs (the diagonal is always coupled).
    pub fn coupling_pairs(&mut self, pairs: impl IntoIterator<Item = (VariableId, VariableId)>) -> &mut Self {
        self.coupling = CouplingSpec::Pairs(pairs.into_iter().collect());
        self
    }

    pub fn add_vector_tag(&mut self, name: &str) -> Result<crate::assembly::VectorTag, AssemblyError> {
        self.tags.add_vector_tag(name)
    }

    pub fn add_matrix_tag(&mut self, name: &str) -> Result<crate::assembly::MatrixTag, AssemblyError> {
        self.tags.add_matrix_tag(name)
    }

    pub fn coordinate_system(&mut self, subdomain: SubdomainId, coordinate_system: CoordinateSystem) -> &mut Self {
        self.coordinate_systems
            .insert(subdomain, coordinate_system);
        self
    }

    /// Declares the displacement variables (one per mesh dimension) whose dofs seed AD geometry.
    pub fn displacements(&mut self, vars: impl IntoIterator<Item = VariableId>) -> &mut Self {
        self.displacements = vars.into_iter().collect();
        self
    }

    fn coupling_matrix(&self) -> Result<CouplingMatrix, AssemblyError> {
        let n = self.variables.len();
        let mut coupling = CouplingMatrix::empty(n);
        let solution = |i: usize| self.variables[i].kind.space() == DofSpace::Solution;
        match &self.coupling {
            CouplingSpec::Full => {
                for i in (0..n).filter(|&i| solution(i)) {
                    for j in (0..n).filter(|&j| solution(j)) {
                        coupling.set(i, j, true);
                    }
                }
            }
            CouplingSpec::Diagonal => {}
            CouplingSpec::Pairs(pairs) => {
                for &(VariableId(i), VariableId(j)) in pairs {
                    if i >= n || j >= n {
                        return Err(AssemblyError::IndexOutOfBounds { index: i.max(j), len: n });
                    }
                    if solution(i) && solution(j) {
                        coupling.set(i, j, true);
                    }
                }
            }
        }
        for i in (0..n).filter(|&i| solution(i)) {
            coupling.set(i, i, true);
        }
        Ok(coupling)
    }

    /// Builds the system with a [`LagrangeDofMap`] for the mesh.
    pub fn build(&self, mesh: &Mesh) -> Result<Arc<System>, AssemblyError> {
        let dof_map = LagrangeDofMap::new(mesh, &self.variables)?;
        self.build_with_dof_map(mesh, Box::new(dof_map))
    }

    pub fn build_with_dof_map(&self, mesh: &Mesh, dof_map: Box<dyn DofMap>) -> Result<Arc<System>, AssemblyError> {
        if let Some(&VariableId(bad)) = self
            .displacements
            .iter()
            .find(|v| self.variables.get(v.0).map_or(true, |info| !info.fe_type.is_nodal()))
        {
            return Err(AssemblyError::InvalidParameter {
                object: format!("displacement variable {bad}"),
                message: "displacements must be nodal variables".to_string(),
            });
        }
        Ok(Arc::new(System {
            mesh_dim: mesh.dim(),
            variables: self.variables.clone(),
            coupling: self.coupling_matrix()?,
            tags: self.tags.clone(),
            coordinate_systems: self.coordinate_systems.clone(),
            displacements: self.displacements.clone(),
            dof_map,
        }))
    }
}

/// Immutable description of the variables and dofs assembled for.
#[derive(Debug)]
pub struct System {
    mesh_dim: usize,
    variables: Vec<VariableInfo>,
    coupling: CouplingMatrix,
    tags: TagRegistry,
    coordinate_systems: BTreeMap<SubdomainId, CoordinateSystem>,
    displacements: Vec<VariableId>,
    dof_map: Box<dyn DofMap>,
}

impl System {
    pub fn mesh_dim(&self) -> usize {
        self.mesh_dim
    }

    pub fn n_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    pub fn variable(&self, var: VariableId) -> Result<&VariableInfo, AssemblyError> {
        self.variables.get(var.0).ok_or(AssemblyError::IndexOutOfBounds {
            index: var.0,
            len: self.variables.len(),
        })
    }

    pub fn variable_by_name(&self, name: &str) -> Result<VariableId, AssemblyError> {
        self.variables
            .iter()
            .position(|v| v.name == name)
            .map(VariableId)
            .ok_or_else(|| AssemblyError::UnknownVariable { name: name.to_string() })
    }

    /// Variables of the nonlinear system (field and scalar).
    pub fn solution_variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind.space() == DofSpace::Solution)
            .map(|(i, _)| VariableId(i))
    }

    pub fn coupling(&self) -> &CouplingMatrix {
        &self.coupling
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn coordinate_system(&self, subdomain: SubdomainId) -> CoordinateSystem {
        self.coordinate_systems
            .get(&subdomain)
            .copied()
            .unwrap_or_default()
    }

    pub fn displacements(&self) -> &[VariableId] {
        &self.displacements
    }

    pub fn dof_map(&self) -> &dyn DofMap {
        self.dof_map.as_ref()
    }

    /// Highest FE order among field variables, used for the default quadrature order.
    pub fn max_field_order(&self) -> usize {
        self.variables
            .iter()
            .filter(|v| v.is_field())
            .map(|v| usize::from(v.fe_type.order))
            .max()
            .unwrap_or(1)
    }

    /// Distinct FE types of field variables with the union of their shape needs.
    pub fn fe_types(&self) -> Vec<(FeType, ShapeNeeds)> {
        let mut types: BTreeMap<FeType, ShapeNeeds> = BTreeMap::new();
        for v in self.variables.iter().filter(|v| v.is_field()) {
            let entry = types.entry(v.fe_type).or_default();
            *entry = entry.union(v.needs);
        }
        types.into_iter().collect()
    }

    /// All solution dofs of `elem`, over every variable.
    pub fn element_solution_dofs(&self, elem: &Elem, out: &mut Vec<usize>) {
        out.clear();
        let mut var_dofs = Vec::new();
        for var in self.solution_variables() {
            self.dof_map.dof_indices(elem, var, &mut var_dofs);
            out.extend_from_slice(&var_dofs);
        }
    }

    /// Sparsity pattern of the solution space coupling the dofs of every element with itself,
    /// with its side neighbors, and within each of the additional element pairs.
    pub fn sparsity_pattern(&self, mesh: &Mesh, extra_pairs: &[(usize, usize)]) -> Result<SparsityPattern, AssemblyError> {
        let elem_dofs: Vec<Vec<usize>> = mesh
            .elems()
            .iter()
            .map(|elem| {
                let mut dofs = Vec::new();
                self.element_solution_dofs(elem, &mut dofs);
                dofs
            })
            .collect();
        let mut pairs: Vec<(usize, usize)> = (0..mesh.n_elems()).map(|e| (e, e)).collect();
        for elem in mesh.volume_elems() {
            for side in 0..elem.n_sides() {
                if let Some((neighbor, _)) = mesh.neighbor(elem.id(), side) {
                    pairs.push((elem.id(), neighbor));
                }
            }
        }
        for &(a, b) in extra_pairs {
            mesh.elem(a)?;
            mesh.elem(b)?;
            pairs.push((a, b));
            pairs.push((b, a));
        }
        let groups = pairs
            .iter()
            .map(|&(a, b)| (elem_dofs[a].as_slice(), elem_dofs[b].as_slice()));
        sparsity_pattern(self.dof_map.n_dofs(DofSpace::Solution), groups)
    }

    /// Fills AD seeds for the nodes of `elem` from the displacement variables.
    pub fn nodal_seeds(&self, elem: &Elem, out: &mut Vec<[Option<usize>; 3]>) {
        out.clear();
        out.extend(elem.nodes().iter().map(|&node| {
            let mut seeds = [None; 3];
            for (d, &var) in self.displacements.iter().take(3).enumerate() {
                seeds[d] = self.dof_map.node_dof(node, var);
            }
            seeds
        }));
    }
}

/// Current and previous solution vectors of the nonlinear system.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionState {
    pub current: DVector<f64>,
    pub old: Option<DVector<f64>>,
    pub older: Option<DVector<f64>>,
}

impl SolutionState {
    pub fn new(current: DVector<f64>) -> Self {
        Self {
            current,
            old: None,
            older: None,
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(DVector::zeros(n))
    }

    pub fn with_old(mut self, old: DVector<f64>) -> Self {
        self.old = Some(old);
        self
    }

    pub fn with_older(mut self, older: DVector<f64>) -> Self {
        self.older = Some(older);
        self
    }
}
