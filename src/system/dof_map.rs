use crate::element::Elem;
use crate::error::AssemblyError;
use crate::fe::{n_shape_functions, FeFamily};
use crate::mesh::Mesh;
use crate::system::{DofMap, DofSpace, VariableId, VariableInfo};
use log::debug;

#[derive(Debug, Clone)]
enum VariableDofs {
    /// Dof per mesh node, for nodes of elements the variable lives on.
    Nodal(Vec<Option<usize>>),
    /// First dof and dof count per element.
    Elemental(Vec<Option<(usize, usize)>>),
    /// Contiguous global dofs.
    Global { first: usize, count: usize },
}

/// Dof numbering for Lagrange, L2-Lagrange, monomial and scalar variables.
///
/// Dofs are numbered variable by variable within each [`DofSpace`], in the order the variables
/// were added. Nodal dofs of a variable follow the element order of the mesh.
#[derive(Debug, Clone)]
pub struct LagrangeDofMap {
    variables: Vec<VariableDofs>,
    n_solution_dofs: usize,
    n_aux_dofs: usize,
}

impl LagrangeDofMap {
    pub fn new(mesh: &Mesh, variables: &[VariableInfo]) -> Result<Self, AssemblyError> {
        let mut counters = [0usize; 2];
        let mut numbered = Vec::with_capacity(variables.len());
        for info in variables {
            let counter = match info.kind.space() {
                DofSpace::Solution => &mut counters[0],
                DofSpace::Aux => &mut counters[1],
            };
            let active_elems = || {
                mesh.elems()
                    .iter()
                    .filter(|elem| info.is_active_on(elem.subdomain()))
            };
            let dofs = match info.fe_type.family {
                FeFamily::Lagrange => {
                    let mut node_dofs = vec![None; mesh.points().len()];
                    for elem in active_elems() {
                        let n = n_shape_functions(info.fe_type, elem.elem_type())?;
                        for &node in &elem.nodes()[..n] {
                            if node_dofs[node].is_none() {
                                node_dofs[node] = Some(*counter);
                                *counter += 1;
                            }
                        }
                    }
                    VariableDofs::Nodal(node_dofs)
                }
                FeFamily::L2Lagrange | FeFamily::Monomial => {
                    let mut elem_dofs = vec![None; mesh.n_elems()];
                    for elem in active_elems() {
                        let n = n_shape_functions(info.fe_type, elem.elem_type())?;
                        elem_dofs[elem.id()] = Some((*counter, n));
                        *counter += n;
                    }
                    VariableDofs::Elemental(elem_dofs)
                }
                FeFamily::Scalar => {
                    let count = usize::from(info.fe_type.order);
                    let first = *counter;
                    *counter += count;
                    VariableDofs::Global { first, count }
                }
            };
            numbered.push(dofs);
        }
        debug!(
            "Numbered {} solution and {} auxiliary dofs for {} variables",
            counters[0],
            counters[1],
            variables.len()
        );
        Ok(Self {
            variables: numbered,
            n_solution_dofs: counters[0],
            n_aux_dofs: counters[1],
        })
    }
}

impl DofMap for LagrangeDofMap {
    fn n_dofs(&self, space: DofSpace) -> usize {
        match space {
            DofSpace::Solution => self.n_solution_dofs,
            DofSpace::Aux => self.n_aux_dofs,
        }
    }

    fn dof_indices(&self, elem: &Elem, var: VariableId, out: &mut Vec<usize>) {
        out.clear();
        match self.variables.get(var.0) {
            Some(VariableDofs::Nodal(node_dofs)) => {
                // Nodes of the element in local order; vertex nodes come first
                let dofs = elem.nodes().iter().map(|&node| node_dofs.get(node).copied().flatten());
                for dof in dofs {
                    match dof {
                        Some(dof) => out.push(dof),
                        None => break,
                    }
                }
                // A partial match means the variable does not live on this element
                if out.len() < elem.elem_type().n_vertices() {
                    out.clear();
                }
            }
            Some(VariableDofs::Elemental(elem_dofs)) => {
                if let Some(Some((first, count))) = elem_dofs.get(elem.id()) {
                    out.extend(*first..first + count);
                }
            }
            Some(VariableDofs::Global { first, count }) => out.extend(*first..first + count),
            None => {}
        }
    }

    fn node_dof(&self, node: usize, var: VariableId) -> Option<usize> {
        match self.variables.get(var.0) {
            Some(VariableDofs::Nodal(node_dofs)) => node_dofs.get(node).copied().flatten(),
            _ => None,
        }
    }

    fn variable_dofs(&self, var: VariableId) -> Vec<usize> {
        let mut dofs: Vec<usize> = match self.variables.get(var.0) {
            Some(VariableDofs::Nodal(node_dofs)) => node_dofs.iter().flatten().copied().collect(),
            Some(VariableDofs::Elemental(elem_dofs)) => elem_dofs
                .iter()
                .flatten()
                .flat_map(|&(first, count)| first..first + count)
                .collect(),
            Some(VariableDofs::Global { first, count }) => (*first..first + count).collect(),
            None => Vec::new(),
        };
        dofs.sort_unstable();
        dofs
    }
}
