use crate::element::{BoundaryId, Elem, ElemType, InteriorParent, SubdomainId};
use crate::error::AssemblyError;
use itertools::Itertools;
use nalgebra::Point3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod procedural;

/// Unstructured mesh of [`Elem`]s with side neighbor and boundary lookup.
///
/// Elements of the mesh dimension take part in the neighbor search. Lower-dimensional elements
/// (added with [`Mesh::add_lower_d_elements`]) are stored after them and refer to their interior
/// parent instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    dim: usize,
    points: Vec<Point3<f64>>,
    elems: Vec<Elem>,
    /// `neighbors[elem][side]` is the `(elem, side)` pair on the other side, if any.
    neighbors: Vec<Vec<Option<(usize, usize)>>>,
    boundary_sides: BTreeMap<(usize, usize), Vec<BoundaryId>>,
    lower_d_elems: BTreeMap<(usize, usize), usize>,
}

impl Mesh {
    /// Constructs a mesh from global points and `(type, global nodes, subdomain)` cells.
    ///
    /// Element ids are the cell indices.
    pub fn from_cells(
        dim: usize,
        points: Vec<Point3<f64>>,
        cells: impl IntoIterator<Item = (ElemType, Vec<usize>, SubdomainId)>,
    ) -> Result<Self, AssemblyError> {
        let mut elems = Vec::new();
        for (id, (elem_type, nodes, subdomain)) in cells.into_iter().enumerate() {
            if elem_type.dim() != dim {
                return Err(AssemblyError::InvalidMesh {
                    message: format!("element {id} of type {elem_type:?} does not have mesh dimension {dim}"),
                });
            }
            let elem_points = nodes
                .iter()
                .map(|&n| {
                    points.get(n).copied().ok_or(AssemblyError::IndexOutOfBounds {
                        index: n,
                        len: points.len(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            elems.push(Elem::new(id, elem_type, nodes, elem_points, subdomain)?);
        }

        let mut mesh = Self {
            dim,
            points,
            elems,
            neighbors: Vec::new(),
            boundary_sides: BTreeMap::new(),
            lower_d_elems: BTreeMap::new(),
        };
        mesh.compute_neighbors();
        Ok(mesh)
    }

    fn compute_neighbors(&mut self) {
        let mut first_seen: FxHashMap<Vec<usize>, (usize, usize)> = FxHashMap::default();
        let mut neighbors: Vec<Vec<Option<(usize, usize)>>> =
            self.elems.iter().map(|e| vec![None; e.n_sides()]).collect();
        for elem in &self.elems {
            for side in 0..elem.n_sides() {
                let Some(key) = elem.side_key(side) else {
                    continue;
                };
                match first_seen.remove(&key) {
                    Some((other, other_side)) => {
                        neighbors[elem.id()][side] = Some((other, other_side));
                        neighbors[other][other_side] = Some((elem.id(), side));
                    }
                    None => {
                        first_seen.insert(key, (elem.id(), side));
                    }
                }
            }
        }
        self.neighbors = neighbors;
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn elems(&self) -> &[Elem] {
        &self.elems
    }

    pub fn n_elems(&self) -> usize {
        self.elems.len()
    }

    pub fn elem(&self, id: usize) -> Result<&Elem, AssemblyError> {
        self.elems.get(id).ok_or(AssemblyError::IndexOutOfBounds {
            index: id,
            len: self.elems.len(),
        })
    }

    /// Elements of the mesh dimension.
    pub fn volume_elems(&self) -> impl Iterator<Item = &Elem> {
        let dim = self.dim;
        self.elems.iter().filter(move |e| e.dim() == dim)
    }

    /// Lower-dimensional elements in the given subdomain.
    pub fn lower_d_elems(&self, subdomain: SubdomainId) -> impl Iterator<Item = &Elem> {
        let dim = self.dim;
        self.elems
            .iter()
            .filter(move |e| e.dim() < dim && e.subdomain() == subdomain)
    }

    /// The `(elem, side)` pair across side `side` of `elem`, if the side is internal.
    pub fn neighbor(&self, elem: usize, side: usize) -> Option<(usize, usize)> {
        self.neighbors
            .get(elem)
            .and_then(|sides| sides.get(side))
            .copied()
            .flatten()
    }

    /// Sides of volume elements without a neighbor.
    pub fn exterior_sides(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.volume_elems().flat_map(move |elem| {
            (0..elem.n_sides())
                .filter(move |&side| self.neighbor(elem.id(), side).is_none())
                .map(move |side| (elem.id(), side))
        })
    }

    pub fn add_boundary_side(&mut self, elem: usize, side: usize, id: BoundaryId) {
        let ids = self.boundary_sides.entry((elem, side)).or_default();
        if !ids.contains(&id) {
            ids.push(id);
            ids.sort_unstable();
        }
    }

    /// Labels exterior sides with the boundary id returned for the element and the side's vertex
    /// centroid.
    pub fn label_exterior_sides(&mut self, label: impl Fn(&Elem, &Point3<f64>) -> Option<BoundaryId>) {
        let sides = self.exterior_sides().collect_vec();
        for (elem, side) in sides {
            let elem_ref = &self.elems[elem];
            let Some(local_nodes) = elem_ref.elem_type().side_nodes(side) else {
                continue;
            };
            let n_vertices = elem_ref
                .elem_type()
                .side_type()
                .map_or(1, |side_type| side_type.n_vertices());
            let centroid = local_nodes[..n_vertices]
                .iter()
                .fold(Point3::origin(), |acc, &i| acc + elem_ref.points()[i].coords)
                / n_vertices as f64;
            if let Some(id) = label(elem_ref, &centroid) {
                self.add_boundary_side(elem, side, id);
            }
        }
    }

    pub fn side_boundary_ids(&self, elem: usize, side: usize) -> &[BoundaryId] {
        self.boundary_sides
            .get(&(elem, side))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All `(elem, side)` pairs carrying the boundary id, in ascending order.
    pub fn boundary_sides(&self, id: BoundaryId) -> Vec<(usize, usize)> {
        self.boundary_sides
            .iter()
            .filter(|(_, ids)| ids.contains(&id))
            .map(|(&key, _)| key)
            .collect()
    }

    /// Adds one lower-dimensional element per side with the boundary id, in the given subdomain.
    ///
    /// Returns the ids of the new elements.
    pub fn add_lower_d_elements(
        &mut self,
        boundary: BoundaryId,
        subdomain: SubdomainId,
    ) -> Result<Vec<usize>, AssemblyError> {
        let mut added = Vec::new();
        for (elem, side) in self.boundary_sides(boundary) {
            if self.lower_d_elems.contains_key(&(elem, side)) {
                continue;
            }
            let id = self.elems.len();
            let lower = self.elems[elem]
                .build_side(side)?
                .with_id(id)
                .with_subdomain(subdomain)
                .with_interior_parent(InteriorParent { elem, side });
            self.elems.push(lower);
            self.neighbors.push(Vec::new());
            self.lower_d_elems.insert((elem, side), id);
            added.push(id);
        }
        Ok(added)
    }

    /// The lower-dimensional element built on side `side` of `elem`.
    pub fn lower_d_elem_of_side(&self, elem: usize, side: usize) -> Option<usize> {
        self.lower_d_elems.get(&(elem, side)).copied()
    }
}
