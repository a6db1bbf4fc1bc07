//! Element types, reference element topology and the element records handed to the assembly.
//!
//! Reference domains: lines, quadrilaterals and hexahedra live on `[-1, 1]^d`; triangles and
//! tetrahedra are unit simplices. Side node lists are ordered such that, for a positively oriented
//! element, the side parametrization induces the outward normal.

use crate::error::AssemblyError;
use crate::fe::FeType;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_quadrature::ReferenceShape;

/// Identifier of a subdomain (mesh block).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SubdomainId(pub u16);

/// Identifier of a boundary (side set).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoundaryId(pub u16);

impl fmt::Display for SubdomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subdomain {}", self.0)
    }
}

impl fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boundary {}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElemType {
    Point1,
    Edge2,
    Edge3,
    Tri3,
    Tri6,
    Quad4,
    Quad9,
    Tet4,
    Hex8,
}

const POINT1_NODES: [[f64; 3]; 1] = [[0.0, 0.0, 0.0]];
const EDGE3_NODES: [[f64; 3]; 3] = [[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
const TRI6_NODES: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.5, 0.0, 0.0],
    [0.5, 0.5, 0.0],
    [0.0, 0.5, 0.0],
];
const QUAD9_NODES: [[f64; 3]; 9] = [
    [-1.0, -1.0, 0.0],
    [1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [-1.0, 0.0, 0.0],
    [0.0, 0.0, 0.0],
];
const TET4_NODES: [[f64; 3]; 4] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
const HEX8_NODES: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

const EDGE_SIDES: [&[usize]; 2] = [&[0], &[1]];
const TRI3_SIDES: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const TRI6_SIDES: [&[usize]; 3] = [&[0, 1, 3], &[1, 2, 4], &[2, 0, 5]];
const QUAD4_SIDES: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const QUAD9_SIDES: [&[usize]; 4] = [&[0, 1, 4], &[1, 2, 5], &[2, 3, 6], &[3, 0, 7]];
const TET4_SIDES: [&[usize]; 4] = [&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[2, 0, 3]];
const HEX8_SIDES: [&[usize]; 6] = [
    &[0, 3, 2, 1],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
    &[4, 5, 6, 7],
];

impl ElemType {
    pub fn dim(&self) -> usize {
        self.reference_shape().dim()
    }

    pub fn reference_shape(&self) -> ReferenceShape {
        match self {
            Self::Point1 => ReferenceShape::Point,
            Self::Edge2 | Self::Edge3 => ReferenceShape::Line,
            Self::Tri3 | Self::Tri6 => ReferenceShape::Triangle,
            Self::Quad4 | Self::Quad9 => ReferenceShape::Quadrilateral,
            Self::Tet4 => ReferenceShape::Tetrahedron,
            Self::Hex8 => ReferenceShape::Hexahedron,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.reference_nodes().len()
    }

    /// Number of vertex (corner) nodes. Vertices always come first in the node ordering.
    pub fn n_vertices(&self) -> usize {
        match self {
            Self::Point1 => 1,
            Self::Edge2 | Self::Edge3 => 2,
            Self::Tri3 | Self::Tri6 => 3,
            Self::Quad4 | Self::Quad9 | Self::Tet4 => 4,
            Self::Hex8 => 8,
        }
    }

    pub fn n_sides(&self) -> usize {
        self.side_table().len()
    }

    /// Polynomial order of the isoparametric geometry map.
    pub fn geometric_order(&self) -> u8 {
        match self {
            Self::Edge3 | Self::Tri6 | Self::Quad9 => 2,
            _ => 1,
        }
    }

    /// The Lagrange FE type that describes the geometry of this element type.
    pub fn geometric_fe_type(&self) -> FeType {
        FeType::lagrange(self.geometric_order())
    }

    /// The element type with the same shape whose nodes are exactly the vertices of this type.
    pub fn linear_type(&self) -> ElemType {
        match self {
            Self::Edge3 => Self::Edge2,
            Self::Tri6 => Self::Tri3,
            Self::Quad9 => Self::Quad4,
            other => *other,
        }
    }

    /// The element type with the same shape and second-order geometry, if one exists.
    pub fn quadratic_type(&self) -> Option<ElemType> {
        match self {
            Self::Edge2 | Self::Edge3 => Some(Self::Edge3),
            Self::Tri3 | Self::Tri6 => Some(Self::Tri6),
            Self::Quad4 | Self::Quad9 => Some(Self::Quad9),
            _ => None,
        }
    }

    pub fn side_type(&self) -> Option<ElemType> {
        match self {
            Self::Point1 => None,
            Self::Edge2 | Self::Edge3 => Some(Self::Point1),
            Self::Tri3 | Self::Quad4 => Some(Self::Edge2),
            Self::Tri6 | Self::Quad9 => Some(Self::Edge3),
            Self::Tet4 => Some(Self::Tri3),
            Self::Hex8 => Some(Self::Quad4),
        }
    }

    /// Local indices of the nodes on the given side, ordered as the nodes of the side element.
    pub fn side_nodes(&self, side: usize) -> Option<&'static [usize]> {
        self.side_table().get(side).copied()
    }

    /// Reference coordinates of the nodes, padded to three components.
    pub fn reference_nodes(&self) -> &'static [[f64; 3]] {
        match self {
            Self::Point1 => &POINT1_NODES,
            Self::Edge2 => &EDGE3_NODES[..2],
            Self::Edge3 => &EDGE3_NODES,
            Self::Tri3 => &TRI6_NODES[..3],
            Self::Tri6 => &TRI6_NODES,
            Self::Quad4 => &QUAD9_NODES[..4],
            Self::Quad9 => &QUAD9_NODES,
            Self::Tet4 => &TET4_NODES,
            Self::Hex8 => &HEX8_NODES,
        }
    }

    fn side_table(&self) -> &'static [&'static [usize]] {
        match self {
            Self::Point1 => &[],
            Self::Edge2 | Self::Edge3 => &EDGE_SIDES,
            Self::Tri3 => &TRI3_SIDES,
            Self::Tri6 => &TRI6_SIDES,
            Self::Quad4 => &QUAD4_SIDES,
            Self::Quad9 => &QUAD9_SIDES,
            Self::Tet4 => &TET4_SIDES,
            Self::Hex8 => &HEX8_SIDES,
        }
    }
}

/// The volumetric element and side from which a lower-dimensional element was built.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InteriorParent {
    pub elem: usize,
    pub side: usize,
}

/// An element with its node coordinates.
///
/// Coordinates are stored as three-dimensional points; unused components are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Elem {
    id: usize,
    elem_type: ElemType,
    nodes: Vec<usize>,
    points: Vec<Point3<f64>>,
    subdomain: SubdomainId,
    interior_parent: Option<InteriorParent>,
}

impl Elem {
    pub fn new(
        id: usize,
        elem_type: ElemType,
        nodes: Vec<usize>,
        points: Vec<Point3<f64>>,
        subdomain: SubdomainId,
    ) -> Result<Self, AssemblyError> {
        if nodes.len() != elem_type.n_nodes() || points.len() != elem_type.n_nodes() {
            return Err(AssemblyError::InvalidMesh {
                message: format!(
                    "element {id} of type {elem_type:?} needs {} nodes, got {} node ids and {} points",
                    elem_type.n_nodes(),
                    nodes.len(),
                    points.len()
                ),
            });
        }
        Ok(Self {
            id,
            elem_type,
            nodes,
            points,
            subdomain,
            interior_parent: None,
        })
    }

    pub fn with_interior_parent(mut self, parent: InteriorParent) -> Self {
        self.interior_parent = Some(parent);
        self
    }

    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    pub fn with_subdomain(mut self, subdomain: SubdomainId) -> Self {
        self.subdomain = subdomain;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn elem_type(&self) -> ElemType {
        self.elem_type
    }

    pub fn dim(&self) -> usize {
        self.elem_type.dim()
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn subdomain(&self) -> SubdomainId {
        self.subdomain
    }

    pub fn interior_parent(&self) -> Option<InteriorParent> {
        self.interior_parent
    }

    pub fn n_sides(&self) -> usize {
        self.elem_type.n_sides()
    }

    /// Average of the vertex coordinates.
    pub fn centroid(&self) -> Point3<f64> {
        let n = self.elem_type.n_vertices();
        let sum = self.points[..n]
            .iter()
            .fold(Point3::origin().coords, |acc, p| acc + p.coords);
        Point3::from(sum / n as f64)
    }

    /// Builds the side element of the given side.
    ///
    /// The side element keeps the id and subdomain of its parent and records the parent as its
    /// interior parent. Its reference coordinates coincide with the side parametrization used for
    /// face quadrature.
    pub fn build_side(&self, side: usize) -> Result<Elem, AssemblyError> {
        let (side_type, local_nodes) = self
            .elem_type
            .side_type()
            .zip(self.elem_type.side_nodes(side))
            .ok_or(AssemblyError::InvalidSide { elem: self.id, side })?;
        let nodes = local_nodes.iter().map(|&i| self.nodes[i]).collect();
        let points = local_nodes.iter().map(|&i| self.points[i]).collect();
        Ok(Elem {
            id: self.id,
            elem_type: side_type,
            nodes,
            points,
            subdomain: self.subdomain,
            interior_parent: Some(InteriorParent { elem: self.id, side }),
        })
    }

    /// Sorted global vertex ids of a side, used to match sides of neighboring elements.
    pub fn side_key(&self, side: usize) -> Option<Vec<usize>> {
        let side_type = self.elem_type.side_type()?;
        let local = self.elem_type.side_nodes(side)?;
        let mut key: Vec<usize> = local[..side_type.n_vertices()]
            .iter()
            .map(|&i| self.nodes[i])
            .collect();
        key.sort_unstable();
        Some(key)
    }
}
