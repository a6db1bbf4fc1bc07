//! Mortar segment meshes: the common refinement of the secondary and primary sides of an
//! interface.
use crate::element::{Elem, ElemType, SubdomainId};
use crate::error::AssemblyError;
use crate::fe::ReferenceShapeEval;
use crate::mapping::inverse_map;
use crate::mesh::Mesh;
use itertools::Itertools;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Where a segment lies on the lower-dimensional elements of both interface sides.
///
/// `xi1_*` are the reference coordinates of the segment end points on the secondary lower
/// element, `xi2_*` those on the primary lower element (meaningless without a primary element).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MortarSegmentInfo {
    pub xi1_a: f64,
    pub xi1_b: f64,
    pub xi2_a: f64,
    pub xi2_b: f64,
    pub secondary_lower: usize,
    pub primary_lower: Option<usize>,
}

impl MortarSegmentInfo {
    /// Secondary reference coordinate of the segment reference coordinate `eta` in `[-1, 1]`.
    pub fn secondary_xi(&self, eta: f64) -> f64 {
        0.5 * (1.0 - eta) * self.xi1_a + 0.5 * (1.0 + eta) * self.xi1_b
    }

    pub fn primary_xi(&self, eta: f64) -> f64 {
        0.5 * (1.0 - eta) * self.xi2_a + 0.5 * (1.0 + eta) * self.xi2_b
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MortarSegment {
    /// Straight segment element between the end points.
    pub elem: Elem,
    pub info: MortarSegmentInfo,
}

impl MortarSegment {
    /// Builds the segment element between two physical points.
    ///
    /// Segment node ids only number segment end points; they do not refer to mesh nodes.
    pub fn new(
        id: usize,
        a: Point3<f64>,
        b: Point3<f64>,
        subdomain: SubdomainId,
        info: MortarSegmentInfo,
    ) -> Result<Self, AssemblyError> {
        let elem = Elem::new(id, ElemType::Edge2, vec![2 * id, 2 * id + 1], vec![a, b], subdomain)?;
        Ok(Self { elem, info })
    }

    /// Length of the segment.
    pub fn measure(&self) -> f64 {
        let points = self.elem.points();
        (points[1] - points[0]).norm()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MortarSegmentMesh {
    segments: Vec<MortarSegment>,
}

impl MortarSegmentMesh {
    pub fn new(segments: Vec<MortarSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[MortarSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Element pairs coupled through the segments: the lower and interior elements of both sides.
    ///
    /// Intended for [`System::sparsity_pattern`](crate::system::System::sparsity_pattern).
    pub fn coupled_element_pairs(&self, mesh: &Mesh) -> Result<Vec<(usize, usize)>, AssemblyError> {
        let interior = |lower: usize| -> Result<usize, AssemblyError> {
            mesh.elem(lower)?
                .interior_parent()
                .map(|parent| parent.elem)
                .ok_or_else(|| AssemblyError::InvalidMesh {
                    message: format!("lower-dimensional element {lower} has no interior parent"),
                })
        };
        let mut pairs = Vec::new();
        for segment in &self.segments {
            let info = &segment.info;
            let mut elems = vec![info.secondary_lower, interior(info.secondary_lower)?];
            if let Some(primary) = info.primary_lower {
                elems.push(primary);
                elems.push(interior(primary)?);
            }
            for (&a, &b) in elems.iter().tuple_combinations() {
                pairs.push((a, b));
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        Ok(pairs)
    }
}

/// Interval of a straight lower-dimensional element along the interface direction.
struct Span {
    elem: usize,
    start: f64,
    end: f64,
}

impl Span {
    fn contains(&self, s: f64) -> bool {
        self.start <= s && s <= self.end
    }
}

/// Builds the segment mesh of a straight two-dimensional interface.
///
/// The lower-dimensional elements of both subdomains must lie on a common line. Segment end points
/// are the union of all element end points, so each segment lies within exactly one secondary and
/// at most one primary element. Parts of the interface not covered by a secondary element produce
/// no segments.
pub fn build_straight_interface_segments(
    mesh: &Mesh,
    secondary: SubdomainId,
    primary: SubdomainId,
) -> Result<MortarSegmentMesh, AssemblyError> {
    let secondary_elems = mesh.lower_d_elems(secondary).collect_vec();
    let primary_elems = mesh.lower_d_elems(primary).collect_vec();
    if mesh.dim() != 2 || secondary_elems.iter().any(|e| e.dim() != 1) {
        return Err(AssemblyError::InvalidMesh {
            message: "straight interface segments require line elements in a 2D mesh".to_string(),
        });
    }
    let first = secondary_elems.first().ok_or_else(|| AssemblyError::InvalidMesh {
        message: format!("no lower-dimensional elements in {secondary}"),
    })?;

    let origin = first.points()[0];
    let direction: Vector3<f64> = first.points()[1] - origin;
    let length = direction.norm();
    let direction = direction / length;
    let tolerance = 1e-10 * length.max(1.0);
    let parameter = |p: &Point3<f64>| (p - origin).dot(&direction);

    let spans = |elems: &[&Elem]| -> Result<Vec<Span>, AssemblyError> {
        elems
            .iter()
            .map(|elem| {
                let vertices = &elem.points()[..2];
                for p in vertices {
                    let offset = p - origin;
                    if (offset - direction * offset.dot(&direction)).norm() > tolerance {
                        return Err(AssemblyError::InvalidMesh {
                            message: format!("lower-dimensional element {} is not on the interface line", elem.id()),
                        });
                    }
                }
                let (a, b) = (parameter(&vertices[0]), parameter(&vertices[1]));
                Ok(Span {
                    elem: elem.id(),
                    start: a.min(b),
                    end: a.max(b),
                })
            })
            .collect()
    };
    let secondary_spans = spans(&secondary_elems)?;
    let primary_spans = spans(&primary_elems)?;

    let mut breakpoints = secondary_spans
        .iter()
        .chain(&primary_spans)
        .flat_map(|span| [span.start, span.end])
        .collect_vec();
    breakpoints.sort_by(f64::total_cmp);
    breakpoints.dedup_by(|a, b| (*a - *b).abs() <= tolerance);

    let mut scratch = ReferenceShapeEval::default();
    let mut xi = |elem: usize, p: &Point3<f64>| -> Result<f64, AssemblyError> {
        Ok(inverse_map(mesh.elem(elem)?, p, &mut scratch)?.x)
    };

    let mut segments = Vec::new();
    for (&a, &b) in breakpoints.iter().tuple_windows() {
        let middle = 0.5 * (a + b);
        let Some(secondary_span) = secondary_spans.iter().find(|span| span.contains(middle)) else {
            continue;
        };
        let primary_span = primary_spans.iter().find(|span| span.contains(middle));
        let point_a = origin + direction * a;
        let point_b = origin + direction * b;
        let (xi2_a, xi2_b) = match primary_span {
            Some(span) => (xi(span.elem, &point_a)?, xi(span.elem, &point_b)?),
            None => (0.0, 0.0),
        };
        let info = MortarSegmentInfo {
            xi1_a: xi(secondary_span.elem, &point_a)?,
            xi1_b: xi(secondary_span.elem, &point_b)?,
            xi2_a,
            xi2_b,
            secondary_lower: secondary_span.elem,
            primary_lower: primary_span.map(|span| span.elem),
        };
        segments.push(MortarSegment::new(segments.len(), point_a, point_b, secondary, info)?);
    }
    Ok(MortarSegmentMesh::new(segments))
}
