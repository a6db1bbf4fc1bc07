//! Basic procedural mesh generation routines.
//!
//! Exterior sides of axis-aligned meshes are labeled with the conventional boundary ids:
//! in 1D left `0` and right `1`; in 2D bottom `0`, right `1`, top `2`, left `3`; in 3D
//! `z = min` `0`, `y = min` `1`, `x = max` `2`, `y = max` `3`, `x = min` `4`, `z = max` `5`.
use crate::element::{BoundaryId, ElemType, SubdomainId};
use crate::mesh::Mesh;
use nalgebra::{Point2, Point3, Vector2, Vector3};

/// Boundary of the left block of [`create_two_block_mortar_mesh`] facing the interface.
pub const SECONDARY_BOUNDARY: BoundaryId = BoundaryId(10);
/// Boundary of the right block of [`create_two_block_mortar_mesh`] facing the interface.
pub const PRIMARY_BOUNDARY: BoundaryId = BoundaryId(20);
pub const SECONDARY_LOWER_SUBDOMAIN: SubdomainId = SubdomainId(10);
pub const PRIMARY_LOWER_SUBDOMAIN: SubdomainId = SubdomainId(20);

const TOLERANCE: f64 = 1e-12;

fn on(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE * (1.0 + b.abs())
}

fn label_box_2d(mesh: &mut Mesh, origin: &Point2<f64>, extents: &Vector2<f64>) {
    let (x0, y0) = (origin.x, origin.y);
    let (x1, y1) = (origin.x + extents.x, origin.y + extents.y);
    mesh.label_exterior_sides(|_, c| {
        if on(c.y, y0) {
            Some(BoundaryId(0))
        } else if on(c.x, x1) {
            Some(BoundaryId(1))
        } else if on(c.y, y1) {
            Some(BoundaryId(2))
        } else if on(c.x, x0) {
            Some(BoundaryId(3))
        } else {
            None
        }
    });
}

/// Uniform mesh of `cells` Edge2 elements on `[0, 1]`.
pub fn create_unit_line_mesh(cells: usize) -> Mesh {
    let h = 1.0 / cells as f64;
    let points = (0..=cells)
        .map(|i| Point3::new(i as f64 * h, 0.0, 0.0))
        .collect();
    let cells = (0..cells).map(|i| (ElemType::Edge2, vec![i, i + 1], SubdomainId(0)));
    let mut mesh = Mesh::from_cells(1, points, cells).expect("Generated line mesh is valid");
    mesh.label_exterior_sides(|_, c| {
        if on(c.x, 0.0) {
            Some(BoundaryId(0))
        } else if on(c.x, 1.0) {
            Some(BoundaryId(1))
        } else {
            None
        }
    });
    mesh
}

fn grid_points_2d(origin: &Point2<f64>, extents: &Vector2<f64>, nx: usize, ny: usize) -> Vec<Point3<f64>> {
    let mut points = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            let x = origin.x + extents.x * i as f64 / nx as f64;
            let y = origin.y + extents.y * j as f64 / ny as f64;
            points.push(Point3::new(x, y, 0.0));
        }
    }
    points
}

fn quad_cells(
    offset: usize,
    nx: usize,
    ny: usize,
    subdomain: SubdomainId,
) -> impl Iterator<Item = (ElemType, Vec<usize>, SubdomainId)> {
    let idx = move |i: usize, j: usize| offset + (nx + 1) * j + i;
    (0..ny).flat_map(move |j| {
        (0..nx).map(move |i| {
            let nodes = vec![idx(i, j), idx(i + 1, j), idx(i + 1, j + 1), idx(i, j + 1)];
            (ElemType::Quad4, nodes, subdomain)
        })
    })
}

/// Axis-aligned rectangle `origin + [0, extents.x] x [0, extents.y]` of `nx x ny` Quad4 elements.
pub fn create_rectangular_quad_mesh(origin: &Point2<f64>, extents: &Vector2<f64>, nx: usize, ny: usize) -> Mesh {
    let points = grid_points_2d(origin, extents, nx, ny);
    let cells = quad_cells(0, nx, ny, SubdomainId(0));
    let mut mesh = Mesh::from_cells(2, points, cells).expect("Generated quad mesh is valid");
    label_box_2d(&mut mesh, origin, extents);
    mesh
}

pub fn create_unit_square_quad_mesh(cells_per_dim: usize) -> Mesh {
    create_rectangular_quad_mesh(&Point2::origin(), &Vector2::new(1.0, 1.0), cells_per_dim, cells_per_dim)
}

/// Unit square of Quad9 elements.
pub fn create_unit_square_quad9_mesh(cells_per_dim: usize) -> Mesh {
    let n = 2 * cells_per_dim;
    let points = grid_points_2d(&Point2::origin(), &Vector2::new(1.0, 1.0), n, n);
    let idx = |i: usize, j: usize| (n + 1) * j + i;
    let mut cells = Vec::new();
    for j in 0..cells_per_dim {
        for i in 0..cells_per_dim {
            let (a, b) = (2 * i, 2 * j);
            let nodes = vec![
                idx(a, b),
                idx(a + 2, b),
                idx(a + 2, b + 2),
                idx(a, b + 2),
                idx(a + 1, b),
                idx(a + 2, b + 1),
                idx(a + 1, b + 2),
                idx(a, b + 1),
                idx(a + 1, b + 1),
            ];
            cells.push((ElemType::Quad9, nodes, SubdomainId(0)));
        }
    }
    let mut mesh = Mesh::from_cells(2, points, cells).expect("Generated quad9 mesh is valid");
    label_box_2d(&mut mesh, &Point2::origin(), &Vector2::new(1.0, 1.0));
    mesh
}

/// Unit square where every quad cell is split into two Tri3 elements.
pub fn create_unit_square_tri_mesh(cells_per_dim: usize) -> Mesh {
    let n = cells_per_dim;
    let points = grid_points_2d(&Point2::origin(), &Vector2::new(1.0, 1.0), n, n);
    let cells = quad_cells(0, n, n, SubdomainId(0)).flat_map(|(_, q, subdomain)| {
        [
            (ElemType::Tri3, vec![q[0], q[1], q[2]], subdomain),
            (ElemType::Tri3, vec![q[0], q[2], q[3]], subdomain),
        ]
    });
    let mut mesh = Mesh::from_cells(2, points, cells).expect("Generated triangle mesh is valid");
    label_box_2d(&mut mesh, &Point2::origin(), &Vector2::new(1.0, 1.0));
    mesh
}

/// Unit cube of Hex8 elements.
pub fn create_unit_cube_hex_mesh(cells_per_dim: usize) -> Mesh {
    let n = cells_per_dim;
    let h = 1.0 / n as f64;
    let mut points = Vec::new();
    for k in 0..=n {
        for j in 0..=n {
            for i in 0..=n {
                points.push(Point3::from(Vector3::new(i as f64, j as f64, k as f64) * h));
            }
        }
    }
    let idx = |i: usize, j: usize, k: usize| (n + 1) * (n + 1) * k + (n + 1) * j + i;
    let mut cells = Vec::new();
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let nodes = vec![
                    idx(i, j, k),
                    idx(i + 1, j, k),
                    idx(i + 1, j + 1, k),
                    idx(i, j + 1, k),
                    idx(i, j, k + 1),
                    idx(i + 1, j, k + 1),
                    idx(i + 1, j + 1, k + 1),
                    idx(i, j + 1, k + 1),
                ];
                cells.push((ElemType::Hex8, nodes, SubdomainId(0)));
            }
        }
    }
    let mut mesh = Mesh::from_cells(3, points, cells).expect("Generated hex mesh is valid");
    mesh.label_exterior_sides(|_, c| {
        let id = if on(c.z, 0.0) {
            0
        } else if on(c.y, 0.0) {
            1
        } else if on(c.x, 1.0) {
            2
        } else if on(c.y, 1.0) {
            3
        } else if on(c.x, 0.0) {
            4
        } else if on(c.z, 1.0) {
            5
        } else {
            return None;
        };
        Some(BoundaryId(id))
    });
    mesh
}

/// Two unit squares side by side with non-matching Quad4 grids on the shared edge `x = 1`.
///
/// The left block (subdomain 1, `left_cells` per dimension) is the secondary side, the right block
/// (subdomain 2, `right_cells` per dimension) the primary side. The interface sides are labeled
/// [`SECONDARY_BOUNDARY`] and [`PRIMARY_BOUNDARY`] and carry lower-dimensional elements in
/// [`SECONDARY_LOWER_SUBDOMAIN`] and [`PRIMARY_LOWER_SUBDOMAIN`]. Outer sides use the 2D box ids.
pub fn create_two_block_mortar_mesh(left_cells: usize, right_cells: usize) -> Mesh {
    let unit = Vector2::new(1.0, 1.0);
    let mut points = grid_points_2d(&Point2::origin(), &unit, left_cells, left_cells);
    let offset = points.len();
    points.extend(grid_points_2d(&Point2::new(1.0, 0.0), &unit, right_cells, right_cells));
    let cells = quad_cells(0, left_cells, left_cells, SubdomainId(1))
        .chain(quad_cells(offset, right_cells, right_cells, SubdomainId(2)));
    let mut mesh = Mesh::from_cells(2, points, cells).expect("Generated mortar mesh is valid");
    mesh.label_exterior_sides(|elem, c| {
        if on(c.x, 1.0) {
            if elem.subdomain() == SubdomainId(1) {
                Some(SECONDARY_BOUNDARY)
            } else {
                Some(PRIMARY_BOUNDARY)
            }
        } else if on(c.y, 0.0) {
            Some(BoundaryId(0))
        } else if on(c.x, 2.0) {
            Some(BoundaryId(1))
        } else if on(c.y, 1.0) {
            Some(BoundaryId(2))
        } else if on(c.x, 0.0) {
            Some(BoundaryId(3))
        } else {
            None
        }
    });
    mesh.add_lower_d_elements(SECONDARY_BOUNDARY, SECONDARY_LOWER_SUBDOMAIN)
        .and_then(|_| mesh.add_lower_d_elements(PRIMARY_BOUNDARY, PRIMARY_LOWER_SUBDOMAIN))
        .expect("Interface sides of the generated mesh are valid");
    mesh
}
