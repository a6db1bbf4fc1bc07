use crate::{lagrange_system, nodal_field};
use matrixcompare::assert_scalar_eq;
use nalgebra::{Point3, Vector3};
use paste::paste;
use proptest::prelude::*;
use std::f64::consts::PI;
use std::sync::Arc;
use tessera::mapping::{CoordinateSystem, FeContext};
use tessera::mesh::procedural::{
    create_unit_cube_hex_mesh, create_unit_line_mesh, create_unit_square_quad9_mesh, create_unit_square_quad_mesh,
    create_unit_square_tri_mesh,
};
use tessera::system::SolutionState;
use tessera::{Assembly, AssemblyError, AssemblyOptions, Elem, ElemType, FeType, Mesh, SubdomainId, System, SystemBuilder};
use util::{assert_approx_matrix_eq, rectangle_corners, unit_right_triangle};

fn single_element_mesh(elem_type: ElemType, points: Vec<Point3<f64>>) -> Mesh {
    let nodes = (0..points.len()).collect();
    Mesh::from_cells(elem_type.dim(), points, [(elem_type, nodes, SubdomainId(0))]).unwrap()
}

fn system_in_coordinates(mesh: &Mesh, coordinate_system: CoordinateSystem) -> Arc<System> {
    let mut builder = SystemBuilder::new();
    builder.add_variable("u", FeType::lagrange(1)).unwrap();
    builder.coordinate_system(SubdomainId(0), coordinate_system);
    builder.build(mesh).unwrap()
}

fn total_volume(mesh: &Mesh, system: Arc<System>) -> f64 {
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    mesh.volume_elems()
        .map(|elem| {
            assembly.reinit(elem).unwrap();
            let jxw_coord: f64 = assembly.fe().jxw_coord(FeContext::Volume).unwrap().iter().sum();
            let volume = assembly.elem_volume().unwrap();
            assert_scalar_eq!(jxw_coord, volume, comp = abs, tol = 1e-14);
            volume
        })
        .sum()
}

#[test]
fn cartesian_triangle_has_area_one_half() {
    let mesh = single_element_mesh(ElemType::Tri3, unit_right_triangle(0.0));
    let volume = total_volume(&mesh, system_in_coordinates(&mesh, CoordinateSystem::Cartesian));
    assert_scalar_eq!(volume, 0.5, comp = abs, tol = 1e-14);
}

#[test]
fn spherical_line_integrates_shell_volume() {
    let mesh = create_unit_line_mesh(4);
    let volume = total_volume(&mesh, system_in_coordinates(&mesh, CoordinateSystem::RSpherical));
    assert_scalar_eq!(volume, 4.0 * PI / 3.0, comp = abs, tol = 1e-12);
}

proptest! {
    #[test]
    fn axisymmetric_triangle_volume_follows_centroid_radius(offset in 0.1..10.0f64) {
        let mesh = single_element_mesh(ElemType::Tri3, unit_right_triangle(offset));
        let system = system_in_coordinates(&mesh, CoordinateSystem::Rz { radial_axis: 0 });
        let volume = total_volume(&mesh, system);
        let centroid_radius = offset + 1.0 / 3.0;
        let expected = 0.5 * 2.0 * PI * centroid_radius;
        prop_assert!((volume - expected).abs() <= 1e-12 * expected);
    }
}

macro_rules! total_volume_test {
    ($name:ident, $mesh:expr) => {
        paste! {
            #[test]
            fn [<unit_domain_has_unit_volume_ $name>]() {
                let mesh = $mesh;
                let (system, _) = lagrange_system(&mesh);
                assert_scalar_eq!(total_volume(&mesh, system), 1.0, comp = abs, tol = 1e-12);
            }
        }
    };
}

total_volume_test!(edge2, create_unit_line_mesh(5));
total_volume_test!(tri3, create_unit_square_tri_mesh(3));
total_volume_test!(quad4, create_unit_square_quad_mesh(3));
total_volume_test!(quad9, create_unit_square_quad9_mesh(2));
total_volume_test!(hex8, create_unit_cube_hex_mesh(2));

#[test]
fn quad4_first_order_table_with_two_by_two_gauss() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();

    let table = assembly
        .mapper()
        .shape(FeContext::Volume, FeType::lagrange(1))
        .unwrap();
    assert_eq!(table.n_functions(), 4);
    assert_eq!(table.n_points(), 4);

    let a = 1.0 / 3.0f64.sqrt();
    let mut expected = [(1.0 - a) * (1.0 - a) / 4.0, 1.0 / 6.0, 1.0 / 6.0, (1.0 + a) * (1.0 + a) / 4.0];
    expected.sort_by(f64::total_cmp);
    for qp in 0..4 {
        let sum: f64 = (0..4).map(|i| table.phi(i, qp)).sum();
        assert_scalar_eq!(sum, 1.0, comp = abs, tol = 1e-14);
        let gradient_sum: Vector3<f64> = (0..4).map(|i| table.grad_phi(i, qp)).sum();
        assert_approx_matrix_eq!(gradient_sum, Vector3::zeros(), abstol = 1e-13);

        let mut values: Vec<f64> = (0..4).map(|i| table.phi(i, qp)).collect();
        values.sort_by(f64::total_cmp);
        for (value, expected) in values.iter().zip(&expected) {
            assert_scalar_eq!(*value, *expected, comp = abs, tol = 1e-14);
        }
    }

    for &jxw in assembly.fe().jxw(FeContext::Volume).unwrap() {
        assert_scalar_eq!(jxw, 0.25, comp = abs, tol = 1e-15);
    }
}

fn assert_neighbor_faces_oppose(mesh: &Mesh) {
    let (system, _) = lagrange_system(mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let mut visited = 0;
    for elem in mesh.volume_elems() {
        for side in 0..elem.n_sides() {
            let Some((neighbor, neighbor_side)) = mesh.neighbor(elem.id(), side) else {
                continue;
            };
            if neighbor < elem.id() {
                continue;
            }
            assembly.reinit(elem).unwrap();
            assembly
                .reinit_elem_and_neighbor(side, mesh.elem(neighbor).unwrap(), neighbor_side)
                .unwrap();
            let fe = assembly.fe();
            let face_normals = fe.normals(FeContext::Face).unwrap();
            let neighbor_normals = fe.normals(FeContext::Neighbor).unwrap();
            assert_eq!(face_normals.len(), neighbor_normals.len());
            for (n_face, n_neighbor) in face_normals.iter().zip(neighbor_normals) {
                assert_approx_matrix_eq!(*n_face, -n_neighbor, abstol = 1e-12);
                assert_scalar_eq!(n_face.norm(), 1.0, comp = abs, tol = 1e-12);
            }
            let face_points = fe.qpoints(FeContext::Face).unwrap();
            let neighbor_points = fe.qpoints(FeContext::Neighbor).unwrap();
            for (x_face, x_neighbor) in face_points.iter().zip(neighbor_points) {
                assert_approx_matrix_eq!(x_face.coords, x_neighbor.coords, abstol = 1e-12);
            }
            let face_jxw = fe.jxw(FeContext::Face).unwrap();
            let neighbor_jxw = fe.jxw(FeContext::Neighbor).unwrap();
            assert_bitwise(face_jxw, neighbor_jxw.iter().copied());
            visited += 1;
        }
    }
    assert!(visited > 0);
}

#[test]
fn neighbor_normals_are_opposite_on_quads() {
    assert_neighbor_faces_oppose(&create_unit_square_quad_mesh(3));
}

#[test]
fn neighbor_normals_are_opposite_on_triangles() {
    assert_neighbor_faces_oppose(&create_unit_square_tri_mesh(3));
}

#[test]
fn neighbor_normals_are_opposite_on_hexahedra() {
    assert_neighbor_faces_oppose(&create_unit_cube_hex_mesh(2));
}

#[test]
fn straight_sides_have_zero_curvature_and_orthogonal_tangents() {
    let mesh = create_unit_square_tri_mesh(1);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.enable_curvatures();
    let elem = &mesh.elems()[0];
    assembly.reinit(elem).unwrap();
    for side in 0..elem.n_sides() {
        assembly.reinit_face(side).unwrap();
        let fe = assembly.fe();
        for &curvature in fe.curvatures(FeContext::Face).unwrap() {
            assert_scalar_eq!(curvature, 0.0, comp = abs, tol = 1e-12);
        }
        let normals = fe.normals(FeContext::Face).unwrap();
        for (tangents, normal) in fe.tangents(FeContext::Face).unwrap().iter().zip(normals) {
            assert_scalar_eq!(tangents[0].dot(normal), 0.0, comp = abs, tol = 1e-12);
            assert_scalar_eq!(tangents[0].norm(), 1.0, comp = abs, tol = 1e-12);
        }
    }
}

fn perturbed_quad(perturbation: &[f64; 8]) -> Vec<Point3<f64>> {
    rectangle_corners([0.0, 0.0], [1.0, 1.0])
        .into_iter()
        .enumerate()
        .map(|(i, p)| Point3::new(p.x + perturbation[2 * i], p.y + perturbation[2 * i + 1], 0.0))
        .collect()
}

#[test]
fn gradients_of_linear_fields_are_exact_on_distorted_quads() {
    let points = perturbed_quad(&[0.1, -0.05, 0.2, 0.1, -0.1, 0.15, 0.05, -0.2]);
    let mesh = single_element_mesh(ElemType::Quad4, points);
    let (system, u) = lagrange_system(&mesh);
    let solution = SolutionState::new(nodal_field(&system, &mesh, u, |p| 2.0 * p.x + 3.0 * p.y));
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();

    let mut gradients = Vec::new();
    assembly
        .fe()
        .interpolate_gradient(FeContext::Volume, u, &solution.current, &mut gradients)
        .unwrap();
    for gradient in gradients {
        assert_approx_matrix_eq!(gradient, Vector3::new(2.0, 3.0, 0.0), abstol = 1e-12);
    }
}

#[test]
fn reinit_at_physical_points_reproduces_the_points() {
    let points = perturbed_quad(&[0.1, -0.05, 0.2, 0.1, -0.1, 0.15, 0.05, -0.2]);
    let mesh = single_element_mesh(ElemType::Quad4, points);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let targets = [Point3::new(0.5, 0.5, 0.0), Point3::new(0.3, 0.2, 0.0), Point3::new(0.8, 0.7, 0.0)];
    assembly
        .reinit_at_physical(&mesh.elems()[0], &targets)
        .unwrap();
    let qpoints = assembly.fe().qpoints(FeContext::Volume).unwrap();
    assert_eq!(qpoints.len(), targets.len());
    for (x, target) in qpoints.iter().zip(&targets) {
        assert_approx_matrix_eq!(x.coords, target.coords, abstol = 1e-10);
    }
}

#[test]
fn inverted_element_is_rejected() {
    let corners = rectangle_corners([0.0, 0.0], [1.0, 1.0]);
    let mesh = single_element_mesh(ElemType::Quad4, corners.clone());
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let clockwise = vec![corners[0], corners[3], corners[2], corners[1]];
    let inverted = Elem::new(0, ElemType::Quad4, vec![0, 3, 2, 1], clockwise, SubdomainId(0)).unwrap();
    let err = assembly.reinit(&inverted).unwrap_err();
    assert!(matches!(err, AssemblyError::NonPositiveJacobian { elem: 0, .. }));
}

#[test]
fn custom_points_need_one_weight_per_point() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let elem = &mesh.elems()[0];
    let mismatch = AssemblyError::WeightCountMismatch { points: 1, weights: 2 };

    let point = [Point3::new(0.0, 0.0, 0.0)];
    let err = assembly
        .reinit_at_reference(elem, &point, Some(&[0.5, 0.5]))
        .unwrap_err();
    assert_eq!(err, mismatch);

    assembly.reinit(elem).unwrap();
    let err = assembly
        .reinit_face_at(0, &point, Some(&[0.5, 0.5]))
        .unwrap_err();
    assert_eq!(err, mismatch);
    assert!(assembly.fe().jxw(FeContext::Face).is_err());

    // Matching weights are accepted on the same context afterwards
    assembly.reinit_face_at(0, &point, Some(&[2.0])).unwrap();
    assert_scalar_eq!(assembly.fe().jxw(FeContext::Face).unwrap()[0], 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn ad_data_requires_opt_in() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();
    let err = assembly.fe().ad_jxw(FeContext::Volume).unwrap_err();
    assert_eq!(err, AssemblyError::AdNotEnabled { context: FeContext::Volume });
}

fn displaced_system(mesh: &Mesh) -> (Arc<System>, [tessera::VariableId; 2]) {
    let mut builder = SystemBuilder::new();
    let dx = builder.add_variable("disp_x", FeType::lagrange(1)).unwrap();
    let dy = builder.add_variable("disp_y", FeType::lagrange(1)).unwrap();
    builder.displacements([dx, dy]);
    (builder.build(mesh).unwrap(), [dx, dy])
}

fn assert_bitwise(plain: &[f64], ad: impl IntoIterator<Item = f64>) {
    let ad: Vec<u64> = ad.into_iter().map(f64::to_bits).collect();
    let plain: Vec<u64> = plain.iter().map(|v| v.to_bits()).collect();
    assert_eq!(plain, ad);
}

proptest! {
    #[test]
    fn ad_geometry_equals_plain_geometry_bitwise(perturbation in proptest::array::uniform8(-0.2..0.2f64)) {
        let mesh = single_element_mesh(ElemType::Quad4, perturbed_quad(&perturbation));
        let (system, _) = displaced_system(&mesh);
        let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
        assembly.enable_ad(FeContext::Volume);
        assembly.enable_ad(FeContext::Face);
        let elem = &mesh.elems()[0];
        assembly.reinit(elem).unwrap();

        let fe = assembly.fe();
        let jxw = fe.jxw(FeContext::Volume).unwrap();
        assert_bitwise(jxw, fe.ad_jxw(FeContext::Volume).unwrap().iter().map(|v| v.value()));
        let qpoints = fe.qpoints(FeContext::Volume).unwrap();
        for (x, ad_x) in qpoints.iter().zip(fe.ad_qpoints(FeContext::Volume).unwrap()) {
            assert_bitwise(x.coords.as_slice(), ad_x.iter().map(|v| v.value()));
        }

        for side in 0..elem.n_sides() {
            assembly.reinit_face(side).unwrap();
            let fe = assembly.fe();
            assert_bitwise(
                fe.jxw(FeContext::Face).unwrap(),
                fe.ad_jxw(FeContext::Face).unwrap().iter().map(|v| v.value()),
            );
            let normals = fe.normals(FeContext::Face).unwrap();
            for (n, ad_n) in normals.iter().zip(fe.ad_normals(FeContext::Face).unwrap()) {
                assert_bitwise(n.as_slice(), ad_n.iter().map(|v| v.value()));
            }
            let qpoints = fe.qpoints(FeContext::Face).unwrap();
            for (x, ad_x) in qpoints.iter().zip(fe.ad_qpoints(FeContext::Face).unwrap()) {
                assert_bitwise(x.coords.as_slice(), ad_x.iter().map(|v| v.value()));
            }
        }
    }

    #[test]
    fn ad_area_derivatives_match_the_shoelace_formula(perturbation in proptest::array::uniform8(-0.2..0.2f64)) {
        let points = perturbed_quad(&perturbation);
        let mesh = single_element_mesh(ElemType::Quad4, points.clone());
        let (system, [dx, dy]) = displaced_system(&mesh);
        let mut assembly = Assembly::new(Arc::clone(&system), AssemblyOptions::default()).unwrap();
        assembly.enable_ad(FeContext::Volume);
        assembly.reinit(&mesh.elems()[0]).unwrap();
        let ad_jxw = assembly.fe().ad_jxw(FeContext::Volume).unwrap();

        for k in 0..4 {
            let (prev, next) = (&points[(k + 3) % 4], &points[(k + 1) % 4]);
            let dof_x = system.dof_map().node_dof(k, dx).unwrap();
            let dof_y = system.dof_map().node_dof(k, dy).unwrap();
            let d_area_dx: f64 = ad_jxw.iter().map(|v| v.derivative(dof_x)).sum();
            let d_area_dy: f64 = ad_jxw.iter().map(|v| v.derivative(dof_y)).sum();
            prop_assert!((d_area_dx - 0.5 * (next.y - prev.y)).abs() < 1e-12);
            prop_assert!((d_area_dy - 0.5 * (prev.x - next.x)).abs() < 1e-12);
        }
    }
}
