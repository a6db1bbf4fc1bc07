use crate::lagrange_system;
use paste::paste;
use tessera::mapping::FeContext;
use tessera::mesh::procedural::{
    create_unit_cube_hex_mesh, create_unit_square_quad_mesh, create_unit_square_tri_mesh,
};
use tessera::{Assembly, AssemblyOptions, FeType, Mesh};

fn volume_build_ids(mesh: &Mesh) -> (Vec<u64>, Assembly) {
    let (system, _) = lagrange_system(mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let build_ids = mesh
        .volume_elems()
        .map(|elem| {
            assembly.reinit(elem).unwrap();
            assembly
                .mapper()
                .shape(FeContext::Volume, FeType::lagrange(1))
                .unwrap()
                .reference_build_id()
        })
        .collect();
    (build_ids, assembly)
}

macro_rules! shape_table_reuse_test {
    ($name:ident, $mesh:expr) => {
        paste! {
            #[test]
            fn [<volume_shape_tables_are_reused_ $name>]() {
                let mesh = $mesh;
                let (build_ids, assembly) = volume_build_ids(&mesh);
                assert!(build_ids.len() > 1);
                assert!(build_ids.iter().all(|&id| id == build_ids[0]));
                assert_eq!(assembly.quadrature_cache().stats().rules_built, 1);
            }
        }
    };
}

shape_table_reuse_test!(quad4, create_unit_square_quad_mesh(3));
shape_table_reuse_test!(tri3, create_unit_square_tri_mesh(2));
shape_table_reuse_test!(hex8, create_unit_cube_hex_mesh(2));

#[test]
fn no_tables_are_built_after_the_first_element() {
    let mesh = create_unit_square_quad_mesh(4);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();

    let mut elems = mesh.volume_elems();
    let first = elems.next().unwrap();
    assembly.reinit(first).unwrap();
    for side in 0..first.n_sides() {
        assembly.reinit_face(side).unwrap();
    }
    let after_first = assembly.quadrature_cache().stats();

    for elem in elems {
        assembly.reinit(elem).unwrap();
        for side in 0..elem.n_sides() {
            assembly.reinit_face(side).unwrap();
        }
    }
    assert_eq!(assembly.quadrature_cache().stats(), after_first);
}

#[test]
fn face_tables_differ_per_side_but_are_reused_across_elements() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();

    let mut face_ids = Vec::new();
    for elem in mesh.volume_elems() {
        assembly.reinit(elem).unwrap();
        let ids: Vec<u64> = (0..elem.n_sides())
            .map(|side| {
                assembly.reinit_face(side).unwrap();
                assembly
                    .mapper()
                    .shape(FeContext::Face, FeType::lagrange(1))
                    .unwrap()
                    .reference_build_id()
            })
            .collect();
        face_ids.push(ids);
    }

    let first = &face_ids[0];
    for (a, b) in first.iter().zip(first.iter().skip(1)) {
        assert_ne!(a, b);
    }
    assert!(face_ids.iter().all(|ids| ids == first));
}

#[test]
fn custom_points_produce_their_own_tables() {
    use nalgebra::Point3;

    let mesh = create_unit_square_quad_mesh(1);
    let (system, _) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let elem = &mesh.elems()[0];

    assembly.reinit(elem).unwrap();
    let rule_table = assembly
        .mapper()
        .shape(FeContext::Volume, FeType::lagrange(1))
        .unwrap()
        .reference_build_id();

    let points = [Point3::new(0.5, -0.5, 0.0)];
    assembly
        .reinit_at_reference(elem, &points, None)
        .unwrap();
    let custom = assembly
        .mapper()
        .shape(FeContext::Volume, FeType::lagrange(1))
        .unwrap();
    assert_ne!(custom.reference_build_id(), rule_table);
    assert_eq!(custom.n_points(), 1);
    assert_eq!(assembly.fe().jxw(FeContext::Volume).unwrap().len(), 1);
}
