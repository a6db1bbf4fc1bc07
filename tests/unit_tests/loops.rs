use crate::{dense_targets, lagrange_system, n_solution_dofs, nodal_field, DenseTargets};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, Point2, Vector2};
use parking_lot::Mutex;
use std::sync::Arc;
use tessera::loops::{AuxLoop, Compute, ElementLoop, ThreadedAssembler};
use tessera::mesh::procedural::{create_rectangular_quad_mesh, create_two_block_mortar_mesh, create_unit_square_quad_mesh};
use tessera::objects::{
    BodyForce, Diffusion, ElementAverageAux, ElementVolumeAux, NeumannBc, ObjectBase, ObjectParams, ObjectRegistry,
    ObjectSet, ObjectTags, PenaltyInterface, Reaction,
};
use tessera::system::{DofSpace, SolutionState};
use tessera::{
    Assembly, AssemblyOptions, BoundaryId, FeType, MatrixTag, Mesh, SubdomainId, System, SystemBuilder, VectorTag,
};
use util::{matrix_to_bits, to_bits};

fn run_element_loop(mesh: &Mesh, system: &Arc<System>, objects: &ObjectSet, solution: &DVector<f64>) -> DenseTargets {
    let solution = SolutionState::new(solution.clone());
    let targets = dense_targets(n_solution_dofs(system));
    let mut assembly = Assembly::new(Arc::clone(system), AssemblyOptions::default()).unwrap();
    ElementLoop::new(mesh, objects, &solution, Compute::ResidualAndJacobian)
        .run_all(&mut assembly, &targets)
        .unwrap();
    targets
}

fn is_on_boundary(x: f64, y: f64) -> bool {
    [x, y].iter().any(|&c| c.abs() < 1e-12 || (c - 1.0).abs() < 1e-12)
}

#[test]
fn diffusion_operator_is_consistent() {
    let mesh = create_unit_square_quad_mesh(3);
    let (system, u) = lagrange_system(&mesh);
    let objects = ObjectSet::new().with_kernel(Diffusion::new(ObjectBase::new("diffusion"), u, 2.0));
    let linear = nodal_field(&system, &mesh, u, |p| 2.0 * p.x + p.y + 1.0);
    let mut targets = run_element_loop(&mesh, &system, &objects, &linear);

    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    let jacobian = targets.take_jacobian(MatrixTag::NONTIME).unwrap();
    let system_matrix = targets.take_jacobian(MatrixTag::SYSTEM).unwrap();
    assert_eq!(matrix_to_bits(&jacobian), matrix_to_bits(&system_matrix));
    assert!(targets
        .take_jacobian(MatrixTag::TIME)
        .unwrap()
        .iter()
        .all(|&v| v == 0.0));

    assert_matrix_eq!(jacobian, jacobian.transpose(), comp = abs, tol = 1e-14);
    for row in jacobian.row_iter() {
        assert_scalar_eq!(row.sum(), 0.0, comp = abs, tol = 1e-13);
    }
    assert_matrix_eq!(&jacobian * &linear, residual, comp = abs, tol = 1e-12);

    for (node, p) in mesh.points().iter().enumerate() {
        if !is_on_boundary(p.x, p.y) {
            let dof = system.dof_map().node_dof(node, u).unwrap();
            assert_scalar_eq!(residual[dof], 0.0, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn body_force_integrates_to_the_domain_load() {
    let mesh = create_unit_square_quad_mesh(4);
    let (system, u) = lagrange_system(&mesh);
    let objects = ObjectSet::new().with_kernel(BodyForce::new(ObjectBase::new("force"), u, 3.0));
    let mut targets = run_element_loop(&mesh, &system, &objects, &DVector::zeros(n_solution_dofs(&system)));

    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    assert_scalar_eq!(residual.sum(), -3.0, comp = abs, tol = 1e-12);
    assert!(targets
        .take_jacobian(MatrixTag::NONTIME)
        .unwrap()
        .iter()
        .all(|&v| v == 0.0));
}

#[test]
fn subdomain_restricted_objects_only_act_on_their_blocks() {
    let mesh = create_two_block_mortar_mesh(2, 3);
    let (system, u) = lagrange_system(&mesh);
    let base = ObjectBase::new("force").with_subdomains([SubdomainId(2)]);
    let objects = ObjectSet::new().with_kernel(BodyForce::new(base, u, 1.0));
    let mut targets = run_element_loop(&mesh, &system, &objects, &DVector::zeros(n_solution_dofs(&system)));

    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    assert_scalar_eq!(residual.sum(), -1.0, comp = abs, tol = 1e-12);
    // The left block comes first in the dof numbering
    assert!(residual.rows(0, 9).iter().all(|&v| v == 0.0));
}

#[test]
fn neumann_flux_only_reaches_its_boundary() {
    let mesh = create_unit_square_quad_mesh(3);
    let (system, u) = lagrange_system(&mesh);
    let bc = NeumannBc::new(ObjectBase::new("flux"), u, vec![BoundaryId(1)], 0.5);
    let objects = ObjectSet::new().with_integrated_bc(bc);
    let mut targets = run_element_loop(&mesh, &system, &objects, &DVector::zeros(n_solution_dofs(&system)));

    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    assert_scalar_eq!(residual.sum(), -0.5, comp = abs, tol = 1e-12);
    for (node, p) in mesh.points().iter().enumerate() {
        let dof = system.dof_map().node_dof(node, u).unwrap();
        if (p.x - 1.0).abs() > 1e-12 {
            assert_eq!(residual[dof], 0.0);
        } else {
            assert!(residual[dof] < 0.0);
        }
    }
}

#[test]
fn time_tagged_objects_stay_out_of_nontime_structures() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, u) = lagrange_system(&mesh);
    let base = ObjectBase::new("reaction").with_tags(ObjectTags::time());
    let objects = ObjectSet::new().with_kernel(Reaction::new(base, u, 2.0));
    let ones = DVector::repeat(n_solution_dofs(&system), 1.0);
    let mut targets = run_element_loop(&mesh, &system, &objects, &ones);

    let time = targets.take_residual(VectorTag::TIME).unwrap();
    assert_scalar_eq!(time.sum(), 2.0, comp = abs, tol = 1e-12);
    assert!(targets
        .take_residual(VectorTag::NONTIME)
        .unwrap()
        .iter()
        .all(|&v| v == 0.0));
    assert!(targets
        .take_jacobian(MatrixTag::NONTIME)
        .unwrap()
        .iter()
        .all(|&v| v == 0.0));

    let time_matrix = targets.take_jacobian(MatrixTag::TIME).unwrap();
    let system_matrix = targets.take_jacobian(MatrixTag::SYSTEM).unwrap();
    assert_scalar_eq!(time_matrix.sum(), 2.0, comp = abs, tol = 1e-12);
    assert_eq!(matrix_to_bits(&time_matrix), matrix_to_bits(&system_matrix));
}

#[test]
fn penalty_interface_couples_discontinuous_neighbors() {
    let mesh = create_rectangular_quad_mesh(&Point2::origin(), &Vector2::new(2.0, 1.0), 2, 1);
    let mut builder = SystemBuilder::new();
    let u = builder.add_variable("u", FeType::l2_lagrange(1)).unwrap();
    let system = builder.build(&mesh).unwrap();
    let n = n_solution_dofs(&system);
    assert_eq!(n, 8);

    let mut left_dofs = Vec::new();
    system
        .dof_map()
        .dof_indices(&mesh.elems()[0], u, &mut left_dofs);
    let mut jump = DVector::zeros(n);
    for &dof in &left_dofs {
        jump[dof] = 1.0;
    }

    let penalty = 10.0;
    let objects =
        ObjectSet::new().with_interface_kernel(PenaltyInterface::new(ObjectBase::new("penalty"), u, u, penalty));
    let mut targets = run_element_loop(&mesh, &system, &objects, &jump);
    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    let jacobian = targets.take_jacobian(MatrixTag::NONTIME).unwrap();

    let left: f64 = left_dofs.iter().map(|&dof| residual[dof]).sum();
    assert_scalar_eq!(left, penalty, comp = abs, tol = 1e-12);
    assert_scalar_eq!(residual.sum() - left, -penalty, comp = abs, tol = 1e-12);
    assert_matrix_eq!(&jacobian * &jump, residual, comp = abs, tol = 1e-12);
    assert_matrix_eq!(jacobian, jacobian.transpose(), comp = abs, tol = 1e-12);
}

fn loaded_problem(mesh: &Mesh) -> (Arc<System>, ObjectSet, DVector<f64>) {
    let (system, u) = lagrange_system(mesh);
    let objects = ObjectSet::new()
        .with_kernel(Diffusion::new(ObjectBase::new("diffusion"), u, 1.0))
        .with_kernel(BodyForce::new(ObjectBase::new("force"), u, 2.0))
        .with_integrated_bc(NeumannBc::new(ObjectBase::new("flux"), u, vec![BoundaryId(1), BoundaryId(2)], -1.0));
    let solution = nodal_field(&system, mesh, u, |p| p.x * p.y + p.y * p.y);
    (system, objects, solution)
}

#[test]
fn threaded_assembly_matches_serial_assembly() {
    let mesh = create_unit_square_quad_mesh(6);
    let (system, objects, solution) = loaded_problem(&mesh);
    let mut serial = run_element_loop(&mesh, &system, &objects, &solution);

    let state = SolutionState::new(solution);
    let mut threaded = dense_targets(n_solution_dofs(&system));
    let options = AssemblyOptions::default()
        .with_num_threads(2)
        .with_cache_flush_interval(3);
    let mut assembler = ThreadedAssembler::new(Arc::clone(&system), options).unwrap();
    let element_loop = ElementLoop::new(&mesh, &objects, &state, Compute::ResidualAndJacobian);
    assembler
        .run_element_loop(&element_loop, &threaded)
        .unwrap();
    assert!(assembler.n_assemblies() >= 1);
    assembler.log_stats();

    let r_serial = serial.take_residual(VectorTag::NONTIME).unwrap();
    let r_threaded = threaded.take_residual(VectorTag::NONTIME).unwrap();
    assert_matrix_eq!(r_threaded, r_serial, comp = abs, tol = 1e-12);
    let j_serial = serial.take_jacobian(MatrixTag::NONTIME).unwrap();
    let j_threaded = threaded.take_jacobian(MatrixTag::NONTIME).unwrap();
    assert_matrix_eq!(j_threaded, j_serial, comp = abs, tol = 1e-12);
}

#[test]
fn aux_kernels_set_one_value_per_element() {
    let mesh = create_unit_square_quad_mesh(2);
    let mut builder = SystemBuilder::new();
    let u = builder.add_variable("u", FeType::lagrange(1)).unwrap();
    let volume = builder
        .add_aux_variable("volume", FeType::monomial(0))
        .unwrap();
    let average = builder
        .add_aux_variable("average_x", FeType::monomial(0))
        .unwrap();
    let system = builder.build(&mesh).unwrap();
    let solution = SolutionState::new(nodal_field(&system, &mesh, u, |p| p.x));
    let objects = ObjectSet::new()
        .with_aux_kernel(ElementVolumeAux::new(ObjectBase::new("volume"), volume))
        .with_aux_kernel(ElementAverageAux::new(ObjectBase::new("average"), average, u));

    let n_aux = system.dof_map().n_dofs(DofSpace::Aux);
    assert_eq!(n_aux, 8);
    let aux = Mutex::new(DVector::zeros(n_aux));
    let mut assembly = Assembly::new(Arc::clone(&system), AssemblyOptions::default()).unwrap();
    AuxLoop::new(&mesh, &objects, &solution)
        .run_all(&mut assembly, &aux)
        .unwrap();
    let aux = aux.into_inner();

    let mut dofs = Vec::new();
    for elem in mesh.volume_elems() {
        system.dof_map().dof_indices(elem, volume, &mut dofs);
        assert_eq!(dofs.len(), 1);
        assert_scalar_eq!(aux[dofs[0]], 0.25, comp = abs, tol = 1e-14);

        system.dof_map().dof_indices(elem, average, &mut dofs);
        assert_scalar_eq!(aux[dofs[0]], elem.centroid().x, comp = abs, tol = 1e-14);
    }

    let threaded_aux = Mutex::new(DVector::zeros(n_aux));
    let assembler = ThreadedAssembler::new(system, AssemblyOptions::default().with_num_threads(2)).unwrap();
    assembler
        .run_aux_loop(&AuxLoop::new(&mesh, &objects, &solution), &threaded_aux)
        .unwrap();
    assert_eq!(to_bits(&threaded_aux.into_inner()), to_bits(&aux));
}

#[test]
fn registry_built_objects_match_direct_construction() {
    let mesh = create_unit_square_quad_mesh(3);
    let (system, u) = lagrange_system(&mesh);
    let params = [
        ObjectParams::new("diffusion", "Diffusion")
            .with_variable("u")
            .with_value("coefficient", 1.5),
        ObjectParams::new("force", "BodyForce")
            .with_variable("u")
            .with_value("value", 2.0),
        ObjectParams::new("flux", "NeumannBC")
            .with_variable("u")
            .with_boundaries([BoundaryId(0)])
            .with_value("flux", 0.25),
    ];
    let registry = ObjectRegistry::with_builtin_objects();
    let built = registry.build_all(&system, &params).unwrap();
    assert_eq!(built.len(), 3);

    let direct = ObjectSet::new()
        .with_kernel(Diffusion::new(ObjectBase::new("diffusion"), u, 1.5))
        .with_kernel(BodyForce::new(ObjectBase::new("force"), u, 2.0))
        .with_integrated_bc(NeumannBc::new(ObjectBase::new("flux"), u, vec![BoundaryId(0)], 0.25));

    let solution = nodal_field(&system, &mesh, u, |p| p.x - p.y * p.y);
    let mut from_registry = run_element_loop(&mesh, &system, &built, &solution);
    let mut from_direct = run_element_loop(&mesh, &system, &direct, &solution);
    let a = from_registry.take_residual(VectorTag::NONTIME).unwrap();
    let b = from_direct.take_residual(VectorTag::NONTIME).unwrap();
    assert_eq!(to_bits(&a), to_bits(&b));
    let a: DMatrix<f64> = from_registry.take_jacobian(MatrixTag::NONTIME).unwrap();
    let b = from_direct.take_jacobian(MatrixTag::NONTIME).unwrap();
    assert_eq!(matrix_to_bits(&a), matrix_to_bits(&b));
}

#[test]
fn registry_rejects_incomplete_parameters() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, _) = lagrange_system(&mesh);
    let registry = ObjectRegistry::with_builtin_objects();

    let unknown = ObjectParams::new("mystery", "Mystery").with_variable("u");
    assert!(registry.build(&system, &unknown).is_err());

    let missing_value = ObjectParams::new("force", "BodyForce").with_variable("u");
    let err = registry.build(&system, &missing_value).unwrap_err();
    assert!(format!("{err:?}").contains("value"));

    let missing_variable = ObjectParams::new("diffusion", "Diffusion").with_variable("v");
    assert!(registry.build(&system, &missing_variable).is_err());
}
