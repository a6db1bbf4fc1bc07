use crate::{dense_targets, lagrange_system, n_solution_dofs, nodal_field, DenseTargets};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use proptest::prelude::*;
use tessera::assembly::{csr_from_pattern, GlobalTargets, JacobianType, LocalKind, Tag};
use tessera::loops::{Compute, ElementLoop};
use tessera::mesh::procedural::create_unit_square_quad_mesh;
use tessera::objects::{Diffusion, Kernel, ObjectBase, ObjectSet, PhysicsObject, TaggingInterface};
use tessera::system::SolutionState;
use tessera::{
    Assembly, AssemblyError, AssemblyOptions, FeType, MatrixTag, Mesh, StaleBlockPolicy, SystemBuilder, TagSet,
    VariableId, VectorTag,
};
use util::{matrix_to_bits, to_bits};

/// Puts `values` into the element residual of `u` under `tags`.
fn accumulate_values(assembly: &mut Assembly, u: VariableId, values: &[f64], tags: &TagSet<VectorTag>) {
    let (_, residual) = assembly.local_residual(LocalKind::Element, u).unwrap();
    residual.copy_from_slice(values);
    assembly
        .accumulate_tagged_local_residual(LocalKind::Element, u, tags)
        .unwrap();
}

fn element_dofs(assembly: &Assembly, u: VariableId) -> Vec<usize> {
    assembly.fe().dof_indices(LocalKind::Element, u).to_vec()
}

#[test]
fn contributions_only_reach_their_tags() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let targets = dense_targets(n);

    let elem = &mesh.elems()[3];
    assembly.reinit(elem).unwrap();
    assembly.prepare().unwrap();
    accumulate_values(&mut assembly, u, &[1.0, 2.0, 3.0, 4.0], &TagSet::single(VectorTag::NONTIME));

    let (_, jacobian) = assembly
        .local_jacobian(JacobianType::ElementElement, u, u)
        .unwrap();
    jacobian.fill(1.5);
    assembly
        .accumulate_tagged_local_matrix(JacobianType::ElementElement, u, u, &TagSet::single(MatrixTag::SYSTEM))
        .unwrap();

    assembly.add_residual(&targets).unwrap();
    assembly.add_jacobian(&targets).unwrap();
    let dofs = element_dofs(&assembly, u);

    let mut targets = targets;
    let time = targets.take_residual(VectorTag::TIME).unwrap();
    let nontime = targets.take_residual(VectorTag::NONTIME).unwrap();
    assert!(time.iter().all(|&v| v == 0.0));
    for (i, &dof) in dofs.iter().enumerate() {
        assert_eq!(nontime[dof], (i + 1) as f64);
    }
    assert_scalar_eq!(nontime.sum(), 10.0, comp = abs, tol = 0.0);

    for tag in [MatrixTag::TIME, MatrixTag::NONTIME] {
        assert!(targets.take_jacobian(tag).unwrap().iter().all(|&v| v == 0.0));
    }
    let system_matrix = targets.take_jacobian(MatrixTag::SYSTEM).unwrap();
    for &i in &dofs {
        for &j in &dofs {
            assert_eq!(system_matrix[(i, j)], 1.5);
        }
    }
    assert_scalar_eq!(system_matrix.sum(), 1.5 * 16.0, comp = abs, tol = 0.0);
}

#[test]
fn one_accumulation_feeds_several_tags() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let mut targets = dense_targets(n);

    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();
    let both: TagSet<VectorTag> = [VectorTag::TIME, VectorTag::NONTIME].into_iter().collect();
    accumulate_values(&mut assembly, u, &[1.0, -1.0, 2.0, -2.0], &both);
    assembly.add_residual(&targets).unwrap();

    let time = targets.take_residual(VectorTag::TIME).unwrap();
    let nontime = targets.take_residual(VectorTag::NONTIME).unwrap();
    assert_eq!(to_bits(&time), to_bits(&nontime));
    assert!(time.iter().any(|&v| v != 0.0));
}

fn diffusion_setup(mesh: &Mesh) -> (std::sync::Arc<tessera::System>, VariableId, SolutionState, Diffusion) {
    let (system, u) = lagrange_system(mesh);
    let solution = SolutionState::new(nodal_field(&system, mesh, u, |p| p.x * p.x + 0.5 * p.y + p.x * p.y));
    let diffusion = Diffusion::new(ObjectBase::new("diffusion"), u, 1.3);
    (system, u, solution, diffusion)
}

fn assemble_diffusion_element(assembly: &mut Assembly, kernel: &Diffusion, solution: &SolutionState, u: VariableId) {
    let tags = kernel.tagging();
    let (fe, residual) = assembly.local_residual(LocalKind::Element, u).unwrap();
    kernel.compute_residual(&fe, solution, residual).unwrap();
    assembly
        .accumulate_tagged_local_residual(LocalKind::Element, u, tags.vector_tags())
        .unwrap();
    let (fe, jacobian) = assembly
        .local_jacobian(JacobianType::ElementElement, u, u)
        .unwrap();
    kernel
        .compute_jacobian(&fe, solution, u, jacobian)
        .unwrap();
    assembly
        .accumulate_tagged_local_matrix(JacobianType::ElementElement, u, u, tags.matrix_tags())
        .unwrap();
}

fn immediate_diffusion(mesh: &Mesh) -> DenseTargets {
    let (system, u, solution, diffusion) = diffusion_setup(mesh);
    let targets = dense_targets(n_solution_dofs(&system));
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    for elem in mesh.volume_elems() {
        assembly.reinit(elem).unwrap();
        assembly.prepare().unwrap();
        assemble_diffusion_element(&mut assembly, &diffusion, &solution, u);
        assembly.add_residual(&targets).unwrap();
        assembly.add_jacobian(&targets).unwrap();
    }
    assert_eq!(assembly.n_cached_entries(), (0, 0));
    targets
}

fn cached_diffusion(mesh: &Mesh, interval: usize) -> DenseTargets {
    let (system, u, solution, diffusion) = diffusion_setup(mesh);
    let targets = dense_targets(n_solution_dofs(&system));
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    for (count, elem) in mesh.volume_elems().enumerate() {
        assembly.reinit(elem).unwrap();
        assembly.prepare().unwrap();
        assemble_diffusion_element(&mut assembly, &diffusion, &solution, u);
        assembly.cache_residual().unwrap();
        assembly.cache_jacobian().unwrap();
        if (count + 1) % interval == 0 {
            assembly.add_cached(&targets).unwrap();
            assert_eq!(assembly.n_cached_entries(), (0, 0));
        }
    }
    assembly.add_cached(&targets).unwrap();
    assert_eq!(assembly.n_cached_entries(), (0, 0));
    targets
}

fn assert_bitwise_equal(mut a: DenseTargets, mut b: DenseTargets) {
    let ra = a.take_residual(VectorTag::NONTIME).unwrap();
    let rb = b.take_residual(VectorTag::NONTIME).unwrap();
    assert_eq!(to_bits(&ra), to_bits(&rb));
    let ja = a.take_jacobian(MatrixTag::NONTIME).unwrap();
    let jb = b.take_jacobian(MatrixTag::NONTIME).unwrap();
    assert_eq!(matrix_to_bits(&ja), matrix_to_bits(&jb));
}

proptest! {
    #[test]
    fn cached_and_immediate_paths_agree_bitwise(interval in 1..10usize) {
        let mesh = create_unit_square_quad_mesh(4);
        assert_bitwise_equal(immediate_diffusion(&mesh), cached_diffusion(&mesh, interval));
    }

    #[test]
    fn element_loop_agrees_with_immediate_assembly(interval in 1..10usize) {
        let mesh = create_unit_square_quad_mesh(4);
        let (system, _, solution, diffusion) = diffusion_setup(&mesh);
        let objects = ObjectSet::new().with_kernel(diffusion);
        let options = AssemblyOptions::default().with_cache_flush_interval(interval);
        let targets = dense_targets(n_solution_dofs(&system));
        let mut assembly = Assembly::new(system, options).unwrap();
        ElementLoop::new(&mesh, &objects, &solution, Compute::ResidualAndJacobian)
            .run_all(&mut assembly, &targets)
            .unwrap();
        assert_bitwise_equal(immediate_diffusion(&mesh), targets);
    }
}

#[test]
fn caching_zeroes_the_local_blocks() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, u) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();
    accumulate_values(&mut assembly, u, &[1.0, 2.0, 3.0, 4.0], &TagSet::single(VectorTag::NONTIME));
    assembly.cache_residual().unwrap();
    let (n_residual, n_jacobian) = assembly.n_cached_entries();
    assert!(n_residual >= 4);
    assert_eq!(n_jacobian, 0);

    let block = assembly
        .residual_block(LocalKind::Element, VectorTag::NONTIME, u)
        .unwrap();
    assert_eq!(block.len(), 4);
    assert!(block.iter().all(|&v| v == 0.0));
}

#[test]
fn set_residual_overwrites_global_entries() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let mut targets: DenseTargets = GlobalTargets::new().with_residual(VectorTag::NONTIME, DVector::repeat(n, 7.0));

    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();
    accumulate_values(&mut assembly, u, &[1.0, 2.0, 3.0, 4.0], &TagSet::single(VectorTag::NONTIME));
    assembly.set_residual(&targets).unwrap();
    let dofs = element_dofs(&assembly, u);

    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    for dof in 0..n {
        match dofs.iter().position(|&d| d == dof) {
            Some(i) => assert_eq!(residual[dof], (i + 1) as f64),
            None => assert_eq!(residual[dof], 7.0),
        }
    }
}

#[test]
fn set_residual_neighbor_overwrites_only_neighbor_entries() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let mut targets: DenseTargets = GlobalTargets::new().with_residual(VectorTag::NONTIME, DVector::repeat(n, 7.0));

    let elem = &mesh.elems()[0];
    let (side, (neighbor, neighbor_side)) = (0..elem.n_sides())
        .find_map(|side| mesh.neighbor(elem.id(), side).map(|found| (side, found)))
        .unwrap();
    assembly.reinit(elem).unwrap();
    assembly.prepare().unwrap();
    accumulate_values(&mut assembly, u, &[-1.0; 4], &TagSet::single(VectorTag::NONTIME));
    assembly
        .reinit_elem_and_neighbor(side, mesh.elem(neighbor).unwrap(), neighbor_side)
        .unwrap();
    assembly.prepare_neighbor().unwrap();
    let (_, residual) = assembly.local_residual(LocalKind::Neighbor, u).unwrap();
    residual.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
    assembly
        .accumulate_tagged_local_residual(LocalKind::Neighbor, u, &TagSet::single(VectorTag::NONTIME))
        .unwrap();
    assembly.set_residual_neighbor(&targets).unwrap();
    let neighbor_dofs = assembly.fe().dof_indices(LocalKind::Neighbor, u).to_vec();

    // The element block is not written by the neighbor set
    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    for dof in 0..n {
        match neighbor_dofs.iter().position(|&d| d == dof) {
            Some(i) => assert_eq!(residual[dof], (i + 1) as f64),
            None => assert_eq!(residual[dof], 7.0),
        }
    }
}

#[test]
fn variable_scaling_multiplies_global_rows() {
    let mesh = create_unit_square_quad_mesh(2);
    let assemble = |scaling: f64| {
        let mut builder = SystemBuilder::new();
        let u = builder.add_variable("u", FeType::lagrange(1)).unwrap();
        builder.set_scaling(u, scaling).unwrap();
        let system = builder.build(&mesh).unwrap();
        let mut targets = dense_targets(n_solution_dofs(&system));
        let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
        for elem in mesh.volume_elems() {
            assembly.reinit(elem).unwrap();
            assembly.prepare().unwrap();
            accumulate_values(&mut assembly, u, &[1.0, -2.0, 0.5, 3.0], &TagSet::single(VectorTag::NONTIME));
            assembly.add_residual(&targets).unwrap();
        }
        targets.take_residual(VectorTag::NONTIME).unwrap()
    };
    let unscaled = assemble(1.0);
    let scaled = assemble(2.0);
    assert_matrix_eq!(scaled, unscaled * 2.0, comp = abs, tol = 1e-14);
}

#[test]
fn absolute_residual_sums_contribution_magnitudes() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let options = AssemblyOptions::default().with_absolute_residual(true);
    let mut assembly = Assembly::new(system, options).unwrap();
    let mut targets: DenseTargets = GlobalTargets::new()
        .with_residual(VectorTag::NONTIME, DVector::zeros(n))
        .with_absolute_residual(DVector::zeros(n));

    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();
    let tags = TagSet::single(VectorTag::NONTIME);
    accumulate_values(&mut assembly, u, &[1.0, -2.0, 3.0, -4.0], &tags);
    accumulate_values(&mut assembly, u, &[-1.0, 2.0, -3.0, 4.0], &tags);
    assembly.add_residual(&targets).unwrap();
    let dofs = element_dofs(&assembly, u);

    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    let absolute = targets.take_absolute_residual().unwrap();
    assert!(residual.iter().all(|&v| v == 0.0));
    for (i, &dof) in dofs.iter().enumerate() {
        assert_eq!(absolute[dof], 2.0 * (i + 1) as f64);
    }
}

#[test]
fn stale_block_requests_warn_by_default() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, u) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();

    let block = assembly
        .residual_block(LocalKind::Neighbor, VectorTag::NONTIME, u)
        .unwrap();
    assert_eq!(block.len(), 0);
    assert_eq!(assembly.block_stats().stale_requests, 1);

    let prepared = assembly
        .residual_block(LocalKind::Element, VectorTag::NONTIME, u)
        .unwrap();
    assert_eq!(prepared.len(), 4);
    assert_eq!(assembly.block_stats().stale_requests, 1);
}

#[test]
fn stale_block_requests_fail_under_error_policy() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, u) = lagrange_system(&mesh);
    let options = AssemblyOptions::default().with_stale_block_policy(StaleBlockPolicy::Error);
    let mut assembly = Assembly::new(system, options).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();

    let err = assembly
        .residual_block(LocalKind::Neighbor, VectorTag::NONTIME, u)
        .unwrap_err();
    assert_eq!(
        err,
        AssemblyError::StaleResidualBlock {
            kind: LocalKind::Neighbor,
            tag: VectorTag::NONTIME.index(),
            var: u.0,
        }
    );
    let err = assembly
        .jacobian_block(JacobianType::ElementNeighbor, MatrixTag::NONTIME, u, u)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::StaleJacobianBlock { .. }));
}

#[test]
fn blocks_become_stale_on_the_next_element() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, u) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();
    assembly.reinit(&mesh.elems()[1]).unwrap();

    let block = assembly
        .residual_block(LocalKind::Element, VectorTag::NONTIME, u)
        .unwrap();
    assert_eq!(block.len(), 0);
    assert_eq!(assembly.block_stats().stale_requests, 1);
}

#[test]
fn out_of_order_calls_are_rejected() {
    let mesh = create_unit_square_quad_mesh(1);
    let (system, u) = lagrange_system(&mesh);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    assert!(matches!(assembly.prepare(), Err(AssemblyError::InvalidTransition { .. })));

    assembly.reinit(&mesh.elems()[0]).unwrap();
    assert!(matches!(assembly.prepare_neighbor(), Err(AssemblyError::InvalidTransition { .. })));
    let (_, residual) = assembly.local_residual(LocalKind::Element, u).unwrap();
    residual.fill(1.0);
    let result = assembly.accumulate_tagged_local_residual(LocalKind::Element, u, &TagSet::single(VectorTag::NONTIME));
    assert!(matches!(result, Err(AssemblyError::InvalidTransition { .. })));
}

#[test]
fn nonlocal_blocks_fill_whole_rows() {
    let mesh = create_unit_square_quad_mesh(2);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    let mut targets = dense_targets(n);

    assembly.enable_nonlocal_jacobian(u, u).unwrap();
    assembly.reinit(&mesh.elems()[2]).unwrap();
    assembly.prepare().unwrap();
    let block = assembly.nonlocal_block(MatrixTag::NONTIME, u, u);
    assert_eq!(block.shape(), (4, n));
    block.fill(1.0);
    assembly.add_jacobian_nonlocal(&targets).unwrap();
    let dofs = element_dofs(&assembly, u);

    let jacobian = targets.take_jacobian(MatrixTag::NONTIME).unwrap();
    for row in 0..n {
        let expected = if dofs.contains(&row) { 1.0 } else { 0.0 };
        assert!(jacobian.row(row).iter().all(|&v| v == expected));
    }
}

#[test]
fn sparse_targets_match_dense_targets() {
    let mesh = create_unit_square_quad_mesh(3);
    let (system, _, solution, diffusion) = diffusion_setup(&mesh);
    let objects = ObjectSet::new().with_kernel(diffusion);
    let n = n_solution_dofs(&system);
    let pattern = system.sparsity_pattern(&mesh, &[]).unwrap();

    let mut sparse: GlobalTargets<DVector<f64>, CsrMatrix<f64>> = GlobalTargets::new()
        .with_residual(VectorTag::NONTIME, DVector::zeros(n))
        .with_jacobian(MatrixTag::NONTIME, csr_from_pattern(pattern));
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();
    ElementLoop::new(&mesh, &objects, &solution, Compute::ResidualAndJacobian)
        .run_all(&mut assembly, &sparse)
        .unwrap();

    let mut dense = immediate_diffusion(&mesh);
    let sparse_jacobian = DMatrix::from(&sparse.take_jacobian(MatrixTag::NONTIME).unwrap());
    let dense_jacobian = dense.take_jacobian(MatrixTag::NONTIME).unwrap();
    assert_matrix_eq!(sparse_jacobian, dense_jacobian, comp = abs, tol = 1e-14);
    let sparse_residual = sparse.take_residual(VectorTag::NONTIME).unwrap();
    let dense_residual = dense.take_residual(VectorTag::NONTIME).unwrap();
    assert_matrix_eq!(sparse_residual, dense_residual, comp = abs, tol = 1e-14);
}

#[test]
fn entries_outside_the_sparsity_pattern_are_reported() {
    let mesh = create_unit_square_quad_mesh(3);
    let (system, u) = lagrange_system(&mesh);
    let n = n_solution_dofs(&system);
    let pattern = system.sparsity_pattern(&mesh, &[]).unwrap();
    let targets: GlobalTargets<DVector<f64>, CsrMatrix<f64>> =
        GlobalTargets::new().with_jacobian(MatrixTag::NONTIME, csr_from_pattern(pattern));
    let mut assembly = Assembly::new(system, AssemblyOptions::default()).unwrap();

    assembly.enable_nonlocal_jacobian(u, u).unwrap();
    assembly.reinit(&mesh.elems()[0]).unwrap();
    assembly.prepare().unwrap();
    let block = assembly.nonlocal_block(MatrixTag::NONTIME, u, u);
    assert_eq!(block.ncols(), n);
    block.fill(1.0);
    let err = assembly.add_jacobian_nonlocal(&targets).unwrap_err();
    assert!(matches!(err, AssemblyError::MissingSparsityEntry { .. }));
}
