use crate::{dense_targets, n_solution_dofs, DenseTargets};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, Point3};
use nalgebra_sparse::CsrMatrix;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera::assembly::{csr_from_pattern, FeView, GlobalTargets};
use tessera::loops::{Compute, MortarLoop};
use tessera::mesh::procedural::{
    create_two_block_mortar_mesh, PRIMARY_LOWER_SUBDOMAIN, SECONDARY_LOWER_SUBDOMAIN,
};
use tessera::mortar::{build_straight_interface_segments, MortarSegment, MortarSegmentInfo, MortarSegmentMesh};
use tessera::objects::{EqualValueConstraint, MortarConstraint, ObjectBase, ObjectSet, PhysicsObject, TaggingInterface};
use tessera::system::SolutionState;
use tessera::{
    Assembly, AssemblyOptions, FeType, JacobianType, LocalKind, MatrixTag, Mesh, SubdomainId, System, SystemBuilder,
    VariableId, VectorTag,
};

struct MortarProblem {
    mesh: Mesh,
    system: Arc<System>,
    u: VariableId,
    lm: VariableId,
    objects: ObjectSet,
}

fn mortar_problem() -> MortarProblem {
    let mesh = create_two_block_mortar_mesh(2, 3);
    let mut builder = SystemBuilder::new();
    let u = builder.add_variable("u", FeType::lagrange(1)).unwrap();
    let lm = builder.add_variable("lm", FeType::lagrange(1)).unwrap();
    builder
        .restrict_to_subdomains(lm, [SECONDARY_LOWER_SUBDOMAIN])
        .unwrap();
    let system = builder.build(&mesh).unwrap();
    let objects = ObjectSet::new().with_constraint(EqualValueConstraint::new(ObjectBase::new("mortar"), lm, u, u));
    MortarProblem {
        mesh,
        system,
        u,
        lm,
        objects,
    }
}

impl MortarProblem {
    fn field(&self, u: impl Fn(&Point3<f64>) -> f64, lm: f64) -> DVector<f64> {
        let dof_map = self.system.dof_map();
        let mut values = DVector::zeros(n_solution_dofs(&self.system));
        for (node, point) in self.mesh.points().iter().enumerate() {
            if let Some(dof) = dof_map.node_dof(node, self.u) {
                values[dof] = u(point);
            }
        }
        for dof in dof_map.variable_dofs(self.lm) {
            values[dof] = lm;
        }
        values
    }

    fn assemble(&self, segments: &MortarSegmentMesh, solution: DVector<f64>, options: AssemblyOptions) -> (DenseTargets, Assembly) {
        let solution = SolutionState::new(solution);
        let targets = dense_targets(n_solution_dofs(&self.system));
        let mut assembly = Assembly::new(Arc::clone(&self.system), options).unwrap();
        MortarLoop::new(&self.mesh, segments, &self.objects, &solution, Compute::ResidualAndJacobian)
            .run_all(&mut assembly, &targets)
            .unwrap();
        (targets, assembly)
    }

    fn segments(&self) -> MortarSegmentMesh {
        build_straight_interface_segments(&self.mesh, SECONDARY_LOWER_SUBDOMAIN, PRIMARY_LOWER_SUBDOMAIN).unwrap()
    }

    fn u_dofs_where(&self, predicate: impl Fn(&Point3<f64>) -> bool) -> Vec<usize> {
        self.u_dofs_of_nodes(
            self.mesh
                .points()
                .iter()
                .enumerate()
                .filter(|(_, p)| predicate(p))
                .map(|(node, _)| node),
        )
    }

    fn u_dofs_of_nodes(&self, nodes: impl IntoIterator<Item = usize>) -> Vec<usize> {
        let mut dofs: Vec<usize> = nodes
            .into_iter()
            .filter_map(|node| self.system.dof_map().node_dof(node, self.u))
            .collect();
        dofs.sort_unstable();
        dofs
    }
}

#[test]
fn straight_interface_segments_refine_both_sides() {
    let problem = mortar_problem();
    let segments = problem.segments();
    assert_eq!(segments.len(), 4);
    let total: f64 = segments.segments().iter().map(MortarSegment::measure).sum();
    assert_scalar_eq!(total, 1.0, comp = abs, tol = 1e-14);
    assert!(segments
        .segments()
        .iter()
        .all(|segment| segment.info.primary_lower.is_some()));
}

#[test]
fn multiplier_rows_balance_across_the_interface() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let (mut targets, _) = problem.assemble(&segments, problem.field(|_| 0.0, 1.0), AssemblyOptions::default());
    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();

    let n_u = problem.system.dof_map().variable_dofs(problem.u).len();
    assert_eq!(n_u, 25);
    let secondary: f64 = (0..9).map(|dof| residual[dof]).sum();
    let primary: f64 = (9..n_u).map(|dof| residual[dof]).sum();
    assert_scalar_eq!(secondary, 1.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(primary, -1.0, comp = abs, tol = 1e-12);

    // Only dofs on the interface see the multiplier
    let off_interface = problem.u_dofs_where(|p| (p.x - 1.0).abs() > 1e-12);
    for dof in off_interface {
        assert_scalar_eq!(residual[dof], 0.0, comp = abs, tol = 1e-14);
    }
    // Left block nodes come first and are numbered first
    assert_eq!(problem.u_dofs_of_nodes(0..9), (0..9).collect::<Vec<_>>());
}

#[test]
fn continuous_fields_satisfy_the_constraint() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let field = problem.field(|p| 1.0 + 2.0 * p.y + p.x, 0.0);
    let (mut targets, _) = problem.assemble(&segments, field, AssemblyOptions::default());
    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    let lm_dofs = problem.system.dof_map().variable_dofs(problem.lm);
    assert_eq!(lm_dofs.len(), 3);
    for dof in lm_dofs {
        assert_scalar_eq!(residual[dof], 0.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn mortar_jacobian_is_symmetric_and_consistent() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let (mut targets, _) = problem.assemble(&segments, problem.field(|_| 0.0, 0.0), AssemblyOptions::default());
    let jacobian = targets.take_jacobian(MatrixTag::NONTIME).unwrap();
    assert_matrix_eq!(jacobian, jacobian.transpose(), comp = abs, tol = 1e-14);
    assert!(jacobian.iter().any(|&v| v != 0.0));

    // Constant u with zero multiplier satisfies the constraint
    let constant = problem.field(|_| 1.0, 0.0);
    let product = &jacobian * &constant;
    for dof in problem.system.dof_map().variable_dofs(problem.lm) {
        assert_scalar_eq!(product[dof], 0.0, comp = abs, tol = 1e-12);
    }

    // The residual is linear, so J x reproduces it
    let state = problem.field(|p| p.y * p.y - p.x, 0.7);
    let (mut targets, _) = problem.assemble(&segments, state.clone(), AssemblyOptions::default());
    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    assert_matrix_eq!(&jacobian * &state, residual, comp = abs, tol = 1e-12);
}

#[test]
fn mortar_jacobian_fits_the_coupled_sparsity_pattern() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let pairs = segments.coupled_element_pairs(&problem.mesh).unwrap();
    let pattern = problem.system.sparsity_pattern(&problem.mesh, &pairs).unwrap();
    let n = n_solution_dofs(&problem.system);
    let mut targets: GlobalTargets<DVector<f64>, CsrMatrix<f64>> =
        GlobalTargets::new().with_jacobian(MatrixTag::NONTIME, csr_from_pattern(pattern));
    let solution = SolutionState::zeros(n);
    let mut assembly = Assembly::new(Arc::clone(&problem.system), AssemblyOptions::default()).unwrap();
    MortarLoop::new(&problem.mesh, &segments, &problem.objects, &solution, Compute::Jacobian)
        .run_all(&mut assembly, &targets)
        .unwrap();

    let (mut dense, _) = problem.assemble(&segments, DVector::zeros(n), AssemblyOptions::default());
    let sparse = DMatrix::from(&targets.take_jacobian(MatrixTag::NONTIME).unwrap());
    let dense = dense.take_jacobian(MatrixTag::NONTIME).unwrap();
    assert_matrix_eq!(sparse, dense, comp = abs, tol = 1e-14);
}

fn first_secondary_lower(mesh: &Mesh) -> &tessera::Elem {
    mesh.lower_d_elems(SECONDARY_LOWER_SUBDOMAIN)
        .next()
        .unwrap()
}

#[test]
fn degenerate_segments_are_skipped() {
    let problem = mortar_problem();
    let lower = first_secondary_lower(&problem.mesh);
    let point = lower.points()[0];
    let info = MortarSegmentInfo {
        xi1_a: -1.0,
        xi1_b: -1.0,
        xi2_a: -1.0,
        xi2_b: -1.0,
        secondary_lower: lower.id(),
        primary_lower: None,
    };
    let segment = MortarSegment::new(0, point, point, SubdomainId(30), info).unwrap();
    assert_eq!(segment.measure(), 0.0);
    let segments = MortarSegmentMesh::new(vec![segment]);

    let (mut targets, assembly) = problem.assemble(&segments, problem.field(|_| 1.0, 1.0), AssemblyOptions::default());
    assert_eq!(assembly.n_cached_entries(), (0, 0));
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
}

#[test]
fn segment_at_the_tolerance_is_assembled_without_a_primary_side() {
    let problem = mortar_problem();
    let lower = first_secondary_lower(&problem.mesh);
    let (a, b) = (lower.points()[0], lower.points()[1]);
    let info = MortarSegmentInfo {
        xi1_a: -1.0,
        xi1_b: 1.0,
        xi2_a: -1.0,
        xi2_b: 1.0,
        secondary_lower: lower.id(),
        primary_lower: None,
    };
    let segment = MortarSegment::new(0, a, b, SubdomainId(30), info).unwrap();
    assert_scalar_eq!(segment.measure(), 0.5, comp = abs, tol = 1e-15);
    let segments = MortarSegmentMesh::new(vec![segment]);

    let options = AssemblyOptions::default().with_mortar_segment_tolerance(segments.segments()[0].measure());
    let (mut targets, _) = problem.assemble(&segments, problem.field(|_| 1.0, 1.0), options);
    let residual = targets.take_residual(VectorTag::NONTIME).unwrap();
    let u_sum: f64 = problem
        .system
        .dof_map()
        .variable_dofs(problem.u)
        .into_iter()
        .map(|dof| residual[dof])
        .sum();
    let lm_sum: f64 = problem
        .system
        .dof_map()
        .variable_dofs(problem.lm)
        .into_iter()
        .map(|dof| residual[dof])
        .sum();
    assert_scalar_eq!(u_sum, 0.5, comp = abs, tol = 1e-12);
    assert_scalar_eq!(lm_sum, 0.5, comp = abs, tol = 1e-12);
}

#[test]
fn segments_skipped_below_the_tolerance() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let options = AssemblyOptions::default().with_mortar_segment_tolerance(10.0);
    let (mut targets, _) = problem.assemble(&segments, problem.field(|_| 1.0, 1.0), options);
    assert!(targets
        .take_residual(VectorTag::NONTIME)
        .unwrap()
        .iter()
        .all(|&v| v == 0.0));
}

/// Fills every requested Jacobian block with ones and records the requested block types.
#[derive(Debug)]
struct RecordingConstraint {
    base: ObjectBase,
    lm: VariableId,
    u: VariableId,
    requested: Mutex<BTreeSet<JacobianType>>,
}

impl RecordingConstraint {
    fn new(lm: VariableId, u: VariableId) -> Self {
        Self {
            base: ObjectBase::new("recording"),
            lm,
            u,
            requested: Mutex::new(BTreeSet::new()),
        }
    }
}

impl PhysicsObject for RecordingConstraint {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn tagging(&self) -> &dyn TaggingInterface {
        &self.base.tags
    }
}

impl MortarConstraint for RecordingConstraint {
    fn lagrange_variable(&self) -> VariableId {
        self.lm
    }

    fn secondary_variable(&self) -> VariableId {
        self.u
    }

    fn primary_variable(&self) -> VariableId {
        self.u
    }

    fn compute_residual(
        &self,
        _fe: &FeView,
        _solution: &SolutionState,
        _kind: LocalKind,
        _residual: &mut DVector<f64>,
    ) -> eyre::Result<()> {
        Ok(())
    }

    fn compute_jacobian(
        &self,
        _fe: &FeView,
        _solution: &SolutionState,
        jacobian_type: JacobianType,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()> {
        self.requested.lock().insert(jacobian_type);
        jacobian.fill(1.0);
        Ok(())
    }
}

fn recorded_jacobian(problem: &MortarProblem, segments: &MortarSegmentMesh) -> (BTreeSet<JacobianType>, DMatrix<f64>) {
    let constraint = Arc::new(RecordingConstraint::new(problem.lm, problem.u));
    let objects = ObjectSet::new().with_constraint(SharedConstraint(Arc::clone(&constraint)));
    let mut targets = dense_targets(n_solution_dofs(&problem.system));
    let solution = SolutionState::zeros(n_solution_dofs(&problem.system));
    let mut assembly = Assembly::new(Arc::clone(&problem.system), AssemblyOptions::default()).unwrap();
    MortarLoop::new(&problem.mesh, segments, &objects, &solution, Compute::Jacobian)
        .run_all(&mut assembly, &targets)
        .unwrap();
    let requested = constraint.requested.lock().clone();
    (requested, targets.take_jacobian(MatrixTag::NONTIME).unwrap())
}

/// Lets the test keep a handle on a constraint owned by an object set.
#[derive(Debug)]
struct SharedConstraint(Arc<RecordingConstraint>);

impl PhysicsObject for SharedConstraint {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn tagging(&self) -> &dyn TaggingInterface {
        self.0.tagging()
    }
}

impl MortarConstraint for SharedConstraint {
    fn lagrange_variable(&self) -> VariableId {
        self.0.lagrange_variable()
    }

    fn secondary_variable(&self) -> VariableId {
        self.0.secondary_variable()
    }

    fn primary_variable(&self) -> VariableId {
        self.0.primary_variable()
    }

    fn compute_residual(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        kind: LocalKind,
        residual: &mut DVector<f64>,
    ) -> eyre::Result<()> {
        self.0.compute_residual(fe, solution, kind, residual)
    }

    fn compute_jacobian(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        jacobian_type: JacobianType,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()> {
        self.0.compute_jacobian(fe, solution, jacobian_type, jacobian)
    }
}

#[test]
fn constraints_receive_every_block_with_a_primary_side() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let (requested, jacobian) = recorded_jacobian(&problem, &segments);
    assert_eq!(requested, JacobianType::ALL.into_iter().collect());

    // Left block u dofs are secondary and come first, right block u dofs are primary
    let n_u = problem.system.dof_map().variable_dofs(problem.u).len();
    let secondary: Vec<usize> = (0..9).collect();
    let primary: Vec<usize> = (9..n_u).collect();
    let block_sum = |rows: &[usize], cols: &[usize]| -> f64 {
        rows.iter()
            .flat_map(|&i| cols.iter().map(move |&j| (i, j)))
            .map(|(i, j)| jacobian[(i, j)])
            .sum()
    };
    assert!(block_sum(&secondary, &secondary) > 0.0);
    assert!(block_sum(&primary, &primary) > 0.0);
    assert!(block_sum(&secondary, &primary) > 0.0);
    assert!(block_sum(&primary, &secondary) > 0.0);
}

#[test]
fn constraints_without_a_primary_side_receive_element_and_lower_blocks() {
    let problem = mortar_problem();
    let lower = first_secondary_lower(&problem.mesh);
    let info = MortarSegmentInfo {
        xi1_a: -1.0,
        xi1_b: 1.0,
        xi2_a: -1.0,
        xi2_b: 1.0,
        secondary_lower: lower.id(),
        primary_lower: None,
    };
    let segment = MortarSegment::new(0, lower.points()[0], lower.points()[1], SubdomainId(30), info).unwrap();
    let segments = MortarSegmentMesh::new(vec![segment]);
    let (requested, jacobian) = recorded_jacobian(&problem, &segments);
    let expected: BTreeSet<_> = [
        JacobianType::ElementElement,
        JacobianType::LowerLower,
        JacobianType::LowerElement,
        JacobianType::ElementLower,
    ]
    .into_iter()
    .collect();
    assert_eq!(requested, expected);

    // Right block dofs are never touched
    let primary = problem.u_dofs_of_nodes(9..problem.mesh.points().len());
    for &i in &primary {
        assert!(jacobian.row(i).iter().all(|&v| v == 0.0));
        assert!(jacobian.column(i).iter().all(|&v| v == 0.0));
    }
    let secondary_sum: f64 = (0..9).map(|i| jacobian.row(i).sum()).sum();
    assert!(secondary_sum > 0.0);
}

#[test]
fn equal_value_constraint_leaves_interior_blocks_at_zero() {
    let problem = mortar_problem();
    let segments = problem.segments();
    let (mut targets, _) = problem.assemble(&segments, problem.field(|_| 0.0, 0.0), AssemblyOptions::default());
    let jacobian = targets.take_jacobian(MatrixTag::NONTIME).unwrap();
    let u_dofs = problem.system.dof_map().variable_dofs(problem.u);
    for &i in &u_dofs {
        for &j in &u_dofs {
            assert_eq!(jacobian[(i, j)], 0.0);
        }
    }
}
