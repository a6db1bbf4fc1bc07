//! The per-thread assembly object.
//!
//! An [`Assembly`] is positioned on an element (and optionally a side, a neighbor and a
//! lower-dimensional element) by the `reinit*` family, sizes its local blocks with the `prepare*`
//! family, receives the contributions of physics objects through [`Assembly::local_residual`],
//! [`Assembly::local_jacobian`] and the `accumulate_tagged_*` methods, and finally moves its
//! blocks into global structures either immediately (`add_*`, `set_residual*`) or through a
//! contribution cache (`cache_*` followed by `add_cached_*`).
use crate::config::AssemblyOptions;
use crate::element::{BoundaryId, Elem};
use crate::error::AssemblyError;
use crate::fe::ReferenceShapeEval;
use crate::mapping::{inverse_map, FeContext, GeometricMapper, PointSource};
use crate::quadrature::QuadratureCache;
use crate::system::{DofSpace, System, VariableId};
use log::debug;
use nalgebra::{DMatrix, DVector, Point3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod blocks;
mod coupling;
mod global;
mod scatter;
mod tags;
mod view;

pub use blocks::{BlockStats, JacobianType, LocalBlocks, LocalKind};
pub use coupling::CouplingMatrix;
pub use global::{csr_from_pattern, sparsity_pattern, GlobalMatrix, GlobalTargets, GlobalVector};
pub use tags::{MatrixTag, Tag, TagRegistry, TagSet, VectorTag};
pub use view::FeView;

use scatter::{BlockSource, ContributionCache};
use view::CurrentGeometry;

/// The step an [`Assembly`] performed last.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssemblyState {
    Idle,
    ElementReady,
    FaceReady,
    NeighborReady,
    LowerReady,
    BlocksPrepared,
    Accumulated,
}

/// Assembles local contributions of one element at a time. One instance per thread.
#[derive(Debug)]
pub struct Assembly {
    system: Arc<System>,
    options: AssemblyOptions,
    cache: QuadratureCache,
    mapper: GeometricMapper,
    blocks: LocalBlocks,
    contributions: ContributionCache,
    state: AssemblyState,
    current: CurrentGeometry,
    dofs: [Vec<Vec<usize>>; 3],
    nonlocal_columns: Vec<Vec<usize>>,
    seeds: Vec<[Option<usize>; 3]>,
    inverse_scratch: ReferenceShapeEval,
    points: Vec<Point3<f64>>,
    volume_order: usize,
    face_order: usize,
}

impl Assembly {
    /// Creates an assembly for the system and registers the FE types of its field variables.
    pub fn new(system: Arc<System>, options: AssemblyOptions) -> Result<Self, AssemblyError> {
        let mut mapper = GeometricMapper::new(system.mesh_dim());
        for (fe_type, needs) in system.fe_types() {
            mapper.register_fe_type(fe_type, needs)?;
        }
        let n_vars = system.n_variables();
        let tags = system.tags();
        let blocks = LocalBlocks::new(
            n_vars,
            tags.n_vector_tags(),
            tags.n_matrix_tags(),
            options.stale_block_policy,
        );
        let contributions = ContributionCache::new(tags.n_vector_tags(), tags.n_matrix_tags());
        let max_order = system.max_field_order();
        let volume_order = options.volume_order(max_order);
        let face_order = options.face_order(max_order);
        Ok(Self {
            options,
            cache: QuadratureCache::new(),
            mapper,
            blocks,
            contributions,
            state: AssemblyState::Idle,
            current: CurrentGeometry::default(),
            dofs: std::array::from_fn(|_| vec![Vec::new(); n_vars]),
            nonlocal_columns: vec![Vec::new(); n_vars],
            seeds: Vec::new(),
            inverse_scratch: ReferenceShapeEval::default(),
            points: Vec::new(),
            volume_order,
            face_order,
            system,
        })
    }

    pub fn system(&self) -> &Arc<System> {
        &self.system
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn quadrature_cache(&self) -> &QuadratureCache {
        &self.cache
    }

    pub fn mapper(&self) -> &GeometricMapper {
        &self.mapper
    }

    pub fn block_stats(&self) -> BlockStats {
        self.blocks.stats()
    }

    /// Turns on AD geometry for the context. Enabling it for the neighbor context also enables it
    /// for the face context, whose weights the neighbor shares.
    pub fn enable_ad(&mut self, context: FeContext) {
        self.mapper.enable_ad(context);
        if context == FeContext::Neighbor {
            self.mapper.enable_ad(FeContext::Face);
        }
    }

    pub fn enable_curvatures(&mut self) {
        self.mapper.enable_curvatures();
    }

    /// Opts in to the non-local Jacobian block coupling the local test functions of `ivar` with
    /// every dof of `jvar`.
    pub fn enable_nonlocal_jacobian(&mut self, ivar: VariableId, jvar: VariableId) -> Result<(), AssemblyError> {
        self.system.variable(ivar)?;
        self.system.variable(jvar)?;
        self.blocks.enable_nonlocal(ivar.0, jvar.0);
        self.nonlocal_columns[jvar.0] = self.system.dof_map().variable_dofs(jvar);
        Ok(())
    }

    fn check(&self, allowed: bool, operation: &'static str) -> Result<(), AssemblyError> {
        if allowed || !self.options.check_transitions {
            Ok(())
        } else {
            Err(AssemblyError::InvalidTransition {
                state: self.state,
                operation,
            })
        }
    }

    fn current_elem(&self, operation: &'static str) -> Result<&Elem, AssemblyError> {
        self.current
            .elem
            .as_ref()
            .ok_or(AssemblyError::NoCurrentElement { operation })
    }

    fn fetch_dofs(&mut self, kind: LocalKind, elem: Option<&Elem>) {
        let dof_map = self.system.dof_map();
        for (var, dofs) in self.dofs[kind.index()].iter_mut().enumerate() {
            match elem {
                Some(elem) => dof_map.dof_indices(elem, VariableId(var), dofs),
                None => dofs.clear(),
            }
        }
    }

    fn seeds_for(&mut self, context: FeContext, elem: &Elem) -> bool {
        let wanted = self.mapper.ad_enabled(context) && !self.system.displacements().is_empty();
        if wanted {
            self.system.nodal_seeds(elem, &mut self.seeds);
        }
        wanted
    }

    fn begin_element(&mut self, elem: &Elem) {
        self.blocks.invalidate();
        for context in [FeContext::Volume, FeContext::Face, FeContext::Neighbor, FeContext::Lower] {
            self.mapper.invalidate(context);
        }
        self.current = CurrentGeometry {
            elem: Some(elem.clone()),
            segment: self.current.segment.take(),
            ..CurrentGeometry::default()
        };
        self.fetch_dofs(LocalKind::Element, Some(elem));
        self.fetch_dofs(LocalKind::Neighbor, None);
        self.fetch_dofs(LocalKind::Lower, None);
    }

    fn map_volume(&mut self, elem: &Elem, source: PointSource) -> Result<(), AssemblyError> {
        let coord = self.system.coordinate_system(elem.subdomain());
        let seeded = self.seeds_for(FeContext::Volume, elem);
        let seeds = seeded.then_some(self.seeds.as_slice());
        self.mapper
            .reinit_interior(FeContext::Volume, &mut self.cache, elem, source, coord, seeds, true)?;
        self.state = AssemblyState::ElementReady;
        Ok(())
    }

    /// Positions the assembly on `elem` with the volume rule. Starts a new element: every block
    /// and every other context becomes stale.
    pub fn reinit(&mut self, elem: &Elem) -> Result<(), AssemblyError> {
        self.begin_element(elem);
        let order = self.volume_order;
        self.map_volume(elem, PointSource::Rule { order })
    }

    /// Like [`Self::reinit`] at caller-provided reference points (unit weights unless given).
    pub fn reinit_at_reference(
        &mut self,
        elem: &Elem,
        points: &[Point3<f64>],
        weights: Option<&[f64]>,
    ) -> Result<(), AssemblyError> {
        self.begin_element(elem);
        self.map_volume(elem, PointSource::Custom { points, weights })
    }

    /// Like [`Self::reinit`] at physical points inside the element.
    pub fn reinit_at_physical(&mut self, elem: &Elem, points: &[Point3<f64>]) -> Result<(), AssemblyError> {
        self.begin_element(elem);
        let mut reference = std::mem::take(&mut self.points);
        reference.clear();
        for point in points {
            reference.push(inverse_map(elem, point, &mut self.inverse_scratch)?);
        }
        let result = self.map_volume(elem, PointSource::Custom { points: &reference, weights: None });
        self.points = reference;
        result
    }

    fn map_face(&mut self, side: usize, source: PointSource) -> Result<(), AssemblyError> {
        let elem = self.current_elem("face reinit")?.clone();
        let coord = self.system.coordinate_system(elem.subdomain());
        let seeded = self.seeds_for(FeContext::Face, &elem);
        let seeds = seeded.then_some(self.seeds.as_slice());
        self.mapper
            .reinit_side(FeContext::Face, &mut self.cache, &elem, side, source, coord, seeds)?;
        self.current.side = Some(side);
        self.state = AssemblyState::FaceReady;
        Ok(())
    }

    /// Reinitializes the face context on side `side` of the current element.
    pub fn reinit_face(&mut self, side: usize) -> Result<(), AssemblyError> {
        let order = self.face_order;
        self.map_face(side, PointSource::Rule { order })
    }

    /// Reinitializes the face context at points given in the side's reference coordinates.
    pub fn reinit_face_at(&mut self, side: usize, points: &[Point3<f64>], weights: Option<&[f64]>) -> Result<(), AssemblyError> {
        self.map_face(side, PointSource::Custom { points, weights })
    }

    /// Sets the boundary id the current face belongs to, if any.
    pub fn set_current_boundary(&mut self, boundary: Option<BoundaryId>) {
        self.current.boundary = boundary;
    }

    fn map_neighbor(&mut self, neighbor: &Elem, neighbor_side: usize, points: &[Point3<f64>]) -> Result<(), AssemblyError> {
        self.current_elem("neighbor reinit")?;
        let coord = self.system.coordinate_system(neighbor.subdomain());
        let seeded = self.seeds_for(FeContext::Neighbor, neighbor);
        let seeds = seeded.then_some(self.seeds.as_slice());
        let source = PointSource::Custom { points, weights: None };
        self.mapper.reinit_side(
            FeContext::Neighbor,
            &mut self.cache,
            neighbor,
            neighbor_side,
            source,
            coord,
            seeds,
        )?;
        self.current.neighbor = Some(neighbor.clone());
        self.current.neighbor_side = Some(neighbor_side);
        self.fetch_dofs(LocalKind::Neighbor, Some(neighbor));
        self.state = AssemblyState::NeighborReady;
        Ok(())
    }

    /// Maps physical points on side `neighbor_side` of `neighbor` to the side's reference
    /// coordinates.
    fn neighbor_side_points(
        &mut self,
        neighbor: &Elem,
        neighbor_side: usize,
        physical: &[Point3<f64>],
    ) -> Result<Vec<Point3<f64>>, AssemblyError> {
        let side_elem = neighbor.build_side(neighbor_side)?;
        physical
            .iter()
            .map(|point| inverse_map(&side_elem, point, &mut self.inverse_scratch))
            .collect()
    }

    /// Reinitializes side `side` of the current element and the matching side of its neighbor.
    ///
    /// The neighbor is evaluated at the images of the face quadrature points and integrates with
    /// the face weights.
    pub fn reinit_elem_and_neighbor(&mut self, side: usize, neighbor: &Elem, neighbor_side: usize) -> Result<(), AssemblyError> {
        self.reinit_face(side)?;
        let physical = self.mapper.qpoints(FeContext::Face)?.to_vec();
        let reference = self.neighbor_side_points(neighbor, neighbor_side, &physical)?;
        self.map_neighbor(neighbor, neighbor_side, &reference)?;
        self.mapper.share_face_weights_with_neighbor()
    }

    /// Reinitializes the neighbor context at points in the reference coordinates of its side.
    pub fn reinit_neighbor_at(&mut self, neighbor: &Elem, neighbor_side: usize, points: &[Point3<f64>]) -> Result<(), AssemblyError> {
        self.map_neighbor(neighbor, neighbor_side, points)
    }

    /// Reinitializes the neighbor context at physical points on its side.
    pub fn reinit_neighbor_at_physical(
        &mut self,
        neighbor: &Elem,
        neighbor_side: usize,
        points: &[Point3<f64>],
    ) -> Result<(), AssemblyError> {
        let reference = self.neighbor_side_points(neighbor, neighbor_side, points)?;
        self.map_neighbor(neighbor, neighbor_side, &reference)
    }

    fn map_lower(&mut self, lower: &Elem, source: PointSource) -> Result<(), AssemblyError> {
        self.current_elem("lower-dimensional reinit")?;
        let coord = self.system.coordinate_system(lower.subdomain());
        let seeded = self.seeds_for(FeContext::Lower, lower);
        let seeds = seeded.then_some(self.seeds.as_slice());
        self.mapper
            .reinit_interior(FeContext::Lower, &mut self.cache, lower, source, coord, seeds, true)?;
        self.current.lower = Some(lower.clone());
        self.fetch_dofs(LocalKind::Lower, Some(lower));
        self.state = AssemblyState::LowerReady;
        Ok(())
    }

    /// Reinitializes the lower-dimensional context on `lower` with the face rule.
    pub fn reinit_lower_d_elem(&mut self, lower: &Elem) -> Result<(), AssemblyError> {
        let order = self.face_order;
        self.map_lower(lower, PointSource::Rule { order })
    }

    pub fn reinit_lower_d_elem_at(&mut self, lower: &Elem, points: &[Point3<f64>], weights: Option<&[f64]>) -> Result<(), AssemblyError> {
        self.map_lower(lower, PointSource::Custom { points, weights })
    }

    /// Maps a mortar segment. Only geometry is computed; segments carry no shape functions.
    pub fn reinit_mortar_elem(&mut self, segment: &Elem) -> Result<(), AssemblyError> {
        let coord = self.system.coordinate_system(segment.subdomain());
        let order = self.face_order;
        self.mapper.reinit_interior(
            FeContext::MortarSegment,
            &mut self.cache,
            segment,
            PointSource::Rule { order },
            coord,
            None,
            false,
        )?;
        self.current.segment = Some(segment.clone());
        Ok(())
    }

    pub fn reinit_node(&mut self, node: usize, point: &Point3<f64>) {
        self.current.node = Some((node, *point));
    }

    pub fn reinit_neighbor_node(&mut self, node: usize, point: &Point3<f64>) {
        self.current.neighbor_node = Some((node, *point));
    }

    fn counts(&self, kind: LocalKind) -> Vec<usize> {
        self.system
            .variables()
            .iter()
            .zip(&self.dofs[kind.index()])
            .map(|(info, dofs)| match info.kind.space() {
                DofSpace::Solution => dofs.len(),
                DofSpace::Aux => 0,
            })
            .collect()
    }

    /// Sizes and zeroes the element residual and element-element Jacobian blocks (and the
    /// non-local blocks, if any were enabled).
    pub fn prepare(&mut self) -> Result<(), AssemblyError> {
        self.check(self.mapper.is_valid(FeContext::Volume), "prepare")?;
        let counts = self.counts(LocalKind::Element);
        self.blocks
            .prepare(LocalKind::Element, &counts, self.system.coupling());
        if self.blocks.nonlocal_pairs().next().is_some() {
            let global_counts: Vec<usize> = self.nonlocal_columns.iter().map(Vec::len).collect();
            self.blocks.prepare_nonlocal(&counts, &global_counts);
        }
        self.state = AssemblyState::BlocksPrepared;
        Ok(())
    }

    /// Sizes and zeroes the neighbor residual blocks and the element/neighbor Jacobian blocks.
    pub fn prepare_neighbor(&mut self) -> Result<(), AssemblyError> {
        self.check(self.mapper.is_valid(FeContext::Neighbor), "prepare_neighbor")?;
        let element = self.counts(LocalKind::Element);
        let neighbor = self.counts(LocalKind::Neighbor);
        self.blocks
            .prepare_neighbor(&element, &neighbor, self.system.coupling());
        self.state = AssemblyState::BlocksPrepared;
        Ok(())
    }

    /// Sizes and zeroes the lower-dimensional residual blocks and every Jacobian block involving
    /// the lower element.
    pub fn prepare_lower(&mut self) -> Result<(), AssemblyError> {
        self.check(self.mapper.is_valid(FeContext::Lower), "prepare_lower")?;
        let element = self.counts(LocalKind::Element);
        let neighbor = self.counts(LocalKind::Neighbor);
        let lower = self.counts(LocalKind::Lower);
        self.blocks
            .prepare_lower(&element, &neighbor, &lower, self.system.coupling());
        self.state = AssemblyState::BlocksPrepared;
        Ok(())
    }

    /// The view physics objects read shape functions and geometry from.
    pub fn fe(&self) -> FeView<'_> {
        FeView::new(&self.system, &self.mapper, &self.current, &self.dofs)
    }

    /// A zeroed local residual sized for `var` on the `kind` element, together with the view to
    /// compute it from. Add it to the tagged blocks with
    /// [`Self::accumulate_tagged_local_residual`].
    pub fn local_residual(&mut self, kind: LocalKind, var: VariableId) -> Result<(FeView<'_>, &mut DVector<f64>), AssemblyError> {
        let len = self.dofs[kind.index()]
            .get(var.0)
            .map(Vec::len)
            .ok_or(AssemblyError::UnknownVariable {
                name: format!("#{}", var.0),
            })?;
        let view = FeView::new(&self.system, &self.mapper, &self.current, &self.dofs);
        Ok((view, self.blocks.scratch_residual(len)))
    }

    /// A zeroed local Jacobian block for the variable pair, sized by the row and column elements
    /// of `jacobian_type`.
    pub fn local_jacobian(
        &mut self,
        jacobian_type: JacobianType,
        ivar: VariableId,
        jvar: VariableId,
    ) -> Result<(FeView<'_>, &mut DMatrix<f64>), AssemblyError> {
        let len = |kind: LocalKind, var: VariableId| {
            self.dofs[kind.index()]
                .get(var.0)
                .map(Vec::len)
                .ok_or(AssemblyError::UnknownVariable {
                    name: format!("#{}", var.0),
                })
        };
        let nrows = len(jacobian_type.row_kind(), ivar)?;
        let ncols = len(jacobian_type.col_kind(), jvar)?;
        let view = FeView::new(&self.system, &self.mapper, &self.current, &self.dofs);
        Ok((view, self.blocks.scratch_jacobian(nrows, ncols)))
    }

    /// Adds the local residual into the `(kind, tag, var)` block of every tag in `tags`.
    pub fn accumulate_tagged_local_residual(
        &mut self,
        kind: LocalKind,
        var: VariableId,
        tags: &TagSet<VectorTag>,
    ) -> Result<(), AssemblyError> {
        self.check(self.blocks.is_residual_prepared(kind), "accumulate_tagged_local_residual")?;
        self.blocks
            .accumulate_scratch_residual(kind, var.0, tags.iter(), self.options.compute_absolute_residual)?;
        self.state = AssemblyState::Accumulated;
        Ok(())
    }

    /// Adds the local Jacobian into the `(type, tag, ivar, jvar)` block of every tag in `tags`.
    pub fn accumulate_tagged_local_matrix(
        &mut self,
        jacobian_type: JacobianType,
        ivar: VariableId,
        jvar: VariableId,
        tags: &TagSet<MatrixTag>,
    ) -> Result<(), AssemblyError> {
        self.check(
            self.blocks.is_jacobian_prepared(jacobian_type),
            "accumulate_tagged_local_matrix",
        )?;
        self.blocks
            .accumulate_scratch_jacobian(jacobian_type, ivar.0, jvar.0, tags.iter(), false)?;
        self.state = AssemblyState::Accumulated;
        Ok(())
    }

    /// Adds the local Jacobian into `(type, tag, ivar, jvar)` and its transpose into
    /// `(type^T, tag, jvar, ivar)`.
    pub fn accumulate_tagged_symmetric(
        &mut self,
        jacobian_type: JacobianType,
        ivar: VariableId,
        jvar: VariableId,
        tags: &TagSet<MatrixTag>,
    ) -> Result<(), AssemblyError> {
        let prepared = self.blocks.is_jacobian_prepared(jacobian_type)
            && self.blocks.is_jacobian_prepared(jacobian_type.transpose());
        self.check(prepared, "accumulate_tagged_symmetric")?;
        self.blocks
            .accumulate_scratch_jacobian(jacobian_type, ivar.0, jvar.0, tags.iter(), true)?;
        self.state = AssemblyState::Accumulated;
        Ok(())
    }

    /// Direct access to a tagged residual block. Stale requests are diagnosed according to the
    /// configured [`StaleBlockPolicy`](crate::config::StaleBlockPolicy).
    pub fn residual_block(&mut self, kind: LocalKind, tag: VectorTag, var: VariableId) -> Result<&mut DVector<f64>, AssemblyError> {
        self.blocks.try_residual_block(kind, tag, var.0)
    }

    pub fn jacobian_block(
        &mut self,
        jacobian_type: JacobianType,
        tag: MatrixTag,
        ivar: VariableId,
        jvar: VariableId,
    ) -> Result<&mut DMatrix<f64>, AssemblyError> {
        self.blocks
            .try_jacobian_block(jacobian_type, tag, ivar.0, jvar.0)
    }

    /// The non-local block of the pair; empty unless enabled and prepared.
    pub fn nonlocal_block(&mut self, tag: MatrixTag, ivar: VariableId, jvar: VariableId) -> &mut DMatrix<f64> {
        self.blocks.nonlocal_block(tag, ivar.0, jvar.0)
    }

    fn source(&self) -> BlockSource<'_> {
        BlockSource {
            blocks: &self.blocks,
            system: &self.system,
            dofs: &self.dofs,
        }
    }

    fn record_mismatches(&mut self, mismatched: usize) {
        for _ in 0..mismatched {
            self.blocks.count_mismatch();
        }
    }

    fn add_residual_kind<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        kind: LocalKind,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        let absolute = self.options.compute_absolute_residual;
        let mismatched = scatter::add_residual_blocks(&self.source(), kind, targets, absolute)?;
        self.record_mismatches(mismatched);
        Ok(())
    }

    fn add_jacobian_types<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        types: &[JacobianType],
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        for &jacobian_type in types {
            let mismatched = scatter::add_jacobian_blocks(&self.source(), jacobian_type, targets)?;
            self.record_mismatches(mismatched);
        }
        Ok(())
    }

    /// Adds the element residual blocks to the residual of every tag with a target.
    pub fn add_residual<V: GlobalVector, M: GlobalMatrix>(&mut self, targets: &GlobalTargets<V, M>) -> Result<(), AssemblyError> {
        self.add_residual_kind(LocalKind::Element, targets)
    }

    pub fn add_residual_neighbor<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.add_residual_kind(LocalKind::Neighbor, targets)
    }

    pub fn add_residual_lower<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.add_residual_kind(LocalKind::Lower, targets)
    }

    fn set_residual_kind<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        kind: LocalKind,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        let mismatched = scatter::set_residual_blocks(&self.source(), kind, targets)?;
        self.record_mismatches(mismatched);
        Ok(())
    }

    /// Overwrites the global entries of the element residual blocks.
    pub fn set_residual<V: GlobalVector, M: GlobalMatrix>(&mut self, targets: &GlobalTargets<V, M>) -> Result<(), AssemblyError> {
        self.set_residual_kind(LocalKind::Element, targets)
    }

    /// Overwrites the global entries of the neighbor residual blocks.
    pub fn set_residual_neighbor<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.set_residual_kind(LocalKind::Neighbor, targets)
    }

    pub fn add_jacobian<V: GlobalVector, M: GlobalMatrix>(&mut self, targets: &GlobalTargets<V, M>) -> Result<(), AssemblyError> {
        self.add_jacobian_types(&[JacobianType::ElementElement], targets)
    }

    pub fn add_jacobian_neighbor<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.add_jacobian_types(&JacobianType::NEIGHBOR, targets)
    }

    pub fn add_jacobian_lower<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.add_jacobian_types(&JacobianType::LOWER, targets)
    }

    pub fn add_jacobian_nonlocal<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        let mismatched = scatter::add_nonlocal_blocks(&self.source(), &self.nonlocal_columns, targets)?;
        self.record_mismatches(mismatched);
        Ok(())
    }

    fn cache_residual_kind(&mut self, kind: LocalKind) -> Result<(), AssemblyError> {
        let absolute = self.options.compute_absolute_residual;
        let source = BlockSource {
            blocks: &self.blocks,
            system: &self.system,
            dofs: &self.dofs,
        };
        let mismatched = self
            .contributions
            .cache_residual_blocks(&source, kind, absolute)?;
        self.record_mismatches(mismatched);
        self.blocks.zero_residuals(kind);
        Ok(())
    }

    fn cache_jacobian_types(&mut self, types: &[JacobianType]) -> Result<(), AssemblyError> {
        for &jacobian_type in types {
            let source = BlockSource {
                blocks: &self.blocks,
                system: &self.system,
                dofs: &self.dofs,
            };
            let mismatched = self
                .contributions
                .cache_jacobian_blocks(&source, jacobian_type)?;
            self.record_mismatches(mismatched);
            self.blocks.zero_jacobians(jacobian_type);
        }
        Ok(())
    }

    /// Appends the element residual blocks to the contribution cache and zeroes them.
    pub fn cache_residual(&mut self) -> Result<(), AssemblyError> {
        self.cache_residual_kind(LocalKind::Element)
    }

    pub fn cache_residual_neighbor(&mut self) -> Result<(), AssemblyError> {
        self.cache_residual_kind(LocalKind::Neighbor)
    }

    pub fn cache_residual_lower(&mut self) -> Result<(), AssemblyError> {
        self.cache_residual_kind(LocalKind::Lower)
    }

    pub fn cache_jacobian(&mut self) -> Result<(), AssemblyError> {
        self.cache_jacobian_types(&[JacobianType::ElementElement])
    }

    pub fn cache_jacobian_neighbor(&mut self) -> Result<(), AssemblyError> {
        self.cache_jacobian_types(&JacobianType::NEIGHBOR)
    }

    pub fn cache_jacobian_lower(&mut self) -> Result<(), AssemblyError> {
        self.cache_jacobian_types(&JacobianType::LOWER)
    }

    pub fn cache_jacobian_nonlocal(&mut self) -> Result<(), AssemblyError> {
        let source = BlockSource {
            blocks: &self.blocks,
            system: &self.system,
            dofs: &self.dofs,
        };
        let mismatched = self
            .contributions
            .cache_nonlocal_blocks(&source, &self.nonlocal_columns)?;
        self.record_mismatches(mismatched);
        self.blocks.zero_nonlocal();
        Ok(())
    }

    /// Number of cached residual and Jacobian entries waiting to be drained.
    pub fn n_cached_entries(&self) -> (usize, usize) {
        (
            self.contributions.n_residual_entries(),
            self.contributions.n_jacobian_entries(),
        )
    }

    /// Adds every cached residual entry to its target and empties the cache.
    pub fn add_cached_residuals<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.contributions
            .drain_residuals(self.system.tags().vector_tags(), targets)
    }

    pub fn add_cached_jacobian<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        self.contributions
            .drain_jacobians(self.system.tags().matrix_tags(), targets)
    }

    /// Drains both caches.
    pub fn add_cached<V: GlobalVector, M: GlobalMatrix>(&mut self, targets: &GlobalTargets<V, M>) -> Result<(), AssemblyError> {
        self.add_cached_residuals(targets)?;
        self.add_cached_jacobian(targets)
    }

    /// Volume of the current element.
    pub fn elem_volume(&self) -> Result<f64, AssemblyError> {
        self.mapper.volume(FeContext::Volume)
    }

    /// Volume (length, area) of the current side.
    pub fn side_volume(&self) -> Result<f64, AssemblyError> {
        self.mapper.volume(FeContext::Face)
    }

    /// Logs the block statistics of this assembly.
    pub fn log_stats(&self) {
        let stats = self.blocks.stats();
        let cache = self.cache.stats();
        debug!(
            "Assembly statistics: {} block reallocations, {} stale block requests, {} mismatched blocks skipped, \
            {} rules and {} reference tables built",
            stats.reallocations, stats.stale_requests, stats.skipped_mismatched, cache.rules_built, cache.tables_built
        );
    }
}
