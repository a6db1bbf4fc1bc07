//! Dense local residual and Jacobian blocks, reused from element to element.
use crate::assembly::coupling::CouplingMatrix;
use crate::assembly::tags::{MatrixTag, Tag, VectorTag};
use crate::config::StaleBlockPolicy;
use crate::error::AssemblyError;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The element a local residual block belongs to.
///
/// In mortar terms `Element` is the secondary interior element, `Neighbor` the primary interior
/// element and `Lower` the secondary lower-dimensional element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocalKind {
    Element,
    Neighbor,
    Lower,
}

impl LocalKind {
    pub const ALL: [LocalKind; 3] = [LocalKind::Element, LocalKind::Neighbor, LocalKind::Lower];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// The (row element, column element) combination of a local Jacobian block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JacobianType {
    ElementElement,
    ElementNeighbor,
    NeighborElement,
    NeighborNeighbor,
    LowerLower,
    LowerElement,
    LowerNeighbor,
    ElementLower,
    NeighborLower,
}

impl JacobianType {
    pub const ALL: [JacobianType; 9] = [
        JacobianType::ElementElement,
        JacobianType::ElementNeighbor,
        JacobianType::NeighborElement,
        JacobianType::NeighborNeighbor,
        JacobianType::LowerLower,
        JacobianType::LowerElement,
        JacobianType::LowerNeighbor,
        JacobianType::ElementLower,
        JacobianType::NeighborLower,
    ];

    pub const NEIGHBOR: [JacobianType; 3] = [
        JacobianType::ElementNeighbor,
        JacobianType::NeighborElement,
        JacobianType::NeighborNeighbor,
    ];

    pub const LOWER: [JacobianType; 5] = [
        JacobianType::LowerLower,
        JacobianType::LowerElement,
        JacobianType::LowerNeighbor,
        JacobianType::ElementLower,
        JacobianType::NeighborLower,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn row_kind(self) -> LocalKind {
        use JacobianType::*;
        match self {
            ElementElement | ElementNeighbor | ElementLower => LocalKind::Element,
            NeighborElement | NeighborNeighbor | NeighborLower => LocalKind::Neighbor,
            LowerLower | LowerElement | LowerNeighbor => LocalKind::Lower,
        }
    }

    pub fn col_kind(self) -> LocalKind {
        use JacobianType::*;
        match self {
            ElementElement | NeighborElement | LowerElement => LocalKind::Element,
            ElementNeighbor | NeighborNeighbor | LowerNeighbor => LocalKind::Neighbor,
            LowerLower | ElementLower | NeighborLower => LocalKind::Lower,
        }
    }

    /// The type with rows and columns swapped.
    pub fn transpose(self) -> JacobianType {
        use JacobianType::*;
        match self {
            ElementElement => ElementElement,
            ElementNeighbor => NeighborElement,
            NeighborElement => ElementNeighbor,
            NeighborNeighbor => NeighborNeighbor,
            LowerLower => LowerLower,
            LowerElement => ElementLower,
            ElementLower => LowerElement,
            LowerNeighbor => NeighborLower,
            NeighborLower => LowerNeighbor,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BlockStats {
    /// Blocks whose shape changed and had to be reallocated.
    pub reallocations: usize,
    /// Requests for blocks that were not prepared.
    pub stale_requests: usize,
    /// Blocks skipped at accumulation or scatter because their shape did not match the dofs.
    pub skipped_mismatched: usize,
}

#[derive(Debug, Default)]
struct ResidualBlocks {
    blocks: Vec<DVector<f64>>,
    prepared: Vec<bool>,
    absolute: Vec<DVector<f64>>,
}

#[derive(Debug, Default)]
struct JacobianBlocks {
    blocks: Vec<DMatrix<f64>>,
    prepared: Vec<bool>,
}

fn zero_vector(block: &mut DVector<f64>, len: usize, stats: &mut BlockStats) {
    if block.len() == len {
        block.fill(0.0);
    } else {
        *block = DVector::zeros(len);
        stats.reallocations += 1;
    }
}

fn zero_matrix(block: &mut DMatrix<f64>, nrows: usize, ncols: usize, stats: &mut BlockStats) {
    if block.shape() == (nrows, ncols) {
        block.fill(0.0);
    } else {
        *block = DMatrix::zeros(nrows, ncols);
        stats.reallocations += 1;
    }
}

/// Local blocks of all tags and variables of one assembly.
///
/// Residual blocks are indexed by `(kind, tag, variable)`, Jacobian blocks by
/// `(type, tag, row variable, column variable)`. A block is only valid between the `prepare*`
/// call that sized it and the next volume reinit.
#[derive(Debug)]
pub struct LocalBlocks {
    n_vars: usize,
    n_vector_tags: usize,
    n_matrix_tags: usize,
    residuals: [ResidualBlocks; 3],
    jacobians: [JacobianBlocks; 9],
    nonlocal_pairs: BTreeSet<(usize, usize)>,
    nonlocal: Vec<DMatrix<f64>>,
    nonlocal_prepared: bool,
    scratch_residual: DVector<f64>,
    scratch_jacobian: DMatrix<f64>,
    empty_vector: DVector<f64>,
    empty_matrix: DMatrix<f64>,
    policy: StaleBlockPolicy,
    stats: BlockStats,
}

impl LocalBlocks {
    pub fn new(n_vars: usize, n_vector_tags: usize, n_matrix_tags: usize, policy: StaleBlockPolicy) -> Self {
        let residuals = std::array::from_fn(|_| {
            let n = n_vector_tags * n_vars;
            ResidualBlocks {
                blocks: vec![DVector::zeros(0); n],
                prepared: vec![false; n],
                absolute: vec![DVector::zeros(0); n_vars],
            }
        });
        let jacobians = std::array::from_fn(|_| {
            let n = n_matrix_tags * n_vars * n_vars;
            JacobianBlocks {
                blocks: vec![DMatrix::zeros(0, 0); n],
                prepared: vec![false; n],
            }
        });
        Self {
            n_vars,
            n_vector_tags,
            n_matrix_tags,
            residuals,
            jacobians,
            nonlocal_pairs: BTreeSet::new(),
            nonlocal: Vec::new(),
            nonlocal_prepared: false,
            scratch_residual: DVector::zeros(0),
            scratch_jacobian: DMatrix::zeros(0, 0),
            empty_vector: DVector::zeros(0),
            empty_matrix: DMatrix::zeros(0, 0),
            policy,
            stats: BlockStats::default(),
        }
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn stats(&self) -> BlockStats {
        self.stats
    }

    pub(crate) fn count_mismatch(&mut self) {
        self.stats.skipped_mismatched += 1;
    }

    fn skip_mismatched(&mut self, what: std::fmt::Arguments) {
        warn!("Skipping {what}");
        self.count_mismatch();
    }

    fn residual_index(&self, tag: VectorTag, var: usize) -> Option<usize> {
        (tag.index() < self.n_vector_tags && var < self.n_vars).then(|| tag.index() * self.n_vars + var)
    }

    fn jacobian_index(&self, tag: MatrixTag, ivar: usize, jvar: usize) -> Option<usize> {
        let n = self.n_vars;
        (tag.index() < self.n_matrix_tags && ivar < n && jvar < n).then(|| (tag.index() * n + ivar) * n + jvar)
    }

    /// Marks every block as stale.
    pub fn invalidate(&mut self) {
        for residuals in &mut self.residuals {
            residuals.prepared.fill(false);
        }
        for jacobians in &mut self.jacobians {
            jacobians.prepared.fill(false);
        }
        self.nonlocal_prepared = false;
    }

    fn prepare_residuals(&mut self, kind: LocalKind, counts: &[usize]) {
        let n_vars = self.n_vars;
        let residuals = &mut self.residuals[kind.index()];
        for tag in 0..self.n_vector_tags {
            for (var, &count) in counts.iter().enumerate().take(n_vars) {
                let idx = tag * n_vars + var;
                zero_vector(&mut residuals.blocks[idx], count, &mut self.stats);
                residuals.prepared[idx] = true;
            }
        }
        for (var, &count) in counts.iter().enumerate().take(n_vars) {
            zero_vector(&mut residuals.absolute[var], count, &mut self.stats);
        }
    }

    fn prepare_jacobians(
        &mut self,
        jacobian_type: JacobianType,
        row_counts: &[usize],
        col_counts: &[usize],
        coupling: &CouplingMatrix,
    ) {
        let n = self.n_vars;
        let jacobians = &mut self.jacobians[jacobian_type.index()];
        jacobians.prepared.fill(false);
        for tag in 0..self.n_matrix_tags {
            for (i, j) in coupling.pairs() {
                if i >= n || j >= n {
                    continue;
                }
                let idx = (tag * n + i) * n + j;
                let rows = row_counts.get(i).copied().unwrap_or(0);
                let cols = col_counts.get(j).copied().unwrap_or(0);
                zero_matrix(&mut jacobians.blocks[idx], rows, cols, &mut self.stats);
                jacobians.prepared[idx] = true;
            }
        }
    }

    /// Sizes and zeroes the `kind` residual blocks and the matching diagonal Jacobian blocks.
    pub fn prepare(&mut self, kind: LocalKind, counts: &[usize], coupling: &CouplingMatrix) {
        self.prepare_residuals(kind, counts);
        let jacobian_type = match kind {
            LocalKind::Element => JacobianType::ElementElement,
            LocalKind::Neighbor => JacobianType::NeighborNeighbor,
            LocalKind::Lower => JacobianType::LowerLower,
        };
        self.prepare_jacobians(jacobian_type, counts, counts, coupling);
    }

    /// Prepares neighbor residuals and the element/neighbor Jacobian combinations.
    pub fn prepare_neighbor(&mut self, element_counts: &[usize], neighbor_counts: &[usize], coupling: &CouplingMatrix) {
        self.prepare_residuals(LocalKind::Neighbor, neighbor_counts);
        self.prepare_jacobians(JacobianType::ElementNeighbor, element_counts, neighbor_counts, coupling);
        self.prepare_jacobians(JacobianType::NeighborElement, neighbor_counts, element_counts, coupling);
        self.prepare_jacobians(JacobianType::NeighborNeighbor, neighbor_counts, neighbor_counts, coupling);
    }

    /// Prepares lower-dimensional residuals and every Jacobian combination involving the lower
    /// element.
    pub fn prepare_lower(
        &mut self,
        element_counts: &[usize],
        neighbor_counts: &[usize],
        lower_counts: &[usize],
        coupling: &CouplingMatrix,
    ) {
        self.prepare_residuals(LocalKind::Lower, lower_counts);
        let counts = |kind: LocalKind| match kind {
            LocalKind::Element => element_counts,
            LocalKind::Neighbor => neighbor_counts,
            LocalKind::Lower => lower_counts,
        };
        for jacobian_type in JacobianType::LOWER {
            let (rows, cols) = (counts(jacobian_type.row_kind()), counts(jacobian_type.col_kind()));
            self.prepare_jacobians(jacobian_type, rows, cols, coupling);
        }
    }

    /// Opts in to a non-local Jacobian block for the pair.
    pub fn enable_nonlocal(&mut self, ivar: usize, jvar: usize) {
        if self.nonlocal_pairs.insert((ivar, jvar)) {
            debug!(
                "Enabled non-local Jacobian block ({ivar}, {jvar}); its columns span every dof of variable {jvar}"
            );
        }
    }

    pub fn nonlocal_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.nonlocal_pairs.iter().copied()
    }

    /// Sizes the non-local blocks: local test count of the row variable times global dof count of
    /// the column variable.
    pub fn prepare_nonlocal(&mut self, row_counts: &[usize], global_col_counts: &[usize]) {
        let n = self.n_vars;
        self.nonlocal
            .resize(self.n_matrix_tags * n * n, DMatrix::zeros(0, 0));
        let pairs: Vec<_> = self.nonlocal_pairs.iter().copied().collect();
        for tag in 0..self.n_matrix_tags {
            for &(i, j) in &pairs {
                let rows = row_counts.get(i).copied().unwrap_or(0);
                let cols = global_col_counts.get(j).copied().unwrap_or(0);
                zero_matrix(&mut self.nonlocal[(tag * n + i) * n + j], rows, cols, &mut self.stats);
            }
        }
        self.nonlocal_prepared = true;
    }

    fn stale(&mut self, what: std::fmt::Arguments) {
        self.stats.stale_requests += 1;
        warn!("Requested {what} which was not prepared for the current element; handing out an empty block");
    }

    /// The residual block, or an empty block (with a warning) if it was not prepared.
    pub fn residual_block(&mut self, kind: LocalKind, tag: VectorTag, var: usize) -> &mut DVector<f64> {
        match self.residual_index(tag, var) {
            Some(idx) if self.residuals[kind.index()].prepared[idx] => &mut self.residuals[kind.index()].blocks[idx],
            _ => {
                self.stale(format_args!("{kind:?} residual block ({tag:?}, variable {var})"));
                self.empty_vector = DVector::zeros(0);
                &mut self.empty_vector
            }
        }
    }

    /// Like [`Self::residual_block`], but fails under [`StaleBlockPolicy::Error`].
    pub fn try_residual_block(
        &mut self,
        kind: LocalKind,
        tag: VectorTag,
        var: usize,
    ) -> Result<&mut DVector<f64>, AssemblyError> {
        let prepared = self
            .residual_index(tag, var)
            .map_or(false, |idx| self.residuals[kind.index()].prepared[idx]);
        if !prepared && self.policy == StaleBlockPolicy::Error {
            self.stats.stale_requests += 1;
            return Err(AssemblyError::StaleResidualBlock {
                kind,
                tag: tag.index(),
                var,
            });
        }
        Ok(self.residual_block(kind, tag, var))
    }

    pub fn jacobian_block(
        &mut self,
        jacobian_type: JacobianType,
        tag: MatrixTag,
        ivar: usize,
        jvar: usize,
    ) -> &mut DMatrix<f64> {
        let t = jacobian_type.index();
        match self.jacobian_index(tag, ivar, jvar) {
            Some(idx) if self.jacobians[t].prepared[idx] => &mut self.jacobians[t].blocks[idx],
            _ => {
                self.stale(format_args!("{jacobian_type:?} Jacobian block ({tag:?}, {ivar}, {jvar})"));
                self.empty_matrix = DMatrix::zeros(0, 0);
                &mut self.empty_matrix
            }
        }
    }

    pub fn try_jacobian_block(
        &mut self,
        jacobian_type: JacobianType,
        tag: MatrixTag,
        ivar: usize,
        jvar: usize,
    ) -> Result<&mut DMatrix<f64>, AssemblyError> {
        let prepared = self
            .jacobian_index(tag, ivar, jvar)
            .map_or(false, |idx| self.jacobians[jacobian_type.index()].prepared[idx]);
        if !prepared && self.policy == StaleBlockPolicy::Error {
            self.stats.stale_requests += 1;
            return Err(AssemblyError::StaleJacobianBlock {
                jacobian_type,
                tag: tag.index(),
                ivar,
                jvar,
            });
        }
        Ok(self.jacobian_block(jacobian_type, tag, ivar, jvar))
    }

    /// The prepared residual block, without diagnostics.
    pub fn residual(&self, kind: LocalKind, tag: VectorTag, var: usize) -> Option<&DVector<f64>> {
        let residuals = &self.residuals[kind.index()];
        self.residual_index(tag, var)
            .filter(|&idx| residuals.prepared[idx])
            .map(|idx| &residuals.blocks[idx])
    }

    pub fn jacobian(&self, jacobian_type: JacobianType, tag: MatrixTag, ivar: usize, jvar: usize) -> Option<&DMatrix<f64>> {
        let jacobians = &self.jacobians[jacobian_type.index()];
        self.jacobian_index(tag, ivar, jvar)
            .filter(|&idx| jacobians.prepared[idx])
            .map(|idx| &jacobians.blocks[idx])
    }

    pub fn nonlocal(&self, tag: MatrixTag, ivar: usize, jvar: usize) -> Option<&DMatrix<f64>> {
        if !self.nonlocal_prepared || !self.nonlocal_pairs.contains(&(ivar, jvar)) {
            return None;
        }
        self.jacobian_index(tag, ivar, jvar)
            .and_then(|idx| self.nonlocal.get(idx))
    }

    pub fn nonlocal_block(&mut self, tag: MatrixTag, ivar: usize, jvar: usize) -> &mut DMatrix<f64> {
        let idx = self
            .jacobian_index(tag, ivar, jvar)
            .filter(|_| self.nonlocal_prepared && self.nonlocal_pairs.contains(&(ivar, jvar)));
        match idx {
            Some(idx) => &mut self.nonlocal[idx],
            None => {
                self.stale(format_args!("non-local Jacobian block ({tag:?}, {ivar}, {jvar})"));
                self.empty_matrix = DMatrix::zeros(0, 0);
                &mut self.empty_matrix
            }
        }
    }

    pub(crate) fn absolute_residual(&self, kind: LocalKind, var: usize) -> Option<&DVector<f64>> {
        self.residuals[kind.index()].absolute.get(var)
    }

    pub fn is_residual_prepared(&self, kind: LocalKind) -> bool {
        self.residuals[kind.index()].prepared.iter().any(|&p| p)
    }

    pub fn is_jacobian_prepared(&self, jacobian_type: JacobianType) -> bool {
        self.jacobians[jacobian_type.index()].prepared.iter().any(|&p| p)
    }

    /// Zeroes every prepared block of the kind (after its contents were cached or added).
    pub(crate) fn zero_residuals(&mut self, kind: LocalKind) {
        let residuals = &mut self.residuals[kind.index()];
        for (block, _) in residuals
            .blocks
            .iter_mut()
            .zip(&residuals.prepared)
            .filter(|(_, &p)| p)
        {
            block.fill(0.0);
        }
        for block in &mut residuals.absolute {
            block.fill(0.0);
        }
    }

    pub(crate) fn zero_jacobians(&mut self, jacobian_type: JacobianType) {
        let jacobians = &mut self.jacobians[jacobian_type.index()];
        for (block, _) in jacobians
            .blocks
            .iter_mut()
            .zip(&jacobians.prepared)
            .filter(|(_, &p)| p)
        {
            block.fill(0.0);
        }
    }

    pub(crate) fn zero_nonlocal(&mut self) {
        for block in &mut self.nonlocal {
            block.fill(0.0);
        }
    }

    /// Zeroed scratch vector of the given length for a physics object to fill.
    pub fn scratch_residual(&mut self, len: usize) -> &mut DVector<f64> {
        zero_vector(&mut self.scratch_residual, len, &mut self.stats);
        &mut self.scratch_residual
    }

    pub fn scratch_jacobian(&mut self, nrows: usize, ncols: usize) -> &mut DMatrix<f64> {
        zero_matrix(&mut self.scratch_jacobian, nrows, ncols, &mut self.stats);
        &mut self.scratch_jacobian
    }

    /// Adds the residual scratch into the `(kind, tag, var)` blocks of every tag.
    ///
    /// Returns an error only for stale blocks under [`StaleBlockPolicy::Error`]. Blocks whose size
    /// does not match the scratch are skipped.
    pub fn accumulate_scratch_residual(
        &mut self,
        kind: LocalKind,
        var: usize,
        tags: impl IntoIterator<Item = VectorTag>,
        absolute: bool,
    ) -> Result<(), AssemblyError> {
        let scratch = std::mem::replace(&mut self.scratch_residual, DVector::zeros(0));
        let result = (|| -> Result<(), AssemblyError> {
            for tag in tags {
                let block = self.try_residual_block(kind, tag, var)?;
                let len = block.len();
                if len == scratch.len() {
                    *block += &scratch;
                } else if !scratch.is_empty() || len != 0 {
                    self.skip_mismatched(format_args!(
                        "local residual of length {} for {kind:?} block ({tag:?}, variable {var}) of length {len}",
                        scratch.len()
                    ));
                }
            }
            if absolute {
                if let Some(block) = self.residuals[kind.index()].absolute.get_mut(var) {
                    if block.len() == scratch.len() {
                        *block += scratch.abs();
                    }
                }
            }
            Ok(())
        })();
        self.scratch_residual = scratch;
        result
    }

    /// Adds the Jacobian scratch into the `(type, tag, ivar, jvar)` blocks of every tag and, if
    /// `symmetric`, its transpose into the `(type^T, tag, jvar, ivar)` blocks.
    pub fn accumulate_scratch_jacobian(
        &mut self,
        jacobian_type: JacobianType,
        ivar: usize,
        jvar: usize,
        tags: impl IntoIterator<Item = MatrixTag>,
        symmetric: bool,
    ) -> Result<(), AssemblyError> {
        let scratch = std::mem::replace(&mut self.scratch_jacobian, DMatrix::zeros(0, 0));
        let result = (|| -> Result<(), AssemblyError> {
            for tag in tags {
                let block = self.try_jacobian_block(jacobian_type, tag, ivar, jvar)?;
                let shape = block.shape();
                if shape == scratch.shape() {
                    *block += &scratch;
                } else {
                    self.skip_mismatched(format_args!(
                        "local Jacobian of shape {:?} for {jacobian_type:?} block ({tag:?}, {ivar}, {jvar}) of shape {shape:?}",
                        scratch.shape()
                    ));
                }
                if symmetric {
                    let transpose = jacobian_type.transpose();
                    let block = self.try_jacobian_block(transpose, tag, jvar, ivar)?;
                    let shape = block.shape();
                    if shape == (scratch.ncols(), scratch.nrows()) {
                        *block += scratch.transpose();
                    } else {
                        self.skip_mismatched(format_args!(
                            "transposed local Jacobian of shape {:?} for {transpose:?} block ({tag:?}, {jvar}, {ivar}) of shape {shape:?}",
                            scratch.shape()
                        ));
                    }
                }
            }
            Ok(())
        })();
        self.scratch_jacobian = scratch;
        result
    }
}
