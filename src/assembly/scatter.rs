//! Transfer of local blocks into global structures, immediately or through a contribution cache.
//!
//! Both paths walk the prepared blocks in the same order (tag, then variable or variable pair,
//! then local entry), so every global entry receives its contributions in the same sequence
//! whether they are added block by block or cached and drained later.
use crate::assembly::blocks::{JacobianType, LocalBlocks, LocalKind};
use crate::assembly::global::{GlobalMatrix, GlobalTargets, GlobalVector};
use crate::assembly::tags::{MatrixTag, Tag, VectorTag};
use crate::error::AssemblyError;
use crate::system::{DofSpace, System};
use log::{trace, warn};
use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;

/// The local blocks of an assembly together with the dofs their rows and columns map to.
pub(crate) struct BlockSource<'a> {
    pub blocks: &'a LocalBlocks,
    pub system: &'a System,
    /// Dofs per [`LocalKind`] and variable.
    pub dofs: &'a [Vec<Vec<usize>>; 3],
}

impl BlockSource<'_> {
    fn is_solution_variable(&self, var: usize) -> bool {
        self.system
            .variables()
            .get(var)
            .map_or(false, |info| info.kind.space() == DofSpace::Solution)
    }

    fn scaling(&self, var: usize) -> f64 {
        self.system
            .variables()
            .get(var)
            .map_or(1.0, |info| info.scaling)
    }

    fn dofs(&self, kind: LocalKind, var: usize) -> &[usize] {
        self.dofs[kind.index()]
            .get(var)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Calls `visit` with `(tag, rows, block, scaling)` for every prepared residual block of `kind`
    /// that has dofs. Returns the number of blocks skipped because their length did not match.
    pub fn visit_residuals(
        &self,
        kind: LocalKind,
        mut visit: impl FnMut(VectorTag, &[usize], &DVector<f64>, f64) -> Result<(), AssemblyError>,
    ) -> Result<usize, AssemblyError> {
        let mut mismatched = 0;
        for tag in self.system.tags().vector_tags() {
            for var in (0..self.system.n_variables()).filter(|&var| self.is_solution_variable(var)) {
                let Some(block) = self.blocks.residual(kind, tag, var) else {
                    continue;
                };
                let rows = self.dofs(kind, var);
                if block.len() != rows.len() {
                    warn!(
                        "Skipping {kind:?} residual block ({tag:?}, variable {var}) of length {} for {} dofs",
                        block.len(),
                        rows.len()
                    );
                    mismatched += 1;
                    continue;
                }
                if !rows.is_empty() {
                    visit(tag, rows, block, self.scaling(var))?;
                }
            }
        }
        Ok(mismatched)
    }

    /// Calls `visit` with `(rows, |block|, |scaling|)` for the absolute residual blocks of `kind`.
    pub fn visit_absolute(
        &self,
        kind: LocalKind,
        mut visit: impl FnMut(&[usize], &DVector<f64>, f64) -> Result<(), AssemblyError>,
    ) -> Result<(), AssemblyError> {
        if !self.blocks.is_residual_prepared(kind) {
            return Ok(());
        }
        for var in (0..self.system.n_variables()).filter(|&var| self.is_solution_variable(var)) {
            let rows = self.dofs(kind, var);
            match self.blocks.absolute_residual(kind, var) {
                Some(block) if !rows.is_empty() && block.len() == rows.len() => {
                    visit(rows, block, self.scaling(var).abs())?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Calls `visit` with `(tag, rows, cols, block, scaling)` for every prepared Jacobian block of
    /// the type. Returns the number of blocks skipped because their shape did not match.
    pub fn visit_jacobians(
        &self,
        jacobian_type: JacobianType,
        mut visit: impl FnMut(MatrixTag, &[usize], &[usize], &DMatrix<f64>, f64) -> Result<(), AssemblyError>,
    ) -> Result<usize, AssemblyError> {
        let mut mismatched = 0;
        for tag in self.system.tags().matrix_tags() {
            for (ivar, jvar) in self.system.coupling().pairs() {
                let Some(block) = self.blocks.jacobian(jacobian_type, tag, ivar, jvar) else {
                    continue;
                };
                let rows = self.dofs(jacobian_type.row_kind(), ivar);
                let cols = self.dofs(jacobian_type.col_kind(), jvar);
                if block.shape() != (rows.len(), cols.len()) {
                    warn!(
                        "Skipping {jacobian_type:?} Jacobian block ({tag:?}, {ivar}, {jvar}) of shape {:?} for {}x{} dofs",
                        block.shape(),
                        rows.len(),
                        cols.len()
                    );
                    mismatched += 1;
                    continue;
                }
                if !rows.is_empty() && !cols.is_empty() {
                    visit(tag, rows, cols, block, self.scaling(ivar))?;
                }
            }
        }
        Ok(mismatched)
    }

    /// Like [`Self::visit_jacobians`] for the non-local blocks, whose columns are `columns[jvar]`.
    pub fn visit_nonlocal(
        &self,
        columns: &[Vec<usize>],
        mut visit: impl FnMut(MatrixTag, &[usize], &[usize], &DMatrix<f64>, f64) -> Result<(), AssemblyError>,
    ) -> Result<usize, AssemblyError> {
        let mut mismatched = 0;
        for tag in self.system.tags().matrix_tags() {
            for (ivar, jvar) in self.blocks.nonlocal_pairs() {
                let Some(block) = self.blocks.nonlocal(tag, ivar, jvar) else {
                    continue;
                };
                let rows = self.dofs(LocalKind::Element, ivar);
                let cols = columns.get(jvar).map(Vec::as_slice).unwrap_or(&[]);
                if block.shape() != (rows.len(), cols.len()) {
                    warn!(
                        "Skipping non-local Jacobian block ({tag:?}, {ivar}, {jvar}) of shape {:?} for {}x{} dofs",
                        block.shape(),
                        rows.len(),
                        cols.len()
                    );
                    mismatched += 1;
                    continue;
                }
                if !rows.is_empty() && !cols.is_empty() {
                    visit(tag, rows, cols, block, self.scaling(ivar))?;
                }
            }
        }
        Ok(mismatched)
    }
}

pub(crate) fn add_vector_block<V: GlobalVector>(
    target: &Mutex<V>,
    rows: &[usize],
    values: &DVector<f64>,
    scaling: f64,
) -> Result<(), AssemblyError> {
    let mut target = target.lock();
    for (&row, &value) in rows.iter().zip(values.iter()) {
        target.add(row, scaling * value)?;
    }
    Ok(())
}

pub(crate) fn set_vector_block<V: GlobalVector>(
    target: &Mutex<V>,
    rows: &[usize],
    values: &DVector<f64>,
    scaling: f64,
) -> Result<(), AssemblyError> {
    let mut target = target.lock();
    for (&row, &value) in rows.iter().zip(values.iter()) {
        target.set(row, scaling * value)?;
    }
    Ok(())
}

pub(crate) fn add_matrix_block<M: GlobalMatrix>(
    target: &Mutex<M>,
    rows: &[usize],
    cols: &[usize],
    values: &DMatrix<f64>,
    scaling: f64,
) -> Result<(), AssemblyError> {
    let mut target = target.lock();
    for (r, &row) in rows.iter().enumerate() {
        for (c, &col) in cols.iter().enumerate() {
            target.add(row, col, scaling * values[(r, c)])?;
        }
    }
    Ok(())
}

/// Adds the residual blocks of `kind` (and, if requested, the absolute residual) to `targets`.
pub(crate) fn add_residual_blocks<V: GlobalVector, M: GlobalMatrix>(
    source: &BlockSource,
    kind: LocalKind,
    targets: &GlobalTargets<V, M>,
    absolute: bool,
) -> Result<usize, AssemblyError> {
    let mismatched = source.visit_residuals(kind, |tag, rows, block, scaling| match targets.residual_target(tag) {
        Some(target) => add_vector_block(target, rows, block, scaling),
        None => Ok(()),
    })?;
    if let Some(target) = targets.absolute_target().filter(|_| absolute) {
        source.visit_absolute(kind, |rows, block, scaling| add_vector_block(target, rows, block, scaling))?;
    }
    Ok(mismatched)
}

/// Overwrites the global entries of the residual blocks of `kind`.
pub(crate) fn set_residual_blocks<V: GlobalVector, M: GlobalMatrix>(
    source: &BlockSource,
    kind: LocalKind,
    targets: &GlobalTargets<V, M>,
) -> Result<usize, AssemblyError> {
    source.visit_residuals(kind, |tag, rows, block, scaling| match targets.residual_target(tag) {
        Some(target) => set_vector_block(target, rows, block, scaling),
        None => Ok(()),
    })
}

pub(crate) fn add_jacobian_blocks<V: GlobalVector, M: GlobalMatrix>(
    source: &BlockSource,
    jacobian_type: JacobianType,
    targets: &GlobalTargets<V, M>,
) -> Result<usize, AssemblyError> {
    source.visit_jacobians(jacobian_type, |tag, rows, cols, block, scaling| {
        match targets.jacobian_target(tag) {
            Some(target) => add_matrix_block(target, rows, cols, block, scaling),
            None => Ok(()),
        }
    })
}

pub(crate) fn add_nonlocal_blocks<V: GlobalVector, M: GlobalMatrix>(
    source: &BlockSource,
    columns: &[Vec<usize>],
    targets: &GlobalTargets<V, M>,
) -> Result<usize, AssemblyError> {
    source.visit_nonlocal(columns, |tag, rows, cols, block, scaling| match targets.jacobian_target(tag) {
        Some(target) => add_matrix_block(target, rows, cols, block, scaling),
        None => Ok(()),
    })
}

/// Deferred contributions of several elements, per tag.
#[derive(Debug, Default)]
pub(crate) struct ContributionCache {
    residuals: Vec<Vec<(usize, f64)>>,
    jacobians: Vec<Vec<(usize, usize, f64)>>,
    absolute: Vec<(usize, f64)>,
    residual_high_water: usize,
    jacobian_high_water: usize,
}

impl ContributionCache {
    pub fn new(n_vector_tags: usize, n_matrix_tags: usize) -> Self {
        Self {
            residuals: vec![Vec::new(); n_vector_tags],
            jacobians: vec![Vec::new(); n_matrix_tags],
            ..Self::default()
        }
    }

    pub fn n_residual_entries(&self) -> usize {
        self.residuals.iter().map(Vec::len).sum::<usize>() + self.absolute.len()
    }

    pub fn n_jacobian_entries(&self) -> usize {
        self.jacobians.iter().map(Vec::len).sum()
    }

    fn push_residual_block(&mut self, tag: VectorTag, rows: &[usize], values: &DVector<f64>, scaling: f64) {
        if let Some(entries) = self.residuals.get_mut(tag.index()) {
            entries.extend(
                rows.iter()
                    .zip(values.iter())
                    .map(|(&row, &value)| (row, scaling * value)),
            );
        }
    }

    fn push_jacobian_block(
        &mut self,
        tag: MatrixTag,
        rows: &[usize],
        cols: &[usize],
        values: &DMatrix<f64>,
        scaling: f64,
    ) {
        if let Some(entries) = self.jacobians.get_mut(tag.index()) {
            for (r, &row) in rows.iter().enumerate() {
                for (c, &col) in cols.iter().enumerate() {
                    entries.push((row, col, scaling * values[(r, c)]));
                }
            }
        }
    }

    pub fn cache_residual_blocks(
        &mut self,
        source: &BlockSource,
        kind: LocalKind,
        absolute: bool,
    ) -> Result<usize, AssemblyError> {
        let mismatched = source.visit_residuals(kind, |tag, rows, block, scaling| {
            self.push_residual_block(tag, rows, block, scaling);
            Ok(())
        })?;
        if absolute {
            source.visit_absolute(kind, |rows, block, scaling| {
                self.absolute.extend(
                    rows.iter()
                        .zip(block.iter())
                        .map(|(&row, &value)| (row, scaling * value)),
                );
                Ok(())
            })?;
        }
        Ok(mismatched)
    }

    pub fn cache_jacobian_blocks(
        &mut self,
        source: &BlockSource,
        jacobian_type: JacobianType,
    ) -> Result<usize, AssemblyError> {
        source.visit_jacobians(jacobian_type, |tag, rows, cols, block, scaling| {
            self.push_jacobian_block(tag, rows, cols, block, scaling);
            Ok(())
        })
    }

    pub fn cache_nonlocal_blocks(&mut self, source: &BlockSource, columns: &[Vec<usize>]) -> Result<usize, AssemblyError> {
        source.visit_nonlocal(columns, |tag, rows, cols, block, scaling| {
            self.push_jacobian_block(tag, rows, cols, block, scaling);
            Ok(())
        })
    }

    /// Adds and clears every cached residual entry, keeping twice the largest batch seen so far
    /// reserved for the next round.
    pub fn drain_residuals<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        tags: impl Iterator<Item = VectorTag>,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        let n_entries = self.n_residual_entries();
        self.residual_high_water = self.residual_high_water.max(n_entries);
        trace!("Draining {n_entries} cached residual entries");

        for (tag, entries) in tags.zip(&mut self.residuals) {
            if let Some(target) = targets.residual_target(tag) {
                let mut target = target.lock();
                for &(row, value) in entries.iter() {
                    target.add(row, value)?;
                }
            }
            entries.clear();
        }
        if let Some(target) = targets.absolute_target() {
            let mut target = target.lock();
            for &(row, value) in &self.absolute {
                target.add(row, value)?;
            }
        }
        self.absolute.clear();

        let reserve = 2 * self.residual_high_water;
        for entries in &mut self.residuals {
            entries.reserve(reserve);
        }
        Ok(())
    }

    pub fn drain_jacobians<V: GlobalVector, M: GlobalMatrix>(
        &mut self,
        tags: impl Iterator<Item = MatrixTag>,
        targets: &GlobalTargets<V, M>,
    ) -> Result<(), AssemblyError> {
        let n_entries = self.n_jacobian_entries();
        self.jacobian_high_water = self.jacobian_high_water.max(n_entries);
        trace!("Draining {n_entries} cached Jacobian entries");

        for (tag, entries) in tags.zip(&mut self.jacobians) {
            if let Some(target) = targets.jacobian_target(tag) {
                let mut target = target.lock();
                for &(row, col, value) in entries.iter() {
                    target.add(row, col, value)?;
                }
            }
            entries.clear();
        }

        let reserve = 2 * self.jacobian_high_water;
        for entries in &mut self.jacobians {
            entries.reserve(reserve);
        }
        Ok(())
    }
}
