//! Global residual and Jacobian structures targeted by the accumulation.
use crate::assembly::tags::{MatrixTag, Tag, VectorTag};
use crate::error::AssemblyError;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::{CooMatrix, CsrMatrix, SparseEntryMut};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// A global vector that local residual rows are added to or set in.
pub trait GlobalVector: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, i: usize, value: f64) -> Result<(), AssemblyError>;

    fn set(&mut self, i: usize, value: f64) -> Result<(), AssemblyError>;
}

/// A global matrix that local Jacobian entries are added to.
pub trait GlobalMatrix: Send {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), AssemblyError>;
}

impl GlobalVector for DVector<f64> {
    fn len(&self) -> usize {
        self.nrows()
    }

    fn add(&mut self, i: usize, value: f64) -> Result<(), AssemblyError> {
        let len = self.nrows();
        let entry = self
            .get_mut(i)
            .ok_or(AssemblyError::IndexOutOfBounds { index: i, len })?;
        *entry += value;
        Ok(())
    }

    fn set(&mut self, i: usize, value: f64) -> Result<(), AssemblyError> {
        let len = self.nrows();
        let entry = self
            .get_mut(i)
            .ok_or(AssemblyError::IndexOutOfBounds { index: i, len })?;
        *entry = value;
        Ok(())
    }
}

fn check_bounds(i: usize, j: usize, nrows: usize, ncols: usize) -> Result<(), AssemblyError> {
    if i >= nrows {
        Err(AssemblyError::IndexOutOfBounds { index: i, len: nrows })
    } else if j >= ncols {
        Err(AssemblyError::IndexOutOfBounds { index: j, len: ncols })
    } else {
        Ok(())
    }
}

impl GlobalMatrix for DMatrix<f64> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), AssemblyError> {
        check_bounds(i, j, self.nrows(), self.ncols())?;
        self[(i, j)] += value;
        Ok(())
    }
}

impl GlobalMatrix for CooMatrix<f64> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), AssemblyError> {
        check_bounds(i, j, self.nrows(), self.ncols())?;
        self.push(i, j, value);
        Ok(())
    }
}

/// Entries outside the fixed sparsity pattern are rejected.
impl GlobalMatrix for CsrMatrix<f64> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn add(&mut self, i: usize, j: usize, value: f64) -> Result<(), AssemblyError> {
        check_bounds(i, j, self.nrows(), self.ncols())?;
        match self.get_entry_mut(i, j) {
            Some(SparseEntryMut::NonZero(entry)) => {
                *entry += value;
                Ok(())
            }
            _ => Err(AssemblyError::MissingSparsityEntry { row: i, col: j }),
        }
    }
}

/// The global structures of one assembly pass, one per tag.
///
/// Every structure sits behind its own mutex, which is only held for the duration of a single
/// block add or set. Tags without a structure are not assembled.
#[derive(Debug)]
pub struct GlobalTargets<V, M> {
    residuals: Vec<Option<Mutex<V>>>,
    jacobians: Vec<Option<Mutex<M>>>,
    absolute_residual: Option<Mutex<V>>,
}

impl<V, M> Default for GlobalTargets<V, M> {
    fn default() -> Self {
        Self {
            residuals: Vec::new(),
            jacobians: Vec::new(),
            absolute_residual: None,
        }
    }
}

fn slot<T>(slots: &mut Vec<Option<Mutex<T>>>, index: usize) -> &mut Option<Mutex<T>> {
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
    &mut slots[index]
}

impl<V: GlobalVector, M: GlobalMatrix> GlobalTargets<V, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_residual(mut self, tag: VectorTag, vector: V) -> Self {
        *slot(&mut self.residuals, tag.index()) = Some(Mutex::new(vector));
        self
    }

    pub fn with_jacobian(mut self, tag: MatrixTag, matrix: M) -> Self {
        *slot(&mut self.jacobians, tag.index()) = Some(Mutex::new(matrix));
        self
    }

    /// Vector receiving `|contribution|` of every residual entry, for reference-residual checks.
    pub fn with_absolute_residual(mut self, vector: V) -> Self {
        self.absolute_residual = Some(Mutex::new(vector));
        self
    }

    pub fn has_residual(&self, tag: VectorTag) -> bool {
        matches!(self.residuals.get(tag.index()), Some(Some(_)))
    }

    pub fn has_jacobian(&self, tag: MatrixTag) -> bool {
        matches!(self.jacobians.get(tag.index()), Some(Some(_)))
    }

    pub fn has_absolute_residual(&self) -> bool {
        self.absolute_residual.is_some()
    }

    pub(crate) fn residual_target(&self, tag: VectorTag) -> Option<&Mutex<V>> {
        self.residuals.get(tag.index()).and_then(Option::as_ref)
    }

    pub(crate) fn jacobian_target(&self, tag: MatrixTag) -> Option<&Mutex<M>> {
        self.jacobians.get(tag.index()).and_then(Option::as_ref)
    }

    pub(crate) fn absolute_target(&self) -> Option<&Mutex<V>> {
        self.absolute_residual.as_ref()
    }

    pub fn residual_mut(&mut self, tag: VectorTag) -> Option<&mut V> {
        self.residuals
            .get_mut(tag.index())
            .and_then(Option::as_mut)
            .map(Mutex::get_mut)
    }

    pub fn jacobian_mut(&mut self, tag: MatrixTag) -> Option<&mut M> {
        self.jacobians
            .get_mut(tag.index())
            .and_then(Option::as_mut)
            .map(Mutex::get_mut)
    }

    pub fn take_residual(&mut self, tag: VectorTag) -> Option<V> {
        self.residuals
            .get_mut(tag.index())
            .and_then(Option::take)
            .map(Mutex::into_inner)
    }

    pub fn take_jacobian(&mut self, tag: MatrixTag) -> Option<M> {
        self.jacobians
            .get_mut(tag.index())
            .and_then(Option::take)
            .map(Mutex::into_inner)
    }

    pub fn take_absolute_residual(&mut self) -> Option<V> {
        self.absolute_residual.take().map(Mutex::into_inner)
    }
}

/// Builds a CSR sparsity pattern coupling all dofs within each group.
///
/// Entries are collected in a `BTreeSet` so that each entry is stored once regardless of how many
/// groups produce it. Dofs outside `0..n` are an error.
pub fn sparsity_pattern<'a>(
    n: usize,
    groups: impl IntoIterator<Item = (&'a [usize], &'a [usize])>,
) -> Result<SparsityPattern, AssemblyError> {
    let mut entries = BTreeSet::new();
    for (rows, cols) in groups {
        for &i in rows {
            for &j in cols {
                check_bounds(i, j, n, n)?;
                entries.insert((i, j));
            }
        }
    }

    let mut offsets = Vec::with_capacity(n + 1);
    let mut column_indices = Vec::with_capacity(entries.len());
    offsets.push(0);
    for (i, j) in entries {
        while i + 1 > offsets.len() {
            // Consecutive empty rows need one offset each
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while offsets.len() < n + 1 {
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(n, n, offsets, column_indices).map_err(|err| {
        AssemblyError::InvalidMesh {
            message: format!("dof couplings do not form a sparsity pattern: {err}"),
        }
    })
}

/// A zero CSR matrix with the given pattern.
pub fn csr_from_pattern(pattern: SparsityPattern) -> CsrMatrix<f64> {
    let values = vec![0.0; pattern.nnz()];
    CsrMatrix::try_from_pattern_and_values(pattern, values)
        .expect("Value count matches the pattern")
}
