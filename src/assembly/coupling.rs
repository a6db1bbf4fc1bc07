use serde::{Deserialize, Serialize};

/// Which (row variable, column variable) pairs have Jacobian blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouplingMatrix {
    n: usize,
    entries: Vec<bool>,
}

impl CouplingMatrix {
    pub fn empty(n: usize) -> Self {
        Self {
            n,
            entries: vec![false; n * n],
        }
    }

    pub fn full(n: usize) -> Self {
        Self {
            n,
            entries: vec![true; n * n],
        }
    }

    pub fn diagonal(n: usize) -> Self {
        let mut coupling = Self::empty(n);
        for i in 0..n {
            coupling.set(i, i, true);
        }
        coupling
    }

    pub fn n_variables(&self) -> usize {
        self.n
    }

    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn set(&mut self, i: usize, j: usize, coupled: bool) {
        assert!(i < self.n && j < self.n, "Variable index out of bounds");
        self.entries[i * self.n + j] = coupled;
    }

    pub fn is_coupled(&self, i: usize, j: usize) -> bool {
        i < self.n && j < self.n && self.entries[i * self.n + j]
    }

    /// Coupled pairs in row-major order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let n = self.n;
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, &coupled)| coupled)
            .map(move |(idx, _)| (idx / n, idx % n))
    }
}
