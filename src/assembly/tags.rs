//! Tags naming the residual and Jacobian contribution streams.
use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Identifier of a residual contribution stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VectorTag(usize);

/// Identifier of a Jacobian contribution stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixTag(usize);

impl VectorTag {
    /// Time derivative terms.
    pub const TIME: VectorTag = VectorTag(0);
    /// Everything else.
    pub const NONTIME: VectorTag = VectorTag(1);
}

impl MatrixTag {
    pub const TIME: MatrixTag = MatrixTag(0);
    pub const NONTIME: MatrixTag = MatrixTag(1);
    /// The full system matrix.
    pub const SYSTEM: MatrixTag = MatrixTag(2);
}

/// Common interface of [`VectorTag`] and [`MatrixTag`].
pub trait Tag: Copy + Ord + Debug + Send + Sync {
    /// Dense index of the tag among tags of its kind.
    fn index(self) -> usize;
}

impl Tag for VectorTag {
    fn index(self) -> usize {
        self.0
    }
}

impl Tag for MatrixTag {
    fn index(self) -> usize {
        self.0
    }
}

/// A sorted set of tags without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagSet<T> {
    tags: Vec<T>,
}

impl<T: Tag> TagSet<T> {
    pub fn empty() -> Self {
        Self { tags: Vec::new() }
    }

    pub fn single(tag: T) -> Self {
        Self { tags: vec![tag] }
    }

    pub fn contains(&self, tag: T) -> bool {
        self.tags.binary_search(&tag).is_ok()
    }

    pub fn insert(&mut self, tag: T) {
        if let Err(pos) = self.tags.binary_search(&tag) {
            self.tags.insert(pos, tag);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.tags.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.tags
    }
}

impl<T: Tag> FromIterator<T> for TagSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tags: Vec<T> = iter.into_iter().collect();
        tags.sort_unstable();
        tags.dedup();
        Self { tags }
    }
}

impl<T: Tag> Default for TagSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Names of all tags of a simulation.
///
/// Tags are registered while the system is being set up; the registry is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRegistry {
    vector_names: Vec<String>,
    matrix_names: Vec<String>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self {
            vector_names: vec!["TIME".to_string(), "NONTIME".to_string()],
            matrix_names: vec!["TIME".to_string(), "NONTIME".to_string(), "SYSTEM".to_string()],
        }
    }
}

impl TagRegistry {
    /// A registry with only the standard tags.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(names: &mut Vec<String>, name: &str) -> Result<usize, AssemblyError> {
        if names.iter().any(|n| n == name) {
            return Err(AssemblyError::DuplicateTag { name: name.to_string() });
        }
        names.push(name.to_string());
        Ok(names.len() - 1)
    }

    fn find(names: &[String], name: &str) -> Result<usize, AssemblyError> {
        names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| AssemblyError::UnknownTag { name: name.to_string() })
    }

    pub fn add_vector_tag(&mut self, name: &str) -> Result<VectorTag, AssemblyError> {
        Self::register(&mut self.vector_names, name).map(VectorTag)
    }

    pub fn add_matrix_tag(&mut self, name: &str) -> Result<MatrixTag, AssemblyError> {
        Self::register(&mut self.matrix_names, name).map(MatrixTag)
    }

    pub fn vector_tag(&self, name: &str) -> Result<VectorTag, AssemblyError> {
        Self::find(&self.vector_names, name).map(VectorTag)
    }

    pub fn matrix_tag(&self, name: &str) -> Result<MatrixTag, AssemblyError> {
        Self::find(&self.matrix_names, name).map(MatrixTag)
    }

    pub fn n_vector_tags(&self) -> usize {
        self.vector_names.len()
    }

    pub fn n_matrix_tags(&self) -> usize {
        self.matrix_names.len()
    }

    pub fn vector_tags(&self) -> impl Iterator<Item = VectorTag> {
        (0..self.vector_names.len()).map(VectorTag)
    }

    pub fn matrix_tags(&self) -> impl Iterator<Item = MatrixTag> {
        (0..self.matrix_names.len()).map(MatrixTag)
    }

    pub fn vector_tag_name(&self, tag: VectorTag) -> Option<&str> {
        self.vector_names.get(tag.0).map(String::as_str)
    }

    pub fn matrix_tag_name(&self, tag: MatrixTag) -> Option<&str> {
        self.matrix_names.get(tag.0).map(String::as_str)
    }
}
