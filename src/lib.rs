//! Element assembly core of a multiphysics finite element solver.
//!
//! The crate computes shape function data at quadrature points for elements, element sides,
//! element pairs and lower-dimensional elements, and accumulates the local contributions of
//! independently written physics objects into tagged global residuals and Jacobians.
//!
//! The main pieces, leaf first:
//!
//! - [`quadrature::QuadratureCache`]: quadrature rules per geometric context and memoized reference
//!   shape tables.
//! - [`mapping::GeometricMapper`]: physical shape tables and geometry (`JxW`, normals, ...) per
//!   context, optionally with forward-mode derivatives with respect to mesh displacements.
//! - [`assembly::LocalBlocks`]: tagged local residual and Jacobian blocks.
//! - [`assembly::Assembly`]: the per-thread orchestrator, which moves local blocks into
//!   [`assembly::GlobalTargets`] immediately or through a contribution cache.
//! - [`objects`]: the physics object contracts and a registry of built-in objects.
//! - [`loops`]: element, mortar and auxiliary loops and a threaded driver.

pub mod assembly;
pub mod config;
pub mod element;
pub mod error;
pub mod fe;
pub mod loops;
pub mod mapping;
pub mod mesh;
pub mod mortar;
pub mod objects;
pub mod quadrature;
pub mod system;

pub use assembly::{Assembly, AssemblyState, GlobalTargets, JacobianType, LocalKind, MatrixTag, TagSet, VectorTag};
pub use config::{AssemblyOptions, StaleBlockPolicy};
pub use element::{BoundaryId, Elem, ElemType, SubdomainId};
pub use error::AssemblyError;
pub use fe::{FeFamily, FeType};
pub use mapping::{CoordinateSystem, FeContext};
pub use mesh::Mesh;
pub use system::{SolutionState, System, SystemBuilder, VariableId};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
