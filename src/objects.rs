//! Contracts between physics objects and the assembly loops.
//!
//! Each kind of object implements one narrow capability trait on top of [`PhysicsObject`]. Objects
//! never touch global structures: they fill the local residual or Jacobian handed to them by a loop,
//! which then accumulates it under the object's tags.
use crate::assembly::{FeView, JacobianType, LocalKind, MatrixTag, TagSet, VectorTag};
use crate::element::{BoundaryId, SubdomainId};
use crate::system::{SolutionState, VariableId};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Debug;

mod aux;
mod bcs;
mod constraints;
mod interface;
mod kernels;
mod registry;

pub use aux::{ElementAverageAux, ElementVolumeAux};
pub use bcs::NeumannBc;
pub use constraints::EqualValueConstraint;
pub use interface::PenaltyInterface;
pub use kernels::{BodyForce, Diffusion, Reaction};
pub use registry::{BuiltObject, ObjectFactory, ObjectParams, ObjectRegistry, ObjectSet, TagNames};

/// The tags an object contributes to.
pub trait TaggingInterface: Debug + Send + Sync {
    fn vector_tags(&self) -> &TagSet<VectorTag>;

    fn matrix_tags(&self) -> &TagSet<MatrixTag>;

    fn is_vector_tag_active(&self, tag: VectorTag) -> bool {
        self.vector_tags().contains(tag)
    }

    fn is_matrix_tag_active(&self, tag: MatrixTag) -> bool {
        self.matrix_tags().contains(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectTags {
    pub vector: TagSet<VectorTag>,
    pub matrix: TagSet<MatrixTag>,
}

impl ObjectTags {
    /// Non-time residual, non-time and system matrices. The default of most objects.
    pub fn nontime() -> Self {
        Self {
            vector: TagSet::single(VectorTag::NONTIME),
            matrix: [MatrixTag::NONTIME, MatrixTag::SYSTEM].into_iter().collect(),
        }
    }

    /// Time residual, time and system matrices.
    pub fn time() -> Self {
        Self {
            vector: TagSet::single(VectorTag::TIME),
            matrix: [MatrixTag::TIME, MatrixTag::SYSTEM].into_iter().collect(),
        }
    }
}

impl TaggingInterface for ObjectTags {
    fn vector_tags(&self) -> &TagSet<VectorTag> {
        &self.vector
    }

    fn matrix_tags(&self) -> &TagSet<MatrixTag> {
        &self.matrix
    }
}

/// Name, tags and block restriction shared by every physics object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectBase {
    pub name: String,
    pub tags: ObjectTags,
    /// Subdomains the object acts on (`None`: everywhere).
    pub subdomains: Option<BTreeSet<SubdomainId>>,
}

impl ObjectBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: ObjectTags::nontime(),
            subdomains: None,
        }
    }

    pub fn with_tags(mut self, tags: ObjectTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_subdomains(mut self, subdomains: impl IntoIterator<Item = SubdomainId>) -> Self {
        self.subdomains = Some(subdomains.into_iter().collect());
        self
    }
}

pub trait PhysicsObject: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn tagging(&self) -> &dyn TaggingInterface;

    fn subdomains(&self) -> Option<&BTreeSet<SubdomainId>> {
        None
    }

    fn is_active_on(&self, subdomain: SubdomainId) -> bool {
        self.subdomains()
            .map_or(true, |subdomains| subdomains.contains(&subdomain))
    }
}

/// Implements [`PhysicsObject`] for a type with a `base: ObjectBase` field.
macro_rules! impl_physics_object {
    ($ty:ty) => {
        impl $crate::objects::PhysicsObject for $ty {
            fn name(&self) -> &str {
                &self.base.name
            }

            fn tagging(&self) -> &dyn $crate::objects::TaggingInterface {
                &self.base.tags
            }

            fn subdomains(&self) -> Option<&std::collections::BTreeSet<$crate::element::SubdomainId>> {
                self.base.subdomains.as_ref()
            }
        }
    };
}
pub(crate) use impl_physics_object;

/// A volume integral over the elements of the object's subdomains.
///
/// Residuals are computed in the [`Volume`](crate::mapping::FeContext::Volume) context for the
/// test functions of [`Kernel::variable`].
pub trait Kernel: PhysicsObject {
    fn variable(&self) -> VariableId;

    /// Column variables of the Jacobian blocks this kernel provides.
    fn jacobian_variables(&self) -> Vec<VariableId> {
        vec![self.variable()]
    }

    fn compute_residual(&self, fe: &FeView, solution: &SolutionState, residual: &mut DVector<f64>) -> eyre::Result<()>;

    fn compute_jacobian(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        jvar: VariableId,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()>;
}

/// A boundary integral, computed in the [`Face`](crate::mapping::FeContext::Face) context.
pub trait IntegratedBc: PhysicsObject {
    fn variable(&self) -> VariableId;

    fn boundaries(&self) -> &[BoundaryId];

    fn jacobian_variables(&self) -> Vec<VariableId> {
        vec![self.variable()]
    }

    fn compute_residual(&self, fe: &FeView, solution: &SolutionState, residual: &mut DVector<f64>) -> eyre::Result<()>;

    fn compute_jacobian(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        jvar: VariableId,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()>;
}

/// An integral over an internal side coupling an element with its neighbor.
///
/// Element rows belong to [`InterfaceKernel::variable`], neighbor rows to
/// [`InterfaceKernel::neighbor_variable`].
pub trait InterfaceKernel: PhysicsObject {
    fn variable(&self) -> VariableId;

    fn neighbor_variable(&self) -> VariableId;

    /// The variable whose dofs index the rows (or columns) of `kind`.
    fn variable_of(&self, kind: LocalKind) -> Option<VariableId> {
        match kind {
            LocalKind::Element => Some(self.variable()),
            LocalKind::Neighbor => Some(self.neighbor_variable()),
            LocalKind::Lower => None,
        }
    }

    /// Residual for the element (`LocalKind::Element`) or neighbor (`LocalKind::Neighbor`) rows.
    fn compute_residual(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        kind: LocalKind,
        residual: &mut DVector<f64>,
    ) -> eyre::Result<()>;

    /// Jacobian for one of `ElementElement` and [`JacobianType::NEIGHBOR`].
    fn compute_jacobian(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        jacobian_type: JacobianType,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()>;
}

/// A constraint integrated over mortar segments.
///
/// Lower rows belong to the Lagrange multiplier, element rows to the secondary variable and
/// neighbor rows to the primary variable.
pub trait MortarConstraint: PhysicsObject {
    fn lagrange_variable(&self) -> VariableId;

    fn secondary_variable(&self) -> VariableId;

    fn primary_variable(&self) -> VariableId;

    /// Whether `ElementLower` and `NeighborLower` are the transposes of `LowerElement` and
    /// `LowerNeighbor`. The loop then only computes the latter two. The interior blocks are always
    /// computed.
    fn symmetric(&self) -> bool {
        false
    }

    fn variable_of(&self, kind: LocalKind) -> VariableId {
        match kind {
            LocalKind::Element => self.secondary_variable(),
            LocalKind::Neighbor => self.primary_variable(),
            LocalKind::Lower => self.lagrange_variable(),
        }
    }

    fn compute_residual(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        kind: LocalKind,
        residual: &mut DVector<f64>,
    ) -> eyre::Result<()>;

    /// Jacobian for any of [`JacobianType::ALL`].
    ///
    /// Without a primary element only `ElementElement`, `LowerLower`, `LowerElement` and
    /// `ElementLower` are requested. Blocks left at zero add nothing.
    fn compute_jacobian(
        &self,
        fe: &FeView,
        solution: &SolutionState,
        jacobian_type: JacobianType,
        jacobian: &mut DMatrix<f64>,
    ) -> eyre::Result<()>;
}

/// Computes one value per element for an auxiliary variable.
pub trait AuxKernel: PhysicsObject {
    fn variable(&self) -> VariableId;

    fn compute_value(&self, fe: &FeView, solution: &SolutionState) -> eyre::Result<f64>;
}
