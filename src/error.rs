//! Error type of the assembly core.
//!
//! Physics objects and loops report failures through [`eyre::Result`]. Errors that originate in the
//! core itself are [`AssemblyError`]s, which convert into [`eyre::Report`] with `?`.

use crate::assembly::{AssemblyState, JacobianType, LocalKind};
use crate::element::ElemType;
use crate::fe::FeType;
use crate::mapping::FeContext;
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AssemblyError {
    /// The finite element type cannot be evaluated on the element type.
    UnsupportedFeType { fe_type: FeType, elem_type: ElemType },
    /// A shape quantity (e.g. curl) was requested that the FE type does not provide in this dimension.
    UnsupportedShapeQuantity {
        fe_type: FeType,
        quantity: &'static str,
        dim: usize,
    },
    /// Shape data was requested for an FE type that was never registered with the assembly.
    UnregisteredFeType { fe_type: FeType },
    /// An operation needs a current element but none has been set.
    NoCurrentElement { operation: &'static str },
    /// Data of a geometric context was requested before the context was reinitialized.
    ContextNotReady { context: FeContext },
    /// An operation was called in a state where it is not allowed.
    InvalidTransition {
        state: AssemblyState,
        operation: &'static str,
    },
    /// The mapping of an element has a non-positive Jacobian determinant at a quadrature point.
    NonPositiveJacobian { elem: usize, qp: usize, determinant: f64 },
    /// A physical point could not be mapped back to the reference element.
    InverseMapFailed { elem: usize },
    /// The side index is out of range for the element.
    InvalidSide { elem: usize, side: usize },
    /// A variable id or name does not exist in the system.
    UnknownVariable { name: String },
    /// A tag id or name does not exist in the tag registry.
    UnknownTag { name: String },
    /// A tag with the same name was already registered.
    DuplicateTag { name: String },
    /// A global matrix with a fixed sparsity pattern has no entry at the given position.
    MissingSparsityEntry { row: usize, col: usize },
    /// A global index is out of bounds for the target structure.
    IndexOutOfBounds { index: usize, len: usize },
    /// Custom quadrature points were given with a different number of weights.
    WeightCountMismatch { points: usize, weights: usize },
    /// A residual block was requested for a tag or variable that is not prepared.
    StaleResidualBlock { kind: LocalKind, tag: usize, var: usize },
    /// A Jacobian block was requested for a tag or variable pair that is not prepared or not coupled.
    StaleJacobianBlock {
        jacobian_type: JacobianType,
        tag: usize,
        ivar: usize,
        jvar: usize,
    },
    /// AD data was requested for a context where AD has not been enabled.
    AdNotEnabled { context: FeContext },
    /// Quadrature rule construction failed.
    Quadrature(tessera_quadrature::Error),
    /// The mesh is malformed or unsuitable for the requested operation.
    InvalidMesh { message: String },
    /// A parameter of a physics object or of the configuration is invalid.
    InvalidParameter { object: String, message: String },
}

impl Display for AssemblyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFeType { fe_type, elem_type } => {
                write!(f, "finite element type {fe_type} is not supported on {elem_type:?} elements")
            }
            Self::UnsupportedShapeQuantity { fe_type, quantity, dim } => {
                write!(f, "{quantity} of {fe_type} shape functions is not available in {dim}D")
            }
            Self::UnregisteredFeType { fe_type } => {
                write!(f, "finite element type {fe_type} was never registered with the assembly")
            }
            Self::NoCurrentElement { operation } => {
                write!(f, "{operation} requires a current element, but no element has been set")
            }
            Self::ContextNotReady { context } => {
                write!(f, "the {context} context has not been reinitialized")
            }
            Self::InvalidTransition { state, operation } => {
                write!(f, "{operation} is not allowed in assembly state {state:?}")
            }
            Self::NonPositiveJacobian { elem, qp, determinant } => {
                write!(
                    f,
                    "non-positive Jacobian determinant {determinant:e} in element {elem} at quadrature point {qp}"
                )
            }
            Self::InverseMapFailed { elem } => {
                write!(f, "failed to map physical points back to the reference domain of element {elem}")
            }
            Self::InvalidSide { elem, side } => write!(f, "element {elem} has no side {side}"),
            Self::UnknownVariable { name } => write!(f, "unknown variable {name}"),
            Self::UnknownTag { name } => write!(f, "unknown tag {name}"),
            Self::DuplicateTag { name } => write!(f, "tag {name} is already registered"),
            Self::MissingSparsityEntry { row, col } => {
                write!(f, "global matrix has no sparsity entry at ({row}, {col})")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "global index {index} is out of bounds for length {len}")
            }
            Self::WeightCountMismatch { points, weights } => {
                write!(f, "{weights} quadrature weights given for {points} points")
            }
            Self::StaleResidualBlock { kind, tag, var } => {
                write!(
                    f,
                    "residual block ({kind:?}, tag {tag}, variable {var}) was requested but is not prepared"
                )
            }
            Self::StaleJacobianBlock {
                jacobian_type,
                tag,
                ivar,
                jvar,
            } => {
                write!(
                    f,
                    "Jacobian block ({jacobian_type:?}, tag {tag}, variables ({ivar}, {jvar})) \
                    was requested but is not prepared or not coupled"
                )
            }
            Self::AdNotEnabled { context } => {
                write!(f, "AD data requested for the {context} context, but AD is not enabled there")
            }
            Self::Quadrature(err) => write!(f, "quadrature error: {err}"),
            Self::InvalidMesh { message } => write!(f, "invalid mesh: {message}"),
            Self::InvalidParameter { object, message } => {
                write!(f, "invalid parameter for {object}: {message}")
            }
        }
    }
}

impl std::error::Error for AssemblyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Quadrature(err) => Some(err),
            _ => None,
        }
    }
}

impl From<tessera_quadrature::Error> for AssemblyError {
    fn from(err: tessera_quadrature::Error) -> Self {
        Self::Quadrature(err)
    }
}
