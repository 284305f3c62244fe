//! Errors reported by mesh setup, boundary condition imposition and the block preconditioners.
use crate::mesh::ElementKind;
use fenris_sparse::amg::AmgError;
use fenris_sparse::direct::DirectSolveError;
use fenris_sparse::lumped::LumpingError;
use std::error::Error;
use std::fmt;
use std::panic::Location;

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BiharmonicErrorKind {
    /// The preconditioner was set up without a bulk element mesh.
    MissingBulkMesh,
    UnsupportedElement { element: usize, kind: ElementKind },
    /// Face index codes must be one of -2, -1, 1, 2.
    InvalidFaceIndex(i32),
    InvalidBoundary { boundary: usize, num_boundaries: usize },
    InvalidPreconditionerType(usize),
    /// Multigrid was requested, but the crate was built without the `amg` feature.
    AmgUnavailable,
    /// A normal derivative was prescribed without the boundary value it is consistent with.
    MissingValueFunction,
    UnclassifiedUnknown { equation: usize },
    UnknownDofType { dof_type: usize },
    UnsupportedFaceGeometry { dim: usize, nodes_per_edge: usize },
    ZeroLumpedDiagonal { block: usize, row: usize },
    SingularBlock { block: usize, reason: String },
    /// The preconditioner was applied before a successful setup.
    NotSetUp,
    Lumping(LumpingError),
    DirectSolve(DirectSolveError),
    Amg(AmgError),
}

impl fmt::Display for BiharmonicErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BiharmonicErrorKind::*;
        match self {
            MissingBulkMesh => write!(f, "No bulk element mesh has been set"),
            UnsupportedElement { element, kind } => write!(
                f,
                "Element {} is of kind {:?}, only biharmonic and hijacked biharmonic elements are supported",
                element, kind
            ),
            InvalidFaceIndex(code) => write!(f, "Face index {} is not one of -2, -1, 1, 2: need 2D quad elements", code),
            InvalidBoundary {
                boundary,
                num_boundaries,
            } => write!(f, "Boundary {} does not exist, mesh has {} boundaries", boundary, num_boundaries),
            InvalidPreconditionerType(index) => {
                write!(f, "Preconditioner type {} is invalid, must be in 0..=3", index)
            }
            AmgUnavailable => write!(f, "AMG preconditioning requested, but AMG support is not enabled"),
            MissingValueFunction => write!(
                f,
                "A normal derivative can only be imposed together with the boundary value"
            ),
            UnclassifiedUnknown { equation } => {
                write!(f, "Unknown {} is not associated with any element", equation)
            }
            UnknownDofType { dof_type } => write!(f, "Dof type {} has no associated block", dof_type),
            UnsupportedFaceGeometry { dim, nodes_per_edge } => write!(
                f,
                "No face geometry for elements of dimension {} with {} nodes per edge",
                dim, nodes_per_edge
            ),
            ZeroLumpedDiagonal { block, row } => {
                write!(f, "Lumped approximation of block {} has a zero entry in row {}", block, row)
            }
            SingularBlock { block, reason } => write!(f, "Block {} is singular: {}", block, reason),
            NotSetUp => write!(f, "Preconditioner must be set up before it is applied"),
            Lumping(err) => write!(f, "Lumping failed: {}", err),
            DirectSolve(err) => write!(f, "Direct solve failed: {}", err),
            Amg(err) => write!(f, "AMG failed: {}", err),
        }
    }
}

/// An error together with the function and source location at which it was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct BiharmonicError {
    kind: BiharmonicErrorKind,
    function: &'static str,
    location: &'static Location<'static>,
}

impl BiharmonicError {
    /// Creates an error located at the caller.
    #[track_caller]
    pub fn new(kind: BiharmonicErrorKind, function: &'static str) -> Self {
        Self {
            kind,
            function,
            location: Location::caller(),
        }
    }

    pub fn kind(&self) -> &BiharmonicErrorKind {
        &self.kind
    }

    /// Name of the function that raised the error.
    pub fn function(&self) -> &'static str {
        self.function
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for BiharmonicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (in {} at {}:{})",
            self.kind,
            self.function,
            self.location.file(),
            self.location.line()
        )
    }
}

impl Error for BiharmonicError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            BiharmonicErrorKind::Lumping(err) => Some(err),
            BiharmonicErrorKind::DirectSolve(err) => Some(err),
            BiharmonicErrorKind::Amg(err) => Some(err),
            _ => None,
        }
    }
}
