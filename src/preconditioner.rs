//! Block preconditioners for biharmonic systems.
//!
//! The unknowns of the system are split into blocks by [`BlockDecomposition`]. The three
//! bulk blocks (values, first derivatives, mixed derivatives) are preconditioned together by
//! either an [`ExactBlockPreconditioner`] or an [`InexactBlockPreconditioner`], depending on
//! the selected [`PreconditionerType`]. Hijacked unknowns, if present, form a fourth block
//! with its own direct solver.
use crate::block::{BlockDecomposition, HIJACKED_BLOCK, NUM_PRIMARY_BLOCKS};
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use crate::mesh::DofTypeMesh;
use fenris_sparse::amg::AmgSettings;
use fenris_sparse::cg::LinearOperator;
use log::info;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

mod exact;
mod inexact;

pub use exact::ExactBlockPreconditioner;
pub use inexact::{InexactBlockPreconditioner, InexactStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreconditionerType {
    /// Direct solve of the bordered-diagonal 3x3 block system.
    ExactBbd = 0,
    /// Lumped Schur complement of the value block, solved directly.
    InexactBbdDirect = 1,
    /// Lumped Schur complement of the value block, solved with algebraic multigrid.
    InexactBbdAmg = 2,
    /// Direct solve of the 3x3 block system with all couplings retained, independent of
    /// the hijacked block.
    BlockDiagonal = 3,
}

impl PreconditionerType {
    pub const ALL: [PreconditionerType; 4] = [
        Self::ExactBbd,
        Self::InexactBbdDirect,
        Self::InexactBbdAmg,
        Self::BlockDiagonal,
    ];

    /// Whether the type can be used with the enabled features.
    pub fn is_available(&self) -> bool {
        *self != Self::InexactBbdAmg || cfg!(feature = "amg")
    }

    #[track_caller]
    fn check_available(self, function: &'static str) -> Result<Self, BiharmonicError> {
        if self.is_available() {
            Ok(self)
        } else {
            Err(BiharmonicError::new(BiharmonicErrorKind::AmgUnavailable, function))
        }
    }
}

impl Default for PreconditionerType {
    fn default() -> Self {
        if cfg!(feature = "amg") {
            Self::InexactBbdAmg
        } else {
            Self::InexactBbdDirect
        }
    }
}

impl TryFrom<usize> for PreconditionerType {
    type Error = BiharmonicError;

    #[track_caller]
    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            BiharmonicError::new(
                BiharmonicErrorKind::InvalidPreconditionerType(index),
                "PreconditionerType::try_from",
            )
        })
    }
}

impl fmt::Display for PreconditionerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExactBbd => "exact BBD",
            Self::InexactBbdDirect => "inexact BBD with direct Schur complement solve",
            Self::InexactBbdAmg => "inexact BBD with AMG Schur complement solve",
            Self::BlockDiagonal => "block diagonal",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
enum BulkPreconditioner {
    Exact(ExactBlockPreconditioner),
    Inexact(InexactBlockPreconditioner),
}

impl BulkPreconditioner {
    fn solve(&self, r: DVectorView<f64>, z: DVectorViewMut<f64>) -> Result<(), BiharmonicError> {
        match self {
            Self::Exact(exact) => exact.solve(r, z),
            Self::Inexact(inexact) => inexact.solve(r, z),
        }
    }
}

#[derive(Debug)]
struct SubPreconditioners {
    bulk: BulkPreconditioner,
    hijacked: Option<ExactBlockPreconditioner>,
}

/// Block preconditioner for the Jacobian of a biharmonic problem.
///
/// The preconditioner refers to the bulk mesh in order to classify the unknowns. Every call
/// to [`setup`](Self::setup) rebuilds all sub-preconditioners from scratch.
pub struct BiharmonicPreconditioner<'a> {
    bulk_mesh: Option<&'a dyn DofTypeMesh>,
    preconditioner_type: PreconditionerType,
    amg_settings: AmgSettings,
    sub_preconditioners: Option<SubPreconditioners>,
}

impl<'a> fmt::Debug for BiharmonicPreconditioner<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiharmonicPreconditioner")
            .field("has_bulk_mesh", &self.bulk_mesh.is_some())
            .field("preconditioner_type", &self.preconditioner_type)
            .field("amg_settings", &self.amg_settings)
            .field("sub_preconditioners", &self.sub_preconditioners)
            .finish()
    }
}

impl<'a> Default for BiharmonicPreconditioner<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> BiharmonicPreconditioner<'a> {
    pub fn new() -> Self {
        Self {
            bulk_mesh: None,
            preconditioner_type: PreconditionerType::default(),
            amg_settings: AmgSettings::default(),
            sub_preconditioners: None,
        }
    }

    pub fn with_bulk_mesh(mesh: &'a dyn DofTypeMesh) -> Self {
        let mut preconditioner = Self::new();
        preconditioner.set_bulk_mesh(mesh);
        preconditioner
    }

    pub fn set_bulk_mesh(&mut self, mesh: &'a dyn DofTypeMesh) {
        self.bulk_mesh = Some(mesh);
    }

    pub fn preconditioner_type(&self) -> PreconditionerType {
        self.preconditioner_type
    }

    #[track_caller]
    pub fn set_preconditioner_type(&mut self, preconditioner_type: PreconditionerType) -> Result<(), BiharmonicError> {
        self.preconditioner_type =
            preconditioner_type.check_available("BiharmonicPreconditioner::set_preconditioner_type")?;
        Ok(())
    }

    /// Selects the preconditioner type by its index in `0..=3`.
    #[track_caller]
    pub fn set_preconditioner_type_index(&mut self, index: usize) -> Result<(), BiharmonicError> {
        self.set_preconditioner_type(PreconditionerType::try_from(index)?)
    }

    pub fn amg_settings(&self) -> &AmgSettings {
        &self.amg_settings
    }

    pub fn set_amg_settings(&mut self, amg_settings: AmgSettings) {
        self.amg_settings = amg_settings;
    }

    pub fn is_set_up(&self) -> bool {
        self.sub_preconditioners.is_some()
    }

    /// Classifies the unknowns of the bulk mesh and sets up the sub-preconditioners for the
    /// given system matrix.
    ///
    /// # Panics
    ///
    /// Panics if the matrix dimensions do not match the number of unknowns of the mesh.
    pub fn setup(&mut self, matrix: &CsrMatrix<f64>) -> Result<(), BiharmonicError> {
        const FUNCTION: &str = "BiharmonicPreconditioner::setup";
        self.clean_up_memory();

        let mesh = self
            .bulk_mesh
            .ok_or_else(|| BiharmonicError::new(BiharmonicErrorKind::MissingBulkMesh, FUNCTION))?;
        let preconditioner_type = self.preconditioner_type.check_available(FUNCTION)?;
        let decomposition = BlockDecomposition::from_mesh(mesh)?;

        info!(
            "Setting up {} preconditioner for {} unknowns in {} blocks",
            preconditioner_type,
            decomposition.num_unknowns(),
            decomposition.num_blocks()
        );

        let bulk_decomposition = decomposition.subsidiary(&[0, 1, 2]);
        let bulk = match preconditioner_type {
            PreconditionerType::ExactBbd | PreconditionerType::BlockDiagonal => {
                let retain_all_blocks = preconditioner_type == PreconditionerType::BlockDiagonal;
                let mut exact = ExactBlockPreconditioner::with_retain_all_blocks(retain_all_blocks);
                exact.setup(bulk_decomposition, matrix)?;
                BulkPreconditioner::Exact(exact)
            }
            PreconditionerType::InexactBbdDirect | PreconditionerType::InexactBbdAmg => {
                let use_amg = preconditioner_type == PreconditionerType::InexactBbdAmg;
                let mut inexact = InexactBlockPreconditioner::new(use_amg).with_amg_settings(self.amg_settings);
                inexact.setup(bulk_decomposition, matrix)?;
                BulkPreconditioner::Inexact(inexact)
            }
        };

        let hijacked = if decomposition.num_blocks() > NUM_PRIMARY_BLOCKS {
            let mut hijacked = ExactBlockPreconditioner::new();
            hijacked.setup(decomposition.subsidiary(&[HIJACKED_BLOCK]), matrix)?;
            Some(hijacked)
        } else {
            None
        };

        self.sub_preconditioners = Some(SubPreconditioners { bulk, hijacked });
        Ok(())
    }

    /// Computes `z = P^{-1} r`.
    pub fn preconditioner_solve(&self, r: DVectorView<f64>, mut z: DVectorViewMut<f64>) -> Result<(), BiharmonicError> {
        let sub_preconditioners = self.sub_preconditioners.as_ref().ok_or_else(|| {
            BiharmonicError::new(
                BiharmonicErrorKind::NotSetUp,
                "BiharmonicPreconditioner::preconditioner_solve",
            )
        })?;
        assert_eq!(r.len(), z.len(), "Residual and correction must have the same length");

        z.fill(0.0);
        sub_preconditioners.bulk.solve(r, (&mut z).into())?;
        if let Some(hijacked) = &sub_preconditioners.hijacked {
            hijacked.solve(r, (&mut z).into())?;
        }
        Ok(())
    }

    /// Releases all sub-preconditioners. Calling this repeatedly is harmless.
    pub fn clean_up_memory(&mut self) {
        self.sub_preconditioners = None;
    }
}

impl<'a> LinearOperator<f64> for BiharmonicPreconditioner<'a> {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        Ok(self.preconditioner_solve(x, y)?)
    }
}
