use crate::block::BlockDecomposition;
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use fenris_sparse::direct::{DirectSolveError, LuSolver};
use log::debug;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;

/// Direct solve of the combined block system.
///
/// All blocks of the decomposition are concatenated into one matrix and factorized. By default
/// only the bordered-diagonal (arrow) structure is kept: the diagonal blocks and the coupling
/// of block 0 with every other block. With `retain_all_blocks` every block pair is kept.
#[derive(Debug, Default)]
pub struct ExactBlockPreconditioner {
    retain_all_blocks: bool,
    setup: Option<ExactSetup>,
}

#[derive(Debug)]
struct ExactSetup {
    decomposition: BlockDecomposition,
    blocks: Vec<usize>,
    solver: LuSolver,
}

pub(crate) fn map_direct_solve_error(err: DirectSolveError, block: usize, function: &'static str) -> BiharmonicError {
    let kind = match err {
        DirectSolveError::Singular => BiharmonicErrorKind::SingularBlock {
            block,
            reason: "direct factorization found the block singular to working precision".to_string(),
        },
        other => BiharmonicErrorKind::DirectSolve(other),
    };
    BiharmonicError::new(kind, function)
}

impl ExactBlockPreconditioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retain_all_blocks(retain_all_blocks: bool) -> Self {
        Self {
            retain_all_blocks,
            setup: None,
        }
    }

    pub fn retain_all_blocks(&self) -> bool {
        self.retain_all_blocks
    }

    pub fn is_set_up(&self) -> bool {
        self.setup.is_some()
    }

    /// Whether block pair `(i, j)` is part of the combined matrix.
    pub fn retains(&self, i: usize, j: usize) -> bool {
        self.retain_all_blocks || i == j || i == 0 || j == 0
    }

    pub fn setup(&mut self, decomposition: BlockDecomposition, matrix: &CsrMatrix<f64>) -> Result<(), BiharmonicError> {
        self.setup = None;

        let blocks: Vec<usize> = (0..decomposition.num_blocks()).collect();
        let combined = decomposition.concatenated_matrix(matrix, &blocks, |i, j| self.retains(i, j));
        debug!(
            "Exact block preconditioner: combined matrix {}x{} with {} nnz",
            combined.nrows(),
            combined.ncols(),
            combined.nnz()
        );

        let solver = LuSolver::factor(&combined)
            .map_err(|err| map_direct_solve_error(err, 0, "ExactBlockPreconditioner::setup"))?;
        self.setup = Some(ExactSetup {
            decomposition,
            blocks,
            solver,
        });
        Ok(())
    }

    /// Solves with the combined matrix and writes the result into the entries of `z` that
    /// belong to the decomposition. All other entries of `z` are left untouched.
    pub fn solve(&self, r: DVectorView<f64>, z: DVectorViewMut<f64>) -> Result<(), BiharmonicError> {
        let setup = self.setup.as_ref().ok_or_else(|| {
            BiharmonicError::new(BiharmonicErrorKind::NotSetUp, "ExactBlockPreconditioner::solve")
        })?;
        let mut rhs = setup.decomposition.gather(r, &setup.blocks);
        setup
            .solver
            .solve_in_place(&mut rhs)
            .map_err(|err| map_direct_solve_error(err, 0, "ExactBlockPreconditioner::solve"))?;
        setup.decomposition.scatter((&rhs).into(), &setup.blocks, z);
        Ok(())
    }

    pub fn clean_up_memory(&mut self) {
        self.setup = None;
    }
}
