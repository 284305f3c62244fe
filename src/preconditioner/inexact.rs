use crate::block::BlockDecomposition;
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use crate::preconditioner::exact::map_direct_solve_error;
use fenris_sparse::amg::{AmgError, AmgSettings, AmgSolver};
use fenris_sparse::direct::{DirectSolveError, LuSolver};
use fenris_sparse::lumped::{LumpedPreconditioner, LumpingError};
use fenris_sparse::ops::{diagonal, scale_rows, spmv};
use log::{debug, warn};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;

type Blocks = [[CsrMatrix<f64>; 3]; 3];

/// The stages an [`InexactBlockPreconditioner`] passes through during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InexactStage {
    Uninitialized,
    BlocksExtracted,
    LumpedApproximated,
    SchurAssembled,
    Factorized,
}

#[derive(Debug)]
enum SchurSolver {
    Direct(LuSolver),
    Amg(AmgSolver<f64>),
}

#[derive(Debug)]
struct Factorized {
    decomposition: BlockDecomposition,
    /// The couplings `J_10` and `J_20` needed for the back substitution.
    lower_blocks: [CsrMatrix<f64>; 2],
    lumped: [LumpedPreconditioner<f64>; 2],
    schur_solver: SchurSolver,
}

#[derive(Debug)]
enum InexactState {
    Uninitialized,
    BlocksExtracted {
        decomposition: BlockDecomposition,
        blocks: Box<Blocks>,
    },
    LumpedApproximated {
        decomposition: BlockDecomposition,
        blocks: Box<Blocks>,
        lumped: [LumpedPreconditioner<f64>; 2],
    },
    SchurAssembled {
        decomposition: BlockDecomposition,
        blocks: Box<Blocks>,
        lumped: [LumpedPreconditioner<f64>; 2],
        schur: CsrMatrix<f64>,
    },
    Factorized(Factorized),
}

/// Approximate block solve based on a lumped Schur complement of block 0.
///
/// With `D_11` and `D_22` the lumped (signed row sum) approximations of `J_11` and `J_22`,
/// setup assembles
///
/// ```text
/// S_00 = J_00 - J_01 D_11^{-1} J_10 - J_02 D_22^{-1} J_20
/// ```
///
/// and factorizes it, either directly or with algebraic multigrid. A solve computes
/// `z_0 = S_00^{-1} r_0` followed by `z_k = D_kk^{-1} (r_k - J_k0 z_0)` for `k = 1, 2`.
#[derive(Debug)]
pub struct InexactBlockPreconditioner {
    use_amg: bool,
    amg_settings: AmgSettings,
    state: InexactState,
}

impl InexactBlockPreconditioner {
    pub fn new(use_amg: bool) -> Self {
        Self {
            use_amg,
            amg_settings: AmgSettings::default(),
            state: InexactState::Uninitialized,
        }
    }

    pub fn with_amg_settings(self, amg_settings: AmgSettings) -> Self {
        Self { amg_settings, ..self }
    }

    pub fn uses_amg(&self) -> bool {
        self.use_amg
    }

    pub fn stage(&self) -> InexactStage {
        match self.state {
            InexactState::Uninitialized => InexactStage::Uninitialized,
            InexactState::BlocksExtracted { .. } => InexactStage::BlocksExtracted,
            InexactState::LumpedApproximated { .. } => InexactStage::LumpedApproximated,
            InexactState::SchurAssembled { .. } => InexactStage::SchurAssembled,
            InexactState::Factorized(_) => InexactStage::Factorized,
        }
    }

    /// Runs the full setup chain on a decomposition with three blocks.
    ///
    /// On error, the preconditioner is left uninitialized.
    pub fn setup(&mut self, decomposition: BlockDecomposition, matrix: &CsrMatrix<f64>) -> Result<(), BiharmonicError> {
        assert_eq!(
            decomposition.num_blocks(),
            3,
            "Inexact block preconditioner requires exactly three blocks"
        );
        self.state = InexactState::Uninitialized;

        let mut state = extract_blocks(decomposition, matrix);
        while !matches!(state, InexactState::Factorized(_)) {
            state = self.advance(state)?;
        }
        self.state = state;
        Ok(())
    }

    fn advance(&self, state: InexactState) -> Result<InexactState, BiharmonicError> {
        match state {
            InexactState::BlocksExtracted { decomposition, blocks } => {
                let lumped = [lump(&blocks[1][1], 1)?, lump(&blocks[2][2], 2)?];
                Ok(InexactState::LumpedApproximated {
                    decomposition,
                    blocks,
                    lumped,
                })
            }
            InexactState::LumpedApproximated {
                decomposition,
                blocks,
                lumped,
            } => {
                let schur = assemble_schur_complement(&blocks, &lumped);
                check_schur_complement(&schur)?;
                Ok(InexactState::SchurAssembled {
                    decomposition,
                    blocks,
                    lumped,
                    schur,
                })
            }
            InexactState::SchurAssembled {
                decomposition,
                blocks,
                lumped,
                schur,
            } => {
                let schur_solver = self.factorize(&schur)?;
                let [_, row1, row2] = *blocks;
                let [j10, ..] = row1;
                let [j20, ..] = row2;
                Ok(InexactState::Factorized(Factorized {
                    decomposition,
                    lower_blocks: [j10, j20],
                    lumped,
                    schur_solver,
                }))
            }
            state => Ok(state),
        }
    }

    fn factorize(&self, schur: &CsrMatrix<f64>) -> Result<SchurSolver, BiharmonicError> {
        const FUNCTION: &str = "InexactBlockPreconditioner::setup";
        if self.use_amg && schur.nrows() > 0 {
            AmgSolver::new(schur, self.amg_settings)
                .map(SchurSolver::Amg)
                .map_err(|err| {
                    let kind = match err {
                        AmgError::CoarseSolve(DirectSolveError::Singular) => BiharmonicErrorKind::SingularBlock {
                            block: 0,
                            reason: "the coarsest multigrid level of the Schur complement is singular".to_string(),
                        },
                        other => BiharmonicErrorKind::Amg(other),
                    };
                    BiharmonicError::new(kind, FUNCTION)
                })
        } else {
            LuSolver::factor(schur)
                .map(SchurSolver::Direct)
                .map_err(|err| map_direct_solve_error(err, 0, FUNCTION))
        }
    }

    /// Applies the preconditioner to the block unknowns of `r`. Entries of `z` outside the
    /// three blocks are left untouched.
    pub fn solve(&self, r: DVectorView<f64>, mut z: DVectorViewMut<f64>) -> Result<(), BiharmonicError> {
        const FUNCTION: &str = "InexactBlockPreconditioner::solve";
        let InexactState::Factorized(factorized) = &self.state else {
            return Err(BiharmonicError::new(BiharmonicErrorKind::NotSetUp, FUNCTION));
        };
        let decomposition = &factorized.decomposition;

        let r0 = decomposition.gather_block(r, 0);
        let mut z0 = DVector::zeros(r0.len());
        match &factorized.schur_solver {
            SchurSolver::Direct(lu) => lu
                .solve((&r0).into(), (&mut z0).into())
                .map_err(|err| map_direct_solve_error(err, 0, FUNCTION))?,
            SchurSolver::Amg(amg) => amg
                .solve((&r0).into(), (&mut z0).into())
                .map_err(|err| BiharmonicError::new(BiharmonicErrorKind::Amg(err), FUNCTION))?,
        }

        for k in 1..=2 {
            let mut rk = decomposition.gather_block(r, k);
            rk -= spmv(&factorized.lower_blocks[k - 1], (&z0).into());
            let mut zk = DVector::zeros(rk.len());
            factorized.lumped[k - 1].solve((&rk).into(), (&mut zk).into());
            decomposition.scatter_block((&zk).into(), k, (&mut z).into());
        }
        decomposition.scatter_block((&z0).into(), 0, (&mut z).into());
        Ok(())
    }

    pub fn clean_up_memory(&mut self) {
        self.state = InexactState::Uninitialized;
    }
}

fn extract_blocks(decomposition: BlockDecomposition, matrix: &CsrMatrix<f64>) -> InexactState {
    let blocks: Blocks =
        std::array::from_fn(|i| std::array::from_fn(|j| decomposition.get_block(matrix, i, j)));
    debug!(
        "Inexact block preconditioner: extracted blocks with nnz {:?}",
        blocks
            .iter()
            .map(|row| row.iter().map(CsrMatrix::nnz).collect::<Vec<_>>())
            .collect::<Vec<_>>()
    );
    InexactState::BlocksExtracted {
        decomposition,
        blocks: Box::new(blocks),
    }
}

fn lump(block_matrix: &CsrMatrix<f64>, block: usize) -> Result<LumpedPreconditioner<f64>, BiharmonicError> {
    const FUNCTION: &str = "InexactBlockPreconditioner::setup";
    LumpedPreconditioner::from_csr(block_matrix).map_err(|err| {
        let kind = match err {
            LumpingError::ZeroRowSum { row } => BiharmonicErrorKind::ZeroLumpedDiagonal { block, row },
            other => BiharmonicErrorKind::Lumping(other),
        };
        BiharmonicError::new(kind, FUNCTION)
    })
}

/// `S_00 = J_00 - sum_k J_0k D_kk^{-1} J_k0` for the lumped blocks that are positive.
fn assemble_schur_complement(blocks: &Blocks, lumped: &[LumpedPreconditioner<f64>; 2]) -> CsrMatrix<f64> {
    let mut schur = blocks[0][0].clone();
    for k in 1..=2 {
        let d_inv = &lumped[k - 1];
        if !d_inv.is_positive() {
            warn!(
                "Lumped approximation of block {} is not positive, its Schur complement term is skipped",
                k
            );
            continue;
        }
        let scaled = scale_rows(&blocks[k][0], d_inv.inverse_diagonal().into());
        let correction = &blocks[0][k] * &scaled;
        schur = &schur - &correction;
    }
    debug!(
        "Inexact block preconditioner: Schur complement {}x{} with {} nnz",
        schur.nrows(),
        schur.ncols(),
        schur.nnz()
    );
    schur
}

/// Rejects Schur complements with an empty row or a zero diagonal entry.
///
/// Numerically singular Schur complements are caught by the factorization that follows.
fn check_schur_complement(schur: &CsrMatrix<f64>) -> Result<(), BiharmonicError> {
    const FUNCTION: &str = "InexactBlockPreconditioner::setup";
    let singular = |reason: String| {
        BiharmonicError::new(BiharmonicErrorKind::SingularBlock { block: 0, reason }, FUNCTION)
    };
    if let Some(row) = schur.row_iter().position(|row| row.nnz() == 0) {
        return Err(singular(format!("row {} of the Schur complement is empty", row)));
    }
    if let Some(row) = diagonal(schur).iter().position(|d| *d == 0.0) {
        return Err(singular(format!("row {} of the Schur complement has a zero diagonal", row)));
    }
    Ok(())
}
