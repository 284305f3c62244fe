//! Direct factorization of sparse blocks.
//!
//! [`LuSolver`] factorizes a block with a sparse LU decomposition and is the direct solver used
//! for the blocks of the preconditioners. [`DenseLuSolver`] works on the dense representation
//! and is only meant for the tiny systems on the coarsest level of a multigrid hierarchy.
//!
//! Both solvers reject numerically singular matrices at factorization time, not only matrices
//! with an exactly zero pivot.
use crate::cg::LinearOperator;
use crate::Real;
use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use faer::sparse::{SparseColMat, Triplet};
use faer::Mat;
use nalgebra::linalg::LU;
use nalgebra::{convert, DMatrix, DVector, DVectorView, DVectorViewMut, Dyn};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::fmt;

/// Matrices whose estimated reciprocal condition number falls below this multiple of the
/// machine epsilon are treated as singular.
const SINGULARITY_FACTOR: f64 = 1e3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectSolveError {
    NonSquare { nrows: usize, ncols: usize },
    /// The matrix is singular to working precision.
    Singular,
    DimensionMismatch { expected: usize, actual: usize },
    /// The sparse factorization backend failed.
    Factorization(String),
}

impl fmt::Display for DirectSolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonSquare { nrows, ncols } => {
                write!(f, "Cannot factorize non-square matrix of dimensions {}x{}", nrows, ncols)
            }
            Self::Singular => write!(f, "Matrix is singular to working precision"),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "Right-hand side has dimension {}, but the factorized matrix has dimension {}",
                actual, expected
            ),
            Self::Factorization(msg) => write!(f, "Sparse LU factorization failed: {}", msg),
        }
    }
}

impl Error for DirectSolveError {}

fn check_square(nrows: usize, ncols: usize) -> Result<(), DirectSolveError> {
    if nrows != ncols {
        Err(DirectSolveError::NonSquare { nrows, ncols })
    } else {
        Ok(())
    }
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), DirectSolveError> {
    if expected != actual {
        Err(DirectSolveError::DimensionMismatch { expected, actual })
    } else {
        Ok(())
    }
}

/// Sparse LU factorization with partial pivoting.
///
/// After factorization, the reciprocal condition number is estimated from one solve with a
/// strictly positive right-hand side,
///
/// ```text
/// rcond ~ |b|_inf / (|A|_inf |A^{-1} b|_inf),
/// ```
///
/// and the matrix is rejected as [`DirectSolveError::Singular`] if the estimate is not above
/// a small multiple of the machine epsilon.
pub struct LuSolver {
    dim: usize,
    nnz: usize,
    // None for empty matrices
    lu: Option<Lu<usize, f64>>,
}

impl fmt::Debug for LuSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuSolver")
            .field("dim", &self.dim)
            .field("nnz", &self.nnz)
            .finish()
    }
}

impl LuSolver {
    pub fn factor(matrix: &CsrMatrix<f64>) -> Result<Self, DirectSolveError> {
        check_square(matrix.nrows(), matrix.ncols())?;
        let n = matrix.nrows();
        if n == 0 {
            return Ok(Self {
                dim: 0,
                nnz: 0,
                lu: None,
            });
        }

        let triplets: Vec<_> = matrix
            .triplet_iter()
            .map(|(i, j, &a_ij)| Triplet::new(i, j, a_ij))
            .collect();
        let a = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|err| DirectSolveError::Factorization(format!("{:?}", err)))?;
        let symbolic = SymbolicLu::try_new(a.symbolic())
            .map_err(|err| DirectSolveError::Factorization(format!("{:?}", err)))?;
        // The only numerical failure of the factorization is a zero pivot
        let lu = Lu::try_new_with_symbolic(symbolic, a.as_ref()).map_err(|_| DirectSolveError::Singular)?;

        let solver = Self {
            dim: n,
            nnz: matrix.nnz(),
            lu: Some(lu),
        };
        solver.check_condition(matrix)?;
        Ok(solver)
    }

    fn check_condition(&self, matrix: &CsrMatrix<f64>) -> Result<(), DirectSolveError> {
        let n = self.dim;
        let mut x = DVector::from_fn(n, |i, _| 1.0 + 0.5 * (i as f64).sin());
        let b_norm = x.amax();
        self.solve_in_place(&mut x)?;

        let a_norm = matrix
            .row_iter()
            .map(|row| row.values().iter().map(|a_ij| a_ij.abs()).sum::<f64>())
            .fold(0.0, f64::max);
        let x_norm = x.amax();
        if !x.iter().all(|x_i| x_i.is_finite()) {
            return Err(DirectSolveError::Singular);
        }

        let rcond = b_norm / (a_norm * x_norm);
        if rcond <= SINGULARITY_FACTOR * f64::EPSILON {
            Err(DirectSolveError::Singular)
        } else {
            Ok(())
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Overwrites `b` with the solution of `A x = b`.
    pub fn solve_in_place(&self, b: &mut DVector<f64>) -> Result<(), DirectSolveError> {
        check_dimension(self.dim, b.len())?;
        if let Some(lu) = &self.lu {
            let rhs = Mat::from_fn(b.len(), 1, |i, _| b[i]);
            let x = lu.solve(&rhs);
            for (i, b_i) in b.iter_mut().enumerate() {
                *b_i = x[(i, 0)];
            }
        }
        Ok(())
    }

    /// Solves `A x = b`.
    pub fn solve(&self, b: DVectorView<f64>, mut x: DVectorViewMut<f64>) -> Result<(), DirectSolveError> {
        let mut solution = b.clone_owned();
        self.solve_in_place(&mut solution)?;
        x.copy_from(&solution);
        Ok(())
    }
}

impl LinearOperator<f64> for LuSolver {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        Ok(self.solve(x, y)?)
    }
}

/// Dense LU factorization with partial pivoting.
///
/// The factorization is rejected as singular when the smallest pivot is not above
/// `n * eps * max_i |U_ii|` (up to a constant factor).
#[derive(Debug, Clone)]
pub struct DenseLuSolver<T: Real> {
    dim: usize,
    lu: Option<LU<T, Dyn, Dyn>>,
}

impl<T: Real> DenseLuSolver<T> {
    pub fn factor(matrix: &CsrMatrix<T>) -> Result<Self, DirectSolveError> {
        check_square(matrix.nrows(), matrix.ncols())?;
        let n = matrix.nrows();
        if n == 0 {
            return Ok(Self { dim: 0, lu: None });
        }

        let lu = DMatrix::from(matrix).lu();
        let pivots = lu.u().diagonal().abs();
        let tolerance = pivots.max() * convert(n as f64 * SINGULARITY_FACTOR * f64::EPSILON);
        if !lu.is_invertible() || pivots.min() <= tolerance {
            return Err(DirectSolveError::Singular);
        }

        Ok(Self { dim: n, lu: Some(lu) })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn solve_in_place(&self, b: &mut DVector<T>) -> Result<(), DirectSolveError> {
        check_dimension(self.dim, b.len())?;
        match &self.lu {
            Some(lu) if !lu.solve_mut(b) => Err(DirectSolveError::Singular),
            _ => Ok(()),
        }
    }
}
