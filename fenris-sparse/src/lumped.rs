//! Lumped (row-sum) diagonal approximations of sparse matrices.
use crate::cg::LinearOperator;
use crate::ops::row_sums;
use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LumpingError {
    NonSquare { nrows: usize, ncols: usize },
    /// The row sums to exactly zero, so the lumped matrix has no inverse.
    ZeroRowSum { row: usize },
}

impl fmt::Display for LumpingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonSquare { nrows, ncols } => {
                write!(f, "Cannot lump non-square matrix of dimensions {}x{}", nrows, ncols)
            }
            Self::ZeroRowSum { row } => write!(f, "Row {} of the matrix sums to zero, cannot invert lumped matrix", row),
        }
    }
}

impl Error for LumpingError {}

/// A diagonal approximation of a matrix whose entries are the signed row sums of the matrix.
///
/// Only the inverse of the lumped diagonal is stored. The preconditioner is never solved with
/// directly; its action is simply a scaling by the reciprocals of the row sums.
#[derive(Debug, Clone)]
pub struct LumpedPreconditioner<T: Real> {
    inv_lumped_diagonal: DVector<T>,
    positive: bool,
}

impl<T: Real> LumpedPreconditioner<T> {
    /// Lumps the given square matrix.
    ///
    /// Returns an error if any row sums to exactly zero.
    pub fn from_csr(matrix: &CsrMatrix<T>) -> Result<Self, LumpingError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(LumpingError::NonSquare {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
            });
        }

        let mut lumped = row_sums(matrix);
        let mut positive = true;
        for (row, d) in lumped.iter_mut().enumerate() {
            if *d == T::zero() {
                return Err(LumpingError::ZeroRowSum { row });
            }
            if *d < T::zero() {
                positive = false;
            }
            *d = T::one() / *d;
        }

        Ok(Self {
            inv_lumped_diagonal: lumped,
            positive,
        })
    }

    /// Whether every lumped diagonal entry is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.positive
    }

    pub fn len(&self) -> usize {
        self.inv_lumped_diagonal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inv_lumped_diagonal.is_empty()
    }

    /// The reciprocals of the row sums.
    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inv_lumped_diagonal
    }

    /// Computes `z = diag(A)^{-1} r` for the lumped diagonal of `A`.
    pub fn solve(&self, r: DVectorView<T>, mut z: DVectorViewMut<T>) {
        assert_eq!(r.len(), self.len());
        assert_eq!(z.len(), self.len());
        z.copy_from(&r);
        z.component_mul_assign(&self.inv_lumped_diagonal);
    }
}

impl<T: Real> LinearOperator<T> for LumpedPreconditioner<T> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        self.solve(x, y);
        Ok(())
    }
}
