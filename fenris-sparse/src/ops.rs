//! Small CSR kernels shared by the lumping, direct and multigrid solvers.
use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::CsrMatrix;
use num::Zero;

/// Computes `y = A x` for a CSR matrix `A`.
///
/// # Panics
///
/// Panics if the dimensions of `y`, `A` and `x` are not compatible.
pub fn spmv_into<T: Real>(mut y: DVectorViewMut<T>, a: &CsrMatrix<T>, x: DVectorView<T>) {
    assert_eq!(y.len(), a.nrows(), "Output dimension must match number of rows");
    assert_eq!(x.len(), a.ncols(), "Input dimension must match number of columns");
    for (i, row) in a.row_iter().enumerate() {
        let mut sum = T::zero();
        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            sum += a_ij * x[j];
        }
        y[i] = sum;
    }
}

/// Computes `A x` for a CSR matrix `A`.
pub fn spmv<T: Real>(a: &CsrMatrix<T>, x: DVectorView<T>) -> DVector<T> {
    let mut y = DVector::zeros(a.nrows());
    spmv_into((&mut y).into(), a, x);
    y
}

/// Computes the residual `b - A x`.
pub fn residual<T: Real>(a: &CsrMatrix<T>, x: DVectorView<T>, b: DVectorView<T>) -> DVector<T> {
    let mut r = spmv(a, x);
    r.zip_apply(&b, |ax_i, b_i| *ax_i = b_i - *ax_i);
    r
}

/// The (signed) sum of each row of the matrix.
pub fn row_sums<T: Real>(a: &CsrMatrix<T>) -> DVector<T> {
    DVector::from_iterator(
        a.nrows(),
        a.row_iter()
            .map(|row| row.values().iter().fold(T::zero(), |acc, &v| acc + v)),
    )
}

/// The diagonal of a square matrix, with zeros for entries that are not explicitly stored.
pub fn diagonal<T: Real>(a: &CsrMatrix<T>) -> DVector<T> {
    assert_eq!(a.nrows(), a.ncols(), "Diagonal is only defined for square matrices");
    DVector::from_iterator(
        a.nrows(),
        a.row_iter().enumerate().map(|(i, row)| {
            row.col_indices()
                .binary_search(&i)
                .map(|idx| row.values()[idx])
                .unwrap_or_else(|_| T::zero())
        }),
    )
}

/// Returns `D A`, where `D = diag(scale)`.
///
/// The sparsity pattern of `A` is preserved.
pub fn scale_rows<T: Real>(a: &CsrMatrix<T>, scale: DVectorView<T>) -> CsrMatrix<T> {
    assert_eq!(scale.len(), a.nrows(), "Need exactly one scale factor per row");
    let mut scaled = a.clone();
    for (i, mut row) in scaled.row_iter_mut().enumerate() {
        let s = scale[i];
        for v in row.values_mut() {
            *v *= s;
        }
    }
    scaled
}

/// Copies `x[indices[k]]` into entry `k` of the result.
pub fn gather<T: Scalar + Zero>(x: DVectorView<T>, indices: &[usize]) -> DVector<T> {
    DVector::from_iterator(indices.len(), indices.iter().map(|&i| x[i].clone()))
}

/// Copies entry `k` of `x` into `y[indices[k]]`, leaving all other entries of `y` untouched.
pub fn scatter<T: Scalar>(x: DVectorView<T>, indices: &[usize], mut y: DVectorViewMut<T>) {
    assert_eq!(x.len(), indices.len());
    for (k, &i) in indices.iter().enumerate() {
        y[i] = x[k].clone();
    }
}
