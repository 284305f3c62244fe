//! Helpers shared by the test suites of the workspace.
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// The standard `[-1, 2, -1]` finite difference Laplacian on `n` points.
pub fn poisson_1d(n: usize) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 2.0);
        if i > 0 {
            coo.push(i, i - 1, -1.0);
        }
        if i + 1 < n {
            coo.push(i, i + 1, -1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// The 5-point finite difference Laplacian on an `nx x ny` grid.
pub fn poisson_2d(nx: usize, ny: usize) -> CsrMatrix<f64> {
    let n = nx * ny;
    let index = |i: usize, j: usize| j * nx + i;
    let mut coo = CooMatrix::new(n, n);
    for j in 0..ny {
        for i in 0..nx {
            let row = index(i, j);
            coo.push(row, row, 4.0);
            if i > 0 {
                coo.push(row, index(i - 1, j), -1.0);
            }
            if i + 1 < nx {
                coo.push(row, index(i + 1, j), -1.0);
            }
            if j > 0 {
                coo.push(row, index(i, j - 1), -1.0);
            }
            if j + 1 < ny {
                coo.push(row, index(i, j + 1), -1.0);
            }
        }
    }
    CsrMatrix::from(&coo)
}

/// Builds a strictly diagonally dominant matrix from the given off-diagonal pattern.
///
/// Each diagonal entry is `1 + 2 * sum_j |a_ij|` over the off-diagonal entries of its row, so every
/// row sum is strictly positive.
pub fn diagonally_dominant(off_diagonal: &DMatrix<f64>) -> CsrMatrix<f64> {
    assert_eq!(off_diagonal.nrows(), off_diagonal.ncols());
    let mut matrix = off_diagonal.clone();
    for i in 0..matrix.nrows() {
        matrix[(i, i)] = 0.0;
        let off_sum: f64 = matrix.row(i).iter().map(|a| a.abs()).sum();
        matrix[(i, i)] = 1.0 + 2.0 * off_sum;
    }
    CsrMatrix::from(&matrix)
}

/// A symmetric positive definite matrix with a fixed, irregular sparsity pattern.
///
/// The off-diagonal entries couple every unknown with its neighbours at distance 1 and 5, plus
/// a scattered set of long-range couplings. The diagonal is chosen as in [`diagonally_dominant`].
pub fn synthetic_spd_matrix(n: usize) -> CsrMatrix<f64> {
    let mut off_diagonal = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let a_ij = match j - i {
                1 => -0.5,
                5 => 0.25,
                _ if (7 * i + 3 * j) % 11 == 0 => -0.125,
                _ => 0.0,
            };
            off_diagonal[(i, j)] = a_ij;
            off_diagonal[(j, i)] = a_ij;
        }
    }
    diagonally_dominant(&off_diagonal)
}

/// The weighted graph Laplacian of a path on `n` vertices with additional chords `(i, i + 7)`.
///
/// Every row sums to zero, so the matrix is singular with the constant vector in its null space,
/// while all diagonal entries are positive. The irrational weights make sure that elimination
/// leaves a rounding-level pivot rather than an exact zero.
pub fn weighted_graph_laplacian(n: usize) -> CsrMatrix<f64> {
    let mut edges = Vec::new();
    for i in 0..n {
        if i + 1 < n {
            edges.push((i, i + 1, 1.0 + 0.5 * (i as f64).sin().abs() + 0.1 * (2.0f64).sqrt()));
        }
        if i + 7 < n {
            edges.push((i, i + 7, 0.3 + (i as f64 / 3.0).cos().abs() / 3.0));
        }
    }

    let mut coo = CooMatrix::new(n, n);
    for (i, j, w) in edges {
        coo.push(i, j, -w);
        coo.push(j, i, -w);
        coo.push(i, i, w);
        coo.push(j, j, w);
    }
    CsrMatrix::from(&coo)
}
