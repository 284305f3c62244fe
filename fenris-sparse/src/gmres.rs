//! Restarted GMRES with right preconditioning.
//!
//! Block preconditioners for the biharmonic problem are in general not symmetric (the inexact
//! variant applies a block lower-triangular back-substitution), so GMRES rather than CG is the
//! natural outer iteration.
use crate::cg::{IdentityOperator, LinearOperator, SolveErrorKind};
use crate::Real;
use log::debug;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GmresSettings<T> {
    /// Relative residual tolerance ||b - Ax|| <= tol * ||b||.
    pub tolerance: T,
    /// Dimension of the Krylov subspace before restarting.
    pub restart: usize,
    /// Total number of Arnoldi steps over all restart cycles.
    pub max_iterations: usize,
}

impl Default for GmresSettings<f64> {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            restart: 50,
            max_iterations: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GmresOutput<T> {
    pub num_iterations: usize,
    pub relative_residual: T,
}

#[derive(Debug)]
pub struct GmresError<T> {
    pub output: GmresOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T: fmt::Debug> fmt::Display for GmresError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GMRES failed after {} iterations (relative residual {:?}). Error: {}",
            self.output.num_iterations, self.output.relative_residual, self.kind
        )
    }
}

impl<T: fmt::Debug> Error for GmresError<T> {}

#[derive(Debug)]
pub struct Gmres<T, A, P> {
    operator: A,
    preconditioner: P,
    settings: GmresSettings<T>,
}

impl<T: Real, A> Gmres<T, A, IdentityOperator> {
    pub fn new(operator: A, settings: GmresSettings<T>) -> Self {
        Self {
            operator,
            preconditioner: IdentityOperator,
            settings,
        }
    }
}

impl<T: Real, A, P> Gmres<T, A, P> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> Gmres<T, A, P2> {
        Gmres {
            operator: self.operator,
            preconditioner,
            settings: self.settings,
        }
    }
}

/// Computes the Givens rotation (c, s) that annihilates `b` in the vector `(a, b)`.
fn givens_rotation<T: Real>(a: T, b: T) -> (T, T) {
    if b == T::zero() {
        (T::one(), T::zero())
    } else {
        let r = a.hypot(b);
        (a / r, b / r)
    }
}

impl<T, A, P> Gmres<T, A, P>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    /// Solves `A x = b`, using the contents of `x` as the initial guess.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn solve_with_guess<'b>(
        &self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<GmresOutput<T>, GmresError<T>> {
        let b = b.into();
        let mut x = x.into();
        assert_eq!(b.len(), x.len());
        let n = b.len();

        let mut output = GmresOutput {
            num_iterations: 0,
            relative_residual: 0.0,
        };

        let b_norm = b.norm();
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(output);
        }

        let m = self.settings.restart.max(1).min(n.max(1));
        let mut r = DVector::zeros(n);
        let mut w = DVector::zeros(n);
        let mut z = DVector::zeros(n);

        loop {
            // r = b - A x
            self.operator
                .apply((&mut r).into(), (&x).into())
                .map_err(|err| GmresError {
                    output: output.clone(),
                    kind: SolveErrorKind::OperatorError(err),
                })?;
            r.zip_apply(&b, |ax_i, b_i| *ax_i = b_i - *ax_i);
            let beta = r.norm();
            output.relative_residual = beta / b_norm;
            if output.relative_residual <= self.settings.tolerance {
                debug!("GMRES converged after {} iterations", output.num_iterations);
                return Ok(output);
            }
            if output.num_iterations >= self.settings.max_iterations {
                let max_iter = self.settings.max_iterations;
                return Err(GmresError {
                    output,
                    kind: SolveErrorKind::MaxIterationsReached { max_iter },
                });
            }

            let mut basis: Vec<DVector<T>> = Vec::with_capacity(m + 1);
            basis.push(&r / beta);
            let mut h = DMatrix::zeros(m + 1, m);
            let mut g = DVector::zeros(m + 1);
            g[0] = beta;
            let mut rotations: Vec<(T, T)> = Vec::with_capacity(m);

            let mut k = 0;
            while k < m && output.num_iterations < self.settings.max_iterations {
                // w = A M^{-1} v_k
                self.preconditioner
                    .apply((&mut z).into(), (&basis[k]).into())
                    .map_err(|err| GmresError {
                        output: output.clone(),
                        kind: SolveErrorKind::PreconditionerError(err),
                    })?;
                self.operator
                    .apply((&mut w).into(), (&z).into())
                    .map_err(|err| GmresError {
                        output: output.clone(),
                        kind: SolveErrorKind::OperatorError(err),
                    })?;

                // Modified Gram-Schmidt
                for (j, v_j) in basis.iter().enumerate() {
                    let h_jk = w.dot(v_j);
                    h[(j, k)] = h_jk;
                    w.axpy(-h_jk, v_j, 1.0);
                }
                let w_norm = w.norm();
                h[(k + 1, k)] = w_norm;

                for (j, &(c, s)) in rotations.iter().enumerate() {
                    let (h_j, h_j1): (T, T) = (h[(j, k)], h[(j + 1, k)]);
                    h[(j, k)] = c * h_j + s * h_j1;
                    h[(j + 1, k)] = -s * h_j + c * h_j1;
                }
                let (c, s) = givens_rotation(h[(k, k)], h[(k + 1, k)]);
                h[(k, k)] = c * h[(k, k)] + s * h[(k + 1, k)];
                h[(k + 1, k)] = 0.0;
                rotations.push((c, s));
                g[k + 1] = -s * g[k];
                g[k] = c * g[k];

                output.num_iterations += 1;
                k += 1;

                let estimated_residual = g[k].abs() / b_norm;
                if estimated_residual <= self.settings.tolerance || w_norm == 0.0 {
                    break;
                }
                basis.push(&w / w_norm);
            }

            // Solve the upper triangular system H y = g by back substitution
            let mut y = DVector::zeros(k);
            for i in (0..k).rev() {
                let mut sum = g[i];
                for j in (i + 1)..k {
                    sum -= h[(i, j)] * y[j];
                }
                y[i] = sum / h[(i, i)];
            }

            // x <- x + M^{-1} V y
            w.fill(0.0);
            for (j, y_j) in y.iter().enumerate() {
                w.axpy(*y_j, &basis[j], 1.0);
            }
            self.preconditioner
                .apply((&mut z).into(), (&w).into())
                .map_err(|err| GmresError {
                    output: output.clone(),
                    kind: SolveErrorKind::PreconditionerError(err),
                })?;
            x.axpy(1.0, &z, 1.0);
        }
    }
}
