//! Classical (Ruge–Stüben) algebraic multigrid.
//!
//! The hierarchy is built once from a square matrix and then applied as a fixed number of
//! V-cycles from a zero initial guess, which makes [`AmgSolver`] a linear operator that can be
//! used as a preconditioner.
use crate::cg::LinearOperator;
use crate::direct::{DenseLuSolver, DirectSolveError};
use crate::ops::{diagonal, residual, spmv};
use crate::Real;
use log::{debug, warn};
use nalgebra::{convert, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Smoother {
    /// Forward sweeps before restriction, backward sweeps after prolongation.
    GaussSeidel,
    DampedJacobi { omega: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coarsening {
    RugeStueben,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmgSettings {
    pub smoother: Smoother,
    pub coarsening: Coarsening,
    /// Number of V-cycles per application.
    pub num_cycles: usize,
    pub strength_threshold: f64,
    /// Number of smoother sweeps before and after each coarse correction.
    pub smoother_iterations: usize,
    pub max_levels: usize,
    /// Levels with at most this many unknowns are solved directly.
    pub coarse_size: usize,
}

impl Default for AmgSettings {
    fn default() -> Self {
        Self {
            smoother: Smoother::GaussSeidel,
            coarsening: Coarsening::RugeStueben,
            num_cycles: 2,
            strength_threshold: 0.25,
            smoother_iterations: 2,
            max_levels: 25,
            coarse_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmgError {
    EmptyMatrix,
    NonSquare { nrows: usize, ncols: usize },
    ZeroDiagonal { level: usize, row: usize },
    CoarseSolve(DirectSolveError),
}

impl fmt::Display for AmgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMatrix => write!(f, "Cannot build multigrid hierarchy for an empty matrix"),
            Self::NonSquare { nrows, ncols } => {
                write!(f, "Multigrid requires a square matrix, got {}x{}", nrows, ncols)
            }
            Self::ZeroDiagonal { level, row } => {
                write!(f, "Zero diagonal entry in row {} on multigrid level {}", row, level)
            }
            Self::CoarseSolve(err) => write!(f, "Coarsest level solve failed: {}", err),
        }
    }
}

impl Error for AmgError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CoarseSolve(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DirectSolveError> for AmgError {
    fn from(err: DirectSolveError) -> Self {
        Self::CoarseSolve(err)
    }
}

#[derive(Debug, Clone)]
struct Level<T: Real> {
    a: CsrMatrix<T>,
    diag: DVector<T>,
    prolongation: CsrMatrix<T>,
    restriction: CsrMatrix<T>,
}

#[derive(Debug, Clone)]
pub struct AmgSolver<T: Real> {
    settings: AmgSettings,
    levels: Vec<Level<T>>,
    coarse_dim: usize,
    coarse_solver: DenseLuSolver<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointType {
    Undecided,
    Coarse,
    Fine,
}

/// Strong dependencies of each row: `j` is strong for `i` if `|a_ij| >= theta * max_{k != i} |a_ik|`.
fn strong_dependencies<T: Real>(a: &CsrMatrix<T>, theta: T) -> Vec<Vec<usize>> {
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            let max_off_diag = row
                .col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, _)| j != i)
                .fold(T::zero(), |max, (_, &a_ij)| max.max(a_ij.abs()));
            if max_off_diag == T::zero() {
                return Vec::new();
            }
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, &a_ij)| j != i && a_ij.abs() >= theta * max_off_diag)
                .map(|(&j, _)| j)
                .collect()
        })
        .collect()
}

fn transpose_dependencies(strong: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut influences = vec![Vec::new(); strong.len()];
    for (i, deps) in strong.iter().enumerate() {
        for &j in deps {
            influences[j].push(i);
        }
    }
    influences
}

/// Classical C/F splitting with the second pass that guarantees every strongly connected
/// fine point can interpolate from a coarse point.
fn ruge_stueben_splitting(strong: &[Vec<usize>], influences: &[Vec<usize>]) -> Vec<PointType> {
    let n = strong.len();
    let mut types = vec![PointType::Undecided; n];
    let mut lambda: Vec<usize> = influences.iter().map(Vec::len).collect();
    let mut heap = BinaryHeap::new();

    for i in 0..n {
        if strong[i].is_empty() && influences[i].is_empty() {
            types[i] = PointType::Fine;
        } else {
            heap.push((lambda[i], Reverse(i)));
        }
    }

    while let Some((measure, Reverse(j))) = heap.pop() {
        // Stale heap entries are skipped
        if types[j] != PointType::Undecided || measure != lambda[j] {
            continue;
        }
        types[j] = PointType::Coarse;
        for &i in &influences[j] {
            if types[i] == PointType::Undecided {
                types[i] = PointType::Fine;
                for &k in &strong[i] {
                    if types[k] == PointType::Undecided {
                        lambda[k] += 1;
                        heap.push((lambda[k], Reverse(k)));
                    }
                }
            }
        }
        for &k in &strong[j] {
            if types[k] == PointType::Undecided && lambda[k] > 0 {
                lambda[k] -= 1;
                heap.push((lambda[k], Reverse(k)));
            }
        }
    }

    // Second pass
    for i in 0..n {
        if types[i] != PointType::Fine || strong[i].is_empty() {
            continue;
        }
        let has_coarse_neighbor = strong[i].iter().any(|&j| types[j] == PointType::Coarse);
        let shares_coarse_point = |j: usize| {
            strong[j]
                .iter()
                .any(|k| types[*k] == PointType::Coarse && strong[i].contains(k))
        };
        let violates = strong[i]
            .iter()
            .any(|&j| types[j] == PointType::Fine && !shares_coarse_point(j));
        if !has_coarse_neighbor || violates {
            types[i] = PointType::Coarse;
        }
    }

    types
}

/// Direct interpolation, with negative and positive couplings distributed separately.
fn direct_interpolation<T: Real>(
    a: &CsrMatrix<T>,
    diag: &DVector<T>,
    strong: &[Vec<usize>],
    types: &[PointType],
) -> CsrMatrix<T> {
    let mut coarse_index = vec![usize::MAX; types.len()];
    let mut num_coarse = 0;
    for (i, t) in types.iter().enumerate() {
        if *t == PointType::Coarse {
            coarse_index[i] = num_coarse;
            num_coarse += 1;
        }
    }

    let mut coo = CooMatrix::new(a.nrows(), num_coarse);
    for (i, row) in a.row_iter().enumerate() {
        if types[i] == PointType::Coarse {
            coo.push(i, coarse_index[i], T::one());
            continue;
        }

        let interpolatory = |j: usize| types[j] == PointType::Coarse && strong[i].contains(&j);
        let (mut sum_neg, mut sum_pos) = (T::zero(), T::zero());
        let (mut sum_neg_c, mut sum_pos_c) = (T::zero(), T::zero());
        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            if j == i {
                continue;
            }
            if a_ij < T::zero() {
                sum_neg += a_ij;
                if interpolatory(j) {
                    sum_neg_c += a_ij;
                }
            } else {
                sum_pos += a_ij;
                if interpolatory(j) {
                    sum_pos_c += a_ij;
                }
            }
        }

        let mut a_ii = diag[i];
        let alpha = if sum_neg_c != T::zero() {
            sum_neg / sum_neg_c
        } else {
            T::zero()
        };
        let beta = if sum_pos_c != T::zero() {
            sum_pos / sum_pos_c
        } else {
            a_ii += sum_pos;
            T::zero()
        };

        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
            if j == i || !interpolatory(j) {
                continue;
            }
            let weight = if a_ij < T::zero() { alpha } else { beta };
            coo.push(i, coarse_index[j], -weight * a_ij / a_ii);
        }
    }

    CsrMatrix::from(&coo)
}

fn nonzero_diagonal<T: Real>(a: &CsrMatrix<T>, level: usize) -> Result<DVector<T>, AmgError> {
    let diag = diagonal(a);
    match diag.iter().position(|d| *d == T::zero()) {
        Some(row) => Err(AmgError::ZeroDiagonal { level, row }),
        None => Ok(diag),
    }
}

impl<T: Real> AmgSolver<T> {
    pub fn new(matrix: &CsrMatrix<T>, settings: AmgSettings) -> Result<Self, AmgError> {
        let (nrows, ncols) = (matrix.nrows(), matrix.ncols());
        if nrows != ncols {
            return Err(AmgError::NonSquare { nrows, ncols });
        }
        if nrows == 0 {
            return Err(AmgError::EmptyMatrix);
        }

        let theta: T = convert(settings.strength_threshold);
        let mut levels = Vec::new();
        let mut a = matrix.clone();
        while a.nrows() > settings.coarse_size && levels.len() + 1 < settings.max_levels {
            let level = levels.len();
            let diag = nonzero_diagonal(&a, level)?;
            let strong = match settings.coarsening {
                Coarsening::RugeStueben => strong_dependencies(&a, theta),
            };
            let influences = transpose_dependencies(&strong);
            let types = ruge_stueben_splitting(&strong, &influences);
            let num_coarse = types.iter().filter(|t| **t == PointType::Coarse).count();
            if num_coarse == 0 || num_coarse == a.nrows() {
                warn!(
                    "AMG coarsening stagnated on level {} with {} unknowns, solving directly",
                    level,
                    a.nrows()
                );
                break;
            }

            let prolongation = direct_interpolation(&a, &diag, &strong, &types);
            let restriction = prolongation.transpose();
            let coarse = &restriction * &(&a * &prolongation);
            debug!(
                "AMG level {}: {} unknowns ({} nnz), {} coarse points",
                level,
                a.nrows(),
                a.nnz(),
                num_coarse
            );
            levels.push(Level {
                a,
                diag,
                prolongation,
                restriction,
            });
            a = coarse;
        }

        debug!("AMG coarsest level: {} unknowns, {} levels in total", a.nrows(), levels.len() + 1);
        // Rejects hierarchies whose coarsest operator is numerically singular
        let coarse_solver = DenseLuSolver::factor(&a)?;
        Ok(Self {
            settings,
            levels,
            coarse_dim: a.nrows(),
            coarse_solver,
        })
    }

    pub fn settings(&self) -> &AmgSettings {
        &self.settings
    }

    /// Number of levels in the hierarchy, including the directly solved coarsest level.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Number of unknowns on each level, finest first.
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels
            .iter()
            .map(|level| level.a.nrows())
            .chain(std::iter::once(self.coarse_dim))
            .collect()
    }

    pub fn dim(&self) -> usize {
        self.levels
            .first()
            .map(|level| level.a.nrows())
            .unwrap_or(self.coarse_dim)
    }

    fn smooth(&self, level: &Level<T>, b: &DVector<T>, x: &mut DVector<T>, forward: bool) {
        let n = x.len();
        for _ in 0..self.settings.smoother_iterations {
            match self.settings.smoother {
                Smoother::GaussSeidel => {
                    for idx in 0..n {
                        let i = if forward { idx } else { n - 1 - idx };
                        let row = level.a.row(i);
                        let mut sum = b[i];
                        for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                            if j != i {
                                sum -= a_ij * x[j];
                            }
                        }
                        x[i] = sum / level.diag[i];
                    }
                }
                Smoother::DampedJacobi { omega } => {
                    let omega: T = convert(omega);
                    let mut r = residual(&level.a, (&*x).into(), b.into());
                    r.component_div_assign(&level.diag);
                    x.axpy(omega, &r, T::one());
                }
            }
        }
    }

    fn v_cycle(&self, level_index: usize, b: &DVector<T>, x: &mut DVector<T>) -> Result<(), AmgError> {
        let Some(level) = self.levels.get(level_index) else {
            x.copy_from(b);
            return Ok(self.coarse_solver.solve_in_place(x)?);
        };

        self.smooth(level, b, x, true);
        let r = residual(&level.a, (&*x).into(), b.into());
        let r_coarse = spmv(&level.restriction, (&r).into());
        let mut x_coarse = DVector::zeros(r_coarse.len());
        self.v_cycle(level_index + 1, &r_coarse, &mut x_coarse)?;
        let correction = spmv(&level.prolongation, (&x_coarse).into());
        *x += correction;
        self.smooth(level, b, x, false);
        Ok(())
    }

    /// Approximately solves `A x = b` with the configured number of V-cycles, starting from zero.
    pub fn solve(&self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<(), AmgError> {
        assert_eq!(b.len(), self.dim(), "Right-hand side dimension must match the matrix");
        assert_eq!(x.len(), self.dim(), "Solution dimension must match the matrix");
        let b = b.clone_owned();
        let mut solution = DVector::zeros(b.len());
        for _ in 0..self.settings.num_cycles {
            self.v_cycle(0, &b, &mut solution)?;
        }
        x.copy_from(&solution);
        Ok(())
    }
}

impl<T: Real> LinearOperator<T> for AmgSolver<T> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        Ok(self.solve(x, y)?)
    }
}
