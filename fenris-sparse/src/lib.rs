//! Sparse linear algebra for the biharmonic block preconditioners.
//!
//! Everything in this crate operates on [`nalgebra_sparse::CsrMatrix`]. The preconditioners
//! in `fenris-biharmonic` use the building blocks here as opaque subsidiary solvers:
//!
//! - [`lumped::LumpedPreconditioner`]: row-sum lumping, used as a cheap approximate inverse
//! - [`direct::LuSolver`]: sparse direct factorization of a block
//! - [`amg::AmgSolver`]: classical Ruge-Stüben algebraic multigrid
//! - [`cg::ConjugateGradient`] and [`gmres::Gmres`]: outer Krylov iterations
use nalgebra::RealField;

pub mod amg;
pub mod cg;
pub mod direct;
pub mod gmres;
pub mod lumped;
pub mod ops;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// Real scalar types supported by the solvers in this crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
