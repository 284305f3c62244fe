//! Block preconditioning and boundary conditions for biharmonic problems discretized with
//! C1 Hermite quadrilaterals.
//!
//! The unknowns of a Hermite mesh are classified by their degree of freedom slot into blocks
//! ([`block`]), and the resulting block system is preconditioned either by a direct solve of
//! its bordered-diagonal part or by a lumped Schur complement of the value block
//! ([`preconditioner`]). The [`boundary`] module imposes Dirichlet and stream-function
//! boundary conditions on the nodal slots, and [`problem`] ties everything together.
pub mod block;
pub mod boundary;
pub mod element;
pub mod error;
pub mod mesh;
pub mod preconditioner;
pub mod problem;

pub extern crate fenris_sparse;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
