//! Problem drivers that own a Hermite mesh together with its auxiliary boundary elements.
use crate::boundary::{
    impose_dirichlet_on_boundary, impose_fluid_flow_on_edge, impose_solid_boundary_on_edge, impose_traction_free_edge,
};
use crate::element::{BoundaryEquationElement, BoundaryFunction, FluxElement};
use crate::error::BiharmonicError;
use crate::mesh::HermiteQuadMesh;
use crate::preconditioner::BiharmonicPreconditioner;
use eyre::{eyre, WrapErr};
use fenris_sparse::cg::ConjugateGradient;
use fenris_sparse::gmres::{Gmres, GmresSettings};
use fenris_sparse::ops::residual;
use log::{debug, info};
use nalgebra::{DVector, Vector2};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

/// The outer Krylov method of [`solve_preconditioned`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KrylovMethod {
    /// Restarted, right preconditioned GMRES. Works for every preconditioner type.
    #[default]
    Gmres,
    /// Preconditioned conjugate gradients. Requires a symmetric positive definite matrix and
    /// preconditioner, such as the block diagonal type applied to an SPD matrix.
    ConjugateGradient,
}

/// Settings for the outer Krylov iteration of [`solve_preconditioned`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrylovSettings {
    pub method: KrylovMethod,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Restart length, only used by GMRES.
    pub restart: usize,
}

impl Default for KrylovSettings {
    fn default() -> Self {
        Self {
            method: KrylovMethod::default(),
            tolerance: 1e-8,
            max_iterations: 500,
            restart: 50,
        }
    }
}

impl From<KrylovSettings> for GmresSettings<f64> {
    fn from(settings: KrylovSettings) -> Self {
        GmresSettings {
            tolerance: settings.tolerance,
            restart: settings.restart,
            max_iterations: settings.max_iterations,
        }
    }
}

/// Sets up the preconditioner for `matrix` and solves `matrix x = rhs` with the configured
/// Krylov method, starting from a zero guess.
pub fn solve_preconditioned(
    matrix: &CsrMatrix<f64>,
    rhs: &DVector<f64>,
    preconditioner: &mut BiharmonicPreconditioner,
    settings: &KrylovSettings,
) -> eyre::Result<DVector<f64>> {
    preconditioner
        .setup(matrix)
        .wrap_err("failed to set up biharmonic preconditioner")?;

    let mut x = DVector::zeros(rhs.len());
    match settings.method {
        KrylovMethod::Gmres => {
            let output = Gmres::new(matrix, GmresSettings::from(*settings))
                .with_preconditioner(&*preconditioner)
                .solve_with_guess(rhs, &mut x)
                .map_err(|err| eyre!("preconditioned GMRES failed: {}", err))?;
            info!(
                "Preconditioned GMRES converged in {} iterations (relative residual {:.3e})",
                output.num_iterations, output.relative_residual
            );
        }
        KrylovMethod::ConjugateGradient => {
            let output = ConjugateGradient::new(settings.tolerance)
                .with_operator(matrix)
                .with_preconditioner(&*preconditioner)
                .with_max_iter(settings.max_iterations)
                .solve_with_guess(rhs, &mut x)
                .map_err(|err| eyre!("preconditioned CG failed: {}", err))?;
            info!(
                "Preconditioned CG converged in {} iterations (relative residual {:.3e})",
                output.num_iterations,
                residual(matrix, (&x).into(), rhs.into()).norm() / rhs.norm()
            );
        }
    }
    Ok(x)
}

/// A biharmonic problem on a Hermite quadrilateral mesh with Dirichlet and Neumann boundaries.
#[derive(Debug)]
pub struct BiharmonicProblem {
    mesh: HermiteQuadMesh,
    flux_elements: Vec<FluxElement>,
}

impl BiharmonicProblem {
    pub fn new(mesh: HermiteQuadMesh) -> Self {
        Self {
            mesh,
            flux_elements: Vec::new(),
        }
    }

    pub fn mesh(&self) -> &HermiteQuadMesh {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut HermiteQuadMesh {
        &mut self.mesh
    }

    pub fn flux_elements(&self) -> &[FluxElement] {
        &self.flux_elements
    }

    /// Pins the boundary nodes to the prescribed value and, optionally, normal derivative.
    pub fn set_dirichlet_boundary_condition(
        &mut self,
        boundary: usize,
        u_fn: Option<&dyn Fn(f64) -> f64>,
        dudn_fn: Option<&dyn Fn(f64) -> f64>,
    ) -> Result<(), BiharmonicError> {
        impose_dirichlet_on_boundary(&mut self.mesh, boundary, u_fn, dudn_fn)
    }

    /// Attaches a flux element to every bulk element adjacent to the boundary.
    pub fn set_neumann_boundary_condition(
        &mut self,
        boundary: usize,
        flux0: BoundaryFunction,
        flux1: Option<BoundaryFunction>,
    ) -> Result<(), BiharmonicError> {
        let elements = self.mesh.boundary_elements(boundary)?.to_vec();
        for element in elements {
            let flux_element = FluxElement::new(&self.mesh, element, boundary, flux0.clone(), flux1.clone())?;
            self.flux_elements.push(flux_element);
        }
        debug!(
            "Boundary {}: {} flux elements in total",
            boundary,
            self.flux_elements.len()
        );
        Ok(())
    }

    /// A preconditioner that classifies unknowns with the bulk mesh of this problem.
    pub fn preconditioner(&self) -> BiharmonicPreconditioner<'_> {
        BiharmonicPreconditioner::with_bulk_mesh(&self.mesh)
    }
}

/// A stream function formulation of Stokes flow, with the fluid boundary conditions
/// expressed on the Hermite degrees of freedom.
#[derive(Debug)]
pub struct BiharmonicFluidProblem {
    mesh: HermiteQuadMesh,
    boundary_equation_elements: Vec<BoundaryEquationElement>,
}

impl BiharmonicFluidProblem {
    pub fn new(mesh: HermiteQuadMesh) -> Self {
        Self {
            mesh,
            boundary_equation_elements: Vec::new(),
        }
    }

    pub fn mesh(&self) -> &HermiteQuadMesh {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut HermiteQuadMesh {
        &mut self.mesh
    }

    pub fn boundary_equation_elements(&self) -> &[BoundaryEquationElement] {
        &self.boundary_equation_elements
    }

    pub fn impose_solid_boundary_on_edge(&mut self, boundary: usize, psi: f64) -> Result<(), BiharmonicError> {
        impose_solid_boundary_on_edge(&mut self.mesh, boundary, psi)
    }

    pub fn impose_traction_free_edge(&mut self, boundary: usize) -> Result<(), BiharmonicError> {
        let elements = impose_traction_free_edge(&mut self.mesh, boundary)?;
        self.boundary_equation_elements.extend(elements);
        Ok(())
    }

    pub fn impose_fluid_flow_on_edge(
        &mut self,
        boundary: usize,
        u_imposed_fn: &dyn Fn(f64) -> Vector2<f64>,
    ) -> Result<(), BiharmonicError> {
        impose_fluid_flow_on_edge(&mut self.mesh, boundary, u_imposed_fn)
    }

    /// Adds the contributions of all boundary equation elements to the global residual and
    /// Jacobian.
    pub fn assemble_boundary_equations(&self, residual: &mut DVector<f64>, jacobian: &mut CooMatrix<f64>) {
        for element in &self.boundary_equation_elements {
            element.assemble_residual(&self.mesh, residual);
            element.assemble_jacobian(&self.mesh, jacobian);
        }
    }

    pub fn preconditioner(&self) -> BiharmonicPreconditioner<'_> {
        BiharmonicPreconditioner::with_bulk_mesh(&self.mesh)
    }
}
