use fenris_biharmonic::mesh::procedural::{create_parallelogram_hermite_quad_mesh, create_unit_square_hermite_quad_mesh};
use fenris_biharmonic::mesh::{slot, DofTypeMesh, NUM_SLOTS};
use fenris_biharmonic::preconditioner::PreconditionerType;
use fenris_biharmonic::problem::{
    solve_preconditioned, BiharmonicFluidProblem, BiharmonicProblem, KrylovMethod, KrylovSettings,
};
use nalgebra::{DVector, Vector2};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::sync::Arc;
use util::synthetic_spd_matrix;

fn relative_residual(matrix: &CsrMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (b - matrix * x).norm() / b.norm()
}

#[test]
fn krylov_settings_deserialize_with_defaults() {
    let settings: KrylovSettings = serde_json::from_str(r#"{ "restart": 10 }"#).unwrap();
    assert_eq!(settings.restart, 10);
    assert_eq!(settings.tolerance, KrylovSettings::default().tolerance);
    assert_eq!(settings.max_iterations, KrylovSettings::default().max_iterations);
    assert_eq!(settings.method, KrylovMethod::Gmres);

    let settings: KrylovSettings = serde_json::from_str(r#"{ "method": "ConjugateGradient" }"#).unwrap();
    assert_eq!(settings.method, KrylovMethod::ConjugateGradient);
    assert_eq!(settings.restart, KrylovSettings::default().restart);
}

#[test]
fn clamped_plate_problem_solves_with_every_preconditioner() {
    let mut problem = BiharmonicProblem::new(create_unit_square_hermite_quad_mesh(4));
    let zero = |_: f64| 0.0;
    for boundary in 0..4 {
        problem
            .set_dirichlet_boundary_condition(boundary, Some(&zero), Some(&zero))
            .unwrap();
    }
    // 25 nodes, 16 on the boundary with all four slots pinned
    assert_eq!(problem.mesh().num_unknowns(), 9 * NUM_SLOTS);

    let matrix = synthetic_spd_matrix(problem.mesh().num_unknowns());
    let rhs = DVector::from_fn(matrix.nrows(), |i, _| 1.0 + (i % 5) as f64);
    let settings = KrylovSettings::default();

    for preconditioner_type in PreconditionerType::ALL {
        if !preconditioner_type.is_available() {
            continue;
        }
        let mut preconditioner = problem.preconditioner();
        preconditioner.set_preconditioner_type(preconditioner_type).unwrap();
        let x = solve_preconditioned(&matrix, &rhs, &mut preconditioner, &settings).unwrap();
        assert!(relative_residual(&matrix, &x, &rhs) <= 1e-7, "{}", preconditioner_type);
    }
}

#[test]
fn clamped_plate_problem_solves_with_conjugate_gradients() {
    let mut problem = BiharmonicProblem::new(create_unit_square_hermite_quad_mesh(5));
    let zero = |_: f64| 0.0;
    for boundary in 0..4 {
        problem
            .set_dirichlet_boundary_condition(boundary, Some(&zero), Some(&zero))
            .unwrap();
    }

    let matrix = synthetic_spd_matrix(problem.mesh().num_unknowns());
    let rhs = DVector::from_fn(matrix.nrows(), |i, _| (i as f64).cos());
    let settings = KrylovSettings {
        method: KrylovMethod::ConjugateGradient,
        ..KrylovSettings::default()
    };

    // Without hijacked unknowns the block diagonal type solves with the full SPD matrix
    let mut preconditioner = problem.preconditioner();
    preconditioner
        .set_preconditioner_type(PreconditionerType::BlockDiagonal)
        .unwrap();
    let x = solve_preconditioned(&matrix, &rhs, &mut preconditioner, &settings).unwrap();
    assert!(relative_residual(&matrix, &x, &rhs) <= 1e-7);
}

#[test]
fn neumann_boundary_attaches_flux_elements() {
    let mut problem = BiharmonicProblem::new(create_unit_square_hermite_quad_mesh(3));
    problem
        .set_neumann_boundary_condition(1, Arc::new(|m: f64| m), None)
        .unwrap();
    problem
        .set_neumann_boundary_condition(2, Arc::new(|_: f64| 1.0), Some(Arc::new(|_: f64| -1.0)))
        .unwrap();
    assert!(problem
        .set_neumann_boundary_condition(5, Arc::new(|_: f64| 1.0), None)
        .is_err());

    let flux_elements = problem.flux_elements();
    assert_eq!(flux_elements.len(), 6);
    assert!(flux_elements[..3].iter().all(|e| e.boundary() == 1));
    assert_eq!(flux_elements[5].flux1(0.0), -1.0);
    // Neumann data is natural, nothing is pinned
    assert_eq!(problem.mesh().num_unknowns(), 16 * NUM_SLOTS);
}

#[test]
fn driven_cavity_with_traction_free_outflow() {
    let mesh = create_parallelogram_hermite_quad_mesh(
        &Vector2::zeros(),
        &Vector2::new(1.0, 0.0),
        &Vector2::new(0.25, 1.0),
        4,
        4,
    );
    let mut problem = BiharmonicFluidProblem::new(mesh);
    problem.impose_solid_boundary_on_edge(0, 0.0).unwrap();
    problem
        .impose_fluid_flow_on_edge(2, &|m: f64| Vector2::new(1.0 - m * m, 0.0))
        .unwrap();
    problem.impose_traction_free_edge(1).unwrap();
    problem.impose_solid_boundary_on_edge(3, 0.0).unwrap();

    // Every node on the sheared edge gets an element, but the normal derivatives of its end
    // nodes are already pinned by the bottom wall and the lid
    assert_eq!(problem.boundary_equation_elements().len(), 5);
    let n = problem.mesh().num_unknowns();

    let mut residual = DVector::zeros(n);
    let mut jacobian = CooMatrix::new(n, n);
    problem.assemble_boundary_equations(&mut residual, &mut jacobian);
    let boundary_rows: Vec<_> = problem
        .boundary_equation_elements()
        .iter()
        .filter_map(|e| problem.mesh().node(e.node()).equation(slot::DS0))
        .collect();
    assert_eq!(boundary_rows.len(), 3);
    assert_eq!(jacobian.nnz(), 2 * boundary_rows.len());

    let matrix = synthetic_spd_matrix(n);
    let rhs = DVector::from_fn(n, |i, _| ((i % 3) as f64) - 1.0);
    let settings = KrylovSettings {
        tolerance: 1e-10,
        ..KrylovSettings::default()
    };
    let mut preconditioner = problem.preconditioner();
    preconditioner
        .set_preconditioner_type(PreconditionerType::InexactBbdDirect)
        .unwrap();
    let x = solve_preconditioned(&matrix, &rhs, &mut preconditioner, &settings).unwrap();
    assert!(relative_residual(&matrix, &x, &rhs) <= 1e-9);
}
