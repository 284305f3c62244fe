use crate::MockMesh;
use fenris_biharmonic::block::BlockDecomposition;
use fenris_biharmonic::boundary::impose_traction_free_edge;
use fenris_biharmonic::error::BiharmonicErrorKind;
use fenris_biharmonic::mesh::procedural::{create_parallelogram_hermite_quad_mesh, create_unit_square_hermite_quad_mesh};
use fenris_biharmonic::mesh::{DofTypeMesh, ElementKind, HermiteQuadMesh};
use fenris_biharmonic::preconditioner::{
    BiharmonicPreconditioner, ExactBlockPreconditioner, InexactBlockPreconditioner, InexactStage, PreconditionerType,
};
use fenris_sparse::amg::AmgSettings;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, Vector2};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use proptest::prelude::*;
use util::{synthetic_spd_matrix, weighted_graph_laplacian};

fn sheared_mesh_with_hijacked_edge() -> HermiteQuadMesh {
    let mut mesh = create_parallelogram_hermite_quad_mesh(
        &Vector2::zeros(),
        &Vector2::new(1.0, 0.0),
        &Vector2::new(0.5, 1.0),
        3,
        3,
    );
    impose_traction_free_edge(&mut mesh, 0).unwrap();
    mesh
}

/// Keeps the entries `(i, j)` of the matrix for which `keep(i, j)` holds.
fn filter_matrix(matrix: &CsrMatrix<f64>, keep: impl Fn(usize, usize) -> bool) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(matrix.nrows(), matrix.ncols());
    for (i, j, &v) in matrix.triplet_iter() {
        if keep(i, j) {
            coo.push(i, j, v);
        }
    }
    CsrMatrix::from(&coo)
}

fn apply(preconditioner: &BiharmonicPreconditioner, r: &DVector<f64>) -> DVector<f64> {
    let mut z = DVector::repeat(r.len(), f64::NAN);
    preconditioner
        .preconditioner_solve(r.into(), (&mut z).into())
        .unwrap();
    z
}

fn test_vector(n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| ((i * 7 + 3) % 13) as f64 - 6.0)
}

#[test]
fn preconditioner_type_selection() {
    assert_eq!(PreconditionerType::try_from(0).unwrap(), PreconditionerType::ExactBbd);
    assert_eq!(PreconditionerType::try_from(3).unwrap(), PreconditionerType::BlockDiagonal);

    let err = PreconditionerType::try_from(4).unwrap_err();
    assert_eq!(err.kind(), &BiharmonicErrorKind::InvalidPreconditionerType(4));

    let mut preconditioner = BiharmonicPreconditioner::new();
    assert!(preconditioner.set_preconditioner_type_index(7).is_err());
    preconditioner.set_preconditioner_type_index(1).unwrap();
    assert_eq!(preconditioner.preconditioner_type(), PreconditionerType::InexactBbdDirect);

    if cfg!(feature = "amg") {
        assert_eq!(PreconditionerType::default(), PreconditionerType::InexactBbdAmg);
        assert!(PreconditionerType::ALL.iter().all(PreconditionerType::is_available));
    } else {
        assert_eq!(PreconditionerType::default(), PreconditionerType::InexactBbdDirect);
        let err = preconditioner
            .set_preconditioner_type(PreconditionerType::InexactBbdAmg)
            .unwrap_err();
        assert_eq!(err.kind(), &BiharmonicErrorKind::AmgUnavailable);
    }
}

#[test]
fn preconditioner_type_serialization() {
    let json = serde_json::to_string(&PreconditionerType::BlockDiagonal).unwrap();
    assert_eq!(json, "\"BlockDiagonal\"");
    let parsed: PreconditionerType = serde_json::from_str("\"ExactBbd\"").unwrap();
    assert_eq!(parsed, PreconditionerType::ExactBbd);
}

#[test]
fn setup_without_mesh_is_fatal() {
    let mut preconditioner = BiharmonicPreconditioner::new();
    let err = preconditioner.setup(&synthetic_spd_matrix(4)).unwrap_err();
    assert_eq!(err.kind(), &BiharmonicErrorKind::MissingBulkMesh);
    assert_eq!(err.function(), "BiharmonicPreconditioner::setup");
    assert!(err.location().file().ends_with("preconditioner.rs"));
    assert!(!preconditioner.is_set_up());
}

#[test]
fn setup_rejects_unsupported_elements() {
    let mesh = MockMesh::new(1).with_element(ElementKind::BoundaryEquation, &[(0, 4)]);
    let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
    let err = preconditioner.setup(&synthetic_spd_matrix(1)).unwrap_err();
    assert!(matches!(err.kind(), BiharmonicErrorKind::UnsupportedElement { element: 0, .. }));
}

#[test]
fn solve_before_setup_is_rejected() {
    let mesh = create_unit_square_hermite_quad_mesh(1);
    let preconditioner = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
    let r = DVector::zeros(16);
    let mut z = DVector::zeros(16);
    let err = preconditioner
        .preconditioner_solve((&r).into(), (&mut z).into())
        .unwrap_err();
    assert_eq!(err.kind(), &BiharmonicErrorKind::NotSetUp);
}

#[test]
fn clean_up_is_idempotent_and_setup_can_be_repeated() {
    let mesh = create_unit_square_hermite_quad_mesh(2);
    let matrix = synthetic_spd_matrix(mesh.num_unknowns());
    let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(&mesh);

    preconditioner.clean_up_memory();
    preconditioner.setup(&matrix).unwrap();
    let first = apply(&preconditioner, &test_vector(matrix.nrows()));
    preconditioner.setup(&matrix).unwrap();
    let second = apply(&preconditioner, &test_vector(matrix.nrows()));
    assert_eq!(first, second);

    preconditioner.clean_up_memory();
    preconditioner.clean_up_memory();
    assert!(!preconditioner.is_set_up());
}

#[test]
fn every_type_maps_zero_residual_to_zero_correction() {
    let meshes = [create_unit_square_hermite_quad_mesh(4), sheared_mesh_with_hijacked_edge()];
    for mesh in &meshes {
        let matrix = synthetic_spd_matrix(mesh.num_unknowns());
        for preconditioner_type in PreconditionerType::ALL {
            if !preconditioner_type.is_available() {
                continue;
            }
            let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(mesh);
            preconditioner.set_preconditioner_type(preconditioner_type).unwrap();
            preconditioner.setup(&matrix).unwrap();

            let z = apply(&preconditioner, &DVector::zeros(matrix.nrows()));
            assert!(z.iter().all(|z_i| *z_i == 0.0), "{}", preconditioner_type);
        }
    }
}

#[test]
fn block_diagonal_type_on_identity_returns_residual() {
    let meshes = [create_unit_square_hermite_quad_mesh(2), sheared_mesh_with_hijacked_edge()];
    for mesh in &meshes {
        let n = mesh.num_unknowns();
        let identity = CsrMatrix::identity(n);
        let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(mesh);
        preconditioner
            .set_preconditioner_type(PreconditionerType::BlockDiagonal)
            .unwrap();
        preconditioner.setup(&identity).unwrap();

        let r = test_vector(n);
        assert_matrix_eq!(apply(&preconditioner, &r), r, comp = abs, tol = 1e-14);
    }
}

#[test]
fn block_diagonal_type_inverts_matrix_without_hijacked_unknowns() {
    let mesh = create_unit_square_hermite_quad_mesh(3);
    let matrix = synthetic_spd_matrix(mesh.num_unknowns());
    let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
    preconditioner
        .set_preconditioner_type(PreconditionerType::BlockDiagonal)
        .unwrap();
    preconditioner.setup(&matrix).unwrap();

    let x = test_vector(matrix.nrows());
    let z = apply(&preconditioner, &(&matrix * &x));
    assert_matrix_eq!(z, x, comp = abs, tol = 1e-10);
}

#[test]
fn exact_bbd_type_inverts_bordered_diagonal_matrix() {
    let mesh = sheared_mesh_with_hijacked_edge();
    let decomposition = BlockDecomposition::from_mesh(&mesh).unwrap();
    let block = |i: usize| decomposition.block_of(i).unwrap().0;
    // Arrow structure on the bulk blocks, hijacked block decoupled from everything else
    let matrix = filter_matrix(&synthetic_spd_matrix(mesh.num_unknowns()), |i, j| {
        let (bi, bj) = (block(i), block(j));
        if bi == 3 || bj == 3 {
            bi == bj
        } else {
            bi == bj || bi == 0 || bj == 0
        }
    });

    let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
    preconditioner
        .set_preconditioner_type(PreconditionerType::ExactBbd)
        .unwrap();
    preconditioner.setup(&matrix).unwrap();

    let x = test_vector(matrix.nrows());
    let z = apply(&preconditioner, &(&matrix * &x));
    assert_matrix_eq!(z, x, comp = abs, tol = 1e-10);
}

/// A matrix whose block 0 is coupled to nothing and whose other blocks are diagonal.
fn decoupled_matrix(mesh: &HermiteQuadMesh) -> CsrMatrix<f64> {
    let decomposition = BlockDecomposition::from_mesh(mesh).unwrap();
    let block = |i: usize| decomposition.block_of(i).unwrap().0;
    filter_matrix(&synthetic_spd_matrix(mesh.num_unknowns()), |i, j| {
        i == j || (block(i) == 0 && block(j) == 0)
    })
}

#[test]
fn exact_and_inexact_agree_without_coupling() {
    let mesh = create_unit_square_hermite_quad_mesh(4);
    let matrix = decoupled_matrix(&mesh);
    let r = test_vector(matrix.nrows());

    let mut exact = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
    exact.set_preconditioner_type(PreconditionerType::ExactBbd).unwrap();
    exact.setup(&matrix).unwrap();

    let mut inexact = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
    inexact
        .set_preconditioner_type(PreconditionerType::InexactBbdDirect)
        .unwrap();
    inexact.setup(&matrix).unwrap();

    assert_matrix_eq!(apply(&exact, &r), apply(&inexact, &r), comp = abs, tol = 1e-12);
}

#[test]
fn inexact_block_zero_is_exact_without_coupling() {
    let mesh = create_unit_square_hermite_quad_mesh(3);
    let decomposition = BlockDecomposition::from_mesh(&mesh).unwrap();
    let block = |i: usize| decomposition.block_of(i).unwrap().0;
    // Blocks 1 and 2 keep their internal couplings, so only block 0 is exact
    let matrix = filter_matrix(&synthetic_spd_matrix(mesh.num_unknowns()), |i, j| {
        (block(i) == 0) == (block(j) == 0)
    });

    let mut inexact = InexactBlockPreconditioner::new(false);
    inexact.setup(decomposition.clone(), &matrix).unwrap();

    let x = test_vector(matrix.nrows());
    let r = &matrix * &x;
    let mut z = DVector::zeros(r.len());
    inexact.solve((&r).into(), (&mut z).into()).unwrap();

    let x0 = decomposition.gather_block((&x).into(), 0);
    let z0 = decomposition.gather_block((&z).into(), 0);
    assert_matrix_eq!(z0, x0, comp = abs, tol = 1e-10);
}

#[test]
fn inexact_stages() {
    let mesh = create_unit_square_hermite_quad_mesh(2);
    let decomposition = BlockDecomposition::from_mesh(&mesh).unwrap();
    let matrix = synthetic_spd_matrix(mesh.num_unknowns());

    let mut inexact = InexactBlockPreconditioner::new(true).with_amg_settings(AmgSettings::default());
    assert!(inexact.uses_amg());
    assert_eq!(inexact.stage(), InexactStage::Uninitialized);
    inexact.setup(decomposition, &matrix).unwrap();
    assert_eq!(inexact.stage(), InexactStage::Factorized);
    inexact.clean_up_memory();
    assert_eq!(inexact.stage(), InexactStage::Uninitialized);

    let r = DVector::zeros(matrix.nrows());
    let mut z = DVector::zeros(matrix.nrows());
    let err = inexact.solve((&r).into(), (&mut z).into()).unwrap_err();
    assert_eq!(err.kind(), &BiharmonicErrorKind::NotSetUp);
}

#[test]
fn inexact_setup_detects_zero_lumped_diagonal() {
    let mesh = create_unit_square_hermite_quad_mesh(1);
    let decomposition = BlockDecomposition::from_mesh(&mesh).unwrap();
    let first_of_block_2 = decomposition.block_indices(2)[0];
    let matrix = filter_matrix(&CsrMatrix::identity(mesh.num_unknowns()), |i, _| i != first_of_block_2);

    let mut inexact = InexactBlockPreconditioner::new(false);
    let err = inexact.setup(decomposition, &matrix).unwrap_err();
    assert_eq!(err.kind(), &BiharmonicErrorKind::ZeroLumpedDiagonal { block: 2, row: 0 });
    assert_eq!(inexact.stage(), InexactStage::Uninitialized);
}

#[test]
fn inexact_setup_detects_singular_schur_complement() {
    let mesh = create_unit_square_hermite_quad_mesh(1);
    let decomposition = BlockDecomposition::from_mesh(&mesh).unwrap();
    let second_of_block_0 = decomposition.block_indices(0)[1];
    let matrix = filter_matrix(&CsrMatrix::identity(mesh.num_unknowns()), |i, _| i != second_of_block_0);

    let mut inexact = InexactBlockPreconditioner::new(false);
    let err = inexact.setup(decomposition, &matrix).unwrap_err();
    assert!(matches!(err.kind(), BiharmonicErrorKind::SingularBlock { block: 0, .. }));
}

#[test]
fn inexact_setup_detects_numerically_singular_schur_complement() {
    // Block 0 is a weighted graph Laplacian: non-zero diagonal, but vanishing row sums
    let n0 = 30;
    let dof_types: Vec<usize> = (0..n0 + 8)
        .map(|i| match i {
            i if i < n0 => 0,
            i if i < n0 + 4 => 1,
            _ => 3,
        })
        .collect();
    let decomposition = BlockDecomposition::from_dof_types(&dof_types).unwrap();
    let mut dense = DMatrix::identity(n0 + 8, n0 + 8);
    dense
        .view_mut((0, 0), (n0, n0))
        .copy_from(&DMatrix::from(&weighted_graph_laplacian(n0)));
    let matrix = CsrMatrix::from(&dense);

    for use_amg in [false, true] {
        let mut inexact = InexactBlockPreconditioner::new(use_amg);
        let err = inexact.setup(decomposition.clone(), &matrix).unwrap_err();
        assert!(
            matches!(err.kind(), BiharmonicErrorKind::SingularBlock { block: 0, .. }),
            "use_amg = {}: {}",
            use_amg,
            err
        );
        assert_eq!(inexact.stage(), InexactStage::Uninitialized);
    }

    // Grounding one vertex makes the same system acceptable
    dense[(0, 0)] += 1.0;
    let matrix = CsrMatrix::from(&dense);
    for use_amg in [false, true] {
        let mut inexact = InexactBlockPreconditioner::new(use_amg);
        inexact.setup(decomposition.clone(), &matrix).unwrap();
    }
}

#[test]
fn exact_setup_detects_numerically_singular_block() {
    let decomposition = BlockDecomposition::from_dof_types(&[0; 30]).unwrap();
    let mut exact = ExactBlockPreconditioner::new();
    let err = exact
        .setup(decomposition, &weighted_graph_laplacian(30))
        .unwrap_err();
    assert!(matches!(err.kind(), BiharmonicErrorKind::SingularBlock { .. }));
    assert!(!exact.is_set_up());
}

#[test]
fn inexact_setup_skips_negative_lumped_blocks() {
    let mesh = create_unit_square_hermite_quad_mesh(1);
    let decomposition = BlockDecomposition::from_mesh(&mesh).unwrap();
    let n = mesh.num_unknowns();
    let block = |i: usize| decomposition.block_of(i).unwrap().0;
    let mut dense = DMatrix::identity(n, n);
    for i in decomposition.block_indices(1) {
        dense[(*i, *i)] = -2.0;
    }
    let matrix = CsrMatrix::from(&dense);
    assert!(matrix.triplet_iter().all(|(i, j, _)| i == j || block(i) == block(j)));

    let mut inexact = InexactBlockPreconditioner::new(false);
    inexact.setup(decomposition, &matrix).unwrap();

    let r = DVector::repeat(n, 1.0);
    let mut z = DVector::zeros(n);
    inexact.solve((&r).into(), (&mut z).into()).unwrap();
    assert_matrix_eq!(&dense * &z, r, comp = abs, tol = 1e-14);
}

#[test]
fn exact_block_preconditioner_leaves_other_entries_untouched() {
    let decomposition = BlockDecomposition::from_dof_types(&[0, 4, 1, 3, 4]).unwrap();
    let matrix = CsrMatrix::from(&DMatrix::from_diagonal(&DVector::from_column_slice(&[
        1.0, 2.0, 3.0, 4.0, 5.0,
    ])));
    let mut exact = ExactBlockPreconditioner::new();
    assert!(!exact.retain_all_blocks());
    assert!(exact.retains(0, 2) && exact.retains(1, 1) && !exact.retains(1, 2));
    exact.setup(decomposition.subsidiary(&[3]), &matrix).unwrap();

    let r = DVector::repeat(5, 10.0);
    let mut z = DVector::repeat(5, -1.0);
    exact.solve((&r).into(), (&mut z).into()).unwrap();
    assert_eq!(z.as_slice(), &[-1.0, 5.0, -1.0, -1.0, 2.0]);
}

proptest! {
    #[test]
    fn corrections_are_linear_in_residual(
        type_index in 0usize..4,
        alpha in -3.0f64..3.0,
    ) {
        let mesh = sheared_mesh_with_hijacked_edge();
        let matrix = synthetic_spd_matrix(mesh.num_unknowns());
        let mut preconditioner = BiharmonicPreconditioner::with_bulk_mesh(&mesh);
        let preconditioner_type = PreconditionerType::try_from(type_index).unwrap();
        prop_assume!(preconditioner_type.is_available());
        preconditioner.set_preconditioner_type(preconditioner_type).unwrap();
        preconditioner.setup(&matrix).unwrap();

        let r = test_vector(matrix.nrows());
        let z = apply(&preconditioner, &r);
        let z_scaled = apply(&preconditioner, &(&r * alpha));
        let diff = (z_scaled - z * alpha).amax();
        prop_assert!(diff <= 1e-9 * (1.0 + alpha.abs()), "diff = {}", diff);
    }
}
