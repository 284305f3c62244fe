use fenris_biharmonic::element::{face_type, BoundaryEquationElement, FaceType, FluxElement};
use fenris_biharmonic::error::BiharmonicErrorKind;
use fenris_biharmonic::mesh::procedural::create_unit_square_hermite_quad_mesh;
use fenris_biharmonic::mesh::{slot, DofTypeMesh, FaceIndex, HIJACKED_DOF_TYPE};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::sync::Arc;

#[test]
fn face_type_lookup() {
    assert_eq!(face_type(2, 2).unwrap(), FaceType::HermiteEdge);
    assert_eq!(face_type(1, 2).unwrap(), FaceType::Point);

    let err = face_type(3, 2).unwrap_err();
    assert_eq!(
        err.kind(),
        &BiharmonicErrorKind::UnsupportedFaceGeometry {
            dim: 3,
            nodes_per_edge: 2
        }
    );
    assert!(face_type(2, 3).is_err());
}

#[test]
fn flux_element_is_bound_to_element_edge() {
    let mesh = create_unit_square_hermite_quad_mesh(2);
    let flux = FluxElement::new(&mesh, 2, 2, Arc::new(|m: f64| 2.0 * m), None).unwrap();

    assert_eq!(flux.bulk_element(), 2);
    assert_eq!(flux.boundary(), 2);
    assert_eq!(flux.face_index(), FaceIndex::new(2).unwrap());
    assert_eq!(flux.face_type(), FaceType::HermiteEdge);
    assert_eq!(flux.edge_nodes(), &[6, 7]);
    assert_eq!(flux.flux0(0.25), 0.5);
    assert_eq!(flux.flux1(0.25), 0.0);

    let flux = FluxElement::new(&mesh, 0, 3, Arc::new(|_: f64| 1.0), Some(Arc::new(|m: f64| m - 1.0))).unwrap();
    assert_eq!(flux.edge_nodes(), &[0, 3]);
    assert_eq!(flux.flux1(3.0), 2.0);

    assert!(FluxElement::new(&mesh, 0, 7, Arc::new(|_: f64| 1.0), None).is_err());
}

#[test]
fn boundary_equation_element_residual_and_jacobian() {
    let mut mesh = create_unit_square_hermite_quad_mesh(1);
    let node = 1;
    let element = BoundaryEquationElement::new(node, 1, 0.5, 2.0);
    assert_eq!(element.normal_slot(), slot::DS1);
    assert_eq!(element.tangential_slot(), slot::DS0);
    assert_eq!(element.coupling(), 1.0);
    assert_eq!(element.dof_type(), HIJACKED_DOF_TYPE);

    mesh.node_mut(node).set_value(slot::DS0, 3.0);
    mesh.node_mut(node).set_value(slot::DS1, 5.0);
    assert_eq!(element.residual(&mesh), 2.0);

    let n = mesh.num_unknowns();
    let mut residual = DVector::zeros(n);
    let mut jacobian = CooMatrix::new(n, n);
    element.assemble_residual(&mesh, &mut residual);
    element.assemble_jacobian(&mesh, &mut jacobian);

    let eq_n = mesh.node(node).equation(slot::DS1).unwrap();
    let eq_t = mesh.node(node).equation(slot::DS0).unwrap();
    let mut expected_residual = DVector::zeros(n);
    expected_residual[eq_n] = 2.0;
    assert_eq!(residual, expected_residual);

    let mut expected_jacobian = DMatrix::zeros(n, n);
    expected_jacobian[(eq_n, eq_n)] = 1.0;
    expected_jacobian[(eq_n, eq_t)] = -1.0;
    assert_matrix_eq!(DMatrix::from(&CsrMatrix::from(&jacobian)), expected_jacobian);
}

#[test]
fn boundary_equation_element_skips_pinned_slots() {
    let mut mesh = create_unit_square_hermite_quad_mesh(1);
    let element = BoundaryEquationElement::new(0, 0, 1.0, 1.0);
    mesh.node_mut(0).pin_and_set(slot::DS0, 1.0);
    mesh.assign_equation_numbers();

    let n = mesh.num_unknowns();
    let mut residual = DVector::zeros(n);
    let mut jacobian = CooMatrix::new(n, n);
    element.assemble_residual(&mesh, &mut residual);
    element.assemble_jacobian(&mesh, &mut jacobian);
    assert!(residual.iter().all(|r| *r == 0.0));
    assert_eq!(jacobian.nnz(), 0);

    // Pinned tangential slot only drops the coupling
    let mut mesh = create_unit_square_hermite_quad_mesh(1);
    mesh.node_mut(0).pin_and_set(slot::DS1, 1.0);
    mesh.assign_equation_numbers();
    let n = mesh.num_unknowns();
    let mut jacobian = CooMatrix::new(n, n);
    element.assemble_jacobian(&mesh, &mut jacobian);
    assert_eq!(jacobian.nnz(), 1);
}
