//! Imposition of boundary conditions on the nodal values and derivatives of Hermite meshes.
//!
//! Boundary data is given as functions of the boundary coordinate `m_0` of a node. Since
//! Hermite nodes also carry derivative unknowns, prescribing `u` (and possibly `du/dn`) on a
//! boundary fixes up to all four slots of every boundary node. The derivatives of the boundary
//! data along the boundary are approximated by finite differences with step [`FD_STEP`],
//! and converted to derivatives with respect to the element coordinates with the differential
//! geometry of the edge, see [`EdgeGeometry`].
use crate::element::BoundaryEquationElement;
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use crate::mesh::{slot, FaceIndex, HermiteNode, HermiteQuadMesh, NUM_SLOTS};
use log::debug;
use nalgebra::Vector2;

/// Finite difference step in the boundary coordinate.
pub const FD_STEP: f64 = 1e-7;

/// Relations between the local element coordinates at a boundary node and the unit normal
/// and tangent directions `n`, `t` of the boundary.
///
/// Here `s_n` is the element coordinate that is fixed along the edge and `s_t` the one that
/// runs along it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeGeometry {
    pub s_fixed_index: usize,
    pub edge_sign: f64,
    pub dnds_n: f64,
    pub dtds_n: f64,
    pub dtds_t: f64,
    pub ds_ndn: f64,
    pub ds_tdt: f64,
    pub d2tds_nds_t: f64,
    pub d2s_tds_ndt: f64,
    /// `t_0 n_1 - n_0 t_1` for `n = dx/ds_n` and `t = dx/ds_t`.
    pub cross: f64,
}

impl EdgeGeometry {
    pub fn at_node(node: &HermiteNode, face: FaceIndex) -> Self {
        let s_fixed_index = face.s_fixed_index();
        let edge_sign = face.edge_sign();
        let dxds_n = node.x_gen(1 + s_fixed_index);
        let dxds_t = node.x_gen(2 - s_fixed_index);
        let d2xds_nds_t = node.x_gen(3);
        let t_norm = dxds_t.norm();
        let cross = dxds_t[0] * dxds_n[1] - dxds_n[0] * dxds_t[1];
        let t_dot_d2x = dxds_t.dot(d2xds_nds_t);

        Self {
            s_fixed_index,
            edge_sign,
            dnds_n: (dxds_n[0] * dxds_t[1] - dxds_n[1] * dxds_t[0]) / (t_norm * edge_sign),
            dtds_n: dxds_n.dot(dxds_t) / t_norm,
            dtds_t: t_norm,
            ds_ndn: -(edge_sign * t_norm) / cross,
            ds_tdt: 1.0 / t_norm,
            d2tds_nds_t: t_dot_d2x / t_norm,
            d2s_tds_ndt: t_dot_d2x / t_norm.powi(3),
            cross,
        }
    }

    /// The slot holding `du/ds_n`.
    pub fn normal_slot(&self) -> usize {
        1 + self.s_fixed_index
    }

    /// The slot holding `du/ds_t`.
    pub fn tangential_slot(&self) -> usize {
        2 - self.s_fixed_index
    }
}

/// Evaluation points `(left, right)` of the first-order difference at node `n` of `n_node`:
/// one-sided at the ends of the boundary, centred otherwise.
fn first_difference_points(n: usize, n_node: usize, m: f64) -> (f64, f64) {
    let h = FD_STEP;
    if n == 0 {
        (m, m + h)
    } else if n == n_node - 1 {
        (m - h, m)
    } else {
        (m - 0.5 * h, m + 0.5 * h)
    }
}

fn boundary_coordinates(mesh: &HermiteQuadMesh, node: usize, boundary: usize) -> Vector2<f64> {
    *mesh
        .node(node)
        .boundary_coordinates(boundary)
        .expect("Boundary nodes always carry coordinates on their boundary")
}

fn boundary_nodes_and_face(
    mesh: &HermiteQuadMesh,
    boundary: usize,
) -> Result<(Vec<usize>, FaceIndex), BiharmonicError> {
    Ok((mesh.boundary_nodes(boundary)?.to_vec(), FaceIndex::from_boundary(boundary)?))
}

/// Pins the value and derivative slots of every node on the boundary such that they are
/// consistent with the prescribed value `u_fn` and, optionally, normal derivative `dudn_fn`.
///
/// The value pass sets `u` and `du/ds_t`. The normal derivative pass additionally sets
/// `du/ds_n` and `d^2u/ds_n ds_t`, using second differences of `u_fn` and first differences
/// of `dudn_fn`. Prescribing `dudn_fn` without `u_fn` is an error.
pub fn impose_dirichlet_on_boundary(
    mesh: &mut HermiteQuadMesh,
    boundary: usize,
    u_fn: Option<&dyn Fn(f64) -> f64>,
    dudn_fn: Option<&dyn Fn(f64) -> f64>,
) -> Result<(), BiharmonicError> {
    let (nodes, face) = boundary_nodes_and_face(mesh, boundary)?;
    let u_fn = match (u_fn, dudn_fn) {
        (Some(u_fn), _) => u_fn,
        (None, Some(_)) => {
            return Err(BiharmonicError::new(
                BiharmonicErrorKind::MissingValueFunction,
                "impose_dirichlet_on_boundary",
            ))
        }
        (None, None) => return Ok(()),
    };

    let h = FD_STEP;
    let n_node = nodes.len();
    let s_fixed_index = face.s_fixed_index();

    for (n, &node_index) in nodes.iter().enumerate() {
        let m = boundary_coordinates(mesh, node_index, boundary);
        let (left, right) = first_difference_points(n, n_node, m[0]);
        let dudm_t = (u_fn(right) - u_fn(left)) / h;
        let duds_t = m[1] * dudm_t;

        let node = mesh.node_mut(node_index);
        node.pin_and_set(slot::VALUE, u_fn(m[0]));
        node.pin_and_set(2 - s_fixed_index, duds_t);
    }

    let Some(dudn_fn) = dudn_fn else {
        mesh.assign_equation_numbers();
        debug!("Imposed Dirichlet values on {} nodes of boundary {}", n_node, boundary);
        return Ok(());
    };

    for (n, &node_index) in nodes.iter().enumerate() {
        let geometry = EdgeGeometry::at_node(mesh.node(node_index), face);
        let coordinates = boundary_coordinates(mesh, node_index, boundary);
        let (m, m_1) = (coordinates[0], coordinates[1]);
        let node_value = mesh.node(node_index).value(slot::VALUE);

        // Second difference of u and first difference of du/dn along the boundary
        let (u_2l, u_n, u_2r, dudn_l, dudn_r) = if n == 0 {
            (u_fn(m), u_fn(m + h), u_fn(m - 2.0 * h), dudn_fn(m), dudn_fn(m + h))
        } else if n == n_node - 1 {
            (u_fn(m - 2.0 * h), u_fn(m - h), u_fn(m), dudn_fn(m - h), dudn_fn(m))
        } else {
            (
                u_fn(m - h),
                node_value,
                u_fn(m + h),
                dudn_fn(m - 0.5 * h),
                dudn_fn(m + 0.5 * h),
            )
        };
        let d2udm_t2 = (u_2l + u_2r - 2.0 * u_n) / (h * h);
        let ddm_tdudn = (dudn_r - dudn_l) / h;
        let dudn = dudn_fn(m);

        let EdgeGeometry {
            edge_sign,
            dnds_n,
            dtds_n,
            dtds_t,
            ds_ndn,
            ds_tdt,
            d2tds_nds_t,
            d2s_tds_ndt,
            cross,
            ..
        } = geometry;

        let d2uds_t2 = m_1 * m_1 * d2udm_t2;
        let duds_t = mesh.node(node_index).value(geometry.tangential_slot());
        let dudt = ds_tdt * duds_t;
        // d^2u/dn dt = (ds_t/dt) m_1 d(du/dn)/dm_t, with ds_t/dt left unchanged for the terms
        // below. Stencils that instead assign (dt/ds_t) m_1 d(du/dn)/dm_t to both d^2u/dn dt and
        // ds_t/dt produce different mixed derivatives whenever du/dn varies along the boundary,
        // so results are not bit-compatible with reference solutions computed that way.
        let d2udndt = ds_tdt * m_1 * ddm_tdudn;
        let dtds_nd2udt2 =
            edge_sign * cross * (ds_tdt * (d2udndt - ds_ndn * (d2s_tds_ndt * dudt + ds_tdt * d2uds_t2)));
        let dds_ndudt = dtds_nd2udt2 + dnds_n * d2udndt;
        let duds_n = dnds_n * dudn + dtds_n * ds_tdt * duds_t;
        let d2uds_nds_t = d2tds_nds_t * dudt + dtds_t * dds_ndudt;

        let node = mesh.node_mut(node_index);
        node.pin_and_set(geometry.normal_slot(), duds_n);
        node.pin_and_set(slot::D2S0S1, d2uds_nds_t);
    }

    mesh.assign_equation_numbers();
    debug!(
        "Imposed Dirichlet values and normal derivatives on {} nodes of boundary {}",
        n_node, boundary
    );
    Ok(())
}

/// Pins all slots of the boundary nodes for a no-slip wall with stream function value `psi`.
pub fn impose_solid_boundary_on_edge(
    mesh: &mut HermiteQuadMesh,
    boundary: usize,
    psi: f64,
) -> Result<(), BiharmonicError> {
    let nodes = mesh.boundary_nodes(boundary)?.to_vec();
    for node_index in nodes {
        let node = mesh.node_mut(node_index);
        node.pin_and_set(slot::VALUE, psi);
        for k in 1..NUM_SLOTS {
            node.pin_and_set(k, 0.0);
        }
    }
    mesh.assign_equation_numbers();
    Ok(())
}

/// Prescribes a flow through the boundary for the stream function.
///
/// `u_imposed_fn` returns the imposed velocity at a boundary coordinate as the pair
/// (tangential, normal) component. The derivative slots `du/ds_n`, `du/ds_t` and
/// `d^2u/ds_n ds_t` of every boundary node are pinned; the value slot is left free.
pub fn impose_fluid_flow_on_edge(
    mesh: &mut HermiteQuadMesh,
    boundary: usize,
    u_imposed_fn: &dyn Fn(f64) -> Vector2<f64>,
) -> Result<(), BiharmonicError> {
    let (nodes, face) = boundary_nodes_and_face(mesh, boundary)?;
    let h = FD_STEP;
    let n_node = nodes.len();

    for (n, &node_index) in nodes.iter().enumerate() {
        let geometry = EdgeGeometry::at_node(mesh.node(node_index), face);
        let m = boundary_coordinates(mesh, node_index, boundary);

        let mut u = u_imposed_fn(m[0]);
        u[0] *= geometry.edge_sign;
        u[1] *= -geometry.edge_sign;

        let (left, right) = first_difference_points(n, n_node, m[0]);
        let (u_l, u_r) = (u_imposed_fn(left), u_imposed_fn(right));
        let ddm_tdudn = (u_r[1] - u_l[1]) / h;
        let ddm_tdudt = (u_r[0] - u_l[0]) / h;

        let duds_t = geometry.dtds_t * u[0];
        let duds_n = geometry.dnds_n * u[1] + geometry.dtds_n * u[0];
        let d2uds_nds_t = geometry.dnds_n * m[1] * ddm_tdudn
            + geometry.d2tds_nds_t * u[0]
            + geometry.dtds_n * m[1] * ddm_tdudt;

        let node = mesh.node_mut(node_index);
        node.pin_and_set(geometry.normal_slot(), duds_n);
        node.pin_and_set(geometry.tangential_slot(), duds_t);
        node.pin_and_set(slot::D2S0S1, d2uds_nds_t);
    }
    mesh.assign_equation_numbers();
    Ok(())
}

/// Local node of the boundary elements before and after boundary node `n` that coincides
/// with that node, for each of the four canonical boundaries.
const HIJACKED_LOCAL_NODE: [(usize, usize); 4] = [(1, 0), (3, 1), (3, 2), (2, 0)];

/// Imposes a traction-free edge for the stream function.
///
/// At nodes where the edge is orthogonal to the tangential element coordinate
/// (`dt/ds_n = 0`), the normal derivative slot is pinned to zero. Everywhere else, the normal
/// derivative unknown is hijacked in the adjacent boundary elements and a
/// [`BoundaryEquationElement`] is returned for each such node, which enforces
/// `du/ds_n = (dt/ds_n) (ds_t/dt) du/ds_t` instead.
pub fn impose_traction_free_edge(
    mesh: &mut HermiteQuadMesh,
    boundary: usize,
) -> Result<Vec<BoundaryEquationElement>, BiharmonicError> {
    let (nodes, face) = boundary_nodes_and_face(mesh, boundary)?;
    let elements = mesh.boundary_elements(boundary)?.to_vec();
    let (before, after) = HIJACKED_LOCAL_NODE[boundary];
    let n_node = nodes.len();

    let mut equation_elements = Vec::new();
    for (n, &node_index) in nodes.iter().enumerate() {
        let geometry = EdgeGeometry::at_node(mesh.node(node_index), face);
        let normal_slot = geometry.normal_slot();

        if geometry.dtds_n == 0.0 {
            mesh.node_mut(node_index).pin_and_set(normal_slot, 0.0);
            continue;
        }

        if n > 0 {
            mesh.element_mut(elements[n - 1]).hijack(before, normal_slot);
        }
        if n < n_node - 1 {
            mesh.element_mut(elements[n]).hijack(after, normal_slot);
        }
        equation_elements.push(BoundaryEquationElement::new(
            node_index,
            geometry.s_fixed_index,
            geometry.dtds_n,
            geometry.ds_tdt,
        ));
    }

    mesh.assign_equation_numbers();
    debug!(
        "Traction-free boundary {}: {} boundary equation elements",
        boundary,
        equation_elements.len()
    );
    Ok(equation_elements)
}
