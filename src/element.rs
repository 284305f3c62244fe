//! Auxiliary elements attached to the boundary of a Hermite quadrilateral mesh.
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use crate::mesh::{FaceIndex, HermiteQuadMesh, HIJACKED_DOF_TYPE};
use nalgebra::DVector;
use nalgebra_sparse::CooMatrix;
use std::fmt;
use std::sync::Arc;

/// A scalar function of the boundary coordinate `m_0`.
pub type BoundaryFunction = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// The geometry of an element face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceType {
    /// A two-node Hermite line element, the face of a 2D Hermite quadrilateral.
    HermiteEdge,
    /// A point, the face of a line element.
    Point,
}

/// Looks up the face geometry of an element with the given dimension and number of nodes
/// per edge.
#[track_caller]
pub fn face_type(dim: usize, nodes_per_edge: usize) -> Result<FaceType, BiharmonicError> {
    match (dim, nodes_per_edge) {
        (2, 2) => Ok(FaceType::HermiteEdge),
        (1, 2) => Ok(FaceType::Point),
        _ => Err(BiharmonicError::new(
            BiharmonicErrorKind::UnsupportedFaceGeometry { dim, nodes_per_edge },
            "face_type",
        )),
    }
}

/// Imposes Neumann data on one edge of a bulk element.
///
/// The flux element only records where it is attached and which data it imposes; its weak
/// residual is integrated by the bulk element framework.
#[derive(Clone)]
pub struct FluxElement {
    bulk_element: usize,
    boundary: usize,
    face_index: FaceIndex,
    face_type: FaceType,
    edge_nodes: [usize; 2],
    flux0: BoundaryFunction,
    flux1: Option<BoundaryFunction>,
}

impl fmt::Debug for FluxElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxElement")
            .field("bulk_element", &self.bulk_element)
            .field("boundary", &self.boundary)
            .field("face_index", &self.face_index)
            .field("face_type", &self.face_type)
            .field("edge_nodes", &self.edge_nodes)
            .field("has_flux1", &self.flux1.is_some())
            .finish()
    }
}

impl FluxElement {
    pub fn new(
        mesh: &HermiteQuadMesh,
        bulk_element: usize,
        boundary: usize,
        flux0: BoundaryFunction,
        flux1: Option<BoundaryFunction>,
    ) -> Result<Self, BiharmonicError> {
        let face_index = FaceIndex::from_boundary(boundary)?;
        let face_type = face_type(2, 2)?;
        let quad = &mesh.elements()[bulk_element];
        let [a, b] = face_index.edge_local_nodes();
        Ok(Self {
            bulk_element,
            boundary,
            face_index,
            face_type,
            edge_nodes: [quad.node(a), quad.node(b)],
            flux0,
            flux1,
        })
    }

    pub fn bulk_element(&self) -> usize {
        self.bulk_element
    }

    pub fn boundary(&self) -> usize {
        self.boundary
    }

    pub fn face_index(&self) -> FaceIndex {
        self.face_index
    }

    pub fn face_type(&self) -> FaceType {
        self.face_type
    }

    /// Global node indices on the edge, in order of increasing boundary coordinate.
    pub fn edge_nodes(&self) -> &[usize; 2] {
        &self.edge_nodes
    }

    pub fn flux0(&self, m: f64) -> f64 {
        (self.flux0)(m)
    }

    /// The second flux, which vanishes if none was prescribed.
    pub fn flux1(&self, m: f64) -> f64 {
        self.flux1.as_ref().map(|f| f(m)).unwrap_or(0.0)
    }
}

/// A point element that takes over the normal derivative unknown of a boundary node and
/// enforces `du/ds_n - (dt/ds_n) (ds_t/dt) du/ds_t = 0` in its place.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryEquationElement {
    node: usize,
    s_fixed_index: usize,
    dtds_n: f64,
    ds_tdt: f64,
}

impl BoundaryEquationElement {
    pub fn new(node: usize, s_fixed_index: usize, dtds_n: f64, ds_tdt: f64) -> Self {
        assert!(s_fixed_index < 2, "s_fixed_index must be 0 or 1");
        Self {
            node,
            s_fixed_index,
            dtds_n,
            ds_tdt,
        }
    }

    pub fn node(&self) -> usize {
        self.node
    }

    pub fn s_fixed_index(&self) -> usize {
        self.s_fixed_index
    }

    /// The slot holding `du/ds_n`.
    pub fn normal_slot(&self) -> usize {
        1 + self.s_fixed_index
    }

    /// The slot holding `du/ds_t`.
    pub fn tangential_slot(&self) -> usize {
        2 - self.s_fixed_index
    }

    /// The factor `(dt/ds_n) (ds_t/dt)` relating the two derivatives.
    pub fn coupling(&self) -> f64 {
        self.dtds_n * self.ds_tdt
    }

    /// The dof type this element reports for the unknown it owns.
    pub fn dof_type(&self) -> usize {
        HIJACKED_DOF_TYPE
    }

    pub fn residual(&self, mesh: &HermiteQuadMesh) -> f64 {
        let node = mesh.node(self.node);
        node.value(self.normal_slot()) - self.coupling() * node.value(self.tangential_slot())
    }

    /// Adds the residual to the row of the normal derivative unknown, if it is free.
    pub fn assemble_residual(&self, mesh: &HermiteQuadMesh, residual: &mut DVector<f64>) {
        if let Some(eq_n) = mesh.node(self.node).equation(self.normal_slot()) {
            residual[eq_n] += self.residual(mesh);
        }
    }

    /// Adds the Jacobian entries to the row of the normal derivative unknown, skipping
    /// pinned slots.
    pub fn assemble_jacobian(&self, mesh: &HermiteQuadMesh, jacobian: &mut CooMatrix<f64>) {
        let node = mesh.node(self.node);
        if let Some(eq_n) = node.equation(self.normal_slot()) {
            jacobian.push(eq_n, eq_n, 1.0);
            if let Some(eq_t) = node.equation(self.tangential_slot()) {
                jacobian.push(eq_n, eq_t, -self.coupling());
            }
        }
    }
}
