//! Meshes of C1 Hermite quadrilaterals.
//!
//! Every node carries four degree of freedom slots, see [`slot`]. Each slot is either pinned
//! (its value is prescribed and it is not part of the global vector of unknowns) or free, in
//! which case it has an equation number once [`HermiteQuadMesh::assign_equation_numbers`]
//! has been called.
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use itertools::izip;
use nalgebra::{DVector, Vector2};
use serde::{Deserialize, Serialize};

pub mod procedural;

/// Degree of freedom slots of a Hermite node.
pub mod slot {
    /// The value `u`.
    pub const VALUE: usize = 0;
    /// `du/ds_0`.
    pub const DS0: usize = 1;
    /// `du/ds_1`.
    pub const DS1: usize = 2;
    /// The mixed derivative `d^2u / ds_0 ds_1`.
    pub const D2S0S1: usize = 3;
}

/// Number of degree of freedom slots per node.
pub const NUM_SLOTS: usize = 4;

/// Number of boundaries of a mesh built on a single quadrilateral macro element.
pub const NUM_BOUNDARIES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HermiteNode {
    values: [f64; NUM_SLOTS],
    pinned: [bool; NUM_SLOTS],
    equations: [Option<usize>; NUM_SLOTS],
    /// `x_gen[k]` holds the position (k = 0), `dx/ds_0`, `dx/ds_1` and `d^2x/ds_0 ds_1`.
    x_gen: [Vector2<f64>; NUM_SLOTS],
    /// Coordinates `(m_0, m_1)` on each boundary the node lies on.
    boundary_coordinates: [Option<Vector2<f64>>; NUM_BOUNDARIES],
}

impl HermiteNode {
    pub fn new(x_gen: [Vector2<f64>; NUM_SLOTS]) -> Self {
        Self {
            values: [0.0; NUM_SLOTS],
            pinned: [false; NUM_SLOTS],
            equations: [None; NUM_SLOTS],
            x_gen,
            boundary_coordinates: [None; NUM_BOUNDARIES],
        }
    }

    pub fn value(&self, slot: usize) -> f64 {
        self.values[slot]
    }

    pub fn set_value(&mut self, slot: usize, value: f64) {
        self.values[slot] = value;
    }

    pub fn pin(&mut self, slot: usize) {
        self.pinned[slot] = true;
    }

    pub fn unpin(&mut self, slot: usize) {
        self.pinned[slot] = false;
    }

    pub fn is_pinned(&self, slot: usize) -> bool {
        self.pinned[slot]
    }

    /// Pins the slot and prescribes its value.
    pub fn pin_and_set(&mut self, slot: usize, value: f64) {
        self.pin(slot);
        self.set_value(slot, value);
    }

    /// The global equation number of the slot, or `None` if it is pinned or numbering has not
    /// been assigned yet.
    pub fn equation(&self, slot: usize) -> Option<usize> {
        self.equations[slot]
    }

    pub fn x_gen(&self, k: usize) -> &Vector2<f64> {
        &self.x_gen[k]
    }

    pub fn position(&self) -> &Vector2<f64> {
        &self.x_gen[0]
    }

    pub fn boundary_coordinates(&self, boundary: usize) -> Option<&Vector2<f64>> {
        self.boundary_coordinates
            .get(boundary)
            .and_then(Option::as_ref)
    }

    pub fn set_boundary_coordinates(&mut self, boundary: usize, coordinates: Vector2<f64>) {
        self.boundary_coordinates[boundary] = Some(coordinates);
    }

    pub fn is_on_boundary(&self, boundary: usize) -> bool {
        self.boundary_coordinates(boundary).is_some()
    }
}

/// Signed face index of a quadrilateral edge.
///
/// The magnitude selects the local coordinate that is fixed on the face (1 for `s_0`, 2 for
/// `s_1`) and the sign tells whether it is fixed at -1 or +1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceIndex(i32);

impl FaceIndex {
    #[track_caller]
    pub fn new(code: i32) -> Result<Self, BiharmonicError> {
        match code {
            -2 | -1 | 1 | 2 => Ok(Self(code)),
            _ => Err(BiharmonicError::new(
                BiharmonicErrorKind::InvalidFaceIndex(code),
                "FaceIndex::new",
            )),
        }
    }

    /// Face index of the elements adjacent to one of the four canonical boundaries
    /// (0 bottom, 1 right, 2 top, 3 left).
    #[track_caller]
    pub fn from_boundary(boundary: usize) -> Result<Self, BiharmonicError> {
        match boundary {
            0 => Ok(Self(-2)),
            1 => Ok(Self(1)),
            2 => Ok(Self(2)),
            3 => Ok(Self(-1)),
            _ => Err(invalid_boundary(boundary, "FaceIndex::from_boundary")),
        }
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    /// Index of the local coordinate that is constant along the face.
    pub fn s_fixed_index(&self) -> usize {
        if self.0.abs() == 1 {
            0
        } else {
            1
        }
    }

    /// Orientation of the edge relative to the outward normal.
    pub fn edge_sign(&self) -> f64 {
        match self.0 {
            -1 | 2 => -1.0,
            _ => 1.0,
        }
    }

    /// Local nodes of the quadrilateral on this face, in order of increasing free coordinate.
    pub fn edge_local_nodes(&self) -> [usize; 2] {
        match self.0 {
            -2 => [0, 1],
            2 => [2, 3],
            -1 => [0, 2],
            _ => [1, 3],
        }
    }
}

#[track_caller]
pub(crate) fn invalid_boundary(boundary: usize, function: &'static str) -> BiharmonicError {
    BiharmonicError::new(
        BiharmonicErrorKind::InvalidBoundary {
            boundary,
            num_boundaries: NUM_BOUNDARIES,
        },
        function,
    )
}

/// A Hermite quadrilateral.
///
/// Local nodes are ordered `0: (-1, -1)`, `1: (1, -1)`, `2: (-1, 1)`, `3: (1, 1)` in reference
/// coordinates. A (local node, slot) pair can be hijacked, which hands ownership of the
/// corresponding unknown to an auxiliary equation element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HermiteQuad {
    nodes: [usize; 4],
    hijacked: [[bool; NUM_SLOTS]; 4],
}

impl HermiteQuad {
    pub fn new(nodes: [usize; 4]) -> Self {
        Self {
            nodes,
            hijacked: [[false; NUM_SLOTS]; 4],
        }
    }

    pub fn nodes(&self) -> &[usize; 4] {
        &self.nodes
    }

    pub fn node(&self, local_index: usize) -> usize {
        self.nodes[local_index]
    }

    pub fn hijack(&mut self, local_node: usize, slot: usize) {
        self.hijacked[local_node][slot] = true;
    }

    pub fn is_hijacked(&self, local_node: usize, slot: usize) -> bool {
        self.hijacked[local_node][slot]
    }

    pub fn has_hijacked_dofs(&self) -> bool {
        self.hijacked.iter().flatten().any(|h| *h)
    }
}

/// Classification of the elements a preconditioner may encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Biharmonic,
    HijackedBiharmonic,
    BoundaryEquation,
    Flux,
}

/// Dof type reported for unknowns that have been hijacked.
pub const HIJACKED_DOF_TYPE: usize = NUM_SLOTS;

/// An unknown in the local numbering of an element together with its dof type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementDof {
    pub equation: usize,
    /// The node slot of the unknown, or [`HIJACKED_DOF_TYPE`] if it has been hijacked.
    pub dof_type: usize,
}

/// The view of a mesh needed to classify its unknowns into blocks.
pub trait DofTypeMesh {
    fn num_elements(&self) -> usize;

    fn element_kind(&self, element: usize) -> ElementKind;

    /// Total number of unknowns in the global system.
    fn num_unknowns(&self) -> usize;

    /// Replaces the contents of `dofs` with the free unknowns of the given element.
    fn populate_element_dofs(&self, element: usize, dofs: &mut Vec<ElementDof>);
}

/// A mesh of Hermite quadrilaterals on a single quadrilateral macro element, with the
/// four canonical boundaries 0 (bottom), 1 (right), 2 (top) and 3 (left).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HermiteQuadMesh {
    nodes: Vec<HermiteNode>,
    elements: Vec<HermiteQuad>,
    /// Nodes on each boundary, ordered by increasing boundary coordinate.
    boundary_nodes: [Vec<usize>; NUM_BOUNDARIES],
    /// Elements adjacent to each boundary, ordered by increasing boundary coordinate.
    boundary_elements: [Vec<usize>; NUM_BOUNDARIES],
    num_unknowns: usize,
}

impl HermiteQuadMesh {
    pub fn from_parts(
        nodes: Vec<HermiteNode>,
        elements: Vec<HermiteQuad>,
        boundary_nodes: [Vec<usize>; NUM_BOUNDARIES],
        boundary_elements: [Vec<usize>; NUM_BOUNDARIES],
    ) -> Self {
        let mut mesh = Self {
            nodes,
            elements,
            boundary_nodes,
            boundary_elements,
            num_unknowns: 0,
        };
        mesh.assign_equation_numbers();
        mesh
    }

    pub fn nodes(&self) -> &[HermiteNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &HermiteNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut HermiteNode {
        &mut self.nodes[index]
    }

    pub fn elements(&self) -> &[HermiteQuad] {
        &self.elements
    }

    pub fn element_mut(&mut self, index: usize) -> &mut HermiteQuad {
        &mut self.elements[index]
    }

    pub fn num_boundaries(&self) -> usize {
        NUM_BOUNDARIES
    }

    #[track_caller]
    pub fn boundary_nodes(&self, boundary: usize) -> Result<&[usize], BiharmonicError> {
        self.boundary_nodes
            .get(boundary)
            .map(Vec::as_slice)
            .ok_or_else(|| invalid_boundary(boundary, "HermiteQuadMesh::boundary_nodes"))
    }

    #[track_caller]
    pub fn boundary_elements(&self, boundary: usize) -> Result<&[usize], BiharmonicError> {
        self.boundary_elements
            .get(boundary)
            .map(Vec::as_slice)
            .ok_or_else(|| invalid_boundary(boundary, "HermiteQuadMesh::boundary_elements"))
    }

    /// Numbers all free slots consecutively, node by node, and returns the number of unknowns.
    ///
    /// Must be called again whenever slots are pinned or unpinned.
    pub fn assign_equation_numbers(&mut self) -> usize {
        let mut next = 0;
        for node in &mut self.nodes {
            for k in 0..NUM_SLOTS {
                node.equations[k] = if node.pinned[k] {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                };
            }
        }
        self.num_unknowns = next;
        next
    }

    /// The values of all free slots, indexed by equation number.
    pub fn gather_unknowns(&self) -> DVector<f64> {
        let mut x = DVector::zeros(self.num_unknowns);
        for node in &self.nodes {
            for (equation, &value) in izip!(&node.equations, &node.values) {
                if let Some(eq) = *equation {
                    x[eq] = value;
                }
            }
        }
        x
    }

    /// Writes a vector of unknowns, indexed by equation number, back to the nodes.
    pub fn scatter_unknowns(&mut self, x: &DVector<f64>) {
        assert_eq!(x.len(), self.num_unknowns, "Vector length must match number of unknowns");
        for node in &mut self.nodes {
            for (equation, value) in izip!(&node.equations, &mut node.values) {
                if let Some(eq) = *equation {
                    *value = x[eq];
                }
            }
        }
    }
}

impl DofTypeMesh for HermiteQuadMesh {
    fn num_elements(&self) -> usize {
        self.elements.len()
    }

    fn element_kind(&self, element: usize) -> ElementKind {
        if self.elements[element].has_hijacked_dofs() {
            ElementKind::HijackedBiharmonic
        } else {
            ElementKind::Biharmonic
        }
    }

    fn num_unknowns(&self) -> usize {
        self.num_unknowns
    }

    fn populate_element_dofs(&self, element: usize, dofs: &mut Vec<ElementDof>) {
        dofs.clear();
        let quad = &self.elements[element];
        for (local_node, &node_index) in quad.nodes.iter().enumerate() {
            let node = &self.nodes[node_index];
            for k in 0..NUM_SLOTS {
                if let Some(equation) = node.equations[k] {
                    let dof_type = if quad.is_hijacked(local_node, k) {
                        HIJACKED_DOF_TYPE
                    } else {
                        k
                    };
                    dofs.push(ElementDof { equation, dof_type });
                }
            }
        }
    }
}
