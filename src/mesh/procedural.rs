//! Basic procedural mesh generation routines.
use crate::mesh::{HermiteNode, HermiteQuad, HermiteQuadMesh, NUM_BOUNDARIES};
use nalgebra::Vector2;

pub fn create_unit_square_hermite_quad_mesh(cells_per_dim: usize) -> HermiteQuadMesh {
    create_rectangular_hermite_quad_mesh(1.0, 1.0, cells_per_dim, cells_per_dim)
}

/// Generates an axis-aligned rectangle `[0, width] x [0, height]` divided into
/// `nx x ny` Hermite quadrilaterals.
pub fn create_rectangular_hermite_quad_mesh(width: f64, height: f64, nx: usize, ny: usize) -> HermiteQuadMesh {
    create_parallelogram_hermite_quad_mesh(
        &Vector2::zeros(),
        &Vector2::new(width, 0.0),
        &Vector2::new(0.0, height),
        nx,
        ny,
    )
}

/// Generates a parallelogram spanned by the edge vectors `e0` and `e1` from `origin`, divided
/// into `nx x ny` Hermite quadrilaterals.
///
/// Node `(i, j)` sits at `origin + (i / nx) e0 + (j / ny) e1`. Its generalized positions are the
/// derivatives of the element map, `dx/ds_0 = e0 / (2 nx)` and `dx/ds_1 = e1 / (2 ny)`, with a
/// vanishing mixed derivative.
///
/// Boundaries are numbered 0 (along `e0` through the origin), 1 (opposite boundary 3),
/// 2 (opposite boundary 0) and 3 (along `e1` through the origin). The boundary coordinate
/// `m_0` of a node runs from -1 to 1 along the boundary and `m_1 = dm_0/ds` is the scale
/// between boundary and element coordinates.
pub fn create_parallelogram_hermite_quad_mesh(
    origin: &Vector2<f64>,
    e0: &Vector2<f64>,
    e1: &Vector2<f64>,
    nx: usize,
    ny: usize,
) -> HermiteQuadMesh {
    if nx == 0 || ny == 0 {
        return HermiteQuadMesh::from_parts(Vec::new(), Vec::new(), Default::default(), Default::default());
    }

    let (nx_f, ny_f) = (nx as f64, ny as f64);
    let node_index = |i: usize, j: usize| j * (nx + 1) + i;
    let dxds0 = e0 / (2.0 * nx_f);
    let dxds1 = e1 / (2.0 * ny_f);

    let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1));
    let mut boundary_nodes: [Vec<usize>; NUM_BOUNDARIES] = Default::default();
    for j in 0..=ny {
        for i in 0..=nx {
            let (i_f, j_f) = (i as f64, j as f64);
            let x = origin + e0 * (i_f / nx_f) + e1 * (j_f / ny_f);
            let mut node = HermiteNode::new([x, dxds0, dxds1, Vector2::zeros()]);

            let along_e0 = Vector2::new(-1.0 + 2.0 * i_f / nx_f, 1.0 / nx_f);
            let along_e1 = Vector2::new(-1.0 + 2.0 * j_f / ny_f, 1.0 / ny_f);
            if j == 0 {
                node.set_boundary_coordinates(0, along_e0);
            }
            if i == nx {
                node.set_boundary_coordinates(1, along_e1);
            }
            if j == ny {
                node.set_boundary_coordinates(2, along_e0);
            }
            if i == 0 {
                node.set_boundary_coordinates(3, along_e1);
            }
            nodes.push(node);
        }
    }

    for i in 0..=nx {
        boundary_nodes[0].push(node_index(i, 0));
        boundary_nodes[2].push(node_index(i, ny));
    }
    for j in 0..=ny {
        boundary_nodes[1].push(node_index(nx, j));
        boundary_nodes[3].push(node_index(0, j));
    }

    let element_index = |i: usize, j: usize| j * nx + i;
    let mut elements = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            elements.push(HermiteQuad::new([
                node_index(i, j),
                node_index(i + 1, j),
                node_index(i, j + 1),
                node_index(i + 1, j + 1),
            ]));
        }
    }

    let mut boundary_elements: [Vec<usize>; NUM_BOUNDARIES] = Default::default();
    for i in 0..nx {
        boundary_elements[0].push(element_index(i, 0));
        boundary_elements[2].push(element_index(i, ny - 1));
    }
    for j in 0..ny {
        boundary_elements[1].push(element_index(nx - 1, j));
        boundary_elements[3].push(element_index(0, j));
    }

    HermiteQuadMesh::from_parts(nodes, elements, boundary_nodes, boundary_elements)
}
