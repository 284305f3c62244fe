//! Decomposition of the global unknowns into blocks.
//!
//! Unknowns are classified by their dof type, as reported by the elements of a
//! [`DofTypeMesh`], and every dof type maps to one block via [`BIHARMONIC_DOF_TO_BLOCK`]:
//! the values form block 0, the two first derivatives block 1, the mixed derivatives
//! block 2 and hijacked unknowns block 3. Blocks keep the global ordering of their unknowns.
use crate::error::{BiharmonicError, BiharmonicErrorKind};
use crate::mesh::{DofTypeMesh, ElementDof, ElementKind, HIJACKED_DOF_TYPE};
use fenris_sparse::ops;
use itertools::izip;
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Block of each dof type, indexed by dof type.
pub const BIHARMONIC_DOF_TO_BLOCK: [usize; 5] = [0, 1, 1, 2, 3];

/// Number of blocks formed by the bulk biharmonic unknowns.
pub const NUM_PRIMARY_BLOCKS: usize = 3;

/// Block collecting the hijacked unknowns, if there are any.
pub const HIJACKED_BLOCK: usize = 3;

/// Maps global unknowns to (block, index within block).
///
/// A decomposition may be a subsidiary of another, in which case it covers only some of the
/// parent's blocks but keeps the global numbering. Unknowns outside the covered blocks are
/// then simply not members of any block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDecomposition {
    num_unknowns: usize,
    membership: Vec<Option<(usize, usize)>>,
    blocks: Vec<Vec<usize>>,
}

/// Determines the dof type of every global unknown.
///
/// An unknown that is hijacked in any element is hijacked. Every unknown must be touched by
/// at least one element, and only (hijacked) biharmonic elements are accepted.
pub fn classify_unknowns(mesh: &dyn DofTypeMesh) -> Result<Vec<usize>, BiharmonicError> {
    let mut dof_types: Vec<Option<usize>> = vec![None; mesh.num_unknowns()];
    let mut element_dofs = Vec::new();
    for element in 0..mesh.num_elements() {
        let kind = mesh.element_kind(element);
        if !matches!(kind, ElementKind::Biharmonic | ElementKind::HijackedBiharmonic) {
            return Err(BiharmonicError::new(
                BiharmonicErrorKind::UnsupportedElement { element, kind },
                "classify_unknowns",
            ));
        }

        mesh.populate_element_dofs(element, &mut element_dofs);
        for &ElementDof { equation, dof_type } in &element_dofs {
            let entry = &mut dof_types[equation];
            if dof_type == HIJACKED_DOF_TYPE || entry.is_none() {
                *entry = Some(dof_type);
            }
        }
    }

    dof_types
        .into_iter()
        .enumerate()
        .map(|(equation, dof_type)| {
            dof_type.ok_or_else(|| {
                BiharmonicError::new(
                    BiharmonicErrorKind::UnclassifiedUnknown { equation },
                    "classify_unknowns",
                )
            })
        })
        .collect()
}

impl BlockDecomposition {
    /// Builds the decomposition from the dof type of each global unknown.
    ///
    /// There are [`NUM_PRIMARY_BLOCKS`] blocks, plus the hijacked block if any unknown is
    /// hijacked.
    pub fn from_dof_types(dof_types: &[usize]) -> Result<Self, BiharmonicError> {
        let mut block_of = Vec::with_capacity(dof_types.len());
        for &dof_type in dof_types {
            let block = BIHARMONIC_DOF_TO_BLOCK.get(dof_type).copied().ok_or_else(|| {
                BiharmonicError::new(
                    BiharmonicErrorKind::UnknownDofType { dof_type },
                    "BlockDecomposition::from_dof_types",
                )
            })?;
            block_of.push(block);
        }

        let has_hijacked = block_of.iter().any(|&b| b == HIJACKED_BLOCK);
        let num_blocks = if has_hijacked {
            NUM_PRIMARY_BLOCKS + 1
        } else {
            NUM_PRIMARY_BLOCKS
        };

        let mut blocks = vec![Vec::new(); num_blocks];
        let mut membership = Vec::with_capacity(dof_types.len());
        for (global, &block) in block_of.iter().enumerate() {
            membership.push(Some((block, blocks[block].len())));
            blocks[block].push(global);
        }

        debug!(
            "Block decomposition of {} unknowns into blocks of sizes {:?}",
            dof_types.len(),
            blocks.iter().map(Vec::len).collect::<Vec<_>>()
        );

        Ok(Self {
            num_unknowns: dof_types.len(),
            membership,
            blocks,
        })
    }

    pub fn from_mesh(mesh: &dyn DofTypeMesh) -> Result<Self, BiharmonicError> {
        Self::from_dof_types(&classify_unknowns(mesh)?)
    }

    /// A decomposition covering only the given blocks of this one. Block `i` of the result is
    /// block `lookup[i]` of `self`.
    ///
    /// # Panics
    ///
    /// Panics if `lookup` refers to a block that does not exist.
    pub fn subsidiary(&self, lookup: &[usize]) -> BlockDecomposition {
        let mut membership = vec![None; self.num_unknowns];
        let mut blocks = Vec::with_capacity(lookup.len());
        for (child_block, &parent_block) in lookup.iter().enumerate() {
            self.assert_block_exists(parent_block);
            let indices = self.blocks[parent_block].clone();
            for (index, &global) in indices.iter().enumerate() {
                membership[global] = Some((child_block, index));
            }
            blocks.push(indices);
        }
        Self {
            num_unknowns: self.num_unknowns,
            membership,
            blocks,
        }
    }

    fn assert_block_exists(&self, block: usize) {
        assert!(
            block < self.blocks.len(),
            "Block {} does not exist, decomposition has {} blocks",
            block,
            self.blocks.len()
        );
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Size of the global system the decomposition refers to.
    pub fn num_unknowns(&self) -> usize {
        self.num_unknowns
    }

    pub fn block_dim(&self, block: usize) -> usize {
        self.assert_block_exists(block);
        self.blocks[block].len()
    }

    /// Global indices of the unknowns in the block, in increasing order.
    pub fn block_indices(&self, block: usize) -> &[usize] {
        self.assert_block_exists(block);
        &self.blocks[block]
    }

    /// The block and the index within the block of a global unknown.
    pub fn block_of(&self, global: usize) -> Option<(usize, usize)> {
        self.membership[global]
    }

    /// Extracts the coefficients whose rows belong to block `i` and columns to block `j`.
    ///
    /// # Panics
    ///
    /// Panics if either block does not exist or the matrix does not match the global system.
    pub fn get_block(&self, matrix: &CsrMatrix<f64>, i: usize, j: usize) -> CsrMatrix<f64> {
        self.assert_block_exists(i);
        self.assert_block_exists(j);
        self.assert_matrix_dims(matrix);

        let mut row_offsets = Vec::with_capacity(self.blocks[i].len() + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);
        for &global_row in &self.blocks[i] {
            let row = matrix.row(global_row);
            for (&global_col, &v) in izip!(row.col_indices(), row.values()) {
                if let Some((block, index)) = self.membership[global_col] {
                    if block == j {
                        col_indices.push(index);
                        values.push(v);
                    }
                }
            }
            row_offsets.push(col_indices.len());
        }

        CsrMatrix::try_from_csr_data(self.blocks[i].len(), self.blocks[j].len(), row_offsets, col_indices, values)
            .expect("Block indices are increasing in the global index, so columns stay sorted")
    }

    /// Assembles the given blocks into a single matrix, with the blocks concatenated in the
    /// given order. Only the block pairs `(i, j)` for which `retain(i, j)` holds are included.
    pub fn concatenated_matrix(
        &self,
        matrix: &CsrMatrix<f64>,
        blocks: &[usize],
        retain: impl Fn(usize, usize) -> bool,
    ) -> CsrMatrix<f64> {
        self.assert_matrix_dims(matrix);
        let mut position = vec![None; self.blocks.len()];
        let mut offsets = Vec::with_capacity(blocks.len());
        let mut dim = 0;
        for (p, &block) in blocks.iter().enumerate() {
            self.assert_block_exists(block);
            position[block] = Some(p);
            offsets.push(dim);
            dim += self.blocks[block].len();
        }

        let mut coo = CooMatrix::new(dim, dim);
        for (p, &block_i) in blocks.iter().enumerate() {
            for (local_row, &global_row) in self.blocks[block_i].iter().enumerate() {
                let row = matrix.row(global_row);
                for (&global_col, &v) in izip!(row.col_indices(), row.values()) {
                    let Some((block_j, local_col)) = self.membership[global_col] else {
                        continue;
                    };
                    if let Some(q) = position[block_j] {
                        if retain(block_i, block_j) {
                            coo.push(offsets[p] + local_row, offsets[q] + local_col, v);
                        }
                    }
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    /// Total dimension of the given blocks.
    pub fn concatenated_dim(&self, blocks: &[usize]) -> usize {
        blocks.iter().map(|&b| self.block_dim(b)).sum()
    }

    /// The entries of a global vector belonging to the block.
    pub fn gather_block(&self, x: DVectorView<f64>, block: usize) -> DVector<f64> {
        ops::gather(x, self.block_indices(block))
    }

    /// Writes a block vector into the corresponding entries of a global vector.
    pub fn scatter_block(&self, x_block: DVectorView<f64>, block: usize, y: DVectorViewMut<f64>) {
        ops::scatter(x_block, self.block_indices(block), y)
    }

    /// The entries of a global vector belonging to the given blocks, concatenated.
    pub fn gather(&self, x: DVectorView<f64>, blocks: &[usize]) -> DVector<f64> {
        let indices: Vec<usize> = blocks
            .iter()
            .flat_map(|&b| self.block_indices(b).iter().copied())
            .collect();
        ops::gather(x, &indices)
    }

    /// Inverse of [`gather`](Self::gather). Entries of `y` outside the blocks are untouched.
    pub fn scatter(&self, x: DVectorView<f64>, blocks: &[usize], y: DVectorViewMut<f64>) {
        let indices: Vec<usize> = blocks
            .iter()
            .flat_map(|&b| self.block_indices(b).iter().copied())
            .collect();
        ops::scatter(x, &indices, y)
    }

    fn assert_matrix_dims(&self, matrix: &CsrMatrix<f64>) {
        assert_eq!(
            (matrix.nrows(), matrix.ncols()),
            (self.num_unknowns, self.num_unknowns),
            "Matrix dimensions must match the number of unknowns"
        );
    }
}
