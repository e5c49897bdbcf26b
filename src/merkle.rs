//! Depth-10 MiMC Merkle commitment
//!
//! Every tree in the system is a balanced binary tree of fixed depth
//! [`TREE_DEPTH`] over exactly `2^TREE_DEPTH` leaf slots. Batches shorter
//! than that are padded with the canonical zero encoding, so a root is
//! always a commitment to 1024 slots and is deterministic regardless of how
//! many of them are populated.
//!
//! The node grid produced by [`build_nodes`] is row-per-level with the root
//! row first: `grid[0]` is `[root]`, `grid[TREE_DEPTH]` is the padded leaf
//! row. Sibling paths run leaf-to-root.

use crate::mimc::hash_nodes;
use crate::Hash;

/// Tree depth; `1 << TREE_DEPTH` leaves per commitment, which also caps a
/// batch at 1024 accounts and an aggregation layer at 1024 child proofs.
pub const TREE_DEPTH: usize = 10;

/// Maximum number of leaves (and accounts) per tree.
pub const MAX_LEAVES: usize = 1 << TREE_DEPTH;

/// The padding value for unpopulated leaf slots.
pub const ZERO_LEAF: Hash = [0u8; 32];

/// Merkle-level invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    /// More leaves than the fixed tree can commit to.
    #[error("{got} leaves exceed the {MAX_LEAVES}-leaf tree capacity")]
    TooManyLeaves {
        /// Number of leaves actually supplied.
        got: usize,
    },
    /// A leaf position outside `[0, 2^TREE_DEPTH)`.
    #[error("leaf position {position} is outside the {MAX_LEAVES}-slot tree")]
    PositionOutOfRange {
        /// The out-of-range position that was requested.
        position: usize,
    },
    /// A sibling path whose length is not exactly the tree depth.
    #[error("merkle path has {got} siblings, expected {TREE_DEPTH}")]
    PathLengthMismatch {
        /// Number of siblings actually supplied.
        got: usize,
    },
    /// A node grid whose level widths do not match the fixed shape.
    #[error("merkle node grid is malformed at level {level}: {got} nodes, expected {expected}")]
    MalformedGrid {
        /// The tree level at which the mismatch was found.
        level: usize,
        /// Number of nodes actually present at that level.
        got: usize,
        /// Number of nodes required at that level.
        expected: usize,
    },
    /// A reconstruction that does not end at the expected root.
    #[error("reconstructed merkle root does not match the committed root")]
    RootMismatch,
}

/// Build the full node grid for a batch of leaves, zero-padded to capacity.
///
/// `grid[level]` holds `2^level` nodes; `grid[TREE_DEPTH]` is the leaf row
/// and `grid[0][0]` the root.
pub fn build_nodes(leaves: &[Hash]) -> Result<Vec<Vec<Hash>>, MerkleError> {
    if leaves.len() > MAX_LEAVES {
        return Err(MerkleError::TooManyLeaves { got: leaves.len() });
    }
    let mut grid = vec![Vec::new(); TREE_DEPTH + 1];
    let mut row = Vec::with_capacity(MAX_LEAVES);
    row.extend_from_slice(leaves);
    row.resize(MAX_LEAVES, ZERO_LEAF);
    grid[TREE_DEPTH] = row;
    for level in (0..TREE_DEPTH).rev() {
        let below = &grid[level + 1];
        let mut row = Vec::with_capacity(1 << level);
        for j in 0..(1 << level) {
            row.push(hash_nodes(&below[2 * j], &below[2 * j + 1]));
        }
        grid[level] = row;
    }
    Ok(grid)
}

/// Root of a batch of leaves.
pub fn root(leaves: &[Hash]) -> Result<Hash, MerkleError> {
    Ok(build_nodes(leaves)?[0][0])
}

/// Extract the sibling path for `position` from a node grid, leaf-to-root.
pub fn path(position: usize, grid: &[Vec<Hash>]) -> Result<Vec<Hash>, MerkleError> {
    if position >= MAX_LEAVES {
        return Err(MerkleError::PositionOutOfRange { position });
    }
    check_grid_shape(grid)?;
    let mut siblings = Vec::with_capacity(TREE_DEPTH);
    let mut pos = position;
    for level in (1..=TREE_DEPTH).rev() {
        siblings.push(grid[level][pos ^ 1]);
        pos >>= 1;
    }
    Ok(siblings)
}

/// Recompute the root from a leaf hash and its sibling path and compare it
/// to the committed root.
pub fn verify_path(
    leaf: &Hash,
    position: usize,
    siblings: &[Hash],
    expected_root: &Hash,
) -> Result<(), MerkleError> {
    if position >= MAX_LEAVES {
        return Err(MerkleError::PositionOutOfRange { position });
    }
    if siblings.len() != TREE_DEPTH {
        return Err(MerkleError::PathLengthMismatch {
            got: siblings.len(),
        });
    }
    let mut current = *leaf;
    let mut pos = position;
    for sibling in siblings {
        current = if pos & 1 == 0 {
            hash_nodes(&current, sibling)
        } else {
            hash_nodes(sibling, &current)
        };
        pos >>= 1;
    }
    if current != *expected_root {
        return Err(MerkleError::RootMismatch);
    }
    Ok(())
}

/// Re-verify an entire published node grid: shape, every internal hash, and
/// the root itself.
pub fn verify_build(grid: &[Vec<Hash>], expected_root: &Hash) -> Result<(), MerkleError> {
    check_grid_shape(grid)?;
    for level in (1..=TREE_DEPTH).rev() {
        for j in 0..(1 << (level - 1)) {
            if hash_nodes(&grid[level][2 * j], &grid[level][2 * j + 1]) != grid[level - 1][j] {
                return Err(MerkleError::RootMismatch);
            }
        }
    }
    if grid[0][0] != *expected_root {
        return Err(MerkleError::RootMismatch);
    }
    Ok(())
}

fn check_grid_shape(grid: &[Vec<Hash>]) -> Result<(), MerkleError> {
    if grid.len() != TREE_DEPTH + 1 {
        return Err(MerkleError::MalformedGrid {
            level: 0,
            got: grid.len(),
            expected: TREE_DEPTH + 1,
        });
    }
    for (level, row) in grid.iter().enumerate() {
        if row.len() != 1 << level {
            return Err(MerkleError::MalformedGrid {
                level,
                got: row.len(),
                expected: 1 << level,
            });
        }
    }
    Ok(())
}
