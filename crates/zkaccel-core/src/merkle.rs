//! Poseidon Merkle trees of fixed arity
//!
//! Digests are stored flat, leaves first: level 0 is the raw leaves, level
//! `l + 1` node `j` hashes level `l` nodes `j·arity .. (j+1)·arity`, and the
//! root is the last element.

use ark_ff::PrimeField;
use tracing::debug;
use zkaccel_runtime::{AccelError, DeviceContext, HostOrDeviceSlice, Result};

use crate::check_len;
use crate::poseidon::{hash_blocks, PoseidonConstants};

#[derive(Clone, Debug)]
pub struct TreeBuilderConfig {
    pub ctx: DeviceContext,
    pub is_async: bool,
}

impl Default for TreeBuilderConfig {
    fn default() -> Self {
        Self {
            ctx: DeviceContext::default(),
            is_async: false,
        }
    }
}

/// Number of digests in a tree of `height` levels above the leaves
pub fn digests_len(height: u32, arity: usize) -> Result<usize> {
    let mut total = 0usize;
    let mut width = 1usize;
    for _ in 0..=height {
        total = total
            .checked_add(width)
            .ok_or_else(|| AccelError::config("tree too large"))?;
        width = width
            .checked_mul(arity)
            .ok_or_else(|| AccelError::config("tree too large"))?;
    }
    Ok(total)
}

/// Leaves in a tree of `height` levels
pub fn leaves_len(height: u32, arity: usize) -> Result<usize> {
    arity
        .checked_pow(height)
        .ok_or_else(|| AccelError::config("tree too large"))
}

/// Offset of level `level` inside the digest array
fn level_offset(height: u32, arity: usize, level: u32) -> usize {
    (0..level).map(|k| arity.pow(height - k)).sum()
}

fn check_shape(height: u32, arity: usize) -> Result<()> {
    if arity < 2 {
        return Err(AccelError::config(format!("tree arity must be at least 2, got {}", arity)));
    }
    leaves_len(height, arity)?;
    digests_len(height, arity)?;
    Ok(())
}

/// Build the whole tree over `leaves` into `digests`
///
/// `digests` is written only after every level has been hashed.
pub fn build_poseidon_merkle_tree<F, L, D>(
    leaves: &L,
    digests: &mut D,
    height: u32,
    arity: usize,
    constants: &PoseidonConstants<F>,
    cfg: &TreeBuilderConfig,
) -> Result<()>
where
    F: PrimeField,
    L: HostOrDeviceSlice<F> + ?Sized,
    D: HostOrDeviceSlice<F> + ?Sized,
{
    let ctx = &cfg.ctx;
    ctx.check_buffer(leaves, "leaves")?;
    ctx.check_buffer(digests, "digests")?;
    check_shape(height, arity)?;
    if constants.arity() != arity {
        return Err(AccelError::config(format!(
            "constants are for arity {}, tree has arity {}",
            constants.arity(),
            arity
        )));
    }
    if constants.device_id() != ctx.device_id() {
        return Err(AccelError::config(format!(
            "constants live on device {}, context targets device {}",
            constants.device_id(),
            ctx.device_id()
        )));
    }
    let n_leaves = leaves_len(height, arity)?;
    let n_digests = digests_len(height, arity)?;
    check_len("leaves", leaves.len(), n_leaves)?;
    check_len("digests", digests.len(), n_digests)?;
    debug!(height, arity, leaves = n_leaves, "build_poseidon_merkle_tree");

    let _scratch = ctx
        .mempool()
        .reserve(n_digests * std::mem::size_of::<F>(), "merkle scratch")?;
    let src = leaves.as_kernel_slice();
    let tree = ctx.launch("merkle_tree", || {
        let mut tree = Vec::with_capacity(n_digests);
        tree.extend_from_slice(src);
        let mut start = 0;
        let mut width = n_leaves;
        while width > 1 {
            let next = hash_blocks(&tree[start..start + width], arity, constants, false);
            start += width;
            width /= arity;
            tree.extend(next);
        }
        tree
    })?;

    let out = digests.as_kernel_slice_mut();
    ctx.launch("merkle_store", || out.copy_from_slice(&tree))?;
    ctx.finish(cfg.is_async)
}

/// Root of a built tree
pub fn merkle_root<F: Copy>(digests: &[F]) -> Option<F> {
    digests.last().copied()
}

/// One level of an authentication path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePathLevel<F> {
    /// position of the path node among its `arity` siblings
    pub position: usize,
    /// the other `arity - 1` nodes of the block, in order
    pub siblings: Vec<F>,
}

/// Authentication path from a leaf to the root, bottom up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath<F> {
    pub leaf_index: usize,
    pub levels: Vec<MerklePathLevel<F>>,
}

/// Siblings of `leaf_index` at every level of a built tree
pub fn merkle_path<F: Copy>(digests: &[F], height: u32, arity: usize, leaf_index: usize) -> Result<MerklePath<F>> {
    check_shape(height, arity)?;
    check_len("digests", digests.len(), digests_len(height, arity)?)?;
    let n_leaves = leaves_len(height, arity)?;
    if leaf_index >= n_leaves {
        return Err(AccelError::config(format!(
            "leaf index {} out of range ({} leaves)",
            leaf_index, n_leaves
        )));
    }

    let mut levels = Vec::with_capacity(height as usize);
    let mut index = leaf_index;
    for level in 0..height {
        let offset = level_offset(height, arity, level);
        let block_start = offset + (index / arity) * arity;
        let position = index % arity;
        let siblings = (0..arity)
            .filter(|&k| k != position)
            .map(|k| digests[block_start + k])
            .collect();
        levels.push(MerklePathLevel { position, siblings });
        index /= arity;
    }
    Ok(MerklePath { leaf_index, levels })
}

/// Recompute the root from `leaf` along `path` and compare
pub fn verify_merkle_path<F: PrimeField>(
    root: &F,
    leaf: &F,
    path: &MerklePath<F>,
    constants: &PoseidonConstants<F>,
) -> Result<bool> {
    let arity = constants.arity();
    let mut node = *leaf;
    let mut block = Vec::with_capacity(arity);
    for level in &path.levels {
        if level.siblings.len() + 1 != arity || level.position >= arity {
            return Err(AccelError::config("path level does not match the constants' arity"));
        }
        block.clear();
        block.extend_from_slice(&level.siblings[..level.position]);
        block.push(node);
        block.extend_from_slice(&level.siblings[level.position..]);
        node = constants.hash_block(&block)?;
    }
    Ok(node == *root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poseidon::init_optimized_poseidon_constants;
    use ark_bw6_761::Fr;
    use ark_ff::{UniformRand, Zero};
    use ark_std::test_rng;
    use zkaccel_runtime::{ErrorKind, HostSlice};

    fn build(leaves: &[Fr], height: u32, arity: usize, constants: &PoseidonConstants<Fr>) -> Result<Vec<Fr>> {
        let cfg = TreeBuilderConfig::default();
        let mut digests = vec![Fr::zero(); digests_len(height, arity)?];
        build_poseidon_merkle_tree(
            HostSlice::from_slice(leaves),
            HostSlice::from_mut_slice(&mut digests),
            height,
            arity,
            constants,
            &cfg,
        )?;
        Ok(digests)
    }

    #[test]
    fn test_digests_len() {
        assert_eq!(digests_len(0, 2).unwrap(), 1);
        assert_eq!(digests_len(1, 2).unwrap(), 3);
        assert_eq!(digests_len(3, 4).unwrap(), 1 + 4 + 16 + 64);
        assert_eq!(level_offset(3, 4, 2), 64 + 16);
    }

    #[test]
    fn test_height_one() {
        let ctx = DeviceContext::default();
        let constants = init_optimized_poseidon_constants::<Fr>(2, &ctx).unwrap();
        let leaves = [Fr::from(1u64), Fr::from(2u64)];
        let digests = build(&leaves, 1, 2, &constants).unwrap();
        assert_eq!(&digests[..2], &leaves);
        assert_eq!(digests[2], constants.hash_block(&leaves).unwrap());
    }

    #[test]
    fn test_paths_verify_for_every_leaf() {
        let ctx = DeviceContext::default();
        let constants = init_optimized_poseidon_constants::<Fr>(4, &ctx).unwrap();
        let mut rng = test_rng();
        let leaves: Vec<Fr> = (0..64).map(|_| Fr::rand(&mut rng)).collect();
        let digests = build(&leaves, 3, 4, &constants).unwrap();
        let root = merkle_root(&digests).unwrap();

        for (i, leaf) in leaves.iter().enumerate() {
            let path = merkle_path(&digests, 3, 4, i).unwrap();
            assert_eq!(path.levels.len(), 3);
            assert!(verify_merkle_path(&root, leaf, &path, &constants).unwrap());
        }

        let path = merkle_path(&digests, 3, 4, 5).unwrap();
        assert!(!verify_merkle_path(&root, &Fr::from(7u64), &path, &constants).unwrap());
    }

    #[test]
    fn test_bad_shapes_leave_digests_untouched() {
        let ctx = DeviceContext::default();
        let constants = init_optimized_poseidon_constants::<Fr>(2, &ctx).unwrap();
        let cfg = TreeBuilderConfig::default();
        let leaves = vec![Fr::from(3u64); 3];
        let mut digests = vec![Fr::from(5u64); 7];
        let err = build_poseidon_merkle_tree(
            HostSlice::from_slice(&leaves),
            HostSlice::from_mut_slice(&mut digests),
            2,
            2,
            &constants,
            &cfg,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(digests.iter().all(|d| *d == Fr::from(5u64)));

        let leaves = vec![Fr::from(3u64); 16];
        let err = build(&leaves, 2, 4, &constants).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_path_index_out_of_range() {
        let digests = vec![Fr::zero(); 7];
        assert_eq!(merkle_path(&digests, 2, 2, 4).unwrap_err().kind(), ErrorKind::Configuration);
    }
}
