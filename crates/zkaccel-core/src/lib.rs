//! Accelerated engines for pairing-friendly curve workloads
//!
//! Every engine takes a configuration struct carrying a
//! [`DeviceContext`](zkaccel_runtime::DeviceContext), reads from and writes
//! to caller-owned buffers ([`HostSlice`](zkaccel_runtime::HostSlice) or
//! [`DeviceVec`](zkaccel_runtime::DeviceVec)) and reports failures through
//! [`AccelError`](zkaccel_runtime::AccelError). Output buffers are never
//! written by a call that fails.
//!
//! - [`msm`]: multi-scalar multiplication with optional precomputed bases
//! - [`ntt`]: scalar NTTs over a per-device [`Domain`](ntt::Domain)
//! - [`ecntt`]: NTTs over projective points
//! - [`poseidon`]: Poseidon hashing with per-arity constants
//! - [`merkle`]: Poseidon Merkle trees, paths and verification
//! - [`vec_ops`]: elementwise arithmetic, transpose, bit reversal
//! - [`montgomery`]: standard/Montgomery representation conversion
//!
//! Engines are generic over arkworks fields and short Weierstrass curves;
//! curve crates such as `zkaccel-bw6-761` pin the types.

pub mod ecntt;
pub mod merkle;
pub mod montgomery;
pub mod msm;
pub mod ntt;
pub mod poseidon;
pub mod traits;
pub mod vec_ops;

pub use ecntt::{ecntt, ecntt_inplace};
pub use merkle::{
    build_poseidon_merkle_tree, digests_len, merkle_path, merkle_root, verify_merkle_path, MerklePath,
    MerklePathLevel, TreeBuilderConfig,
};
pub use montgomery::{convert_montgomery, MontgomeryConvertible};
pub use msm::{msm, msm_with_table, precompute_msm_bases, BasesPrecomputeTable, MSMConfig};
pub use ntt::{
    get_root_of_unity, initialize_domain, ntt, ntt_inplace, release_domain, NTTConfig, NTTDir, NttOrdering,
};
pub use poseidon::{
    create_optimized_poseidon_constants, init_optimized_poseidon_constants, poseidon_hash, PoseidonConfig,
    PoseidonConstants,
};
pub use traits::GenerateRandom;
pub use vec_ops::{add, bit_reverse, bit_reverse_inplace, mul, sub, transpose_matrix, VecOpsConfig};

pub use zkaccel_runtime::{
    AccelError, DeviceContext, DeviceVec, ErrorKind, HostOrDeviceSlice, HostSlice, Result,
};

/// Reject a buffer whose length differs from what the call shape implies
pub(crate) fn check_len(name: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(AccelError::config(format!(
            "{} holds {} elements, expected {}",
            name, got, expected
        )));
    }
    Ok(())
}
