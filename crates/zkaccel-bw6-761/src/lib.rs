//! zkaccel engines instantiated for BW6-761
//!
//! Pins the generic engines of `zkaccel-core` to the BW6-761 scalar field
//! and its two groups, and provides random data for tests and benchmarks.
//!
//! ```no_run
//! use zkaccel_bw6_761::{CurveCfg, G1Affine, G1Projective, ScalarCfg, ScalarField};
//! use zkaccel_bw6_761::{msm, GenerateRandom, HostSlice, MSMConfig};
//!
//! let scalars = ScalarCfg::generate_random(1024);
//! let bases: Vec<G1Affine> = CurveCfg::generate_random(1024);
//! let mut result = [G1Projective::default()];
//! msm(
//!     HostSlice::from_slice(&scalars),
//!     HostSlice::from_slice(&bases),
//!     1024,
//!     &MSMConfig::default(),
//!     HostSlice::from_mut_slice(&mut result),
//! )
//! .unwrap();
//! # let _: &[ScalarField] = &scalars;
//! ```

pub mod curve;

pub use curve::{
    eq, to_affine, CurveCfg, G1Affine, G1Projective, G2Affine, G2CurveCfg, G2Projective, ScalarCfg, ScalarField,
};
pub use zkaccel_core::*;
