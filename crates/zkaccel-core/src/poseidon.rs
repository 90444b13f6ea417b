//! Poseidon hash
//!
//! Width `t = arity + 1`, S-box `x^5`. A permutation runs
//! `full_rounds_half` full rounds, `partial_rounds` partial rounds (S-box on
//! lane 0 only), then `full_rounds_half` full rounds; every round adds `t`
//! round constants and multiplies by the MDS matrix. A hashed state starts
//! as `[domain_tag, in_0, …, in_{arity-1}]` and the digest is lane 1.

use ark_ff::{BigInteger, Field, One, PrimeField, Zero};
use rayon::prelude::*;
use tracing::{debug, info};
use zkaccel_runtime::{AccelError, Allocation, DeviceContext, HostOrDeviceSlice, Result};

use crate::check_len;

const CONSTANTS_DOMAIN: &str = "zkaccel poseidon constants v1";

/// Round counts `(full_rounds_half, partial_rounds)` for the supported arities
pub fn round_numbers(arity: usize) -> Option<(usize, usize)> {
    match arity {
        2 => Some((4, 57)),
        4 => Some((4, 60)),
        8 => Some((4, 63)),
        11 => Some((4, 64)),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct PoseidonConfig {
    pub ctx: DeviceContext,
    /// inputs are complete `t`-element states, domain tag included
    pub input_is_a_state: bool,
    /// inputs are `t` elements wide with the first one ignored
    pub aligned: bool,
    pub is_async: bool,
}

impl Default for PoseidonConfig {
    fn default() -> Self {
        Self {
            ctx: DeviceContext::default(),
            input_is_a_state: false,
            aligned: false,
            is_async: false,
        }
    }
}

/// Round constants and MDS matrix for one arity, resident on one device
pub struct PoseidonConstants<F> {
    arity: usize,
    full_rounds_half: usize,
    partial_rounds: usize,
    round_constants: Vec<F>,
    /// `t × t`, row-major
    mds_matrix: Vec<F>,
    domain_tag: F,
    device_id: usize,
    _allocation: Allocation,
}

impl<F> std::fmt::Debug for PoseidonConstants<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseidonConstants")
            .field("arity", &self.arity)
            .field("full_rounds_half", &self.full_rounds_half)
            .field("partial_rounds", &self.partial_rounds)
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl<F: PrimeField> PoseidonConstants<F> {
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn width(&self) -> usize {
        self.arity + 1
    }

    pub fn full_rounds_half(&self) -> usize {
        self.full_rounds_half
    }

    pub fn partial_rounds(&self) -> usize {
        self.partial_rounds
    }

    pub fn domain_tag(&self) -> F {
        self.domain_tag
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn round_constants(&self) -> &[F] {
        &self.round_constants
    }

    pub fn mds_matrix(&self) -> &[F] {
        &self.mds_matrix
    }

    /// Constants in the external layout `[round constants ‖ MDS]`
    pub fn to_flat(&self) -> Vec<F> {
        let mut flat = self.round_constants.clone();
        flat.extend_from_slice(&self.mds_matrix);
        flat
    }

    /// Digest of one `arity`-element block, computed on the host
    pub fn hash_block(&self, block: &[F]) -> Result<F> {
        check_len("block", block.len(), self.arity)?;
        let mut state = Vec::with_capacity(self.width());
        state.push(self.domain_tag);
        state.extend_from_slice(block);
        let mut scratch = vec![F::zero(); self.width()];
        self.permute(&mut state, &mut scratch);
        Ok(state[1])
    }

    pub(crate) fn permute(&self, state: &mut [F], scratch: &mut [F]) {
        let t = self.width();
        let rounds = 2 * self.full_rounds_half + self.partial_rounds;
        for (round, rc) in self.round_constants.chunks_exact(t).take(rounds).enumerate() {
            for (s, c) in state.iter_mut().zip(rc) {
                *s += c;
            }
            let full = round < self.full_rounds_half || round >= self.full_rounds_half + self.partial_rounds;
            if full {
                state.iter_mut().for_each(sbox);
            } else {
                sbox(&mut state[0]);
            }
            for (out, row) in scratch.iter_mut().zip(self.mds_matrix.chunks_exact(t)) {
                *out = row.iter().zip(state.iter()).fold(F::zero(), |acc, (m, s)| acc + *m * s);
            }
            state.copy_from_slice(scratch);
        }
    }
}

#[inline(always)]
fn sbox<F: Field>(x: &mut F) {
    let x2 = x.square();
    let x4 = x2.square();
    *x *= x4;
}

fn domain_tag<F: PrimeField>(arity: usize) -> F {
    // 2^arity - 1
    F::from(2u64).pow([arity as u64]) - F::one()
}

fn reserve<F>(ctx: &DeviceContext, elements: usize) -> Result<Allocation> {
    let bytes = elements
        .checked_mul(std::mem::size_of::<F>())
        .ok_or_else(|| AccelError::config("poseidon constants overflow usize"))?;
    ctx.mempool().reserve(bytes, "poseidon constants")
}

/// `(t, round constant count, total constant count)` for a parameter set
fn constant_counts(
    arity: usize,
    full_rounds_half: usize,
    partial_rounds: usize,
) -> Result<(usize, usize, usize)> {
    let overflow = || AccelError::config("poseidon parameters overflow usize");
    let t = arity.checked_add(1).ok_or_else(overflow)?;
    let rc_len = full_rounds_half
        .checked_mul(2)
        .and_then(|rounds| rounds.checked_add(partial_rounds))
        .and_then(|rounds| rounds.checked_mul(t))
        .ok_or_else(overflow)?;
    let total = t
        .checked_mul(t)
        .and_then(|mds| mds.checked_add(rc_len))
        .ok_or_else(overflow)?;
    Ok((t, rc_len, total))
}

/// Build constants from an externally generated `[round constants ‖ MDS]` buffer
pub fn create_optimized_poseidon_constants<F, C>(
    arity: usize,
    full_rounds_half: usize,
    partial_rounds: usize,
    constants: &C,
    ctx: &DeviceContext,
) -> Result<PoseidonConstants<F>>
where
    F: PrimeField,
    C: HostOrDeviceSlice<F> + ?Sized,
{
    ctx.check_buffer(constants, "constants")?;
    if arity == 0 {
        return Err(AccelError::config("poseidon arity must be positive"));
    }
    if full_rounds_half == 0 {
        return Err(AccelError::config("poseidon needs at least one full round per half"));
    }
    let (_, rc_len, total) = constant_counts(arity, full_rounds_half, partial_rounds)?;
    check_len("constants", constants.len(), total)?;

    let flat = constants.as_kernel_slice();
    let allocation = reserve::<F>(ctx, flat.len())?;
    let (round_constants, mds_matrix) = ctx.launch("poseidon_constants", || {
        (flat[..rc_len].to_vec(), flat[rc_len..].to_vec())
    })?;
    debug!(arity, full_rounds_half, partial_rounds, "poseidon constants loaded");

    Ok(PoseidonConstants {
        arity,
        full_rounds_half,
        partial_rounds,
        round_constants,
        mds_matrix,
        domain_tag: domain_tag(arity),
        device_id: ctx.device_id(),
        _allocation: allocation,
    })
}

/// Derive the default constants for `arity` on the context's device
///
/// Round constants are read from a BLAKE3 XOF keyed by the field modulus
/// and the arity, 64 bytes per constant reduced mod p. The MDS matrix is the
/// Cauchy matrix `1 / (i + t + j)`.
pub fn init_optimized_poseidon_constants<F: PrimeField>(
    arity: usize,
    ctx: &DeviceContext,
) -> Result<PoseidonConstants<F>> {
    let (full_rounds_half, partial_rounds) = round_numbers(arity).ok_or_else(|| {
        AccelError::config(format!("no default poseidon parameters for arity {}", arity))
    })?;
    let (t, rc_len, total) = constant_counts(arity, full_rounds_half, partial_rounds)?;
    let allocation = reserve::<F>(ctx, total)?;

    let (round_constants, mds_matrix) =
        ctx.launch("poseidon_constants", || (derive_round_constants::<F>(arity, rc_len), cauchy_mds::<F>(t)))?;
    info!(arity, full_rounds_half, partial_rounds, device = ctx.device_id(), "poseidon constants derived");

    Ok(PoseidonConstants {
        arity,
        full_rounds_half,
        partial_rounds,
        round_constants,
        mds_matrix,
        domain_tag: domain_tag(arity),
        device_id: ctx.device_id(),
        _allocation: allocation,
    })
}

fn derive_round_constants<F: PrimeField>(arity: usize, count: usize) -> Vec<F> {
    let mut hasher = blake3::Hasher::new_derive_key(CONSTANTS_DOMAIN);
    hasher.update(&F::MODULUS.to_bytes_le());
    hasher.update(&(arity as u64).to_le_bytes());
    let mut xof = hasher.finalize_xof();

    let mut buf = [0u8; 64];
    (0..count)
        .map(|_| {
            xof.fill(&mut buf);
            F::from_le_bytes_mod_order(&buf)
        })
        .collect()
}

fn cauchy_mds<F: PrimeField>(t: usize) -> Vec<F> {
    (0..t)
        .flat_map(|i| (0..t).map(move |j| F::from((i + t + j) as u64)))
        .map(|d| d.inverse().unwrap_or_default())
        .collect()
}

/// Hash `number_of_states` blocks, one digest per block
pub fn poseidon_hash<F, I, O>(
    input: &I,
    output: &mut O,
    number_of_states: usize,
    arity: usize,
    constants: &PoseidonConstants<F>,
    cfg: &PoseidonConfig,
) -> Result<()>
where
    F: PrimeField,
    I: HostOrDeviceSlice<F> + ?Sized,
    O: HostOrDeviceSlice<F> + ?Sized,
{
    let ctx = &cfg.ctx;
    ctx.check_buffer(input, "input")?;
    ctx.check_buffer(output, "output")?;
    if constants.arity != arity {
        return Err(AccelError::config(format!(
            "constants are for arity {}, hash asked for arity {}",
            constants.arity, arity
        )));
    }
    if constants.device_id != ctx.device_id() {
        return Err(AccelError::config(format!(
            "constants live on device {}, context targets device {}",
            constants.device_id,
            ctx.device_id()
        )));
    }
    let stride = if cfg.input_is_a_state || cfg.aligned { constants.width() } else { arity };
    let expected = number_of_states
        .checked_mul(stride)
        .ok_or_else(|| AccelError::config("number_of_states * block width overflows"))?;
    check_len("input", input.len(), expected)?;
    check_len("output", output.len(), number_of_states)?;
    debug!(number_of_states, arity, input_is_a_state = cfg.input_is_a_state, aligned = cfg.aligned, "poseidon_hash");
    if number_of_states == 0 {
        return Ok(());
    }

    let src = input.as_kernel_slice();
    let digests = ctx.launch("poseidon_hash", || {
        hash_blocks(src, stride, constants, cfg.input_is_a_state)
    })?;
    let out = output.as_kernel_slice_mut();
    ctx.launch("poseidon_store", || out.copy_from_slice(&digests))?;
    ctx.finish(cfg.is_async)
}

/// Digests of consecutive `stride`-wide blocks
pub(crate) fn hash_blocks<F: PrimeField>(
    src: &[F],
    stride: usize,
    constants: &PoseidonConstants<F>,
    input_is_a_state: bool,
) -> Vec<F> {
    let t = constants.width();
    src.par_chunks(stride)
        .map_init(
            || (vec![F::zero(); t], vec![F::zero(); t]),
            |(state, scratch), block| {
                if input_is_a_state {
                    state.copy_from_slice(block);
                } else {
                    state[0] = constants.domain_tag;
                    // aligned blocks carry a placeholder in lane 0
                    state[1..].copy_from_slice(&block[stride - constants.arity..]);
                }
                constants.permute(state, scratch);
                state[1]
            },
        )
        .collect()
}
