//! Number-theoretic transforms over scalars
//!
//! Iterative radix-2 transforms driven by a per-device [`Domain`]. The
//! decimation-in-frequency pass maps natural order to bit-reversed order,
//! the decimation-in-time pass maps bit-reversed order to natural order;
//! every [`NttOrdering`] is served by one of the two plus at most one
//! permutation.
//!
//! The same machinery transforms curve points (see [`crate::ecntt`]), with
//! scalar twiddles applied through [`NttElement`].

mod domain;

use std::ops::{Add, Sub};

use ark_ec::short_weierstrass::{Projective, SWCurveConfig};
use ark_ff::{FftField, Fp, FpConfig, One};
use rayon::prelude::*;
use tracing::debug;
use zkaccel_runtime::{AccelError, DeviceContext, HostOrDeviceSlice, Result};

pub use domain::{get_domain, get_root_of_unity, initialize_domain, release_domain, Domain};

use crate::check_len;
use crate::montgomery::{denormalize, normalize, MontgomeryConvertible};
use crate::vec_ops::{bit_reverse_permute, transpose_into};

/// Butterfly stages with at least this many pairs run their pairs in parallel
const PAR_BUTTERFLY_THRESHOLD: usize = 1 << 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NTTDir {
    Forward,
    Inverse,
}

/// Input and output element order: N = natural, R = bit-reversed, M = mixed
///
/// The radix-2 engine produces bit-reversed order wherever mixed order is
/// allowed, so `NM` behaves as `NR` and `MN` as `RN`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NttOrdering {
    #[default]
    NN,
    NR,
    RN,
    RR,
    NM,
    MN,
}

impl NttOrdering {
    fn input_reversed(self) -> bool {
        matches!(self, NttOrdering::RN | NttOrdering::RR | NttOrdering::MN)
    }

    fn output_reversed(self) -> bool {
        matches!(self, NttOrdering::NR | NttOrdering::RR | NttOrdering::NM)
    }
}

#[derive(Clone, Debug)]
pub struct NTTConfig<F> {
    pub ctx: DeviceContext,
    /// coset generator; one for a plain transform
    pub coset_gen: F,
    /// number of transforms in the buffer
    pub batch_size: usize,
    /// batch elements are interleaved: element `i` of transform `b` sits at `i * batch_size + b`
    pub columns_batch: bool,
    pub ordering: NttOrdering,
    pub are_inputs_montgomery_form: bool,
    pub are_outputs_montgomery_form: bool,
    pub is_async: bool,
}

impl<F: One> Default for NTTConfig<F> {
    fn default() -> Self {
        Self {
            ctx: DeviceContext::default(),
            coset_gen: F::one(),
            batch_size: 1,
            columns_batch: false,
            ordering: NttOrdering::NN,
            are_inputs_montgomery_form: false,
            are_outputs_montgomery_form: false,
            is_async: false,
        }
    }
}

/// Values an NTT can transform: closed under addition, scaled by field elements
pub trait NttElement<F>: Copy + Send + Sync + Add<Output = Self> + Sub<Output = Self> {
    fn scale(&self, by: &F) -> Self;
}

impl<P: FpConfig<N>, const N: usize> NttElement<Fp<P, N>> for Fp<P, N> {
    #[inline(always)]
    fn scale(&self, by: &Self) -> Self {
        *self * by
    }
}

impl<P: SWCurveConfig> NttElement<P::ScalarField> for Projective<P> {
    #[inline(always)]
    fn scale(&self, by: &P::ScalarField) -> Self {
        *self * by
    }
}

/// Forward or inverse NTT of `cfg.batch_size` vectors of length `size`
pub fn ntt<F, I, O>(input: &I, size: usize, dir: NTTDir, cfg: &NTTConfig<F>, output: &mut O) -> Result<()>
where
    F: FftField + NttElement<F> + MontgomeryConvertible,
    I: HostOrDeviceSlice<F> + ?Sized,
    O: HostOrDeviceSlice<F> + ?Sized,
{
    cfg.ctx.check_buffer(input, "input")?;
    cfg.ctx.check_buffer(output, "output")?;
    let total = expected_len(size, cfg)?;
    check_len("input", input.len(), total)?;
    check_len("output", output.len(), total)?;

    let result = transform("ntt", input.as_kernel_slice(), size, dir, cfg)?;
    let out = output.as_kernel_slice_mut();
    cfg.ctx.launch("ntt_store", || out.copy_from_slice(&result))?;
    cfg.ctx.finish(cfg.is_async)
}

/// [`ntt`] writing back into its input
pub fn ntt_inplace<F, B>(inout: &mut B, size: usize, dir: NTTDir, cfg: &NTTConfig<F>) -> Result<()>
where
    F: FftField + NttElement<F> + MontgomeryConvertible,
    B: HostOrDeviceSlice<F> + ?Sized,
{
    cfg.ctx.check_buffer(inout, "inout")?;
    let total = expected_len(size, cfg)?;
    check_len("inout", inout.len(), total)?;

    let result = transform("ntt_inplace", inout.as_kernel_slice(), size, dir, cfg)?;
    let out = inout.as_kernel_slice_mut();
    cfg.ctx.launch("ntt_store", || out.copy_from_slice(&result))?;
    cfg.ctx.finish(cfg.is_async)
}

pub(crate) fn expected_len<F>(size: usize, cfg: &NTTConfig<F>) -> Result<usize> {
    if size == 0 || !size.is_power_of_two() {
        return Err(AccelError::config(format!("ntt size {} is not a power of two", size)));
    }
    if cfg.batch_size == 0 {
        return Err(AccelError::config("batch_size must be positive"));
    }
    size.checked_mul(cfg.batch_size)
        .ok_or_else(|| AccelError::config("size * batch_size overflows"))
}

/// Transform `input` into a fresh buffer; the caller's buffers are untouched
pub(crate) fn transform<F, E>(
    name: &str,
    input: &[E],
    size: usize,
    dir: NTTDir,
    cfg: &NTTConfig<F>,
) -> Result<Vec<E>>
where
    F: FftField,
    E: NttElement<F> + MontgomeryConvertible,
{
    if cfg.coset_gen.is_zero() {
        return Err(AccelError::config("coset generator must be nonzero"));
    }
    let domain = get_domain::<F>(&cfg.ctx)?;
    if size > domain.max_size() {
        return Err(AccelError::config(format!(
            "ntt size {} exceeds the initialized domain of {}",
            size,
            domain.max_size()
        )));
    }
    let log_n = size.trailing_zeros();
    let batch_size = cfg.batch_size;
    debug!(
        kernel = name,
        log_n,
        batch_size,
        ordering = ?cfg.ordering,
        ?dir,
        columns_batch = cfg.columns_batch,
        "ntt"
    );

    let _scratch = cfg
        .ctx
        .mempool()
        .reserve(working_bytes::<F, E>(input.len(), size, cfg)?, "ntt working memory")?;

    cfg.ctx.launch(name, || {
        let plan = Plan::new(&domain, log_n, dir, cfg);

        let mut data = input.to_vec();
        normalize(&mut data, cfg.are_inputs_montgomery_form);
        if cfg.columns_batch && batch_size > 1 {
            let mut rows = data.clone();
            transpose_into(&data, size, batch_size, &mut rows);
            rows.par_chunks_mut(size).for_each(|v| plan.run(v));
            transpose_into(&rows, batch_size, size, &mut data);
        } else {
            data.par_chunks_mut(size).for_each(|v| plan.run(v));
        }
        denormalize(&mut data, cfg.are_outputs_montgomery_form);
        data
    })
}

/// Working copy of the batch, its transpose for column batches, and a coset scale table
fn working_bytes<F, E>(total: usize, size: usize, cfg: &NTTConfig<F>) -> Result<usize>
where
    F: FftField,
{
    let copies = if cfg.columns_batch && cfg.batch_size > 1 { 2 } else { 1 };
    let scale = if cfg.coset_gen.is_one() { 0 } else { size };
    total
        .checked_mul(copies * std::mem::size_of::<E>())
        .and_then(|b| b.checked_add(scale * std::mem::size_of::<F>()))
        .ok_or_else(|| AccelError::OutOfResources("ntt working memory overflows usize".into()))
}

/// Everything one length-`n` transform needs, shared across the batch
struct Plan<'a, F: FftField> {
    domain: &'a Domain<F>,
    log_n: u32,
    dir: NTTDir,
    ordering: NttOrdering,
    /// `g^i` applied to forward inputs
    pre_scale: Option<Vec<F>>,
    /// `n^-1 · g^-i` applied to inverse outputs
    post_scale: Option<Vec<F>>,
    size_inverse: F,
}

impl<'a, F: FftField> Plan<'a, F> {
    fn new(domain: &'a Domain<F>, log_n: u32, dir: NTTDir, cfg: &NTTConfig<F>) -> Self {
        let n = 1usize << log_n;
        let size_inverse = domain.size_inverse(log_n);
        let coset = (!cfg.coset_gen.is_one()).then_some(cfg.coset_gen);

        let (pre_scale, post_scale) = match (dir, coset) {
            (NTTDir::Forward, Some(g)) => (Some(geometric(F::one(), g, n)), None),
            (NTTDir::Inverse, Some(g)) => {
                let g_inv = g.inverse().unwrap_or_default();
                (None, Some(geometric(size_inverse, g_inv, n)))
            }
            _ => (None, None),
        };

        Self {
            domain,
            log_n,
            dir,
            ordering: cfg.ordering,
            pre_scale,
            post_scale,
            size_inverse,
        }
    }

    /// Natural index of the element at position `p`
    #[inline]
    fn natural_index(&self, p: usize, reversed: bool) -> usize {
        if reversed && self.log_n > 0 {
            p.reverse_bits() >> (usize::BITS - self.log_n)
        } else {
            p
        }
    }

    fn run<E: NttElement<F>>(&self, a: &mut [E]) {
        let input_rev = self.ordering.input_reversed();
        let output_rev = self.ordering.output_reversed();
        let inverse = self.dir == NTTDir::Inverse;

        if let Some(pows) = &self.pre_scale {
            a.par_iter_mut().enumerate().for_each(|(p, x)| {
                *x = x.scale(&pows[self.natural_index(p, input_rev)]);
            });
        }

        match (input_rev, output_rev) {
            (false, true) => dif(a, self.log_n, self.domain, inverse),
            (true, false) => dit(a, self.log_n, self.domain, inverse),
            (false, false) => {
                bit_reverse_permute(a);
                dit(a, self.log_n, self.domain, inverse);
            }
            (true, true) => {
                bit_reverse_permute(a);
                dif(a, self.log_n, self.domain, inverse);
            }
        }

        if inverse {
            match &self.post_scale {
                Some(factors) => a.par_iter_mut().enumerate().for_each(|(p, x)| {
                    *x = x.scale(&factors[self.natural_index(p, output_rev)]);
                }),
                None if self.log_n > 0 => {
                    let n_inv = self.size_inverse;
                    a.par_iter_mut().for_each(|x| *x = x.scale(&n_inv));
                }
                None => {}
            }
        }
    }
}

fn geometric<F: FftField>(start: F, ratio: F, n: usize) -> Vec<F> {
    let mut out = Vec::with_capacity(n);
    let mut acc = start;
    for _ in 0..n {
        out.push(acc);
        acc *= ratio;
    }
    out
}

/// Natural-order input, bit-reversed output
fn dif<F: FftField, E: NttElement<F>>(a: &mut [E], log_n: u32, domain: &Domain<F>, inverse: bool) {
    for log_len in (1..=log_n).rev() {
        let tw = domain.stage(log_len, inverse);
        butterflies(a, 1 << log_len, |lo, hi, j| {
            let (u, v) = (*lo, *hi);
            *lo = u + v;
            *hi = if j == 0 { u - v } else { (u - v).scale(&tw.get(j)) };
        });
    }
}

/// Bit-reversed input, natural-order output
fn dit<F: FftField, E: NttElement<F>>(a: &mut [E], log_n: u32, domain: &Domain<F>, inverse: bool) {
    for log_len in 1..=log_n {
        let tw = domain.stage(log_len, inverse);
        butterflies(a, 1 << log_len, |lo, hi, j| {
            let u = *lo;
            let v = if j == 0 { *hi } else { hi.scale(&tw.get(j)) };
            *lo = u + v;
            *hi = u - v;
        });
    }
}

fn butterflies<E, B>(a: &mut [E], len: usize, butterfly: B)
where
    E: Send,
    B: Fn(&mut E, &mut E, usize) + Sync,
{
    let half = len / 2;
    a.par_chunks_mut(len).for_each(|block| {
        let (lo, hi) = block.split_at_mut(half);
        if half >= PAR_BUTTERFLY_THRESHOLD {
            lo.par_iter_mut()
                .zip(hi.par_iter_mut())
                .enumerate()
                .for_each(|(j, (x, y))| butterfly(x, y, j));
        } else {
            for (j, (x, y)) in lo.iter_mut().zip(hi.iter_mut()).enumerate() {
                butterfly(x, y, j);
            }
        }
    });
}
