//! Multi-scalar multiplication
//!
//! Bucket method over `c`-bit windows. Each window sorts its points into
//! `2^c - 1` buckets by digit, the buckets collapse through running sums,
//! and windows combine top-down with `c` doublings each. Windows and point
//! chunks run in parallel on the device pool; batches do too.
//!
//! With a precompute factor `f`, every base `P` is stored as
//! `[P, 2^s P, 2^{2s} P, …]` (`f` entries, `s = ceil(W / f) · c` for `W`
//! windows), so an MSM of `n` points over `W` windows becomes one of `n·f`
//! points over `ceil(W / f)` windows.

use std::borrow::Cow;

use ark_ec::{AffineRepr, CurveGroup, Group};
use ark_ff::{BigInteger, PrimeField, Zero};
use rayon::prelude::*;
use tracing::debug;
use zkaccel_runtime::{AccelError, DeviceContext, DeviceVec, HostOrDeviceSlice, Result};

use crate::check_len;
use crate::montgomery::{normalize, MontgomeryConvertible};

/// Largest accepted window width
pub const MAX_WINDOW_BITS: usize = 24;

/// Points per parallel work item, at least `2^c`
const MIN_POINTS_PER_TASK: usize = 1 << 12;

#[derive(Clone, Debug)]
pub struct MSMConfig {
    pub ctx: DeviceContext,
    /// number of distinct bases before precomputation; 0 infers it from the buffer
    pub points_size: usize,
    /// entries per base in a precomputed buffer; 1 for plain bases
    pub precompute_factor: usize,
    /// window width in bits; 0 picks one from the input size
    pub c: usize,
    /// significant scalar bits; 0 means the full field width
    pub bitsize: usize,
    /// number of independent MSMs in the call
    pub batch_size: usize,
    pub are_scalars_montgomery_form: bool,
    pub are_points_montgomery_form: bool,
    pub is_async: bool,
}

impl Default for MSMConfig {
    fn default() -> Self {
        Self {
            ctx: DeviceContext::default(),
            points_size: 0,
            precompute_factor: 1,
            c: 0,
            bitsize: 0,
            batch_size: 1,
            are_scalars_montgomery_form: false,
            are_points_montgomery_form: false,
            is_async: false,
        }
    }
}

/// Window width used when none is configured
pub fn optimal_window_bits(n: usize) -> usize {
    if n < 32 {
        3
    } else {
        let log = (usize::BITS - 1 - n.leading_zeros()) as f64;
        ((log * 0.69) as usize + 2).min(16)
    }
}

/// Shape of a validated call
#[derive(Debug, Clone, Copy)]
struct MsmPlan {
    msm_size: usize,
    batch_size: usize,
    bases: usize,
    shared_bases: bool,
    factor: usize,
    c: usize,
    /// windows walked per point copy
    windows: usize,
}

fn window_count(bitsize: usize, c: usize) -> usize {
    bitsize.div_ceil(c)
}

/// Doublings between consecutive entries of a precomputed base
fn precompute_shift(bitsize: usize, c: usize, factor: usize) -> usize {
    window_count(bitsize, c).div_ceil(factor) * c
}

fn check_window(c: usize) -> Result<()> {
    if !(1..=MAX_WINDOW_BITS).contains(&c) {
        return Err(AccelError::config(format!(
            "window size c = {} outside 1..={}",
            c, MAX_WINDOW_BITS
        )));
    }
    Ok(())
}

fn plan<F: PrimeField>(
    scalars_len: usize,
    points_len: usize,
    results_len: usize,
    msm_size: usize,
    cfg: &MSMConfig,
) -> Result<MsmPlan> {
    if msm_size == 0 {
        return Err(AccelError::config("msm_size must be positive"));
    }
    if cfg.batch_size == 0 {
        return Err(AccelError::config("batch_size must be positive"));
    }
    if cfg.precompute_factor == 0 {
        return Err(AccelError::config("precompute_factor must be at least 1"));
    }
    let total = msm_size
        .checked_mul(cfg.batch_size)
        .ok_or_else(|| AccelError::config("msm_size * batch_size overflows"))?;
    check_len("scalars", scalars_len, total)?;
    check_len("results", results_len, cfg.batch_size)?;

    let factor = cfg.precompute_factor;
    if points_len % factor != 0 {
        return Err(AccelError::config(format!(
            "{} points do not split into bases of {} precomputed entries",
            points_len, factor
        )));
    }
    let bases = points_len / factor;
    if cfg.points_size != 0 && cfg.points_size != bases {
        return Err(AccelError::config(format!(
            "points_size {} does not match the {} bases supplied",
            cfg.points_size, bases
        )));
    }
    let shared_bases = if bases == msm_size {
        true
    } else if bases == total {
        false
    } else {
        return Err(AccelError::config(format!(
            "{} bases: expected msm_size ({}) or msm_size * batch_size ({})",
            bases, msm_size, total
        )));
    };

    let full_bits = F::MODULUS_BIT_SIZE as usize;
    let bitsize = match cfg.bitsize {
        0 => full_bits,
        b if factor > 1 && b != full_bits => {
            return Err(AccelError::config(format!(
                "precomputed bases assume {} scalar bits, got bitsize {}",
                full_bits, b
            )))
        }
        b if b > F::BigInt::NUM_LIMBS * 64 => {
            return Err(AccelError::config(format!("bitsize {} exceeds the scalar width", b)))
        }
        b => b,
    };

    let c = match cfg.c {
        0 if factor > 1 => optimal_window_bits(bases),
        0 => optimal_window_bits(msm_size),
        c => c,
    };
    check_window(c)?;

    Ok(MsmPlan {
        msm_size,
        batch_size: cfg.batch_size,
        bases,
        shared_bases,
        factor,
        c,
        windows: window_count(bitsize, c).div_ceil(factor),
    })
}

/// `results[b] = Σ_i scalars[b·msm_size + i] · points[i]` for every batch `b`
///
/// Points are shared across the batch when `points` holds `msm_size` bases
/// and per batch when it holds `msm_size · batch_size`.
pub fn msm<G, S, P, R>(
    scalars: &S,
    points: &P,
    msm_size: usize,
    cfg: &MSMConfig,
    results: &mut R,
) -> Result<()>
where
    G: CurveGroup,
    G::ScalarField: MontgomeryConvertible,
    G::Affine: MontgomeryConvertible,
    S: HostOrDeviceSlice<G::ScalarField> + ?Sized,
    P: HostOrDeviceSlice<G::Affine> + ?Sized,
    R: HostOrDeviceSlice<G> + ?Sized,
{
    let ctx = &cfg.ctx;
    ctx.check_buffer(scalars, "scalars")?;
    ctx.check_buffer(points, "points")?;
    ctx.check_buffer(results, "results")?;
    let plan = plan::<G::ScalarField>(scalars.len(), points.len(), results.len(), msm_size, cfg)?;
    run_msm(
        scalars.as_kernel_slice(),
        points.as_kernel_slice(),
        plan,
        cfg,
        results.as_kernel_slice_mut(),
    )
}

fn run_msm<G>(
    scalars: &[G::ScalarField],
    points: &[G::Affine],
    plan: MsmPlan,
    cfg: &MSMConfig,
    results: &mut [G],
) -> Result<()>
where
    G: CurveGroup,
    G::ScalarField: MontgomeryConvertible,
    G::Affine: MontgomeryConvertible,
{
    let ctx = &cfg.ctx;
    debug!(
        msm_size = plan.msm_size,
        batch_size = plan.batch_size,
        bases = plan.bases,
        factor = plan.factor,
        c = plan.c,
        windows = plan.windows,
        "msm"
    );

    let scratch_bytes = working_bytes::<G>(&plan, cfg, ctx.device().capabilities().threads)?;
    let _scratch = ctx.mempool().reserve(scratch_bytes, "msm working memory")?;

    let sums = ctx.launch("msm", || {
        let scalars: Cow<[G::ScalarField]> = if cfg.are_scalars_montgomery_form {
            let mut owned = scalars.to_vec();
            normalize(&mut owned, true);
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(scalars)
        };
        let points: Cow<[G::Affine]> = if cfg.are_points_montgomery_form {
            let mut owned = points.to_vec();
            normalize(&mut owned, true);
            Cow::Owned(owned)
        } else {
            Cow::Borrowed(points)
        };
        let digits: Vec<_> = scalars.par_iter().map(|s| s.into_bigint()).collect();

        let per_batch_points = plan.msm_size * plan.factor;
        (0..plan.batch_size)
            .into_par_iter()
            .map(|b| {
                let k = &digits[b * plan.msm_size..(b + 1) * plan.msm_size];
                let p = if plan.shared_bases {
                    &points[..per_batch_points]
                } else {
                    &points[b * per_batch_points..(b + 1) * per_batch_points]
                };
                bucket_msm::<G>(k, p, plan.factor, plan.c, plan.windows)
            })
            .collect::<Vec<G>>()
    })?;

    // results are written only once every batch succeeded
    ctx.launch("msm_store", || results.copy_from_slice(&sums))?;
    ctx.finish(cfg.is_async)
}

/// Peak scratch of one call: canonical scalar digits, Montgomery-normalized
/// input copies, and one bucket array per concurrently running task
fn working_bytes<G: CurveGroup>(plan: &MsmPlan, cfg: &MSMConfig, threads: usize) -> Result<usize> {
    let overflow = || AccelError::OutOfResources("msm working memory overflows usize".into());
    let scalars = plan.msm_size * plan.batch_size;
    let points = plan.bases * plan.factor;

    let mut bytes = scalars
        .checked_mul(std::mem::size_of::<<G::ScalarField as PrimeField>::BigInt>())
        .ok_or_else(overflow)?;
    if cfg.are_scalars_montgomery_form {
        let copy = scalars.checked_mul(std::mem::size_of::<G::ScalarField>()).ok_or_else(overflow)?;
        bytes = bytes.checked_add(copy).ok_or_else(overflow)?;
    }
    if cfg.are_points_montgomery_form {
        let copy = points.checked_mul(std::mem::size_of::<G::Affine>()).ok_or_else(overflow)?;
        bytes = bytes.checked_add(copy).ok_or_else(overflow)?;
    }

    let chunks = plan.msm_size.div_ceil(task_chunk(plan.c));
    let tasks = plan
        .batch_size
        .checked_mul(plan.windows)
        .and_then(|t| t.checked_mul(chunks))
        .ok_or_else(overflow)?;
    let live = tasks.min(threads.max(1));
    let buckets = ((1usize << plan.c) - 1)
        .checked_mul(std::mem::size_of::<G>())
        .and_then(|b| b.checked_mul(live))
        .ok_or_else(overflow)?;
    bytes.checked_add(buckets).ok_or_else(overflow)
}

/// Scalars handled by one bucket task
fn task_chunk(c: usize) -> usize {
    MIN_POINTS_PER_TASK.max(1 << c)
}

/// One MSM; `points` holds `factor` consecutive entries per scalar
fn bucket_msm<G: CurveGroup>(
    scalars: &[<G::ScalarField as PrimeField>::BigInt],
    points: &[G::Affine],
    factor: usize,
    c: usize,
    windows: usize,
) -> G {
    let chunk = task_chunk(c);
    let window_sums: Vec<G> = (0..windows)
        .into_par_iter()
        .map(|t| {
            scalars
                .par_chunks(chunk)
                .zip(points.par_chunks(chunk * factor))
                .map(|(k, p)| window_sum::<G>(k, p, factor, c, windows, t))
                .reduce(G::zero, |a, b| a + b)
        })
        .collect();

    let mut acc = G::zero();
    for sum in window_sums.iter().rev() {
        for _ in 0..c {
            acc.double_in_place();
        }
        acc += sum;
    }
    acc
}

/// Contribution of window `t` from every copy of every point in the chunk
fn window_sum<G: CurveGroup>(
    scalars: &[<G::ScalarField as PrimeField>::BigInt],
    points: &[G::Affine],
    factor: usize,
    c: usize,
    windows: usize,
    t: usize,
) -> G {
    let mut buckets = vec![G::zero(); (1 << c) - 1];
    for (i, k) in scalars.iter().enumerate() {
        let limbs = k.as_ref();
        for j in 0..factor {
            let d = digit(limbs, (j * windows + t) * c, c);
            if d != 0 {
                buckets[d - 1] += points[i * factor + j];
            }
        }
    }

    let mut running = G::zero();
    let mut sum = G::zero();
    for bucket in buckets.iter().rev() {
        running += bucket;
        sum += running;
    }
    sum
}

/// `c` bits of the little-endian limbs starting at bit `offset`
#[inline]
fn digit(limbs: &[u64], offset: usize, c: usize) -> usize {
    let limb = offset / 64;
    if limb >= limbs.len() {
        return 0;
    }
    let bit = offset % 64;
    let mut v = limbs[limb] >> bit;
    if bit + c > 64 && limb + 1 < limbs.len() {
        v |= limbs[limb + 1] << (64 - bit);
    }
    (v & ((1u64 << c) - 1)) as usize
}

/// Expand every base into `precompute_factor` shifted copies
///
/// `output_bases` receives `bases.len() · precompute_factor` points laid out
/// base by base. `c == 0` picks the window from the number of bases.
pub fn precompute_msm_bases<A, I, O>(
    bases: &I,
    precompute_factor: usize,
    c: usize,
    ctx: &DeviceContext,
    output_bases: &mut O,
) -> Result<()>
where
    A: AffineRepr,
    I: HostOrDeviceSlice<A> + ?Sized,
    O: HostOrDeviceSlice<A> + ?Sized,
{
    ctx.check_buffer(bases, "bases")?;
    ctx.check_buffer(output_bases, "output_bases")?;
    let c = resolve_precompute_window(bases.len(), precompute_factor, c)?;
    let expected = bases
        .len()
        .checked_mul(precompute_factor)
        .ok_or_else(|| AccelError::config("bases * precompute_factor overflows"))?;
    check_len("output_bases", output_bases.len(), expected)?;

    let shift = precompute_shift(A::ScalarField::MODULUS_BIT_SIZE as usize, c, precompute_factor);
    debug!(bases = bases.len(), precompute_factor, c, shift, "precompute_msm_bases");

    let src = bases.as_kernel_slice();
    let expanded = ctx.launch("precompute_msm_bases", || {
        let projective: Vec<A::Group> = src
            .par_iter()
            .flat_map_iter(|p| {
                let mut cur = p.into_group();
                (0..precompute_factor).map(move |j| {
                    if j > 0 {
                        for _ in 0..shift {
                            cur.double_in_place();
                        }
                    }
                    cur
                })
            })
            .collect();
        A::Group::normalize_batch(&projective)
    })?;

    let out = output_bases.as_kernel_slice_mut();
    ctx.launch("precompute_store", || out.copy_from_slice(&expanded))?;
    ctx.finish(false)
}

fn resolve_precompute_window(bases: usize, precompute_factor: usize, c: usize) -> Result<usize> {
    if bases == 0 {
        return Err(AccelError::config("no bases to precompute"));
    }
    if precompute_factor == 0 {
        return Err(AccelError::config("precompute_factor must be at least 1"));
    }
    let c = if c == 0 { optimal_window_bits(bases) } else { c };
    check_window(c)?;
    Ok(c)
}

/// Precomputed bases resident on a device, tagged with the parameters they were built for
pub struct BasesPrecomputeTable<A: AffineRepr> {
    points: DeviceVec<A>,
    bases_size: usize,
    precompute_factor: usize,
    c: usize,
}

impl<A: AffineRepr> std::fmt::Debug for BasesPrecomputeTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasesPrecomputeTable")
            .field("bases_size", &self.bases_size)
            .field("precompute_factor", &self.precompute_factor)
            .field("c", &self.c)
            .field("device", &self.points.device_id())
            .finish()
    }
}

impl<A: AffineRepr> BasesPrecomputeTable<A> {
    pub fn new<I>(
        bases: &I,
        precompute_factor: usize,
        c: usize,
        ctx: &DeviceContext,
    ) -> Result<Self>
    where
        I: HostOrDeviceSlice<A> + ?Sized,
    {
        let c = resolve_precompute_window(bases.len(), precompute_factor, c)?;
        let mut points = DeviceVec::device_malloc(ctx, bases.len() * precompute_factor)?;
        precompute_msm_bases(bases, precompute_factor, c, ctx, &mut points)?;
        Ok(Self {
            points,
            bases_size: bases.len(),
            precompute_factor,
            c,
        })
    }

    pub fn bases_size(&self) -> usize {
        self.bases_size
    }

    pub fn precompute_factor(&self) -> usize {
        self.precompute_factor
    }

    pub fn c(&self) -> usize {
        self.c
    }

    pub fn points(&self) -> &DeviceVec<A> {
        &self.points
    }
}

/// [`msm`] over a precomputed table; the table's factor and window win
pub fn msm_with_table<G, S, R>(
    scalars: &S,
    table: &BasesPrecomputeTable<G::Affine>,
    msm_size: usize,
    cfg: &MSMConfig,
    results: &mut R,
) -> Result<()>
where
    G: CurveGroup,
    G::ScalarField: MontgomeryConvertible,
    G::Affine: MontgomeryConvertible,
    S: HostOrDeviceSlice<G::ScalarField> + ?Sized,
    R: HostOrDeviceSlice<G> + ?Sized,
{
    if cfg.c != 0 && cfg.c != table.c {
        return Err(AccelError::config(format!(
            "table was built for c = {}, config asks for c = {}",
            table.c, cfg.c
        )));
    }
    if cfg.precompute_factor != 1 && cfg.precompute_factor != table.precompute_factor {
        return Err(AccelError::config(format!(
            "table was built with precompute_factor {}, config asks for {}",
            table.precompute_factor, cfg.precompute_factor
        )));
    }
    if cfg.are_points_montgomery_form {
        return Err(AccelError::config("precomputed tables hold points in standard form"));
    }
    let cfg = MSMConfig {
        c: table.c,
        precompute_factor: table.precompute_factor,
        points_size: table.bases_size,
        ..cfg.clone()
    };
    msm::<G, _, _, _>(scalars, &table.points, msm_size, &cfg, results)
}
