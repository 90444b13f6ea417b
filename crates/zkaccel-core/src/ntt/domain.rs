//! Per-device twiddle domains
//!
//! A domain holds the powers of one primitive root of unity, forward and
//! inverse, plus `n^-1` for every power-of-two size it covers. Domains live
//! in a process-wide registry keyed by device and field; transforms clone an
//! `Arc` out of it, lifecycle calls take the write lock.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use ark_ff::{FftField, Field, One};
use rayon::prelude::*;
use tracing::{debug, info};
use zkaccel_runtime::{AccelError, Allocation, DeviceContext, Result};

type DomainKey = (usize, TypeId);
type Registry = RwLock<HashMap<DomainKey, Arc<dyn Any + Send + Sync>>>;

fn registry() -> &'static Registry {
    static DOMAINS: OnceLock<Registry> = OnceLock::new();
    DOMAINS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn key<F: FftField>(ctx: &DeviceContext) -> DomainKey {
    (ctx.device_id(), TypeId::of::<F>())
}

fn poisoned<T>(_: T) -> AccelError {
    AccelError::ExecutionFailed("domain registry lock poisoned".into())
}

pub struct Domain<F: FftField> {
    log_max_size: u32,
    root: F,
    /// `w^i` for `i < max_size`
    twiddles: Vec<F>,
    /// `w^-i` for `i < max_size`
    inv_twiddles: Vec<F>,
    /// `(2^k)^-1` for `k <= log_max_size`
    size_inverses: Vec<F>,
    /// per stage `k`, the `2^(k-1)` twiddles of a length `2^k` butterfly
    fast: Option<FastTwiddles<F>>,
    _allocation: Allocation,
}

struct FastTwiddles<F> {
    forward: Vec<Vec<F>>,
    inverse: Vec<Vec<F>>,
}

/// Twiddles for one butterfly stage
pub(crate) enum StageTwiddles<'a, F> {
    Contiguous(&'a [F]),
    Strided { table: &'a [F], stride: usize },
}

impl<F: Copy> StageTwiddles<'_, F> {
    #[inline(always)]
    pub(crate) fn get(&self, j: usize) -> F {
        match self {
            StageTwiddles::Contiguous(t) => t[j],
            StageTwiddles::Strided { table, stride } => table[j * stride],
        }
    }
}

impl<F: FftField> Domain<F> {
    fn build(root: F, log_max_size: u32, fast_twiddles: bool, allocation: Allocation) -> Self {
        let max_size = 1usize << log_max_size;
        let inv_root = root.inverse().unwrap_or_default();
        let twiddles = powers(root, max_size);
        let inv_twiddles = powers(inv_root, max_size);

        let two_inv = F::from(2u64).inverse().unwrap_or_default();
        let mut size_inverses = Vec::with_capacity(log_max_size as usize + 1);
        let mut acc = F::one();
        for _ in 0..=log_max_size {
            size_inverses.push(acc);
            acc *= two_inv;
        }

        let fast = fast_twiddles.then(|| FastTwiddles {
            forward: stage_tables(&twiddles, log_max_size),
            inverse: stage_tables(&inv_twiddles, log_max_size),
        });

        Self {
            log_max_size,
            root,
            twiddles,
            inv_twiddles,
            size_inverses,
            fast,
            _allocation: allocation,
        }
    }

    #[cfg(test)]
    pub(crate) fn build_for_test(root: F, log_max_size: u32, fast_twiddles: bool) -> Self {
        let pool = zkaccel_runtime::MemPool::new(0, usize::MAX);
        let allocation = pool.reserve(0, "test domain").unwrap();
        Self::build(root, log_max_size, fast_twiddles, allocation)
    }

    pub fn max_size(&self) -> usize {
        1 << self.log_max_size
    }

    pub fn log_max_size(&self) -> u32 {
        self.log_max_size
    }

    pub fn root(&self) -> F {
        self.root
    }

    pub fn is_fast_twiddles(&self) -> bool {
        self.fast.is_some()
    }

    /// `n^-1` for a supported power-of-two `n`
    pub(crate) fn size_inverse(&self, log_n: u32) -> F {
        self.size_inverses[log_n as usize]
    }

    /// Twiddles `w_len^j` for a butterfly stage spanning `len` elements
    pub(crate) fn stage(&self, log_len: u32, inverse: bool) -> StageTwiddles<'_, F> {
        if let Some(fast) = &self.fast {
            let tables = if inverse { &fast.inverse } else { &fast.forward };
            return StageTwiddles::Contiguous(&tables[log_len as usize]);
        }
        let table = if inverse { &self.inv_twiddles } else { &self.twiddles };
        StageTwiddles::Strided {
            table,
            stride: 1 << (self.log_max_size - log_len),
        }
    }
}

fn powers<F: FftField>(base: F, n: usize) -> Vec<F> {
    const CHUNK: usize = 1 << 12;
    let mut out = vec![F::zero(); n];
    out.par_chunks_mut(CHUNK).enumerate().for_each(|(c, chunk)| {
        let mut acc = base.pow([(c * CHUNK) as u64]);
        for slot in chunk.iter_mut() {
            *slot = acc;
            acc *= base;
        }
    });
    out
}

fn stage_tables<F: FftField>(table: &[F], log_max_size: u32) -> Vec<Vec<F>> {
    // index 0 is unused: a stage always spans at least two elements
    (0..=log_max_size)
        .map(|log_len| {
            if log_len == 0 {
                return Vec::new();
            }
            let stride = 1usize << (log_max_size - log_len);
            let half = 1usize << (log_len - 1);
            (0..half).map(|j| table[j * stride]).collect()
        })
        .collect()
}

/// Order of `root` as `log2`, if it is a power of two within the field's 2-adicity
fn log_order<F: FftField>(root: F) -> Option<u32> {
    let mut acc = root;
    for k in 0..=F::TWO_ADICITY {
        if acc.is_one() {
            return Some(k);
        }
        acc.square_in_place();
    }
    None
}

/// Canonical primitive `n`-th root of unity
pub fn get_root_of_unity<F: FftField>(n: u64) -> Result<F> {
    F::get_root_of_unity(n)
        .ok_or_else(|| AccelError::config(format!("no primitive root of unity of order {}", n)))
}

/// Build and register the twiddle domain of `primitive_root` on the context's device
///
/// The domain size is the order of `primitive_root`. A domain already
/// registered with at least that size is kept, unless fast twiddles are
/// requested and it lacks them; it is then rebuilt at its own size.
pub fn initialize_domain<F: FftField>(
    primitive_root: F,
    ctx: &DeviceContext,
    fast_twiddles_mode: bool,
) -> Result<()> {
    let mut log_max_size = log_order(primitive_root).ok_or_else(|| {
        AccelError::config(format!(
            "primitive root order is not a power of two up to 2^{}",
            F::TWO_ADICITY
        ))
    })?;
    let mut primitive_root = primitive_root;
    let key = key::<F>(ctx);

    if let Some(existing) = registry().read().map_err(poisoned)?.get(&key) {
        if let Ok(domain) = Arc::clone(existing).downcast::<Domain<F>>() {
            if domain.log_max_size >= log_max_size {
                if !fast_twiddles_mode || domain.is_fast_twiddles() {
                    debug!(
                        device = ctx.device_id(),
                        existing = domain.log_max_size,
                        requested = log_max_size,
                        "domain already initialized"
                    );
                    return Ok(());
                }
                primitive_root = domain.root;
                log_max_size = domain.log_max_size;
            }
        }
    }

    let max_size = 1usize << log_max_size;
    let tables = if fast_twiddles_mode { 4 } else { 2 };
    let bytes = max_size
        .checked_mul(tables * std::mem::size_of::<F>())
        .ok_or_else(|| AccelError::OutOfResources(format!("domain of 2^{} overflows", log_max_size)))?;
    let allocation = ctx.mempool().reserve(bytes, "ntt domain")?;

    let domain = ctx.launch("initialize_domain", || {
        Domain::build(primitive_root, log_max_size, fast_twiddles_mode, allocation)
    })?;
    registry()
        .write()
        .map_err(poisoned)?
        .insert(key, Arc::new(domain));

    info!(
        device = ctx.device_id(),
        log_size = log_max_size,
        fast_twiddles = fast_twiddles_mode,
        "ntt domain initialized"
    );
    Ok(())
}

/// Drop the domain of field `F` on the context's device
pub fn release_domain<F: FftField>(ctx: &DeviceContext) -> Result<()> {
    let removed = registry().write().map_err(poisoned)?.remove(&key::<F>(ctx));
    match removed {
        Some(_) => {
            info!(device = ctx.device_id(), "ntt domain released");
            Ok(())
        }
        None => Err(AccelError::Precondition(format!(
            "no ntt domain initialized on device {}",
            ctx.device_id()
        ))),
    }
}

/// Registered domain for `F` on the context's device
pub fn get_domain<F: FftField>(ctx: &DeviceContext) -> Result<Arc<Domain<F>>> {
    let guard = registry().read().map_err(poisoned)?;
    let entry = guard.get(&key::<F>(ctx)).cloned().ok_or_else(|| {
        AccelError::Precondition(format!(
            "ntt domain not initialized on device {}",
            ctx.device_id()
        ))
    })?;
    entry
        .downcast::<Domain<F>>()
        .map_err(|_| AccelError::ExecutionFailed("domain registry type mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bw6_761::Fr;
    use zkaccel_runtime::ErrorKind;

    #[test]
    fn test_log_order() {
        let w: Fr = get_root_of_unity(1 << 5).unwrap();
        assert_eq!(log_order(w), Some(5));
        assert_eq!(log_order(Fr::one()), Some(0));
        assert_eq!(log_order(Fr::from(3u64)), None);
    }

    #[test]
    fn test_root_of_unity_rejects_non_power() {
        assert!(get_root_of_unity::<Fr>(1 << 5).is_ok());
        assert_eq!(get_root_of_unity::<Fr>(3 << 50).unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_domain_tables() {
        let w: Fr = get_root_of_unity(16).unwrap();
        let domain = Domain::build_for_test(w, 4, true);

        assert_eq!(domain.max_size(), 16);
        assert_eq!(domain.twiddles[3], w.pow([3u64]));
        assert_eq!(domain.twiddles[5] * domain.inv_twiddles[5], Fr::one());
        assert_eq!(domain.size_inverse(3) * Fr::from(8u64), Fr::one());

        // fast tables agree with strided lookups
        let fast = domain.stage(3, false);
        let strided = StageTwiddles::Strided { table: &domain.twiddles, stride: 2 };
        for j in 0..4 {
            assert_eq!(fast.get(j), strided.get(j));
        }
    }
}
