//! Montgomery representation conversion
//!
//! A buffer is in Montgomery form when every field value `a` it holds is
//! stored as `a·R mod p`, with `R = 2^(64·N)` for an `N`-limb modulus. The
//! engines accept either form through their `are_*_montgomery_form` flags;
//! this module converts whole buffers explicitly. Points convert
//! coordinate-wise.

use ark_ec::short_weierstrass::{Affine, Projective, SWCurveConfig};
use ark_ff::{Field, Fp, FpConfig};
use rayon::prelude::*;
use tracing::debug;
use zkaccel_runtime::{DeviceContext, HostOrDeviceSlice, Result};

/// Values whose representation can be moved in and out of Montgomery form
pub trait MontgomeryConvertible: Sized + Send + Sync {
    /// Multiplier applied to every prime-field coordinate
    type Factor: Copy + Send + Sync;

    /// `R` when converting into Montgomery form, `R^-1` when converting out
    fn montgomery_factor(is_into: bool) -> Self::Factor;

    fn apply_montgomery_factor(&mut self, factor: &Self::Factor);

    fn to_montgomery(&self) -> Self
    where
        Self: Clone,
    {
        let mut out = self.clone();
        out.apply_montgomery_factor(&Self::montgomery_factor(true));
        out
    }

    fn from_montgomery(&self) -> Self
    where
        Self: Clone,
    {
        let mut out = self.clone();
        out.apply_montgomery_factor(&Self::montgomery_factor(false));
        out
    }
}

impl<P: FpConfig<N>, const N: usize> MontgomeryConvertible for Fp<P, N> {
    type Factor = Self;

    fn montgomery_factor(is_into: bool) -> Self {
        let r = Self::from(2u64).pow([64 * N as u64]);
        if is_into {
            r
        } else {
            // R is a power of two below an odd modulus, never zero
            r.inverse().unwrap_or_default()
        }
    }

    fn apply_montgomery_factor(&mut self, factor: &Self) {
        *self *= factor;
    }
}

impl<P> MontgomeryConvertible for Affine<P>
where
    P: SWCurveConfig,
    P::BaseField: MontgomeryConvertible,
{
    type Factor = <P::BaseField as MontgomeryConvertible>::Factor;

    fn montgomery_factor(is_into: bool) -> Self::Factor {
        P::BaseField::montgomery_factor(is_into)
    }

    fn apply_montgomery_factor(&mut self, factor: &Self::Factor) {
        // the point at infinity has no coordinates to convert
        if self.infinity {
            return;
        }
        self.x.apply_montgomery_factor(factor);
        self.y.apply_montgomery_factor(factor);
    }
}

impl<P> MontgomeryConvertible for Projective<P>
where
    P: SWCurveConfig,
    P::BaseField: MontgomeryConvertible,
{
    type Factor = <P::BaseField as MontgomeryConvertible>::Factor;

    fn montgomery_factor(is_into: bool) -> Self::Factor {
        P::BaseField::montgomery_factor(is_into)
    }

    fn apply_montgomery_factor(&mut self, factor: &Self::Factor) {
        self.x.apply_montgomery_factor(factor);
        self.y.apply_montgomery_factor(factor);
        self.z.apply_montgomery_factor(factor);
    }
}

/// Convert every element of `buffer` into (`is_into`) or out of Montgomery form
pub fn convert_montgomery<T, B>(buffer: &mut B, is_into: bool, ctx: &DeviceContext) -> Result<()>
where
    T: MontgomeryConvertible,
    B: HostOrDeviceSlice<T> + ?Sized,
{
    ctx.check_buffer(buffer, "buffer")?;
    debug!(len = buffer.len(), is_into, on_device = buffer.is_on_device(), "convert_montgomery");
    if buffer.is_empty() {
        return Ok(());
    }

    let factor = T::montgomery_factor(is_into);
    let data = buffer.as_kernel_slice_mut();
    ctx.launch("convert_montgomery", || {
        data.par_iter_mut().for_each(|v| v.apply_montgomery_factor(&factor));
    })?;
    ctx.finish(false)
}

/// Convert `data` in place when `in_montgomery_form` is set
///
/// Engines call this on their private input copies.
pub(crate) fn normalize<T: MontgomeryConvertible>(data: &mut [T], in_montgomery_form: bool) {
    if in_montgomery_form {
        let factor = T::montgomery_factor(false);
        data.par_iter_mut().for_each(|v| v.apply_montgomery_factor(&factor));
    }
}

/// Move freshly computed outputs into Montgomery form when requested
pub(crate) fn denormalize<T: MontgomeryConvertible>(data: &mut [T], to_montgomery_form: bool) {
    if to_montgomery_form {
        let factor = T::montgomery_factor(true);
        data.par_iter_mut().for_each(|v| v.apply_montgomery_factor(&factor));
    }
}
