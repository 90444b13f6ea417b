//! NTT over projective curve points
//!
//! Shares the scalar field's [`Domain`](crate::ntt::Domain): butterflies add
//! points and scale them by scalar twiddles.

use ark_ec::short_weierstrass::{Projective, SWCurveConfig};
use zkaccel_runtime::{HostOrDeviceSlice, Result};

use crate::check_len;
use crate::montgomery::MontgomeryConvertible;
use crate::ntt::{expected_len, transform, NTTConfig, NTTDir};

pub fn ecntt<P, I, O>(
    input: &I,
    size: usize,
    dir: NTTDir,
    cfg: &NTTConfig<P::ScalarField>,
    output: &mut O,
) -> Result<()>
where
    P: SWCurveConfig,
    P::BaseField: MontgomeryConvertible,
    I: HostOrDeviceSlice<Projective<P>> + ?Sized,
    O: HostOrDeviceSlice<Projective<P>> + ?Sized,
{
    cfg.ctx.check_buffer(input, "input")?;
    cfg.ctx.check_buffer(output, "output")?;
    let total = expected_len(size, cfg)?;
    check_len("input", input.len(), total)?;
    check_len("output", output.len(), total)?;

    let result = transform("ecntt", input.as_kernel_slice(), size, dir, cfg)?;
    let out = output.as_kernel_slice_mut();
    cfg.ctx.launch("ecntt_store", || out.copy_from_slice(&result))?;
    cfg.ctx.finish(cfg.is_async)
}

pub fn ecntt_inplace<P, B>(
    inout: &mut B,
    size: usize,
    dir: NTTDir,
    cfg: &NTTConfig<P::ScalarField>,
) -> Result<()>
where
    P: SWCurveConfig,
    P::BaseField: MontgomeryConvertible,
    B: HostOrDeviceSlice<Projective<P>> + ?Sized,
{
    cfg.ctx.check_buffer(inout, "inout")?;
    let total = expected_len(size, cfg)?;
    check_len("inout", inout.len(), total)?;

    let result = transform("ecntt_inplace", inout.as_kernel_slice(), size, dir, cfg)?;
    let out = inout.as_kernel_slice_mut();
    cfg.ctx.launch("ecntt_store", || out.copy_from_slice(&result))?;
    cfg.ctx.finish(cfg.is_async)
}
