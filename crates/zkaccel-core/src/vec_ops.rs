//! Elementwise vector arithmetic, matrix transpose and bit reversal

use ark_ff::Field;
use rayon::prelude::*;
use tracing::debug;
use zkaccel_runtime::{AccelError, DeviceContext, HostOrDeviceSlice, Result};

use crate::check_len;

/// Parameters shared by the vector kernels
#[derive(Clone, Debug)]
pub struct VecOpsConfig {
    pub ctx: DeviceContext,
    /// number of equal-length vectors packed in each buffer
    pub batch_size: usize,
    pub is_async: bool,
}

impl Default for VecOpsConfig {
    fn default() -> Self {
        Self {
            ctx: DeviceContext::default(),
            batch_size: 1,
            is_async: false,
        }
    }
}

impl VecOpsConfig {
    /// Length of one vector in the batch
    fn vector_len(&self, total: usize) -> Result<usize> {
        if self.batch_size == 0 {
            return Err(AccelError::config("batch_size must be positive"));
        }
        if total % self.batch_size != 0 {
            return Err(AccelError::config(format!(
                "buffer of {} elements does not split into {} vectors",
                total, self.batch_size
            )));
        }
        Ok(total / self.batch_size)
    }
}

pub fn add<F, A, B, R>(a: &A, b: &B, cfg: &VecOpsConfig, result: &mut R) -> Result<()>
where
    F: Field,
    A: HostOrDeviceSlice<F> + ?Sized,
    B: HostOrDeviceSlice<F> + ?Sized,
    R: HostOrDeviceSlice<F> + ?Sized,
{
    elementwise("vec_add", a, b, cfg, result, |x, y| *x + y)
}

pub fn sub<F, A, B, R>(a: &A, b: &B, cfg: &VecOpsConfig, result: &mut R) -> Result<()>
where
    F: Field,
    A: HostOrDeviceSlice<F> + ?Sized,
    B: HostOrDeviceSlice<F> + ?Sized,
    R: HostOrDeviceSlice<F> + ?Sized,
{
    elementwise("vec_sub", a, b, cfg, result, |x, y| *x - y)
}

pub fn mul<F, A, B, R>(a: &A, b: &B, cfg: &VecOpsConfig, result: &mut R) -> Result<()>
where
    F: Field,
    A: HostOrDeviceSlice<F> + ?Sized,
    B: HostOrDeviceSlice<F> + ?Sized,
    R: HostOrDeviceSlice<F> + ?Sized,
{
    elementwise("vec_mul", a, b, cfg, result, |x, y| *x * y)
}

fn elementwise<F, A, B, R, Op>(
    name: &str,
    a: &A,
    b: &B,
    cfg: &VecOpsConfig,
    result: &mut R,
    op: Op,
) -> Result<()>
where
    F: Field,
    A: HostOrDeviceSlice<F> + ?Sized,
    B: HostOrDeviceSlice<F> + ?Sized,
    R: HostOrDeviceSlice<F> + ?Sized,
    Op: Fn(&F, &F) -> F + Sync + Send,
{
    let ctx = &cfg.ctx;
    ctx.check_buffer(a, "a")?;
    ctx.check_buffer(b, "b")?;
    ctx.check_buffer(result, "result")?;
    check_len("b", b.len(), a.len())?;
    check_len("result", result.len(), a.len())?;
    cfg.vector_len(a.len())?;
    debug!(op = name, len = a.len(), batch = cfg.batch_size, "vec op");

    let (a, b) = (a.as_kernel_slice(), b.as_kernel_slice());
    let out = result.as_kernel_slice_mut();
    ctx.launch(name, || {
        out.par_iter_mut()
            .zip(a.par_iter().zip(b.par_iter()))
            .for_each(|(r, (x, y))| *r = op(x, y));
    })?;
    ctx.finish(cfg.is_async)
}

/// Transpose a row-major `row_size × column_size` matrix
///
/// `input` holds `row_size` rows of `column_size` elements; `output`
/// receives `column_size` rows of `row_size` elements.
pub fn transpose_matrix<T, I, O>(
    input: &I,
    row_size: usize,
    column_size: usize,
    output: &mut O,
    ctx: &DeviceContext,
    is_async: bool,
) -> Result<()>
where
    T: Copy + Send + Sync,
    I: HostOrDeviceSlice<T> + ?Sized,
    O: HostOrDeviceSlice<T> + ?Sized,
{
    ctx.check_buffer(input, "input")?;
    ctx.check_buffer(output, "output")?;
    let total = row_size
        .checked_mul(column_size)
        .ok_or_else(|| AccelError::config("matrix dimensions overflow"))?;
    check_len("input", input.len(), total)?;
    check_len("output", output.len(), total)?;
    debug!(row_size, column_size, "transpose_matrix");
    if total == 0 {
        return Ok(());
    }

    let src = input.as_kernel_slice();
    let dst = output.as_kernel_slice_mut();
    ctx.launch("transpose_matrix", || transpose_into(src, row_size, column_size, dst))?;
    ctx.finish(is_async)
}

/// `dst[j * rows + i] = src[i * cols + j]`
pub(crate) fn transpose_into<T: Copy + Send + Sync>(src: &[T], rows: usize, cols: usize, dst: &mut [T]) {
    dst.par_chunks_mut(rows).enumerate().for_each(|(j, out_row)| {
        for (i, slot) in out_row.iter_mut().enumerate() {
            *slot = src[i * cols + j];
        }
    });
}

/// Bit-reversal permutation of every vector in the batch
pub fn bit_reverse<T, I, O>(input: &I, cfg: &VecOpsConfig, output: &mut O) -> Result<()>
where
    T: Clone + Send + Sync,
    I: HostOrDeviceSlice<T> + ?Sized,
    O: HostOrDeviceSlice<T> + ?Sized,
{
    let ctx = &cfg.ctx;
    ctx.check_buffer(input, "input")?;
    ctx.check_buffer(output, "output")?;
    check_len("output", output.len(), input.len())?;
    let n = bit_reverse_len(input.len(), cfg)?;

    let src = input.as_kernel_slice();
    let dst = output.as_kernel_slice_mut();
    ctx.launch("bit_reverse", || {
        dst.clone_from_slice(src);
        dst.par_chunks_mut(n).for_each(bit_reverse_permute);
    })?;
    ctx.finish(cfg.is_async)
}

pub fn bit_reverse_inplace<T, B>(inout: &mut B, cfg: &VecOpsConfig) -> Result<()>
where
    T: Send,
    B: HostOrDeviceSlice<T> + ?Sized,
{
    let ctx = &cfg.ctx;
    ctx.check_buffer(inout, "inout")?;
    let n = bit_reverse_len(inout.len(), cfg)?;

    let data = inout.as_kernel_slice_mut();
    ctx.launch("bit_reverse_inplace", || {
        data.par_chunks_mut(n).for_each(bit_reverse_permute);
    })?;
    ctx.finish(cfg.is_async)
}

fn bit_reverse_len(total: usize, cfg: &VecOpsConfig) -> Result<usize> {
    let n = cfg.vector_len(total)?;
    if !n.is_power_of_two() {
        return Err(AccelError::config(format!(
            "bit reversal needs a power-of-two length, got {}",
            n
        )));
    }
    debug!(n, batch = cfg.batch_size, "bit_reverse");
    Ok(n)
}

/// Swap `data[i]` with `data[rev(i)]`; `data.len()` must be a power of two
pub(crate) fn bit_reverse_permute<T>(data: &mut [T]) {
    let n = data.len();
    if n <= 2 {
        return;
    }
    let shift = usize::BITS - n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> shift;
        if i < j {
            data.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bw6_761::Fr;
    use ark_ff::UniformRand;
    use ark_std::test_rng;
    use proptest::prelude::*;
    use zkaccel_runtime::{DeviceVec, ErrorKind, HostSlice};

    fn random(n: usize) -> Vec<Fr> {
        let mut rng = test_rng();
        (0..n).map(|_| Fr::rand(&mut rng)).collect()
    }

    #[test]
    fn test_add_sub_mul() {
        let cfg = VecOpsConfig::default();
        let a = random(32);
        let b: Vec<Fr> = a.iter().rev().cloned().collect();
        let mut sum = vec![Fr::from(0u64); 32];
        let mut diff = sum.clone();
        let mut prod = sum.clone();

        add(HostSlice::from_slice(&a), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut sum)).unwrap();
        sub(HostSlice::from_slice(&a), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut diff)).unwrap();
        mul(HostSlice::from_slice(&a), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut prod)).unwrap();

        for i in 0..32 {
            assert_eq!(sum[i], a[i] + b[i]);
            assert_eq!(diff[i], a[i] - b[i]);
            assert_eq!(prod[i], a[i] * b[i]);
        }
    }

    #[test]
    fn test_add_into_device_buffer() {
        let cfg = VecOpsConfig::default();
        let a = random(8);
        let mut result = DeviceVec::<Fr>::device_malloc(&cfg.ctx, 8).unwrap();
        add(HostSlice::from_slice(&a), HostSlice::from_slice(&a), &cfg, &mut result).unwrap();

        let mut host = vec![Fr::from(0u64); 8];
        result.copy_to_host(HostSlice::from_mut_slice(&mut host)).unwrap();
        assert_eq!(host[5], a[5].double());
    }

    #[test]
    fn test_length_mismatch_leaves_result() {
        let cfg = VecOpsConfig::default();
        let a = random(4);
        let b = random(3);
        let mut result = vec![Fr::from(9u64); 4];
        let err = add(HostSlice::from_slice(&a), HostSlice::from_slice(&b), &cfg, HostSlice::from_mut_slice(&mut result))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(result.iter().all(|x| *x == Fr::from(9u64)));
    }

    #[test]
    fn test_batch_must_divide() {
        let cfg = VecOpsConfig { batch_size: 3, ..Default::default() };
        let a = random(8);
        let mut result = vec![Fr::from(0u64); 8];
        let err = mul(HostSlice::from_slice(&a), HostSlice::from_slice(&a), &cfg, HostSlice::from_mut_slice(&mut result))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_transpose() {
        let ctx = DeviceContext::default();
        // 2 rows of 3
        let input = [1u32, 2, 3, 4, 5, 6];
        let mut output = [0u32; 6];
        transpose_matrix(HostSlice::from_slice(&input), 2, 3, HostSlice::from_mut_slice(&mut output), &ctx, false)
            .unwrap();
        assert_eq!(output, [1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_bit_reverse_batched() {
        let cfg = VecOpsConfig { batch_size: 2, ..Default::default() };
        let input: Vec<u32> = (0..16).collect();
        let mut output = vec![0u32; 16];
        bit_reverse(HostSlice::from_slice(&input), &cfg, HostSlice::from_mut_slice(&mut output)).unwrap();
        assert_eq!(&output[..8], &[0, 4, 2, 6, 1, 5, 3, 7]);
        assert_eq!(&output[8..], &[8, 12, 10, 14, 9, 13, 11, 15]);
    }

    #[test]
    fn test_bit_reverse_rejects_odd_length() {
        let cfg = VecOpsConfig::default();
        let mut data = vec![0u32; 12];
        let err = bit_reverse_inplace(HostSlice::from_mut_slice(&mut data), &cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    proptest! {
        #[test]
        fn transpose_twice_is_identity(rows in 1usize..12, cols in 1usize..12) {
            let ctx = DeviceContext::default();
            let input: Vec<u64> = (0..(rows * cols) as u64).collect();
            let mut once = vec![0u64; rows * cols];
            let mut twice = vec![0u64; rows * cols];
            transpose_matrix(HostSlice::from_slice(&input), rows, cols, HostSlice::from_mut_slice(&mut once), &ctx, false).unwrap();
            transpose_matrix(HostSlice::from_slice(&once), cols, rows, HostSlice::from_mut_slice(&mut twice), &ctx, false).unwrap();
            prop_assert_eq!(twice, input);
        }

        #[test]
        fn bit_reverse_twice_is_identity(log_n in 0u32..10) {
            let cfg = VecOpsConfig::default();
            let original: Vec<u32> = (0..1u32 << log_n).collect();
            let mut data = original.clone();
            bit_reverse_inplace(HostSlice::from_mut_slice(&mut data), &cfg).unwrap();
            bit_reverse_inplace(HostSlice::from_mut_slice(&mut data), &cfg).unwrap();
            prop_assert_eq!(data, original);
        }
    }
}
