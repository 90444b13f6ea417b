//! Host and device buffers
//!
//! Residency is a property of the buffer type: a [`HostSlice`] borrows host
//! memory, a [`DeviceVec`] owns memory reserved from a device [`MemPool`].
//! Engines accept either through [`HostOrDeviceSlice`]; moving data between
//! the two is always an explicit copy.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::{AccelError, DeviceContext, Result, Stream};

/// Byte-accounting allocator attached to one device
#[derive(Debug)]
pub struct MemPool {
    device_id: usize,
    limit: usize,
    used: AtomicUsize,
}

impl MemPool {
    pub fn new(device_id: usize, limit: usize) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            limit,
            used: AtomicUsize::new(0),
        })
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.used())
    }

    /// Reserve `bytes` from the pool; released when the returned guard drops
    pub fn reserve(self: &Arc<Self>, bytes: usize, what: &str) -> Result<Allocation> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.limit)
            })
            .map_err(|used| {
                AccelError::OutOfResources(format!(
                    "{}: {} bytes requested, {} of {} in use on device {}",
                    what, bytes, used, self.limit, self.device_id
                ))
            })?;
        debug!(device = self.device_id, bytes, what, "reserved device memory");
        Ok(Allocation {
            pool: Arc::clone(self),
            bytes,
        })
    }
}

/// Live reservation in a [`MemPool`]
#[derive(Debug)]
pub struct Allocation {
    pool: Arc<MemPool>,
    bytes: usize,
}

impl Allocation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn device_id(&self) -> usize {
        self.pool.device_id
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.used.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Buffer that an engine can read or write, wherever it lives
pub trait HostOrDeviceSlice<T> {
    fn is_on_device(&self) -> bool;

    /// Owning device, `None` for host memory
    fn device_id(&self) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory as addressed by kernels running on the owning device
    fn as_kernel_slice(&self) -> &[T];

    fn as_kernel_slice_mut(&mut self) -> &mut [T];
}

/// Borrowed host memory
#[repr(transparent)]
pub struct HostSlice<T>([T]);

impl<T> HostSlice<T> {
    pub fn from_slice(slice: &[T]) -> &Self {
        // SAFETY: HostSlice<T> is repr(transparent) over [T]
        unsafe { &*(slice as *const [T] as *const HostSlice<T>) }
    }

    pub fn from_mut_slice(slice: &mut [T]) -> &mut Self {
        // SAFETY: HostSlice<T> is repr(transparent) over [T]
        unsafe { &mut *(slice as *mut [T] as *mut HostSlice<T>) }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.0
    }
}

impl<T> Deref for HostSlice<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> DerefMut for HostSlice<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

impl<T> HostOrDeviceSlice<T> for HostSlice<T> {
    fn is_on_device(&self) -> bool {
        false
    }

    fn device_id(&self) -> Option<usize> {
        None
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn as_kernel_slice(&self) -> &[T] {
        &self.0
    }

    fn as_kernel_slice_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

/// Owned device memory
///
/// Host code never reads the contents directly; use [`DeviceVec::copy_to_host`].
pub struct DeviceVec<T> {
    data: Vec<T>,
    stream: Arc<Stream>,
    allocation: Allocation,
}

impl<T> std::fmt::Debug for DeviceVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceVec")
            .field("len", &self.data.len())
            .field("device", &self.allocation.device_id())
            .field("bytes", &self.allocation.bytes())
            .finish()
    }
}

impl<T: Clone + Default + Send + Sync> DeviceVec<T> {
    /// Allocate `count` default-initialized elements from the context's pool
    pub fn device_malloc(ctx: &DeviceContext, count: usize) -> Result<Self> {
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| AccelError::OutOfResources(format!("{} elements overflow usize bytes", count)))?;
        let allocation = ctx.mempool().reserve(bytes, "device_malloc")?;
        let data = ctx.launch("device_malloc", || vec![T::default(); count])?;
        Ok(Self {
            data,
            stream: Arc::clone(ctx.stream()),
            allocation,
        })
    }

    /// Allocate and fill from host memory in one step
    pub fn from_host(ctx: &DeviceContext, src: &HostSlice<T>) -> Result<Self> {
        let mut vec = Self::device_malloc(ctx, src.len())?;
        vec.copy_from_host(src)?;
        Ok(vec)
    }
}

impl<T: Clone + Send + Sync> DeviceVec<T> {
    pub fn copy_from_host(&mut self, src: &HostSlice<T>) -> Result<()> {
        let stream = Arc::clone(&self.stream);
        self.copy_from_host_async(src, &stream)?;
        stream.synchronize()
    }

    pub fn copy_to_host(&self, dst: &mut HostSlice<T>) -> Result<()> {
        self.copy_to_host_async(dst, &self.stream)?;
        self.stream.synchronize()
    }

    /// Enqueue a host-to-device copy on `stream`
    pub fn copy_from_host_async(&mut self, src: &HostSlice<T>, stream: &Stream) -> Result<()> {
        self.check_transfer(src.len(), stream)?;
        let data = &mut self.data;
        stream.launch("copy_from_host", || data.clone_from_slice(src.as_slice()))
    }

    /// Enqueue a device-to-host copy on `stream`
    pub fn copy_to_host_async(&self, dst: &mut HostSlice<T>, stream: &Stream) -> Result<()> {
        self.check_transfer(dst.len(), stream)?;
        let data = &self.data;
        stream.launch("copy_to_host", || dst.as_mut_slice().clone_from_slice(data))
    }

    fn check_transfer(&self, host_len: usize, stream: &Stream) -> Result<()> {
        if host_len != self.data.len() {
            return Err(AccelError::config(format!(
                "transfer length mismatch: host {} vs device {}",
                host_len,
                self.data.len()
            )));
        }
        if stream.device_id() != self.allocation.device_id() {
            return Err(AccelError::config(format!(
                "stream on device {} cannot copy memory of device {}",
                stream.device_id(),
                self.allocation.device_id()
            )));
        }
        Ok(())
    }
}

impl<T> HostOrDeviceSlice<T> for DeviceVec<T> {
    fn is_on_device(&self) -> bool {
        true
    }

    fn device_id(&self) -> Option<usize> {
        Some(self.allocation.device_id())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn as_kernel_slice(&self) -> &[T] {
        &self.data
    }

    fn as_kernel_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}
