//! Execution context: which device, stream and memory pool a call runs on

use std::sync::Arc;

use crate::{runtime, AccelError, Device, HostOrDeviceSlice, MemPool, Result, Stream};

/// Device, stream and memory pool for one engine call
///
/// Immutable once built; clones share the same stream and pool.
#[derive(Clone, Debug)]
pub struct DeviceContext {
    device: Arc<Device>,
    stream: Arc<Stream>,
    mempool: Arc<MemPool>,
}

impl DeviceContext {
    /// Context on `device_id` using its default stream and pool
    pub fn new(device_id: usize) -> Result<Self> {
        Ok(Self::on_device(runtime::device(device_id)?))
    }

    /// Context on the runtime's default device
    pub fn default_context() -> Result<Self> {
        Ok(Self::on_device(runtime::get()?.default_device()?))
    }

    pub fn on_device(device: Arc<Device>) -> Self {
        Self {
            stream: Arc::clone(device.default_stream()),
            mempool: Arc::clone(device.mempool()),
            device,
        }
    }

    /// Same device and pool, different stream
    pub fn with_stream(&self, stream: Arc<Stream>) -> Result<Self> {
        if stream.device_id() != self.device.id() {
            return Err(AccelError::config(format!(
                "stream belongs to device {}, context to device {}",
                stream.device_id(),
                self.device.id()
            )));
        }
        Ok(Self {
            stream,
            ..self.clone()
        })
    }

    /// Same device and stream, different memory pool
    pub fn with_mempool(&self, mempool: Arc<MemPool>) -> Result<Self> {
        if mempool.device_id() != self.device.id() {
            return Err(AccelError::config(format!(
                "memory pool belongs to device {}, context to device {}",
                mempool.device_id(),
                self.device.id()
            )));
        }
        Ok(Self {
            mempool,
            ..self.clone()
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn device_id(&self) -> usize {
        self.device.id()
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn mempool(&self) -> &Arc<MemPool> {
        &self.mempool
    }

    /// Run a kernel on this context's stream
    pub fn launch<R, K>(&self, name: &str, kernel: K) -> Result<R>
    where
        R: Send,
        K: FnOnce() -> R + Send,
    {
        self.stream.launch(name, kernel)
    }

    /// Wait for completion unless the caller asked for an async call
    pub fn finish(&self, is_async: bool) -> Result<()> {
        if is_async {
            Ok(())
        } else {
            self.stream.synchronize()
        }
    }

    /// Reject device buffers that live on another device
    pub fn check_buffer<T, B>(&self, buffer: &B, name: &str) -> Result<()>
    where
        B: HostOrDeviceSlice<T> + ?Sized,
    {
        match buffer.device_id() {
            Some(id) if id != self.device.id() => Err(AccelError::config(format!(
                "{} resides on device {} but the context targets device {}",
                name,
                id,
                self.device.id()
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for DeviceContext {
    /// # Panics
    ///
    /// Panics if the runtime cannot start its default device; use
    /// [`DeviceContext::default_context`] to handle that error instead.
    fn default() -> Self {
        Self::default_context().expect("default device unavailable")
    }
}
