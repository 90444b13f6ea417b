//! Accelerator device handles
//!
//! The host-emulated backend models each device as a dedicated rayon thread
//! pool plus a memory pool with a fixed budget. Kernels never run on the
//! caller's thread, so a device saturates independently of the host.

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::{AccelError, MemPool, Result, Stream};

/// Backend family of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Host-emulated accelerator backed by a worker pool
    Cpu,
}

impl DeviceKind {
    /// Parse a backend name such as `"CPU"`
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cpu" | "host" => Ok(DeviceKind::Cpu),
            other => Err(AccelError::config(format!("backend '{}' is not available", other))),
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
        }
    }
}

/// Limits detected when the device was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// worker threads available to kernels
    pub threads: usize,
    /// size of the default memory pool in bytes
    pub memory_limit: usize,
}

pub struct Device {
    id: usize,
    kind: DeviceKind,
    pool: Arc<ThreadPool>,
    mempool: Arc<MemPool>,
    default_stream: Arc<Stream>,
    capabilities: DeviceCapabilities,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Device {
    pub(crate) fn new(id: usize, threads: usize, memory_limit: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("zkaccel-dev{}-{}", id, i))
            .build()
            .map_err(|e| AccelError::OutOfResources(format!("device {} worker pool: {}", id, e)))?;
        let pool = Arc::new(pool);

        let capabilities = DeviceCapabilities {
            threads: pool.current_num_threads(),
            memory_limit,
        };
        info!(
            device = id,
            threads = capabilities.threads,
            memory_mb = memory_limit / (1024 * 1024),
            "device initialized"
        );

        Ok(Self {
            id,
            kind: DeviceKind::Cpu,
            default_stream: Stream::new(id, Arc::clone(&pool)),
            mempool: MemPool::new(id, memory_limit),
            pool,
            capabilities,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn mempool(&self) -> &Arc<MemPool> {
        &self.mempool
    }

    pub fn default_stream(&self) -> &Arc<Stream> {
        &self.default_stream
    }

    /// Create an additional stream on this device
    pub fn create_stream(&self) -> Arc<Stream> {
        Stream::new(self.id, Arc::clone(&self.pool))
    }

    /// Check if the default pool could hold a buffer of `bytes`
    pub fn can_handle_buffer(&self, bytes: usize) -> bool {
        bytes <= self.mempool.available()
    }
}
