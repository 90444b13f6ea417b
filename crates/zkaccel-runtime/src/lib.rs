//! Accelerator runtime for zkaccel engines
//!
//! Provides the execution model every engine builds on:
//!
//! - **Devices**: host-emulated accelerators, each with its own worker pool
//!   and memory budget
//! - **Streams**: ordered launch queues bound to one device
//! - **Buffers**: [`HostSlice`] for borrowed host memory, [`DeviceVec`] for
//!   owned device memory; residency is part of the type
//! - **Contexts**: [`DeviceContext`] picks device, stream and memory pool for
//!   a call
//!
//! # Configuration
//!
//! The runtime starts lazily from `ZKACCEL_*` environment variables (see
//! [`RuntimeConfig`]), or explicitly through [`runtime::init`]:
//!
//! ```no_run
//! use zkaccel_runtime::{runtime, DeviceContext, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_toml_str("device_count = 2").unwrap();
//! runtime::init(config).unwrap();
//! let ctx = DeviceContext::new(1).unwrap();
//! assert_eq!(ctx.device_id(), 1);
//! ```

mod config;
mod context;
mod device;
mod error;
mod memory;
pub mod runtime;
mod stream;

pub use config::RuntimeConfig;
pub use context::DeviceContext;
pub use device::{Device, DeviceCapabilities, DeviceKind};
pub use error::{AccelError, ErrorKind, Result};
pub use memory::{Allocation, DeviceVec, HostOrDeviceSlice, HostSlice, MemPool};
pub use stream::Stream;
