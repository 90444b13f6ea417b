//! Runtime configuration
//!
//! Values come from a TOML document or from the environment:
//!
//! - `ZKACCEL_DEVICES`: number of emulated devices (default: 1)
//! - `ZKACCEL_THREADS`: worker threads per device, 0 lets rayon decide (default: 0)
//! - `ZKACCEL_DEVICE_MEMORY_MB`: memory pool limit per device (default: 4096)
//! - `ZKACCEL_DEFAULT_DEVICE`: device used by `DeviceContext::default()` (default: 0)

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AccelError, Result};

const DEFAULT_DEVICE_MEMORY_MB: u64 = 4096;

/// Shape of the emulated accelerator fleet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// number of devices to create
    pub device_count: usize,
    /// worker threads per device (0 = rayon default)
    pub threads_per_device: usize,
    /// memory pool limit per device, in MiB
    pub device_memory_mb: u64,
    /// device backing `DeviceContext::default()`
    pub default_device: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            threads_per_device: 0,
            device_memory_mb: DEFAULT_DEVICE_MEMORY_MB,
            default_device: 0,
        }
    }
}

impl RuntimeConfig {
    /// Read configuration from `ZKACCEL_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            device_count: env_parse("ZKACCEL_DEVICES").unwrap_or(defaults.device_count),
            threads_per_device: env_parse("ZKACCEL_THREADS").unwrap_or(defaults.threads_per_device),
            device_memory_mb: env_parse("ZKACCEL_DEVICE_MEMORY_MB").unwrap_or(defaults.device_memory_mb),
            default_device: env_parse("ZKACCEL_DEFAULT_DEVICE").unwrap_or(defaults.default_device),
        }
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: Self = toml::from_str(src)
            .map_err(|e| AccelError::config(format!("runtime config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_count == 0 {
            return Err(AccelError::config("device_count must be at least 1"));
        }
        if self.default_device >= self.device_count {
            return Err(AccelError::config(format!(
                "default_device {} out of range ({} devices)",
                self.default_device, self.device_count
            )));
        }
        if self.device_memory_mb == 0 {
            return Err(AccelError::config("device_memory_mb must be positive"));
        }
        Ok(())
    }

    pub fn device_memory_bytes(&self) -> usize {
        usize::try_from(self.device_memory_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparsable {}='{}'", key, raw);
            None
        }
    }
}
