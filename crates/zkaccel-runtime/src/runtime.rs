//! Process-wide device registry

use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::{AccelError, Device, Result, RuntimeConfig};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The set of devices available to this process
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    devices: Vec<Arc<Device>>,
}

impl Runtime {
    fn start(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let devices = (0..config.device_count)
            .map(|id| {
                Device::new(id, config.threads_per_device, config.device_memory_bytes()).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        info!(devices = devices.len(), "runtime started");
        Ok(Self { config, devices })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, id: usize) -> Result<Arc<Device>> {
        self.devices.get(id).cloned().ok_or_else(|| {
            AccelError::config(format!("device {} does not exist ({} devices)", id, self.devices.len()))
        })
    }

    pub fn default_device(&self) -> Result<Arc<Device>> {
        self.device(self.config.default_device)
    }
}

/// Start the runtime with an explicit configuration
///
/// Calling this again with the same configuration is a no-op; a different
/// configuration after startup is a precondition error.
pub fn init(config: RuntimeConfig) -> Result<&'static Runtime> {
    if let Some(existing) = RUNTIME.get() {
        return check_same(existing, &config);
    }
    let runtime = Runtime::start(config.clone())?;
    if RUNTIME.set(runtime).is_err() {
        warn!("runtime was started concurrently; keeping the first instance");
    }
    let started = get()?;
    check_same(started, &config)
}

/// The running runtime, started from the environment on first use
pub fn get() -> Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let mut config = RuntimeConfig::from_env();
    if let Err(e) = config.validate() {
        warn!("invalid runtime environment ({}), using defaults", e);
        config = RuntimeConfig::default();
    }
    let runtime = Runtime::start(config)?;
    // a concurrent starter may win; either instance is equivalent
    let _ = RUNTIME.set(runtime);
    RUNTIME
        .get()
        .ok_or_else(|| AccelError::ExecutionFailed("runtime failed to start".into()))
}

pub fn device(id: usize) -> Result<Arc<Device>> {
    get()?.device(id)
}

pub fn device_count() -> Result<usize> {
    Ok(get()?.device_count())
}

fn check_same(runtime: &'static Runtime, config: &RuntimeConfig) -> Result<&'static Runtime> {
    if runtime.config() == config {
        Ok(runtime)
    } else {
        Err(AccelError::Precondition(
            "runtime already started with a different configuration".into(),
        ))
    }
}
