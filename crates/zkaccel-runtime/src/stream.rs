//! Ordered execution queues
//!
//! A stream serializes every launch issued on it, so work enqueued on one
//! stream runs in issue order. Kernels execute on the owning device's thread
//! pool; a panic inside a kernel is caught at this boundary and reported as
//! [`AccelError::ExecutionFailed`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rayon::ThreadPool;
use tracing::{debug, trace};

use crate::{AccelError, Result};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

pub struct Stream {
    id: u64,
    device_id: usize,
    pool: Arc<ThreadPool>,
    order: Mutex<()>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(device_id: usize, pool: Arc<ThreadPool>) -> Arc<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        debug!(stream = id, device = device_id, "created stream");
        Arc::new(Self {
            id,
            device_id,
            pool,
            order: Mutex::new(()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Run `kernel` on the device, after everything previously issued here
    pub fn launch<R, K>(&self, name: &str, kernel: K) -> Result<R>
    where
        R: Send,
        K: FnOnce() -> R + Send,
    {
        self.ensure_live(name)?;
        let _order = self
            .order
            .lock()
            .map_err(|_| AccelError::ExecutionFailed(format!("stream {} is poisoned", self.id)))?;
        trace!(stream = self.id, kernel = name, "launch");

        self.pool
            .install(|| panic::catch_unwind(AssertUnwindSafe(kernel)))
            .map_err(|payload| {
                AccelError::ExecutionFailed(format!("{} faulted: {}", name, panic_message(payload.as_ref())))
            })
    }

    /// Block until all work issued on this stream has completed
    pub fn synchronize(&self) -> Result<()> {
        self.ensure_live("synchronize")?;
        let _order = self
            .order
            .lock()
            .map_err(|_| AccelError::ExecutionFailed(format!("stream {} is poisoned", self.id)))?;
        Ok(())
    }

    /// Retire the stream; later launches fail with a precondition error
    pub fn destroy(&self) -> Result<()> {
        let _order = self
            .order
            .lock()
            .map_err(|_| AccelError::ExecutionFailed(format!("stream {} is poisoned", self.id)))?;
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(AccelError::Precondition(format!("stream {} already destroyed", self.id)));
        }
        debug!(stream = self.id, "destroyed stream");
        Ok(())
    }

    fn ensure_live(&self, what: &str) -> Result<()> {
        if self.is_destroyed() {
            return Err(AccelError::Precondition(format!(
                "{} on destroyed stream {}",
                what, self.id
            )));
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn test_stream() -> Arc<Stream> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        Stream::new(0, Arc::new(pool))
    }

    #[test]
    fn test_launch_returns_value() {
        let stream = test_stream();
        assert_eq!(stream.launch("sum", || (1..=4).sum::<u32>()).unwrap(), 10);
    }

    #[test]
    fn test_panic_becomes_execution_error() {
        let stream = test_stream();
        let err = stream
            .launch("boom", || -> u32 { panic!("bad kernel") })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().contains("bad kernel"));

        // the stream stays usable after a faulted kernel
        assert_eq!(stream.launch("after", || 3).unwrap(), 3);
    }

    #[test]
    fn test_destroyed_stream_rejects_work() {
        let stream = test_stream();
        stream.destroy().unwrap();
        assert_eq!(stream.launch("late", || ()).unwrap_err().kind(), ErrorKind::Precondition);
        assert_eq!(stream.synchronize().unwrap_err().kind(), ErrorKind::Precondition);
        assert_eq!(stream.destroy().unwrap_err().kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_concurrent_launches_serialize() {
        let stream = test_stream();
        let log = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for i in 0..8 {
                let stream = &stream;
                let log = &log;
                scope.spawn(move || {
                    stream
                        .launch("push", || {
                            let mut guard = log.lock().unwrap();
                            guard.push(i);
                            guard.len()
                        })
                        .unwrap()
                });
            }
        });
        assert_eq!(log.into_inner().unwrap().len(), 8);
    }
}
