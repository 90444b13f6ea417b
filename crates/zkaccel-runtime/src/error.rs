//! Error taxonomy shared by every engine

use thiserror::Error;

/// Coarse classification of an [`AccelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid sizes, shapes or parameters; detected before any work is issued
    Configuration,
    /// Device memory or another accelerator resource is exhausted
    Resource,
    /// The device faulted while running a kernel
    Execution,
    /// A resource was used in the wrong lifecycle state
    Precondition,
}

/// Errors reported by the runtime and the engines
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccelError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device resources exhausted: {0}")]
    OutOfResources(String),

    #[error("kernel execution failed: {0}")]
    ExecutionFailed(String),

    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl AccelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccelError::InvalidConfig(_) => ErrorKind::Configuration,
            AccelError::OutOfResources(_) => ErrorKind::Resource,
            AccelError::ExecutionFailed(_) => ErrorKind::Execution,
            AccelError::Precondition(_) => ErrorKind::Precondition,
        }
    }

    /// Shorthand for building a configuration error from format arguments
    pub fn config(msg: impl Into<String>) -> Self {
        AccelError::InvalidConfig(msg.into())
    }
}

pub type Result<T> = core::result::Result<T, AccelError>;
