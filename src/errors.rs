//! Error surface of the monitor.
//!
//! Acquisition failures abort `start()` after a full rollback, so callers
//! never observe a half-initialised monitor. Release failures during
//! teardown are logged and swallowed; by that point the monitor is already
//! on its way to `Stopped` and one stuck handle must not block the rest.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// A named-object creation or mapping failure, with the OS error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} failed for {name:?} (os error {code})")]
pub struct ResourceError {
    /// The native call or transport operation that failed.
    pub op: &'static str,
    /// Name of the OS object involved.
    pub name: String,
    /// Raw OS error code, 0 when the platform did not supply one.
    pub code: u32,
}

/// Why `start()` refused or failed.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("debug-output capture is not supported on this platform")]
    UnsupportedPlatform,
    /// This monitor is already running, or another process on the machine
    /// holds the capture singleton.
    #[error("a debug-output monitor is already running on this machine")]
    AlreadyRunning,
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Why `stop()` refused or failed.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("the monitor is not running")]
    NotRunning,
    /// The capture thread did not confirm its exit in time. The monitor
    /// stays in `Stopping`; calling `stop()` again retries the drain.
    #[error("capture thread did not exit within {0:?}")]
    DrainTimeout(Duration),
}

impl From<TransportError> for ResourceError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Os { op, name, code } => ResourceError { op, name, code },
            TransportError::Unsupported => ResourceError {
                op: "platform check",
                name: String::new(),
                code: 0,
            },
            TransportError::Closed { op, name } => ResourceError { op, name, code: 0 },
        }
    }
}

impl From<TransportError> for StartError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unsupported => StartError::UnsupportedPlatform,
            other => StartError::Resource(other.into()),
        }
    }
}
