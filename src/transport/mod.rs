//! Named-object transport abstraction.
//!
//! The capture protocol is built entirely from machine-wide named
//! synchronization objects: one mutex, two auto-reset events, one shared
//! memory section. This module isolates those primitives behind a small
//! trait so the handshake and the lifecycle state machine never call the
//! OS directly.
//!
//! Key responsibilities:
//! - Define the `Transport` factory trait and the per-handle traits
//!   (`NamedMutex`, `NamedEvent`, `SectionView`).
//! - Select the native implementation on Windows and a stub that fails
//!   the platform gate everywhere else.
//! - Host the in-memory implementation (`fake`) used by the test suite
//!   and by code running where the broadcast facility does not exist.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod fake;
#[cfg(windows)]
pub mod windows;

/// Transport-level failure. Converted into the public error surface at
/// the lifecycle boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The current platform does not expose the broadcast facility.
    #[error("the debug-output broadcast facility is not available on this platform")]
    Unsupported,
    /// A native call failed; `code` is the raw OS error.
    #[error("{op} failed for {name:?} (os error {code})")]
    Os {
        op: &'static str,
        name: String,
        code: u32,
    },
    /// Operation attempted on a handle that was already closed.
    #[error("{op} attempted on closed handle {name:?}")]
    Closed { op: &'static str, name: String },
}

/// Outcome of a blocking wait on a named event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Machine-wide mutual-exclusion object. Used here only to enforce the
/// single-consumer rule, never for intra-process locking.
pub trait NamedMutex: Send + Sync {
    /// Whether creation found an object of this name already alive
    /// somewhere on the machine.
    fn already_existed(&self) -> bool;

    /// Relinquish and close the handle. Idempotent: closing a closed
    /// handle is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Auto-reset synchronization event: a signal wakes exactly one waiter,
/// then the event re-arms to unsignaled.
pub trait NamedEvent: Send + Sync {
    fn signal(&self) -> Result<(), TransportError>;

    /// Block until signaled. `None` waits indefinitely.
    fn wait(&self, timeout: Option<Duration>) -> Result<WaitOutcome, TransportError>;

    /// Close the handle. Idempotent.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Read-only view of a named shared-memory section. The consumer never
/// writes through this.
pub trait SectionView: Send + Sync {
    /// Number of bytes visible through the view.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the view (up to `dst.len()` bytes) into `dst`.
    fn read_into(&self, dst: &mut [u8]) -> Result<(), TransportError>;

    /// Unmap the view and close the backing object. Idempotent.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for the named objects the protocol needs.
pub trait Transport: Send + Sync {
    /// Platform gate. Runs first in `start()`, before any resource is
    /// touched.
    fn ensure_supported(&self) -> Result<(), TransportError>;

    /// Create (or open, if it already exists) a machine-wide named mutex.
    fn create_named_mutex(&self, name: &str) -> Result<Box<dyn NamedMutex>, TransportError>;

    /// Create (or open) a named auto-reset event, initially unsignaled.
    fn create_named_event(&self, name: &str) -> Result<Box<dyn NamedEvent>, TransportError>;

    /// Create (or open) a named section of `backing` bytes and map a
    /// read-only view of the first `view` bytes.
    fn map_named_section(
        &self,
        name: &str,
        backing: usize,
        view: usize,
    ) -> Result<Box<dyn SectionView>, TransportError>;
}

/// Stub transport for platforms without the broadcast facility. Every
/// operation fails the platform gate.
#[cfg(not(windows))]
struct UnsupportedTransport;

#[cfg(not(windows))]
impl Transport for UnsupportedTransport {
    fn ensure_supported(&self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }

    fn create_named_mutex(&self, _name: &str) -> Result<Box<dyn NamedMutex>, TransportError> {
        Err(TransportError::Unsupported)
    }

    fn create_named_event(&self, _name: &str) -> Result<Box<dyn NamedEvent>, TransportError> {
        Err(TransportError::Unsupported)
    }

    fn map_named_section(
        &self,
        _name: &str,
        _backing: usize,
        _view: usize,
    ) -> Result<Box<dyn SectionView>, TransportError> {
        Err(TransportError::Unsupported)
    }
}

/// The transport `DebugEventMonitor::new` uses: real OS objects on
/// Windows, a stub that fails `ensure_supported` anywhere else.
pub fn native() -> Arc<dyn Transport> {
    #[cfg(windows)]
    {
        Arc::new(self::windows::WindowsTransport::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(UnsupportedTransport)
    }
}
