//! Single-consumer capture agent for the machine-wide debug-output
//! broadcast channel.
//!
//! Any process can drop a short `(pid, text)` message into the shared
//! mailbox; this crate implements the one allowed consumer: singleton
//! enforcement over a named mutex, the two-event ping-pong handshake,
//! a background capture loop, and a Start/Stop lifecycle with rollback
//! and drain semantics.
//!
//! ```no_run
//! use dbgmon::{DebugEventMonitor, MonitorConfig};
//!
//! let monitor = DebugEventMonitor::new(MonitorConfig::default());
//! monitor.subscribe(|pid, text| println!("[{pid}] {text}"));
//! monitor.start()?;
//! // ... capture runs on its own thread ...
//! monitor.stop()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capture;
pub mod config;
pub mod errors;
pub mod transport;

pub use capture::mailbox::DebugEvent;
pub use capture::{DebugEventMonitor, MonitorState, SubscriptionId};
pub use config::{AppConfig, MonitorConfig, OutputMode};
pub use errors::{ResourceError, StartError, StopError};
