//! Capture engine: lifecycle state machine around the broadcast protocol.
//!
//! Key responsibilities:
//! - Enforce the machine-wide single-consumer rule before touching the
//!   channel objects.
//! - Drive Stopped -> Starting -> Running -> Stopping -> Stopped, with
//!   every transition serialized under one coarse lock.
//! - Roll back partially acquired resources when `start()` fails, so a
//!   caller never observes a half-initialised monitor.
//! - On `stop()`, wake the blocked capture loop, wait for its completion
//!   signal (optionally bounded), then release everything in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, RecvTimeoutError, bounded};

use crate::config::MonitorConfig;
use crate::errors::{ResourceError, StartError, StopError};
use crate::transport::{self, NamedMutex, Transport};

pub mod mailbox;

mod channel;
mod subscribers;
mod worker;

use channel::SyncChannel;
use subscribers::SubscriberSet;
use worker::CaptureWorker;

pub use subscribers::SubscriptionId;

/// Where the monitor is in its lifecycle. `Starting` and `Stopping` are
/// only observable from other threads while a transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// The single consumer of the machine-wide debug-output broadcast.
///
/// An explicit instance with clear ownership: dropping it stops the
/// capture (best effort), and two instances in one process contend for
/// the same machine-wide singleton exactly like two processes would.
pub struct DebugEventMonitor {
    config: MonitorConfig,
    transport: Arc<dyn Transport>,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Arc<SubscriberSet>,
}

struct Lifecycle {
    state: MonitorState,
    session: Option<Session>,
}

/// Everything a running capture owns. Created whole by `start`, consumed
/// whole by `stop`.
struct Session {
    alive: Arc<AtomicBool>,
    channel: Arc<SyncChannel>,
    lock: Box<dyn NamedMutex>,
    thread: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl DebugEventMonitor {
    /// Monitor over the native transport: real machine-wide objects on
    /// Windows, an immediate `UnsupportedPlatform` from `start()` anywhere
    /// else.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_transport(config, transport::native())
    }

    /// Monitor over an explicit transport (the in-memory one in tests).
    pub fn with_transport(config: MonitorConfig, transport: Arc<dyn Transport>) -> Self {
        DebugEventMonitor {
            config,
            transport,
            lifecycle: Mutex::new(Lifecycle {
                state: MonitorState::Stopped,
                session: None,
            }),
            subscribers: Arc::new(SubscriberSet::default()),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle.lock().unwrap().state
    }

    /// Register a callback for every captured `(pid, text)` record.
    /// Subscribing is allowed in any state and while a dispatch is in
    /// progress; delivery starts with the next record.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(u32, &str) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(callback))
    }

    /// Remove a subscription. Returns false if the id was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Begin capturing. Fails with `AlreadyRunning` when this instance is
    /// not `Stopped` or when any other consumer on the machine holds the
    /// singleton; any setup failure rolls back every resource acquired so
    /// far before the error is returned.
    pub fn start(&self) -> Result<(), StartError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.state != MonitorState::Stopped {
            return Err(StartError::AlreadyRunning);
        }
        lifecycle.state = MonitorState::Starting;
        match self.acquire_session() {
            Ok(session) => {
                lifecycle.session = Some(session);
                lifecycle.state = MonitorState::Running;
                log::info!("debug-output capture running");
                Ok(())
            }
            Err(e) => {
                lifecycle.state = MonitorState::Stopped;
                Err(e)
            }
        }
    }

    /// Platform gate, singleton, channel, thread. Any failure releases
    /// what already exists, in release order.
    fn acquire_session(&self) -> Result<Session, StartError> {
        self.transport.ensure_supported()?;

        let mut lock = self.transport.create_named_mutex(mailbox::MUTEX_NAME)?;
        if lock.already_existed() {
            // Someone else is the consumer. We still received a handle to
            // their object; give it back and touch nothing further.
            release_lock(&mut *lock);
            return Err(StartError::AlreadyRunning);
        }

        let channel = match SyncChannel::setup(self.transport.as_ref()) {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                release_lock(&mut *lock);
                return Err(e.into());
            }
        };

        let alive = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = bounded(1);
        let worker = CaptureWorker {
            channel: channel.clone(),
            alive: alive.clone(),
            subscribers: self.subscribers.clone(),
            done_tx,
        };
        let thread = match thread::Builder::new()
            .name("dbgmon-capture".into())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                // The worker never ran, so this thread is the only owner.
                if let Ok(mut channel) = Arc::try_unwrap(channel) {
                    channel.close_all();
                }
                release_lock(&mut *lock);
                let code = e.raw_os_error().unwrap_or_default() as u32;
                return Err(ResourceError {
                    op: "spawn capture thread",
                    name: "dbgmon-capture".to_owned(),
                    code,
                }
                .into());
            }
        };

        Ok(Session {
            alive,
            channel,
            lock,
            thread: Some(thread),
            done_rx,
        })
    }

    /// Stop capturing: wake the loop, wait for it to drain, release the
    /// channel handles and then the singleton lock.
    ///
    /// Fails with `NotRunning` unless the monitor is `Running` (or left in
    /// `Stopping` by an earlier `DrainTimeout`, in which case the drain is
    /// retried). Must not be called from inside a subscriber callback: the
    /// drain would then be waiting on itself.
    pub fn stop(&self) -> Result<(), StopError> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        match lifecycle.state {
            MonitorState::Running | MonitorState::Stopping => {}
            _ => return Err(StopError::NotRunning),
        }
        if lifecycle.session.is_none() {
            return Err(StopError::NotRunning);
        }
        lifecycle.state = MonitorState::Stopping;
        let Some(session) = lifecycle.session.as_ref() else {
            return Err(StopError::NotRunning);
        };

        // Clear the sentinel first, then wake the blocked wait through the
        // same event the data path uses. The loop tells the two wakes
        // apart by the sentinel alone.
        session.alive.store(false, Ordering::Release);
        if let Err(e) = session.channel.force_wake() {
            log::warn!("shutdown wake failed: {e}");
        }

        match self.config.stop_timeout {
            Some(limit) => match session.done_rx.recv_timeout(limit) {
                Ok(()) => {}
                // The loop died without sending; nothing left to wait for.
                Err(RecvTimeoutError::Disconnected) => {}
                Err(RecvTimeoutError::Timeout) => {
                    log::error!("capture thread still alive after {limit:?}");
                    return Err(StopError::DrainTimeout(limit));
                }
            },
            None => {
                let _ = session.done_rx.recv();
            }
        }

        // Drained. Take ownership of the session and free everything.
        let Some(mut session) = lifecycle.session.take() else {
            return Err(StopError::NotRunning);
        };
        if let Some(thread) = session.thread.take() {
            if thread.join().is_err() {
                log::error!("capture thread panicked before exiting");
            }
        }
        match Arc::try_unwrap(session.channel) {
            Ok(mut channel) => channel.close_all(),
            // Joined, so nobody else can hold a clone; Drop is the backstop.
            Err(_) => log::error!("sync channel still shared after drain"),
        }
        release_lock(&mut *session.lock);
        lifecycle.state = MonitorState::Stopped;
        log::info!("debug-output capture stopped");
        Ok(())
    }
}

impl Drop for DebugEventMonitor {
    fn drop(&mut self) {
        // Best effort: a monitor dropped while running still releases its
        // machine-wide objects.
        let _ = self.stop();
    }
}

fn release_lock(lock: &mut dyn NamedMutex) {
    if let Err(e) = lock.close() {
        log::warn!("failed to release singleton lock {:?}: {e}", mailbox::MUTEX_NAME);
    }
}
