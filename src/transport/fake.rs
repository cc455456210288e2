//! In-memory transport.
//!
//! Stands in for the machine-wide named objects so the handshake and the
//! lifecycle state machine can be exercised without the OS facility: a
//! registry of named events, mutexes, and section buffers shared by every
//! clone of the transport. Clones act like separate processes attached to
//! the same machine, which is what the producer-side helpers
//! (`publish` and friends) rely on.
//!
//! Lifetime rules mirror the native objects: an entry lives while at
//! least one handle to it is open and vanishes with the last close, so no
//! latched signal or stale mailbox can leak into a later capture session.
//! Auto-reset semantics match too: a signal wakes exactly one waiter and
//! the event re-arms to unsignaled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::capture::mailbox::{ACK_EVENT_NAME, BACKING_SIZE, DATA_EVENT_NAME, SECTION_NAME};

use super::{NamedEvent, NamedMutex, SectionView, Transport, TransportError, WaitOutcome};

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    registry: Mutex<Registry>,
    fail_events: AtomicBool,
    fail_sections: AtomicBool,
}

#[derive(Default)]
struct Registry {
    mutexes: HashMap<String, usize>,
    events: HashMap<String, EventEntry>,
    sections: HashMap<String, SectionEntry>,
}

struct EventEntry {
    event: Arc<FakeEvent>,
    handles: usize,
}

struct SectionEntry {
    buf: Arc<Mutex<Vec<u8>>>,
    handles: usize,
}

impl Registry {
    fn drop_event_handle(&mut self, name: &str) {
        if let Some(entry) = self.events.get_mut(name) {
            entry.handles -= 1;
            if entry.handles == 0 {
                self.events.remove(name);
            }
        }
    }

    fn drop_section_handle(&mut self, name: &str) {
        if let Some(entry) = self.sections.get_mut(name) {
            entry.handles -= 1;
            if entry.handles == 0 {
                self.sections.remove(name);
            }
        }
    }
}

#[derive(Default)]
struct FakeEvent {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl FakeEvent {
    fn signal(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.cv.notify_one();
    }

    fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut signaled = self.signaled.lock().unwrap();
        match timeout {
            None => {
                while !*signaled {
                    signaled = self.cv.wait(signaled).unwrap();
                }
            }
            Some(t) => {
                let deadline = Instant::now() + t;
                while !*signaled {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return WaitOutcome::TimedOut;
                    }
                    signaled = self.cv.wait_timeout(signaled, left).unwrap().0;
                }
            }
        }
        // Auto-reset: this waiter consumes the signal.
        *signaled = false;
        WaitOutcome::Signaled
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following named-event creation fail, as if the OS ran
    /// out of handles.
    pub fn set_fail_events(&self, on: bool) {
        self.inner.fail_events.store(on, Ordering::SeqCst);
    }

    /// Make every following section mapping fail.
    pub fn set_fail_sections(&self, on: bool) {
        self.inner.fail_sections.store(on, Ordering::SeqCst);
    }

    /// Live handle count for a named mutex; 0 once everything released it.
    pub fn mutex_handle_count(&self, name: &str) -> usize {
        self.inner
            .registry
            .lock()
            .unwrap()
            .mutexes
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Number of named objects somebody still holds a handle to.
    pub fn live_named_objects(&self) -> usize {
        let registry = self.inner.registry.lock().unwrap();
        registry.mutexes.values().filter(|&&count| count > 0).count()
            + registry.events.values().filter(|e| e.handles > 0).count()
            + registry.sections.values().filter(|s| s.handles > 0).count()
    }

    /// Get-or-create without registering a handle; producer helpers touch
    /// the objects only transiently.
    fn event(&self, name: &str) -> Arc<FakeEvent> {
        let mut registry = self.inner.registry.lock().unwrap();
        registry
            .events
            .entry(name.to_owned())
            .or_insert_with(|| EventEntry {
                event: Arc::default(),
                handles: 0,
            })
            .event
            .clone()
    }

    fn section(&self, name: &str, backing: usize) -> Arc<Mutex<Vec<u8>>> {
        let mut registry = self.inner.registry.lock().unwrap();
        registry
            .sections
            .entry(name.to_owned())
            .or_insert_with(|| SectionEntry {
                buf: Arc::new(Mutex::new(vec![0u8; backing])),
                handles: 0,
            })
            .buf
            .clone()
    }

    // ---- producer half, for tests and demos -------------------------------
    //
    // A well-behaved producer takes its turn: wait for the consumer's ack,
    // write the mailbox, signal data-ready.

    /// Wait until the consumer signals "mailbox free". Consumes the signal.
    pub fn await_ack(&self, timeout: Duration) -> bool {
        matches!(
            self.event(ACK_EVENT_NAME).wait(Some(timeout)),
            WaitOutcome::Signaled
        )
    }

    /// Write `(pid, text)` into the mailbox using the broadcast layout:
    /// little-endian pid, then NUL-terminated text, silently truncated to
    /// the backing capacity.
    pub fn write_message(&self, pid: u32, text: &str) {
        let section = self.section(SECTION_NAME, BACKING_SIZE);
        let mut buf = section.lock().unwrap();
        buf[..4].copy_from_slice(&pid.to_le_bytes());
        let capacity = buf.len() - 4;
        let bytes = text.as_bytes();
        let n = bytes.len().min(capacity);
        buf[4..4 + n].copy_from_slice(&bytes[..n]);
        if n < capacity {
            buf[4 + n] = 0;
        }
    }

    /// Wake the consumer: "data is in the mailbox".
    pub fn signal_ready(&self) {
        self.event(DATA_EVENT_NAME).signal();
    }

    /// Full producer turn. Returns false if the consumer never signalled
    /// ack within `timeout`.
    pub fn publish(&self, pid: u32, text: &str, timeout: Duration) -> bool {
        if !self.await_ack(timeout) {
            return false;
        }
        self.write_message(pid, text);
        self.signal_ready();
        true
    }
}

impl Transport for FakeTransport {
    fn ensure_supported(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn create_named_mutex(&self, name: &str) -> Result<Box<dyn NamedMutex>, TransportError> {
        let mut registry = self.inner.registry.lock().unwrap();
        let count = registry.mutexes.entry(name.to_owned()).or_insert(0);
        let already_existed = *count > 0;
        *count += 1;
        Ok(Box::new(FakeMutexHandle {
            inner: self.inner.clone(),
            name: name.to_owned(),
            already_existed,
            open: true,
        }))
    }

    fn create_named_event(&self, name: &str) -> Result<Box<dyn NamedEvent>, TransportError> {
        if self.inner.fail_events.load(Ordering::SeqCst) {
            return Err(TransportError::Os {
                op: "create_named_event",
                name: name.to_owned(),
                code: 1450, // ERROR_NO_SYSTEM_RESOURCES
            });
        }
        let event = {
            let mut registry = self.inner.registry.lock().unwrap();
            let entry = registry
                .events
                .entry(name.to_owned())
                .or_insert_with(|| EventEntry {
                    event: Arc::default(),
                    handles: 0,
                });
            entry.handles += 1;
            entry.event.clone()
        };
        Ok(Box::new(FakeEventHandle {
            inner: self.inner.clone(),
            event,
            name: name.to_owned(),
            open: true,
        }))
    }

    fn map_named_section(
        &self,
        name: &str,
        backing: usize,
        view: usize,
    ) -> Result<Box<dyn SectionView>, TransportError> {
        if self.inner.fail_sections.load(Ordering::SeqCst) {
            return Err(TransportError::Os {
                op: "map_named_section",
                name: name.to_owned(),
                code: 8, // ERROR_NOT_ENOUGH_MEMORY
            });
        }
        let buf = {
            let mut registry = self.inner.registry.lock().unwrap();
            let entry = registry
                .sections
                .entry(name.to_owned())
                .or_insert_with(|| SectionEntry {
                    buf: Arc::new(Mutex::new(vec![0u8; backing])),
                    handles: 0,
                });
            entry.handles += 1;
            entry.buf.clone()
        };
        Ok(Box::new(FakeViewHandle {
            inner: self.inner.clone(),
            buf,
            view_len: view.min(backing),
            name: name.to_owned(),
            open: true,
        }))
    }
}

struct FakeMutexHandle {
    inner: Arc<Inner>,
    name: String,
    already_existed: bool,
    open: bool,
}

impl NamedMutex for FakeMutexHandle {
    fn already_existed(&self) -> bool {
        self.already_existed
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut registry = self.inner.registry.lock().unwrap();
        if let Some(count) = registry.mutexes.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                registry.mutexes.remove(&self.name);
            }
        }
        Ok(())
    }
}

impl Drop for FakeMutexHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct FakeEventHandle {
    inner: Arc<Inner>,
    event: Arc<FakeEvent>,
    name: String,
    open: bool,
}

impl NamedEvent for FakeEventHandle {
    fn signal(&self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed {
                op: "signal",
                name: self.name.clone(),
            });
        }
        self.event.signal();
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<WaitOutcome, TransportError> {
        if !self.open {
            return Err(TransportError::Closed {
                op: "wait",
                name: self.name.clone(),
            });
        }
        Ok(self.event.wait(timeout))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.inner.registry.lock().unwrap().drop_event_handle(&self.name);
        Ok(())
    }
}

impl Drop for FakeEventHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct FakeViewHandle {
    inner: Arc<Inner>,
    buf: Arc<Mutex<Vec<u8>>>,
    view_len: usize,
    name: String,
    open: bool,
}

impl SectionView for FakeViewHandle {
    fn len(&self) -> usize {
        self.view_len
    }

    fn read_into(&self, dst: &mut [u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed {
                op: "read view",
                name: self.name.clone(),
            });
        }
        let buf = self.buf.lock().unwrap();
        let n = dst.len().min(self.view_len).min(buf.len());
        dst[..n].copy_from_slice(&buf[..n]);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.inner.registry.lock().unwrap().drop_section_handle(&self.name);
        Ok(())
    }
}

impl Drop for FakeViewHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
