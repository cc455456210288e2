//! Sync channel: the two handshake events plus the mapped mailbox view.
//!
//! Setup acquires in a fixed order (ack event, data event, section view)
//! and rolls back whatever already exists when a later step fails, so a
//! failed `start()` leaves nothing behind. Teardown releases in the same
//! order and keeps going past individual failures.

use std::time::Duration;

use crate::transport::{NamedEvent, SectionView, Transport, TransportError, WaitOutcome};

use super::mailbox::{ACK_EVENT_NAME, BACKING_SIZE, DATA_EVENT_NAME, SECTION_NAME, VIEW_SIZE};

pub(crate) struct SyncChannel {
    ack: Box<dyn NamedEvent>,
    ready: Box<dyn NamedEvent>,
    view: Box<dyn SectionView>,
}

impl SyncChannel {
    /// Create both events and map the mailbox view.
    pub fn setup(transport: &dyn Transport) -> Result<SyncChannel, TransportError> {
        let mut ack = transport.create_named_event(ACK_EVENT_NAME)?;

        let mut ready = match transport.create_named_event(DATA_EVENT_NAME) {
            Ok(event) => event,
            Err(e) => {
                release(&mut *ack, ACK_EVENT_NAME);
                return Err(e);
            }
        };

        let view = match transport.map_named_section(SECTION_NAME, BACKING_SIZE, VIEW_SIZE) {
            Ok(view) => view,
            Err(e) => {
                release(&mut *ack, ACK_EVENT_NAME);
                release(&mut *ready, DATA_EVENT_NAME);
                return Err(e);
            }
        };

        Ok(SyncChannel { ack, ready, view })
    }

    /// Handshake step 1: tell producers the mailbox is free.
    pub fn signal_ack(&self) -> Result<(), TransportError> {
        self.ack.signal()
    }

    /// Handshake step 2: block until a producer (or `stop`) signals.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> Result<WaitOutcome, TransportError> {
        self.ready.wait(timeout)
    }

    /// The shutdown wake: reuse the data-ready event so a blocked capture
    /// loop wakes up and checks its liveness sentinel.
    pub fn force_wake(&self) -> Result<(), TransportError> {
        self.ready.signal()
    }

    pub fn view_len(&self) -> usize {
        self.view.len()
    }

    /// Copy the mailbox view into `frame`.
    pub fn read_mailbox(&self, frame: &mut [u8]) -> Result<(), TransportError> {
        self.view.read_into(frame)
    }

    /// Release everything, in order: ack event, data event, mailbox.
    /// Failures are logged, never raised, and never stop the remaining
    /// releases.
    pub fn close_all(&mut self) {
        release(&mut *self.ack, ACK_EVENT_NAME);
        release(&mut *self.ready, DATA_EVENT_NAME);
        if let Err(e) = self.view.close() {
            log::warn!("failed to release mailbox {SECTION_NAME:?}: {e}");
        }
    }
}

fn release(event: &mut dyn NamedEvent, name: &str) {
    if let Err(e) = event.close() {
        log::warn!("failed to release event {name:?}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::fake::FakeTransport;

    use super::*;

    #[test]
    fn setup_builds_all_three_handles() {
        let transport = FakeTransport::new();
        let channel = SyncChannel::setup(&transport).unwrap();
        assert_eq!(channel.view_len(), VIEW_SIZE);
    }

    #[test]
    fn failed_mapping_rolls_back_the_events() {
        let transport = FakeTransport::new();
        transport.set_fail_sections(true);
        assert!(SyncChannel::setup(&transport).is_err());

        // The events must be closed again: a fresh setup succeeds.
        transport.set_fail_sections(false);
        assert!(SyncChannel::setup(&transport).is_ok());
    }

    #[test]
    fn close_all_is_idempotent() {
        let transport = FakeTransport::new();
        let mut channel = SyncChannel::setup(&transport).unwrap();
        channel.close_all();
        channel.close_all();
    }

    #[test]
    fn forced_wake_is_observed_as_ready() {
        let transport = FakeTransport::new();
        let channel = SyncChannel::setup(&transport).unwrap();
        channel.force_wake().unwrap();
        assert_eq!(
            channel.wait_ready(Some(Duration::from_millis(50))).unwrap(),
            WaitOutcome::Signaled
        );
    }
}
