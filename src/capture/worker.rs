//! The capture loop.
//!
//! One dedicated thread owns the consumer half of the ping-pong
//! handshake. Each turn: signal ack ("mailbox free"), block on data-ready,
//! then either exit (the liveness sentinel was cleared, so this wake came
//! from `stop`) or copy the view, decode it, and fan the record out to the
//! subscriber snapshot.
//!
//! After signalling ack the loop must not touch the mailbox until ready
//! fires again; that alternation is the whole protocol. Whatever path the
//! loop exits by, it sends its completion signal exactly once so the stop
//! drain has a well-defined event to wait on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::Sender;

use super::channel::SyncChannel;
use super::mailbox;
use super::subscribers::SubscriberSet;
use crate::transport::WaitOutcome;

pub(crate) struct CaptureWorker {
    pub channel: Arc<SyncChannel>,
    pub alive: Arc<AtomicBool>,
    pub subscribers: Arc<SubscriberSet>,
    pub done_tx: Sender<()>,
}

impl CaptureWorker {
    pub fn run(self) {
        log::debug!("capture loop started");
        let mut frame = vec![0u8; self.channel.view_len()];
        loop {
            if let Err(e) = self.channel.signal_ack() {
                log::error!("capture loop cannot signal readiness: {e}");
                break;
            }
            match self.channel.wait_ready(None) {
                Ok(WaitOutcome::Signaled) => {}
                // Unreachable with an indefinite wait; re-arm and keep going.
                Ok(WaitOutcome::TimedOut) => continue,
                Err(e) => {
                    log::error!("capture loop wait failed: {e}");
                    break;
                }
            }
            if !self.alive.load(Ordering::Acquire) {
                // Shutdown wake, not a data wake: leave the mailbox alone.
                log::debug!("capture loop observed shutdown");
                break;
            }
            if let Err(e) = self.channel.read_mailbox(&mut frame) {
                log::error!("capture loop cannot read the mailbox: {e}");
                break;
            }
            match mailbox::decode(&frame) {
                Some(event) => self.subscribers.dispatch(&event),
                None => log::warn!("mailbox frame shorter than its header, dropped"),
            }
        }
        // Completion signal: stop() blocks on this before reclaiming the
        // handles. Send exactly once, on every exit path.
        let _ = self.done_tx.send(());
        log::debug!("capture loop exited");
    }
}
