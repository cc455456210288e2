//! Subscriber registry and dispatch.
//!
//! Callers add and remove callbacks at any time, including while the
//! capture thread is mid-dispatch: delivery iterates a snapshot taken
//! under a short lock, so registration never waits on a slow subscriber.
//! A panicking subscriber is contained and logged; it can neither stop
//! delivery to the rest nor kill the capture loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::mailbox::DebugEvent;

/// Token returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(u32, &str) + Send + Sync>;

#[derive(Default)]
pub(crate) struct SubscriberSet {
    // Vec keeps dispatch in registration order.
    entries: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn add(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().unwrap().push((id, callback));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn dispatch(&self, event: &DebugEvent) {
        let snapshot: Vec<_> = self.entries.lock().unwrap().clone();
        for (id, callback) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(event.pid, &event.text)));
            if outcome.is_err() {
                log::error!("subscriber {id:?} panicked while handling a debug event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pid: u32, text: &str) -> DebugEvent {
        DebugEvent {
            pid,
            text: text.to_owned(),
        }
    }

    #[test]
    fn delivers_to_every_subscriber() {
        let set = SubscriberSet::default();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        for seen in [&seen_a, &seen_b] {
            let sink = seen.clone();
            set.add(Arc::new(move |pid, text: &str| {
                sink.lock().unwrap().push((pid, text.to_owned()));
            }));
        }

        set.dispatch(&event(11, "hello"));

        assert_eq!(*seen_a.lock().unwrap(), vec![(11, "hello".to_owned())]);
        assert_eq!(*seen_b.lock().unwrap(), vec![(11, "hello".to_owned())]);
    }

    #[test]
    fn removed_subscriber_no_longer_receives() {
        let set = SubscriberSet::default();
        let seen = Arc::new(Mutex::new(0u32));
        let sink = seen.clone();
        let id = set.add(Arc::new(move |_, _: &str| {
            *sink.lock().unwrap() += 1;
        }));

        set.dispatch(&event(1, "one"));
        assert!(set.remove(id));
        assert!(!set.remove(id), "second removal reports the id is gone");
        set.dispatch(&event(2, "two"));

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_the_rest() {
        let set = SubscriberSet::default();
        set.add(Arc::new(|_, _: &str| panic!("bad subscriber")));
        let seen = Arc::new(Mutex::new(0u32));
        let sink = seen.clone();
        set.add(Arc::new(move |_, _: &str| {
            *sink.lock().unwrap() += 1;
        }));

        set.dispatch(&event(3, "still delivered"));
        set.dispatch(&event(4, "and again"));

        assert_eq!(*seen.lock().unwrap(), 2);
    }
}
