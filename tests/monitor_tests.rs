//! End-to-end tests of the capture engine over the in-memory transport.
//!
//! The transport clones act as producer processes: each `publish` takes a
//! full producer turn (wait for ack, write the mailbox, signal ready), so
//! these tests exercise the real handshake, not a shortcut around it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use dbgmon::capture::mailbox::{MUTEX_NAME, TEXT_CAPACITY};
use dbgmon::transport::fake::FakeTransport;
use dbgmon::{DebugEventMonitor, MonitorConfig, MonitorState, StartError, StopError};

const PUBLISH_WAIT: Duration = Duration::from_secs(5);

fn monitor_on(transport: &FakeTransport) -> DebugEventMonitor {
    DebugEventMonitor::with_transport(MonitorConfig::default(), Arc::new(transport.clone()))
}

/// Poll `cond` until it holds or `deadline` passes.
fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

type Sink = Arc<Mutex<Vec<(u32, String)>>>;

fn collecting_subscriber(monitor: &DebugEventMonitor) -> Sink {
    let sink: Sink = Arc::default();
    let records = sink.clone();
    monitor.subscribe(move |pid, text| {
        records.lock().unwrap().push((pid, text.to_owned()));
    });
    sink
}

#[test]
fn captures_and_dispatches_to_every_subscriber() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    let first = collecting_subscriber(&monitor);
    let second = collecting_subscriber(&monitor);

    monitor.start().unwrap();
    assert_eq!(monitor.state(), MonitorState::Running);
    assert!(transport.publish(4321, "boot sequence complete", PUBLISH_WAIT));

    for sink in [&first, &second] {
        assert!(wait_until(PUBLISH_WAIT, || !sink.lock().unwrap().is_empty()));
        assert_eq!(
            *sink.lock().unwrap(),
            vec![(4321, "boot sequence complete".to_owned())]
        );
    }
    monitor.stop().unwrap();
}

#[test]
fn handshake_rearms_between_records() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    let sink = collecting_subscriber(&monitor);

    monitor.start().unwrap();
    // Each publish waits for the consumer's fresh ack, which is only
    // signalled after the previous record was dispatched; three in a row
    // therefore prove the loop re-arms, in order.
    for (pid, text) in [(1, "first"), (2, "second"), (3, "third")] {
        assert!(transport.publish(pid, text, PUBLISH_WAIT));
    }

    assert!(wait_until(PUBLISH_WAIT, || sink.lock().unwrap().len() == 3));
    assert_eq!(
        *sink.lock().unwrap(),
        vec![
            (1, "first".to_owned()),
            (2, "second".to_owned()),
            (3, "third".to_owned()),
        ]
    );
    monitor.stop().unwrap();
}

#[test]
fn overlong_text_is_truncated_to_the_view_capacity() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    let sink = collecting_subscriber(&monitor);

    monitor.start().unwrap();
    let long = "a".repeat(600);
    assert!(transport.publish(77, &long, PUBLISH_WAIT));

    assert!(wait_until(PUBLISH_WAIT, || !sink.lock().unwrap().is_empty()));
    let records = sink.lock().unwrap();
    assert_eq!(records[0].0, 77);
    assert_eq!(records[0].1.len(), TEXT_CAPACITY);
    assert!(records[0].1.bytes().all(|b| b == b'a'));
    drop(records);
    monitor.stop().unwrap();
}

#[test]
fn second_consumer_is_rejected_until_the_first_stops() {
    let transport = FakeTransport::new();
    let first = monitor_on(&transport);
    let second = monitor_on(&transport);

    first.start().unwrap();
    assert!(matches!(second.start(), Err(StartError::AlreadyRunning)));
    assert_eq!(second.state(), MonitorState::Stopped);

    first.stop().unwrap();
    second.start().unwrap();
    second.stop().unwrap();
}

#[test]
fn start_while_running_is_already_running() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    monitor.start().unwrap();
    assert!(matches!(monitor.start(), Err(StartError::AlreadyRunning)));
    monitor.stop().unwrap();
}

#[test]
fn stop_when_stopped_is_not_running() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    assert!(matches!(monitor.stop(), Err(StopError::NotRunning)));
    assert_eq!(monitor.state(), MonitorState::Stopped);

    monitor.start().unwrap();
    monitor.stop().unwrap();
    assert!(matches!(monitor.stop(), Err(StopError::NotRunning)));
}

#[test]
fn restart_cycles_release_every_named_object() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);

    for cycle in 0..3 {
        monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Running, "cycle {cycle}");
        monitor.stop().unwrap();
        assert_eq!(monitor.state(), MonitorState::Stopped, "cycle {cycle}");
    }
    assert_eq!(transport.mutex_handle_count(MUTEX_NAME), 0);
    assert_eq!(transport.live_named_objects(), 0);
}

#[test]
fn failed_mapping_rolls_back_everything() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);

    transport.set_fail_sections(true);
    assert!(matches!(monitor.start(), Err(StartError::Resource(_))));
    assert_eq!(monitor.state(), MonitorState::Stopped);
    // Rollback must not strand the singleton: the next attempt would
    // otherwise die with AlreadyRunning.
    assert_eq!(transport.mutex_handle_count(MUTEX_NAME), 0);
    assert_eq!(transport.live_named_objects(), 0);

    transport.set_fail_sections(false);
    monitor.start().unwrap();
    monitor.stop().unwrap();
}

#[test]
fn failed_event_creation_rolls_back_the_singleton() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);

    transport.set_fail_events(true);
    assert!(matches!(monitor.start(), Err(StartError::Resource(_))));
    assert_eq!(transport.live_named_objects(), 0);

    transport.set_fail_events(false);
    monitor.start().unwrap();
    monitor.stop().unwrap();
}

#[test]
fn panicking_subscriber_does_not_stop_the_loop() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    monitor.subscribe(|_, _| panic!("misbehaving subscriber"));
    let sink = collecting_subscriber(&monitor);

    monitor.start().unwrap();
    assert!(transport.publish(10, "one", PUBLISH_WAIT));
    assert!(transport.publish(11, "two", PUBLISH_WAIT));

    assert!(wait_until(PUBLISH_WAIT, || sink.lock().unwrap().len() == 2));
    monitor.stop().unwrap();
}

#[test]
fn unsubscribed_callback_no_longer_receives() {
    let transport = FakeTransport::new();
    let monitor = monitor_on(&transport);
    let counter = Arc::new(AtomicUsize::new(0));
    let counted = counter.clone();
    let id = monitor.subscribe(move |_, _| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    let sink = collecting_subscriber(&monitor);

    monitor.start().unwrap();
    assert!(transport.publish(1, "before", PUBLISH_WAIT));
    assert!(wait_until(PUBLISH_WAIT, || sink.lock().unwrap().len() == 1));

    assert!(monitor.unsubscribe(id));
    assert!(transport.publish(2, "after", PUBLISH_WAIT));
    assert!(wait_until(PUBLISH_WAIT, || sink.lock().unwrap().len() == 2));

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    monitor.stop().unwrap();
}

#[test]
fn concurrent_starts_have_exactly_one_winner() {
    let transport = FakeTransport::new();
    let monitors: Vec<_> = (0..2).map(|_| Arc::new(monitor_on(&transport))).collect();
    let barrier = Arc::new(Barrier::new(monitors.len()));

    let handles: Vec<_> = monitors
        .iter()
        .map(|monitor| {
            let monitor = monitor.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                monitor.start().is_ok()
            })
        })
        .collect();

    let winners: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(
        winners.iter().filter(|&&won| won).count(),
        1,
        "exactly one of the contending starts may succeed"
    );

    for (monitor, won) in monitors.iter().zip(winners) {
        if won {
            monitor.stop().unwrap();
        }
    }
    assert_eq!(transport.live_named_objects(), 0);
}

#[test]
fn drain_timeout_leaves_stopping_and_a_retry_finishes() {
    let transport = FakeTransport::new();
    let monitor = DebugEventMonitor::with_transport(
        MonitorConfig {
            stop_timeout: Some(Duration::from_millis(50)),
        },
        Arc::new(transport.clone()),
    );
    let in_callback = Arc::new(AtomicBool::new(false));
    let entered = in_callback.clone();
    monitor.subscribe(move |_, _| {
        entered.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(400));
    });

    monitor.start().unwrap();
    assert!(transport.publish(5, "slow", PUBLISH_WAIT));
    assert!(wait_until(PUBLISH_WAIT, || in_callback.load(Ordering::SeqCst)));

    // The loop is stuck inside the subscriber, so the drain cannot finish
    // within 50ms.
    assert!(matches!(monitor.stop(), Err(StopError::DrainTimeout(_))));
    assert_eq!(monitor.state(), MonitorState::Stopping);

    // Retrying eventually observes the loop's completion signal.
    assert!(wait_until(PUBLISH_WAIT, || monitor.stop().is_ok()));
    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert_eq!(transport.live_named_objects(), 0);
}

#[test]
fn dropping_a_running_monitor_releases_the_named_objects() {
    let transport = FakeTransport::new();
    {
        let monitor = monitor_on(&transport);
        monitor.start().unwrap();
    }
    assert_eq!(transport.live_named_objects(), 0);

    // And the singleton is free for the next consumer.
    let next = monitor_on(&transport);
    next.start().unwrap();
    next.stop().unwrap();
}

#[cfg(not(windows))]
#[test]
fn native_transport_fails_the_platform_gate() {
    let monitor = DebugEventMonitor::new(MonitorConfig::default());
    assert!(matches!(
        monitor.start(),
        Err(StartError::UnsupportedPlatform)
    ));
    assert_eq!(monitor.state(), MonitorState::Stopped);
}
