//! Detached dispatch under concurrent publication.

mod common;

use common::{OrderPlaced, Publisher, Subscriber, TIMEOUT};
use parking_lot::Mutex;
use std::{
    cell::RefCell,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use tidings::{
    Broker, DispatchPolicy, HandlerRestriction, Payload, Sender,
    testing::{CountdownLatch, RecordingExtension},
};

#[test]
fn parallel_publishers_on_separate_topics_all_complete() {
    let recorder = Arc::new(RecordingExtension::new());
    let broker = Broker::builder().extension(recorder.clone()).build().unwrap();
    let latch = CountdownLatch::new(2);

    let mut subscribers = Vec::new();
    for topic in ["left", "right"] {
        let latch = latch.clone();
        let subscriber = Subscriber::new(topic, DispatchPolicy::Asynchronous, move |_| {
            latch.signal();
            Ok(())
        });
        broker.register(&subscriber).unwrap();
        subscribers.push(subscriber);
    }
    let left = Publisher::new("left", HandlerRestriction::Asynchronous);
    let right = Publisher::new("right", HandlerRestriction::Asynchronous);
    broker.register(&left).unwrap();
    broker.register(&right).unwrap();

    let handles = [(left, "left"), (right, "right")].map(|(publisher, topic)| {
        let broker = broker.clone();
        thread::spawn(move || broker.fire(&publisher, topic, Payload::empty()))
    });
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert!(latch.wait_timeout(TIMEOUT));
    assert!(broker.wait_idle(TIMEOUT));
    assert!(recorder.faults().is_empty());
    assert_eq!(broker.stats().delivered, 2);
}

#[test]
fn asynchronous_failure_stays_on_the_worker() {
    let recorder = Arc::new(RecordingExtension::new());
    let broker = Broker::builder()
        .worker_threads(1)
        .extension(recorder.clone())
        .build()
        .unwrap();
    let latch = CountdownLatch::new(1);

    let failing = Subscriber::new("broken", DispatchPolicy::Asynchronous, |_| {
        panic!("handler bug")
    });
    let signal = latch.clone();
    let healthy = Subscriber::new("fine", DispatchPolicy::Asynchronous, move |_| {
        signal.signal();
        Ok(())
    });
    broker.register(&failing).unwrap();
    broker.register(&healthy).unwrap();

    broker
        .publish("broken", Sender::Anonymous, Payload::empty())
        .unwrap();
    broker.publish("fine", Sender::Anonymous, Payload::empty()).unwrap();

    assert!(latch.wait_timeout(TIMEOUT));
    assert!(broker.wait_idle(TIMEOUT));
    let faults = recorder.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].contains("handler bug"));
    let stats = broker.stats();
    assert_eq!(stats.handler_faults, 1);
    assert_eq!(stats.unhandled_faults, 1);
}

#[test]
fn handled_asynchronous_fault_is_not_counted_as_unhandled() {
    let recorder = Arc::new(RecordingExtension::handling_faults());
    let broker = Broker::builder().extension(recorder.clone()).build().unwrap();
    let failing = Subscriber::new("t", DispatchPolicy::Background, |_| Err("nope".into()));
    broker.register(&failing).unwrap();

    broker.publish("t", Sender::Anonymous, Payload::empty()).unwrap();

    assert!(broker.wait_idle(TIMEOUT));
    assert_eq!(recorder.faults().len(), 1);
    assert_eq!(broker.stats().unhandled_faults, 0);
}

#[test]
fn unregistering_after_the_snapshot_still_delivers() {
    let broker = Broker::builder().worker_threads(1).build().unwrap();
    let gate = CountdownLatch::new(1);
    let blocked = gate.clone();
    let blocker = Subscriber::new("block", DispatchPolicy::Asynchronous, move |_| {
        blocked.wait_timeout(TIMEOUT);
        Ok(())
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let subscriber = Subscriber::new("t", DispatchPolicy::Asynchronous, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    broker.register(&blocker).unwrap();
    broker.register(&subscriber).unwrap();

    // The single pool thread is busy, so "t" is snapshotted and queued only.
    broker.publish("block", Sender::Anonymous, Payload::empty()).unwrap();
    broker.publish("t", Sender::Anonymous, Payload::empty()).unwrap();
    broker.unregister(&subscriber);
    gate.signal();

    assert!(broker.wait_idle(TIMEOUT));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    broker.publish("t", Sender::Anonymous, Payload::empty()).unwrap();
    assert!(broker.wait_idle(TIMEOUT));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn every_publish_reaches_every_subscriber() {
    const PUBLISHERS: usize = 8;
    const POLICIES: [DispatchPolicy; 5] = [
        DispatchPolicy::Synchronous,
        DispatchPolicy::Asynchronous,
        DispatchPolicy::Asynchronous,
        DispatchPolicy::Background,
        DispatchPolicy::Background,
    ];

    let broker = Broker::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let subscribers: Vec<_> = POLICIES
        .iter()
        .map(|policy| {
            let counter = calls.clone();
            let subscriber = Subscriber::new("t", *policy, move |message| {
                assert!(message.args::<OrderPlaced>().is_some());
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            broker.register(&subscriber).unwrap();
            subscriber
        })
        .collect();

    let handles: Vec<_> = (0..PUBLISHERS as u64)
        .map(|id| {
            let broker = broker.clone();
            thread::spawn(move || {
                broker.publish("t", Sender::Anonymous, Payload::new(OrderPlaced { id }))
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert!(broker.wait_idle(TIMEOUT));
    assert_eq!(calls.load(Ordering::SeqCst), PUBLISHERS * subscribers.len());
    assert_eq!(broker.stats().delivered as usize, PUBLISHERS * subscribers.len());
}

#[test]
fn background_subscription_runs_serially_in_order() {
    let broker = Broker::new().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (active_in, overlap_in, sink) = (active.clone(), overlap.clone(), seen.clone());
    let subscriber = Subscriber::new("audit", DispatchPolicy::Background, move |message| {
        if active_in.fetch_add(1, Ordering::SeqCst) > 0 {
            overlap_in.fetch_add(1, Ordering::SeqCst);
        }
        let thread_name = thread::current().name().map(str::to_owned);
        sink.lock()
            .push((message.args::<OrderPlaced>().map(|o| o.id), thread_name));
        active_in.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    });
    broker.register(&subscriber).unwrap();

    for id in 0..50 {
        broker
            .publish("audit", Sender::Anonymous, Payload::new(OrderPlaced { id }))
            .unwrap();
    }

    assert!(broker.wait_idle(TIMEOUT));
    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    let seen = seen.lock();
    let ids: Vec<_> = seen.iter().map(|(id, _)| id.unwrap()).collect();
    assert_eq!(ids, (0..50u64).collect::<Vec<_>>());
    assert!(
        seen.iter()
            .all(|(_, name)| name.as_deref() == Some("tidings-bg-audit"))
    );
}

#[test]
fn slow_background_topic_does_not_starve_another() {
    let broker = Broker::new().unwrap();
    let gate = CountdownLatch::new(1);
    let blocked = gate.clone();
    let slow = Subscriber::new("slow", DispatchPolicy::Background, move |_| {
        blocked.wait_timeout(TIMEOUT);
        Ok(())
    });
    let done = CountdownLatch::new(1);
    let signal = done.clone();
    let fast = Subscriber::new("fast", DispatchPolicy::Background, move |_| {
        signal.signal();
        Ok(())
    });
    broker.register(&slow).unwrap();
    broker.register(&fast).unwrap();

    broker.publish("slow", Sender::Anonymous, Payload::empty()).unwrap();
    broker.publish("fast", Sender::Anonymous, Payload::empty()).unwrap();

    assert!(done.wait_timeout(TIMEOUT));
    gate.signal();
    assert!(broker.wait_idle(TIMEOUT));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publishing_from_async_tasks() {
    let broker = Broker::new().unwrap();
    let latch = CountdownLatch::new(2);
    let signal = latch.clone();
    let subscriber = Subscriber::new("t", DispatchPolicy::Asynchronous, move |_| {
        signal.signal();
        Ok(())
    });
    broker.register(&subscriber).unwrap();

    let tasks: Vec<_> = (0..2u64)
        .map(|id| {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker.publish("t", Sender::Anonymous, Payload::new(OrderPlaced { id }))
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let released = tokio::task::spawn_blocking(move || latch.wait_timeout(TIMEOUT))
        .await
        .unwrap();
    assert!(released);
}

/// Signals a latch when the thread that stored it exits.
struct ExitSignal(CountdownLatch);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.0.signal();
    }
}

thread_local! {
    static EXIT_SIGNAL: RefCell<Option<ExitSignal>> = const { RefCell::new(None) };
}

#[test]
fn dropped_background_subscribers_release_their_workers() {
    const ROUNDS: usize = 20;
    let broker = Broker::new().unwrap();
    let exited = CountdownLatch::new(ROUNDS);

    for _ in 0..ROUNDS {
        let exit = exited.clone();
        let subscriber = Subscriber::new("t", DispatchPolicy::Background, move |_| {
            EXIT_SIGNAL.with(|slot| {
                slot.borrow_mut()
                    .get_or_insert_with(|| ExitSignal(exit.clone()));
            });
            Ok(())
        });
        broker.register(&subscriber).unwrap();
        broker.publish("t", Sender::Anonymous, Payload::empty()).unwrap();
        assert!(broker.wait_idle(TIMEOUT));
        drop(subscriber);
    }

    // Looking the topic up again prunes the last dropped subscriber.
    broker.publish("t", Sender::Anonymous, Payload::empty()).unwrap();
    assert!(broker.topics().is_empty());
    assert!(
        exited.wait_timeout(TIMEOUT),
        "{} background workers still running",
        exited.count()
    );
    assert_eq!(broker.stats().delivered, ROUNDS as u64);
}
