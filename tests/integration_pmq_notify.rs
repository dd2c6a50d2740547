//! Message arrival notifications against real kernel message queues.

mod common;

use common::{cleanup, create_queue, mq_available};
use crossbeam::channel::{unbounded, RecvTimeoutError};
use posix_mq::{utils, MqError, PosixMq, QueueConfig, QueueEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Drain `mq` inside a handler, forwarding each batch to the test thread
fn drain_into(mq: &PosixMq, buf: &mut [u8]) -> Vec<Vec<u8>> {
    let mut batch = Vec::new();
    while let Some(n) = mq.receive(buf).expect("receive inside handler") {
        batch.push(buf[..n].to_vec());
    }
    batch
}

#[test]
fn one_push_raises_exactly_one_event() {
    if !mq_available() {
        return;
    }
    let (consumer, name) = create_queue("pmq_event_once", 4, 16);
    let producer = PosixMq::new();
    producer.open(&QueueConfig::new(&name)).unwrap();

    let (tx, rx) = unbounded();
    let mut buf = vec![0u8; consumer.msgsize().unwrap()];
    assert!(consumer
        .on(QueueEvent::Messages, move |mq| {
            let _ = tx.send(drain_into(mq, &mut buf));
        })
        .unwrap());

    assert!(producer.push("ping").unwrap());

    let batch = rx.recv_timeout(EVENT_TIMEOUT).expect("messages event");
    assert_eq!(batch, vec![b"ping".to_vec()]);
    assert_eq!(
        rx.recv_timeout(QUIET_PERIOD),
        Err(RecvTimeoutError::Timeout),
        "a single push must raise a single event"
    );

    producer.close().unwrap();
    consumer.unlink().unwrap();
    consumer.close().unwrap();
}

#[test]
fn second_registration_is_a_no_op() {
    if !mq_available() {
        return;
    }
    let (mq, name) = create_queue("pmq_event_noop", 4, 16);

    let (tx, rx) = unbounded();
    let mut buf = vec![0u8; 16];
    assert!(mq
        .on(QueueEvent::Messages, move |mq| {
            let _ = tx.send(drain_into(mq, &mut buf));
        })
        .unwrap());
    assert!(!mq
        .on(QueueEvent::Messages, |_| panic!("replacement handler must not run"))
        .unwrap());

    assert!(mq.push("a").unwrap());
    assert_eq!(rx.recv_timeout(EVENT_TIMEOUT).unwrap(), vec![b"a".to_vec()]);

    mq.close().unwrap();
    cleanup(&name);
}

#[test]
fn events_follow_every_arrival_after_a_drain() {
    if !mq_available() {
        return;
    }
    let (consumer, name) = create_queue("pmq_event_rearm", 4, 16);
    let producer = PosixMq::new();
    producer.open(&QueueConfig::new(&name)).unwrap();

    let (tx, rx) = unbounded();
    let mut buf = vec![0u8; 16];
    consumer
        .on(QueueEvent::Messages, move |mq| {
            let _ = tx.send(drain_into(mq, &mut buf));
        })
        .unwrap();

    let mut received = Vec::new();
    for round in 0..3u8 {
        assert!(producer.push([round]).unwrap());
        for message in rx.recv_timeout(EVENT_TIMEOUT).expect("event per arrival") {
            received.push(message);
        }
    }
    assert_eq!(received, vec![vec![0u8], vec![1u8], vec![2u8]]);

    producer.close().unwrap();
    consumer.unlink().unwrap();
    consumer.close().unwrap();
}

#[test]
fn prefilled_queue_drains_with_live_occupancy() {
    if !mq_available() {
        return;
    }
    let name = utils::unique_queue_name("pmq_testq");

    let filler = PosixMq::new();
    filler
        .open(&QueueConfig::new(&name).create(true).maxmsgs(10).msgsize(8))
        .unwrap();
    for i in 0..10u8 {
        assert!(filler.push([b'a' + i]).unwrap());
    }
    assert!(!filler.push("z").unwrap());
    filler.close().unwrap();

    let mq = PosixMq::new();
    mq.open(&QueueConfig::new(&name)).unwrap();
    assert_eq!(mq.msgsize().unwrap(), 8);
    assert_eq!(mq.maxmsgs().unwrap(), 10);

    let (tx, rx) = unbounded();
    let mut buf = vec![0u8; mq.msgsize().unwrap()];
    mq.on(QueueEvent::Messages, move |mq| {
        let mut occupancy = vec![mq.curmsgs().unwrap()];
        let mut messages = Vec::new();
        while let Some(n) = mq.receive(&mut buf).unwrap() {
            messages.push(buf[..n].to_vec());
            occupancy.push(mq.curmsgs().unwrap());
        }
        mq.unlink().unwrap();
        mq.close().unwrap();
        let _ = tx.send((occupancy, messages));
    })
    .unwrap();

    let (occupancy, messages) = rx.recv_timeout(EVENT_TIMEOUT).expect("messages event");
    assert_eq!(occupancy, (0..=10).rev().collect::<Vec<usize>>());
    assert_eq!(
        messages,
        (0..10u8).map(|i| vec![b'a' + i]).collect::<Vec<_>>()
    );

    assert!(matches!(mq.close(), Err(MqError::Closed)));
    let reopened = PosixMq::new();
    assert!(matches!(
        reopened.open(&QueueConfig::new(&name)),
        Err(MqError::NotFound(_))
    ));
}

#[test]
fn no_handler_runs_after_close_returns() {
    if !mq_available() {
        return;
    }
    let (consumer, name) = create_queue("pmq_event_close", 4, 16);
    let producer = PosixMq::new();
    producer.open(&QueueConfig::new(&name)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    consumer
        .on(QueueEvent::Messages, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    consumer.close().unwrap();
    let after_close = calls.load(Ordering::SeqCst);

    assert!(producer.push("late").unwrap());
    thread::sleep(QUIET_PERIOD);
    assert_eq!(calls.load(Ordering::SeqCst), after_close);

    producer.unlink().unwrap();
    producer.close().unwrap();
}

#[test]
fn off_stops_delivery() {
    if !mq_available() {
        return;
    }
    let (consumer, name) = create_queue("pmq_event_off", 4, 16);
    let producer = PosixMq::new();
    producer.open(&QueueConfig::new(&name)).unwrap();

    let (tx, rx) = unbounded();
    let mut buf = vec![0u8; 16];
    consumer
        .on(QueueEvent::Messages, move |mq| {
            let _ = tx.send(drain_into(mq, &mut buf));
        })
        .unwrap();

    assert!(consumer.off(QueueEvent::Messages).unwrap());
    assert!(!consumer.off(QueueEvent::Messages).unwrap());

    assert!(producer.push("unseen").unwrap());
    assert_eq!(
        rx.recv_timeout(QUIET_PERIOD),
        Err(RecvTimeoutError::Disconnected)
    );
    assert_eq!(consumer.curmsgs().unwrap(), 1);

    producer.close().unwrap();
    consumer.unlink().unwrap();
    consumer.close().unwrap();
}

#[test]
fn off_waits_out_handler_while_bridge_stays_armed() {
    if !mq_available() {
        return;
    }
    let (consumer, name) = create_queue("pmq_event_off_race", 8, 8);
    // A drain interest keeps the notification thread alive across `off`.
    assert!(consumer.on(QueueEvent::Drain, |_| {}).unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let stop = Arc::clone(&stop);
        let name = name.clone();
        thread::spawn(move || {
            let mq = PosixMq::new();
            mq.open(&QueueConfig::new(&name)).unwrap();
            while !stop.load(Ordering::SeqCst) {
                if !mq.push("tick").unwrap() {
                    thread::yield_now();
                }
            }
            mq.close().unwrap();
        })
    };

    let late = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let unregistered = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();
        let mut buf = vec![0u8; 8];
        {
            let unregistered = Arc::clone(&unregistered);
            let late = Arc::clone(&late);
            assert!(consumer
                .on(QueueEvent::Messages, move |mq| {
                    if unregistered.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                    while let Ok(Some(_)) = mq.receive(&mut buf) {}
                    let _ = tx.send(());
                })
                .unwrap());
        }

        rx.recv_timeout(EVENT_TIMEOUT).expect("messages event");
        assert!(consumer.off(QueueEvent::Messages).unwrap());
        unregistered.store(true, Ordering::SeqCst);
    }
    thread::sleep(QUIET_PERIOD);

    stop.store(true, Ordering::SeqCst);
    producer.join().unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 0);

    consumer.close().unwrap();
    cleanup(&name);
}

#[test]
fn reregistering_sees_messages_already_queued() {
    if !mq_available() {
        return;
    }
    let (mq, name) = create_queue("pmq_event_rereg", 4, 8);
    assert!(mq.on(QueueEvent::Drain, |_| {}).unwrap());
    assert!(mq.on(QueueEvent::Messages, |_| {}).unwrap());
    assert!(mq.off(QueueEvent::Messages).unwrap());

    assert!(mq.push("queued").unwrap());

    let (tx, rx) = unbounded();
    let mut buf = vec![0u8; 8];
    assert!(mq
        .on(QueueEvent::Messages, move |mq| {
            let _ = tx.send(drain_into(mq, &mut buf));
        })
        .unwrap());
    assert_eq!(
        rx.recv_timeout(EVENT_TIMEOUT).expect("messages event"),
        vec![b"queued".to_vec()]
    );

    mq.close().unwrap();
    cleanup(&name);
}

#[test]
fn drain_fires_once_room_frees_up() {
    if !mq_available() {
        return;
    }
    let (producer, name) = create_queue("pmq_event_drain", 2, 8);
    let consumer = PosixMq::new();
    consumer.open(&QueueConfig::new(&name)).unwrap();

    let (tx, rx) = unbounded();
    producer
        .on(QueueEvent::Drain, move |mq| {
            let _ = tx.send(mq.push("resumed").unwrap());
        })
        .unwrap();

    assert!(producer.push("one").unwrap());
    assert!(producer.push("two").unwrap());
    assert!(!producer.push("three").unwrap());
    assert_eq!(
        rx.recv_timeout(QUIET_PERIOD),
        Err(RecvTimeoutError::Timeout),
        "no drain while the queue is still full"
    );

    let mut buf = [0u8; 8];
    assert_eq!(consumer.receive(&mut buf).unwrap(), Some(3));
    assert!(rx.recv_timeout(EVENT_TIMEOUT).expect("drain event"));
    assert!(producer.is_full().unwrap());

    producer.close().unwrap();
    consumer.close().unwrap();
    cleanup(&name);
}
