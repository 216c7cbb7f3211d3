#![cfg(not(loom))]
//! Tests for the consumer worker thread.

use std::io;

use rstest::rstest;
use rxbridge::{
    BridgeConfig,
    DeliveryId,
    EngineEvent,
    LinkId,
    Producer,
    Session,
    StagingBuffer,
    VecSink,
    WorkerError,
    spawn_consumer,
};
use rxbridge_testing::{FailingSink, MockEngine, SharedSink};
use tokio_util::sync::CancellationToken;

fn commit(producer: &mut Producer, bytes: &[u8]) {
    let mut slot = producer.current_write_slot();
    slot.spare_mut()[..bytes.len()].copy_from_slice(bytes);
    slot.advance(bytes.len());
    drop(slot);
    assert!(
        producer
            .commit()
            .expect("consumer is alive")
            .is_committed()
    );
}

#[test]
fn worker_drains_everything_before_stopping() {
    let (mut producer, consumer) = StagingBuffer::new(4, 32, false)
        .expect("valid geometry")
        .split();
    commit(&mut producer, b"first");
    commit(&mut producer, b"second");
    let worker = spawn_consumer(consumer, VecSink::new()).expect("spawn worker");
    drop(producer);

    let (sink, result) = worker.join_with_sink();
    let report = result.expect("worker should finish cleanly");

    assert_eq!(report.delivered, 2);
    assert_eq!(report.bytes, 11);
    assert_eq!(report.staging.processed, 2);
    assert_eq!(
        sink.expect("worker did not panic").into_messages(),
        [b"first".to_vec(), b"second".to_vec()]
    );
}

#[rstest]
#[case(0)]
#[case(1)]
fn sink_failure_stops_the_worker(#[case] accept: usize) {
    let (mut producer, consumer) = StagingBuffer::new(4, 32, false)
        .expect("valid geometry")
        .split();
    commit(&mut producer, b"a");
    commit(&mut producer, b"b");
    drop(producer);

    let worker = spawn_consumer(consumer, FailingSink::new(accept)).expect("spawn worker");
    let (sink, result) = worker.join_with_sink();

    match result {
        Err(WorkerError::Sink(err)) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("expected sink error, got {other:?}"),
    }
    assert_eq!(sink.expect("worker did not panic").delivered().len(), accept);
}

/// A blocking bridge delivers every message in order even when the consumer
/// runs on its own thread.
#[test]
fn session_and_worker_preserve_order_end_to_end() {
    let config = BridgeConfig::builder()
        .slot_capacity(32)
        .slot_count(3)
        .block_producer(true)
        .build()
        .expect("valid config");
    let (producer, consumer) = StagingBuffer::from_config(&config)
        .expect("valid geometry")
        .split();
    let sink = SharedSink::new();
    let worker = spawn_consumer(consumer, sink.clone()).expect("spawn worker");

    let link = LinkId(1);
    let mut engine = MockEngine::new();
    engine.push_batch([EngineEvent::ConnectionInit]);
    let messages: Vec<Vec<u8>> = (0_u8..20).map(|i| vec![i; usize::from(i) + 1]).collect();
    for (id, message) in (1_u64..).zip(&messages) {
        engine.deliver(link, DeliveryId(id), message);
    }
    engine.push_batch([EngineEvent::Inactive]);

    let mut session = Session::new(config, producer);
    let report = session
        .run(&mut engine, &CancellationToken::new())
        .expect("session should finish cleanly");
    drop(session);

    let worker_report = worker.join().expect("worker should finish cleanly");
    assert_eq!(report.received, 20);
    assert_eq!(report.staging.overruns, 0);
    assert_eq!(worker_report.delivered, 20);
    assert_eq!(sink.snapshot(), messages);
}
