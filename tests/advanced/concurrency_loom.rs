#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for the staging buffer using loom.
//!
//! These tests run the producer and consumer halves on separate loom threads
//! so every interleaving of commit, acquire and close is explored.

use loom::{model, thread};
use rxbridge::{CommitOutcome, Producer, StagingBuffer, StagingError};

fn commit(producer: &mut Producer, byte: u8) -> CommitOutcome {
    let mut slot = producer.current_write_slot();
    slot.spare_mut()[0] = byte;
    slot.advance(1);
    drop(slot);
    producer.commit().expect("consumer is alive")
}

#[test]
fn blocking_producer_never_loses_or_reorders() {
    model(|| {
        let (mut producer, mut consumer) = StagingBuffer::new(3, 1, true)
            .expect("valid geometry")
            .split();

        let producer_thread = thread::spawn(move || {
            let outcomes = [commit(&mut producer, 1), commit(&mut producer, 2)];
            assert!(outcomes.iter().all(|outcome| outcome.is_committed()));
        });

        let first = consumer.acquire_next().expect("first message").to_vec();
        let second = consumer.acquire_next().expect("second message").to_vec();
        producer_thread.join().expect("producer thread panicked");

        assert_eq!(first, [1]);
        assert_eq!(second, [2]);
        assert_eq!(consumer.stats().overruns, 0);
    });
}

#[test]
fn non_blocking_drops_are_accounted_and_order_kept() {
    model(|| {
        let (mut producer, mut consumer) = StagingBuffer::new(3, 1, false)
            .expect("valid geometry")
            .split();
        let probe = producer.probe();

        let producer_thread = thread::spawn(move || {
            let committed = (1..=3_u8)
                .filter(|byte| commit(&mut producer, *byte).is_committed())
                .count();
            // Dropping the producer closes the buffer once drained.
            committed
        });

        let mut received = Vec::new();
        loop {
            match consumer.acquire_next() {
                Ok(message) => received.push(message[0]),
                Err(StagingError::Closed) => break,
                Err(err) => panic!("unexpected staging error: {err}"),
            }
        }
        let committed = producer_thread.join().expect("producer thread panicked");

        assert_eq!(received.len(), committed);
        assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
        let stats = probe.stats();
        assert_eq!(stats.overruns + committed as u64, 3);
    });
}

#[test]
fn dropping_consumer_releases_blocked_producer() {
    model(|| {
        let (mut producer, consumer) = StagingBuffer::new(2, 1, true)
            .expect("valid geometry")
            .split();

        let producer_thread = thread::spawn(move || producer.commit());
        drop(consumer);

        assert_eq!(
            producer_thread.join().expect("producer thread panicked"),
            Err(StagingError::Closed)
        );
    });
}
