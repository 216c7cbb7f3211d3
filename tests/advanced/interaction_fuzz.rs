#![cfg(all(feature = "advanced-tests", not(loom)))]
//! Property-based tests for staging buffer and reassembly invariants.
//!
//! Random interleavings of commits and acquires are checked against a simple
//! queue model, and random transfer splits are checked to reassemble into the
//! message that was sent.

use std::collections::VecDeque;

use proptest::prelude::*;
use rxbridge::{
    CommitOutcome,
    DeliveryId,
    DeliveryOutcome,
    LinkId,
    ProtocolEngine,
    Reassembler,
    StagingBuffer,
};
use rxbridge_testing::MockEngine;

const SLOT_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
enum Action {
    Commit(Vec<u8>),
    Acquire,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..SLOT_CAPACITY).prop_map(Action::Commit),
        Just(Action::Acquire),
    ]
}

proptest! {
    #[test]
    fn buffer_matches_fifo_model(
        slot_count in 2_usize..8,
        actions in prop::collection::vec(action(), 0..64),
    ) {
        let (mut producer, mut consumer) = StagingBuffer::new(slot_count, SLOT_CAPACITY, false)
            .expect("valid geometry")
            .split();
        let mut model: VecDeque<Vec<u8>> = VecDeque::new();
        let mut overruns = 0_u64;

        for action in actions {
            match action {
                Action::Commit(bytes) => {
                    let mut slot = producer.current_write_slot();
                    slot.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
                    slot.advance(bytes.len());
                    drop(slot);
                    let outcome = producer.commit().expect("consumer is alive");
                    if model.len() < slot_count - 2 {
                        prop_assert_eq!(outcome, CommitOutcome::Committed);
                        model.push_back(bytes);
                    } else {
                        prop_assert_eq!(outcome, CommitOutcome::Dropped);
                        overruns += 1;
                    }
                }
                Action::Acquire => {
                    let expected = model.pop_front();
                    let actual = consumer.try_acquire_next().map(|slot| slot.to_vec());
                    prop_assert_eq!(actual, expected);
                }
            }
            prop_assert_eq!(producer.in_use(), model.len());
            prop_assert_eq!(producer.free_capacity(), slot_count - 2 - model.len());
        }
        prop_assert_eq!(consumer.stats().overruns, overruns);
    }

    #[test]
    fn split_transfers_reassemble_or_discard(
        message in prop::collection::vec(any::<u8>(), 1..(SLOT_CAPACITY * 2)),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
        read_chunk in 1_usize..16,
    ) {
        let (producer, mut consumer) = StagingBuffer::new(4, SLOT_CAPACITY, false)
            .expect("valid geometry")
            .split();
        let mut reassembler = Reassembler::new(producer);
        let mut engine = MockEngine::new().with_read_chunk(read_chunk);
        let delivery = DeliveryId(1);

        let mut bounds: Vec<usize> = cuts.iter().map(|cut| cut.index(message.len())).collect();
        bounds.push(message.len());
        bounds.sort_unstable();
        bounds.dedup();

        let mut start = 0;
        let mut last = None;
        for (i, end) in bounds.iter().copied().enumerate() {
            let more = i + 1 < bounds.len();
            engine.transfer(delivery, &message[start..end], more);
            start = end;
            last = Some(
                reassembler
                    .on_delivery(&mut engine, LinkId(1), delivery)
                    .expect("delivery")
                    .outcome,
            );
        }

        if message.len() < SLOT_CAPACITY {
            prop_assert!(
                matches!(last, Some(DeliveryOutcome::Completed { len, .. }) if len == message.len())
            );
            let received = consumer.acquire_next().expect("message").to_vec();
            prop_assert_eq!(received, message);
        } else {
            prop_assert_eq!(last, Some(DeliveryOutcome::Discarded { attempted: message.len() }));
            prop_assert!(consumer.try_acquire_next().is_none());
        }
        prop_assert_eq!(engine.pending(delivery), 0);
    }
}
