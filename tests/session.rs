#![cfg(not(loom))]
//! Tests for the receive session event loop.

use std::num::NonZeroU64;

use log::Level;
use rstest::{fixture, rstest};
use rxbridge::{
    BridgeConfig,
    Condition,
    Consumer,
    DeliveryId,
    EngineEvent,
    LinkId,
    Session,
    SessionError,
    StagingBuffer,
    StagingError,
    TransportSettings,
    session::RECEIVER_LINK_NAME,
};
use rxbridge_testing::{EngineCommand, LoggerHandle, MockEngine, logger};
use serial_test::serial;
use tokio_util::sync::CancellationToken;

const LINK: LinkId = LinkId(1);

fn config(limit: Option<u64>) -> BridgeConfig {
    BridgeConfig::builder()
        .slot_capacity(64)
        .slot_count(4)
        .container_id("rx-test")
        .source_address("queue://in")
        .message_limit(limit.and_then(NonZeroU64::new))
        .build()
        .expect("valid config")
}

fn session_with(config: BridgeConfig) -> (Session, Consumer) {
    let (producer, consumer) = StagingBuffer::from_config(&config)
        .expect("valid geometry")
        .split();
    (Session::new(config, producer), consumer)
}

#[fixture]
fn session() -> (Session, Consumer) { session_with(config(None)) }

fn open_batches(engine: &mut MockEngine) {
    engine
        .push_batch([
            EngineEvent::ConnectionInit,
            EngineEvent::ConnectionBound,
            EngineEvent::SessionInit,
        ])
        .push_batch([
            EngineEvent::ConnectionLocalOpen,
            EngineEvent::ConnectionRemoteOpen,
            EngineEvent::SessionLocalOpen,
            EngineEvent::SessionRemoteOpen,
        ]);
}

#[rstest]
fn lifecycle_events_open_the_receiver(session: (Session, Consumer)) {
    let (mut session, _consumer) = session;
    let mut engine = MockEngine::new();
    open_batches(&mut engine);
    engine.push_batch([EngineEvent::Timeout, EngineEvent::Inactive]);

    let report = session
        .run(&mut engine, &CancellationToken::new())
        .expect("session should finish cleanly");

    for command in [
        EngineCommand::OpenConnection {
            container_id: "rx-test".into(),
        },
        EngineCommand::OpenReceiver {
            name: RECEIVER_LINK_NAME.into(),
            source: "queue://in".into(),
            link: LINK,
        },
        EngineCommand::Flow {
            link: LINK,
            credit: 3,
        },
        EngineCommand::ConfigureTransport(TransportSettings {
            require_auth: false,
            allowed_mechs: "ANONYMOUS",
            max_frame: 64,
        }),
        EngineCommand::ConfigureSession {
            incoming_capacity: 256,
            outgoing_window: 4,
        },
    ] {
        assert!(engine.received(&command), "missing {command:?}");
    }
    assert_eq!(session.link(), Some(LINK));
    assert_eq!(report.batches, 3);
    assert_eq!(engine.batches_done(), 3);
    assert_eq!(report.credit_granted, 3);
}

#[rstest]
fn deliveries_reach_the_consumer(session: (Session, Consumer)) {
    let (mut session, mut consumer) = session;
    let mut engine = MockEngine::new();
    open_batches(&mut engine);
    engine
        .deliver(LINK, DeliveryId(1), b"alpha")
        .deliver(LINK, DeliveryId(2), b"beta")
        .push_batch([EngineEvent::Inactive]);

    let report = session
        .run(&mut engine, &CancellationToken::new())
        .expect("session should finish cleanly");

    assert_eq!(report.received, 2);
    assert_eq!(report.staging.queued, 2);
    assert_eq!(&*consumer.acquire_next().expect("first"), b"alpha");
    assert_eq!(&*consumer.acquire_next().expect("second"), b"beta");
}

#[rstest]
#[case::transport(EngineEvent::TransportClosed { condition: Some(Condition::new("amqp:connection:framing-error", "bad frame")) }, "transport_closed")]
#[case::connection(EngineEvent::ConnectionRemoteClose { condition: Some(Condition::new("amqp:connection:forced", "bye")) }, "connection_remote_close")]
#[case::session(EngineEvent::SessionRemoteClose { condition: Some(Condition::new("amqp:session:errant-link", "no")) }, "session_remote_close")]
#[case::link(EngineEvent::LinkRemoteDetach { link: LINK, condition: Some(Condition::new("amqp:not-found", "no queue")) }, "link_remote_detach")]
fn remote_conditions_are_fatal(
    session: (Session, Consumer),
    #[case] event: EngineEvent,
    #[case] expected_event: &str,
) {
    let (mut session, _consumer) = session;
    let mut engine = MockEngine::new();
    engine
        .push_batch([event])
        .push_batch([EngineEvent::Inactive]);

    let err = session
        .run(&mut engine, &CancellationToken::new())
        .expect_err("condition must end the session");

    assert!(matches!(&err, SessionError::Remote { event, .. } if *event == expected_event));
    assert_eq!(err.exit_code(), 1);
    assert!(engine.received(&EngineCommand::CloseConnection));
    assert_eq!(engine.batches_done(), 1, "batch is released before returning");
}

#[rstest]
fn clean_remote_closes_are_answered(session: (Session, Consumer)) {
    let (mut session, _consumer) = session;
    let mut engine = MockEngine::new();
    engine
        .push_batch([
            EngineEvent::LinkRemoteClose {
                link: LINK,
                condition: None,
            },
            EngineEvent::SessionRemoteClose { condition: None },
            EngineEvent::ConnectionRemoteClose { condition: None },
            EngineEvent::TransportClosed { condition: None },
        ])
        .push_batch([EngineEvent::Inactive]);

    session
        .run(&mut engine, &CancellationToken::new())
        .expect("clean closes are not errors");

    assert_eq!(
        engine.commands(),
        [
            EngineCommand::CloseLink {
                link: LINK,
                condition: None
            },
            EngineCommand::CloseSession,
            EngineCommand::CloseConnection,
        ]
    );
}

#[test]
fn message_limit_closes_the_connection_once() {
    let (mut session, _consumer) = session_with(config(Some(2)));
    let mut engine = MockEngine::new();
    engine
        .deliver(LINK, DeliveryId(1), b"1")
        .deliver(LINK, DeliveryId(2), b"2")
        .deliver(LINK, DeliveryId(3), b"3")
        .push_batch([EngineEvent::Inactive]);

    let report = session
        .run(&mut engine, &CancellationToken::new())
        .expect("reaching the limit is a clean shutdown");

    assert!(report.limit_reached);
    let closes = engine
        .commands()
        .iter()
        .filter(|command| **command == EngineCommand::CloseConnection)
        .count();
    assert_eq!(closes, 1);
}

#[rstest]
#[case::one_batch_each(false)]
#[case::single_batch(true)]
fn message_limit_stops_ingesting_further_deliveries(#[case] single_batch: bool) {
    let config = BridgeConfig::builder()
        .slot_capacity(64)
        .slot_count(16)
        .message_limit(NonZeroU64::new(2))
        .build()
        .expect("valid config");
    let (mut session, mut consumer) = session_with(config);
    let mut engine = MockEngine::new();
    let deliveries: Vec<DeliveryId> = (1..=5).map(DeliveryId).collect();
    if single_batch {
        for delivery in &deliveries {
            engine.transfer(*delivery, b"m", false);
        }
        engine.push_batch(
            deliveries
                .iter()
                .map(|&delivery| EngineEvent::Delivery { link: LINK, delivery }),
        );
    } else {
        for delivery in &deliveries {
            engine.deliver(LINK, *delivery, b"m");
        }
    }
    engine.push_batch([EngineEvent::Inactive]);

    let report = session
        .run(&mut engine, &CancellationToken::new())
        .expect("reaching the limit is a clean shutdown");

    assert!(report.limit_reached);
    assert_eq!(report.received, 2);
    assert_eq!(report.staging.queued, 2);
    for delivery in &deliveries[2..] {
        assert!(engine.settlements(*delivery).is_empty());
    }
    assert!(engine.received(&EngineCommand::CloseConnection));

    consumer.acquire_next().expect("first message");
    consumer.acquire_next().expect("second message");
    assert!(consumer.try_acquire_next().is_none());
}

#[rstest]
fn cancelled_session_closes_without_reading(session: (Session, Consumer)) {
    let (mut session, _consumer) = session;
    let mut engine = MockEngine::new();
    engine.push_batch([EngineEvent::ConnectionInit]);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let report = session
        .run(&mut engine, &shutdown)
        .expect("cancellation is a clean shutdown");

    assert_eq!(report.batches, 0);
    assert_eq!(engine.commands(), [EngineCommand::CloseConnection]);
}

#[rstest]
fn read_errors_are_counted_not_fatal(session: (Session, Consumer)) {
    let (mut session, _consumer) = session;
    let mut engine = MockEngine::new();
    engine.fail_reads(DeliveryId(5), 3).deliver(LINK, DeliveryId(5), b"x");
    engine.push_batch([EngineEvent::Inactive]);

    let report = session
        .run(&mut engine, &CancellationToken::new())
        .expect("read errors do not end the session");

    assert_eq!(report.read_errors, 1);
    assert_eq!(report.received, 0);
}

#[rstest]
fn dropped_consumer_ends_the_session(session: (Session, Consumer)) {
    let (mut session, consumer) = session;
    drop(consumer);
    let mut engine = MockEngine::new();
    engine.deliver(LINK, DeliveryId(1), b"orphan");

    let err = session
        .run(&mut engine, &CancellationToken::new())
        .expect_err("a closed buffer is fatal");

    assert!(matches!(err, SessionError::Staging(StagingError::Closed)));
    assert_eq!(err.exit_code(), 2);
}

#[rstest]
#[serial(logging)]
fn fatal_condition_is_logged_as_error(session: (Session, Consumer), mut logger: LoggerHandle) {
    let (mut session, _consumer) = session;
    let mut engine = MockEngine::new();
    engine.push_batch([EngineEvent::ConnectionRemoteClose {
        condition: Some(Condition::new("amqp:connection:forced", "bye")),
    }]);

    let _ = session.run(&mut engine, &CancellationToken::new());

    let errors = logger.messages_at(Level::Error);
    assert!(
        errors.iter().any(|message| message.contains("remote error")),
        "expected remote error log, got {errors:?}"
    );
}
