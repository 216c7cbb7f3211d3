#![doc(html_root_url = "https://docs.rs/rxbridge/latest")]
//! Public API for the `rxbridge` library.
//!
//! This crate provides the receive side of an AMQP bridge: a bounded staging
//! buffer shared by a producer and a consumer thread, a delivery reassembler
//! that fills it from a protocol engine, and the credit backpressure that
//! keeps the sender within the buffer's capacity.

pub mod config;
pub mod engine;
pub mod event;
pub mod metrics;
pub mod reassembly;
pub mod session;
pub mod staging;
#[cfg(not(loom))]
pub mod worker;

pub use config::{BridgeConfig, BridgeConfigBuilder, ConfigError};
pub use engine::{
    Condition,
    DeliveryId,
    Disposition,
    LinkId,
    ProtocolEngine,
    RecvError,
    TransportSettings,
};
pub use event::EngineEvent;
pub use reassembly::{DeliveryError, DeliveryOutcome, DeliveryReport, Reassembler, ReassemblyStats};
pub use session::{Session, SessionError, SessionReport};
pub use staging::{
    BufferProbe,
    CommitOutcome,
    Consumer,
    Producer,
    SlotMut,
    SlotRef,
    StagingBuffer,
    StagingError,
    StagingStats,
};
#[cfg(not(loom))]
pub use worker::{ConsumerWorker, MessageSink, VecSink, WorkerError, WorkerReport, spawn_consumer};
