//! Test helpers for `rxbridge`.
//!
//! [`MockEngine`] stands in for the AMQP protocol engine, the [`logger`]
//! fixture captures log output and the sinks in [`sink`] exercise the
//! consumer worker's error paths.
//!
//! ```rust
//! use rxbridge::{DeliveryId, LinkId, Reassembler, StagingBuffer};
//! use rxbridge_testing::MockEngine;
//!
//! let (producer, _consumer) = StagingBuffer::new(4, 64, false).unwrap().split();
//! let mut reassembler = Reassembler::new(producer);
//! let mut engine = MockEngine::new();
//! engine.transfer(DeliveryId(1), b"hello", false);
//! let report = reassembler
//!     .on_delivery(&mut engine, LinkId(1), DeliveryId(1))
//!     .unwrap();
//! assert!(!report.limit_reached);
//! ```

pub mod engine;
pub mod logging;
#[cfg(not(loom))]
pub mod sink;

pub use engine::{EngineCommand, MockEngine};
pub use logging::{LoggerHandle, logger};
#[cfg(not(loom))]
pub use sink::{FailingSink, SharedSink};
