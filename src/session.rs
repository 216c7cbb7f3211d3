//! Producer-side event loop driving one receive session.
//!
//! A [`Session`] pulls event batches from a [`ProtocolEngine`], answers the
//! connection lifecycle, feeds delivery events to its [`Reassembler`] and
//! stops when the engine goes inactive, a fatal remote condition arrives or
//! shutdown is requested.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::BridgeConfig,
    engine::{Condition, LinkId, ProtocolEngine, TransportSettings},
    event::EngineEvent,
    reassembly::{DeliveryError, Reassembler, ReassemblyStats},
    staging::{Producer, StagingError, StagingStats},
};

/// Name given to the receiver link.
pub const RECEIVER_LINK_NAME: &str = "rxbridge_receiver";

/// SASL mechanisms offered to the peer.
const ALLOWED_MECHS: &str = "ANONYMOUS";

/// Errors that end a receive session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer or the transport closed an endpoint with an error condition.
    #[error("{event}: {condition}")]
    Remote {
        /// Name of the event that carried the condition.
        event: &'static str,
        /// The reported condition.
        condition: Condition,
    },
    /// The consumer half of the staging buffer went away.
    #[error(transparent)]
    Staging(#[from] StagingError),
}

impl SessionError {
    /// Process exit status an embedding binary should report.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Remote { .. } => 1,
            Self::Staging(_) => 2,
        }
    }
}

/// Summary of a finished session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    /// Messages committed to the staging buffer.
    pub received: u64,
    /// Readable events that left a delivery incomplete.
    pub partial: u64,
    /// Deliveries aborted by the sender.
    pub aborted: u64,
    /// Deliveries discarded for exceeding the slot capacity.
    pub oversize: u64,
    /// Unexpected engine read errors.
    pub read_errors: u64,
    /// Event batches processed.
    pub batches: u64,
    /// Total credit granted to the sender.
    pub credit_granted: u64,
    /// Wall time spent in [`Session::run`].
    pub elapsed: Duration,
    /// Whether the session stopped because the message limit was reached.
    pub limit_reached: bool,
    /// Staging buffer counters at the end of the session.
    pub staging: StagingStats,
}

/// Whether the loop keeps going after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// One receive session: a connection, a session and a receiver link.
#[derive(Debug)]
pub struct Session {
    config: BridgeConfig,
    reassembler: Reassembler,
    link: Option<LinkId>,
    batches: u64,
    closing: bool,
}

impl Session {
    /// Build a session that commits into `producer`.
    #[must_use]
    pub fn new(config: BridgeConfig, producer: Producer) -> Self {
        let reassembler = Reassembler::new(producer).with_message_limit(config.message_limit());
        Self {
            config,
            reassembler,
            link: None,
            batches: 0,
            closing: false,
        }
    }

    /// Receiver link opened by this session, once the connection initialised.
    #[must_use]
    pub fn link(&self) -> Option<LinkId> { self.link }

    /// Reassembly counters so far.
    #[must_use]
    pub fn stats(&self) -> ReassemblyStats { self.reassembler.stats() }

    /// Process engine events until the engine is inactive or shut down.
    ///
    /// Cancelling `shutdown` closes the connection and returns before the next
    /// batch is requested.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Remote`] when an endpoint closes with an error
    /// condition and [`SessionError::Staging`] when the consumer has gone.
    pub fn run<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        shutdown: &CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let started = Instant::now();
        info!(
            container_id = self.config.container_id(),
            source = self.config.source_address(),
            "receive session starting"
        );
        let result = self.drive(engine, shutdown);
        let report = self.report(started.elapsed());
        match &result {
            Ok(()) => info!(
                received = report.received,
                overruns = report.staging.overruns,
                batches = report.batches,
                elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                "receive session finished"
            ),
            Err(err) => error!(error = %err, received = report.received, "receive session failed"),
        }
        result.map(|()| report)
    }

    fn drive<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        shutdown: &CancellationToken,
    ) -> Result<(), SessionError> {
        loop {
            if shutdown.is_cancelled() {
                info!("shutdown requested; closing connection");
                self.close_connection(engine);
                return Ok(());
            }
            let Some(batch) = engine.next_batch() else {
                debug!("engine finished");
                return Ok(());
            };
            self.batches += 1;
            let flow = self.handle_batch(engine, batch);
            engine.batch_done();
            if flow? == Flow::Stop {
                return Ok(());
            }
        }
    }

    fn handle_batch<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        batch: Vec<EngineEvent>,
    ) -> Result<Flow, SessionError> {
        for event in batch {
            if self.handle_event(engine, event)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn handle_event<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        event: EngineEvent,
    ) -> Result<Flow, SessionError> {
        let name = event.name();
        match event {
            EngineEvent::Delivery { link, delivery } => {
                match self.reassembler.on_delivery(engine, link, delivery) {
                    Ok(report) if report.limit_reached => {
                        info!(
                            received = self.reassembler.stats().received,
                            "message limit reached; closing connection"
                        );
                        self.close_connection(engine);
                        return Ok(Flow::Stop);
                    }
                    Ok(_) => {}
                    Err(DeliveryError::Read { delivery, code }) => {
                        warn!(%delivery, code, "delivery dropped after read error");
                    }
                    Err(DeliveryError::Staging(err)) => return Err(err.into()),
                }
            }
            EngineEvent::ConnectionInit => {
                debug!(event = name, container_id = self.config.container_id());
                engine.open_connection(self.config.container_id());
                engine.open_session();
                let link = engine.open_receiver(RECEIVER_LINK_NAME, self.config.source_address());
                self.link = Some(link);
                self.reassembler.grant_initial_credit(engine, link);
            }
            EngineEvent::ConnectionBound => {
                debug!(event = name);
                engine.configure_transport(TransportSettings {
                    require_auth: false,
                    allowed_mechs: ALLOWED_MECHS,
                    max_frame: self.config.slot_capacity(),
                });
            }
            EngineEvent::SessionInit => {
                debug!(event = name);
                engine.configure_session(
                    self.config.session_incoming_capacity(),
                    self.config.slot_count(),
                );
            }
            EngineEvent::ConnectionRemoteOpen => {
                engine.open_connection(self.config.container_id());
                info!(
                    container_id = self.config.container_id(),
                    source = self.config.source_address(),
                    "connection open"
                );
            }
            EngineEvent::SessionRemoteOpen => {
                debug!(event = name);
                engine.open_session();
            }
            EngineEvent::ConnectionLocalOpen
            | EngineEvent::SessionLocalOpen
            | EngineEvent::Timeout => debug!(event = name),
            EngineEvent::TransportClosed { condition } => {
                self.check_condition(engine, name, condition)?;
            }
            EngineEvent::ConnectionRemoteClose { condition } => {
                self.check_condition(engine, name, condition)?;
                self.close_connection(engine);
            }
            EngineEvent::SessionRemoteClose { condition } => {
                self.check_condition(engine, name, condition)?;
                engine.close_session();
            }
            EngineEvent::LinkRemoteClose { link, condition }
            | EngineEvent::LinkRemoteDetach { link, condition } => {
                self.check_condition(engine, name, condition)?;
                engine.close_link(link, None);
                if self.link == Some(link) {
                    self.link = None;
                }
            }
            EngineEvent::Inactive => {
                debug!(event = name);
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Treat a set condition as fatal: log it and close the connection.
    fn check_condition<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        event: &'static str,
        condition: Option<Condition>,
    ) -> Result<(), SessionError> {
        let Some(condition) = condition else {
            debug!(event, "endpoint closed");
            return Ok(());
        };
        error!(
            event,
            condition = condition.name(),
            description = condition.description(),
            "remote error"
        );
        self.close_connection(engine);
        Err(SessionError::Remote { event, condition })
    }

    fn close_connection<E: ProtocolEngine + ?Sized>(&mut self, engine: &mut E) {
        if !self.closing {
            self.closing = true;
            engine.close_connection();
        }
    }

    fn report(&self, elapsed: Duration) -> SessionReport {
        let stats = self.reassembler.stats();
        SessionReport {
            received: stats.received,
            partial: stats.partial,
            aborted: stats.aborted,
            oversize: stats.oversize,
            read_errors: stats.read_errors,
            batches: self.batches,
            credit_granted: stats.credit_granted,
            elapsed,
            limit_reached: self.reassembler.limit_reached(),
            staging: self.reassembler.probe().stats(),
        }
    }
}
