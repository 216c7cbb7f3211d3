//! Consumer thread draining the staging buffer into a downstream sink.

use std::{
    fmt,
    io,
    thread::{self, JoinHandle},
};

use log::{debug, error, info};
use serde::Serialize;
use thiserror::Error;

use crate::staging::{Consumer, StagingError, StagingStats};

/// Name of the thread started by [`spawn_consumer`].
pub const CONSUMER_THREAD_NAME: &str = "rxbridge-consumer";

/// Destination for messages taken from the staging buffer.
///
/// `deliver` is called once per message with a view that is only valid for
/// the duration of the call.
pub trait MessageSink: Send {
    /// Forward one message downstream.
    ///
    /// # Errors
    ///
    /// Any error stops the consumer worker.
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Flush buffered output once the staging buffer has closed.
    ///
    /// # Errors
    ///
    /// Reported from [`ConsumerWorker::join`].
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

impl<S: MessageSink + ?Sized> MessageSink for Box<S> {
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()> { (**self).deliver(payload) }

    fn flush(&mut self) -> io::Result<()> { (**self).flush() }
}

/// Sink collecting every message into memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VecSink {
    messages: Vec<Vec<u8>>,
}

impl VecSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Messages received so far, in delivery order.
    #[must_use]
    pub fn messages(&self) -> &[Vec<u8>] { &self.messages }

    /// Take ownership of the collected messages.
    #[must_use]
    pub fn into_messages(self) -> Vec<Vec<u8>> { self.messages }
}

impl MessageSink for VecSink {
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()> {
        self.messages.push(payload.to_vec());
        Ok(())
    }
}

/// Errors reported by [`ConsumerWorker::join`].
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The sink failed to accept or flush a message.
    #[error("message sink failed: {0}")]
    Sink(#[from] io::Error),
    /// The worker thread panicked.
    #[error("consumer worker panicked")]
    Panicked,
}

/// Totals reported by a finished consumer worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Messages handed to the sink.
    pub delivered: u64,
    /// Bytes handed to the sink.
    pub bytes: u64,
    /// Staging buffer counters when the worker stopped.
    pub staging: StagingStats,
}

/// Handle to a running consumer thread.
pub struct ConsumerWorker<S> {
    handle: JoinHandle<(S, Result<WorkerReport, WorkerError>)>,
}

impl<S> ConsumerWorker<S> {
    /// Whether the worker thread has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.handle.is_finished() }

    /// Wait for the worker to stop and return its report.
    ///
    /// The worker stops once the producer half is dropped and every committed
    /// message has been delivered, or as soon as the sink fails.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Sink`] for sink failures and
    /// [`WorkerError::Panicked`] if the thread panicked.
    pub fn join(self) -> Result<WorkerReport, WorkerError> { self.join_with_sink().1 }

    /// Like [`join`](Self::join), also returning the sink.
    ///
    /// The sink is `None` only when the worker thread panicked.
    pub fn join_with_sink(self) -> (Option<S>, Result<WorkerReport, WorkerError>) {
        match self.handle.join() {
            Ok((sink, result)) => (Some(sink), result),
            Err(_) => {
                error!("consumer worker panicked");
                (None, Err(WorkerError::Panicked))
            }
        }
    }
}

impl<S> fmt::Debug for ConsumerWorker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerWorker")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Start a thread forwarding every message from `consumer` to `sink`.
///
/// # Errors
///
/// Returns the I/O error raised when the thread cannot be spawned.
pub fn spawn_consumer<S>(consumer: Consumer, sink: S) -> io::Result<ConsumerWorker<S>>
where
    S: MessageSink + 'static,
{
    let handle = thread::Builder::new()
        .name(CONSUMER_THREAD_NAME.to_owned())
        .spawn(move || {
            let mut consumer = consumer;
            let mut sink = sink;
            let result = drain(&mut consumer, &mut sink);
            (sink, result)
        })?;
    Ok(ConsumerWorker { handle })
}

fn drain<S: MessageSink + ?Sized>(
    consumer: &mut Consumer,
    sink: &mut S,
) -> Result<WorkerReport, WorkerError> {
    debug!("consumer worker started");
    let mut delivered = 0_u64;
    let mut bytes = 0_u64;
    loop {
        match consumer.acquire_next() {
            Ok(message) => {
                if let Err(err) = sink.deliver(&message) {
                    error!("message sink rejected message {}: {err}", delivered + 1);
                    return Err(err.into());
                }
                delivered += 1;
                bytes += message.len() as u64;
            }
            Err(StagingError::Closed) => break,
        }
    }
    sink.flush()?;
    let report = WorkerReport {
        delivered,
        bytes,
        staging: consumer.stats(),
    };
    info!(
        "consumer worker drained staging buffer: {delivered} messages, {bytes} bytes"
    );
    Ok(report)
}
