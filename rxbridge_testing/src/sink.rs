//! Message sinks for consumer worker tests.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use rxbridge::MessageSink;

/// Sink that accepts `accept` messages and then fails every delivery.
#[derive(Debug)]
pub struct FailingSink {
    accept: usize,
    delivered: Vec<Vec<u8>>,
}

impl FailingSink {
    #[must_use]
    pub fn new(accept: usize) -> Self {
        Self {
            accept,
            delivered: Vec::new(),
        }
    }

    /// Messages accepted before the first failure.
    #[must_use]
    pub fn delivered(&self) -> &[Vec<u8>] { &self.delivered }
}

impl MessageSink for FailingSink {
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()> {
        if self.delivered.len() >= self.accept {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "downstream closed"));
        }
        self.delivered.push(payload.to_vec());
        Ok(())
    }
}

/// Sink whose messages stay observable while the worker owns it.
#[derive(Clone, Debug, Default)]
pub struct SharedSink {
    messages: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SharedSink {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Copy of the messages delivered so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MessageSink for SharedSink {
    fn deliver(&mut self, payload: &[u8]) -> io::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_vec());
        Ok(())
    }
}
