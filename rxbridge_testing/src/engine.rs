//! Scripted in-memory [`ProtocolEngine`].
//!
//! [`MockEngine`] replays queued event batches, serves delivery bytes pushed
//! by the test and records every command the bridge issues so tests can
//! assert on settlements, credit grants and lifecycle responses.

use std::collections::{HashMap, VecDeque};

use rxbridge::{
    Condition,
    DeliveryId,
    Disposition,
    EngineEvent,
    LinkId,
    ProtocolEngine,
    RecvError,
    TransportSettings,
};

/// A command received from the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCommand {
    Settle {
        delivery: DeliveryId,
        disposition: Option<Disposition>,
    },
    Flow {
        link: LinkId,
        credit: u32,
    },
    CloseLink {
        link: LinkId,
        condition: Option<Condition>,
    },
    OpenConnection {
        container_id: String,
    },
    CloseConnection,
    ConfigureTransport(TransportSettings),
    OpenSession,
    ConfigureSession {
        incoming_capacity: usize,
        outgoing_window: usize,
    },
    CloseSession,
    OpenReceiver {
        name: String,
        source: String,
        link: LinkId,
    },
}

#[derive(Debug, Default)]
struct MockDelivery {
    bytes: VecDeque<u8>,
    partial: bool,
    aborted: bool,
    error: Option<i32>,
    settled: bool,
}

/// Scripted engine serving a single receiver link.
///
/// Credit is modelled the way a sender sees it: every new delivery consumes
/// one unit, every `flow` adds to it.
#[derive(Debug)]
pub struct MockEngine {
    batches: VecDeque<Vec<EngineEvent>>,
    deliveries: HashMap<DeliveryId, MockDelivery>,
    credit: u32,
    read_chunk: usize,
    next_link: u64,
    batches_done: usize,
    commands: Vec<EngineCommand>,
}

impl Default for MockEngine {
    fn default() -> Self { Self::new() }
}

impl MockEngine {
    /// Create an engine with no events, no deliveries and no credit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: VecDeque::new(),
            deliveries: HashMap::new(),
            credit: 0,
            read_chunk: usize::MAX,
            next_link: 1,
            batches_done: 0,
            commands: Vec::new(),
        }
    }

    /// Return at most `chunk` bytes from each `recv` call.
    #[must_use]
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = chunk.max(1);
        self
    }

    /// Queue a batch returned by a later `next_batch`.
    pub fn push_batch(&mut self, events: impl IntoIterator<Item = EngineEvent>) -> &mut Self {
        self.batches.push_back(events.into_iter().collect());
        self
    }

    /// Append `bytes` to `delivery`, marking it partial when `more` is set.
    ///
    /// The first transfer of a delivery consumes one unit of link credit.
    pub fn transfer(&mut self, delivery: DeliveryId, bytes: &[u8], more: bool) -> &mut Self {
        if !self.deliveries.contains_key(&delivery) {
            self.credit = self.credit.saturating_sub(1);
        }
        let entry = self.deliveries.entry(delivery).or_default();
        entry.bytes.extend(bytes);
        entry.partial = more;
        self
    }

    /// Transfer a complete message and queue its delivery event as a batch.
    pub fn deliver(&mut self, link: LinkId, delivery: DeliveryId, bytes: &[u8]) -> &mut Self {
        self.transfer(delivery, bytes, false);
        self.push_batch([EngineEvent::Delivery { link, delivery }])
    }

    /// Mark `delivery` as aborted by the sender.
    pub fn abort(&mut self, delivery: DeliveryId) -> &mut Self {
        let entry = self.deliveries.entry(delivery).or_default();
        entry.aborted = true;
        entry.partial = false;
        self
    }

    /// Make every read of `delivery` fail with engine error `code`.
    pub fn fail_reads(&mut self, delivery: DeliveryId, code: i32) -> &mut Self {
        self.deliveries.entry(delivery).or_default().error = Some(code);
        self
    }

    /// Set the credit the sender currently holds.
    pub fn set_credit(&mut self, credit: u32) -> &mut Self {
        self.credit = credit;
        self
    }

    /// Credit the sender currently holds.
    #[must_use]
    pub fn credit(&self) -> u32 { self.credit }

    /// Every command received so far, in order.
    #[must_use]
    pub fn commands(&self) -> &[EngineCommand] { &self.commands }

    /// Remove and return the recorded commands.
    pub fn take_commands(&mut self) -> Vec<EngineCommand> { std::mem::take(&mut self.commands) }

    /// Credit amounts granted through `flow`, in order.
    #[must_use]
    pub fn flows(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                EngineCommand::Flow { credit, .. } => Some(*credit),
                _ => None,
            })
            .collect()
    }

    /// Dispositions `delivery` was settled with, in order.
    #[must_use]
    pub fn settlements(&self, delivery: DeliveryId) -> Vec<Option<Disposition>> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                EngineCommand::Settle {
                    delivery: settled,
                    disposition,
                } if *settled == delivery => Some(*disposition),
                _ => None,
            })
            .collect()
    }

    /// Whether `command` was recorded.
    #[must_use]
    pub fn received(&self, command: &EngineCommand) -> bool { self.commands.contains(command) }

    /// Number of `batch_done` calls.
    #[must_use]
    pub fn batches_done(&self) -> usize { self.batches_done }
}

impl ProtocolEngine for MockEngine {
    fn next_batch(&mut self) -> Option<Vec<EngineEvent>> { self.batches.pop_front() }

    fn batch_done(&mut self) { self.batches_done += 1; }

    fn is_readable(&self, delivery: DeliveryId) -> bool {
        self.deliveries.get(&delivery).is_some_and(|d| {
            !d.settled && (!d.bytes.is_empty() || d.aborted || d.error.is_some() || !d.partial)
        })
    }

    fn is_partial(&self, delivery: DeliveryId) -> bool {
        self.deliveries.get(&delivery).is_some_and(|d| d.partial)
    }

    fn pending(&self, delivery: DeliveryId) -> usize {
        self.deliveries.get(&delivery).map_or(0, |d| d.bytes.len())
    }

    fn recv(&mut self, delivery: DeliveryId, buf: &mut [u8]) -> Result<usize, RecvError> {
        let Some(entry) = self.deliveries.get_mut(&delivery) else {
            return Err(RecvError::EndOfStream);
        };
        if entry.aborted {
            return Err(RecvError::Aborted);
        }
        if let Some(code) = entry.error {
            return Err(RecvError::Transport(code));
        }
        if entry.bytes.is_empty() {
            return if entry.partial {
                Ok(0)
            } else {
                Err(RecvError::EndOfStream)
            };
        }
        let n = buf.len().min(entry.bytes.len()).min(self.read_chunk);
        for (dst, src) in buf.iter_mut().zip(entry.bytes.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn settle(&mut self, delivery: DeliveryId, disposition: Option<Disposition>) {
        if let Some(entry) = self.deliveries.get_mut(&delivery) {
            entry.settled = true;
        }
        self.commands.push(EngineCommand::Settle {
            delivery,
            disposition,
        });
    }

    fn link_credit(&self, _link: LinkId) -> u32 { self.credit }

    fn flow(&mut self, link: LinkId, credit: u32) {
        self.credit = self.credit.saturating_add(credit);
        self.commands.push(EngineCommand::Flow { link, credit });
    }

    fn close_link(&mut self, link: LinkId, condition: Option<Condition>) {
        self.commands.push(EngineCommand::CloseLink { link, condition });
    }

    fn open_connection(&mut self, container_id: &str) {
        self.commands.push(EngineCommand::OpenConnection {
            container_id: container_id.to_owned(),
        });
    }

    fn close_connection(&mut self) { self.commands.push(EngineCommand::CloseConnection); }

    fn configure_transport(&mut self, settings: TransportSettings) {
        self.commands
            .push(EngineCommand::ConfigureTransport(settings));
    }

    fn open_session(&mut self) { self.commands.push(EngineCommand::OpenSession); }

    fn configure_session(&mut self, incoming_capacity: usize, outgoing_window: usize) {
        self.commands.push(EngineCommand::ConfigureSession {
            incoming_capacity,
            outgoing_window,
        });
    }

    fn close_session(&mut self) { self.commands.push(EngineCommand::CloseSession); }

    fn open_receiver(&mut self, name: &str, source: &str) -> LinkId {
        let link = LinkId(self.next_link);
        self.next_link += 1;
        self.commands.push(EngineCommand::OpenReceiver {
            name: name.to_owned(),
            source: source.to_owned(),
            link,
        });
        link
    }
}
