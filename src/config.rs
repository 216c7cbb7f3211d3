//! Receive-session configuration.
//!
//! [`BridgeConfig`] carries the sizing and policy knobs consumed by the
//! staging buffer, the reassembler and the session driver. The crate does not
//! own any configuration source: embedding applications build the value via
//! [`BridgeConfig::builder`] or deserialize it with `serde` from whatever
//! format they already use.

use std::num::{NonZeroU64, NonZeroUsize};

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

/// Default capacity of a single staging slot in bytes.
pub const DEFAULT_SLOT_CAPACITY: usize = 4096;
/// Default number of staging slots.
pub const DEFAULT_SLOT_COUNT: usize = 16;
/// Smallest usable slot count: one write slot plus the consumer sentinel.
pub const MIN_SLOT_COUNT: usize = 2;

const_assert!(DEFAULT_SLOT_COUNT >= MIN_SLOT_COUNT);
const_assert!(DEFAULT_SLOT_CAPACITY > 0);

const DEFAULT_CONTAINER_ID: &str = "rxbridge";
const DEFAULT_SOURCE_ADDRESS: &str = "examples";

/// Errors returned when validating a [`BridgeConfig`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Fewer than [`MIN_SLOT_COUNT`] slots were requested.
    #[error("invalid slot count {0}; must be at least {min}", min = MIN_SLOT_COUNT)]
    InvalidSlotCount(usize),
    /// A zero slot capacity was requested.
    #[error("invalid slot capacity; must be greater than zero")]
    InvalidSlotCapacity,
    /// `slot_count * slot_capacity` does not fit in `usize`.
    #[error("staging buffer size overflows: {count} slots of {capacity} bytes")]
    BufferTooLarge {
        /// Requested slot count.
        count: usize,
        /// Requested per-slot capacity.
        capacity: usize,
    },
}

/// Sizing and policy for one receive session.
///
/// # Examples
///
/// ```
/// use rxbridge::BridgeConfig;
///
/// let config = BridgeConfig::builder()
///     .slot_count(4)
///     .slot_capacity(1024)
///     .block_producer(true)
///     .build()
///     .expect("valid config");
///
/// assert_eq!(config.slot_count(), 4);
/// assert_eq!(config.session_incoming_capacity(), 4096);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    slot_capacity: usize,
    slot_count: usize,
    block_producer: bool,
    message_limit: Option<NonZeroU64>,
    container_id: String,
    source_address: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            slot_count: DEFAULT_SLOT_COUNT,
            block_producer: false,
            message_limit: None,
            container_id: DEFAULT_CONTAINER_ID.to_owned(),
            source_address: DEFAULT_SOURCE_ADDRESS.to_owned(),
        }
    }
}

impl BridgeConfig {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder { BridgeConfigBuilder::default() }

    /// Check the sizing invariants.
    ///
    /// Deserialized configurations bypass the builder, so callers should
    /// validate them before use. [`crate::StagingBuffer::from_config`] does
    /// this automatically.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the slot count is below
    /// [`MIN_SLOT_COUNT`], the slot capacity is zero, or the total buffer size
    /// overflows `usize`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        SlotGeometry::new(self.slot_count, self.slot_capacity).map(|_| ())
    }

    /// Capacity of each staging slot in bytes.
    #[must_use]
    pub const fn slot_capacity(&self) -> usize { self.slot_capacity }

    /// Number of staging slots.
    #[must_use]
    pub const fn slot_count(&self) -> usize { self.slot_count }

    /// Whether a full buffer suspends the producer instead of dropping.
    #[must_use]
    pub const fn block_producer(&self) -> bool { self.block_producer }

    /// Number of committed messages after which the session shuts down.
    #[must_use]
    pub const fn message_limit(&self) -> Option<NonZeroU64> { self.message_limit }

    /// Container id announced on the connection.
    #[must_use]
    pub fn container_id(&self) -> &str { &self.container_id }

    /// Source address of the receiver link.
    #[must_use]
    pub fn source_address(&self) -> &str { &self.source_address }

    /// Session incoming capacity: room for every slot at full size.
    #[must_use]
    pub const fn session_incoming_capacity(&self) -> usize {
        self.slot_capacity.saturating_mul(self.slot_count)
    }
}

/// Consuming builder for [`BridgeConfig`].
#[derive(Clone, Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Set the capacity of each slot in bytes.
    ///
    /// Deliveries of this size or larger are drained and discarded.
    #[must_use]
    pub fn slot_capacity(mut self, capacity: usize) -> Self {
        self.config.slot_capacity = capacity;
        self
    }

    /// Set the number of slots.
    #[must_use]
    pub fn slot_count(mut self, count: usize) -> Self {
        self.config.slot_count = count;
        self
    }

    /// Suspend the producer on a full buffer instead of counting an overrun.
    #[must_use]
    pub fn block_producer(mut self, block: bool) -> Self {
        self.config.block_producer = block;
        self
    }

    /// Stop the session after `limit` committed messages.
    #[must_use]
    pub fn message_limit(mut self, limit: Option<NonZeroU64>) -> Self {
        self.config.message_limit = limit;
        self
    }

    /// Set the container id announced when opening the connection.
    #[must_use]
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.config.container_id = id.into();
        self
    }

    /// Set the source address the receiver link attaches to.
    #[must_use]
    pub fn source_address(mut self, address: impl Into<String>) -> Self {
        self.config.source_address = address.into();
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// See [`BridgeConfig::validate`].
    pub fn build(self) -> Result<BridgeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Slot geometry validated for buffer construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotGeometry {
    pub(crate) count: usize,
    pub(crate) capacity: NonZeroUsize,
}

impl SlotGeometry {
    pub(crate) fn new(count: usize, capacity: usize) -> Result<Self, ConfigError> {
        if count < MIN_SLOT_COUNT {
            return Err(ConfigError::InvalidSlotCount(count));
        }
        let capacity = NonZeroUsize::new(capacity).ok_or(ConfigError::InvalidSlotCapacity)?;
        if count.checked_mul(capacity.get()).is_none() {
            return Err(ConfigError::BufferTooLarge {
                count,
                capacity: capacity.get(),
            });
        }
        Ok(Self { count, capacity })
    }
}
