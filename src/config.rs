//! Configuration layer.
//!
//! Everything tunable about a DFU session is gathered in
//! [`Configuration`]. The defaults reproduce the reference board setup;
//! with the `serde` feature a configuration can also be loaded from a
//! partial description (missing fields take their default values).
use crate::{
    devices::{packet::ChecksumKind, transport::TransportKind},
    error::Error,
    hal::time::Milliseconds,
    utilities::memory::Region,
};
use static_assertions::const_assert;

/// Upper bound for [`Configuration::row_size`], and size of the image
/// store's row staging buffer.
pub const MAX_ROW_SIZE: usize = 512;
/// Number of physical transports a board can offer.
pub const TRANSPORT_COUNT: usize = 3;

pub const DEFAULT_COMMAND_TIMEOUT_MS: u32 = 5_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 300_000;
pub const DEFAULT_TICK_MS: u32 = 20;
pub const DEFAULT_ROW_SIZE: usize = 128;
pub const BOOT_IMAGE_HEARTBEAT_MS: u32 = 1_000;
pub const UPDATE_IMAGE_HEARTBEAT_MS: u32 = 500;

const_assert!(DEFAULT_TICK_MS > 0);
const_assert!(DEFAULT_COMMAND_TIMEOUT_MS >= DEFAULT_TICK_MS);
const_assert!(DEFAULT_IDLE_TIMEOUT_MS >= DEFAULT_COMMAND_TIMEOUT_MS);
const_assert!(DEFAULT_ROW_SIZE.is_power_of_two() && DEFAULT_ROW_SIZE <= MAX_ROW_SIZE);

/// Which firmware image is running the DFU loop. Only affects the
/// heartbeat pattern, so the two images can be told apart at a glance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageKind {
    Boot,
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Configuration {
    /// Maximum silence allowed between commands once an update started.
    pub command_timeout_ms: u32,
    /// Silence after which an idle session is reported to the caller.
    pub idle_timeout_ms: u32,
    /// Period of the main loop, and bound for every transport poll.
    pub tick_ms: u32,
    /// Largest payload accepted in a single command frame.
    pub max_payload: usize,
    pub checksum_kind: ChecksumKind,
    /// Flash programming granularity. Must be a power of two.
    pub row_size: usize,
    /// Region every address-bearing command is confined to.
    pub application_region: Region,
    pub initial_transport: TransportKind,
    /// Transports enabled on this board, in switching order.
    pub transport_order: [Option<TransportKind>; TRANSPORT_COUNT],
    pub heartbeat_interval_ms: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            tick_ms: DEFAULT_TICK_MS,
            max_payload: crate::devices::packet::MAX_PAYLOAD,
            checksum_kind: ChecksumKind::Additive,
            row_size: DEFAULT_ROW_SIZE,
            application_region: Region::new(0x0001_0000, 0x0008_0000),
            initial_transport: TransportKind::I2c,
            transport_order: [
                Some(TransportKind::I2c),
                Some(TransportKind::Spi),
                Some(TransportKind::Uart),
            ],
            heartbeat_interval_ms: BOOT_IMAGE_HEARTBEAT_MS,
        }
    }
}

impl Configuration {
    /// Default configuration, with the heartbeat matching the running image.
    pub fn for_image(kind: ImageKind) -> Self {
        let heartbeat_interval_ms = match kind {
            ImageKind::Boot => BOOT_IMAGE_HEARTBEAT_MS,
            ImageKind::Update => UPDATE_IMAGE_HEARTBEAT_MS,
        };
        Self { heartbeat_interval_ms, ..Self::default() }
    }

    pub fn tick(&self) -> Milliseconds { Milliseconds(self.tick_ms) }
    pub fn command_timeout(&self) -> Milliseconds { Milliseconds(self.command_timeout_ms) }
    pub fn idle_timeout(&self) -> Milliseconds { Milliseconds(self.idle_timeout_ms) }
    pub fn heartbeat_interval(&self) -> Milliseconds { Milliseconds(self.heartbeat_interval_ms) }

    /// Enabled transports, in switching order.
    pub fn transports(&self) -> impl Iterator<Item = TransportKind> + '_ {
        self.transport_order.iter().flatten().copied()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tick_ms == 0 {
            return Err(Error::Configuration("Tick period must not be zero"));
        }
        if self.command_timeout_ms < self.tick_ms || self.idle_timeout_ms < self.tick_ms {
            return Err(Error::Configuration("Timeouts must span at least one tick"));
        }
        if self.max_payload == 0 || self.max_payload > crate::devices::packet::MAX_PAYLOAD {
            return Err(Error::Configuration("Maximum payload exceeds packet buffer"));
        }
        if !self.row_size.is_power_of_two() || self.row_size > MAX_ROW_SIZE {
            return Err(Error::Configuration("Row size must be a power of two within bounds"));
        }
        if self.application_region.is_empty()
            || !self.application_region.is_aligned_to(self.row_size)
        {
            return Err(Error::Configuration("Application region must be row aligned"));
        }
        if self.transports().next().is_none() {
            return Err(Error::Configuration("No transport enabled"));
        }
        if !self.transports().any(|kind| kind == self.initial_transport) {
            return Err(Error::Configuration("Initial transport is not enabled"));
        }
        Ok(())
    }
}
