//! Mutable state of one DFU session.
use super::{transport::TransportKind, verification::Fingerprint};
use crate::{config::Configuration, hal::time::Stopwatch, utilities::memory::Region};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    Updating,
    Finished(Outcome),
    Failed,
}

impl State {
    /// Terminal states persist until the session is reinitialised.
    pub fn is_terminal(self) -> bool { matches!(self, State::Finished(_) | State::Failed) }
}

pub fn is_terminal(state: State) -> bool { state.is_terminal() }

/// Declared extent and fingerprint of the image being transferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageDescriptor {
    pub base_address: u32,
    pub length: u32,
    pub fingerprint: Fingerprint,
}

impl ImageDescriptor {
    pub fn region(&self) -> Option<Region> { Region::from_length(self.base_address, self.length) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Session {
    pub state: State,
    pub active_transport: TransportKind,
    pub elapsed_idle: Stopwatch,
    pub elapsed_command: Stopwatch,
    /// Next address `PROGRAM_DATA` writes to.
    pub current_write_address: u32,
    pub bytes_received_since_checksum_reset: u32,
    /// CRC32 of every byte programmed since the last checksum reset.
    pub running_checksum: u32,
    pub descriptor: Option<ImageDescriptor>,
    /// Region every address-bearing command is confined to.
    pub region: Region,
}

impl Session {
    pub fn new(configuration: &Configuration) -> Self {
        Self::blank(configuration.application_region, configuration.initial_transport)
    }

    /// Back to `Idle` with fresh counters, keeping the active transport.
    pub fn reinitialize(&mut self) {
        *self = Self::blank(self.region, self.active_transport);
    }

    /// Rewinds the write cursor and forgets the transfer progress.
    pub fn restart_transfer(&mut self) {
        self.current_write_address = self.region.start;
        self.bytes_received_since_checksum_reset = 0;
        self.running_checksum = 0;
    }

    fn blank(region: Region, active_transport: TransportKind) -> Self {
        Self {
            state: State::Idle,
            active_transport,
            elapsed_idle: Stopwatch::new(),
            elapsed_command: Stopwatch::new(),
            current_write_address: region.start,
            bytes_received_since_checksum_reset: 0,
            running_checksum: 0,
            descriptor: None,
            region,
        }
    }
}
