//! Transport over any byte oriented peripheral.
use super::{Transport, TransportKind};
use crate::{
    devices::{
        packet::{self, Probe, COMMAND_OVERHEAD, MAX_FRAME_SIZE, MAX_PAYLOAD, SOF},
        traits::Peripheral,
    },
    error::TransportError,
    hal::time::{self, Milliseconds},
};
use nb::block;

/// Frames a stream of bytes into command packets. A partially received
/// frame is kept across calls to [`Transport::try_receive`], and bytes
/// that cannot start a frame are skipped until the next start marker.
pub struct StreamTransport<P: Peripheral, T: time::Now> {
    kind: TransportKind,
    peripheral: P,
    clock: T,
    started: bool,
    frame: [u8; MAX_FRAME_SIZE],
    filled: usize,
}

impl<P: Peripheral, T: time::Now> StreamTransport<P, T> {
    pub fn new(kind: TransportKind, peripheral: P, clock: T) -> Self {
        Self { kind, peripheral, clock, started: false, frame: [0u8; MAX_FRAME_SIZE], filled: 0 }
    }

    pub fn kind(&self) -> TransportKind { self.kind }
    pub fn peripheral(&self) -> &P { &self.peripheral }
    pub fn peripheral_mut(&mut self) -> &mut P { &mut self.peripheral }

    /// Number of buffered bytes belonging to an incomplete frame.
    pub fn pending(&self) -> usize { self.filled }

    fn consume(&mut self, count: usize) {
        self.frame.copy_within(count..self.filled, 0);
        self.filled -= count;
    }

    /// Drops bytes up to the next start marker after the first byte.
    fn resynchronise(&mut self) {
        let skip = self.frame[1..self.filled]
            .iter()
            .position(|b| *b == SOF)
            .map_or(self.filled, |position| position + 1);
        dfu_trace!("Resynchronising {}: skipped {} bytes", self.kind.label(), skip);
        self.consume(skip);
    }

    fn push(&mut self, byte: u8) {
        if self.filled == self.frame.len() {
            self.filled = 0;
        }
        self.frame[self.filled] = byte;
        self.filled += 1;
    }
}

impl<P: Peripheral, T: time::Now> Transport for StreamTransport<P, T> {
    fn start(&mut self) -> Result<(), TransportError> {
        self.peripheral.enable();
        self.started = true;
        self.filled = 0;
        Ok(())
    }

    fn stop(&mut self) {
        self.peripheral.disable();
        self.started = false;
        self.filled = 0;
    }

    fn reset(&mut self) { self.filled = 0; }

    fn try_receive<'b>(
        &mut self,
        buffer: &'b mut [u8],
        timeout: Milliseconds,
    ) -> Result<Option<&'b [u8]>, TransportError> {
        if !self.started {
            return Err(TransportError::NotStarted);
        }
        let capacity = buffer.len().saturating_sub(COMMAND_OVERHEAD).min(MAX_PAYLOAD);
        let start = self.clock.now();
        let mut polled = false;

        loop {
            match packet::probe(&self.frame[..self.filled], capacity) {
                Probe::Complete(length) => {
                    buffer[..length].copy_from_slice(&self.frame[..length]);
                    self.consume(length);
                    return Ok(Some(&buffer[..length]));
                }
                Probe::Garbage => {
                    self.resynchronise();
                    continue;
                }
                Probe::Incomplete => (),
            }

            // The peripheral is polled at least once, even on a zero budget.
            if polled && self.clock.now() - start >= timeout {
                return Ok(None);
            }
            polled = true;

            match self.peripheral.read() {
                Ok(byte) => self.push(byte),
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(_)) => {
                    dfu_warn!("Receive error on {}, dropping partial frame", self.kind.label());
                    self.filled = 0;
                }
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.started {
            return Err(TransportError::NotStarted);
        }
        for byte in bytes {
            block!(self.peripheral.write(*byte)).map_err(|_| TransportError::SendFailed)?;
        }
        Ok(())
    }
}
