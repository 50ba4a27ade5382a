//! Physical links carrying DFU frames.
//!
//! Each medium implements [`Transport`]. A board owns one binding per
//! medium inside [`Transports`], of which exactly one is active at any
//! time.
use crate::{
    config::{Configuration, TRANSPORT_COUNT},
    error::TransportError,
    hal::time::Milliseconds,
};

pub mod stream;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    I2c,
    Uart,
    Spi,
}

impl TransportKind {
    pub fn label(self) -> &'static str {
        match self {
            TransportKind::I2c => "I2C",
            TransportKind::Uart => "UART",
            TransportKind::Spi => "SPI",
        }
    }
}

pub trait Transport {
    /// Brings the link up. Must precede any send or receive.
    fn start(&mut self) -> Result<(), TransportError>;
    /// Brings the link down. Partially received data is lost.
    fn stop(&mut self);
    /// Discards any partially received frame, keeping the link up.
    fn reset(&mut self);
    /// Waits at most `timeout` for a complete frame, which is copied into
    /// `buffer`. Returns `None` if no frame was completed in time.
    fn try_receive<'b>(
        &mut self,
        buffer: &'b mut [u8],
        timeout: Milliseconds,
    ) -> Result<Option<&'b [u8]>, TransportError>;
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Placeholder binding for a medium the board does not offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unavailable;

impl Transport for Unavailable {
    fn start(&mut self) -> Result<(), TransportError> { Err(TransportError::NotStarted) }
    fn stop(&mut self) {}
    fn reset(&mut self) {}
    fn try_receive<'b>(
        &mut self,
        _: &'b mut [u8],
        _: Milliseconds,
    ) -> Result<Option<&'b [u8]>, TransportError> {
        Err(TransportError::NotStarted)
    }
    fn send(&mut self, _: &[u8]) -> Result<(), TransportError> { Err(TransportError::NotStarted) }
}

/// One binding per medium, and a marker for the active one.
pub struct Transports<I: Transport, U: Transport, S: Transport> {
    pub i2c: I,
    pub uart: U,
    pub spi: S,
    active: TransportKind,
}

impl<I: Transport, U: Transport, S: Transport> Transports<I, U, S> {
    /// Groups the bindings. Nothing is started until [`Transport::start`].
    pub fn new(i2c: I, uart: U, spi: S, active: TransportKind) -> Self {
        Self { i2c, uart, spi, active }
    }

    pub fn active(&self) -> TransportKind { self.active }

    /// Marks `kind` as active without touching any binding. Only meant for
    /// use before the bindings are started.
    pub fn select(&mut self, kind: TransportKind) { self.active = kind; }

    /// Moves the active role to `kind`. The outgoing binding is reset and
    /// stopped strictly before the incoming one is started, so no partial
    /// frame straddles the switch. If `kind` fails to start, the outgoing
    /// binding is started again and stays active.
    pub fn switch(&mut self, kind: TransportKind) -> Result<(), TransportError> {
        let outgoing = self.active;
        let binding = self.binding(outgoing);
        binding.reset();
        binding.stop();
        self.active = kind;
        match self.binding(kind).start() {
            Ok(()) => {
                dfu_info!("Transport switched from {} to {}", outgoing.label(), kind.label());
                Ok(())
            }
            Err(error) => {
                dfu_warn!("{} failed to start, staying on {}", kind.label(), outgoing.label());
                self.active = outgoing;
                if self.binding(outgoing).start().is_err() {
                    dfu_error!("{} failed to restart", outgoing.label());
                }
                Err(error)
            }
        }
    }

    fn binding(&mut self, kind: TransportKind) -> &mut dyn Transport {
        match kind {
            TransportKind::I2c => &mut self.i2c,
            TransportKind::Uart => &mut self.uart,
            TransportKind::Spi => &mut self.spi,
        }
    }
}

impl<I: Transport, U: Transport, S: Transport> Transport for Transports<I, U, S> {
    fn start(&mut self) -> Result<(), TransportError> {
        dfu_info!("Starting DFU {} transport", self.active.label());
        self.binding(self.active).start()
    }

    fn stop(&mut self) {
        dfu_info!("Stopping DFU {} transport", self.active.label());
        self.binding(self.active).stop()
    }

    fn reset(&mut self) { self.binding(self.active).reset() }

    fn try_receive<'b>(
        &mut self,
        buffer: &'b mut [u8],
        timeout: Milliseconds,
    ) -> Result<Option<&'b [u8]>, TransportError> {
        self.binding(self.active).try_receive(buffer, timeout)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.binding(self.active).send(bytes)
    }
}

/// Ordered list of the transports a switch request rotates through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportCycle {
    order: [Option<TransportKind>; TRANSPORT_COUNT],
}

impl TransportCycle {
    pub fn new(order: [Option<TransportKind>; TRANSPORT_COUNT]) -> Self { Self { order } }

    /// Transport following `current`, wrapping around at the end of the
    /// list. A transport missing from the list is followed by the first one.
    pub fn next_after(&self, current: TransportKind) -> TransportKind {
        let mut enabled = self.order.iter().flatten().copied();
        let first = match enabled.clone().next() {
            Some(first) => first,
            None => return current,
        };
        enabled.skip_while(|kind| *kind != current).nth(1).unwrap_or(first)
    }
}

impl From<&Configuration> for TransportCycle {
    fn from(configuration: &Configuration) -> Self { Self::new(configuration.transport_order) }
}
