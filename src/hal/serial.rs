//! Byte oriented peripheral interfaces.
//!
//! I2C, UART and SPI slaves all look the same at this level: a source and
//! sink of bytes that can be switched on and off. Electrical details stay
//! in the board drivers.

/// Receive half
pub trait Read {
    type Error;

    /// Reads a single byte, `WouldBlock` if none is pending.
    fn read(&mut self) -> nb::Result<u8, Self::Error>;
}

/// Transmit half
pub trait Write {
    type Error;

    /// Writes a single byte
    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
}

/// Activation of a peripheral block. Disabled peripherals neither receive
/// nor transmit.
pub trait Enable {
    fn enable(&mut self);
    fn disable(&mut self);
}
