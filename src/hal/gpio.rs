//! # Simple GPIO interface
//!
//! Only output pins are needed by the DFU core (status LEDs). Input
//! events such as a transport switch button reach the core through
//! [`SwitchRequest`](crate::devices::application::SwitchRequest), fed from
//! the board's interrupt handler.

/// Interface to a writable pin.
pub trait OutputPin {
    fn set_low(&mut self);
    fn set_high(&mut self);
}
