//! Complex modules with business logic related to the problem
//! domain, that lay on top of abstract drivers. Devices are
//! generic; the concrete peripherals are supplied by the board.

pub mod application;
pub mod dfu;
pub mod dispatcher;
pub mod image_store;
pub mod led;
pub mod packet;
pub mod session;
pub mod transport;
pub mod verification;

/// General purpose traits that summarize requirements on devices.
pub mod traits {
    use crate::hal::serial;

    /// A supported transport peripheral must be able to receive and
    /// transmit bytes, and to be switched on and off.
    pub trait Peripheral: serial::Read + serial::Write + serial::Enable {}
    impl<P: serial::Read + serial::Write + serial::Enable> Peripheral for P {}
}
