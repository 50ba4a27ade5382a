//! Test doubles for the HAL interfaces. Host only.
pub mod console;
pub mod error;
pub mod flash;
pub mod gpio;
pub mod serial;
pub mod time;
pub mod transport;
