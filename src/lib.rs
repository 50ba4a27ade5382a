//! # Over-the-wire Firmware Update Library
//!
//! This crate contains the bootloader side of an over-the-wire device
//! firmware update: the packet codec, the transport multiplexer, the
//! command dispatcher, the update state machine and the image store,
//! plus the small demo policy that drives them from a main loop.
//!
//! Hardware is only reached through the traits in [`hal`]; boards supply
//! the concrete drivers.
#![cfg_attr(test, allow(unused_imports))]
#![cfg_attr(target_arch = "arm", no_std)]

extern crate static_assertions;

#[macro_use]
pub mod utilities {
    #[macro_use]
    mod macros;
    pub mod bitwise;
    pub mod memory;
}

pub mod config;
pub mod devices;
pub mod error;
pub mod hal;
