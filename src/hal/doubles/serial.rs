use crate::hal::serial;
use std::{collections::VecDeque, vec::Vec};

/// Byte peripheral with a scripted receive queue and a transmit record.
#[derive(Debug, Default)]
pub struct MockPeripheral {
    pub to_receive: VecDeque<u8>,
    pub sent: Vec<u8>,
    pub enabled: bool,
    pub enable_count: usize,
    pub disable_count: usize,
    /// The next read fails with a receive error, then the flag clears.
    pub fail_next_read: bool,
    /// Every write fails.
    pub fail_writes: bool,
}

impl MockPeripheral {
    pub fn receive(&mut self, bytes: &[u8]) { self.to_receive.extend(bytes.iter().copied()); }
}

impl serial::Read for MockPeripheral {
    type Error = ();

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if !self.enabled {
            return Err(nb::Error::WouldBlock);
        }
        if self.fail_next_read {
            self.fail_next_read = false;
            return Err(nb::Error::Other(()));
        }
        self.to_receive.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl serial::Write for MockPeripheral {
    type Error = ();

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        if self.fail_writes || !self.enabled {
            return Err(nb::Error::Other(()));
        }
        self.sent.push(byte);
        Ok(())
    }
}

impl serial::Enable for MockPeripheral {
    fn enable(&mut self) {
        self.enabled = true;
        self.enable_count += 1;
    }

    fn disable(&mut self) {
        self.enabled = false;
        self.disable_count += 1;
    }
}
