//! Flash memory interfaces.
//!
//! Operations are non-blocking in the `nb` sense; callers that need
//! completion wrap them in `nb::block!`.
use crate::utilities::memory::Address;
use core::fmt;

/// Read, write and erase access to a flash device, generic over an address.
pub trait ReadWrite {
    type Error: Clone + Copy + fmt::Debug;
    type Address: Address;

    /// Reads a range of bytes starting at `address`.
    fn read(&mut self, address: Self::Address, bytes: &mut [u8]) -> nb::Result<(), Self::Error>;

    /// Programs a range of bytes starting at `address`. The range must have
    /// been erased beforehand if the device requires it.
    fn write(&mut self, address: Self::Address, bytes: &[u8]) -> nb::Result<(), Self::Error>;

    /// Erases `length` bytes starting at `address`.
    fn erase(&mut self, address: Self::Address, length: usize) -> nb::Result<(), Self::Error>;

    /// Addressable range of the device, as raw bus addresses `[start, end)`.
    fn range(&self) -> (u32, u32);
}
