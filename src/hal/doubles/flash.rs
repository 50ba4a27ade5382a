use super::error::FakeError;
use crate::{hal::flash, utilities::bitwise::SliceBitSubset};
use std::{ops::Add, vec, vec::Vec};

/// In-memory flash with NOR semantics: erasing sets bytes to `0xFF`, and
/// programming may only clear bits.
pub struct FakeFlash {
    base: u32,
    data: Vec<u8>,
    /// Every write fails with [`FakeError`].
    pub fail_writes: bool,
    /// Every erase fails with [`FakeError`].
    pub fail_erases: bool,
    /// Every read fails with [`FakeError`].
    pub fail_reads: bool,
    /// Writes report success without storing anything.
    pub drop_writes: bool,
    pub write_count: usize,
}

#[derive(Copy, Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Address(pub u32);

impl FakeFlash {
    /// Erased flash of `length` bytes starting at `base`.
    pub fn new(base: u32, length: usize) -> FakeFlash {
        FakeFlash {
            base,
            data: vec![0xFF; length],
            fail_writes: false,
            fail_erases: false,
            fail_reads: false,
            drop_writes: false,
            write_count: 0,
        }
    }

    /// Raw view of the stored bytes at `address`.
    pub fn contents(&self, address: u32, length: usize) -> &[u8] {
        let offset = (address - self.base) as usize;
        &self.data[offset..offset + length]
    }

    fn span(&self, address: Address, length: usize) -> Result<(usize, usize), FakeError> {
        let offset = address.0.checked_sub(self.base).ok_or(FakeError)? as usize;
        let end = offset.checked_add(length).ok_or(FakeError)?;
        if end > self.data.len() {
            return Err(FakeError);
        }
        Ok((offset, end))
    }
}

impl flash::ReadWrite for FakeFlash {
    type Error = FakeError;
    type Address = Address;

    fn read(&mut self, address: Self::Address, bytes: &mut [u8]) -> nb::Result<(), Self::Error> {
        if self.fail_reads {
            return Err(nb::Error::Other(FakeError));
        }
        let (start, end) = self.span(address, bytes.len()).map_err(nb::Error::Other)?;
        bytes.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, address: Self::Address, bytes: &[u8]) -> nb::Result<(), Self::Error> {
        if self.fail_writes {
            return Err(nb::Error::Other(FakeError));
        }
        let (start, end) = self.span(address, bytes.len()).map_err(nb::Error::Other)?;
        if !bytes.is_subset_of(&self.data[start..end]) {
            return Err(nb::Error::Other(FakeError));
        }
        self.write_count += 1;
        if !self.drop_writes {
            self.data[start..end].copy_from_slice(bytes);
        }
        Ok(())
    }

    fn erase(&mut self, address: Self::Address, length: usize) -> nb::Result<(), Self::Error> {
        if self.fail_erases {
            return Err(nb::Error::Other(FakeError));
        }
        let (start, end) = self.span(address, length).map_err(nb::Error::Other)?;
        self.data[start..end].iter_mut().for_each(|b| *b = 0xFF);
        Ok(())
    }

    fn range(&self) -> (u32, u32) { (self.base, self.base + self.data.len() as u32) }
}

impl Add<usize> for Address {
    type Output = Address;
    fn add(self, rhs: usize) -> Self::Output { Address(self.0 + rhs as u32) }
}

impl From<u32> for Address {
    fn from(raw: u32) -> Self { Address(raw) }
}
