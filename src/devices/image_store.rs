//! Row oriented access to the flash holding the firmware image.
//!
//! Every operation blocks until the device completes it, so a command
//! response is never sent while a write is still in flight.
use crate::{
    config::MAX_ROW_SIZE,
    error::{Error, FlashError},
    hal::flash::ReadWrite,
    utilities::memory::{is_aligned, Region},
};
use core::cmp::min;
use nb::block;

/// Erased value of a flash byte. Partial rows are padded with it.
pub const ERASED: u8 = 0xFF;

pub struct ImageStore<F: ReadWrite> {
    flash: F,
    row_size: usize,
    region: Region,
    /// One row to write, followed by room to read it back.
    staging: [u8; 2 * MAX_ROW_SIZE],
}

impl<F: ReadWrite> ImageStore<F> {
    /// Wraps `flash`, programming it in rows of `row_size` bytes.
    pub fn new(flash: F, row_size: usize) -> Result<Self, Error> {
        if !row_size.is_power_of_two() || row_size > MAX_ROW_SIZE {
            return Err(Error::Configuration("Row size must be a power of two within bounds"));
        }
        let (start, end) = flash.range();
        Ok(Self {
            flash,
            row_size,
            region: Region::new(start, end),
            staging: [ERASED; 2 * MAX_ROW_SIZE],
        })
    }

    pub fn row_size(&self) -> usize { self.row_size }
    /// Addressable range of the underlying flash.
    pub fn region(&self) -> Region { self.region }
    pub fn flash(&self) -> &F { &self.flash }
    pub fn flash_mut(&mut self) -> &mut F { &mut self.flash }

    /// Programs `bytes` at the row aligned `address`. The last row is
    /// padded with [`ERASED`], and every row is read back after writing.
    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        if !is_aligned(address, self.row_size) {
            return Err(Error::Alignment);
        }
        let padded = bytes.len().checked_add(self.row_size - 1).ok_or(Error::Address)?
            & !(self.row_size - 1);
        self.check_bounds(address, padded)?;

        let row_size = self.row_size;
        for (index, chunk) in bytes.chunks(row_size).enumerate() {
            let row_address = address + (index * row_size) as u32;
            let (row, readback) = self.staging.split_at_mut(row_size);
            row[..chunk.len()].copy_from_slice(chunk);
            row[chunk.len()..].iter_mut().for_each(|b| *b = ERASED);

            block!(self.flash.write(F::Address::from(row_address), row)).map_err(|_| {
                dfu_error!("Flash write failed at {}", row_address);
                FlashError::Write
            })?;

            let readback = &mut readback[..row_size];
            block!(self.flash.read(F::Address::from(row_address), readback))
                .map_err(|_| FlashError::Read)?;
            if readback != row {
                dfu_error!("Flash readback mismatch at {}", row_address);
                return Err(FlashError::Write.into());
            }
        }
        Ok(())
    }

    pub fn read(&mut self, address: u32, out: &mut [u8]) -> Result<(), Error> {
        self.check_bounds(address, out.len())?;
        block!(self.flash.read(F::Address::from(address), out)).map_err(|_| {
            dfu_error!("Flash read failed at {}", address);
            FlashError::Read
        })?;
        Ok(())
    }

    /// Erases a row aligned region.
    pub fn erase(&mut self, region: Region) -> Result<(), Error> {
        if !region.is_aligned_to(self.row_size) {
            return Err(Error::Alignment);
        }
        if !self.region.encloses(region) {
            return Err(Error::Address);
        }
        if region.is_empty() {
            return Ok(());
        }
        block!(self.flash.erase(F::Address::from(region.start), region.len() as usize)).map_err(
            |_| {
                dfu_error!("Flash erase failed at {}", region.start);
                FlashError::Erase
            },
        )?;
        Ok(())
    }

    /// Reads `region` in row sized chunks, handing each one to `visit`.
    pub fn for_each_chunk<V>(&mut self, region: Region, mut visit: V) -> Result<(), Error>
    where
        V: FnMut(&[u8]),
    {
        if !self.region.encloses(region) {
            return Err(Error::Address);
        }
        let mut address = region.start;
        while address < region.end {
            let length = min(self.row_size, (region.end - address) as usize);
            let chunk = &mut self.staging[..length];
            block!(self.flash.read(F::Address::from(address), chunk))
                .map_err(|_| FlashError::Read)?;
            visit(chunk);
            address += length as u32;
        }
        Ok(())
    }

    fn check_bounds(&self, address: u32, length: usize) -> Result<(), Error> {
        let length = u32::try_from(length).map_err(|_| Error::Address)?;
        match Region::from_length(address, length) {
            Some(range) if self.region.encloses(range) => Ok(()),
            _ => Err(Error::Address),
        }
    }
}
