//! Utilities to manipulate generic memory

/// Generic address for the purpose of this module's methods.
/// Anything that can be offset by a usize and constructed from a raw
/// 32 bit bus address works as an address.
pub trait Address: Copy + core::ops::Add<usize, Output = Self> + From<u32> {}
impl<A> Address for A where A: Copy + core::ops::Add<usize, Output = A> + From<u32> {}

/// Half-open memory region, `[start, end)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub const fn new(start: u32, end: u32) -> Self { Self { start, end } }

    /// Builds the region starting at `start` and spanning `length` bytes, if
    /// it fits the 32 bit address space.
    pub fn from_length(start: u32, length: u32) -> Option<Self> {
        start.checked_add(length).map(|end| Self { start, end })
    }

    pub fn len(&self) -> u32 { self.end.saturating_sub(self.start) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn contains(&self, address: u32) -> bool { (self.start..self.end).contains(&address) }

    /// Whether `other` lies entirely inside this region. Empty regions are
    /// contained when their start lies inside or at the end of this one.
    pub fn encloses(&self, other: Region) -> bool {
        other.start >= self.start && other.end <= self.end && other.start <= other.end
    }

    /// Whether both boundaries are multiples of `alignment` (a power of two).
    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        let mask = (alignment as u32).wrapping_sub(1);
        (self.start & mask) == 0 && (self.end & mask) == 0
    }
}

/// Whether `address` is a multiple of `alignment` (a power of two).
pub fn is_aligned(address: u32, alignment: usize) -> bool {
    (address & (alignment as u32).wrapping_sub(1)) == 0
}
