//! Bitwise checks for NOR-style memories.
//!
//! Programming NOR flash can only clear bits. A write is only valid
//! without a prior erase if every '1' in the new data is already a '1'
//! in the stored data.

use core::ops::BitOr;

/// Checks that every '1' bit is a '1' on the right hand side.
pub trait BitSubset: Copy {
    fn is_subset_of(self, rhs: Self) -> bool;
}

/// Variant of the BitSubset trait for slices.
pub trait SliceBitSubset {
    /// Checks that every '1' in self is '1' in rhs, for the length of self.
    fn is_subset_of(self, rhs: Self) -> bool;
}

impl<U: Copy + BitOr<Output = Self> + PartialEq> BitSubset for U {
    fn is_subset_of(self, rhs: Self) -> bool { (self | rhs) == rhs }
}

impl<T: BitSubset> SliceBitSubset for &[T] {
    fn is_subset_of(self, rhs: Self) -> bool {
        if self.len() > rhs.len() {
            false
        } else {
            self.iter().zip(rhs.iter()).all(|(a, b)| a.is_subset_of(*b))
        }
    }
}

/// Whether a byte range reads as freshly erased.
pub fn is_erased(bytes: &[u8]) -> bool { bytes.iter().all(|b| *b == 0xFF) }
