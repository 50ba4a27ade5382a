//! Time units.
use core::ops::{Add as Adds, Sub as Subtracts};

/// Abstract point in time. Useful for time periods
///
/// Any implementer of Instant can be subtracted with
/// itself to obtain a span of milliseconds.
///
/// Any implementer of Instant can be added with
/// milliseconds to obtain another instant.
pub trait Instant
where
    Self: Copy + Clone,
    Self: Subtracts<Output = Milliseconds>,
    Self: Adds<Milliseconds, Output = Self>,
{
}

pub trait Now {
    type I: Instant;
    fn now(&self) -> Self::I;
}

#[derive(Clone, Copy, Debug, Default, PartialOrd, Ord, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Milliseconds(pub u32);

#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Seconds(pub u32);

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Seconds`
    fn s(self) -> Seconds;

    /// Wrap in `Milliseconds`
    fn ms(self) -> Milliseconds;
}

impl U32Ext for u32 {
    fn s(self) -> Seconds { Seconds(self) }

    fn ms(self) -> Milliseconds { Milliseconds(self) }
}

impl From<Seconds> for Milliseconds {
    fn from(seconds: Seconds) -> Self { Milliseconds(seconds.0.saturating_mul(1_000)) }
}

impl Adds for Milliseconds {
    type Output = Self;
    fn add(self, rhs: Self) -> Self { Milliseconds(self.0.saturating_add(rhs.0)) }
}

/// Accumulated duration, advanced explicitly by the caller.
///
/// Timeouts are expressed as "has the accumulated time reached the
/// threshold", so the result does not depend on whether the tick period
/// divides the threshold evenly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stopwatch {
    elapsed: Milliseconds,
}

impl Stopwatch {
    pub const fn new() -> Self { Self { elapsed: Milliseconds(0) } }
    pub fn advance(&mut self, tick: Milliseconds) { self.elapsed = self.elapsed + tick; }
    pub fn reset(&mut self) { self.elapsed = Milliseconds(0); }
    pub fn elapsed(&self) -> Milliseconds { self.elapsed }
    pub fn has_reached(&self, timeout: Milliseconds) -> bool { self.elapsed >= timeout }
}
