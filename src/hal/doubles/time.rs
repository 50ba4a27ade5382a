use crate::hal::time::{self, Milliseconds};
use std::cell::Cell;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FakeInstant(pub u32);

impl time::Instant for FakeInstant {}

impl core::ops::Sub for FakeInstant {
    type Output = Milliseconds;
    fn sub(self, rhs: Self) -> Self::Output { Milliseconds(self.0.saturating_sub(rhs.0)) }
}

impl core::ops::Add<Milliseconds> for FakeInstant {
    type Output = Self;
    fn add(self, rhs: Milliseconds) -> Self { FakeInstant(self.0 + rhs.0) }
}

/// Clock that moves forward by a fixed step every time it is read, so
/// polling loops bounded by it always terminate.
#[derive(Debug)]
pub struct FakeClock {
    now: Cell<u32>,
    step: u32,
}

impl FakeClock {
    pub fn new(step: Milliseconds) -> Self { Self { now: Cell::new(0), step: step.0 } }
    pub fn elapsed(&self) -> Milliseconds { Milliseconds(self.now.get()) }
}

impl time::Now for FakeClock {
    type I = FakeInstant;
    fn now(&self) -> FakeInstant {
        let current = self.now.get();
        self.now.set(current + self.step);
        FakeInstant(current)
    }
}
