use crate::hal::gpio::OutputPin;
use std::vec::Vec;

/// Output pin that keeps its current level and every level driven onto it.
#[derive(Clone, Debug, Default)]
pub struct MockPin {
    level: bool,
    driven: Vec<bool>,
}

impl MockPin {
    pub fn is_high(&self) -> bool { self.level }
    pub fn is_low(&self) -> bool { !self.level }

    /// Levels in the order they were driven, repeats included.
    pub fn driven(&self) -> &[bool] { &self.driven }

    fn drive(&mut self, level: bool) {
        self.level = level;
        self.driven.push(level);
    }
}

impl OutputPin for MockPin {
    fn set_low(&mut self) { self.drive(false) }
    fn set_high(&mut self) { self.drive(true) }
}
