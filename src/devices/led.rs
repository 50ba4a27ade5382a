//! Heartbeat LED driver.
use crate::hal::{gpio::OutputPin, led::Toggle};

/// Solid (non-blinking) monochrome LED
///
/// # Example
/// ```
/// # use otw_dfu::devices::led::*;
/// # use otw_dfu::hal::{led::Toggle, doubles::gpio::MockPin};
/// let mut led = MonochromeLed::new(MockPin::default(), Logic::Direct);
///
/// led.toggle();
/// assert!(led.is_on());
/// # assert!(led.pin().is_high());
/// ```
pub struct MonochromeLed<Pin: OutputPin> {
    pin: Pin,
    is_on: bool,
    logic: Logic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Logic {
    /// Logical high equals "on"
    Direct,
    /// Logical high equals "off"
    Inverted,
}

// Operates a pin according to the LED's direct or inverted logic
trait LedPin: OutputPin {
    fn light(&mut self, logic: Logic) {
        match logic {
            Logic::Direct => self.set_high(),
            Logic::Inverted => self.set_low(),
        }
    }

    fn darken(&mut self, logic: Logic) {
        match logic {
            Logic::Direct => self.set_low(),
            Logic::Inverted => self.set_high(),
        }
    }
}

impl<Pin: OutputPin> LedPin for Pin {}

impl<Pin: OutputPin> MonochromeLed<Pin> {
    /// Takes over `pin`, starting with the LED off.
    pub fn new(mut pin: Pin, logic: Logic) -> Self {
        pin.darken(logic);
        Self { pin, is_on: false, logic }
    }

    pub fn is_on(&self) -> bool { self.is_on }
    pub fn pin(&self) -> &Pin { &self.pin }
}

impl<Pin: OutputPin> Toggle for MonochromeLed<Pin> {
    fn on(&mut self) {
        if !self.is_on {
            self.pin.light(self.logic);
        }
        self.is_on = true;
    }

    fn off(&mut self) {
        if self.is_on {
            self.pin.darken(self.logic);
        }
        self.is_on = false;
    }

    fn toggle(&mut self) {
        if self.is_on {
            self.off()
        } else {
            self.on()
        }
    }
}
