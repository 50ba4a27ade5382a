//! Main loop policy around a DFU session.
//!
//! [`Application`] drives an [`UpdateEngine`] once per tick and reacts to
//! what it reports: rebooting into the new image, restarting failed
//! sessions, honouring transport switch requests and blinking the
//! heartbeat LED.
use super::{
    dfu::{Status, TickStatus, UpdateEngine},
    session::{Outcome, State},
    transport::TransportCycle,
};
use crate::{
    config::{Configuration, TRANSPORT_COUNT},
    error::{status, TimeoutError},
    hal::{
        led::Toggle,
        time::{Milliseconds, Stopwatch},
    },
};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use ufmt::{uWrite, uwriteln};

/// Transport switch request, raised from an interrupt handler and
/// consumed by the main loop between ticks. Only plain loads and stores
/// are used, so it works on cores without atomic read-modify-write.
///
/// Requests are coalesced: any number of notifications raised before a
/// [`take`](SwitchRequest::take) completes, including one landing between
/// its load and its store, result in a single switch. The count still
/// records every notification.
///
/// # Example
/// ```
/// # use otw_dfu::devices::application::SwitchRequest;
/// static SWITCH: SwitchRequest = SwitchRequest::new();
///
/// // In the interrupt handler
/// SWITCH.notify();
///
/// // In the main loop
/// assert_eq!(Some(1), SWITCH.take());
/// assert_eq!(None, SWITCH.take());
/// ```
pub struct SwitchRequest {
    pending: AtomicBool,
    count: AtomicU8,
}

impl SwitchRequest {
    pub const fn new() -> Self { Self { pending: AtomicBool::new(false), count: AtomicU8::new(0) } }

    /// Interrupt side. Never touches the session or the transports.
    pub fn notify(&self) {
        let count = self.count.load(Ordering::Relaxed);
        self.count.store(count.wrapping_add(1), Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Main loop side. Returns the number of requests received so far, if
    /// one is pending, and clears it.
    pub fn take(&self) -> Option<u8> {
        if self.pending.load(Ordering::Acquire) {
            self.pending.store(false, Ordering::Release);
            Some(self.count.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

impl Default for SwitchRequest {
    fn default() -> Self { Self::new() }
}

/// What the caller should do after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Continue,
    /// The new image is verified. Reset into it.
    Reboot,
}

/// Console description of a wire status code.
pub fn status_description(code: u8) -> &'static str {
    match code {
        status::SUCCESS => "DFU: success",
        status::ERROR_VERIFY => "DFU: Verification failed",
        status::ERROR_LENGTH => "DFU: The length of the packet is outside of the expected range",
        status::ERROR_DATA => "DFU: The data in the received packet is invalid",
        status::ERROR_COMMAND => "DFU: The command is not recognized",
        status::ERROR_CHECKSUM => "DFU: The checksum does not match the expected value",
        status::ERROR_ADDRESS => "DFU: The wrong address",
        status::ERROR_ALIGNMENT => "DFU: The address is not aligned to a flash row",
        status::ERROR_FLASH => "DFU: The flash operation failed",
        status::ERROR_MALFORMED => "DFU: The packet is not correctly framed",
        status::ERROR_TIMEOUT => "DFU: The command timed out",
        status::ERROR_UNKNOWN => "DFU: did not recognize error",
        _ => "Not recognized DFU status code",
    }
}

pub struct Application<'a, E: UpdateEngine, L: Toggle, W: uWrite> {
    engine: E,
    led: L,
    console: W,
    switch: &'a SwitchRequest,
    cycle: TransportCycle,
    tick: Milliseconds,
    heartbeat_interval: Milliseconds,
    heartbeat: Stopwatch,
}

impl<'a, E: UpdateEngine, L: Toggle, W: uWrite> Application<'a, E, L, W> {
    pub fn new(
        engine: E,
        led: L,
        console: W,
        switch: &'a SwitchRequest,
        configuration: &Configuration,
    ) -> Self {
        Self {
            engine,
            led,
            console,
            switch,
            cycle: TransportCycle::from(configuration),
            tick: configuration.tick(),
            heartbeat_interval: configuration.heartbeat_interval(),
            heartbeat: Stopwatch::new(),
        }
    }

    pub fn engine(&self) -> &E { &self.engine }
    pub fn engine_mut(&mut self) -> &mut E { &mut self.engine }
    pub fn led(&self) -> &L { &self.led }
    pub fn console(&self) -> &W { &self.console }

    /// Prints the transport the session starts on.
    pub fn announce(&mut self) {
        let label = self.engine.session().active_transport.label();
        uwriteln!(self.console, "Starting DFU {} transport", label).ok();
    }

    /// Runs the session for one tick, applying the restart and switch
    /// policy to whatever it reports.
    pub fn tick(&mut self) -> Action {
        let TickStatus { state, last_status } = self.engine.continue_session(self.tick);
        let description = status_description(last_status.code());

        let action = match state {
            State::Finished(Outcome::Success) => {
                uwriteln!(self.console, "DFU_STATE_FINISHED: {}", description).ok();
                uwriteln!(self.console, "Launching Boot").ok();
                Action::Reboot
            }
            State::Finished(Outcome::Failure) => {
                self.engine.reinitialize();
                uwriteln!(self.console, "DFU_STATE_FINISHED: {}", description).ok();
                Action::Continue
            }
            State::Failed => {
                self.engine.reinitialize();
                uwriteln!(self.console, "DFU_STATE_FAILED: {}", description).ok();
                let timed_out = last_status == Status::Error(TimeoutError::Command.into());
                if timed_out && !self.apply_switch_request() {
                    self.engine.reset_transport();
                }
                Action::Continue
            }
            State::Idle => {
                if last_status == Status::Error(TimeoutError::Idle.into()) {
                    dfu_info!("Idle timeout, restarting session");
                    self.engine.reinitialize();
                }
                self.apply_switch_request();
                Action::Continue
            }
            State::Updating => Action::Continue,
        };

        self.heartbeat.advance(self.tick);
        if self.heartbeat.has_reached(self.heartbeat_interval) {
            self.heartbeat.reset();
            self.led.toggle();
        }
        action
    }

    /// Moves to the next transport in the cycle if a switch was requested.
    /// Transports that fail to start are reported and skipped. Returns
    /// whether a request was pending.
    fn apply_switch_request(&mut self) -> bool {
        if self.switch.take().is_none() {
            return false;
        }
        let current = self.engine.session().active_transport;
        let mut next = self.cycle.next_after(current);
        for _ in 0..TRANSPORT_COUNT {
            if next == current {
                break;
            }
            match self.engine.switch_transport(next) {
                Ok(()) => {
                    uwriteln!(self.console, "Transport Updated to {}", next.label()).ok();
                    break;
                }
                Err(error) => {
                    error.report(&mut self.console).ok();
                    next = self.cycle.next_after(next);
                }
            }
        }
        true
    }
}
