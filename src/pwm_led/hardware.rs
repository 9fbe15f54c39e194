//! The hardware PWM backend seen through the programming steps of a timer/channel
//! pulse generator.
//!
//! The controller drives any [`HardwarePwm`] through the same sequence: configure the
//! timer, configure the channel, then for every request set the frequency, stage the raw
//! duty, and commit it. A failed step is a [`HardwareFault`]. See
//! [`PwmLed`](super::PwmLed) for what the controller does with one.

/// Which counter mode the timer runs in.
///
/// The RP slices count up and wrap (edge-aligned) or count up and down (phase-correct,
/// half the frequency for the same divider).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmLedMode {
    /// Count up and wrap.
    #[default]
    EdgeAligned,
    /// Count up then down.
    PhaseCorrect,
}

/// Which timer (PWM slice) generates the period.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerSelect(pub u8);

/// Which output of the timer drives the pin.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelSelect {
    /// Channel A (even GPIO numbers on RP).
    #[default]
    A,
    /// Channel B (odd GPIO numbers on RP).
    B,
}

/// A hardware programming step failed.
///
/// Never returned to callers of [`PwmLed::set`](super::PwmLed::set); it only decides
/// when the controller degrades to software PWM.
#[derive(Clone, Copy, Debug, Eq, PartialEq, derive_more::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HardwareFault {
    /// The divider needed for the requested frequency is out of range.
    #[display("frequency out of range")]
    FrequencyOutOfRange,
    /// The requested counter resolution does not fit the timer.
    #[display("resolution unsupported")]
    ResolutionUnsupported,
    /// The channel is not wired to this timer or pin.
    #[display("channel unavailable")]
    ChannelUnavailable,
    /// The backend already handed its pin to the software scheduler.
    #[display("backend released")]
    Released,
}

/// Programming interface of a timer + channel pulse generator.
///
/// Each method is one synchronous step that returns promptly or fails immediately.
pub trait HardwarePwm {
    /// Program the timer for `frequency_hz` with a `2^resolution_bits - 1` counter top.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareFault`] if the timer cannot produce that configuration.
    fn configure_timer(
        &mut self,
        timer: TimerSelect,
        mode: PwmLedMode,
        resolution_bits: u8,
        frequency_hz: u32,
    ) -> Result<(), HardwareFault>;

    /// Route `channel` of the timer to the output pin, starting at 0 duty.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareFault`] if the channel cannot drive the pin.
    fn configure_channel(
        &mut self,
        output_pin: u8,
        channel: ChannelSelect,
    ) -> Result<(), HardwareFault>;

    /// Change the period without touching the staged duty.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareFault`] if the frequency cannot be produced.
    fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), HardwareFault>;

    /// Stage a raw compare value (`0..=2^resolution_bits - 1`).
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareFault`] if the value cannot be staged.
    fn set_duty_raw(&mut self, duty_raw: u32) -> Result<(), HardwareFault>;

    /// Commit the staged frequency and duty to the output.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareFault`] if the update cannot be applied.
    fn update_duty(&mut self) -> Result<(), HardwareFault>;

    /// Stop driving the pin so the software scheduler can own it. Later steps fail with
    /// [`HardwareFault::Released`].
    fn release(&mut self);
}
