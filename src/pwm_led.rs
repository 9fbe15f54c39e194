//! A device abstraction for a dimmable PWM output (an LED, or any duty-cycle actuator).
//!
//! [`PwmLed`] owns the configuration and the current frequency/duty, and picks which
//! backend produces the signal:
//!
//! - **Hardware**: a timer + channel pulse generator ([`HardwarePwm`]). Used from `init`
//!   until the first programming step fails.
//! - **Software fallback**: a background loop that toggles the pin ([`SoftwarePwm`]).
//!   Used after any hardware fault, or from the start when the `hardware-pwm` feature is
//!   off.
//!
//! Degradation is one-way. After a hardware fault the controller never programs the
//! slice again for the lifetime of the process; the request that hit the fault, and every
//! later one, is served by the software loop instead. [`PwmLed::set`] therefore never
//! fails once `init` has succeeded.
//!
//! On the board, build one with `PwmLed::new_rp` (the `rp` module) and share it, usually
//! through a `StaticCell`, with the [`Gateway`](crate::gateway::Gateway).
//!
//! # Example
//!
//! ```rust,ignore
//! let pwm_led = PwmLed::new(hardware, software);
//! pwm_led.init(Some(PwmLedConfig::default())).await?;
//! pwm_led.set(5_000, 150).await?; // duty clamps to 100
//! assert_eq!(pwm_led.get_state(), PwmState { frequency_hz: 5_000, duty_percent: 100 });
//! ```

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use crate::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

pub mod clamp;
pub mod hardware;
#[cfg(any(feature = "pico1", feature = "pico2"))]
pub mod rp;
pub mod soft_pwm;

pub use clamp::{MAX_DUTY_PERCENT, MAX_FREQ_HZ, MIN_FREQ_HZ};
pub use hardware::{ChannelSelect, HardwareFault, HardwarePwm, PwmLedMode, TimerSelect};
pub use soft_pwm::{SoftPwmPlan, SoftPwmStatic, SoftwarePwm};

use clamp::{
    DEFAULT_DUTY_PERCENT, DEFAULT_FREQ_HZ, clamp_duty_percent, clamp_frequency_hz, duty_raw,
    max_duty_raw,
};

include!(concat!(env!("OUT_DIR"), "/pwm_led_build_env.rs"));

/// Whether the hardware backend is compiled in (`hardware-pwm` feature).
pub const HARDWARE_PWM_ENABLED: bool = cfg!(feature = "hardware-pwm");

// ============================================================================
// Configuration and state
// ============================================================================

/// Configuration passed to [`PwmLed::init`].
///
/// The output and hardware selectors are passed through to the backend unchecked; the
/// defaults are clamped by `init`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmLedConfig {
    /// GPIO number of the output.
    pub output_pin: u8,
    /// Counter mode of the timer.
    pub mode: PwmLedMode,
    /// Timer (PWM slice) that generates the period.
    pub timer: TimerSelect,
    /// Timer output routed to the pin.
    pub channel: ChannelSelect,
    /// Counter resolution; the raw duty range is `0..=2^bits - 1`.
    pub resolution_bits: u8,
    /// Frequency applied by `init`. 0 selects [`DEFAULT_FREQ_HZ`](clamp::DEFAULT_FREQ_HZ).
    pub default_frequency_hz: u32,
    /// Duty cycle applied by `init`, in percent.
    pub default_duty_percent: u32,
}

impl PwmLedConfig {
    /// Default counter resolution.
    pub const DEFAULT_RESOLUTION_BITS: u8 = 10;

    /// Configuration for an output on `gpio`, with the slice and channel the RP pin mux
    /// assigns to that pin.
    #[must_use]
    pub const fn for_gpio(gpio: u8) -> Self {
        Self {
            output_pin: gpio,
            mode: PwmLedMode::EdgeAligned,
            timer: TimerSelect(gpio_slice(gpio)),
            channel: if gpio % 2 == 0 {
                ChannelSelect::A
            } else {
                ChannelSelect::B
            },
            resolution_bits: Self::DEFAULT_RESOLUTION_BITS,
            default_frequency_hz: DEFAULT_FREQ_HZ,
            default_duty_percent: DEFAULT_DUTY_PERCENT,
        }
    }

    /// Configuration from the build environment (`PWM_LED_GPIO`, `PWM_LED_DEFAULT_FREQ`,
    /// `PWM_LED_DEFAULT_DUTY`; see `build.rs`).
    #[must_use]
    pub const fn from_build_env() -> Self {
        let mut config = Self::for_gpio(BUILD_GPIO_U8);
        config.default_frequency_hz = BUILD_DEFAULT_FREQ_HZ;
        config.default_duty_percent = BUILD_DEFAULT_DUTY_PERCENT;
        config
    }

    /// The defaults this configuration asks for, after clamping. A 0 Hz default becomes
    /// [`DEFAULT_FREQ_HZ`](clamp::DEFAULT_FREQ_HZ).
    #[must_use]
    pub const fn clamped(mut self) -> Self {
        let frequency_hz = if self.default_frequency_hz == 0 {
            DEFAULT_FREQ_HZ
        } else {
            self.default_frequency_hz
        };
        self.default_frequency_hz = clamp_frequency_hz(frequency_hz);
        self.default_duty_percent = clamp_duty_percent(self.default_duty_percent);
        self
    }
}

impl Default for PwmLedConfig {
    fn default() -> Self {
        Self::from_build_env()
    }
}

#[expect(clippy::cast_possible_truncation, reason = "checked by the assert")]
const BUILD_GPIO_U8: u8 = {
    assert!(BUILD_GPIO <= 47, "PWM_LED_GPIO must name a GPIO (0..=47)");
    BUILD_GPIO as u8
};

/// PWM slice that the RP pin mux assigns to `gpio`.
const fn gpio_slice(gpio: u8) -> u8 {
    if gpio < 32 {
        (gpio / 2) % 8
    } else {
        8_u8.saturating_add((gpio.wrapping_sub(32) / 2) % 4)
    }
}

/// Current output, as last applied by the controller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmState {
    /// Frequency in Hz.
    pub frequency_hz: u32,
    /// Duty cycle in percent.
    pub duty_percent: u32,
}

/// Why the controller runs on the software scheduler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FallbackReason {
    /// The `hardware-pwm` feature is off.
    HardwareDisabled,
    /// Programming the timer or channel failed during `init`.
    InitFault(HardwareFault),
    /// Setting frequency or duty failed during a `set`.
    RuntimeFault(HardwareFault),
}

/// Which backend currently produces the output.
///
/// `Uninitialized → Hardware → SoftwareFallback`, or straight to `SoftwareFallback`
/// from `init`. `SoftwareFallback` is terminal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmMode {
    /// `init` has not succeeded yet.
    #[default]
    Uninitialized,
    /// The hardware slice drives the output.
    Hardware,
    /// The software loop drives the output, permanently.
    SoftwareFallback(FallbackReason),
}

// ============================================================================
// PwmLed - the controller
// ============================================================================

#[derive(Clone, Copy, Default)]
struct Snapshot {
    state: PwmState,
    mode: PwmMode,
}

struct Driver<H> {
    hardware: H,
    max_duty_raw: u32,
    mode: PwmMode,
}

impl<H: HardwarePwm> Driver<H> {
    fn program_hardware(&mut self, config: &PwmLedConfig) -> Result<(), HardwareFault> {
        self.hardware.configure_timer(
            config.timer,
            config.mode,
            config.resolution_bits,
            config.default_frequency_hz,
        )?;
        self.hardware
            .configure_channel(config.output_pin, config.channel)
    }

    /// Program frequency, then raw duty, then commit. Returns the raw duty written.
    fn drive_hardware(
        &mut self,
        frequency_hz: u32,
        duty_percent: u32,
    ) -> Result<u32, HardwareFault> {
        let duty_raw = duty_raw(self.max_duty_raw, duty_percent);
        self.hardware.set_frequency(frequency_hz)?;
        self.hardware.set_duty_raw(duty_raw)?;
        self.hardware.update_duty()?;
        Ok(duty_raw)
    }

    /// Give up on the hardware for good.
    fn degrade(&mut self, reason: FallbackReason) {
        self.hardware.release();
        self.mode = PwmMode::SoftwareFallback(reason);
    }
}

/// The PWM output controller: the single source of truth for frequency and duty.
///
/// See the [module-level documentation](self) for the backend policy.
///
/// `init` and `set` are serialized by an async mutex, so a `set` that is waiting for the
/// software loop to stop cannot interleave with another `set`. [`get_state`](Self::get_state)
/// and [`mode`](Self::mode) read a snapshot under a short critical section and never wait.
pub struct PwmLed<H, S> {
    driver: Mutex<CriticalSectionRawMutex, Driver<H>>,
    snapshot: BlockingMutex<CriticalSectionRawMutex, Cell<Snapshot>>,
    software: S,
}

impl<H: HardwarePwm, S: SoftwarePwm> PwmLed<H, S> {
    /// Create an uninitialized controller over a hardware backend and a software scheduler.
    #[must_use]
    pub const fn new(hardware: H, software: S) -> Self {
        Self {
            driver: Mutex::new(Driver {
                hardware,
                max_duty_raw: 0,
                mode: PwmMode::Uninitialized,
            }),
            snapshot: BlockingMutex::new(Cell::new(Snapshot {
                state: PwmState {
                    frequency_hz: 0,
                    duty_percent: 0,
                },
                mode: PwmMode::Uninitialized,
            })),
            software,
        }
    }

    /// Apply `config` and start producing its default frequency and duty.
    ///
    /// Programs the hardware timer and channel; if either step fails (or hardware PWM is
    /// compiled out) the controller starts on the software scheduler instead. Calling
    /// `init` again after it succeeded does nothing and returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` is `None`.
    pub async fn init(&self, config: Option<PwmLedConfig>) -> Result<()> {
        let Some(config) = config else {
            log_error!("pwm_led: init without configuration");
            return Err(Error::InvalidArgument);
        };

        let mut driver = self.driver.lock().await;
        if driver.mode != PwmMode::Uninitialized {
            log_debug!("pwm_led: already initialized");
            return Ok(());
        }

        let config = config.clamped();
        driver.max_duty_raw = max_duty_raw(config.resolution_bits);
        driver.mode = PwmMode::Hardware;
        if HARDWARE_PWM_ENABLED {
            if let Err(fault) = driver.program_hardware(&config) {
                log_error!(
                    "pwm_led: hardware setup failed ({}), using software PWM",
                    fault
                );
                driver.degrade(FallbackReason::InitFault(fault));
            }
        } else {
            log_warn!("pwm_led: hardware PWM disabled via configuration");
            driver.degrade(FallbackReason::HardwareDisabled);
        }
        log_info!(
            "pwm_led: init gpio {} slice {} mode {:?}, {} bits (max raw {})",
            config.output_pin,
            config.timer.0,
            driver.mode,
            config.resolution_bits,
            driver.max_duty_raw
        );

        self.set_locked(
            &mut driver,
            config.default_frequency_hz,
            config.default_duty_percent,
        )
        .await
    }

    /// Produce `frequency_hz` at `duty_percent`, both clamped into range.
    ///
    /// On hardware, a failure in any programming step degrades the controller to the
    /// software scheduler for good, and this same request is served there. If the
    /// scheduler cannot be launched the request is still recorded and the launch is
    /// retried by the next `set`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if `init` has not succeeded.
    pub async fn set(&self, frequency_hz: u32, duty_percent: u32) -> Result<()> {
        let mut driver = self.driver.lock().await;
        self.set_locked(&mut driver, frequency_hz, duty_percent)
            .await
    }

    /// Current frequency and duty. Never blocks, never fails.
    #[must_use]
    pub fn get_state(&self) -> PwmState {
        self.snapshot.lock(|snapshot| snapshot.get().state)
    }

    /// Backend currently producing the output.
    #[must_use]
    pub fn mode(&self) -> PwmMode {
        self.snapshot.lock(|snapshot| snapshot.get().mode)
    }

    async fn set_locked(
        &self,
        driver: &mut Driver<H>,
        frequency_hz: u32,
        duty_percent: u32,
    ) -> Result<()> {
        if driver.mode == PwmMode::Uninitialized {
            return Err(Error::InvalidState);
        }
        let state = PwmState {
            frequency_hz: clamp_frequency_hz(frequency_hz),
            duty_percent: clamp_duty_percent(duty_percent),
        };

        if driver.mode == PwmMode::Hardware {
            // Never let both backends drive the pin.
            if self.software.is_running() {
                self.software.stop().await;
            }
            match driver.drive_hardware(state.frequency_hz, state.duty_percent) {
                Ok(duty_raw) => {
                    self.publish(state, driver.mode);
                    log_info!(
                        "pwm_led: updated -> freq: {} Hz, duty: {}% (raw {})",
                        state.frequency_hz,
                        state.duty_percent,
                        duty_raw
                    );
                    return Ok(());
                }
                Err(fault) => {
                    log_error!(
                        "pwm_led: hardware update to {} Hz / {}% failed ({}), switching to software PWM",
                        state.frequency_hz,
                        state.duty_percent,
                        fault
                    );
                    driver.degrade(FallbackReason::RuntimeFault(fault));
                }
            }
        }

        match self.software.start(state.frequency_hz, state.duty_percent) {
            Ok(plan) => log_info!(
                "pwm_led: software PWM -> freq: {} Hz, duty: {}% ({} Hz effective)",
                state.frequency_hz,
                state.duty_percent,
                plan.frequency_hz()
            ),
            Err(err) => log_warn!("pwm_led: {}; will retry on next set", err),
        }
        self.publish(state, driver.mode);
        Ok(())
    }

    fn publish(&self, state: PwmState, mode: PwmMode) {
        self.snapshot
            .lock(|snapshot| snapshot.set(Snapshot { state, mode }));
    }
}
