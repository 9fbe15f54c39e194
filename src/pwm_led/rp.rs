//! RP2040/RP2350 backends for [`PwmLed`]: a PWM slice as the hardware backend and an
//! embassy task toggling the same GPIO as the software scheduler.
//!
//! Build the controller with [`PwmLed::new_rp`]. The hardware backend and the software
//! task share the output pin; the hardware side disables and drops its [`Pwm`] in
//! [`HardwarePwm::release`] before the task ever drives the pin, and the task is only
//! spawned by the first software [`start`](SoftwarePwm::start).
//!
//! ```rust,ignore
//! static SOFT_PWM_STATIC: SoftPwmStatic = SoftPwmStatic::new_static();
//! static PWM_LED: StaticCell<RpPwmLed> = StaticCell::new();
//!
//! let pwm_led = PWM_LED.init(PwmLed::new_rp(p.PIN_2, p.PWM_SLICE1, &SOFT_PWM_STATIC, spawner));
//! pwm_led.init(Some(PwmLedConfig::for_gpio(2))).await?;
//! ```

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_rp::clocks::clk_sys_freq;
use embassy_rp::gpio::{AnyPin, Level, Output};
use embassy_rp::pwm::{Config, Pwm};
use embassy_rp::{Peri, PeripheralType};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use fixed::FixedU16;
use fixed::types::extra::U4;
use portable_atomic::{AtomicBool, Ordering};

use crate::pwm_led::clamp::max_duty_raw;
use crate::pwm_led::soft_pwm::soft_pwm_loop;
use crate::pwm_led::{
    ChannelSelect, HardwareFault, HardwarePwm, PwmLed, PwmLedMode, SoftPwmPlan, SoftPwmStatic,
    SoftwarePwm, TimerSelect,
};
use crate::{Error, Result};

/// Widest counter the RP slices have.
pub const MAX_RESOLUTION_BITS: u8 = 16;

/// Divider limits in 8.4 fixed point: 1.0 ..= 255 + 15/16.
const DIVIDER_BITS_MIN: u64 = 1 << 4;
const DIVIDER_BITS_MAX: u64 = (256 << 4) - 1;

/// A [`PwmLed`] on an RP PWM slice with the embassy software scheduler.
pub type RpPwmLed = PwmLed<RpHardwarePwm<'static>, RpSoftPwm>;

impl RpPwmLed {
    /// Controller for `pin` on `slice`. Call [`init`](PwmLed::init) next, typically with
    /// [`PwmLedConfig::for_gpio`](super::PwmLedConfig::for_gpio).
    ///
    /// Nothing is programmed until `init`.
    #[must_use]
    pub fn new_rp<P, S>(
        pin: Peri<'static, P>,
        slice: Peri<'static, S>,
        soft_pwm_static: &'static SoftPwmStatic,
        spawner: Spawner,
    ) -> Self
    where
        P: PwmLedPin<S>,
        S: PeripheralType,
    {
        #[expect(
            unsafe_code,
            reason = "the software task only drives the pin after the hardware PWM dropped it"
        )]
        // SAFETY: the two handles never drive the pin at the same time. `RpHardwarePwm`
        // drops its `Pwm` in `release`, and the controller releases before it starts the
        // software scheduler, which is the only code that uses the second handle.
        let soft_pin: Peri<'static, AnyPin> = unsafe { pin.clone_unchecked() }.into();
        let pwm = P::new_pwm(slice, pin);
        Self::new(
            RpHardwarePwm::new(pwm, P::GPIO, P::SLICE, P::IS_CHANNEL_A),
            RpSoftPwm::new(soft_pwm_static, soft_pin, spawner),
        )
    }
}

// ============================================================================
// RpHardwarePwm
// ============================================================================

/// Hardware backend on one RP PWM slice.
///
/// Frequency and duty are staged in a [`Config`] and written by
/// [`update_duty`](HardwarePwm::update_duty); the divider survives every rewrite because
/// the whole config is kept.
pub struct RpHardwarePwm<'d> {
    pwm: Option<Pwm<'d>>,
    cfg: Config,
    gpio: u8,
    slice: u8,
    is_channel_a: bool,
}

impl<'d> RpHardwarePwm<'d> {
    fn new(pwm: Pwm<'d>, gpio: u8, slice: u8, is_channel_a: bool) -> Self {
        let mut cfg = Config::default();
        cfg.enable = false;
        Self {
            pwm: Some(pwm),
            cfg,
            gpio,
            slice,
            is_channel_a,
        }
    }

    fn set_compare(&mut self, compare: u16) {
        if self.is_channel_a {
            self.cfg.compare_a = compare;
        } else {
            self.cfg.compare_b = compare;
        }
    }

    /// Stage the divider that gives `frequency_hz` with the current top and counter mode.
    fn stage_divider(&mut self, frequency_hz: u32) -> Result<(), HardwareFault> {
        // Phase-correct counts up and back down.
        let passes: u64 = if self.cfg.phase_correct { 2 } else { 1 };
        let counts_per_period = u64::from(self.cfg.top)
            .saturating_add(1)
            .saturating_mul(passes);
        let ticks_per_second = u64::from(frequency_hz)
            .checked_mul(counts_per_period)
            .filter(|ticks| *ticks > 0)
            .ok_or(HardwareFault::FrequencyOutOfRange)?;
        // Divider in 8.4 fixed point, rounded to the nearest 1/16.
        let clk = u64::from(clk_sys_freq());
        let divider_bits = clk
            .saturating_mul(16)
            .saturating_add(ticks_per_second / 2)
            .checked_div(ticks_per_second)
            .ok_or(HardwareFault::FrequencyOutOfRange)?;
        if !(DIVIDER_BITS_MIN..=DIVIDER_BITS_MAX).contains(&divider_bits) {
            log_warn!(
                "pwm_led: {} Hz needs divider {}/16 with clk {} Hz",
                frequency_hz,
                divider_bits,
                clk
            );
            return Err(HardwareFault::FrequencyOutOfRange);
        }
        let divider_bits =
            u16::try_from(divider_bits).map_err(|_| HardwareFault::FrequencyOutOfRange)?;
        self.cfg.divider = FixedU16::<U4>::from_bits(divider_bits);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), HardwareFault> {
        let pwm = self.pwm.as_mut().ok_or(HardwareFault::Released)?;
        pwm.set_config(&self.cfg);
        Ok(())
    }
}

impl HardwarePwm for RpHardwarePwm<'_> {
    fn configure_timer(
        &mut self,
        timer: TimerSelect,
        mode: PwmLedMode,
        resolution_bits: u8,
        frequency_hz: u32,
    ) -> Result<(), HardwareFault> {
        if self.pwm.is_none() {
            return Err(HardwareFault::Released);
        }
        if timer.0 != self.slice {
            log_warn!(
                "pwm_led: GPIO {} is wired to slice {}, not {}",
                self.gpio,
                self.slice,
                timer.0
            );
            return Err(HardwareFault::ChannelUnavailable);
        }
        if !(1..=MAX_RESOLUTION_BITS).contains(&resolution_bits) {
            return Err(HardwareFault::ResolutionUnsupported);
        }
        self.cfg.top = u16::try_from(max_duty_raw(resolution_bits))
            .map_err(|_| HardwareFault::ResolutionUnsupported)?;
        self.cfg.phase_correct = mode == PwmLedMode::PhaseCorrect;
        self.stage_divider(frequency_hz)?;
        self.cfg.compare_a = 0;
        self.cfg.compare_b = 0;
        self.cfg.enable = true;
        self.commit()
    }

    fn configure_channel(
        &mut self,
        output_pin: u8,
        channel: ChannelSelect,
    ) -> Result<(), HardwareFault> {
        if output_pin != self.gpio || (channel == ChannelSelect::A) != self.is_channel_a {
            log_warn!(
                "pwm_led: GPIO {} has no channel {:?} on slice {}",
                output_pin,
                channel,
                self.slice
            );
            return Err(HardwareFault::ChannelUnavailable);
        }
        self.set_compare(0);
        self.commit()
    }

    fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), HardwareFault> {
        if self.pwm.is_none() {
            return Err(HardwareFault::Released);
        }
        self.stage_divider(frequency_hz)
    }

    fn set_duty_raw(&mut self, duty_raw: u32) -> Result<(), HardwareFault> {
        if self.pwm.is_none() {
            return Err(HardwareFault::Released);
        }
        let compare = u16::try_from(duty_raw.min(u32::from(self.cfg.top)))
            .map_err(|_| HardwareFault::ResolutionUnsupported)?;
        // Compare = top + 1 keeps the output high for the whole period.
        let compare = if duty_raw >= u32::from(self.cfg.top) && self.cfg.top < u16::MAX {
            compare.saturating_add(1)
        } else {
            compare
        };
        self.set_compare(compare);
        Ok(())
    }

    fn update_duty(&mut self) -> Result<(), HardwareFault> {
        self.commit()
    }

    fn release(&mut self) {
        if let Some(mut pwm) = self.pwm.take() {
            self.cfg.enable = false;
            self.set_compare(0);
            pwm.set_config(&self.cfg);
            log_info!("pwm_led: slice {} released GPIO {}", self.slice, self.gpio);
        }
    }
}

// ============================================================================
// RpSoftPwm
// ============================================================================

/// Software scheduler backed by an embassy task on the output GPIO.
pub struct RpSoftPwm {
    soft_pwm_static: &'static SoftPwmStatic,
    pin: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<Peri<'static, AnyPin>>>>,
    spawner: Spawner,
    launched: AtomicBool,
}

impl RpSoftPwm {
    fn new(
        soft_pwm_static: &'static SoftPwmStatic,
        pin: Peri<'static, AnyPin>,
        spawner: Spawner,
    ) -> Self {
        Self {
            soft_pwm_static,
            pin: BlockingMutex::new(RefCell::new(Some(pin))),
            spawner,
            launched: AtomicBool::new(false),
        }
    }

    /// Spawn the loop task once. The pin stays in its slot until a spawn succeeds, so a
    /// failed spawn can be retried by the next `start`.
    fn launch(&self) -> Result<()> {
        if self.launched.load(Ordering::Acquire) {
            return Ok(());
        }
        #[expect(unsafe_code, reason = "a failed spawn drops the copy unused")]
        let task_pin = self.pin.lock(|slot| {
            let slot = slot.borrow();
            // SAFETY: the slot is emptied right after a successful spawn, so at most one
            // copy ever reaches a running task.
            slot.as_ref().map(|pin| unsafe { pin.clone_unchecked() })
        });
        let Some(task_pin) = task_pin else {
            return Err(Error::UnsupportedRequest);
        };
        let token = soft_pwm_task(self.soft_pwm_static, task_pin);
        self.spawner.spawn(token).map_err(|err| {
            log_error!("pwm_led: software PWM task spawn failed: {:?}", err);
            Error::UnsupportedRequest
        })?;
        // The task owns the pin from here on.
        self.pin.lock(|slot| slot.borrow_mut().take());
        self.launched.store(true, Ordering::Release);
        Ok(())
    }
}

impl SoftwarePwm for RpSoftPwm {
    fn start(&self, frequency_hz: u32, duty_percent: u32) -> Result<SoftPwmPlan> {
        self.launch()?;
        let plan = SoftPwmPlan::new(frequency_hz, duty_percent);
        self.soft_pwm_static.run(plan);
        Ok(plan)
    }

    async fn stop(&self) {
        self.soft_pwm_static.stop().await;
    }

    fn is_running(&self) -> bool {
        self.soft_pwm_static.is_running()
    }
}

#[embassy_executor::task]
async fn soft_pwm_task(soft_pwm_static: &'static SoftPwmStatic, pin: Peri<'static, AnyPin>) -> ! {
    let mut output = Output::new(pin, Level::Low);
    let mut delay = embassy_time::Delay;
    match soft_pwm_loop(soft_pwm_static, &mut output, &mut delay).await {}
}

// ============================================================================
// Pin to slice/channel mapping
// ============================================================================

// Public for the `new_rp` bound.
#[doc(hidden)]
pub trait PwmLedPin<S: PeripheralType>: PeripheralType + embassy_rp::gpio::Pin {
    const GPIO: u8;
    const SLICE: u8;
    const IS_CHANNEL_A: bool;
    fn new_pwm<'d>(slice: Peri<'d, S>, pin: Peri<'d, Self>) -> Pwm<'d>;
}

fn disabled_config() -> Config {
    let mut cfg = Config::default();
    cfg.enable = false;
    cfg
}

macro_rules! pwm_led_pin_map {
    ($pin:ident = $gpio:literal, $slice:ident = $slice_num:literal, A) => {
        impl PwmLedPin<embassy_rp::peripherals::$slice> for embassy_rp::peripherals::$pin {
            const GPIO: u8 = $gpio;
            const SLICE: u8 = $slice_num;
            const IS_CHANNEL_A: bool = true;
            fn new_pwm<'d>(
                slice: Peri<'d, embassy_rp::peripherals::$slice>,
                pin: Peri<'d, Self>,
            ) -> Pwm<'d> {
                Pwm::new_output_a(slice, pin, disabled_config())
            }
        }
    };
    ($pin:ident = $gpio:literal, $slice:ident = $slice_num:literal, B) => {
        impl PwmLedPin<embassy_rp::peripherals::$slice> for embassy_rp::peripherals::$pin {
            const GPIO: u8 = $gpio;
            const SLICE: u8 = $slice_num;
            const IS_CHANNEL_A: bool = false;
            fn new_pwm<'d>(
                slice: Peri<'d, embassy_rp::peripherals::$slice>,
                pin: Peri<'d, Self>,
            ) -> Pwm<'d> {
                Pwm::new_output_b(slice, pin, disabled_config())
            }
        }
    };
}

pwm_led_pin_map!(PIN_0 = 0, PWM_SLICE0 = 0, A);
pwm_led_pin_map!(PIN_1 = 1, PWM_SLICE0 = 0, B);
pwm_led_pin_map!(PIN_2 = 2, PWM_SLICE1 = 1, A);
pwm_led_pin_map!(PIN_3 = 3, PWM_SLICE1 = 1, B);
pwm_led_pin_map!(PIN_4 = 4, PWM_SLICE2 = 2, A);
pwm_led_pin_map!(PIN_5 = 5, PWM_SLICE2 = 2, B);
pwm_led_pin_map!(PIN_6 = 6, PWM_SLICE3 = 3, A);
pwm_led_pin_map!(PIN_7 = 7, PWM_SLICE3 = 3, B);
pwm_led_pin_map!(PIN_8 = 8, PWM_SLICE4 = 4, A);
pwm_led_pin_map!(PIN_9 = 9, PWM_SLICE4 = 4, B);
pwm_led_pin_map!(PIN_10 = 10, PWM_SLICE5 = 5, A);
pwm_led_pin_map!(PIN_11 = 11, PWM_SLICE5 = 5, B);
pwm_led_pin_map!(PIN_12 = 12, PWM_SLICE6 = 6, A);
pwm_led_pin_map!(PIN_13 = 13, PWM_SLICE6 = 6, B);
pwm_led_pin_map!(PIN_14 = 14, PWM_SLICE7 = 7, A);
pwm_led_pin_map!(PIN_15 = 15, PWM_SLICE7 = 7, B);
pwm_led_pin_map!(PIN_16 = 16, PWM_SLICE0 = 0, A);
pwm_led_pin_map!(PIN_17 = 17, PWM_SLICE0 = 0, B);
pwm_led_pin_map!(PIN_18 = 18, PWM_SLICE1 = 1, A);
pwm_led_pin_map!(PIN_19 = 19, PWM_SLICE1 = 1, B);
pwm_led_pin_map!(PIN_20 = 20, PWM_SLICE2 = 2, A);
pwm_led_pin_map!(PIN_21 = 21, PWM_SLICE2 = 2, B);
pwm_led_pin_map!(PIN_22 = 22, PWM_SLICE3 = 3, A);
pwm_led_pin_map!(PIN_23 = 23, PWM_SLICE3 = 3, B);
pwm_led_pin_map!(PIN_24 = 24, PWM_SLICE4 = 4, A);
pwm_led_pin_map!(PIN_25 = 25, PWM_SLICE4 = 4, B);
pwm_led_pin_map!(PIN_26 = 26, PWM_SLICE5 = 5, A);
pwm_led_pin_map!(PIN_27 = 27, PWM_SLICE5 = 5, B);
pwm_led_pin_map!(PIN_28 = 28, PWM_SLICE6 = 6, A);
pwm_led_pin_map!(PIN_29 = 29, PWM_SLICE6 = 6, B);

#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_30 = 30, PWM_SLICE7 = 7, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_31 = 31, PWM_SLICE7 = 7, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_32 = 32, PWM_SLICE8 = 8, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_33 = 33, PWM_SLICE8 = 8, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_34 = 34, PWM_SLICE9 = 9, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_35 = 35, PWM_SLICE9 = 9, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_36 = 36, PWM_SLICE10 = 10, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_37 = 37, PWM_SLICE10 = 10, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_38 = 38, PWM_SLICE11 = 11, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_39 = 39, PWM_SLICE11 = 11, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_40 = 40, PWM_SLICE8 = 8, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_41 = 41, PWM_SLICE8 = 8, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_42 = 42, PWM_SLICE9 = 9, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_43 = 43, PWM_SLICE9 = 9, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_44 = 44, PWM_SLICE10 = 10, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_45 = 45, PWM_SLICE10 = 10, B);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_46 = 46, PWM_SLICE11 = 11, A);
#[cfg(feature = "pico2")]
pwm_led_pin_map!(PIN_47 = 47, PWM_SLICE11 = 11, B);
