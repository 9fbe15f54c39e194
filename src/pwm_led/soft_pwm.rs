//! Software PWM: a background loop that toggles a plain GPIO to approximate a
//! frequency and duty cycle when the hardware slice is unusable.
//!
//! The loop runs in its own task and receives [`SoftPwmPlan`]s through a
//! [`SoftPwmStatic`]. It looks for a new command once per segment (after each high or
//! low stretch), never in the middle of a toggle. [`SoftPwmStatic::stop`] asks the
//! loop to park and waits, bounded by [`SOFT_PWM_STOP_TIMEOUT`], for its
//! acknowledgment.

use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use portable_atomic::{AtomicBool, Ordering};

use crate::Result;
use crate::pwm_led::clamp::{MAX_DUTY_PERCENT, MIN_FREQ_HZ, clamp_duty_percent, clamp_u32};

// ============================================================================
// Constants
// ============================================================================

/// Scheduler tick rate: one tick is 100 µs.
pub const SOFT_PWM_TICK_HZ: u32 = 10_000;

/// Highest frequency the software loop will attempt. Faster requests are clamped.
pub const SOFT_PWM_MAX_FREQ_HZ: u32 = 1_000;

/// How long [`SoftPwmStatic::stop`] waits for the loop to acknowledge.
pub const SOFT_PWM_STOP_TIMEOUT: Duration = Duration::from_millis(50);

const TICK_NS: u32 = 1_000_000_000 / SOFT_PWM_TICK_HZ;

// ============================================================================
// SoftPwmPlan - period and on-time in ticks
// ============================================================================

/// Level of the output during a [`Segment`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    /// Output driven high.
    High,
    /// Output driven low.
    Low,
}

/// One stretch of constant output level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    /// Output level for the stretch.
    pub level: Level,
    /// Length of the stretch in scheduler ticks.
    pub ticks: u32,
}

/// Period and on-time of one software PWM cycle, in scheduler ticks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SoftPwmPlan {
    frequency_hz: u32,
    duty_percent: u32,
    period_ticks: u32,
    on_ticks: u32,
}

impl SoftPwmPlan {
    /// Plan a cycle for the request, clamping the frequency to
    /// [`MIN_FREQ_HZ`]..=[`SOFT_PWM_MAX_FREQ_HZ`] and the duty to 0..=100.
    #[must_use]
    pub fn new(frequency_hz: u32, duty_percent: u32) -> Self {
        let clamped_frequency_hz = clamp_u32(frequency_hz, MIN_FREQ_HZ, SOFT_PWM_MAX_FREQ_HZ);
        if frequency_hz > SOFT_PWM_MAX_FREQ_HZ {
            log_warn!(
                "soft_pwm: {} Hz exceeds what software PWM can produce, using {} Hz",
                frequency_hz,
                clamped_frequency_hz
            );
        }
        let duty_percent = clamp_duty_percent(duty_percent);

        // round(tick_rate / frequency), at least one tick
        let period_ticks = SOFT_PWM_TICK_HZ
            .saturating_add(clamped_frequency_hz / 2)
            .checked_div(clamped_frequency_hz)
            .unwrap_or(1)
            .max(1);

        let on_ticks = match duty_percent {
            0 => 0,
            MAX_DUTY_PERCENT.. => period_ticks,
            _ => {
                let on_ticks = period_ticks.saturating_mul(duty_percent) / MAX_DUTY_PERCENT;
                // Both the high and the low stretch last at least one tick.
                on_ticks.max(1).min(period_ticks.saturating_sub(1).max(1))
            }
        };

        Self {
            frequency_hz: clamped_frequency_hz,
            duty_percent,
            period_ticks,
            on_ticks,
        }
    }

    /// Frequency actually produced (after the software ceiling).
    #[must_use]
    pub const fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// Duty cycle in percent.
    #[must_use]
    pub const fn duty_percent(&self) -> u32 {
        self.duty_percent
    }

    /// Ticks per cycle.
    #[must_use]
    pub const fn period_ticks(&self) -> u32 {
        self.period_ticks
    }

    /// Ticks the output stays high each cycle.
    #[must_use]
    pub const fn on_ticks(&self) -> u32 {
        self.on_ticks
    }

    /// The segments of one cycle, in order.
    ///
    /// Returns one full-period segment at 0% and 100%, otherwise high then low.
    #[must_use]
    pub fn segments(&self) -> heapless::Vec<Segment, 2> {
        let segment = |level, ticks| Segment { level, ticks };
        let off_ticks = self.period_ticks.saturating_sub(self.on_ticks).max(1);
        let mut segments = heapless::Vec::new();
        let (first, second) = match self.duty_percent {
            0 => (segment(Level::Low, self.period_ticks), None),
            MAX_DUTY_PERCENT.. => (segment(Level::High, self.period_ticks), None),
            _ => (
                segment(Level::High, self.on_ticks),
                Some(segment(Level::Low, off_ticks)),
            ),
        };
        // Capacity 2 holds both pushes.
        let _ = segments.push(first);
        if let Some(second) = second {
            let _ = segments.push(second);
        }
        segments
    }
}

// ============================================================================
// SoftwarePwm - what the controller needs from a scheduler
// ============================================================================

/// Start/stop interface the controller uses to drive a software scheduler.
pub trait SoftwarePwm {
    /// Start the scheduler, or retune it if already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedRequest`](crate::Error::UnsupportedRequest) if the
    /// background activity cannot be launched. The next `start` tries the launch again.
    fn start(&self, frequency_hz: u32, duty_percent: u32) -> Result<SoftPwmPlan>;

    /// Ask the scheduler to stop and wait (bounded) until it has.
    async fn stop(&self);

    /// Whether the scheduler is currently toggling the output.
    fn is_running(&self) -> bool;
}

// ============================================================================
// SoftPwmStatic - shared state between the controller and the loop
// ============================================================================

/// Commands sent to the software PWM loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SoftPwmCommand {
    /// Run (or keep running) with this plan.
    Run(SoftPwmPlan),
    /// Drive the output low and park.
    Stop,
}

type SoftPwmCommandSignal = Signal<CriticalSectionRawMutex, SoftPwmCommand>;
type SoftPwmStoppedSignal = Signal<CriticalSectionRawMutex, ()>;

/// Static resources shared by a scheduler handle and its loop.
pub struct SoftPwmStatic {
    command: SoftPwmCommandSignal,
    stopped: SoftPwmStoppedSignal,
    running: AtomicBool,
}

impl SoftPwmStatic {
    /// Create static resources.
    #[must_use]
    pub const fn new_static() -> Self {
        Self {
            command: Signal::new(),
            stopped: Signal::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Hand the loop a new plan. Takes effect at the end of the current segment.
    pub fn run(&self, plan: SoftPwmPlan) {
        self.stopped.reset();
        self.running.store(true, Ordering::Release);
        self.command.signal(SoftPwmCommand::Run(plan));
    }

    /// Ask the loop to park, then wait for its acknowledgment or
    /// [`SOFT_PWM_STOP_TIMEOUT`], whichever comes first.
    ///
    /// Returns immediately if the loop is not running.
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        // Drop an acknowledgment left over from a stop that timed out.
        self.stopped.reset();
        self.command.signal(SoftPwmCommand::Stop);
        let stopped = with_timeout(SOFT_PWM_STOP_TIMEOUT, self.stopped.wait());
        if stopped.await.is_err() {
            log_warn!("soft_pwm: loop did not acknowledge stop in time");
        }
    }

    /// Whether the loop has been told to run and has not parked since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Software PWM loop. Never returns.
///
/// Waits for a [`SoftPwmCommand::Run`], then plays the plan's segments on `output`
/// until the next command arrives. Embassy tasks cannot be generic, so boards wrap
/// this in a concrete task.
pub async fn soft_pwm_loop<O, D>(
    soft_pwm_static: &SoftPwmStatic,
    output: &mut O,
    delay: &mut D,
) -> Infallible
where
    O: OutputPin,
    D: DelayNs,
{
    log_info!("soft_pwm_loop: started");
    let mut command = soft_pwm_static.command.wait().await;
    loop {
        match command {
            SoftPwmCommand::Stop => {
                drive(output, Level::Low);
                soft_pwm_static.running.store(false, Ordering::Release);
                soft_pwm_static.stopped.signal(());
                log_debug!("soft_pwm_loop: parked");
                command = soft_pwm_static.command.wait().await;
            }
            SoftPwmCommand::Run(plan) => {
                log_info!(
                    "soft_pwm_loop: {} Hz, {}% ({} of {} ticks high)",
                    plan.frequency_hz(),
                    plan.duty_percent(),
                    plan.on_ticks(),
                    plan.period_ticks()
                );
                command = run_plan(soft_pwm_static, plan, output, delay).await;
            }
        }
    }
}

/// Play `plan` until a command arrives, then return it.
async fn run_plan<O, D>(
    soft_pwm_static: &SoftPwmStatic,
    plan: SoftPwmPlan,
    output: &mut O,
    delay: &mut D,
) -> SoftPwmCommand
where
    O: OutputPin,
    D: DelayNs,
{
    let segments = plan.segments();
    loop {
        for segment in &segments {
            drive(output, segment.level);
            delay.delay_ns(segment.ticks.saturating_mul(TICK_NS)).await;
            // Cancellation point: end of each segment.
            if let Some(command) = soft_pwm_static.command.try_take() {
                return command;
            }
        }
    }
}

fn drive<O: OutputPin>(output: &mut O, level: Level) {
    let result = match level {
        Level::High => output.set_high(),
        Level::Low => output.set_low(),
    };
    if result.is_err() {
        log_error!("soft_pwm: output pin write failed");
    }
}
