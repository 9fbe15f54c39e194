//! Host test doubles for the PWM backends, the output pin and the delay.
#![allow(dead_code, reason = "each test binary uses a subset of the doubles")]

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use std::rc::Rc;

use pwm_envoy::pwm_led::soft_pwm::Level;
use pwm_envoy::pwm_led::{
    ChannelSelect, HardwareFault, HardwarePwm, PwmLed, PwmLedMode, SoftPwmPlan, SoftPwmStatic,
    SoftwarePwm, TimerSelect,
};
use pwm_envoy::{Error, Result};

pub type MockPwmLed = PwmLed<MockHardwarePwm, MockSoftPwm>;

/// Controller over fresh doubles, plus handles to inspect them.
pub fn mock_pwm_led() -> (MockPwmLed, MockHardwarePwm, MockSoftPwm) {
    let hardware = MockHardwarePwm::default();
    let software = MockSoftPwm::default();
    let pwm_led = PwmLed::new(hardware.clone(), software.clone());
    (pwm_led, hardware, software)
}

// ============================================================================
// MockHardwarePwm
// ============================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HwCall {
    ConfigureTimer {
        timer: u8,
        mode: PwmLedMode,
        resolution_bits: u8,
        frequency_hz: u32,
    },
    ConfigureChannel {
        output_pin: u8,
        channel: ChannelSelect,
    },
    SetFrequency(u32),
    SetDutyRaw(u32),
    UpdateDuty,
    Release,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HwStep {
    ConfigureTimer,
    ConfigureChannel,
    SetFrequency,
    SetDutyRaw,
    UpdateDuty,
}

#[derive(Default)]
struct HwInner {
    calls: Vec<HwCall>,
    fail_at: Option<(HwStep, HardwareFault)>,
    released: bool,
}

/// Records every programming step; can be told to fail one of them.
#[derive(Clone, Default)]
pub struct MockHardwarePwm {
    inner: Rc<RefCell<HwInner>>,
}

impl MockHardwarePwm {
    pub fn fail_at(&self, step: HwStep, fault: HardwareFault) {
        self.inner.borrow_mut().fail_at = Some((step, fault));
    }

    pub fn heal(&self) {
        self.inner.borrow_mut().fail_at = None;
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    pub fn released(&self) -> bool {
        self.inner.borrow().released
    }

    fn step(&mut self, step: HwStep, call: HwCall) -> core::result::Result<(), HardwareFault> {
        let mut inner = self.inner.borrow_mut();
        inner.calls.push(call);
        if inner.released {
            return Err(HardwareFault::Released);
        }
        match inner.fail_at {
            Some((failing, fault)) if failing == step => Err(fault),
            _ => Ok(()),
        }
    }
}

impl HardwarePwm for MockHardwarePwm {
    fn configure_timer(
        &mut self,
        timer: TimerSelect,
        mode: PwmLedMode,
        resolution_bits: u8,
        frequency_hz: u32,
    ) -> core::result::Result<(), HardwareFault> {
        self.step(
            HwStep::ConfigureTimer,
            HwCall::ConfigureTimer {
                timer: timer.0,
                mode,
                resolution_bits,
                frequency_hz,
            },
        )
    }

    fn configure_channel(
        &mut self,
        output_pin: u8,
        channel: ChannelSelect,
    ) -> core::result::Result<(), HardwareFault> {
        self.step(
            HwStep::ConfigureChannel,
            HwCall::ConfigureChannel {
                output_pin,
                channel,
            },
        )
    }

    fn set_frequency(&mut self, frequency_hz: u32) -> core::result::Result<(), HardwareFault> {
        self.step(HwStep::SetFrequency, HwCall::SetFrequency(frequency_hz))
    }

    fn set_duty_raw(&mut self, duty_raw: u32) -> core::result::Result<(), HardwareFault> {
        self.step(HwStep::SetDutyRaw, HwCall::SetDutyRaw(duty_raw))
    }

    fn update_duty(&mut self) -> core::result::Result<(), HardwareFault> {
        self.step(HwStep::UpdateDuty, HwCall::UpdateDuty)
    }

    fn release(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.calls.push(HwCall::Release);
        inner.released = true;
    }
}

// ============================================================================
// MockSoftPwm
// ============================================================================

#[derive(Default)]
struct SoftInner {
    starts: Vec<(u32, u32)>,
    stops: usize,
    running: bool,
    fail_launch: bool,
    stop_yields: usize,
}

/// Records start/stop requests instead of toggling anything.
#[derive(Clone, Default)]
pub struct MockSoftPwm {
    inner: Rc<RefCell<SoftInner>>,
}

impl MockSoftPwm {
    /// Make every `start` fail as if the background task could not be launched.
    pub fn fail_launch(&self, fail: bool) {
        self.inner.borrow_mut().fail_launch = fail;
    }

    /// Make `stop` take `count` polls before the scheduler reports stopped.
    pub fn stop_yields(&self, count: usize) {
        self.inner.borrow_mut().stop_yields = count;
    }

    pub fn set_running(&self, running: bool) {
        self.inner.borrow_mut().running = running;
    }

    /// Every `start` request, including failed launches.
    pub fn starts(&self) -> Vec<(u32, u32)> {
        self.inner.borrow().starts.clone()
    }

    pub fn stops(&self) -> usize {
        self.inner.borrow().stops
    }
}

impl SoftwarePwm for MockSoftPwm {
    fn start(&self, frequency_hz: u32, duty_percent: u32) -> Result<SoftPwmPlan> {
        let mut inner = self.inner.borrow_mut();
        inner.starts.push((frequency_hz, duty_percent));
        if inner.fail_launch {
            return Err(Error::UnsupportedRequest);
        }
        inner.running = true;
        Ok(SoftPwmPlan::new(frequency_hz, duty_percent))
    }

    async fn stop(&self) {
        let stop_yields = {
            let mut inner = self.inner.borrow_mut();
            if !inner.running {
                return;
            }
            inner.stops += 1;
            inner.stop_yields
        };
        yield_times(stop_yields).await;
        self.inner.borrow_mut().running = false;
    }

    fn is_running(&self) -> bool {
        self.inner.borrow().running
    }
}

// ============================================================================
// StaticSoftPwm
// ============================================================================

/// Scheduler handle over a real [`SoftPwmStatic`], for driving `soft_pwm_loop` from the
/// controller without an executor.
pub struct StaticSoftPwm<'a>(pub &'a SoftPwmStatic);

impl SoftwarePwm for StaticSoftPwm<'_> {
    fn start(&self, frequency_hz: u32, duty_percent: u32) -> Result<SoftPwmPlan> {
        let plan = SoftPwmPlan::new(frequency_hz, duty_percent);
        self.0.run(plan);
        Ok(plan)
    }

    async fn stop(&self) {
        self.0.stop().await;
    }

    fn is_running(&self) -> bool {
        self.0.is_running()
    }
}

// ============================================================================
// Output pin and delay
// ============================================================================

/// Output level over time, shared by [`MockPin`] and [`MockDelay`].
#[derive(Clone, Default)]
pub struct Trace {
    level: Rc<Cell<Option<Level>>>,
    writes: Rc<RefCell<Vec<Level>>>,
    delays: Rc<RefCell<Vec<(Option<Level>, u32)>>>,
}

impl Trace {
    pub fn pin(&self) -> MockPin {
        MockPin {
            trace: self.clone(),
        }
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay {
            trace: self.clone(),
        }
    }

    /// Every level written to the pin, in order.
    pub fn writes(&self) -> Vec<Level> {
        self.writes.borrow().clone()
    }

    /// Level the pin was last driven to.
    pub fn level(&self) -> Option<Level> {
        self.level.get()
    }

    /// Each delay, with the level held during it, in nanoseconds.
    pub fn delays(&self) -> Vec<(Option<Level>, u32)> {
        self.delays.borrow().clone()
    }
}

pub struct MockPin {
    trace: Trace,
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> core::result::Result<(), Self::Error> {
        self.trace.level.set(Some(Level::Low));
        self.trace.writes.borrow_mut().push(Level::Low);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Self::Error> {
        self.trace.level.set(Some(Level::High));
        self.trace.writes.borrow_mut().push(Level::High);
        Ok(())
    }
}

/// Records the requested delay and yields once instead of sleeping.
pub struct MockDelay {
    trace: Trace,
}

impl embedded_hal_async::delay::DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.trace
            .delays
            .borrow_mut()
            .push((self.trace.level.get(), ns));
        embassy_futures::yield_now().await;
    }
}

/// Let other futures in a `select`/`join` run for a while.
pub async fn yield_times(count: usize) {
    for _ in 0..count {
        embassy_futures::yield_now().await;
    }
}
