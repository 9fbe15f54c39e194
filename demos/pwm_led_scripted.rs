#![no_std]
#![no_main]

use core::{convert::Infallible, panic};

use embassy_executor::Spawner;
use embassy_time::Timer;
use pwm_envoy::{
    Result,
    gateway::{Frame, Gateway},
    pwm_led::{PwmLed, PwmLedConfig, SoftPwmStatic, rp::RpPwmLed},
};
use static_cell::StaticCell;
use {defmt::info, defmt_rtt as _, panic_probe as _};

static SOFT_PWM_STATIC: SoftPwmStatic = SoftPwmStatic::new_static();
static PWM_LED: StaticCell<RpPwmLed> = StaticCell::new();

// What a WebSocket client on /ws would send.
const SCRIPT: [&str; 8] = [
    r#"{"type":"pwm_get"}"#,
    r#"{"type":"pwm_update","frequency":5000,"duty":150}"#,
    r#"{"type":"pwm_update","frequency":2000,"duty":10}"#,
    r#"{"type":"pwm_update","duty":50}"#,
    "not json",
    r#"{"type":"pwm_blink"}"#,
    // 10-bit counter at 100 Hz needs a divider above 255: hardware fault, software from here on.
    r#"{"type":"pwm_update","frequency":100,"duty":25}"#,
    r#"{"type":"pwm_update","frequency":4000,"duty":75}"#,
];

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    let p = embassy_rp::init(Default::default());

    // LED on GPIO 2 → (2/2) % 8 = slice 1, channel A. PWM_LED_GPIO defaults to 2.
    let pwm_led = PwmLed::new_rp(p.PIN_2, p.PWM_SLICE1, &SOFT_PWM_STATIC, spawner);
    let pwm_led = PWM_LED.init(pwm_led);
    pwm_led.init(Some(PwmLedConfig::from_build_env())).await?;
    info!("mode after init: {:?}", pwm_led.mode());

    let gateway = Gateway::new(pwm_led);
    loop {
        for message in SCRIPT {
            info!("-> {}", message);
            let frame = Frame::Text(message.as_bytes());
            let response = gateway.handle_frame(frame).await?;
            info!("<- {} (mode {:?})", response.as_str(), pwm_led.mode());
            Timer::after_secs(2).await;
        }
    }
}
