#![allow(missing_docs)]
//! Host-level tests for the JSON message gateway.

mod common;

use common::{HwStep, MockPwmLed, mock_pwm_led};
use embassy_futures::block_on;
use pwm_envoy::gateway::{
    Frame, Gateway, ProtocolError, RESPONSE_CAPACITY, Request, WS_ENDPOINTS, is_gateway_endpoint,
    parse_request,
};
use pwm_envoy::pwm_led::{HardwareFault, PwmLedConfig, PwmState};

fn ready_pwm_led() -> MockPwmLed {
    let (pwm_led, _hardware, _software) = mock_pwm_led();
    let config = PwmLedConfig {
        default_frequency_hz: 1_000,
        default_duty_percent: 50,
        ..PwmLedConfig::for_gpio(2)
    };
    block_on(pwm_led.init(Some(config))).expect("init");
    pwm_led
}

fn text(
    gateway: &Gateway<'_, common::MockHardwarePwm, common::MockSoftPwm>,
    payload: &str,
) -> String {
    let frame = Frame::Text(payload.as_bytes());
    let response = block_on(gateway.handle_frame(frame)).expect("response");
    response.as_str().to_owned()
}

#[test]
fn endpoints_are_ws_and_auth() {
    assert_eq!(WS_ENDPOINTS, ["/ws", "/auth"]);
    assert!(is_gateway_endpoint("/ws"));
    assert!(is_gateway_endpoint("/auth"));
    assert!(!is_gateway_endpoint("/"));
    assert!(!is_gateway_endpoint("/ws/"));
}

#[test]
fn parse_decodes_both_request_types() {
    assert_eq!(
        parse_request(br#"{"type":"pwm_update","frequency":440,"duty":12}"#),
        Ok(Request::Update {
            frequency_hz: 440,
            duty_percent: 12
        })
    );
    assert_eq!(
        parse_request(br#"{ "duty": 12.9, "type": "pwm_update", "frequency": 440.7 }"#),
        Ok(Request::Update {
            frequency_hz: 440,
            duty_percent: 12
        })
    );
    assert_eq!(parse_request(br#"{"type":"pwm_get"}"#), Ok(Request::Get));
    assert_eq!(
        parse_request(br#"{"type":"pwm_get","extra":"ignored"}"#),
        Ok(Request::Get)
    );
}

#[test]
fn parse_saturates_out_of_range_numbers() {
    assert_eq!(
        parse_request(br#"{"type":"pwm_update","frequency":-20,"duty":12345678901234}"#),
        Ok(Request::Update {
            frequency_hz: 0,
            duty_percent: u32::MAX
        })
    );
}

#[test]
fn parse_reports_protocol_errors() {
    assert_eq!(parse_request(b"not json"), Err(ProtocolError::InvalidJson));
    assert_eq!(
        parse_request(br#"{"type":"pwm_get""#),
        Err(ProtocolError::InvalidJson)
    );
    assert_eq!(
        parse_request(br#"{"frequency":10}"#),
        Err(ProtocolError::MissingType)
    );
    assert_eq!(
        parse_request(br#"{"type":7}"#),
        Err(ProtocolError::MissingType)
    );
    assert_eq!(
        parse_request(br#"{"type":"pwm_update","duty":50}"#),
        Err(ProtocolError::MissingPwmFields)
    );
    assert_eq!(
        parse_request(br#"{"type":"pwm_update","frequency":"fast","duty":50}"#),
        Err(ProtocolError::MissingPwmFields)
    );
    assert_eq!(
        parse_request(br#"{"type":"reboot"}"#),
        Err(ProtocolError::UnknownType)
    );
}

#[test]
fn update_clamps_and_reports_new_state() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    assert_eq!(
        text(
            &gateway,
            r#"{"type":"pwm_update","frequency":5000,"duty":150}"#
        ),
        r#"{"type":"pwm_state","status":"ok","frequency":5000,"duty":100}"#
    );
    assert_eq!(
        pwm_led.get_state(),
        PwmState {
            frequency_hz: 5_000,
            duty_percent: 100
        }
    );
}

#[test]
fn missing_field_reports_error_with_unchanged_state() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    assert_eq!(
        text(&gateway, r#"{"type":"pwm_update","duty":50}"#),
        r#"{"type":"pwm_state","status":"error","frequency":1000,"duty":50,"message":"missing pwm fields"}"#
    );
}

#[test]
fn invalid_json_reports_last_known_state() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    text(
        &gateway,
        r#"{"type":"pwm_update","frequency":200,"duty":7}"#
    );
    assert_eq!(
        text(&gateway, "not json"),
        r#"{"type":"pwm_state","status":"error","frequency":200,"duty":7,"message":"invalid_json"}"#
    );
}

#[test]
fn get_reports_state_without_changing_it() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    let before = pwm_led.get_state();
    assert_eq!(
        text(&gateway, r#"{"type":"pwm_get"}"#),
        r#"{"type":"pwm_state","status":"ok","frequency":1000,"duty":50}"#
    );
    assert_eq!(pwm_led.get_state(), before);
}

#[test]
fn type_errors_are_reported() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    assert_eq!(
        text(&gateway, r#"{"frequency":10,"duty":10}"#),
        r#"{"type":"pwm_state","status":"error","frequency":1000,"duty":50,"message":"missing_type"}"#
    );
    assert_eq!(
        text(&gateway, r#"{"type":"pwm_blink"}"#),
        r#"{"type":"pwm_state","status":"error","frequency":1000,"duty":50,"message":"unknown_type"}"#
    );
}

#[test]
fn non_text_frames_are_unsupported() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    let expected =
        r#"{"type":"pwm_state","status":"error","frequency":1000,"duty":50,"message":"unsupported_type"}"#;
    let frames = [
        Frame::Binary(br#"{"type":"pwm_get"}"#),
        Frame::Other,
        Frame::Text(b""),
    ];
    for frame in frames {
        let response = block_on(gateway.handle_frame(frame)).expect("response");
        assert_eq!(response.as_str(), expected);
    }
}

#[test]
fn set_failure_reports_the_error_reason() {
    let (pwm_led, _hardware, _software) = mock_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    assert_eq!(
        text(
            &gateway,
            r#"{"type":"pwm_update","frequency":100,"duty":10}"#
        ),
        r#"{"type":"pwm_state","status":"error","frequency":0,"duty":0,"message":"invalid_state"}"#
    );
}

#[test]
fn hardware_fault_is_invisible_to_the_client() {
    let (pwm_led, hardware, software) = mock_pwm_led();
    let config = PwmLedConfig::for_gpio(2);
    block_on(pwm_led.init(Some(config))).expect("init");
    hardware.fail_at(HwStep::UpdateDuty, HardwareFault::Released);
    let gateway = Gateway::new(&pwm_led);

    assert_eq!(
        text(
            &gateway,
            r#"{"type":"pwm_update","frequency":300,"duty":60}"#
        ),
        r#"{"type":"pwm_state","status":"ok","frequency":300,"duty":60}"#
    );
    assert_eq!(software.starts().last(), Some(&(300, 60)));
}

#[test]
fn largest_response_fits_the_buffer() {
    let pwm_led = ready_pwm_led();
    let gateway = Gateway::new(&pwm_led);
    text(
        &gateway,
        r#"{"type":"pwm_update","frequency":20000,"duty":100}"#
    );
    let response = text(&gateway, r#"{"type":"pwm_update","frequency":20000}"#);
    assert!(response.len() <= RESPONSE_CAPACITY);
    assert!(response.ends_with(r#""message":"missing pwm fields"}"#));
}
