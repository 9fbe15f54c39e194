//! Message gateway: turns inbound JSON text frames into [`PwmLed`] calls and answers with
//! the controller's current state.
//!
//! The transport (a WebSocket on [`WS_ENDPOINTS`]) is the caller's concern. Hand each
//! received frame to [`Gateway::handle_frame`] and send back the text it returns.
//!
//! Inbound:
//!
//! ```text
//! {"type":"pwm_update","frequency":<number>,"duty":<number>}
//! {"type":"pwm_get"}
//! ```
//!
//! Outbound, always built from [`PwmLed::get_state`] after the request was handled:
//!
//! ```text
//! {"type":"pwm_state","status":"ok"|"error","frequency":<uint>,"duty":<uint>[,"message":"<reason>"]}
//! ```
//!
//! Protocol errors never fail the call; they come back as `"status":"error"` with a reason.

use serde::{Deserialize, Serialize};

use crate::pwm_led::clamp::truncate_to_u32;
use crate::pwm_led::{HardwarePwm, PwmLed, SoftwarePwm};
use crate::{Error, Result};

/// Paths the WebSocket server routes to the gateway.
pub const WS_ENDPOINTS: [&str; 2] = ["/ws", "/auth"];

/// Capacity of a serialized response.
pub const RESPONSE_CAPACITY: usize = 192;

/// A serialized response.
pub type Response = heapless::String<RESPONSE_CAPACITY>;

/// Whether `path` is one of the [`WS_ENDPOINTS`].
#[must_use]
pub fn is_gateway_endpoint(path: &str) -> bool {
    WS_ENDPOINTS.contains(&path)
}

/// One inbound WebSocket frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Frame<'a> {
    /// Text frame; the payload should be a JSON object.
    Text(&'a [u8]),
    /// Binary frame.
    Binary(&'a [u8]),
    /// Any other frame type (ping, pong, continuation, ...).
    Other,
}

/// A decoded request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// `pwm_update`: numbers already truncated to unsigned integers, not yet clamped.
    Update {
        /// Requested frequency in Hz.
        frequency_hz: u32,
        /// Requested duty cycle in percent.
        duty_percent: u32,
    },
    /// `pwm_get`.
    Get,
}

/// Why a frame could not be turned into a [`Request`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, derive_more::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Not a JSON object.
    #[display("invalid_json")]
    InvalidJson,
    /// No string `type` field.
    #[display("missing_type")]
    MissingType,
    /// `pwm_update` without numeric `frequency` and `duty`.
    #[display("missing pwm fields")]
    MissingPwmFields,
    /// A `type` the gateway does not handle.
    #[display("unknown_type")]
    UnknownType,
    /// Not a non-empty text frame.
    #[display("unsupported_type")]
    UnsupportedType,
}

impl ProtocolError {
    /// Reason string sent in the response `message`.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingType => "missing_type",
            Self::MissingPwmFields => "missing pwm fields",
            Self::UnknownType => "unknown_type",
            Self::UnsupportedType => "unsupported_type",
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Any JSON object; fields are skipped.
#[derive(Deserialize)]
struct AnyObject {}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type", borrow)]
    kind: Option<&'a str>,
}

#[derive(Deserialize)]
struct PwmUpdate {
    frequency: Option<f64>,
    duty: Option<f64>,
}

/// Decode one text payload.
///
/// # Errors
///
/// Returns the [`ProtocolError`] that the response should report.
pub fn parse_request(payload: &[u8]) -> Result<Request, ProtocolError> {
    serde_json_core::from_slice::<AnyObject>(payload).map_err(|_| ProtocolError::InvalidJson)?;

    let (envelope, _) = serde_json_core::from_slice::<Envelope<'_>>(payload)
        .map_err(|_| ProtocolError::MissingType)?;
    match envelope.kind.ok_or(ProtocolError::MissingType)? {
        "pwm_update" => {
            let Ok((
                PwmUpdate {
                    frequency: Some(frequency),
                    duty: Some(duty),
                },
                _,
            )) = serde_json_core::from_slice::<PwmUpdate>(payload)
            else {
                return Err(ProtocolError::MissingPwmFields);
            };
            Ok(Request::Update {
                frequency_hz: truncate_to_u32(frequency),
                duty_percent: truncate_to_u32(duty),
            })
        }
        "pwm_get" => Ok(Request::Get),
        kind => {
            log_warn!("gateway: unknown message type: {}", kind);
            Err(ProtocolError::UnknownType)
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Ok,
    Error,
}

#[derive(Serialize)]
struct PwmStateResponse<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    status: Status,
    frequency: u32,
    duty: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Dispatches frames to a [`PwmLed`]. Holds no per-connection state.
pub struct Gateway<'a, H, S> {
    pwm_led: &'a PwmLed<H, S>,
}

impl<'a, H: HardwarePwm, S: SoftwarePwm> Gateway<'a, H, S> {
    /// Gateway in front of `pwm_led`.
    #[must_use]
    pub const fn new(pwm_led: &'a PwmLed<H, S>) -> Self {
        Self { pwm_led }
    }

    /// Handle one frame and return the response text.
    ///
    /// Binary, control and empty frames answer `unsupported_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if the response does not fit [`Response`].
    pub async fn handle_frame(&self, frame: Frame<'_>) -> Result<Response> {
        match frame {
            Frame::Text(payload) if !payload.is_empty() => self.handle_text(payload).await,
            _ => {
                log_warn!("gateway: unsupported frame");
                self.respond(Err(ProtocolError::UnsupportedType.reason()))
            }
        }
    }

    /// Handle one text payload and return the response text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if the response does not fit [`Response`].
    pub async fn handle_text(&self, payload: &[u8]) -> Result<Response> {
        let outcome = match parse_request(payload) {
            Ok(Request::Update {
                frequency_hz,
                duty_percent,
            }) => self
                .pwm_led
                .set(frequency_hz, duty_percent)
                .await
                .map_err(|err| err.reason()),
            Ok(Request::Get) => Ok(()),
            Err(err) => {
                log_debug!("gateway: rejected message: {}", err);
                Err(err.reason())
            }
        };
        self.respond(outcome)
    }

    fn respond(&self, outcome: Result<(), &'static str>) -> Result<Response> {
        let state = self.pwm_led.get_state();
        let (status, message) = match outcome {
            Ok(()) => (Status::Ok, None),
            Err(reason) => (Status::Error, Some(reason)),
        };
        let response = PwmStateResponse {
            kind: "pwm_state",
            status,
            frequency: state.frequency_hz,
            duty: state.duty_percent,
            message,
        };
        serde_json_core::to_string::<_, RESPONSE_CAPACITY>(&response).map_err(|_| {
            log_error!("gateway: response does not fit {} bytes", RESPONSE_CAPACITY);
            Error::MessageTooLarge
        })
    }
}
