//! Crate-wide error type.

/// Errors surfaced by the PWM LED controller and the message gateway.
///
/// Hardware faults never appear here. The controller absorbs them by falling back to
/// software PWM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// `init` was called without a configuration.
    #[display("no configuration supplied")]
    InvalidArgument,

    /// The controller was used before a successful `init`.
    #[display("controller not initialized")]
    InvalidState,

    /// The software scheduler could not be launched. The request is kept and retried on
    /// the next `set`.
    #[display("software scheduler could not be launched")]
    UnsupportedRequest,

    /// A response did not fit its buffer.
    #[display("message too large for its buffer")]
    MessageTooLarge,
}

impl Error {
    /// Short machine-readable reason, as sent in gateway error responses.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidState => "invalid_state",
            Self::UnsupportedRequest => "unsupported_request",
            Self::MessageTooLarge => "message_too_large",
        }
    }
}

/// Result type for this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
