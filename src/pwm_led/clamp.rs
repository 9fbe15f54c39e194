//! Range limits and clamping helpers shared by both PWM backends.

/// Lowest frequency the controller accepts (Hz).
pub const MIN_FREQ_HZ: u32 = 10;

/// Highest frequency the controller accepts (Hz).
pub const MAX_FREQ_HZ: u32 = 20_000;

/// Duty cycles are percentages.
pub const MAX_DUTY_PERCENT: u32 = 100;

/// Frequency used when a configuration asks for 0 Hz.
pub const DEFAULT_FREQ_HZ: u32 = 1_000;

/// Duty cycle of [`PwmLedConfig::default`](super::PwmLedConfig::default).
pub const DEFAULT_DUTY_PERCENT: u32 = 50;

/// Clamp `value` into `min..=max`.
#[must_use]
pub const fn clamp_u32(value: u32, min: u32, max: u32) -> u32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Clamp a requested frequency into [`MIN_FREQ_HZ`]..=[`MAX_FREQ_HZ`].
#[must_use]
pub const fn clamp_frequency_hz(frequency_hz: u32) -> u32 {
    clamp_u32(frequency_hz, MIN_FREQ_HZ, MAX_FREQ_HZ)
}

/// Clamp a requested duty cycle into 0..=[`MAX_DUTY_PERCENT`].
#[must_use]
pub const fn clamp_duty_percent(duty_percent: u32) -> u32 {
    clamp_u32(duty_percent, 0, MAX_DUTY_PERCENT)
}

/// Largest raw compare value for a counter with `resolution_bits` bits (`2^bits - 1`).
///
/// Saturates at `u32::MAX` for 32 bits or more.
#[must_use]
pub const fn max_duty_raw(resolution_bits: u8) -> u32 {
    match 1_u32.checked_shl(resolution_bits as u32) {
        Some(levels) => levels.wrapping_sub(1),
        None => u32::MAX,
    }
}

/// Raw compare value for `duty_percent` of `max_duty_raw`, rounded down.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "duty_percent <= 100 keeps the result <= max_duty_raw"
)]
pub const fn duty_raw(max_duty_raw: u32, duty_percent: u32) -> u32 {
    let duty_percent = clamp_duty_percent(duty_percent);
    // u64 keeps `max * 100` from overflowing for wide counters.
    let scaled =
        (max_duty_raw as u64).saturating_mul(duty_percent as u64) / MAX_DUTY_PERCENT as u64;
    scaled as u32
}

/// Saturating conversion of a protocol number to `u32`: truncates toward zero, maps
/// negatives and NaN to 0 and values past `u32::MAX` to `u32::MAX`.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "float-to-int `as` saturates, which is the intended truncation"
)]
pub const fn truncate_to_u32(value: f64) -> u32 {
    value as u32
}
