//! A dimmable PWM output for Pico 1 and 2, driven remotely through a small JSON protocol.
//!
//! The output is produced by a hardware PWM slice while the slice behaves, and by a
//! software-timed toggle loop after the first hardware fault. See [`pwm_led`] for the
//! controller and [`gateway`] for the message protocol.
//!
//! # Glossary
//!
//! - **PWM ([Pulse Width Modulation](https://en.wikipedia.org/wiki/Pulse-width_modulation)) Slices:** Pico 1 has 8 slices and Pico 2 has 12, each with
//!   channels A and B. These "slices" are unrelated to Rust slices.
//! - **Duty cycle:** Percent (0–100) of each period that the output is driven high.
//! - **Software fallback:** CPU-driven approximation of the same signal by toggling a plain GPIO.
//! - **One-way degradation:** Once the controller falls back to software, it never returns to
//!   the hardware slice.
#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait, reason = "single-threaded embedded")]

#[cfg(all(feature = "pico1", feature = "pico2"))]
compile_error!("Cannot enable both 'pico1' and 'pico2' features simultaneously");

// Compile-time checks: a board needs exactly one architecture
#[cfg(all(
    any(feature = "pico1", feature = "pico2"),
    not(any(feature = "arm", feature = "riscv"))
))]
compile_error!("Must enable exactly one architecture feature: 'arm' or 'riscv'");

#[cfg(all(feature = "arm", feature = "riscv"))]
compile_error!("Cannot enable both 'arm' and 'riscv' features simultaneously");

// Compile-time check: pico1 only supports ARM
#[cfg(all(feature = "pico1", feature = "riscv"))]
compile_error!("Pico 1 (RP2040) only supports ARM architecture, not RISC-V");

#[macro_use]
mod log;

mod error;
pub mod gateway;
pub mod pwm_led;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};
