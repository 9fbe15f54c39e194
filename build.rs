//! Build script for pwm-envoy.
//!
//! Turns the board-level PWM LED settings from the environment into constants
//! that `PwmLedConfig::from_build_env` reads.

use std::{env, fs, path::PathBuf};

/// Environment variables and their defaults when unset.
const SETTINGS: [(&str, &str, u32); 3] = [
    ("PWM_LED_GPIO", "BUILD_GPIO", 2),
    ("PWM_LED_DEFAULT_FREQ", "BUILD_DEFAULT_FREQ_HZ", 1_000),
    ("PWM_LED_DEFAULT_DUTY", "BUILD_DEFAULT_DUTY_PERCENT", 50),
];

fn main() {
    println!("cargo:rustc-check-cfg=cfg(rust_analyzer)");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"));
    let generated_path = out_dir.join("pwm_led_build_env.rs");

    let mut generated = String::from(
        "// Board settings captured from the build environment\n// Auto-generated - do not edit manually\n\n",
    );
    for (env_name, const_name, default) in SETTINGS {
        println!("cargo:rerun-if-env-changed={env_name}");
        let value = match env::var(env_name) {
            Ok(text) => text.trim().parse::<u32>().unwrap_or_else(|err| {
                panic!("{env_name} must be an unsigned integer, got {text:?}: {err}")
            }),
            Err(_) => default,
        };
        generated.push_str(&format!("const {const_name}: u32 = {value};\n"));
    }

    fs::write(&generated_path, generated).expect("Failed to write pwm_led_build_env.rs");
    println!("cargo:rerun-if-changed=build.rs");

    // Memory layout and linker scripts for board targets only; host builds skip this.
    let target = env::var("TARGET").expect("cargo sets TARGET");
    let memory_file = if target.starts_with("thumbv8m") || target.starts_with("riscv32imac") {
        Some("memory-pico2.x")
    } else if target.starts_with("thumbv6m") {
        Some("memory-pico1.x")
    } else {
        None
    };

    if let Some(memory_file) = memory_file {
        let memory_x = fs::read_to_string(memory_file)
            .unwrap_or_else(|_| panic!("Failed to read {memory_file}"));
        fs::write(out_dir.join("memory.x"), memory_x).expect("Failed to write memory.x");
        println!("cargo:rustc-link-search={}", out_dir.display());
        println!("cargo:rerun-if-changed={memory_file}");
        println!("cargo:rustc-link-arg-bins=--nmagic");
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        if target.starts_with("thumbv6m") {
            println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
        }
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
