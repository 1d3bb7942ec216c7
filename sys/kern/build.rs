// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Build-time knobs, as `(environment variable, generated constant, default)`.
const KNOBS: &[(&str, &str, usize)] = &[
    ("POSTBOX_MAX_TASKS", "DEFAULT_MAX_TASKS", 32),
    ("POSTBOX_MAX_MESSAGES", "DEFAULT_MAX_MESSAGES", 256),
    ("POSTBOX_TRACE_DEPTH", "TRACE_DEPTH", 64),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    expose_m_profile();
    generate_consts()?;
    Ok(())
}

/// Tells the compiler which ARM M-profile we're targeting, so the context
/// switch code can pick an instruction sequence.
fn expose_m_profile() {
    println!("cargo:rustc-check-cfg=cfg(armv6m)");
    println!("cargo:rustc-check-cfg=cfg(armv7m)");
    println!("cargo:rustc-check-cfg=cfg(armv8m)");

    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumbv6m") {
        println!("cargo:rustc-cfg=armv6m");
    } else if target.starts_with("thumbv7m") || target.starts_with("thumbv7em")
    {
        println!("cargo:rustc-cfg=armv7m");
    } else if target.starts_with("thumbv8m.main") {
        println!("cargo:rustc-cfg=armv8m");
    }
}

fn generate_consts() -> Result<(), Box<dyn std::error::Error>> {
    let out = &PathBuf::from(
        env::var_os("OUT_DIR").ok_or("OUT_DIR not set by cargo")?,
    );
    let mut const_file = File::create(out.join("consts.rs"))?;

    writeln!(const_file, "// See build.rs for the origin of these constants")?;
    for &(var, name, default) in KNOBS {
        println!("cargo:rerun-if-env-changed={var}");
        let value = match env::var(var) {
            Ok(s) => s
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("{var}={s:?}: {e}"))?,
            Err(_) => default,
        };
        if value == 0 {
            return Err(format!("{var} must be non-zero").into());
        }
        // Task and message handles carry a 16-bit index.
        if name != "TRACE_DEPTH" && value >= usize::from(u16::MAX) {
            return Err(format!("{var}={value} exceeds handle range").into());
        }
        writeln!(const_file, "pub const {name}: usize = {value};")?;
    }
    Ok(())
}
