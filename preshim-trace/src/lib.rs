//! # `preshim-trace`
//!
//! A preload library built on `preshim`. Load it with
//!
//! ```text
//! LD_PRELOAD=target/release/libpreshim_trace.so some-program
//! ```
//!
//! and every `fopen`, `unlink` and `rename` the program makes is reported on
//! stderr before it runs:
//!
//! ```text
//! [intercept] fopen called with path="/etc/hosts", mode="r"
//! ```
//!
//! `isatty` is replaced and always answers "yes".
//!
//! ## Environment
//!
//! * `PRESHIM_LOG`: `env_logger` filter for the library's own diagnostics
//!   (default `warn`).
//! * `PRESHIM_QUIET`: when set to anything but an empty string or `0`, call
//!   lines are suppressed. Hooks still apply.

mod hooks;

use std::ffi::OsStr;

use preshim::{DlsymResolver, Interposer, NullSink, Override, RegistrationError, StderrSink};

pub const LOG_ENV: &str = "PRESHIM_LOG";
pub const QUIET_ENV: &str = "PRESHIM_QUIET";

/// The symbols this library shadows.
pub fn overrides() -> Vec<Override> {
    let mut overrides = vec![
        hooks::fopen::OVERRIDE,
        hooks::unlink::OVERRIDE,
        hooks::rename::OVERRIDE,
        hooks::isatty::OVERRIDE,
    ];
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    overrides.push(hooks::fopen64::OVERRIDE);

    overrides
}

fn is_quiet(value: Option<&OsStr>) -> bool {
    value.is_some_and(|v| !v.is_empty() && v != "0")
}

/// Builds the layer without installing it.
pub fn build_layer(quiet: bool) -> Result<Interposer, RegistrationError> {
    let overrides = overrides();
    if quiet {
        Interposer::from_overrides(&overrides, DlsymResolver, NullSink)
    } else {
        Interposer::from_overrides(&overrides, DlsymResolver, StderrSink)
    }
}

/// Builds and installs the layer for this process.
pub fn activate() -> Result<&'static Interposer, RegistrationError> {
    let quiet = is_quiet(std::env::var_os(QUIET_ENV).as_deref());
    preshim::install(build_layer(quiet)?)
}

#[cfg(not(test))]
#[ctor::ctor]
unsafe fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, "warn"))
        .try_init();

    match activate() {
        Ok(layer) => log::debug!(
            "preshim-trace active, shadowing {} symbols",
            layer.registry().len()
        ),
        // Hooks stay in place but forward untouched.
        Err(err) => log::error!("preshim-trace refusing to activate: {err}"),
    }
}
