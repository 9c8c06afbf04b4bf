//! # `preshim`
//!
//! `preshim` is a small framework for building `LD_PRELOAD`-style symbol
//! interposition libraries in Rust, where every shadowed symbol follows an
//! explicit [`Policy`]:
//!
//! * [`Policy::Forward`] observes the call and delegates to the real
//!   definition, found lazily with `dlsym(RTLD_NEXT, ...)`;
//! * [`Policy::Replace`] observes the call and returns a fixed result without
//!   ever consulting the real definition.
//!
//! WARNING: `Replace` changes the security posture of the host process.
//! Whatever the replaced symbol used to check, callers now get a
//! successful-looking answer unconditionally. That is the point of the
//! variant; use it knowingly.
//!
//! Observed calls are reported to a [`CallSink`] as one line each:
//!
//! ```text
//! [intercept] fopen called with path="/etc/hosts", mode="r"
//! ```
//!
//! Credentials are masked before they reach the sink; see [`Arg::secret`].
//!
//! See the [macro docs](`macro@interpose`) for how hooks are declared.

mod error;
mod layer;
mod policy;
mod record;
mod registry;
mod resolver;
mod sink;
mod symbol;
pub mod testing;

use std::sync::OnceLock;

pub use error::{RegistrationError, ResolutionError};
pub use layer::Interposer;
pub use policy::{FromSynthetic, Override, Policy, PolicyKind, SideEffect, Synthetic};
pub use record::{Arg, ArgValue, CallRecord};
pub use registry::{InterceptedSymbolRegistry, Registration};
pub use resolver::{DlsymResolver, SymbolResolver};
pub use sink::{CallSink, MemorySink, NullSink, StderrSink};
pub use symbol::{FunctionHandle, InterceptedSymbol, ResolutionState, SymbolName};

/// The `#[interpose]` attribute macro.
///
/// Applied to a *bodiless* function signature, it generates an `extern "C"`
/// function exported under the same name, which shadows the real symbol
/// once the library is preloaded.
///
/// ## Basic usage
///
/// ```no_run
/// use std::ffi::c_char;
/// use preshim::interpose;
///
/// #[interpose(forward)]
/// fn unlink(path: *const c_char) -> i32;
/// ```
///
/// Each call to `unlink` in the host emits
/// `[intercept] unlink called with path="..."` and then runs the real
/// `unlink` with the same arguments, returning whatever it returns.
///
/// ## Policies
///
/// * `forward`: observe, then delegate. `forward(silent)` delegates without
///   emitting a call line.
/// * `replace = <literal>`: observe, then return the literal (a boolean, an
///   integer, or `null`) without calling the real symbol.
///
/// ```no_run
/// use preshim::interpose;
///
/// #[interpose(replace = 1)]
/// fn isatty(fd: i32) -> i32;
/// ```
///
/// ## Missing definitions
///
/// When a forwarded symbol has no further definition in the search order,
/// the hook returns the `on_missing` value with `errno` set to `ENOSYS`:
///
/// ```no_run
/// use std::ffi::c_char;
/// use preshim::interpose;
///
/// #[interpose(forward, on_missing = -1)]
/// fn rename(old: *const c_char, new: *const c_char) -> i32;
/// ```
///
/// Without `on_missing` the hook has no way to signal the failure in the
/// caller's terms, so it prints a diagnostic to stderr and aborts.
///
/// ## Secrets
///
/// Parameters marked `#[secret]` are always rendered as `<redacted>`.
/// Parameters whose names look like credentials (`passwd`, `token`, ...)
/// are masked too, and `replace` hooks never print string arguments.
///
/// ## Arguments
///
/// `*const c_char` parameters are shown as strings, other pointers (output
/// buffers like `*mut c_char` included) as addresses and integers as
/// numbers. Arguments are only read when a call line is actually emitted.
///
/// ## Dispatch
///
/// The generated hook goes through the layer registered with [`install`].
/// It also emits a `mod <name>` holding the hook's [`Override`] entry
/// (`<name>::OVERRIDE`), for building the layer's override list. Until a
/// layer is installed, or for a hook the installed layer does not list, the
/// hook forwards straight to the real definition without observing. That
/// path keeps its own cache of the real definition, separate from the
/// layer's registry.
///
/// Hooks are not exported in `cfg(test)` builds, so a crate's own test
/// binary is never interposed on.
///
/// ## Safety
///
/// As with any interposition, the declared signature must match the real
/// symbol exactly. Nothing can check this.
pub use preshim_macros::interpose;

static LAYER: OnceLock<Interposer> = OnceLock::new();

/// Installs the process-wide layer that generated hooks dispatch through.
///
/// Only one layer can ever be installed.
pub fn install(layer: Interposer) -> Result<&'static Interposer, RegistrationError> {
    LAYER
        .set(layer)
        .map_err(|_| RegistrationError::AlreadyInstalled)?;
    LAYER.get().ok_or(RegistrationError::AlreadyInstalled)
}

/// The installed layer, if any.
pub fn installed() -> Option<&'static Interposer> {
    LAYER.get()
}

#[doc(hidden)]
pub mod __private {
    use std::ffi::CStr;

    pub use ::libc;

    use crate::{
        installed, Arg, DlsymResolver, FromSynthetic, FunctionHandle, InterceptedSymbol,
        ResolutionError, SymbolName,
    };

    pub const fn symbol_name(bytes: &'static [u8]) -> SymbolName {
        match CStr::from_bytes_with_nul(bytes) {
            Ok(name) => SymbolName::from_static(name),
            Err(_) => panic!("symbol names must be NUL-terminated"),
        }
    }

    /// Entry point of every generated hook.
    ///
    /// `passthrough` is the hook's own cache of the real definition, used
    /// when no installed layer lists the symbol. A listed symbol is resolved
    /// through the layer's registry and resolver instead, so a symbol called
    /// both before and after [`crate::install`] is looked up once on each side.
    /// `describe` is only run when the layer emits a call line.
    pub fn dispatch<'a, T, A, F>(
        passthrough: &'static InterceptedSymbol,
        describe: A,
        forward: F,
    ) -> Result<T, ResolutionError>
    where
        T: FromSynthetic,
        A: FnOnce() -> Vec<Arg<'a>>,
        F: FnOnce(FunctionHandle) -> T,
    {
        let name = passthrough.name().as_str();
        match installed() {
            Some(layer) if layer.is_registered(name) => layer.invoke(name, describe, forward),
            _ => passthrough.resolve(&DlsymResolver).map(forward),
        }
    }

    pub fn set_errno(value: i32) {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        unsafe {
            *libc::__errno_location() = value;
        }
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        unsafe {
            *libc::__error() = value;
        }
    }

    /// Reports an unrecoverable resolution failure and aborts.
    ///
    /// We can't reliably panic here, or even allocate: the hook may be
    /// standing in for something the panic machinery itself calls. Write
    /// static pieces out raw and abort.
    pub fn barf(err: &ResolutionError) -> ! {
        for part in barf_message(err) {
            crate::sink::write_stderr(part);
        }
        std::process::abort()
    }

    fn barf_message(err: &ResolutionError) -> [&[u8]; 3] {
        let prefix: &[u8] = b"barf: preshim could not forward a hooked call to `";
        let reason: &[u8] = match err {
            ResolutionError::NotFound { .. } => b"`: no further definition in the search order\n",
            ResolutionError::NotRegistered { .. } => b"`: not registered with the layer\n",
            ResolutionError::Reentrant { .. } => b"`: called again while being resolved\n",
        };
        [prefix, err.symbol().as_bytes(), reason]
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn barf_message_names_the_symbol() {
            let err = ResolutionError::NotFound {
                symbol: "fopen".into(),
            };
            assert_eq!(
                barf_message(&err).concat(),
                b"barf: preshim could not forward a hooked call to `fopen`: \
                  no further definition in the search order\n"
            );

            let err = ResolutionError::Reentrant {
                symbol: "malloc".into(),
            };
            assert_eq!(
                barf_message(&err).concat(),
                b"barf: preshim could not forward a hooked call to `malloc`: \
                  called again while being resolved\n"
            );
        }
    }
}
